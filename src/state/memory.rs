use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{StateStore, UploadTicket};
use crate::error::{EngineError, Result};

#[derive(Debug, Clone)]
struct Entry {
  value: String,
  expires_at: Option<Instant>,
}

impl Entry {
  fn new(value: &str, ttl: u64) -> Self {
    Self {
      value: value.to_string(),
      expires_at: (ttl > 0).then(|| Instant::now() + Duration::from_secs(ttl)),
    }
  }

  fn expired(&self) -> bool {
    self.expires_at.is_some_and(|t| Instant::now() >= t)
  }
}

/// In-process state store with lazy TTL expiry. Entries are namespaced by
/// prefix so tokens, tickets and cache values never collide.
#[derive(Default)]
pub struct MemoryStateStore {
  entries: Mutex<HashMap<String, Entry>>,
}

const TOKEN_NS: &str = "token:";
const TICKET_NS: &str = "ticket:";
const CACHE_NS: &str = "cache:";

impl MemoryStateStore {
  pub fn new() -> Self {
    Self::default()
  }

  fn put(&self, key: String, value: &str, ttl: u64) {
    self.entries.lock().insert(key, Entry::new(value, ttl));
  }

  fn fetch(&self, key: &str) -> Option<String> {
    let mut entries = self.entries.lock();
    match entries.get(key) {
      Some(e) if e.expired() => {
        entries.remove(key);
        None
      }
      Some(e) => Some(e.value.clone()),
      None => None,
    }
  }

  fn remove(&self, key: &str) -> Option<String> {
    let mut entries = self.entries.lock();
    entries
      .remove(key)
      .and_then(|e| (!e.expired()).then_some(e.value))
  }
}

#[async_trait]
impl StateStore for MemoryStateStore {
  async fn set(&self, key: &str, value: &str, ttl: u64) -> Result<()> {
    self.put(key.to_string(), value, ttl);
    Ok(())
  }

  async fn get(&self, key: &str) -> Result<Option<String>> {
    Ok(self.fetch(key))
  }

  async fn delete(&self, key: &str) -> Result<()> {
    self.remove(key);
    Ok(())
  }

  async fn token_set(&self, token: &str, username: &str, ttl: u64) -> Result<()> {
    self.put(format!("{TOKEN_NS}{token}"), username, ttl);
    Ok(())
  }

  async fn token_get(&self, token: &str) -> Result<Option<String>> {
    Ok(self.fetch(&format!("{TOKEN_NS}{token}")))
  }

  async fn token_purge(&self, username: &str) -> Result<()> {
    let mut entries = self.entries.lock();
    entries.retain(|k, e| !(k.starts_with(TOKEN_NS) && e.value == username));
    Ok(())
  }

  async fn ticket_set(&self, ticket: &str, info: &UploadTicket, ttl: u64) -> Result<()> {
    let encoded = serde_json::to_string(info)
      .map_err(|e| EngineError::Internal(format!("ticket encoding: {e}")))?;
    self.put(format!("{TICKET_NS}{ticket}"), &encoded, ttl);
    Ok(())
  }

  async fn ticket_take(&self, ticket: &str) -> Result<Option<UploadTicket>> {
    match self.remove(&format!("{TICKET_NS}{ticket}")) {
      Some(raw) => {
        let info = serde_json::from_str(&raw)
          .map_err(|e| EngineError::Internal(format!("ticket decoding: {e}")))?;
        Ok(Some(info))
      }
      None => Ok(None),
    }
  }

  async fn cache_set(&self, key: &str, value: &str, ttl: u64) -> Result<()> {
    self.put(format!("{CACHE_NS}{key}"), value, ttl);
    Ok(())
  }

  async fn cache_get(&self, key: &str) -> Result<Option<String>> {
    Ok(self.fetch(&format!("{CACHE_NS}{key}")))
  }

  async fn clear(&self) -> Result<()> {
    self.entries.lock().clear();
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn set_get_delete() {
    let store = MemoryStateStore::new();
    store.set("k", "v", 0).await.unwrap();
    assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
    store.delete("k").await.unwrap();
    assert_eq!(store.get("k").await.unwrap(), None);
  }

  #[tokio::test]
  async fn namespaces_do_not_collide() {
    let store = MemoryStateStore::new();
    store.set("x", "plain", 0).await.unwrap();
    store.token_set("x", "alice", 0).await.unwrap();
    store.cache_set("x", "cached", 0).await.unwrap();
    assert_eq!(store.get("x").await.unwrap().as_deref(), Some("plain"));
    assert_eq!(store.token_get("x").await.unwrap().as_deref(), Some("alice"));
    assert_eq!(store.cache_get("x").await.unwrap().as_deref(), Some("cached"));
  }

  #[tokio::test]
  async fn ticket_is_single_use() {
    let store = MemoryStateStore::new();
    let info = UploadTicket {
      database: "db1".into(),
      path: "/a".into(),
      username: "alice".into(),
    };
    store.ticket_set("t1", &info, 0).await.unwrap();
    assert_eq!(store.ticket_take("t1").await.unwrap(), Some(info));
    assert_eq!(store.ticket_take("t1").await.unwrap(), None);
  }

  #[tokio::test]
  async fn token_purge_removes_only_owner() {
    let store = MemoryStateStore::new();
    store.token_set("t1", "alice", 0).await.unwrap();
    store.token_set("t2", "bob", 0).await.unwrap();
    store.token_purge("alice").await.unwrap();
    assert_eq!(store.token_get("t1").await.unwrap(), None);
    assert_eq!(store.token_get("t2").await.unwrap().as_deref(), Some("bob"));
  }
}
