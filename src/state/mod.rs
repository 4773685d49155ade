mod memory;

pub use memory::MemoryStateStore;

use async_trait::async_trait;

use crate::error::Result;

/// An upload authorization minted by `@db.writebytes` and redeemed once
/// by the HTTP upload endpoint.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct UploadTicket {
  pub database: String,
  pub path: String,
  pub username: String,
}

/// Short-lived keyed state: auth tokens, upload tickets, caches.
///
/// TTLs are in seconds; a zero TTL means no expiry. Tokens map to the
/// owning username so that deleting a user can purge every session it
/// holds.
#[async_trait]
pub trait StateStore: Send + Sync {
  async fn set(&self, key: &str, value: &str, ttl: u64) -> Result<()>;
  async fn get(&self, key: &str) -> Result<Option<String>>;
  async fn delete(&self, key: &str) -> Result<()>;

  async fn token_set(&self, token: &str, username: &str, ttl: u64) -> Result<()>;
  async fn token_get(&self, token: &str) -> Result<Option<String>>;
  /// Remove every token belonging to `username`.
  async fn token_purge(&self, username: &str) -> Result<()>;

  async fn ticket_set(&self, ticket: &str, info: &UploadTicket, ttl: u64) -> Result<()>;
  /// Redeem a ticket. Consumes it: a second take returns `None`.
  async fn ticket_take(&self, ticket: &str) -> Result<Option<UploadTicket>>;

  async fn cache_set(&self, key: &str, value: &str, ttl: u64) -> Result<()>;
  async fn cache_get(&self, key: &str) -> Result<Option<String>>;

  /// Drop everything. Used by tests and `server.*` maintenance.
  async fn clear(&self) -> Result<()>;
}
