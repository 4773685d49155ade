use std::collections::{BTreeSet, HashMap};

use argon2::password_hash::{PasswordHash, SaltString};
use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use async_trait::async_trait;
use parking_lot::RwLock;
use rand::RngCore;
use regex::Regex;

use super::Authentication;
use crate::error::{EngineError, Result};
use crate::types::User;

const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Clone)]
struct UserRecord {
  pwhash: String,
  active: bool,
  root: bool,
  databases: BTreeSet<String>,
}

/// In-process user registry. Hashing goes through a blocking-friendly
/// spawn because argon2 verification is deliberately slow.
#[derive(Default)]
pub struct MemoryAuthentication {
  users: RwLock<HashMap<String, UserRecord>>,
}

fn valid_username(name: &str) -> bool {
  let mut chars = name.chars();
  match chars.next() {
    Some(c) if c.is_ascii_alphabetic() => {}
    _ => return false,
  }
  name.len() >= 3 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn hash_password(password: &str) -> Result<String> {
  let mut salt_bytes = [0u8; 16];
  rand::thread_rng().fill_bytes(&mut salt_bytes);
  let salt = SaltString::encode_b64(&salt_bytes)
    .map_err(|e| EngineError::Internal(e.to_string()))?;
  let phc = Argon2::default()
    .hash_password(password.as_bytes(), &salt)
    .map_err(|e| EngineError::Internal(e.to_string()))?
    .to_string();
  Ok(phc)
}

fn verify_password(hash: &str, password: &str) -> bool {
  match PasswordHash::new(hash) {
    Ok(parsed) => Argon2::default()
      .verify_password(password.as_bytes(), &parsed)
      .is_ok(),
    Err(_) => false,
  }
}

impl MemoryAuthentication {
  pub fn new() -> Self {
    Self::default()
  }

  fn to_user(username: &str, rec: &UserRecord) -> User {
    User {
      username: username.to_string(),
      active: rec.active,
      root: rec.root,
      databases: rec.databases.iter().cloned().collect(),
    }
  }
}

#[async_trait]
impl Authentication for MemoryAuthentication {
  async fn new_user(&self, username: &str, password: &str, root: bool) -> Result<()> {
    if !valid_username(username) {
      return Err(EngineError::InvalidArgument(format!(
        "invalid username '{username}'"
      )));
    }
    if password.len() < MIN_PASSWORD_LEN {
      return Err(EngineError::InvalidArgument(format!(
        "password must be at least {MIN_PASSWORD_LEN} characters"
      )));
    }
    let pwhash = hash_password(password)?;
    let mut users = self.users.write();
    if users.contains_key(username) {
      return Err(EngineError::AlreadyExists(format!("user '{username}'")));
    }
    users.insert(
      username.to_string(),
      UserRecord {
        pwhash,
        active: true,
        root,
        databases: BTreeSet::new(),
      },
    );
    Ok(())
  }

  async fn remove_user(&self, username: &str) -> Result<()> {
    match self.users.write().remove(username) {
      Some(_) => Ok(()),
      None => Err(EngineError::user_not_found(username)),
    }
  }

  async fn list_users(&self, pattern: &str) -> Result<Vec<String>> {
    let rgx = Regex::new(pattern)
      .map_err(|e| EngineError::InvalidArgument(format!("bad regex: {e}")))?;
    let users = self.users.read();
    let mut names: Vec<String> = users
      .keys()
      .filter(|name| rgx.is_match(name))
      .cloned()
      .collect();
    names.sort();
    Ok(names)
  }

  async fn user_info(&self, username: &str) -> Result<User> {
    let users = self.users.read();
    users
      .get(username)
      .map(|rec| Self::to_user(username, rec))
      .ok_or_else(|| EngineError::user_not_found(username))
  }

  async fn change_password(&self, username: &str, password: &str) -> Result<()> {
    if password.len() < MIN_PASSWORD_LEN {
      return Err(EngineError::InvalidArgument(format!(
        "password must be at least {MIN_PASSWORD_LEN} characters"
      )));
    }
    let pwhash = hash_password(password)?;
    let mut users = self.users.write();
    match users.get_mut(username) {
      Some(rec) => {
        rec.pwhash = pwhash;
        Ok(())
      }
      None => Err(EngineError::user_not_found(username)),
    }
  }

  async fn change_user_status(&self, username: &str, active: bool) -> Result<()> {
    let mut users = self.users.write();
    match users.get_mut(username) {
      Some(rec) => {
        rec.active = active;
        Ok(())
      }
      None => Err(EngineError::user_not_found(username)),
    }
  }

  async fn change_user_db_access(&self, username: &str, db: &str, grant: bool) -> Result<()> {
    let mut users = self.users.write();
    match users.get_mut(username) {
      Some(rec) => {
        if grant {
          rec.databases.insert(db.to_string());
        } else {
          rec.databases.remove(db);
        }
        Ok(())
      }
      None => Err(EngineError::user_not_found(username)),
    }
  }

  async fn authenticate(&self, username: &str, password: &str) -> Result<User> {
    let (pwhash, user) = {
      let users = self.users.read();
      match users.get(username) {
        Some(rec) if rec.active => (rec.pwhash.clone(), Self::to_user(username, rec)),
        _ => return Err(EngineError::Unauthorized("authentication failed".into())),
      }
    };
    // Argon2 verification is CPU-bound; keep it off the async workers.
    let password = password.to_string();
    let ok = tokio::task::spawn_blocking(move || verify_password(&pwhash, &password))
      .await
      .map_err(|e| EngineError::Internal(e.to_string()))?;
    if ok {
      Ok(user)
    } else {
      Err(EngineError::Unauthorized("authentication failed".into()))
    }
  }

  async fn clear_all(&self) -> Result<()> {
    self.users.write().clear();
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn create_and_authenticate() {
    let auth = MemoryAuthentication::new();
    auth.new_user("alice", "wonderland1", false).await.unwrap();
    let user = auth.authenticate("alice", "wonderland1").await.unwrap();
    assert_eq!(user.username, "alice");
    assert!(!user.root);
    assert!(auth.authenticate("alice", "wrongpass1").await.is_err());
  }

  #[tokio::test]
  async fn duplicate_user_rejected() {
    let auth = MemoryAuthentication::new();
    auth.new_user("alice", "wonderland1", false).await.unwrap();
    let err = auth.new_user("alice", "wonderland1", false).await.unwrap_err();
    assert_eq!(err.kind(), "already_exists");
  }

  #[tokio::test]
  async fn weak_password_rejected() {
    let auth = MemoryAuthentication::new();
    let err = auth.new_user("alice", "short", false).await.unwrap_err();
    assert_eq!(err.kind(), "invalid_argument");
  }

  #[tokio::test]
  async fn deactivated_user_cannot_authenticate() {
    let auth = MemoryAuthentication::new();
    auth.new_user("bob", "builder12", false).await.unwrap();
    auth.change_user_status("bob", false).await.unwrap();
    assert!(auth.authenticate("bob", "builder12").await.is_err());
  }

  #[tokio::test]
  async fn db_access_grant_and_revoke() {
    let auth = MemoryAuthentication::new();
    auth.new_user("carol", "password1", false).await.unwrap();
    auth.change_user_db_access("carol", "db1", true).await.unwrap();
    // Granting twice is a no-op.
    auth.change_user_db_access("carol", "db1", true).await.unwrap();
    let info = auth.user_info("carol").await.unwrap();
    assert_eq!(info.databases, vec!["db1".to_string()]);

    auth.change_user_db_access("carol", "db1", false).await.unwrap();
    let info = auth.user_info("carol").await.unwrap();
    assert!(info.databases.is_empty());
  }

  #[tokio::test]
  async fn list_users_filters_by_regex() {
    let auth = MemoryAuthentication::new();
    auth.new_user("admin", "longenough", true).await.unwrap();
    auth.new_user("adm_backup", "longenough", false).await.unwrap();
    auth.new_user("guest", "longenough", false).await.unwrap();
    let names = auth.list_users("^adm").await.unwrap();
    assert_eq!(names, vec!["adm_backup".to_string(), "admin".to_string()]);
    let all = auth.list_users("").await.unwrap();
    assert_eq!(all.len(), 3);
  }
}
