mod memory;

pub use memory::MemoryAuthentication;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::User;

/// User records and credential checks.
///
/// Passwords are stored as salted argon2 hashes; `authenticate` performs
/// a constant-time verification. Listing and per-user info are only
/// called by root-guarded handlers.
#[async_trait]
pub trait Authentication: Send + Sync {
  async fn new_user(&self, username: &str, password: &str, root: bool) -> Result<()>;
  async fn remove_user(&self, username: &str) -> Result<()>;
  /// Usernames matching `pattern` (a regex; empty matches all).
  async fn list_users(&self, pattern: &str) -> Result<Vec<String>>;
  async fn user_info(&self, username: &str) -> Result<User>;
  async fn change_password(&self, username: &str, password: &str) -> Result<()>;
  /// Activate or deactivate an account.
  async fn change_user_status(&self, username: &str, active: bool) -> Result<()>;
  /// Grant or revoke access to a database. No-op if already in the
  /// requested state.
  async fn change_user_db_access(&self, username: &str, db: &str, grant: bool) -> Result<()>;
  /// Verify credentials; fails for unknown, deactivated, or mismatched
  /// users without distinguishing which in the error.
  async fn authenticate(&self, username: &str, password: &str) -> Result<User>;
  /// Drop every user record.
  async fn clear_all(&self) -> Result<()>;
}
