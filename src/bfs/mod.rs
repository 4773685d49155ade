pub mod eval;
mod memory;
pub mod path;

pub use memory::MemoryFileSystem;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::io::AsyncRead;

use crate::error::Result;
use crate::types::{SearchQuery, SetQuery, UnsetQuery};

/// Blob descriptor recorded on a file node once bytes are attached.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attachment {
  pub blob_id: String,
  pub size: u64,
  pub mime: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
  Dir,
  File,
}

/// Metadata returned by `info`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeInfo {
  pub name: String,
  pub path: String,
  pub kind: NodeKind,
  pub created_at: DateTime<Utc>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub public: Option<bool>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub attachment: Option<Attachment>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub child_count: Option<usize>,
}

/// `listdir` result: child names split by kind.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DirListing {
  pub dirs: Vec<String>,
  pub files: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CounterAction {
  Incr,
  Decr,
  Reset,
}

/// The content store: a hierarchical JSON document tree and a counter
/// namespace per database, with opaque byte attachments held indirectly
/// in a [`crate::bst::ByteStore`].
///
/// Invariants implementations must uphold:
/// - the root directory `/` exists from database creation onward;
/// - sibling names are unique within a parent;
/// - every `attachment.blob_id` refers to a live blob, and deleting the
///   file (or its bytes) deletes the blob;
/// - counter mutations are linearizable per counter.
#[async_trait]
pub trait FileSystem: Send + Sync {
  async fn clear_all(&self) -> Result<()>;
  async fn create_database(&self, db: &str) -> Result<()>;
  async fn drop_database(&self, db: &str) -> Result<()>;
  /// Database names matching `pattern` (regex; empty matches all).
  async fn list_databases(&self, pattern: &str) -> Result<Vec<String>>;

  async fn new_dir(&self, path: &str, db: &str) -> Result<()>;
  async fn new_file(&self, path: &str, db: &str, content: Map<String, Value>) -> Result<()>;
  /// Recursive delete; refuses the root.
  async fn delete(&self, path: &str, db: &str) -> Result<()>;
  async fn rename(&self, path: &str, new_name: &str, db: &str) -> Result<()>;
  /// Move `src` under `dst_dir`, keeping its name.
  async fn move_node(&self, src: &str, dst_dir: &str, db: &str) -> Result<()>;
  /// Deep copy; attachments are duplicated into the byte store.
  async fn copy(&self, src: &str, dst: &str, db: &str) -> Result<()>;
  async fn info(&self, path: &str, db: &str) -> Result<NodeInfo>;
  async fn list_dir(&self, path: &str, pattern: &str, db: &str) -> Result<DirListing>;

  /// Full content when `fields` is empty, else a projection.
  async fn read_json(&self, path: &str, db: &str, fields: &[String]) -> Result<Value>;
  /// Top-level field merge: payload keys replace stored top-level keys,
  /// other stored keys are kept.
  async fn update_json(&self, path: &str, db: &str, content: Map<String, Value>) -> Result<()>;
  async fn set_public(&self, path: &str, db: &str, public: bool) -> Result<()>;
  async fn is_public(&self, path: &str, db: &str) -> Result<bool>;

  /// Attach bytes to a file node, replacing (and deleting) any previous
  /// blob. Returns the new descriptor.
  async fn write_bytes(
    &self,
    path: &str,
    db: &str,
    reader: &mut (dyn AsyncRead + Send + Unpin),
    mime: &str,
  ) -> Result<Attachment>;
  /// Blob id for out-of-band streaming by the caller.
  async fn read_bytes(&self, path: &str, db: &str) -> Result<String>;
  /// Detach and delete the blob; the file node remains.
  async fn delete_bytes(&self, path: &str, db: &str) -> Result<()>;

  /// Apply `action` and return the counter's new value.
  async fn set_counter(&self, name: &str, action: CounterAction, value: i64, db: &str)
    -> Result<i64>;
  async fn list_counters(&self, pattern: &str, db: &str) -> Result<Map<String, Value>>;

  /// `select` evaluation: rows, distinct values, or a count.
  async fn search(&self, db: &str, query: &SearchQuery) -> Result<Value>;
  /// `set` evaluation; returns the number of matched files.
  async fn set_values(&self, db: &str, query: &SetQuery) -> Result<u64>;
  /// `unset` evaluation; returns the number of matched files.
  async fn unset_values(&self, db: &str, query: &UnsetQuery) -> Result<u64>;
}
