mod disk;

pub use disk::DiskByteStore;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Result;

/// Opaque blob storage addressed by `(database, id)`.
///
/// Blobs stream end-to-end; implementations must not buffer whole blobs
/// in memory, and a write must only become visible once the source
/// stream has been fully consumed.
#[async_trait]
pub trait ByteStore: Send + Sync {
  /// Store a new blob, returning its id and size in bytes.
  async fn add(
    &self,
    db: &str,
    reader: &mut (dyn AsyncRead + Send + Unpin),
  ) -> Result<(String, u64)>;

  /// Stream a blob into `writer`, returning the number of bytes written.
  async fn read(
    &self,
    db: &str,
    id: &str,
    writer: &mut (dyn AsyncWrite + Send + Unpin),
  ) -> Result<u64>;

  /// Replace an existing blob's contents, returning the new size.
  async fn update(
    &self,
    db: &str,
    id: &str,
    reader: &mut (dyn AsyncRead + Send + Unpin),
  ) -> Result<u64>;

  async fn delete(&self, db: &str, id: &str) -> Result<()>;

  /// Remove every blob belonging to `db`.
  async fn drop_database(&self, db: &str) -> Result<()>;

  /// Remove every blob in the store.
  async fn clear_all(&self) -> Result<()>;
}
