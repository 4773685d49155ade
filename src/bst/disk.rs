use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncWrite};
use uuid::Uuid;

use super::ByteStore;
use crate::error::{EngineError, NotFoundKind, Result};

/// Filesystem-backed blob store: one file per blob under
/// `<root>/<db>/<id>`. Writes land in a temp file and are renamed into
/// place only after the source stream is fully consumed, so readers
/// never observe a partial blob.
pub struct DiskByteStore {
  root: PathBuf,
}

impl DiskByteStore {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  pub async fn init(&self) -> Result<()> {
    fs::create_dir_all(&self.root).await?;
    Ok(())
  }

  fn db_dir(&self, db: &str) -> PathBuf {
    self.root.join(db)
  }

  fn blob_path(&self, db: &str, id: &str) -> PathBuf {
    self.db_dir(db).join(id)
  }

  async fn write_blob(
    &self,
    dest: &Path,
    reader: &mut (dyn AsyncRead + Send + Unpin),
  ) -> Result<u64> {
    let tmp = dest.with_extension("part");
    let mut file = fs::File::create(&tmp).await?;
    let size = match tokio::io::copy(reader, &mut file).await {
      Ok(n) => n,
      Err(e) => {
        drop(file);
        let _ = fs::remove_file(&tmp).await;
        return Err(e.into());
      }
    };
    file.sync_all().await?;
    drop(file);
    fs::rename(&tmp, dest).await?;
    Ok(size)
  }
}

#[async_trait]
impl ByteStore for DiskByteStore {
  async fn add(
    &self,
    db: &str,
    reader: &mut (dyn AsyncRead + Send + Unpin),
  ) -> Result<(String, u64)> {
    fs::create_dir_all(self.db_dir(db)).await?;
    let id = Uuid::new_v4().to_string();
    let size = self.write_blob(&self.blob_path(db, &id), reader).await?;
    Ok((id, size))
  }

  async fn read(
    &self,
    db: &str,
    id: &str,
    writer: &mut (dyn AsyncWrite + Send + Unpin),
  ) -> Result<u64> {
    let path = self.blob_path(db, id);
    let mut file = match fs::File::open(&path).await {
      Ok(f) => f,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
        return Err(EngineError::NotFound {
          kind: NotFoundKind::Blob,
          name: id.to_string(),
        })
      }
      Err(e) => return Err(e.into()),
    };
    let n = tokio::io::copy(&mut file, writer).await?;
    Ok(n)
  }

  async fn update(
    &self,
    db: &str,
    id: &str,
    reader: &mut (dyn AsyncRead + Send + Unpin),
  ) -> Result<u64> {
    let path = self.blob_path(db, id);
    if !fs::try_exists(&path).await? {
      return Err(EngineError::NotFound {
        kind: NotFoundKind::Blob,
        name: id.to_string(),
      });
    }
    self.write_blob(&path, reader).await
  }

  async fn delete(&self, db: &str, id: &str) -> Result<()> {
    match fs::remove_file(self.blob_path(db, id)).await {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(EngineError::NotFound {
        kind: NotFoundKind::Blob,
        name: id.to_string(),
      }),
      Err(e) => Err(e.into()),
    }
  }

  async fn drop_database(&self, db: &str) -> Result<()> {
    match fs::remove_dir_all(self.db_dir(db)).await {
      Ok(()) => Ok(()),
      // A database with no blobs has no directory yet.
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
      Err(e) => Err(e.into()),
    }
  }

  async fn clear_all(&self) -> Result<()> {
    let mut dirs = match fs::read_dir(&self.root).await {
      Ok(d) => d,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
      Err(e) => return Err(e.into()),
    };
    while let Some(entry) = dirs.next_entry().await? {
      if entry.file_type().await?.is_dir() {
        fs::remove_dir_all(entry.path()).await?;
      }
    }
    Ok(())
  }
}
