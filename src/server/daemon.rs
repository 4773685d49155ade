use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::broadcast;

use super::{build_router, Config, ServerError};
use crate::auth::{Authentication, MemoryAuthentication};
use crate::bfs::{FileSystem, MemoryFileSystem};
use crate::bst::{ByteStore, DiskByteStore};
use crate::engine::{Engine, EngineSettings};
use crate::state::{MemoryStateStore, StateStore};

/// Assembles the configured backends into an engine and serves the HTTP
/// surface. Backend plugins form a closed set chosen here; there is no
/// runtime registration.
pub struct Daemon {
  config: Config,
  engine: Arc<Engine>,
  shutdown_tx: broadcast::Sender<()>,
}

impl Daemon {
  pub async fn new(config: Config) -> Result<Self, ServerError> {
    let bytestore: Arc<dyn ByteStore> = match config.bytestore.plugin.as_str() {
      "disk" => {
        let store = DiskByteStore::new(&config.bytestore.rootdir);
        store
          .init()
          .await
          .map_err(|e| ServerError::Init(format!("bytestore: {e}")))?;
        Arc::new(store)
      }
      other => {
        return Err(ServerError::Config(format!(
          "unknown bytestore plugin '{other}'"
        )))
      }
    };

    let filesystem: Arc<dyn FileSystem> = match config.filesystem.plugin.as_str() {
      "memory" => Arc::new(MemoryFileSystem::new(bytestore.clone())),
      other => {
        return Err(ServerError::Config(format!(
          "unknown filesystem plugin '{other}'"
        )))
      }
    };

    let statestore: Arc<dyn StateStore> = match config.statestore.plugin.as_str() {
      "memory" => Arc::new(MemoryStateStore::new()),
      other => {
        return Err(ServerError::Config(format!(
          "unknown statestore plugin '{other}'"
        )))
      }
    };

    let authentication: Arc<dyn Authentication> = match config.authentication.plugin.as_str() {
      "memory" => Arc::new(MemoryAuthentication::new()),
      other => {
        return Err(ServerError::Config(format!(
          "unknown authentication plugin '{other}'"
        )))
      }
    };

    if config.datafilter.plugin != "core" {
      return Err(ServerError::Config(format!(
        "unknown datafilter plugin '{}'",
        config.datafilter.plugin
      )));
    }
    if config.parser.plugin != "base" {
      return Err(ServerError::Config(format!(
        "unknown parser plugin '{}'",
        config.parser.plugin
      )));
    }

    let settings = EngineSettings {
      workers: config.workers,
      request_timeout: Duration::from_secs(config.timeout.request),
      auth_token_ttl: config.timeout.authtoken,
      upload_ticket_ttl: config.timeout.uploadticket,
    };
    let engine = Engine::new(filesystem, bytestore, authentication, statestore, settings);

    if let Some(admin) = &config.admin {
      engine
        .ensure_root_user(&admin.username, &admin.password)
        .await
        .map_err(|e| ServerError::Init(format!("bootstrap user: {e}")))?;
    }

    let (shutdown_tx, _) = broadcast::channel(1);
    Ok(Self {
      config,
      engine,
      shutdown_tx,
    })
  }

  pub fn engine(&self) -> Arc<Engine> {
    self.engine.clone()
  }

  /// Trigger graceful shutdown of the HTTP server.
  pub fn shutdown(&self) {
    tracing::info!("Initiating graceful shutdown...");
    let _ = self.shutdown_tx.send(());
  }

  pub async fn run(&self) -> Result<(), ServerError> {
    let addr = self.config.bind_address();
    let listener = TcpListener::bind(&addr)
      .await
      .map_err(|e| ServerError::Bind(format!("{addr}: {e}")))?;
    tracing::info!("Bytengine listening on {}", addr);

    let app = build_router(self.engine.clone());
    let mut shutdown_rx = self.shutdown_tx.subscribe();
    axum::serve(listener, app)
      .with_graceful_shutdown(async move {
        let _ = shutdown_rx.recv().await;
      })
      .await
      .map_err(|e| ServerError::Init(format!("server error: {e}")))
  }
}
