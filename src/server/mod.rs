mod config;
mod daemon;
mod http;

pub use config::{AdminSection, Config, TimeoutSection};
pub use daemon::Daemon;
pub use http::build_router;

use thiserror::Error;

/// Startup failures, each with its own process exit code.
#[derive(Debug, Error)]
pub enum ServerError {
  #[error("configuration error: {0}")]
  Config(String),
  #[error("plugin initialization failed: {0}")]
  Init(String),
  #[error("bind failed: {0}")]
  Bind(String),
}

impl ServerError {
  pub fn exit_code(&self) -> i32 {
    match self {
      Self::Config(_) => 1,
      Self::Init(_) => 2,
      Self::Bind(_) => 3,
    }
  }
}
