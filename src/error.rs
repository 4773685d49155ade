use thiserror::Error;

/// Error taxonomy shared by every subsystem. Backend failures are mapped
/// into these variants at the subsystem boundary so handlers and the
/// engine only ever see taxonomy errors.
#[derive(Debug, Error)]
pub enum EngineError {
  #[error("parse error at line {line}, column {column}: {message}")]
  Parse {
    line: usize,
    column: usize,
    message: String,
  },

  #[error("unknown command '{0}'")]
  UnknownCommand(String),

  #[error("unauthorized: {0}")]
  Unauthorized(String),

  #[error("{kind} '{name}' not found")]
  NotFound { kind: NotFoundKind, name: String },

  #[error("{0} already exists")]
  AlreadyExists(String),

  #[error("invalid argument: {0}")]
  InvalidArgument(String),

  #[error("backend unavailable: {0}")]
  BackendUnavailable(String),

  #[error("conflict: {0}")]
  Conflict(String),

  #[error("operation timed out")]
  Timeout,

  #[error("internal error: {0}")]
  Internal(String),
}

/// What kind of entity a `NotFound` refers to; included in the message so
/// responses can name the offending path/field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotFoundKind {
  Path,
  Database,
  User,
  Counter,
  Blob,
  Token,
  Ticket,
}

impl std::fmt::Display for NotFoundKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let s = match self {
      Self::Path => "path",
      Self::Database => "database",
      Self::User => "user",
      Self::Counter => "counter",
      Self::Blob => "blob",
      Self::Token => "token",
      Self::Ticket => "ticket",
    };
    f.write_str(s)
  }
}

impl EngineError {
  pub fn path_not_found(path: impl Into<String>) -> Self {
    Self::NotFound {
      kind: NotFoundKind::Path,
      name: path.into(),
    }
  }

  pub fn database_not_found(db: impl Into<String>) -> Self {
    Self::NotFound {
      kind: NotFoundKind::Database,
      name: db.into(),
    }
  }

  pub fn user_not_found(user: impl Into<String>) -> Self {
    Self::NotFound {
      kind: NotFoundKind::User,
      name: user.into(),
    }
  }

  /// Stable machine-readable tag for the error category, used in logs.
  pub fn kind(&self) -> &'static str {
    match self {
      Self::Parse { .. } => "parse",
      Self::UnknownCommand(_) => "unknown_command",
      Self::Unauthorized(_) => "unauthorized",
      Self::NotFound { .. } => "not_found",
      Self::AlreadyExists(_) => "already_exists",
      Self::InvalidArgument(_) => "invalid_argument",
      Self::BackendUnavailable(_) => "backend_unavailable",
      Self::Conflict(_) => "conflict",
      Self::Timeout => "timeout",
      Self::Internal(_) => "internal",
    }
  }
}

impl From<std::io::Error> for EngineError {
  fn from(e: std::io::Error) -> Self {
    Self::BackendUnavailable(e.to_string())
  }
}

impl From<serde_json::Error> for EngineError {
  fn from(e: serde_json::Error) -> Self {
    Self::Internal(e.to_string())
  }
}

pub type Result<T> = std::result::Result<T, EngineError>;
