use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::EngineError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
  Ok,
  Error,
}

/// The single reply shape for every command and script. Always
/// JSON-serializable; errors never carry stack traces, only the
/// human-readable message from the taxonomy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Response {
  pub status: ResponseStatus,
  #[serde(default)]
  pub data: Value,
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub msg: String,
}

impl Response {
  pub fn ok(data: Value) -> Self {
    Self {
      status: ResponseStatus::Ok,
      data,
      msg: String::new(),
    }
  }

  pub fn error(msg: impl Into<String>) -> Self {
    Self {
      status: ResponseStatus::Error,
      data: Value::Null,
      msg: msg.into(),
    }
  }

  pub fn is_ok(&self) -> bool {
    self.status == ResponseStatus::Ok
  }
}

impl From<EngineError> for Response {
  fn from(err: EngineError) -> Self {
    Self::error(err.to_string())
  }
}

impl From<Result<Value, EngineError>> for Response {
  fn from(res: Result<Value, EngineError>) -> Self {
    match res {
      Ok(v) => Self::ok(v),
      Err(e) => e.into(),
    }
  }
}
