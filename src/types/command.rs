use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::EngineError;

/// A single parsed BQL operation.
///
/// Arguments are carried as a JSON map so that a command can be rendered
/// back to the client verbatim (`sign` / dry-run printing). Handlers read
/// them through the typed accessors below; the dispatcher has already
/// validated presence and kind, so a mismatch here is reported as
/// `invalid_argument` rather than a panic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Command {
  pub name: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub database: Option<String>,
  #[serde(default)]
  pub sign: bool,
  #[serde(default)]
  pub args: Map<String, Value>,
  #[serde(default)]
  pub options: Map<String, Value>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub filters: Vec<FilterSpec>,
}

/// One `| name arg arg` stage appended to a command.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FilterSpec {
  pub name: String,
  #[serde(default)]
  pub args: Vec<Value>,
}

impl Command {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      database: None,
      sign: false,
      args: Map::new(),
      options: Map::new(),
      filters: Vec::new(),
    }
  }

  /// Database this command is scoped to, or `invalid_argument` for a
  /// command that should always carry one.
  pub fn database(&self) -> Result<&str, EngineError> {
    self
      .database
      .as_deref()
      .ok_or_else(|| EngineError::InvalidArgument(format!("'{}' requires a database scope", self.name)))
  }

  pub fn arg(&self, key: &str) -> Result<&Value, EngineError> {
    self
      .args
      .get(key)
      .ok_or_else(|| EngineError::InvalidArgument(format!("missing argument '{key}'")))
  }

  pub fn str_arg(&self, key: &str) -> Result<&str, EngineError> {
    self
      .arg(key)?
      .as_str()
      .ok_or_else(|| EngineError::InvalidArgument(format!("argument '{key}' must be a string")))
  }

  pub fn bool_arg(&self, key: &str) -> Result<bool, EngineError> {
    self
      .arg(key)?
      .as_bool()
      .ok_or_else(|| EngineError::InvalidArgument(format!("argument '{key}' must be a boolean")))
  }

  pub fn int_arg(&self, key: &str) -> Result<i64, EngineError> {
    self
      .arg(key)?
      .as_i64()
      .ok_or_else(|| EngineError::InvalidArgument(format!("argument '{key}' must be an integer")))
  }

  pub fn object_arg(&self, key: &str) -> Result<&Map<String, Value>, EngineError> {
    self
      .arg(key)?
      .as_object()
      .ok_or_else(|| EngineError::InvalidArgument(format!("argument '{key}' must be an object")))
  }

  /// A list-of-strings argument, e.g. field projections or search roots.
  pub fn str_list_arg(&self, key: &str) -> Result<Vec<String>, EngineError> {
    let list = self
      .arg(key)?
      .as_array()
      .ok_or_else(|| EngineError::InvalidArgument(format!("argument '{key}' must be a list")))?;
    list
      .iter()
      .map(|v| {
        v.as_str().map(str::to_string).ok_or_else(|| {
          EngineError::InvalidArgument(format!("argument '{key}' must be a list of strings"))
        })
      })
      .collect()
  }

  pub fn opt_str(&self, key: &str) -> Option<&str> {
    self.options.get(key).and_then(Value::as_str)
  }

  pub fn opt_int(&self, key: &str) -> Option<i64> {
    self.options.get(key).and_then(Value::as_i64)
  }

  pub fn opt_bool(&self, key: &str) -> Option<bool> {
    self.options.get(key).and_then(Value::as_bool)
  }
}
