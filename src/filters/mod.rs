//! Post-processing filters. A filter is a pure transform over a command
//! result, composed with `| name arg arg` in BQL. The registry is
//! populated at engine construction and frozen afterwards.

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::error::{EngineError, Result};

pub type FilterFn = fn(&Value, &[Value]) -> Result<Value>;

pub struct FilterRegistry {
  filters: HashMap<&'static str, FilterFn>,
}

impl FilterRegistry {
  /// Registry with the builtin shaping filters.
  pub fn builtin() -> Self {
    let mut filters: HashMap<&'static str, FilterFn> = HashMap::new();
    filters.insert("pick", pick);
    filters.insert("omit", omit);
    filters.insert("length", length);
    filters.insert("slice", slice);
    Self { filters }
  }

  pub fn get(&self, name: &str) -> Result<FilterFn> {
    self
      .filters
      .get(name)
      .copied()
      .ok_or_else(|| EngineError::InvalidArgument(format!("unknown filter '{name}'")))
  }

  pub fn names(&self) -> Vec<&'static str> {
    let mut names: Vec<&'static str> = self.filters.keys().copied().collect();
    names.sort_unstable();
    names
  }
}

fn string_args(args: &[Value], filter: &str) -> Result<Vec<String>> {
  args
    .iter()
    .map(|a| {
      a.as_str()
        .map(str::to_string)
        .ok_or_else(|| EngineError::InvalidArgument(format!("'{filter}' takes string arguments")))
    })
    .collect()
}

fn shape_object(obj: &Map<String, Value>, keys: &[String], keep: bool) -> Value {
  let out: Map<String, Value> = obj
    .iter()
    .filter(|(k, _)| keys.contains(k) == keep)
    .map(|(k, v)| (k.clone(), v.clone()))
    .collect();
  Value::Object(out)
}

/// Keep only the named keys of an object, or of every object in a list.
fn pick(input: &Value, args: &[Value]) -> Result<Value> {
  let keys = string_args(args, "pick")?;
  match input {
    Value::Object(obj) => Ok(shape_object(obj, &keys, true)),
    Value::Array(items) => Ok(Value::Array(
      items
        .iter()
        .map(|item| match item {
          Value::Object(obj) => shape_object(obj, &keys, true),
          other => other.clone(),
        })
        .collect(),
    )),
    _ => Err(EngineError::InvalidArgument(
      "'pick' expects an object or a list of objects".into(),
    )),
  }
}

/// Drop the named keys of an object, or of every object in a list.
fn omit(input: &Value, args: &[Value]) -> Result<Value> {
  let keys = string_args(args, "omit")?;
  match input {
    Value::Object(obj) => Ok(shape_object(obj, &keys, false)),
    Value::Array(items) => Ok(Value::Array(
      items
        .iter()
        .map(|item| match item {
          Value::Object(obj) => shape_object(obj, &keys, false),
          other => other.clone(),
        })
        .collect(),
    )),
    _ => Err(EngineError::InvalidArgument(
      "'omit' expects an object or a list of objects".into(),
    )),
  }
}

/// Element count of a list, key count of an object.
fn length(input: &Value, args: &[Value]) -> Result<Value> {
  if !args.is_empty() {
    return Err(EngineError::InvalidArgument(
      "'length' takes no arguments".into(),
    ));
  }
  match input {
    Value::Array(items) => Ok(Value::from(items.len() as u64)),
    Value::Object(obj) => Ok(Value::from(obj.len() as u64)),
    _ => Err(EngineError::InvalidArgument(
      "'length' expects an object or a list".into(),
    )),
  }
}

/// `slice offset [count]` over a list.
fn slice(input: &Value, args: &[Value]) -> Result<Value> {
  let items = input.as_array().ok_or_else(|| {
    EngineError::InvalidArgument("'slice' expects a list".into())
  })?;
  let offset = args
    .first()
    .and_then(Value::as_u64)
    .ok_or_else(|| EngineError::InvalidArgument("'slice' needs a start offset".into()))?
    as usize;
  let count = match args.get(1) {
    Some(v) => Some(v.as_u64().ok_or_else(|| {
      EngineError::InvalidArgument("'slice' count must be a non-negative integer".into())
    })? as usize),
    None => None,
  };
  let tail = items.iter().skip(offset);
  let out: Vec<Value> = match count {
    Some(n) => tail.take(n).cloned().collect(),
    None => tail.cloned().collect(),
  };
  Ok(Value::Array(out))
}
