use std::collections::HashMap;

use regex::Regex;
use serde_json::{Map, Value};

use crate::error::{EngineError, Result};
use crate::types::{BinOp, Expr};

/// Interpreter for where-expressions over a file's JSON content.
///
/// One evaluator lives for the duration of a query so regex patterns are
/// compiled once regardless of how many candidate files are scanned.
#[derive(Default)]
pub struct Evaluator {
  regexes: HashMap<String, Regex>,
}

impl Evaluator {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn matches(&mut self, expr: &Expr, content: &Map<String, Value>) -> Result<bool> {
    match expr {
      Expr::Binary { op, lhs, rhs } => self.eval_binary(*op, lhs, rhs, content),
      other => Err(EngineError::InvalidArgument(format!(
        "expression {other:?} is not a predicate"
      ))),
    }
  }

  fn eval_binary(
    &mut self,
    op: BinOp,
    lhs: &Expr,
    rhs: &Expr,
    content: &Map<String, Value>,
  ) -> Result<bool> {
    match op {
      BinOp::And => Ok(self.matches(lhs, content)? && self.matches(rhs, content)?),
      BinOp::Or => Ok(self.matches(lhs, content)? || self.matches(rhs, content)?),
      BinOp::In => self.eval_in(lhs, rhs, content),
      _ => self.eval_compare(op, lhs, rhs, content),
    }
  }

  fn eval_in(&mut self, lhs: &Expr, rhs: &Expr, content: &Map<String, Value>) -> Result<bool> {
    let candidates = match rhs {
      Expr::Literal {
        value: Value::Array(items),
      } => items,
      _ => {
        return Err(EngineError::InvalidArgument(
          "'in' requires a list on the right-hand side".into(),
        ))
      }
    };
    let field = match lhs {
      Expr::Field { name } => name,
      _ => {
        return Err(EngineError::InvalidArgument(
          "'in' requires a field on the left-hand side".into(),
        ))
      }
    };
    // Missing field fails the predicate.
    match get_field(content, field) {
      Some(v) => Ok(candidates.iter().any(|c| values_equal(c, v))),
      None => Ok(false),
    }
  }

  fn eval_compare(
    &mut self,
    op: BinOp,
    lhs: &Expr,
    rhs: &Expr,
    content: &Map<String, Value>,
  ) -> Result<bool> {
    match lhs {
      Expr::Exists { field } => {
        let expected = match rhs {
          Expr::Literal {
            value: Value::Bool(b),
          } => *b,
          _ => {
            return Err(EngineError::InvalidArgument(
              "exists() must be compared to a boolean".into(),
            ))
          }
        };
        let present = get_field(content, field).is_some();
        match op {
          BinOp::Eq => Ok(present == expected),
          BinOp::Ne => Ok(present != expected),
          _ => Err(EngineError::InvalidArgument(format!(
            "exists() does not support '{}'",
            op.symbol()
          ))),
        }
      }
      Expr::Regex { field, flags } => {
        let pattern = match rhs {
          Expr::Literal {
            value: Value::String(p),
          } => p,
          _ => {
            return Err(EngineError::InvalidArgument(
              "regex() must be compared to a pattern string".into(),
            ))
          }
        };
        let matched = match get_field(content, field) {
          Some(Value::String(s)) => {
            let rgx = self.compiled(pattern, flags)?;
            rgx.is_match(s)
          }
          // Missing or non-string field fails the predicate.
          _ => return Ok(false),
        };
        match op {
          BinOp::Eq => Ok(matched),
          BinOp::Ne => Ok(!matched),
          _ => Err(EngineError::InvalidArgument(format!(
            "regex() does not support '{}'",
            op.symbol()
          ))),
        }
      }
      Expr::Field { name } => {
        let rhs_value = match rhs {
          Expr::Literal { value } => value,
          _ => {
            return Err(EngineError::InvalidArgument(
              "comparison right-hand side must be a literal".into(),
            ))
          }
        };
        match get_field(content, name) {
          Some(v) => Ok(compare_values(op, v, rhs_value)),
          None => Ok(false),
        }
      }
      _ => Err(EngineError::InvalidArgument(
        "comparison left-hand side must be a field, regex() or exists()".into(),
      )),
    }
  }

  fn compiled(&mut self, pattern: &str, flags: &str) -> Result<&Regex> {
    for f in flags.chars() {
      if !matches!(f, 'i' | 'm' | 's' | 'x') {
        return Err(EngineError::InvalidArgument(format!(
          "unsupported regex flag '{f}'"
        )));
      }
    }
    let full = if flags.is_empty() {
      pattern.to_string()
    } else {
      format!("(?{flags}){pattern}")
    };
    if !self.regexes.contains_key(&full) {
      let rgx = Regex::new(&full)
        .map_err(|e| EngineError::InvalidArgument(format!("bad regex pattern: {e}")))?;
      self.regexes.insert(full.clone(), rgx);
    }
    Ok(&self.regexes[&full])
  }
}

/// Equality across JSON values, with numbers compared numerically so
/// `34 == 34.0` holds.
fn values_equal(a: &Value, b: &Value) -> bool {
  match (a.as_f64(), b.as_f64()) {
    (Some(x), Some(y)) => x == y,
    _ => a == b,
  }
}

fn compare_values(op: BinOp, lhs: &Value, rhs: &Value) -> bool {
  match op {
    BinOp::Eq => values_equal(lhs, rhs),
    BinOp::Ne => !values_equal(lhs, rhs),
    BinOp::Lt | BinOp::Lte | BinOp::Gt | BinOp::Gte => {
      let ord = match (lhs, rhs) {
        (Value::String(a), Value::String(b)) => a.partial_cmp(b),
        _ => match (lhs.as_f64(), rhs.as_f64()) {
          (Some(a), Some(b)) => a.partial_cmp(&b),
          // Mixed or non-orderable types fail the predicate.
          _ => None,
        },
      };
      match ord {
        Some(ord) => match op {
          BinOp::Lt => ord.is_lt(),
          BinOp::Lte => ord.is_le(),
          BinOp::Gt => ord.is_gt(),
          BinOp::Gte => ord.is_ge(),
          _ => unreachable!(),
        },
        None => false,
      }
    }
    _ => false,
  }
}

/// Resolve a dotted field path inside a JSON object.
pub fn get_field<'a>(content: &'a Map<String, Value>, field: &str) -> Option<&'a Value> {
  let mut parts = field.split('.');
  let mut current = content.get(parts.next()?)?;
  for part in parts {
    current = current.as_object()?.get(part)?;
  }
  Some(current)
}

/// Assign a dotted field path, creating intermediate objects as needed.
/// A non-object intermediate is replaced by an object.
pub fn set_field(content: &mut Map<String, Value>, field: &str, value: Value) {
  let mut parts = field.split('.').peekable();
  let mut current = content;
  while let Some(part) = parts.next() {
    if parts.peek().is_none() {
      current.insert(part.to_string(), value);
      return;
    }
    let slot = current
      .entry(part.to_string())
      .or_insert_with(|| Value::Object(Map::new()));
    if !slot.is_object() {
      *slot = Value::Object(Map::new());
    }
    current = slot.as_object_mut().unwrap();
  }
}

/// Remove a dotted field path. Returns whether anything was removed.
pub fn unset_field(content: &mut Map<String, Value>, field: &str) -> bool {
  let mut parts: Vec<&str> = field.split('.').collect();
  let last = match parts.pop() {
    Some(l) => l,
    None => return false,
  };
  let mut current = content;
  for part in parts {
    current = match current.get_mut(part).and_then(Value::as_object_mut) {
      Some(obj) => obj,
      None => return false,
    };
  }
  current.remove(last).is_some()
}

/// Project the listed dotted fields out of `content`, preserving
/// nesting. An empty field list yields the whole content.
pub fn project(content: &Map<String, Value>, fields: &[String]) -> Map<String, Value> {
  if fields.is_empty() {
    return content.clone();
  }
  let mut out = Map::new();
  for field in fields {
    if let Some(v) = get_field(content, field) {
      set_field(&mut out, field, v.clone());
    }
  }
  out
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn content() -> Map<String, Value> {
    json!({
      "name": "john",
      "age": 34,
      "country": "ghana",
      "address": {"city": "accra", "zip": "0233"}
    })
    .as_object()
    .unwrap()
    .clone()
  }

  fn field(name: &str) -> Expr {
    Expr::Field { name: name.into() }
  }

  fn lit(value: Value) -> Expr {
    Expr::Literal { value }
  }

  fn binary(op: BinOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Binary {
      op,
      lhs: Box::new(lhs),
      rhs: Box::new(rhs),
    }
  }

  #[test]
  fn equality_and_ordering() {
    let mut ev = Evaluator::new();
    let c = content();
    assert!(ev
      .matches(&binary(BinOp::Eq, field("name"), lit(json!("john"))), &c)
      .unwrap());
    assert!(ev
      .matches(&binary(BinOp::Eq, field("age"), lit(json!(34.0))), &c)
      .unwrap());
    assert!(ev
      .matches(&binary(BinOp::Gt, field("age"), lit(json!(21))), &c)
      .unwrap());
    assert!(!ev
      .matches(&binary(BinOp::Lt, field("age"), lit(json!(21))), &c)
      .unwrap());
  }

  #[test]
  fn missing_field_fails_predicate() {
    let mut ev = Evaluator::new();
    let c = content();
    assert!(!ev
      .matches(&binary(BinOp::Eq, field("missing"), lit(json!(1))), &c)
      .unwrap());
    assert!(!ev
      .matches(&binary(BinOp::Ne, field("missing"), lit(json!(1))), &c)
      .unwrap());
  }

  #[test]
  fn exists_checks_presence() {
    let mut ev = Evaluator::new();
    let c = content();
    let yes = binary(
      BinOp::Eq,
      Expr::Exists {
        field: "country".into(),
      },
      lit(json!(true)),
    );
    let no = binary(
      BinOp::Eq,
      Expr::Exists {
        field: "missing".into(),
      },
      lit(json!(false)),
    );
    assert!(ev.matches(&yes, &c).unwrap());
    assert!(ev.matches(&no, &c).unwrap());
  }

  #[test]
  fn regex_with_flags() {
    let mut ev = Evaluator::new();
    let c = content();
    let expr = binary(
      BinOp::Eq,
      Expr::Regex {
        field: "name".into(),
        flags: "i".into(),
      },
      lit(json!("^J\\w*N$")),
    );
    assert!(ev.matches(&expr, &c).unwrap());
  }

  #[test]
  fn in_operator_over_list() {
    let mut ev = Evaluator::new();
    let c = content();
    let expr = binary(BinOp::In, field("country"), lit(json!(["ghana", "togo"])));
    assert!(ev.matches(&expr, &c).unwrap());
    let expr = binary(BinOp::In, field("country"), lit(json!(["uk"])));
    assert!(!ev.matches(&expr, &c).unwrap());
  }

  #[test]
  fn boolean_combinators() {
    let mut ev = Evaluator::new();
    let c = content();
    let both = binary(
      BinOp::And,
      binary(BinOp::Eq, field("country"), lit(json!("ghana"))),
      binary(BinOp::Gte, field("age"), lit(json!(30))),
    );
    assert!(ev.matches(&both, &c).unwrap());
    let either = binary(
      BinOp::Or,
      binary(BinOp::Eq, field("country"), lit(json!("uk"))),
      binary(BinOp::Eq, field("name"), lit(json!("john"))),
    );
    assert!(ev.matches(&either, &c).unwrap());
  }

  #[test]
  fn dotted_field_access() {
    let c = content();
    assert_eq!(get_field(&c, "address.city"), Some(&json!("accra")));
    assert_eq!(get_field(&c, "address.missing"), None);
  }

  #[test]
  fn set_and_unset_dotted_fields() {
    let mut c = content();
    set_field(&mut c, "address.country", json!("ghana"));
    assert_eq!(get_field(&c, "address.country"), Some(&json!("ghana")));

    assert!(unset_field(&mut c, "address.zip"));
    assert!(!unset_field(&mut c, "address.zip"));
    assert_eq!(get_field(&c, "address.zip"), None);
  }

  #[test]
  fn projection_preserves_nesting() {
    let c = content();
    let out = project(&c, &["name".into(), "address.city".into()]);
    assert_eq!(
      Value::Object(out),
      json!({"name": "john", "address": {"city": "accra"}})
    );
  }
}
