use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Comparison and boolean operators accepted in a `where` clause.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BinOp {
  Eq,
  Ne,
  Lt,
  Lte,
  Gt,
  Gte,
  And,
  Or,
  In,
}

impl BinOp {
  pub fn symbol(&self) -> &'static str {
    match self {
      Self::Eq => "==",
      Self::Ne => "!=",
      Self::Lt => "<",
      Self::Lte => "<=",
      Self::Gt => ">",
      Self::Gte => ">=",
      Self::And => "&&",
      Self::Or => "||",
      Self::In => "in",
    }
  }
}

/// Where-expression AST. Evaluated per candidate file against its JSON
/// content; field names are dotted paths into the document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "node", rename_all = "lowercase")]
pub enum Expr {
  Literal { value: Value },
  Field { name: String },
  /// `regex(field, flags)`, compared against a pattern literal.
  Regex { field: String, flags: String },
  /// `exists(field)`, compared against a boolean literal.
  Exists { field: String },
  Binary {
    op: BinOp,
    lhs: Box<Expr>,
    rhs: Box<Expr>,
  },
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
  #[default]
  Asc,
  Desc,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SortSpec {
  pub field: String,
  #[serde(default)]
  pub direction: SortDirection,
}

/// Lowered form of `select F.. in P.. where E [modifiers]`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchQuery {
  pub fields: Vec<String>,
  pub dirs: Vec<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub where_expr: Option<Expr>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub distinct: Option<String>,
  #[serde(default)]
  pub count: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub limit: Option<usize>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub sort: Option<SortSpec>,
}

/// Lowered form of `set "f"=V .. in P.. where E`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SetQuery {
  pub assignments: Map<String, Value>,
  pub dirs: Vec<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub where_expr: Option<Expr>,
}

/// Lowered form of `unset "f" .. in P.. where E`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UnsetQuery {
  pub fields: Vec<String>,
  pub dirs: Vec<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub where_expr: Option<Expr>,
}
