mod command;
mod query;
mod response;

pub use command::{Command, FilterSpec};
pub use query::{BinOp, Expr, SearchQuery, SetQuery, SortDirection, SortSpec, UnsetQuery};
pub use response::{Response, ResponseStatus};

use serde::{Deserialize, Serialize};

/// An authenticated principal. `root` users bypass per-database grants.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
  pub username: String,
  pub active: bool,
  pub root: bool,
  pub databases: Vec<String>,
}

impl User {
  pub fn has_database(&self, db: &str) -> bool {
    self.root || self.databases.iter().any(|d| d == db)
  }
}
