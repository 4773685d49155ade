//! BQL front-end. A script is zero or more commands; each command is
//! recognized by its head token (`noun.verb`, `@db.verb`, or a `print`
//! prefix for dry-run) with positional arguments after it. Semicolons
//! optionally separate commands; newlines are plain whitespace so
//! multi-line `select` clauses read naturally.

mod lexer;

pub use lexer::{Pos, Token, TokenKind};

use serde_json::{Map, Value};

use crate::error::{EngineError, Result};
use crate::types::{
  BinOp, Command, Expr, FilterSpec, SearchQuery, SetQuery, SortDirection, SortSpec, UnsetQuery,
};

/// Parse a script into its command sequence. Any error aborts the whole
/// script; no partial command list is returned.
pub fn parse_script(src: &str) -> Result<Vec<Command>> {
  let tokens = lexer::tokenize(src)?;
  let mut cursor = Cursor { tokens, idx: 0 };
  let mut commands = Vec::new();
  loop {
    while cursor.peek_kind() == &TokenKind::Semicolon {
      cursor.bump();
    }
    if cursor.peek_kind() == &TokenKind::Eof {
      return Ok(commands);
    }
    commands.push(cursor.parse_command()?);
  }
}

struct Cursor {
  tokens: Vec<Token>,
  idx: usize,
}

impl Cursor {
  fn peek(&self) -> &Token {
    &self.tokens[self.idx.min(self.tokens.len() - 1)]
  }

  fn peek_kind(&self) -> &TokenKind {
    &self.peek().kind
  }

  fn bump(&mut self) -> Token {
    let token = self.peek().clone();
    if self.idx < self.tokens.len() - 1 {
      self.idx += 1;
    }
    token
  }

  fn error_at(&self, pos: Pos, message: impl Into<String>) -> EngineError {
    EngineError::Parse {
      line: pos.line,
      column: pos.column,
      message: message.into(),
    }
  }

  fn unexpected(&self, expected: &str) -> EngineError {
    let token = self.peek();
    self.error_at(
      token.pos,
      format!("expected {expected}, found {}", token.kind.describe()),
    )
  }

  fn expect_str(&mut self, what: &str) -> Result<String> {
    match self.peek_kind() {
      TokenKind::Str(_) => match self.bump().kind {
        TokenKind::Str(s) => Ok(s),
        _ => unreachable!(),
      },
      _ => Err(self.unexpected(what)),
    }
  }

  fn expect_path(&mut self) -> Result<String> {
    match self.peek_kind() {
      TokenKind::Path(_) => match self.bump().kind {
        TokenKind::Path(p) => Ok(p),
        _ => unreachable!(),
      },
      _ => Err(self.unexpected("a path")),
    }
  }

  fn expect_int(&mut self, what: &str) -> Result<i64> {
    match self.peek_kind() {
      TokenKind::Int(_) => match self.bump().kind {
        TokenKind::Int(n) => Ok(n),
        _ => unreachable!(),
      },
      _ => Err(self.unexpected(what)),
    }
  }

  fn expect_bool(&mut self, what: &str) -> Result<bool> {
    match self.peek_kind() {
      TokenKind::Ident(w) if w == "true" => {
        self.bump();
        Ok(true)
      }
      TokenKind::Ident(w) if w == "false" => {
        self.bump();
        Ok(false)
      }
      _ => Err(self.unexpected(what)),
    }
  }

  fn expect_kind(&mut self, kind: TokenKind, what: &str) -> Result<()> {
    if self.peek_kind() == &kind {
      self.bump();
      Ok(())
    } else {
      Err(self.unexpected(what))
    }
  }

  fn expect_keyword(&mut self, word: &str) -> Result<()> {
    match self.peek_kind() {
      TokenKind::Ident(w) if w == word => {
        self.bump();
        Ok(())
      }
      _ => Err(self.unexpected(&format!("'{word}'"))),
    }
  }

  fn at_keyword(&self, word: &str) -> bool {
    matches!(self.peek_kind(), TokenKind::Ident(w) if w == word)
  }

  /// Optional trailing regex string, used by the listing commands.
  fn optional_str(&mut self) -> Option<String> {
    match self.peek_kind() {
      TokenKind::Str(_) => match self.bump().kind {
        TokenKind::Str(s) => Some(s),
        _ => unreachable!(),
      },
      _ => None,
    }
  }

  // ---------------------------------------------------------------------
  // Commands
  // ---------------------------------------------------------------------

  fn parse_command(&mut self) -> Result<Command> {
    let sign = if self.at_keyword("print") {
      self.bump();
      true
    } else {
      false
    };

    let token = self.peek().clone();
    let mut command = match token.kind {
      TokenKind::AtCommand { .. } => {
        let (db, verb) = match self.bump().kind {
          TokenKind::AtCommand { db, verb } => (db, verb),
          _ => unreachable!(),
        };
        self.parse_db_command(db, verb, token.pos)?
      }
      TokenKind::Ident(ref name) if name.contains('.') => {
        let name = name.clone();
        self.bump();
        self.parse_admin_command(name, token.pos)?
      }
      _ => return Err(self.unexpected("a command")),
    };
    command.sign = sign;

    while self.peek_kind() == &TokenKind::Pipe {
      self.bump();
      command.filters.push(self.parse_filter()?);
    }
    Ok(command)
  }

  fn parse_filter(&mut self) -> Result<FilterSpec> {
    let name = match self.peek_kind() {
      TokenKind::Ident(_) => match self.bump().kind {
        TokenKind::Ident(n) => n,
        _ => unreachable!(),
      },
      _ => return Err(self.unexpected("a filter name")),
    };
    let mut args = Vec::new();
    loop {
      match self.peek_kind() {
        TokenKind::Str(_) | TokenKind::Int(_) | TokenKind::Float(_) => {
          args.push(self.parse_value()?)
        }
        TokenKind::Ident(w) if w == "true" || w == "false" => args.push(self.parse_value()?),
        _ => break,
      }
    }
    Ok(FilterSpec { name, args })
  }

  fn parse_admin_command(&mut self, name: String, pos: Pos) -> Result<Command> {
    let mut cmd = Command::new(&name);
    match name.as_str() {
      "user.new" | "user.passw" => {
        cmd.args.insert(
          "username".into(),
          Value::String(self.expect_str("a username")?),
        );
        cmd.args.insert(
          "password".into(),
          Value::String(self.expect_str("a password")?),
        );
      }
      "user.about" | "user.delete" | "server.userinfo" => {
        cmd.args.insert(
          "username".into(),
          Value::String(self.expect_str("a username")?),
        );
      }
      "user.access" => {
        cmd.args.insert(
          "username".into(),
          Value::String(self.expect_str("a username")?),
        );
        cmd
          .args
          .insert("grant".into(), Value::Bool(self.expect_bool("true or false")?));
      }
      "user.db" => {
        cmd.args.insert(
          "username".into(),
          Value::String(self.expect_str("a username")?),
        );
        cmd.args.insert(
          "database".into(),
          Value::String(self.expect_str("a database name")?),
        );
        cmd
          .args
          .insert("grant".into(), Value::Bool(self.expect_bool("true or false")?));
      }
      "user.all" | "server.listusers" | "database.list" => {
        if let Some(rgx) = self.optional_str() {
          cmd.options.insert("regex".into(), Value::String(rgx));
        }
      }
      "user.whoami" => {}
      "database.new" | "database.drop" => {
        cmd.args.insert(
          "database".into(),
          Value::String(self.expect_str("a database name")?),
        );
      }
      _ => return Err(self.error_at(pos, format!("unknown command '{name}'"))),
    }
    Ok(cmd)
  }

  fn parse_db_command(&mut self, db: String, verb: String, pos: Pos) -> Result<Command> {
    let mut cmd = Command::new(&verb);
    cmd.database = Some(db);
    match verb.as_str() {
      "newdir" | "delete" | "info" | "makepublic" | "makeprivate" | "deletebytes"
      | "readbytes" | "writebytes" => {
        cmd
          .args
          .insert("path".into(), Value::String(self.expect_path()?));
      }
      "newfile" | "modfile" => {
        cmd
          .args
          .insert("path".into(), Value::String(self.expect_path()?));
        let content = self.parse_object()?;
        cmd.args.insert("content".into(), Value::Object(content));
      }
      "readfile" => {
        cmd
          .args
          .insert("path".into(), Value::String(self.expect_path()?));
        let fields = if self.peek_kind() == &TokenKind::LBracket {
          self.parse_value()?
        } else {
          Value::Array(Vec::new())
        };
        cmd.args.insert("fields".into(), fields);
      }
      "listdir" => {
        cmd
          .args
          .insert("path".into(), Value::String(self.expect_path()?));
        if let Some(rgx) = self.optional_str() {
          cmd.options.insert("regex".into(), Value::String(rgx));
        }
      }
      "rename" => {
        cmd
          .args
          .insert("path".into(), Value::String(self.expect_path()?));
        cmd
          .args
          .insert("name".into(), Value::String(self.expect_str("a new name")?));
      }
      "move" | "copy" => {
        cmd
          .args
          .insert("path".into(), Value::String(self.expect_path()?));
        cmd
          .args
          .insert("to".into(), Value::String(self.expect_path()?));
      }
      "counter" => self.parse_counter(&mut cmd)?,
      "select" => {
        let query = self.parse_select()?;
        cmd
          .args
          .insert("query".into(), serde_json::to_value(query)?);
      }
      "set" => {
        let query = self.parse_set()?;
        cmd
          .args
          .insert("query".into(), serde_json::to_value(query)?);
      }
      "unset" => {
        let query = self.parse_unset()?;
        cmd
          .args
          .insert("query".into(), serde_json::to_value(query)?);
      }
      _ => return Err(self.error_at(pos, format!("unknown command '{verb}'"))),
    }
    Ok(cmd)
  }

  fn parse_counter(&mut self, cmd: &mut Command) -> Result<()> {
    if self.at_keyword("list") {
      self.bump();
      cmd.args.insert("action".into(), Value::String("list".into()));
      if let Some(rgx) = self.optional_str() {
        cmd.options.insert("regex".into(), Value::String(rgx));
      }
      return Ok(());
    }
    let name = self.expect_str("a counter name")?;
    let action = match self.peek_kind() {
      TokenKind::Ident(w) if matches!(w.as_str(), "incr" | "decr" | "reset") => {
        match self.bump().kind {
          TokenKind::Ident(w) => w,
          _ => unreachable!(),
        }
      }
      _ => return Err(self.unexpected("'incr', 'decr' or 'reset'")),
    };
    let value = self.expect_int("a counter value")?;
    cmd.args.insert("name".into(), Value::String(name));
    cmd.args.insert("action".into(), Value::String(action));
    cmd.args.insert("value".into(), Value::from(value));
    Ok(())
  }

  // ---------------------------------------------------------------------
  // select / set / unset
  // ---------------------------------------------------------------------

  fn parse_select(&mut self) -> Result<SearchQuery> {
    let mut fields = vec![self.expect_str("a field to select")?];
    while let Some(f) = self.optional_str() {
      fields.push(f);
    }
    self.expect_keyword("in")?;
    let mut dirs = vec![self.expect_path()?];
    while let TokenKind::Path(_) = self.peek_kind() {
      dirs.push(self.expect_path()?);
    }

    let mut query = SearchQuery {
      fields,
      dirs,
      where_expr: None,
      distinct: None,
      count: false,
      limit: None,
      sort: None,
    };
    loop {
      if self.at_keyword("where") {
        self.bump();
        query.where_expr = Some(self.parse_where()?);
      } else if self.at_keyword("limit") {
        self.bump();
        let n = self.expect_int("a limit")?;
        if n < 0 {
          return Err(self.unexpected("a non-negative limit"));
        }
        query.limit = Some(n as usize);
      } else if self.at_keyword("sort") {
        self.bump();
        let field = self.expect_str("a sort field")?;
        let direction = if self.at_keyword("asc") {
          self.bump();
          SortDirection::Asc
        } else if self.at_keyword("desc") {
          self.bump();
          SortDirection::Desc
        } else {
          SortDirection::Asc
        };
        query.sort = Some(SortSpec { field, direction });
      } else if self.at_keyword("distinct") {
        self.bump();
        query.distinct = Some(self.expect_str("a distinct field")?);
      } else if self.at_keyword("count") {
        self.bump();
        query.count = true;
      } else {
        break;
      }
    }
    Ok(query)
  }

  fn parse_set(&mut self) -> Result<SetQuery> {
    let mut assignments = Map::new();
    loop {
      let field = self.expect_str("a field to set")?;
      self.expect_kind(TokenKind::Assign, "'='")?;
      let value = self.parse_value()?;
      assignments.insert(field, value);
      if !matches!(self.peek_kind(), TokenKind::Str(_)) {
        break;
      }
    }
    self.expect_keyword("in")?;
    let mut dirs = vec![self.expect_path()?];
    while let TokenKind::Path(_) = self.peek_kind() {
      dirs.push(self.expect_path()?);
    }
    let where_expr = if self.at_keyword("where") {
      self.bump();
      Some(self.parse_where()?)
    } else {
      None
    };
    Ok(SetQuery {
      assignments,
      dirs,
      where_expr,
    })
  }

  fn parse_unset(&mut self) -> Result<UnsetQuery> {
    let mut fields = vec![self.expect_str("a field to unset")?];
    while let Some(f) = self.optional_str() {
      fields.push(f);
    }
    self.expect_keyword("in")?;
    let mut dirs = vec![self.expect_path()?];
    while let TokenKind::Path(_) = self.peek_kind() {
      dirs.push(self.expect_path()?);
    }
    let where_expr = if self.at_keyword("where") {
      self.bump();
      Some(self.parse_where()?)
    } else {
      None
    };
    Ok(UnsetQuery {
      fields,
      dirs,
      where_expr,
    })
  }

  // ---------------------------------------------------------------------
  // where-expressions
  // ---------------------------------------------------------------------

  fn parse_where(&mut self) -> Result<Expr> {
    self.parse_or()
  }

  fn parse_or(&mut self) -> Result<Expr> {
    let mut lhs = self.parse_and()?;
    while self.peek_kind() == &TokenKind::OrOr {
      self.bump();
      let rhs = self.parse_and()?;
      lhs = Expr::Binary {
        op: BinOp::Or,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
      };
    }
    Ok(lhs)
  }

  fn parse_and(&mut self) -> Result<Expr> {
    let mut lhs = self.parse_comparison()?;
    while self.peek_kind() == &TokenKind::AndAnd {
      self.bump();
      let rhs = self.parse_comparison()?;
      lhs = Expr::Binary {
        op: BinOp::And,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
      };
    }
    Ok(lhs)
  }

  fn parse_comparison(&mut self) -> Result<Expr> {
    // Parenthesized predicates group boolean structure.
    if self.peek_kind() == &TokenKind::LParen {
      self.bump();
      let inner = self.parse_or()?;
      self.expect_kind(TokenKind::RParen, "')'")?;
      return Ok(inner);
    }

    let lhs = self.parse_term()?;
    let op = match self.peek_kind() {
      TokenKind::EqEq => BinOp::Eq,
      TokenKind::NotEq => BinOp::Ne,
      TokenKind::Lt => BinOp::Lt,
      TokenKind::Lte => BinOp::Lte,
      TokenKind::Gt => BinOp::Gt,
      TokenKind::Gte => BinOp::Gte,
      TokenKind::Ident(w) if w == "in" => BinOp::In,
      _ => return Err(self.unexpected("a comparison operator")),
    };
    self.bump();
    let rhs = Expr::Literal {
      value: self.parse_value()?,
    };
    Ok(Expr::Binary {
      op,
      lhs: Box::new(lhs),
      rhs: Box::new(rhs),
    })
  }

  /// Left side of a comparison: a field reference or a builtin call.
  fn parse_term(&mut self) -> Result<Expr> {
    match self.peek_kind() {
      TokenKind::Str(_) => {
        let name = self.expect_str("a field")?;
        Ok(Expr::Field { name })
      }
      TokenKind::Ident(w) if w == "regex" => {
        self.bump();
        self.expect_kind(TokenKind::LParen, "'('")?;
        let field = self.expect_str("a field")?;
        let flags = if self.peek_kind() == &TokenKind::Comma {
          self.bump();
          self.expect_str("regex flags")?
        } else {
          String::new()
        };
        self.expect_kind(TokenKind::RParen, "')'")?;
        Ok(Expr::Regex { field, flags })
      }
      TokenKind::Ident(w) if w == "exists" => {
        self.bump();
        self.expect_kind(TokenKind::LParen, "'('")?;
        let field = self.expect_str("a field")?;
        self.expect_kind(TokenKind::RParen, "')'")?;
        Ok(Expr::Exists { field })
      }
      _ => Err(self.unexpected("a field, regex() or exists()")),
    }
  }

  // ---------------------------------------------------------------------
  // JSON values
  // ---------------------------------------------------------------------

  fn parse_value(&mut self) -> Result<Value> {
    let token = self.peek().clone();
    match token.kind {
      TokenKind::Str(_) => match self.bump().kind {
        TokenKind::Str(s) => Ok(Value::String(s)),
        _ => unreachable!(),
      },
      TokenKind::Int(n) => {
        self.bump();
        Ok(Value::from(n))
      }
      TokenKind::Float(f) => {
        self.bump();
        serde_json::Number::from_f64(f)
          .map(Value::Number)
          .ok_or_else(|| self.error_at(token.pos, "non-finite number"))
      }
      TokenKind::Ident(ref w) => match w.as_str() {
        "true" => {
          self.bump();
          Ok(Value::Bool(true))
        }
        "false" => {
          self.bump();
          Ok(Value::Bool(false))
        }
        "null" => {
          self.bump();
          Ok(Value::Null)
        }
        _ => Err(self.unexpected("a value")),
      },
      TokenKind::LBracket => {
        self.bump();
        let mut items = Vec::new();
        if self.peek_kind() != &TokenKind::RBracket {
          loop {
            items.push(self.parse_value()?);
            if self.peek_kind() == &TokenKind::Comma {
              self.bump();
            } else {
              break;
            }
          }
        }
        self.expect_kind(TokenKind::RBracket, "']'")?;
        Ok(Value::Array(items))
      }
      TokenKind::LBrace => Ok(Value::Object(self.parse_object()?)),
      _ => Err(self.unexpected("a value")),
    }
  }

  fn parse_object(&mut self) -> Result<Map<String, Value>> {
    self.expect_kind(TokenKind::LBrace, "'{'")?;
    let mut out = Map::new();
    if self.peek_kind() != &TokenKind::RBrace {
      loop {
        let key = self.expect_str("an object key")?;
        self.expect_kind(TokenKind::Colon, "':'")?;
        let value = self.parse_value()?;
        out.insert(key, value);
        if self.peek_kind() == &TokenKind::Comma {
          self.bump();
        } else {
          break;
        }
      }
    }
    self.expect_kind(TokenKind::RBrace, "'}'")?;
    Ok(out)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn parses_user_commands() {
    let cmds = parse_script(r#"user.new "alice" "wonderland1"; user.whoami"#).unwrap();
    assert_eq!(cmds.len(), 2);
    assert_eq!(cmds[0].name, "user.new");
    assert_eq!(cmds[0].args["username"], json!("alice"));
    assert_eq!(cmds[1].name, "user.whoami");
  }

  #[test]
  fn parses_database_scope() {
    let cmds = parse_script("@db1.newdir /var/www").unwrap();
    assert_eq!(cmds[0].name, "newdir");
    assert_eq!(cmds[0].database.as_deref(), Some("db1"));
    assert_eq!(cmds[0].args["path"], json!("/var/www"));
  }

  #[test]
  fn parses_newfile_with_json() {
    let cmds =
      parse_script(r#"@db1.newfile /users/u1 {"name": "john", "age": 34, "tags": [1, 2]}"#)
        .unwrap();
    assert_eq!(
      cmds[0].args["content"],
      json!({"name": "john", "age": 34, "tags": [1, 2]})
    );
  }

  #[test]
  fn parses_multiline_select() {
    let script = r#"
      @test.select "name" "age" in /users
      where regex("name","i") == "^j\\w*n$"
      limit 5 sort "age" desc
    "#;
    let cmds = parse_script(script).unwrap();
    assert_eq!(cmds[0].name, "select");
    let query: SearchQuery = serde_json::from_value(cmds[0].args["query"].clone()).unwrap();
    assert_eq!(query.fields, vec!["name", "age"]);
    assert_eq!(query.dirs, vec!["/users"]);
    assert_eq!(query.limit, Some(5));
    assert_eq!(
      query.sort,
      Some(SortSpec {
        field: "age".into(),
        direction: SortDirection::Desc
      })
    );
    match query.where_expr.unwrap() {
      Expr::Binary { op, lhs, rhs } => {
        assert_eq!(op, BinOp::Eq);
        assert_eq!(
          *lhs,
          Expr::Regex {
            field: "name".into(),
            flags: "i".into()
          }
        );
        assert_eq!(
          *rhs,
          Expr::Literal {
            value: json!("^j\\w*n$")
          }
        );
      }
      other => panic!("unexpected expr: {other:?}"),
    }
  }

  #[test]
  fn parses_where_combinators() {
    let script = r#"@db.select "a" in /x where "a" == 1 && ("b" > 2 || "c" in ["p", "q"])"#;
    let cmds = parse_script(script).unwrap();
    let query: SearchQuery = serde_json::from_value(cmds[0].args["query"].clone()).unwrap();
    match query.where_expr.unwrap() {
      Expr::Binary { op: BinOp::And, rhs, .. } => match *rhs {
        Expr::Binary { op: BinOp::Or, .. } => {}
        other => panic!("expected or-group, got {other:?}"),
      },
      other => panic!("expected and, got {other:?}"),
    }
  }

  #[test]
  fn parses_set_and_unset() {
    let script = r#"
      @test.set "country"={"name":"ghana","major_cities":["kumasi","accra"]}
      in /users
      where "country" == "ghana"
    "#;
    let cmds = parse_script(script).unwrap();
    let query: SetQuery = serde_json::from_value(cmds[0].args["query"].clone()).unwrap();
    assert_eq!(
      query.assignments["country"],
      json!({"name":"ghana","major_cities":["kumasi","accra"]})
    );

    let cmds =
      parse_script(r#"@test.unset "country" in /users where exists("country") == true"#).unwrap();
    let query: UnsetQuery = serde_json::from_value(cmds[0].args["query"].clone()).unwrap();
    assert_eq!(query.fields, vec!["country"]);
  }

  #[test]
  fn parses_counters() {
    let cmds = parse_script(r#"@db.counter "users" incr 1; @db.counter list "^user""#).unwrap();
    assert_eq!(cmds[0].args["action"], json!("incr"));
    assert_eq!(cmds[0].args["value"], json!(1));
    assert_eq!(cmds[1].args["action"], json!("list"));
    assert_eq!(cmds[1].options["regex"], json!("^user"));
  }

  #[test]
  fn parses_filters_and_print() {
    let cmds = parse_script(r#"print @db.readfile /a | pick "title" "body" | omit "x""#).unwrap();
    assert!(cmds[0].sign);
    assert_eq!(cmds[0].filters.len(), 2);
    assert_eq!(cmds[0].filters[0].name, "pick");
    assert_eq!(cmds[0].filters[0].args, vec![json!("title"), json!("body")]);
  }

  #[test]
  fn unknown_command_fails_parsing() {
    let err = parse_script("@db.frobnicate /a").unwrap_err();
    assert_eq!(err.kind(), "parse");
    let err = parse_script("user.frobnicate").unwrap_err();
    assert_eq!(err.kind(), "parse");
  }

  #[test]
  fn error_carries_position() {
    let err = parse_script("@db.newdir").unwrap_err();
    match err {
      EngineError::Parse { line, column, message } => {
        assert_eq!(line, 1);
        assert!(column > 1);
        assert!(message.contains("path"), "message: {message}");
      }
      other => panic!("unexpected error: {other:?}"),
    }
  }

  #[test]
  fn commands_round_trip_through_json() {
    let script = r#"
      user.new "alice" "wonderland1"
      @db1.newfile /users/u1 {"name": "john"}
      @db1.select "name" in /users where "age" >= 21 count
      @db1.counter "hits" incr 2 | pick "value"
    "#;
    let cmds = parse_script(script).unwrap();
    for cmd in &cmds {
      let json = serde_json::to_value(cmd).unwrap();
      let back: Command = serde_json::from_value(json).unwrap();
      assert_eq!(&back, cmd);
    }
  }
}
