//! Command handlers. Each handler receives the engine, the validated
//! command, and the authenticated user, and returns the raw value the
//! filter chain (and ultimately the response) is built from.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};

use super::{Engine, Handler};
use crate::bfs::{CounterAction, NodeKind};
use crate::error::{EngineError, Result};
use crate::types::{Command, SearchQuery, SetQuery, UnsetQuery, User};

/// The command registry, populated once at engine construction.
pub(super) fn registry() -> HashMap<&'static str, Handler> {
  let mut map: HashMap<&'static str, Handler> = HashMap::new();

  // user namespace
  map.insert("user.new", |e, c, u| Box::pin(user_new(e, c, u)));
  map.insert("user.all", |e, c, u| Box::pin(user_all(e, c, u)));
  map.insert("user.about", |e, c, u| Box::pin(user_about(e, c, u)));
  map.insert("user.delete", |e, c, u| Box::pin(user_delete(e, c, u)));
  map.insert("user.passw", |e, c, u| Box::pin(user_passw(e, c, u)));
  map.insert("user.access", |e, c, u| Box::pin(user_access(e, c, u)));
  map.insert("user.db", |e, c, u| Box::pin(user_db(e, c, u)));
  map.insert("user.whoami", |e, c, u| Box::pin(user_whoami(e, c, u)));

  // server namespace
  map.insert("server.listusers", |e, c, u| Box::pin(user_all(e, c, u)));
  map.insert("server.userinfo", |e, c, u| Box::pin(user_about(e, c, u)));

  // database namespace
  map.insert("database.new", |e, c, u| Box::pin(database_new(e, c, u)));
  map.insert("database.drop", |e, c, u| Box::pin(database_drop(e, c, u)));
  map.insert("database.list", |e, c, u| Box::pin(database_list(e, c, u)));

  // database-scoped content commands
  map.insert("newdir", |e, c, u| Box::pin(newdir(e, c, u)));
  map.insert("newfile", |e, c, u| Box::pin(newfile(e, c, u)));
  map.insert("listdir", |e, c, u| Box::pin(listdir(e, c, u)));
  map.insert("rename", |e, c, u| Box::pin(rename(e, c, u)));
  map.insert("move", |e, c, u| Box::pin(move_node(e, c, u)));
  map.insert("copy", |e, c, u| Box::pin(copy(e, c, u)));
  map.insert("delete", |e, c, u| Box::pin(delete(e, c, u)));
  map.insert("info", |e, c, u| Box::pin(info(e, c, u)));
  map.insert("makepublic", |e, c, u| Box::pin(makepublic(e, c, u)));
  map.insert("makeprivate", |e, c, u| Box::pin(makeprivate(e, c, u)));
  map.insert("readfile", |e, c, u| Box::pin(readfile(e, c, u)));
  map.insert("modfile", |e, c, u| Box::pin(modfile(e, c, u)));
  map.insert("writebytes", |e, c, u| Box::pin(writebytes(e, c, u)));
  map.insert("readbytes", |e, c, u| Box::pin(readbytes(e, c, u)));
  map.insert("deletebytes", |e, c, u| Box::pin(deletebytes(e, c, u)));
  map.insert("counter", |e, c, u| Box::pin(counter(e, c, u)));
  map.insert("select", |e, c, u| Box::pin(select(e, c, u)));
  map.insert("set", |e, c, u| Box::pin(set(e, c, u)));
  map.insert("unset", |e, c, u| Box::pin(unset(e, c, u)));

  map
}

fn regex_option(cmd: &Command) -> String {
  cmd.opt_str("regex").unwrap_or("").to_string()
}

// ---------------------------------------------------------------------------
// user namespace
// ---------------------------------------------------------------------------

async fn user_new(engine: Arc<Engine>, cmd: Command, _user: User) -> Result<Value> {
  let username = cmd.str_arg("username")?;
  let password = cmd.str_arg("password")?;
  engine
    .authentication
    .new_user(username, password, false)
    .await?;
  Ok(Value::Bool(true))
}

async fn user_all(engine: Arc<Engine>, cmd: Command, _user: User) -> Result<Value> {
  let users = engine.authentication.list_users(&regex_option(&cmd)).await?;
  Ok(json!(users))
}

async fn user_about(engine: Arc<Engine>, cmd: Command, _user: User) -> Result<Value> {
  let info = engine
    .authentication
    .user_info(cmd.str_arg("username")?)
    .await?;
  Ok(serde_json::to_value(info)?)
}

async fn user_delete(engine: Arc<Engine>, cmd: Command, _user: User) -> Result<Value> {
  let username = cmd.str_arg("username")?;
  engine.authentication.remove_user(username).await?;
  // Sessions die with the account.
  engine.statestore.token_purge(username).await?;
  Ok(Value::Bool(true))
}

async fn user_passw(engine: Arc<Engine>, cmd: Command, _user: User) -> Result<Value> {
  engine
    .authentication
    .change_password(cmd.str_arg("username")?, cmd.str_arg("password")?)
    .await?;
  Ok(Value::Bool(true))
}

async fn user_access(engine: Arc<Engine>, cmd: Command, _user: User) -> Result<Value> {
  engine
    .authentication
    .change_user_status(cmd.str_arg("username")?, cmd.bool_arg("grant")?)
    .await?;
  Ok(Value::Bool(true))
}

async fn user_db(engine: Arc<Engine>, cmd: Command, _user: User) -> Result<Value> {
  engine
    .authentication
    .change_user_db_access(
      cmd.str_arg("username")?,
      cmd.str_arg("database")?,
      cmd.bool_arg("grant")?,
    )
    .await?;
  Ok(Value::Bool(true))
}

async fn user_whoami(_engine: Arc<Engine>, _cmd: Command, user: User) -> Result<Value> {
  Ok(json!({
    "username": user.username,
    "databases": user.databases,
    "root": user.root,
  }))
}

// ---------------------------------------------------------------------------
// database namespace
// ---------------------------------------------------------------------------

async fn database_new(engine: Arc<Engine>, cmd: Command, _user: User) -> Result<Value> {
  engine
    .filesystem
    .create_database(cmd.str_arg("database")?)
    .await?;
  Ok(Value::Bool(true))
}

async fn database_drop(engine: Arc<Engine>, cmd: Command, _user: User) -> Result<Value> {
  engine
    .filesystem
    .drop_database(cmd.str_arg("database")?)
    .await?;
  Ok(Value::Bool(true))
}

async fn database_list(engine: Arc<Engine>, cmd: Command, _user: User) -> Result<Value> {
  let names = engine
    .filesystem
    .list_databases(&regex_option(&cmd))
    .await?;
  Ok(json!(names))
}

// ---------------------------------------------------------------------------
// content commands
// ---------------------------------------------------------------------------

async fn newdir(engine: Arc<Engine>, cmd: Command, _user: User) -> Result<Value> {
  engine
    .filesystem
    .new_dir(cmd.str_arg("path")?, cmd.database()?)
    .await?;
  Ok(Value::Bool(true))
}

async fn newfile(engine: Arc<Engine>, cmd: Command, _user: User) -> Result<Value> {
  engine
    .filesystem
    .new_file(
      cmd.str_arg("path")?,
      cmd.database()?,
      cmd.object_arg("content")?.clone(),
    )
    .await?;
  Ok(Value::Bool(true))
}

async fn listdir(engine: Arc<Engine>, cmd: Command, _user: User) -> Result<Value> {
  let listing = engine
    .filesystem
    .list_dir(cmd.str_arg("path")?, &regex_option(&cmd), cmd.database()?)
    .await?;
  Ok(serde_json::to_value(listing)?)
}

async fn rename(engine: Arc<Engine>, cmd: Command, _user: User) -> Result<Value> {
  engine
    .filesystem
    .rename(cmd.str_arg("path")?, cmd.str_arg("name")?, cmd.database()?)
    .await?;
  Ok(Value::Bool(true))
}

async fn move_node(engine: Arc<Engine>, cmd: Command, _user: User) -> Result<Value> {
  engine
    .filesystem
    .move_node(cmd.str_arg("path")?, cmd.str_arg("to")?, cmd.database()?)
    .await?;
  Ok(Value::Bool(true))
}

async fn copy(engine: Arc<Engine>, cmd: Command, _user: User) -> Result<Value> {
  engine
    .filesystem
    .copy(cmd.str_arg("path")?, cmd.str_arg("to")?, cmd.database()?)
    .await?;
  Ok(Value::Bool(true))
}

async fn delete(engine: Arc<Engine>, cmd: Command, _user: User) -> Result<Value> {
  engine
    .filesystem
    .delete(cmd.str_arg("path")?, cmd.database()?)
    .await?;
  Ok(Value::Bool(true))
}

async fn info(engine: Arc<Engine>, cmd: Command, _user: User) -> Result<Value> {
  let info = engine
    .filesystem
    .info(cmd.str_arg("path")?, cmd.database()?)
    .await?;
  Ok(serde_json::to_value(info)?)
}

async fn makepublic(engine: Arc<Engine>, cmd: Command, _user: User) -> Result<Value> {
  engine
    .filesystem
    .set_public(cmd.str_arg("path")?, cmd.database()?, true)
    .await?;
  Ok(Value::Bool(true))
}

async fn makeprivate(engine: Arc<Engine>, cmd: Command, _user: User) -> Result<Value> {
  engine
    .filesystem
    .set_public(cmd.str_arg("path")?, cmd.database()?, false)
    .await?;
  Ok(Value::Bool(true))
}

async fn readfile(engine: Arc<Engine>, cmd: Command, _user: User) -> Result<Value> {
  let fields = cmd.str_list_arg("fields")?;
  engine
    .filesystem
    .read_json(cmd.str_arg("path")?, cmd.database()?, &fields)
    .await
}

async fn modfile(engine: Arc<Engine>, cmd: Command, _user: User) -> Result<Value> {
  engine
    .filesystem
    .update_json(
      cmd.str_arg("path")?,
      cmd.database()?,
      cmd.object_arg("content")?.clone(),
    )
    .await?;
  Ok(Value::Bool(true))
}

/// `writebytes` does not carry the bytes itself: it mints a one-shot
/// upload ticket the transport layer redeems with the payload.
async fn writebytes(engine: Arc<Engine>, cmd: Command, user: User) -> Result<Value> {
  let path = cmd.str_arg("path")?;
  let db = cmd.database()?;
  let node = engine.filesystem.info(path, db).await?;
  if node.kind != NodeKind::File {
    return Err(EngineError::InvalidArgument(format!(
      "'{path}' is not a file"
    )));
  }
  let ticket = engine.create_upload_ticket(db, path, &user.username).await?;
  Ok(json!({ "ticket": ticket }))
}

async fn readbytes(engine: Arc<Engine>, cmd: Command, _user: User) -> Result<Value> {
  let id = engine
    .filesystem
    .read_bytes(cmd.str_arg("path")?, cmd.database()?)
    .await?;
  Ok(Value::String(id))
}

async fn deletebytes(engine: Arc<Engine>, cmd: Command, _user: User) -> Result<Value> {
  engine
    .filesystem
    .delete_bytes(cmd.str_arg("path")?, cmd.database()?)
    .await?;
  Ok(Value::Bool(true))
}

async fn counter(engine: Arc<Engine>, cmd: Command, _user: User) -> Result<Value> {
  let db = cmd.database()?;
  let action = cmd.str_arg("action")?;
  if action == "list" {
    let counters = engine
      .filesystem
      .list_counters(&regex_option(&cmd), db)
      .await?;
    return Ok(Value::Object(counters));
  }
  let action = match action {
    "incr" => CounterAction::Incr,
    "decr" => CounterAction::Decr,
    "reset" => CounterAction::Reset,
    other => {
      return Err(EngineError::InvalidArgument(format!(
        "unknown counter action '{other}'"
      )))
    }
  };
  let value = engine
    .filesystem
    .set_counter(cmd.str_arg("name")?, action, cmd.int_arg("value")?, db)
    .await?;
  Ok(Value::from(value))
}

fn query_arg<T: serde::de::DeserializeOwned>(cmd: &Command) -> Result<T> {
  serde_json::from_value(cmd.arg("query")?.clone())
    .map_err(|e| EngineError::InvalidArgument(format!("malformed query: {e}")))
}

async fn select(engine: Arc<Engine>, cmd: Command, _user: User) -> Result<Value> {
  let query: SearchQuery = query_arg(&cmd)?;
  engine.filesystem.search(cmd.database()?, &query).await
}

async fn set(engine: Arc<Engine>, cmd: Command, _user: User) -> Result<Value> {
  let query: SetQuery = query_arg(&cmd)?;
  let count = engine.filesystem.set_values(cmd.database()?, &query).await?;
  Ok(Value::from(count))
}

async fn unset(engine: Arc<Engine>, cmd: Command, _user: User) -> Result<Value> {
  let query: UnsetQuery = query_arg(&cmd)?;
  let count = engine
    .filesystem
    .unset_values(cmd.database()?, &query)
    .await?;
  Ok(Value::from(count))
}
