use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use regex::Regex;
use serde_json::{Map, Value};
use tokio::io::AsyncRead;

use super::eval::{self, Evaluator};
use super::path as bfspath;
use super::{Attachment, CounterAction, DirListing, FileSystem, NodeInfo, NodeKind};
use crate::bst::ByteStore;
use crate::error::{EngineError, NotFoundKind, Result};
use crate::types::{SearchQuery, SetQuery, SortDirection, UnsetQuery};

#[derive(Debug, Clone)]
struct Node {
  name: String,
  parent: String,
  kind: NodeKind,
  created_at: DateTime<Utc>,
  content: Map<String, Value>,
  public: bool,
  attachment: Option<Attachment>,
}

impl Node {
  fn dir(name: &str, parent: &str) -> Self {
    Self {
      name: name.to_string(),
      parent: parent.to_string(),
      kind: NodeKind::Dir,
      created_at: Utc::now(),
      content: Map::new(),
      public: false,
      attachment: None,
    }
  }

  fn file(name: &str, parent: &str, content: Map<String, Value>) -> Self {
    Self {
      name: name.to_string(),
      parent: parent.to_string(),
      kind: NodeKind::File,
      created_at: Utc::now(),
      content,
      public: false,
      attachment: None,
    }
  }

  fn is_dir(&self) -> bool {
    self.kind == NodeKind::Dir
  }
}

#[derive(Default)]
struct DbState {
  // Keyed by full path; lexicographic order makes a subtree a
  // contiguous key range.
  nodes: BTreeMap<String, Node>,
  counters: HashMap<String, i64>,
}

impl DbState {
  fn new() -> Self {
    let mut state = Self::default();
    state.nodes.insert("/".to_string(), Node::dir("", ""));
    state
  }

  fn node(&self, path: &str) -> Result<&Node> {
    self
      .nodes
      .get(path)
      .ok_or_else(|| EngineError::path_not_found(path))
  }

  fn dir_node(&self, path: &str) -> Result<&Node> {
    let node = self.node(path)?;
    if !node.is_dir() {
      return Err(EngineError::InvalidArgument(format!(
        "'{path}' is not a directory"
      )));
    }
    Ok(node)
  }

  fn file_node(&self, path: &str) -> Result<&Node> {
    let node = self.node(path)?;
    if node.is_dir() {
      return Err(EngineError::InvalidArgument(format!(
        "'{path}' is not a file"
      )));
    }
    Ok(node)
  }

  fn file_node_mut(&mut self, path: &str) -> Result<&mut Node> {
    match self.nodes.get_mut(path) {
      Some(node) if node.kind == NodeKind::File => Ok(node),
      Some(_) => Err(EngineError::InvalidArgument(format!(
        "'{path}' is not a file"
      ))),
      None => Err(EngineError::path_not_found(path)),
    }
  }

  /// Keys of `path`'s strict descendants.
  fn descendant_keys(&self, path: &str) -> Vec<String> {
    let (start, end) = if path == "/" {
      ("/".to_string(), "0".to_string())
    } else {
      (format!("{path}/"), format!("{path}0"))
    };
    self
      .nodes
      .range(start..end)
      .filter(|(k, _)| k.as_str() != path)
      .map(|(k, _)| k.clone())
      .collect()
  }

  /// Direct children of a directory, in key order.
  fn children(&self, path: &str) -> Vec<(&String, &Node)> {
    let (start, end) = if path == "/" {
      ("/".to_string(), "0".to_string())
    } else {
      (format!("{path}/"), format!("{path}0"))
    };
    self
      .nodes
      .range(start..end)
      .filter(|(_, n)| n.parent == path)
      .collect()
  }

  /// Validate that `path` can be created: parent exists and is a
  /// directory, and no sibling claims the name.
  fn check_new(&self, path: &str) -> Result<(String, String)> {
    if path == "/" {
      return Err(EngineError::AlreadyExists("path '/'".into()));
    }
    let (parent, name) = bfspath::split(path);
    self.dir_node(parent)?;
    if self.nodes.contains_key(path) {
      return Err(EngineError::AlreadyExists(format!("path '{path}'")));
    }
    Ok((parent.to_string(), name.to_string()))
  }
}

fn replace_prefix(key: &str, old: &str, new: &str) -> String {
  if key == old {
    new.to_string()
  } else {
    format!("{new}{}", &key[old.len()..])
  }
}

fn valid_db_name(db: &str) -> bool {
  !db.is_empty()
    && db
      .chars()
      .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-'))
}

fn valid_counter_name(name: &str) -> bool {
  !name.is_empty()
    && name
      .chars()
      .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

fn compile_filter(pattern: &str) -> Result<Regex> {
  Regex::new(pattern).map_err(|e| EngineError::InvalidArgument(format!("bad regex: {e}")))
}

/// In-process content store. The tree and counters of each database live
/// behind one `RwLock`; blob traffic goes through the shared byte store
/// outside the lock so no await point holds it.
pub struct MemoryFileSystem {
  dbs: RwLock<HashMap<String, DbState>>,
  bst: Arc<dyn ByteStore>,
}

impl MemoryFileSystem {
  pub fn new(bst: Arc<dyn ByteStore>) -> Self {
    Self {
      dbs: RwLock::new(HashMap::new()),
      bst,
    }
  }

  fn with_db<R>(&self, db: &str, f: impl FnOnce(&DbState) -> Result<R>) -> Result<R> {
    let dbs = self.dbs.read();
    let state = dbs
      .get(db)
      .ok_or_else(|| EngineError::database_not_found(db))?;
    f(state)
  }

  fn with_db_mut<R>(&self, db: &str, f: impl FnOnce(&mut DbState) -> Result<R>) -> Result<R> {
    let mut dbs = self.dbs.write();
    let state = dbs
      .get_mut(db)
      .ok_or_else(|| EngineError::database_not_found(db))?;
    f(state)
  }

  /// Copy a blob into a fresh id by piping a store read into a store
  /// write. Returns the duplicate's id; the caller owns cleanup if the
  /// metadata commit that follows fails.
  async fn duplicate_blob(&self, db: &str, id: &str) -> Result<(String, u64)> {
    let (mut rd, mut wr) = tokio::io::duplex(64 * 1024);
    let bst = self.bst.clone();
    let db_owned = db.to_string();
    let id_owned = id.to_string();
    let producer =
      tokio::spawn(async move { bst.read(&db_owned, &id_owned, &mut wr).await });
    let added = self.bst.add(db, &mut rd).await;
    let produced = producer
      .await
      .map_err(|e| EngineError::Internal(e.to_string()))?;
    let (new_id, size) = added?;
    if let Err(e) = produced {
      // The source read failed mid-stream; the duplicate is truncated.
      let _ = self.bst.delete(db, &new_id).await;
      return Err(e);
    }
    Ok((new_id, size))
  }

  /// Collect matching files under the query's directories. Directories
  /// are deduplicated so a file is never visited twice.
  fn matching_files(
    &self,
    state: &DbState,
    dirs: &[String],
    where_expr: Option<&crate::types::Expr>,
  ) -> Result<Vec<(String, Map<String, Value>)>> {
    let mut evaluator = Evaluator::new();
    let mut seen_dirs: Vec<String> = Vec::new();
    let mut rows = Vec::new();
    for dir in dirs {
      let dir = bfspath::normalize(dir)?;
      if seen_dirs.contains(&dir) {
        continue;
      }
      state.dir_node(&dir)?;
      for (path, node) in state.children(&dir) {
        if node.is_dir() {
          continue;
        }
        let matched = match where_expr {
          Some(expr) => evaluator.matches(expr, &node.content)?,
          None => true,
        };
        if matched {
          rows.push((path.clone(), node.content.clone()));
        }
      }
      seen_dirs.push(dir);
    }
    Ok(rows)
  }
}

#[async_trait]
impl FileSystem for MemoryFileSystem {
  async fn clear_all(&self) -> Result<()> {
    self.dbs.write().clear();
    self.bst.clear_all().await
  }

  async fn create_database(&self, db: &str) -> Result<()> {
    if !valid_db_name(db) {
      return Err(EngineError::InvalidArgument(format!(
        "invalid database name '{db}'"
      )));
    }
    let mut dbs = self.dbs.write();
    if dbs.contains_key(db) {
      return Err(EngineError::AlreadyExists(format!("database '{db}'")));
    }
    dbs.insert(db.to_string(), DbState::new());
    Ok(())
  }

  async fn drop_database(&self, db: &str) -> Result<()> {
    if self.dbs.write().remove(db).is_none() {
      return Err(EngineError::database_not_found(db));
    }
    self.bst.drop_database(db).await
  }

  async fn list_databases(&self, pattern: &str) -> Result<Vec<String>> {
    let rgx = compile_filter(pattern)?;
    let dbs = self.dbs.read();
    let mut names: Vec<String> = dbs.keys().filter(|n| rgx.is_match(n)).cloned().collect();
    names.sort();
    Ok(names)
  }

  async fn new_dir(&self, path: &str, db: &str) -> Result<()> {
    let path = bfspath::normalize(path)?;
    self.with_db_mut(db, |state| {
      let (parent, name) = state.check_new(&path)?;
      state.nodes.insert(path.clone(), Node::dir(&name, &parent));
      Ok(())
    })
  }

  async fn new_file(&self, path: &str, db: &str, content: Map<String, Value>) -> Result<()> {
    let path = bfspath::normalize(path)?;
    self.with_db_mut(db, |state| {
      let (parent, name) = state.check_new(&path)?;
      state
        .nodes
        .insert(path.clone(), Node::file(&name, &parent, content));
      Ok(())
    })
  }

  async fn delete(&self, path: &str, db: &str) -> Result<()> {
    let path = bfspath::normalize(path)?;
    if path == "/" {
      return Err(EngineError::InvalidArgument(
        "cannot delete the root directory".into(),
      ));
    }
    let blob_ids = self.with_db_mut(db, |state| {
      state.node(&path)?;
      let mut keys = state.descendant_keys(&path);
      keys.push(path.clone());
      let mut blobs = Vec::new();
      for key in keys {
        if let Some(node) = state.nodes.remove(&key) {
          if let Some(att) = node.attachment {
            blobs.push(att.blob_id);
          }
        }
      }
      Ok(blobs)
    })?;
    for id in blob_ids {
      self.bst.delete(db, &id).await?;
    }
    Ok(())
  }

  async fn rename(&self, path: &str, new_name: &str, db: &str) -> Result<()> {
    let path = bfspath::normalize(path)?;
    if path == "/" {
      return Err(EngineError::InvalidArgument(
        "cannot rename the root directory".into(),
      ));
    }
    if !bfspath::valid_component(new_name) {
      return Err(EngineError::InvalidArgument(format!(
        "invalid name '{new_name}'"
      )));
    }
    self.with_db_mut(db, |state| {
      state.node(&path)?;
      let (parent, _) = bfspath::split(&path);
      let new_path = bfspath::join(parent, new_name);
      if new_path != path && state.nodes.contains_key(&new_path) {
        return Err(EngineError::AlreadyExists(format!("path '{new_path}'")));
      }
      let mut keys = state.descendant_keys(&path);
      keys.push(path.clone());
      let mut moved = Vec::with_capacity(keys.len());
      for key in keys {
        let mut node = state.nodes.remove(&key).unwrap();
        if key == path {
          node.name = new_name.to_string();
        } else {
          node.parent = replace_prefix(&node.parent, &path, &new_path);
        }
        moved.push((replace_prefix(&key, &path, &new_path), node));
      }
      state.nodes.extend(moved);
      Ok(())
    })
  }

  async fn move_node(&self, src: &str, dst_dir: &str, db: &str) -> Result<()> {
    let src = bfspath::normalize(src)?;
    let dst_dir = bfspath::normalize(dst_dir)?;
    if src == "/" {
      return Err(EngineError::InvalidArgument(
        "cannot move the root directory".into(),
      ));
    }
    if bfspath::is_within(&dst_dir, &src) {
      return Err(EngineError::InvalidArgument(format!(
        "cannot move '{src}' into its own subtree"
      )));
    }
    self.with_db_mut(db, |state| {
      let name = state.node(&src)?.name.clone();
      state.dir_node(&dst_dir)?;
      let new_path = bfspath::join(&dst_dir, &name);
      if state.nodes.contains_key(&new_path) {
        return Err(EngineError::AlreadyExists(format!("path '{new_path}'")));
      }
      let mut keys = state.descendant_keys(&src);
      keys.push(src.clone());
      let mut moved = Vec::with_capacity(keys.len());
      for key in keys {
        let mut node = state.nodes.remove(&key).unwrap();
        if key == src {
          node.parent = dst_dir.clone();
        } else {
          node.parent = replace_prefix(&node.parent, &src, &new_path);
        }
        moved.push((replace_prefix(&key, &src, &new_path), node));
      }
      state.nodes.extend(moved);
      Ok(())
    })
  }

  async fn copy(&self, src: &str, dst: &str, db: &str) -> Result<()> {
    let src = bfspath::normalize(src)?;
    let dst = bfspath::normalize(dst)?;
    if src == "/" {
      return Err(EngineError::InvalidArgument(
        "cannot copy the root directory".into(),
      ));
    }
    if bfspath::is_within(&dst, &src) {
      return Err(EngineError::InvalidArgument(format!(
        "cannot copy '{src}' into its own subtree"
      )));
    }

    // Snapshot the subtree under a read lock.
    let snapshot: Vec<(String, Node)> = self.with_db(db, |state| {
      state.node(&src)?;
      state.check_new(&dst)?;
      let mut keys = state.descendant_keys(&src);
      keys.push(src.clone());
      Ok(
        keys
          .into_iter()
          .map(|k| (k.clone(), state.nodes[&k].clone()))
          .collect(),
      )
    })?;

    // Duplicate attachments outside the lock. Every duplicated blob is
    // tracked so a failed commit can clean up.
    let mut duplicates: HashMap<String, Attachment> = HashMap::new();
    let mut new_blob_ids = Vec::new();
    for (key, node) in &snapshot {
      if let Some(att) = &node.attachment {
        match self.duplicate_blob(db, &att.blob_id).await {
          Ok((new_id, size)) => {
            new_blob_ids.push(new_id.clone());
            duplicates.insert(
              key.clone(),
              Attachment {
                blob_id: new_id,
                size,
                mime: att.mime.clone(),
              },
            );
          }
          Err(e) => {
            for id in &new_blob_ids {
              let _ = self.bst.delete(db, id).await;
            }
            return Err(e);
          }
        }
      }
    }

    // Commit under the write lock, re-validating the destination.
    let commit = self.with_db_mut(db, |state| {
      let (dst_parent, dst_name) = state.check_new(&dst)?;
      let now = Utc::now();
      for (key, node) in &snapshot {
        let mut copied = node.clone();
        copied.created_at = now;
        copied.attachment = duplicates.get(key).cloned();
        if key == &src {
          copied.name = dst_name.clone();
          copied.parent = dst_parent.clone();
        } else {
          copied.parent = replace_prefix(&copied.parent, &src, &dst);
        }
        state
          .nodes
          .insert(replace_prefix(key, &src, &dst), copied);
      }
      Ok(())
    });

    if let Err(e) = commit {
      for id in &new_blob_ids {
        let _ = self.bst.delete(db, id).await;
      }
      return Err(e);
    }
    Ok(())
  }

  async fn info(&self, path: &str, db: &str) -> Result<NodeInfo> {
    let path = bfspath::normalize(path)?;
    self.with_db(db, |state| {
      let node = state.node(&path)?;
      let child_count = node.is_dir().then(|| state.children(&path).len());
      Ok(NodeInfo {
        name: node.name.clone(),
        path: path.clone(),
        kind: node.kind,
        created_at: node.created_at,
        public: (!node.is_dir()).then_some(node.public),
        attachment: node.attachment.clone(),
        child_count,
      })
    })
  }

  async fn list_dir(&self, path: &str, pattern: &str, db: &str) -> Result<DirListing> {
    let path = bfspath::normalize(path)?;
    let rgx = compile_filter(pattern)?;
    self.with_db(db, |state| {
      state.dir_node(&path)?;
      let mut listing = DirListing::default();
      for (_, node) in state.children(&path) {
        if !rgx.is_match(&node.name) {
          continue;
        }
        if node.is_dir() {
          listing.dirs.push(node.name.clone());
        } else {
          listing.files.push(node.name.clone());
        }
      }
      Ok(listing)
    })
  }

  async fn read_json(&self, path: &str, db: &str, fields: &[String]) -> Result<Value> {
    let path = bfspath::normalize(path)?;
    self.with_db(db, |state| {
      let node = state.file_node(&path)?;
      Ok(Value::Object(eval::project(&node.content, fields)))
    })
  }

  async fn update_json(&self, path: &str, db: &str, content: Map<String, Value>) -> Result<()> {
    let path = bfspath::normalize(path)?;
    self.with_db_mut(db, |state| {
      let node = state.file_node_mut(&path)?;
      for (key, value) in content {
        node.content.insert(key, value);
      }
      Ok(())
    })
  }

  async fn set_public(&self, path: &str, db: &str, public: bool) -> Result<()> {
    let path = bfspath::normalize(path)?;
    self.with_db_mut(db, |state| {
      state.file_node_mut(&path)?.public = public;
      Ok(())
    })
  }

  async fn is_public(&self, path: &str, db: &str) -> Result<bool> {
    let path = bfspath::normalize(path)?;
    self.with_db(db, |state| Ok(state.file_node(&path)?.public))
  }

  async fn write_bytes(
    &self,
    path: &str,
    db: &str,
    reader: &mut (dyn AsyncRead + Send + Unpin),
    mime: &str,
  ) -> Result<Attachment> {
    let path = bfspath::normalize(path)?;
    // The node must exist before the upload starts.
    self.with_db(db, |state| {
      state.file_node(&path)?;
      Ok(())
    })?;

    let (blob_id, size) = self.bst.add(db, reader).await?;
    let attachment = Attachment {
      blob_id: blob_id.clone(),
      size,
      mime: mime.to_string(),
    };

    let previous = self.with_db_mut(db, |state| {
      let node = match state.nodes.get_mut(&path) {
        Some(n) if n.kind == NodeKind::File => n,
        // The file vanished while the upload streamed in.
        _ => return Err(EngineError::Conflict(format!("'{path}' changed during upload"))),
      };
      Ok(node.attachment.replace(attachment.clone()))
    });

    match previous {
      Ok(Some(old)) => {
        if let Err(e) = self.bst.delete(db, &old.blob_id).await {
          tracing::warn!(db, path, blob = %old.blob_id, error = %e, "stale blob not deleted");
        }
        Ok(attachment)
      }
      Ok(None) => Ok(attachment),
      Err(e) => {
        let _ = self.bst.delete(db, &blob_id).await;
        Err(e)
      }
    }
  }

  async fn read_bytes(&self, path: &str, db: &str) -> Result<String> {
    let path = bfspath::normalize(path)?;
    self.with_db(db, |state| {
      let node = state.file_node(&path)?;
      node
        .attachment
        .as_ref()
        .map(|a| a.blob_id.clone())
        .ok_or_else(|| EngineError::NotFound {
          kind: NotFoundKind::Blob,
          name: path.clone(),
        })
    })
  }

  async fn delete_bytes(&self, path: &str, db: &str) -> Result<()> {
    let path = bfspath::normalize(path)?;
    let detached = self.with_db_mut(db, |state| {
      Ok(state.file_node_mut(&path)?.attachment.take())
    })?;
    if let Some(att) = detached {
      self.bst.delete(db, &att.blob_id).await?;
    }
    Ok(())
  }

  async fn set_counter(
    &self,
    name: &str,
    action: CounterAction,
    value: i64,
    db: &str,
  ) -> Result<i64> {
    if !valid_counter_name(name) {
      return Err(EngineError::InvalidArgument(format!(
        "invalid counter name '{name}'"
      )));
    }
    self.with_db_mut(db, |state| {
      let entry = state.counters.entry(name.to_string()).or_insert(0);
      match action {
        CounterAction::Incr => *entry += value,
        CounterAction::Decr => *entry -= value,
        CounterAction::Reset => *entry = value,
      }
      Ok(*entry)
    })
  }

  async fn list_counters(&self, pattern: &str, db: &str) -> Result<Map<String, Value>> {
    let rgx = compile_filter(pattern)?;
    self.with_db(db, |state| {
      let mut names: Vec<&String> = state.counters.keys().filter(|n| rgx.is_match(n)).collect();
      names.sort();
      let mut out = Map::new();
      for name in names {
        out.insert(name.clone(), Value::from(state.counters[name]));
      }
      Ok(out)
    })
  }

  async fn search(&self, db: &str, query: &SearchQuery) -> Result<Value> {
    self.with_db(db, |state| {
      let mut rows = self.matching_files(state, &query.dirs, query.where_expr.as_ref())?;

      if let Some(sort) = &query.sort {
        rows.sort_by(|(_, a), (_, b)| {
          let va = eval::get_field(a, &sort.field);
          let vb = eval::get_field(b, &sort.field);
          let ord = compare_for_sort(va, vb);
          match sort.direction {
            SortDirection::Asc => ord,
            SortDirection::Desc => ord.reverse(),
          }
        });
      }
      if let Some(limit) = query.limit {
        rows.truncate(limit);
      }

      if query.count {
        return Ok(Value::from(rows.len() as u64));
      }
      if let Some(field) = &query.distinct {
        let mut seen = Vec::new();
        for (_, content) in &rows {
          if let Some(v) = eval::get_field(content, field) {
            if !seen.contains(v) {
              seen.push(v.clone());
            }
          }
        }
        return Ok(Value::Array(seen));
      }

      let out: Vec<Value> = rows
        .into_iter()
        .map(|(path, content)| {
          serde_json::json!({
            "path": path,
            "content": Value::Object(eval::project(&content, &query.fields)),
          })
        })
        .collect();
      Ok(Value::Array(out))
    })
  }

  async fn set_values(&self, db: &str, query: &SetQuery) -> Result<u64> {
    self.with_db_mut(db, |state| {
      let matched = collect_matching_paths(state, &query.dirs, query.where_expr.as_ref())?;
      for path in &matched {
        if let Some(node) = state.nodes.get_mut(path) {
          for (field, value) in &query.assignments {
            eval::set_field(&mut node.content, field, value.clone());
          }
        }
      }
      Ok(matched.len() as u64)
    })
  }

  async fn unset_values(&self, db: &str, query: &UnsetQuery) -> Result<u64> {
    self.with_db_mut(db, |state| {
      let matched = collect_matching_paths(state, &query.dirs, query.where_expr.as_ref())?;
      for path in &matched {
        if let Some(node) = state.nodes.get_mut(path) {
          for field in &query.fields {
            eval::unset_field(&mut node.content, field);
          }
        }
      }
      Ok(matched.len() as u64)
    })
  }
}

/// Match candidate file paths for set/unset, which need mutable access
/// afterwards and so cannot borrow the nodes while evaluating.
fn collect_matching_paths(
  state: &DbState,
  dirs: &[String],
  where_expr: Option<&crate::types::Expr>,
) -> Result<Vec<String>> {
  let mut evaluator = Evaluator::new();
  let mut seen_dirs: Vec<String> = Vec::new();
  let mut matched = Vec::new();
  for dir in dirs {
    let dir = bfspath::normalize(dir)?;
    if seen_dirs.contains(&dir) {
      continue;
    }
    state.dir_node(&dir)?;
    for (path, node) in state.children(&dir) {
      if node.is_dir() {
        continue;
      }
      let hit = match where_expr {
        Some(expr) => evaluator.matches(expr, &node.content)?,
        None => true,
      };
      if hit {
        matched.push(path.clone());
      }
    }
    seen_dirs.push(dir);
  }
  Ok(matched)
}

fn compare_for_sort(a: Option<&Value>, b: Option<&Value>) -> std::cmp::Ordering {
  use std::cmp::Ordering;
  match (a, b) {
    (None, None) => Ordering::Equal,
    // Missing fields sort last.
    (None, Some(_)) => Ordering::Greater,
    (Some(_), None) => Ordering::Less,
    (Some(x), Some(y)) => match (x.as_f64(), y.as_f64()) {
      (Some(m), Some(n)) => m.partial_cmp(&n).unwrap_or(Ordering::Equal),
      _ => match (x.as_str(), y.as_str()) {
        (Some(s), Some(t)) => s.cmp(t),
        _ => Ordering::Equal,
      },
    },
  }
}
