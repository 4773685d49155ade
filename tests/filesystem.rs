//! Filesystem tests - database lifecycle, tree CRUD, path operations,
//! counters

use std::sync::Arc;

use serde_json::{json, Map, Value};

use bytengine::bfs::{CounterAction, FileSystem, MemoryFileSystem, NodeKind};
use bytengine::bst::DiskByteStore;

async fn filesystem() -> (tempfile::TempDir, MemoryFileSystem) {
  let dir = tempfile::tempdir().unwrap();
  let bst = DiskByteStore::new(dir.path());
  bst.init().await.unwrap();
  (dir, MemoryFileSystem::new(Arc::new(bst)))
}

fn obj(value: Value) -> Map<String, Value> {
  value.as_object().unwrap().clone()
}

// =============================================================================
// Database management
// =============================================================================

#[tokio::test]
async fn database_lifecycle() {
  let (_dir, fs) = filesystem().await;
  fs.clear_all().await.unwrap();

  fs.create_database("db1").await.unwrap();
  fs.create_database("db2").await.unwrap();

  let list = fs.list_databases("").await.unwrap();
  assert_eq!(list, vec!["db1".to_string(), "db2".to_string()]);

  fs.drop_database("db2").await.unwrap();
  let list = fs.list_databases("").await.unwrap();
  assert_eq!(list, vec!["db1".to_string()]);
}

#[tokio::test]
async fn duplicate_database_rejected() {
  let (_dir, fs) = filesystem().await;
  fs.create_database("db1").await.unwrap();
  let err = fs.create_database("db1").await.unwrap_err();
  assert_eq!(err.kind(), "already_exists");
}

#[tokio::test]
async fn unknown_database_errors() {
  let (_dir, fs) = filesystem().await;
  let err = fs.new_dir("/x", "nope").await.unwrap_err();
  assert_eq!(err.kind(), "not_found");
  let err = fs.drop_database("nope").await.unwrap_err();
  assert_eq!(err.kind(), "not_found");
}

#[tokio::test]
async fn list_databases_by_regex() {
  let (_dir, fs) = filesystem().await;
  fs.create_database("app1").await.unwrap();
  fs.create_database("app2").await.unwrap();
  fs.create_database("logs").await.unwrap();
  let list = fs.list_databases("^app").await.unwrap();
  assert_eq!(list, vec!["app1".to_string(), "app2".to_string()]);
}

// =============================================================================
// Content management
// =============================================================================

#[tokio::test]
async fn content_management() {
  let (_dir, fs) = filesystem().await;
  let db = "db1";
  fs.create_database(db).await.unwrap();

  fs.new_dir("/var", db).await.unwrap();
  fs.new_dir("/var/www", db).await.unwrap();
  fs.new_file("/var/www/index.html", db, Map::new())
    .await
    .unwrap();

  fs.update_json(
    "/var/www/index.html",
    db,
    obj(json!({"title": "welcome", "body": "Hello world!"})),
  )
  .await
  .unwrap();

  let content = fs
    .read_json(
      "/var/www/index.html",
      db,
      &["title".to_string(), "body".to_string()],
    )
    .await
    .unwrap();
  assert_eq!(content["title"], json!("welcome"));
  assert_eq!(content["body"], json!("Hello world!"));

  // copy file
  fs.copy("/var/www/index.html", "/var/www/index_copy.html", db)
    .await
    .unwrap();
  let listing = fs.list_dir("/var/www", "", db).await.unwrap();
  assert_eq!(listing.files.len(), 2);

  // copy directory
  fs.copy("/var/www", "/www", db).await.unwrap();
  let listing = fs.list_dir("/www", "", db).await.unwrap();
  assert_eq!(listing.files.len(), 2);

  let content = fs
    .read_json(
      "/www/index_copy.html",
      db,
      &["title".to_string(), "body".to_string()],
    )
    .await
    .unwrap();
  assert_eq!(content["title"], json!("welcome"));
  assert_eq!(content["body"], json!("Hello world!"));
}

#[tokio::test]
async fn sibling_names_are_unique() {
  let (_dir, fs) = filesystem().await;
  let db = "db1";
  fs.create_database(db).await.unwrap();
  fs.new_dir("/a", db).await.unwrap();

  let err = fs.new_dir("/a", db).await.unwrap_err();
  assert_eq!(err.kind(), "already_exists");
  // Files and directories share the namespace.
  let err = fs.new_file("/a", db, Map::new()).await.unwrap_err();
  assert_eq!(err.kind(), "already_exists");
}

#[tokio::test]
async fn parent_must_be_an_existing_directory() {
  let (_dir, fs) = filesystem().await;
  let db = "db1";
  fs.create_database(db).await.unwrap();

  let err = fs.new_dir("/missing/child", db).await.unwrap_err();
  assert_eq!(err.kind(), "not_found");

  fs.new_file("/file", db, Map::new()).await.unwrap();
  let err = fs.new_dir("/file/child", db).await.unwrap_err();
  assert_eq!(err.kind(), "invalid_argument");
}

#[tokio::test]
async fn traversal_components_rejected() {
  let (_dir, fs) = filesystem().await;
  let db = "db1";
  fs.create_database(db).await.unwrap();
  for bad in ["/..", "/a/../b", "/a/.", "relative", "/sp ace"] {
    let err = fs.new_dir(bad, db).await.unwrap_err();
    assert_eq!(err.kind(), "invalid_argument", "{bad}");
  }
}

#[tokio::test]
async fn update_json_merges_top_level_fields() {
  let (_dir, fs) = filesystem().await;
  let db = "db1";
  fs.create_database(db).await.unwrap();
  fs.new_file("/doc", db, obj(json!({"a": 1, "nested": {"x": 1, "y": 2}})))
    .await
    .unwrap();

  // Untouched top-level keys survive; provided keys replace wholesale.
  fs.update_json("/doc", db, obj(json!({"b": 2, "nested": {"z": 3}})))
    .await
    .unwrap();
  let content = fs.read_json("/doc", db, &[]).await.unwrap();
  assert_eq!(
    content,
    json!({"a": 1, "b": 2, "nested": {"z": 3}})
  );
}

#[tokio::test]
async fn read_json_full_and_projected() {
  let (_dir, fs) = filesystem().await;
  let db = "db1";
  fs.create_database(db).await.unwrap();
  fs.new_file(
    "/doc",
    db,
    obj(json!({"a": 1, "b": {"c": 2, "d": 3}})),
  )
  .await
  .unwrap();

  let all = fs.read_json("/doc", db, &[]).await.unwrap();
  assert_eq!(all, json!({"a": 1, "b": {"c": 2, "d": 3}}));

  let partial = fs
    .read_json("/doc", db, &["b.c".to_string(), "missing".to_string()])
    .await
    .unwrap();
  assert_eq!(partial, json!({"b": {"c": 2}}));

  let err = fs.read_json("/nope", db, &[]).await.unwrap_err();
  assert_eq!(err.kind(), "not_found");
}

// =============================================================================
// Path operations
// =============================================================================

#[tokio::test]
async fn delete_is_recursive_and_protects_root() {
  let (_dir, fs) = filesystem().await;
  let db = "db1";
  fs.create_database(db).await.unwrap();
  fs.new_dir("/var", db).await.unwrap();
  fs.new_dir("/var/www", db).await.unwrap();
  fs.new_file("/var/www/index.html", db, Map::new())
    .await
    .unwrap();

  let err = fs.delete("/", db).await.unwrap_err();
  assert_eq!(err.kind(), "invalid_argument");

  fs.delete("/var", db).await.unwrap();
  assert_eq!(
    fs.info("/var", db).await.unwrap_err().kind(),
    "not_found"
  );
  assert_eq!(
    fs.info("/var/www/index.html", db).await.unwrap_err().kind(),
    "not_found"
  );
  // Root is still there.
  let root = fs.info("/", db).await.unwrap();
  assert_eq!(root.kind, NodeKind::Dir);
}

#[tokio::test]
async fn rename_rewrites_descendants() {
  let (_dir, fs) = filesystem().await;
  let db = "db1";
  fs.create_database(db).await.unwrap();
  fs.new_dir("/old", db).await.unwrap();
  fs.new_dir("/old/sub", db).await.unwrap();
  fs.new_file("/old/sub/doc", db, obj(json!({"k": 1})))
    .await
    .unwrap();

  fs.rename("/old", "fresh", db).await.unwrap();
  assert_eq!(fs.info("/old", db).await.unwrap_err().kind(), "not_found");
  let content = fs.read_json("/fresh/sub/doc", db, &[]).await.unwrap();
  assert_eq!(content, json!({"k": 1}));

  // Renaming over an existing sibling is rejected.
  fs.new_dir("/other", db).await.unwrap();
  let err = fs.rename("/fresh", "other", db).await.unwrap_err();
  assert_eq!(err.kind(), "already_exists");
}

#[tokio::test]
async fn move_reroots_subtree() {
  let (_dir, fs) = filesystem().await;
  let db = "db1";
  fs.create_database(db).await.unwrap();
  fs.new_dir("/src", db).await.unwrap();
  fs.new_dir("/src/child", db).await.unwrap();
  fs.new_file("/src/child/doc", db, obj(json!({"k": 1})))
    .await
    .unwrap();
  fs.new_dir("/dst", db).await.unwrap();

  fs.move_node("/src/child", "/dst", db).await.unwrap();
  assert_eq!(
    fs.info("/src/child", db).await.unwrap_err().kind(),
    "not_found"
  );
  let content = fs.read_json("/dst/child/doc", db, &[]).await.unwrap();
  assert_eq!(content, json!({"k": 1}));

  // Destination must be a directory, and not inside the source.
  fs.new_file("/plain", db, Map::new()).await.unwrap();
  let err = fs.move_node("/dst", "/plain", db).await.unwrap_err();
  assert_eq!(err.kind(), "invalid_argument");
  let err = fs.move_node("/dst", "/dst/child", db).await.unwrap_err();
  assert_eq!(err.kind(), "invalid_argument");
}

#[tokio::test]
async fn info_reports_metadata() {
  let (_dir, fs) = filesystem().await;
  let db = "db1";
  fs.create_database(db).await.unwrap();
  fs.new_dir("/docs", db).await.unwrap();
  fs.new_file("/docs/a", db, Map::new()).await.unwrap();
  fs.new_file("/docs/b", db, Map::new()).await.unwrap();

  let dir_info = fs.info("/docs", db).await.unwrap();
  assert_eq!(dir_info.kind, NodeKind::Dir);
  assert_eq!(dir_info.child_count, Some(2));
  assert!(dir_info.attachment.is_none());

  let file_info = fs.info("/docs/a", db).await.unwrap();
  assert_eq!(file_info.kind, NodeKind::File);
  assert_eq!(file_info.public, Some(false));
  assert_eq!(file_info.child_count, None);
}

#[tokio::test]
async fn listdir_filters_by_regex() {
  let (_dir, fs) = filesystem().await;
  let db = "db1";
  fs.create_database(db).await.unwrap();
  fs.new_dir("/d", db).await.unwrap();
  fs.new_dir("/d/assets", db).await.unwrap();
  fs.new_file("/d/index.html", db, Map::new()).await.unwrap();
  fs.new_file("/d/about.html", db, Map::new()).await.unwrap();
  fs.new_file("/d/notes.txt", db, Map::new()).await.unwrap();

  let listing = fs.list_dir("/d", r"\.html$", db).await.unwrap();
  assert_eq!(listing.dirs, Vec::<String>::new());
  assert_eq!(
    listing.files,
    vec!["about.html".to_string(), "index.html".to_string()]
  );

  let listing = fs.list_dir("/d", "", db).await.unwrap();
  assert_eq!(listing.dirs, vec!["assets".to_string()]);
  assert_eq!(listing.files.len(), 3);
}

#[tokio::test]
async fn visibility_flag_round_trips() {
  let (_dir, fs) = filesystem().await;
  let db = "db1";
  fs.create_database(db).await.unwrap();
  fs.new_file("/page", db, Map::new()).await.unwrap();

  assert!(!fs.is_public("/page", db).await.unwrap());
  fs.set_public("/page", db, true).await.unwrap();
  assert!(fs.is_public("/page", db).await.unwrap());
  fs.set_public("/page", db, false).await.unwrap();
  assert!(!fs.is_public("/page", db).await.unwrap());

  // Directories carry no visibility flag.
  fs.new_dir("/dir", db).await.unwrap();
  assert_eq!(
    fs.set_public("/dir", db, true).await.unwrap_err().kind(),
    "invalid_argument"
  );
}

// =============================================================================
// Counters
// =============================================================================

#[tokio::test]
async fn counter_actions() {
  let (_dir, fs) = filesystem().await;
  let db = "db1";
  fs.create_database(db).await.unwrap();

  let val = fs
    .set_counter("users", CounterAction::Incr, 1, db)
    .await
    .unwrap();
  assert_eq!(val, 1);
  let val = fs
    .set_counter("users", CounterAction::Decr, 1, db)
    .await
    .unwrap();
  assert_eq!(val, 0);
  let val = fs
    .set_counter("users", CounterAction::Reset, 5, db)
    .await
    .unwrap();
  assert_eq!(val, 5);

  fs.set_counter("user1.likes", CounterAction::Incr, 1, db)
    .await
    .unwrap();
  fs.set_counter("car.users", CounterAction::Incr, 1, db)
    .await
    .unwrap();

  let list = fs.list_counters("", db).await.unwrap();
  assert_eq!(list.len(), 3);

  let list = fs.list_counters("^user", db).await.unwrap();
  assert_eq!(list.len(), 2);
  assert_eq!(list["users"], json!(5));
  assert_eq!(list["user1.likes"], json!(1));
}

#[tokio::test]
async fn drop_database_clears_counters() {
  let (_dir, fs) = filesystem().await;
  fs.create_database("db1").await.unwrap();
  fs.set_counter("c", CounterAction::Incr, 3, "db1")
    .await
    .unwrap();
  fs.drop_database("db1").await.unwrap();
  fs.create_database("db1").await.unwrap();
  // A recreated database starts from scratch.
  let val = fs
    .set_counter("c", CounterAction::Incr, 1, "db1")
    .await
    .unwrap();
  assert_eq!(val, 1);
}
