//! BQL search, set and unset over the in-memory filesystem, driven
//! through the parser exactly as the engine would.

use std::sync::Arc;

use serde_json::{json, Map, Value};

use bytengine::bfs::{FileSystem, MemoryFileSystem};
use bytengine::bst::DiskByteStore;
use bytengine::parser::parse_script;
use bytengine::types::{SearchQuery, SetQuery, UnsetQuery};

fn obj(value: Value) -> Map<String, Value> {
  value.as_object().unwrap().clone()
}

async fn users_fixture() -> (tempfile::TempDir, MemoryFileSystem) {
  let dir = tempfile::tempdir().unwrap();
  let bst = DiskByteStore::new(dir.path());
  bst.init().await.unwrap();
  let fs = MemoryFileSystem::new(Arc::new(bst));

  let db = "db1";
  fs.create_database(db).await.unwrap();
  fs.new_dir("/users", db).await.unwrap();
  fs.new_file(
    "/users/u1",
    db,
    obj(json!({"name": "john", "age": 34, "country": "ghana"})),
  )
  .await
  .unwrap();
  fs.new_file(
    "/users/u2",
    db,
    obj(json!({"name": "jason", "age": 18, "country": "ghana"})),
  )
  .await
  .unwrap();
  fs.new_file("/users/u3", db, obj(json!({"name": "juliette", "age": 18})))
    .await
    .unwrap();
  fs.new_file(
    "/users/u4",
    db,
    obj(json!({"name": "michelle", "age": 21, "country": "uk"})),
  )
  .await
  .unwrap();
  fs.new_file(
    "/users/u5",
    db,
    obj(json!({"name": "dennis", "age": 22, "country": "france"})),
  )
  .await
  .unwrap();
  (dir, fs)
}

fn search_query(script: &str) -> SearchQuery {
  let cmds = parse_script(script).unwrap();
  serde_json::from_value(cmds[0].args["query"].clone()).unwrap()
}

fn set_query(script: &str) -> SetQuery {
  let cmds = parse_script(script).unwrap();
  serde_json::from_value(cmds[0].args["query"].clone()).unwrap()
}

fn unset_query(script: &str) -> UnsetQuery {
  let cmds = parse_script(script).unwrap();
  serde_json::from_value(cmds[0].args["query"].clone()).unwrap()
}

// =============================================================================
// select
// =============================================================================

#[tokio::test]
async fn search_by_membership() {
  let (_dir, fs) = users_fixture().await;
  let query = search_query(r#"@test.select "name" "age" in /users where "country" in ["ghana"]"#);
  let rows = fs.search("db1", &query).await.unwrap();
  let rows = rows.as_array().unwrap();
  assert_eq!(rows.len(), 2);
  for row in rows {
    let content = &row["content"];
    assert!(content.get("name").is_some());
    assert!(content.get("age").is_some());
    assert!(content.get("country").is_none(), "projection leaked a field");
  }
}

#[tokio::test]
async fn search_by_regex() {
  let (_dir, fs) = users_fixture().await;
  let query = search_query(
    r#"
    @test.select "name" "age" in /users
    where regex("name","i") == "^j\\w*n$"
  "#,
  );
  let rows = fs.search("db1", &query).await.unwrap();
  // john and jason match, juliette does not.
  assert_eq!(rows.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn search_by_exists() {
  let (_dir, fs) = users_fixture().await;
  let query = search_query(
    r#"
    @test.select "name" "age" in /users
    where exists("country") == true
  "#,
  );
  let rows = fs.search("db1", &query).await.unwrap();
  assert_eq!(rows.as_array().unwrap().len(), 4);
}

#[tokio::test]
async fn search_count() {
  let (_dir, fs) = users_fixture().await;
  let query = search_query(r#"@test.select "name" "age" in /users count"#);
  let count = fs.search("db1", &query).await.unwrap();
  assert_eq!(count, json!(5));
}

#[tokio::test]
async fn search_with_comparison_operators() {
  let (_dir, fs) = users_fixture().await;
  let query = search_query(r#"@test.select "name" in /users where "age" >= 21 count"#);
  assert_eq!(fs.search("db1", &query).await.unwrap(), json!(3));

  let query =
    search_query(r#"@test.select "name" in /users where "age" == 18 && "country" == "ghana" count"#);
  assert_eq!(fs.search("db1", &query).await.unwrap(), json!(1));

  let query = search_query(
    r#"@test.select "name" in /users where "country" == "uk" || "country" == "france" count"#,
  );
  assert_eq!(fs.search("db1", &query).await.unwrap(), json!(2));
}

#[tokio::test]
async fn search_sort_and_limit() {
  let (_dir, fs) = users_fixture().await;
  let query = search_query(r#"@test.select "name" in /users sort "age" desc limit 2"#);
  let rows = fs.search("db1", &query).await.unwrap();
  let names: Vec<&str> = rows
    .as_array()
    .unwrap()
    .iter()
    .map(|r| r["content"]["name"].as_str().unwrap())
    .collect();
  assert_eq!(names, vec!["john", "dennis"]);
}

#[tokio::test]
async fn search_distinct_values() {
  let (_dir, fs) = users_fixture().await;
  let query = search_query(r#"@test.select "country" in /users distinct "country""#);
  let values = fs.search("db1", &query).await.unwrap();
  let mut values: Vec<String> = values
    .as_array()
    .unwrap()
    .iter()
    .map(|v| v.as_str().unwrap().to_string())
    .collect();
  values.sort();
  assert_eq!(values, vec!["france", "ghana", "uk"]);
}

#[tokio::test]
async fn search_is_non_recursive() {
  let (_dir, fs) = users_fixture().await;
  let db = "db1";
  fs.new_dir("/users/archive", db).await.unwrap();
  fs.new_file(
    "/users/archive/old",
    db,
    obj(json!({"name": "zed", "age": 99})),
  )
  .await
  .unwrap();

  // Only files directly inside /users are candidates.
  let query = search_query(r#"@test.select "name" in /users count"#);
  assert_eq!(fs.search(db, &query).await.unwrap(), json!(5));

  // Naming both directories unions their files.
  let query = search_query(r#"@test.select "name" in /users /users/archive count"#);
  assert_eq!(fs.search(db, &query).await.unwrap(), json!(6));
}

#[tokio::test]
async fn search_missing_directory_errors() {
  let (_dir, fs) = users_fixture().await;
  let query = search_query(r#"@test.select "name" in /nowhere"#);
  let err = fs.search("db1", &query).await.unwrap_err();
  assert_eq!(err.kind(), "not_found");
}

// =============================================================================
// set / unset
// =============================================================================

#[tokio::test]
async fn set_and_unset_round_trip() {
  let (_dir, fs) = users_fixture().await;
  let db = "db1";

  let query = set_query(
    r#"
    @test.set "country"={"name":"ghana","major_cities":["kumasi","accra"]}
    in /users
    where "country" == "ghana"
  "#,
  );
  let count = fs.set_values(db, &query).await.unwrap();
  assert_eq!(count, 2);

  let content = fs.read_json("/users/u1", db, &[]).await.unwrap();
  assert_eq!(content["country"]["name"], json!("ghana"));
  assert_eq!(
    content["country"]["major_cities"],
    json!(["kumasi", "accra"])
  );

  let query = unset_query(
    r#"
    @test.unset "country"
    in /users
    where exists("country") == true
  "#,
  );
  let count = fs.unset_values(db, &query).await.unwrap();
  assert_eq!(count, 4);

  let query = search_query(r#"@test.select "name" in /users where exists("country") == false"#);
  let rows = fs.search(db, &query).await.unwrap();
  assert_eq!(rows.as_array().unwrap().len(), 5);
}

#[tokio::test]
async fn set_creates_nested_fields() {
  let (_dir, fs) = users_fixture().await;
  let db = "db1";
  let query = set_query(r#"@test.set "address.city"="accra" in /users where "name" == "john""#);
  assert_eq!(fs.set_values(db, &query).await.unwrap(), 1);
  let content = fs.read_json("/users/u1", db, &[]).await.unwrap();
  assert_eq!(content["address"]["city"], json!("accra"));
}

#[tokio::test]
async fn set_without_where_touches_every_file() {
  let (_dir, fs) = users_fixture().await;
  let db = "db1";
  let query = set_query(r#"@test.set "seen"=true in /users"#);
  assert_eq!(fs.set_values(db, &query).await.unwrap(), 5);
  let query = search_query(r#"@test.select "name" in /users where "seen" == true count"#);
  assert_eq!(fs.search(db, &query).await.unwrap(), json!(5));
}
