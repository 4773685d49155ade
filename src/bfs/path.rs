use crate::error::{EngineError, Result};

/// Path rules: POSIX-style, absolute, `/` is the root. Components are
/// limited to `[A-Za-z0-9_.-]+`, with `.` and `..` rejected outright so
/// no traversal is expressible.
pub fn valid_component(name: &str) -> bool {
  !name.is_empty()
    && name != "."
    && name != ".."
    && name
      .chars()
      .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

/// Validate and normalize a path. Accepts a trailing slash but returns
/// the canonical form without one (except the root itself).
pub fn normalize(path: &str) -> Result<String> {
  if !path.starts_with('/') {
    return Err(EngineError::InvalidArgument(format!(
      "path '{path}' must be absolute"
    )));
  }
  if path == "/" {
    return Ok("/".to_string());
  }
  let trimmed = path.strip_suffix('/').unwrap_or(path);
  for comp in trimmed[1..].split('/') {
    if !valid_component(comp) {
      return Err(EngineError::InvalidArgument(format!(
        "path '{path}' has invalid component '{comp}'"
      )));
    }
  }
  Ok(trimmed.to_string())
}

/// Split a normalized non-root path into `(parent, name)`.
pub fn split(path: &str) -> (&str, &str) {
  match path.rfind('/') {
    Some(0) => ("/", &path[1..]),
    Some(i) => (&path[..i], &path[i + 1..]),
    None => ("/", path),
  }
}

/// Join a normalized directory path with a child name.
pub fn join(parent: &str, name: &str) -> String {
  if parent == "/" {
    format!("/{name}")
  } else {
    format!("{parent}/{name}")
  }
}

/// True if `candidate` equals `root` or lies underneath it.
pub fn is_within(candidate: &str, root: &str) -> bool {
  if root == "/" {
    return true;
  }
  candidate == root || candidate.starts_with(&format!("{root}/"))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn normalizes_valid_paths() {
    assert_eq!(normalize("/").unwrap(), "/");
    assert_eq!(normalize("/var/www").unwrap(), "/var/www");
    assert_eq!(normalize("/var/www/").unwrap(), "/var/www");
    assert_eq!(normalize("/a-b_c.d").unwrap(), "/a-b_c.d");
  }

  #[test]
  fn rejects_bad_paths() {
    assert!(normalize("relative").is_err());
    assert!(normalize("//double").is_err());
    assert!(normalize("/has space").is_err());
    assert!(normalize("/a/../b").is_err());
    assert!(normalize("/a/./b").is_err());
  }

  #[test]
  fn split_and_join_invert() {
    assert_eq!(split("/var/www"), ("/var", "www"));
    assert_eq!(split("/var"), ("/", "var"));
    assert_eq!(join("/", "var"), "/var");
    assert_eq!(join("/var", "www"), "/var/www");
  }

  #[test]
  fn within_checks_prefix_by_component() {
    assert!(is_within("/a/b", "/a"));
    assert!(is_within("/a", "/a"));
    assert!(!is_within("/ab", "/a"));
    assert!(is_within("/a", "/"));
  }
}
