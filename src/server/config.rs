use serde::{Deserialize, Serialize};
use std::path::Path;

/// Substitute `$NAME` and `${NAME}` references with environment
/// variables in a single forward scan. Unset variables expand to the
/// empty string; a `$` that does not introduce a name is kept as-is.
fn substitute_env(raw: &str) -> String {
  let mut out = String::with_capacity(raw.len());
  let mut rest = raw;
  while let Some(dollar) = rest.find('$') {
    out.push_str(&rest[..dollar]);
    rest = &rest[dollar + 1..];

    let braced = rest.starts_with('{');
    let body = if braced { &rest[1..] } else { rest };
    let name_len = body
      .chars()
      .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
      .count();
    let name = &body[..name_len];

    if braced && name_len > 0 && body[name_len..].starts_with('}') {
      out.push_str(&std::env::var(name).unwrap_or_default());
      rest = &body[name_len + 1..];
    } else if !braced && name_len > 0 {
      out.push_str(&std::env::var(name).unwrap_or_default());
      rest = &body[name_len..];
    } else {
      out.push('$');
    }
  }
  out.push_str(rest);
  out
}

/// Top-level server configuration: one section per pluggable subsystem,
/// plus the server-level knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub authentication: AuthSection,
  #[serde(default)]
  pub filesystem: PluginSection,
  #[serde(default)]
  pub statestore: PluginSection,
  #[serde(default)]
  pub bytestore: ByteStoreSection,
  #[serde(default)]
  pub datafilter: DataFilterSection,
  #[serde(default)]
  pub parser: ParserSection,
  #[serde(default = "default_workers")]
  pub workers: usize,
  #[serde(default = "default_port")]
  pub port: u16,
  #[serde(default = "default_address")]
  pub address: String,
  #[serde(default)]
  pub timeout: TimeoutSection,
  #[serde(default)]
  pub logging: LoggingSection,
  /// Optional bootstrap root account created at startup if absent.
  #[serde(default)]
  pub admin: Option<AdminSection>,
}

fn default_workers() -> usize {
  4
}
fn default_port() -> u16 {
  8500
}
fn default_address() -> String {
  "0.0.0.0".into()
}

impl Default for Config {
  fn default() -> Self {
    Self {
      authentication: AuthSection::default(),
      filesystem: PluginSection::default(),
      statestore: PluginSection::default(),
      bytestore: ByteStoreSection::default(),
      datafilter: DataFilterSection::default(),
      parser: ParserSection::default(),
      workers: default_workers(),
      port: default_port(),
      address: default_address(),
      timeout: TimeoutSection::default(),
      logging: LoggingSection::default(),
      admin: None,
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginSection {
  #[serde(default = "default_memory_plugin")]
  pub plugin: String,
}

fn default_memory_plugin() -> String {
  "memory".into()
}

impl Default for PluginSection {
  fn default() -> Self {
    Self {
      plugin: default_memory_plugin(),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSection {
  #[serde(default = "default_memory_plugin")]
  pub plugin: String,
}

impl Default for AuthSection {
  fn default() -> Self {
    Self {
      plugin: default_memory_plugin(),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ByteStoreSection {
  #[serde(default = "default_bst_plugin")]
  pub plugin: String,
  #[serde(default = "default_bst_rootdir")]
  pub rootdir: String,
}

fn default_bst_plugin() -> String {
  "disk".into()
}
fn default_bst_rootdir() -> String {
  "./data/bst".into()
}

impl Default for ByteStoreSection {
  fn default() -> Self {
    Self {
      plugin: default_bst_plugin(),
      rootdir: default_bst_rootdir(),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataFilterSection {
  #[serde(default = "default_core_plugin")]
  pub plugin: String,
}

fn default_core_plugin() -> String {
  "core".into()
}

impl Default for DataFilterSection {
  fn default() -> Self {
    Self {
      plugin: default_core_plugin(),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParserSection {
  #[serde(default = "default_parser_plugin")]
  pub plugin: String,
}

fn default_parser_plugin() -> String {
  "base".into()
}

impl Default for ParserSection {
  fn default() -> Self {
    Self {
      plugin: default_parser_plugin(),
    }
  }
}

/// TTLs in seconds; the request timeout bounds a whole script run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutSection {
  #[serde(default = "default_token_ttl")]
  pub authtoken: u64,
  #[serde(default = "default_ticket_ttl")]
  pub uploadticket: u64,
  #[serde(default = "default_request_timeout")]
  pub request: u64,
}

fn default_token_ttl() -> u64 {
  60
}
fn default_ticket_ttl() -> u64 {
  60
}
fn default_request_timeout() -> u64 {
  30
}

impl Default for TimeoutSection {
  fn default() -> Self {
    Self {
      authtoken: default_token_ttl(),
      uploadticket: default_ticket_ttl(),
      request: default_request_timeout(),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
  /// Default tracing filter when RUST_LOG is not set.
  #[serde(default = "default_log_level")]
  pub level: String,
}

fn default_log_level() -> String {
  "info".into()
}

impl Default for LoggingSection {
  fn default() -> Self {
    Self {
      level: default_log_level(),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminSection {
  pub username: String,
  pub password: String,
}

impl Config {
  pub fn from_file(path: impl AsRef<Path>) -> Result<Self, anyhow::Error> {
    Self::from_json(&std::fs::read_to_string(path)?)
  }

  pub fn from_json(content: &str) -> Result<Self, anyhow::Error> {
    let expanded = substitute_env(content);
    Ok(serde_json::from_str(&expanded)?)
  }

  pub fn find_and_load() -> Result<Option<Self>, anyhow::Error> {
    for candidate in ["bytengine.json", "config.json"] {
      if Path::new(candidate).exists() {
        tracing::info!(path = candidate, "found config file");
        return Ok(Some(Self::from_file(candidate)?));
      }
    }
    Ok(None)
  }

  pub fn bind_address(&self) -> String {
    format!("{}:{}", self.address, self.port)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_fill_missing_sections() {
    let config = Config::from_json("{}").unwrap();
    assert_eq!(config.workers, 4);
    assert_eq!(config.port, 8500);
    assert_eq!(config.filesystem.plugin, "memory");
    assert_eq!(config.bytestore.plugin, "disk");
    assert_eq!(config.timeout.authtoken, 60);
    assert!(config.admin.is_none());
  }

  #[test]
  fn parses_full_config() {
    let config = Config::from_json(
      r#"{
        "authentication": {"plugin": "memory"},
        "filesystem": {"plugin": "memory"},
        "statestore": {"plugin": "memory"},
        "bytestore": {"plugin": "disk", "rootdir": "/tmp/bst"},
        "datafilter": {"plugin": "core"},
        "parser": {"plugin": "base"},
        "workers": 8,
        "port": 9000,
        "address": "127.0.0.1",
        "timeout": {"authtoken": 120, "uploadticket": 30, "request": 10},
        "admin": {"username": "admin", "password": "changeme1"}
      }"#,
    )
    .unwrap();
    assert_eq!(config.workers, 8);
    assert_eq!(config.bind_address(), "127.0.0.1:9000");
    assert_eq!(config.bytestore.rootdir, "/tmp/bst");
    assert_eq!(config.timeout.uploadticket, 30);
    assert_eq!(config.admin.unwrap().username, "admin");
  }

  #[test]
  fn expands_environment_variables() {
    std::env::set_var("BYTENGINE_TEST_ROOT", "/var/data");
    let config =
      Config::from_json(r#"{"bytestore": {"rootdir": "${BYTENGINE_TEST_ROOT}/bst"}}"#).unwrap();
    assert_eq!(config.bytestore.rootdir, "/var/data/bst");
  }

  #[test]
  fn env_substitution_edge_cases() {
    std::env::set_var("BYTENGINE_TEST_VAR", "value");
    assert_eq!(substitute_env("$BYTENGINE_TEST_VAR"), "value");
    assert_eq!(substitute_env("a${BYTENGINE_TEST_VAR}b"), "avalueb");
    assert_eq!(substitute_env("$BYTENGINE_TEST_UNSET_X/y"), "/y");
    // A dollar that introduces no name passes through untouched.
    assert_eq!(substitute_env("cost: 5$"), "cost: 5$");
    assert_eq!(substitute_env("${"), "${");
    assert_eq!(substitute_env("${}"), "${}");
  }
}
