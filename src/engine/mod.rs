//! The orchestrator: owns one instance of every subsystem, the frozen
//! handler and filter registries, and the worker pool that executes
//! submitted scripts.

mod handlers;

use std::collections::HashMap;
use std::future::Future;
use std::num::NonZeroUsize;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use lru::LruCache;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::auth::Authentication;
use crate::bfs::FileSystem;
use crate::bst::ByteStore;
use crate::error::{EngineError, NotFoundKind, Result};
use crate::filters::FilterRegistry;
use crate::parser;
use crate::state::{StateStore, UploadTicket};
use crate::types::{Command, Response, User};

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<serde_json::Value>> + Send>>;
/// A command handler: `(engine, command, user) -> value`.
pub type Handler = fn(Arc<Engine>, Command, User) -> HandlerFuture;

const PARSE_CACHE_SIZE: usize = 1024;

/// Engine-level knobs, distilled from the server configuration.
#[derive(Debug, Clone)]
pub struct EngineSettings {
  pub workers: usize,
  /// Per-request deadline applied by the workers.
  pub request_timeout: Duration,
  /// Auth token TTL in seconds.
  pub auth_token_ttl: u64,
  /// Upload ticket TTL in seconds.
  pub upload_ticket_ttl: u64,
}

impl Default for EngineSettings {
  fn default() -> Self {
    Self {
      workers: 4,
      request_timeout: Duration::from_secs(30),
      auth_token_ttl: 60,
      upload_ticket_ttl: 60,
    }
  }
}

struct Job {
  script: String,
  user: User,
  reply: oneshot::Sender<Response>,
}

pub struct Engine {
  pub filesystem: Arc<dyn FileSystem>,
  pub bytestore: Arc<dyn ByteStore>,
  pub authentication: Arc<dyn Authentication>,
  pub statestore: Arc<dyn StateStore>,
  settings: EngineSettings,
  handlers: HashMap<&'static str, Handler>,
  filters: FilterRegistry,
  parse_cache: Mutex<LruCache<String, Vec<Command>>>,
  job_tx: mpsc::UnboundedSender<Job>,
  // Handlers receive an owned `Arc<Engine>`; this backlink hands it out
  // from `&self` methods.
  weak_self: std::sync::Weak<Engine>,
}

impl Engine {
  /// Assemble an engine over the chosen backends and start its worker
  /// pool. Registries are populated here and never change afterwards.
  pub fn new(
    filesystem: Arc<dyn FileSystem>,
    bytestore: Arc<dyn ByteStore>,
    authentication: Arc<dyn Authentication>,
    statestore: Arc<dyn StateStore>,
    settings: EngineSettings,
  ) -> Arc<Self> {
    let (job_tx, job_rx) = mpsc::unbounded_channel();
    let engine = Arc::new_cyclic(|weak| Self {
      filesystem,
      bytestore,
      authentication,
      statestore,
      handlers: handlers::registry(),
      filters: FilterRegistry::builtin(),
      parse_cache: Mutex::new(LruCache::new(
        NonZeroUsize::new(PARSE_CACHE_SIZE).unwrap(),
      )),
      job_tx,
      settings,
      weak_self: weak.clone(),
    });

    let workers = engine.settings.workers.max(1);
    let shared_rx = Arc::new(tokio::sync::Mutex::new(job_rx));
    for id in 0..workers {
      let engine = engine.clone();
      let rx = shared_rx.clone();
      tokio::spawn(async move {
        worker_loop(engine, rx, id).await;
      });
    }
    tracing::info!(workers, "engine worker pool started");
    engine
  }

  pub fn settings(&self) -> &EngineSettings {
    &self.settings
  }

  fn strong(&self) -> Arc<Engine> {
    // `&self` can only exist while the Arc this engine lives in does.
    self.weak_self.upgrade().expect("engine dropped while in use")
  }

  /// Parse a script, reusing cached command lists for repeated scripts.
  pub fn parse(&self, script: &str) -> Result<Vec<Command>> {
    {
      let mut cache = self.parse_cache.lock();
      if let Some(commands) = cache.get(script) {
        return Ok(commands.clone());
      }
    }
    let commands = parser::parse_script(script)?;
    self
      .parse_cache
      .lock()
      .put(script.to_string(), commands.clone());
    Ok(commands)
  }

  /// Queue a script for the worker pool and await its response.
  pub async fn submit_script(&self, script: impl Into<String>, user: User) -> Response {
    let (reply, rx) = oneshot::channel();
    let job = Job {
      script: script.into(),
      user,
      reply,
    };
    if self.job_tx.send(job).is_err() {
      return Response::error("internal error: worker pool is gone");
    }
    match rx.await {
      Ok(response) => response,
      Err(_) => Response::error("internal error: worker dropped the reply"),
    }
  }

  /// Execute a script inline: commands run sequentially in source
  /// order, short-circuiting on the first error. The response is that
  /// of the last command.
  pub async fn run_script(&self, script: &str, user: &User) -> Response {
    let commands = match self.parse(script) {
      Ok(commands) => commands,
      Err(e) => return e.into(),
    };
    let mut last = Response::ok(serde_json::Value::Null);
    for command in commands {
      last = self.run_command(command, user).await;
      if !last.is_ok() {
        return last;
      }
    }
    last
  }

  /// Dispatch one command: dry-run printing, registry lookup,
  /// authorization, handler invocation, then the filter chain.
  pub async fn run_command(&self, command: Command, user: &User) -> Response {
    if command.sign {
      return match serde_json::to_value(&command) {
        Ok(v) => Response::ok(v),
        Err(e) => Response::error(format!("internal error: {e}")),
      };
    }

    let Some(&handler) = self.handlers.get(command.name.as_str()) else {
      return EngineError::UnknownCommand(command.name.clone()).into();
    };
    if let Err(e) = authorize(&command, user) {
      return e.into();
    }

    let filters = command.filters.clone();
    let name = command.name.clone();
    let result = handler(self.strong(), command, user.clone()).await;
    let mut value = match result {
      Ok(v) => v,
      Err(e) => {
        tracing::debug!(command = %name, kind = e.kind(), "command failed: {e}");
        return e.into();
      }
    };

    for spec in &filters {
      let filter = match self.filters.get(&spec.name) {
        Ok(f) => f,
        Err(e) => return e.into(),
      };
      value = match filter(&value, &spec.args) {
        Ok(v) => v,
        Err(e) => return e.into(),
      };
    }
    Response::ok(value)
  }

  // -----------------------------------------------------------------------
  // Sessions and tickets
  // -----------------------------------------------------------------------

  /// Exchange credentials for a bearer token with the configured TTL.
  pub async fn login(&self, username: &str, password: &str) -> Result<String> {
    let user = self.authentication.authenticate(username, password).await?;
    let token = Uuid::new_v4().to_string();
    self
      .statestore
      .token_set(&token_digest(&token), &user.username, self.settings.auth_token_ttl)
      .await?;
    Ok(token)
  }

  /// Resolve a bearer token back to its user.
  pub async fn authenticate_token(&self, token: &str) -> Result<User> {
    let username = self
      .statestore
      .token_get(&token_digest(token))
      .await?
      .ok_or(EngineError::NotFound {
        kind: NotFoundKind::Token,
        name: "token".into(),
      })?;
    let user = self.authentication.user_info(&username).await?;
    if !user.active {
      return Err(EngineError::Unauthorized("account is deactivated".into()));
    }
    Ok(user)
  }

  /// Mint a one-shot upload ticket for `@db.writebytes`.
  pub async fn create_upload_ticket(&self, db: &str, path: &str, username: &str) -> Result<String> {
    let ticket = Uuid::new_v4().to_string();
    let info = UploadTicket {
      database: db.to_string(),
      path: path.to_string(),
      username: username.to_string(),
    };
    self
      .statestore
      .ticket_set(&ticket, &info, self.settings.upload_ticket_ttl)
      .await?;
    Ok(ticket)
  }

  /// Redeem (and consume) an upload ticket.
  pub async fn take_upload_ticket(&self, ticket: &str) -> Result<UploadTicket> {
    self
      .statestore
      .ticket_take(ticket)
      .await?
      .ok_or(EngineError::NotFound {
        kind: NotFoundKind::Ticket,
        name: "upload ticket".into(),
      })
  }

  /// Create the configured root account if it does not exist yet.
  pub async fn ensure_root_user(&self, username: &str, password: &str) -> Result<()> {
    match self.authentication.user_info(username).await {
      Ok(_) => Ok(()),
      Err(EngineError::NotFound { .. }) => {
        tracing::info!(username, "creating bootstrap root user");
        self.authentication.new_user(username, password, true).await
      }
      Err(e) => Err(e),
    }
  }
}

fn token_digest(token: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(token.as_bytes());
  hex::encode(hasher.finalize())
}

/// Non-root users may only run commands outside the administrative
/// namespaces (`user.*` except `whoami`, `server.*`, `database.*`), and
/// only against databases they have been granted.
fn authorize(command: &Command, user: &User) -> Result<()> {
  if !user.active {
    return Err(EngineError::Unauthorized("account is deactivated".into()));
  }
  if user.root {
    return Ok(());
  }
  if command.name == "user.whoami" {
    return Ok(());
  }
  if command.name.contains('.') {
    return Err(EngineError::Unauthorized(format!(
      "'{}' requires root access",
      command.name
    )));
  }
  match &command.database {
    Some(db) if user.has_database(db) => Ok(()),
    Some(db) => Err(EngineError::Unauthorized(format!(
      "no access to database '{db}'"
    ))),
    None => Ok(()),
  }
}

async fn worker_loop(
  engine: Arc<Engine>,
  rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Job>>>,
  id: usize,
) {
  loop {
    // Hold the queue lock only for the dequeue so siblings can pull the
    // next job while this one runs.
    let job = rx.lock().await.recv().await;
    let Some(job) = job else {
      tracing::debug!(worker = id, "job queue closed, worker exiting");
      return;
    };
    let response = execute_job(&engine, &job.script, job.user).await;
    // The reply channel is single-use; a dropped receiver means the
    // caller gave up waiting.
    let _ = job.reply.send(response);
  }
}

/// Run one job under the request deadline, trapping handler panics so
/// the worker survives.
async fn execute_job(engine: &Arc<Engine>, script: &str, user: User) -> Response {
  let deadline = engine.settings.request_timeout;
  let work = std::panic::AssertUnwindSafe(engine.run_script(script, &user)).catch_unwind();
  match tokio::time::timeout(deadline, work).await {
    Err(_) => EngineError::Timeout.into(),
    Ok(Err(_)) => {
      tracing::error!("command handler panicked");
      Response::error("internal error: command handler panicked")
    }
    Ok(Ok(response)) => response,
  }
}
