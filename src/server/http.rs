//! The thin HTTP surface over the engine: script execution, login,
//! two-phase upload, and attachment/public-file reads.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response as HttpResponse};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::TryStreamExt;
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};

use crate::engine::Engine;
use crate::error::EngineError;
use crate::types::{Response, User};

pub fn build_router(engine: Arc<Engine>) -> Router {
  let cors = CorsLayer::new()
    .allow_origin(Any)
    .allow_methods(Any)
    .allow_headers(Any);

  Router::new()
    .route("/login", post(login))
    .route("/bql", post(run_script))
    .route("/upload/{ticket}", post(upload))
    .route("/download/{db}/{*path}", get(download))
    .route("/public/{db}/{*path}", get(read_public))
    .layer(cors)
    .with_state(engine)
}

fn status_for(err: &EngineError) -> StatusCode {
  match err.kind() {
    "unauthorized" => StatusCode::UNAUTHORIZED,
    "not_found" => StatusCode::NOT_FOUND,
    "timeout" => StatusCode::REQUEST_TIMEOUT,
    "already_exists" | "conflict" => StatusCode::CONFLICT,
    "backend_unavailable" => StatusCode::SERVICE_UNAVAILABLE,
    "internal" => StatusCode::INTERNAL_SERVER_ERROR,
    _ => StatusCode::BAD_REQUEST,
  }
}

fn error_response(err: EngineError) -> HttpResponse {
  let status = status_for(&err);
  (status, Json(Response::from(err))).into_response()
}

/// Bearer token from the Authorization header.
fn bearer(headers: &HeaderMap) -> Option<&str> {
  headers
    .get(header::AUTHORIZATION)?
    .to_str()
    .ok()?
    .strip_prefix("Bearer ")
}

async fn authenticated(engine: &Engine, headers: &HeaderMap) -> Result<User, EngineError> {
  let token =
    bearer(headers).ok_or_else(|| EngineError::Unauthorized("missing bearer token".into()))?;
  engine.authenticate_token(token).await
}

#[derive(Deserialize)]
struct LoginRequest {
  username: String,
  password: String,
}

async fn login(
  State(engine): State<Arc<Engine>>,
  Json(req): Json<LoginRequest>,
) -> HttpResponse {
  match engine.login(&req.username, &req.password).await {
    Ok(token) => Json(Response::ok(json!({ "token": token }))).into_response(),
    Err(e) => error_response(e),
  }
}

async fn run_script(
  State(engine): State<Arc<Engine>>,
  headers: HeaderMap,
  script: String,
) -> HttpResponse {
  let user = match authenticated(&engine, &headers).await {
    Ok(user) => user,
    Err(e) => return error_response(e),
  };
  let response = engine.submit_script(script, user).await;
  Json(response).into_response()
}

/// Second phase of an upload: the posted body streams straight into the
/// byte store against the path the ticket was minted for.
async fn upload(
  State(engine): State<Arc<Engine>>,
  Path(ticket): Path<String>,
  body: Body,
) -> HttpResponse {
  let ticket = match engine.take_upload_ticket(&ticket).await {
    Ok(t) => t,
    Err(e) => return error_response(e),
  };

  let mime = mime_guess::from_path(&ticket.path)
    .first_or_octet_stream()
    .essence_str()
    .to_string();
  let stream = body
    .into_data_stream()
    .map_err(|e| std::io::Error::other(e.to_string()));
  let mut reader = tokio_util::io::StreamReader::new(stream);

  match engine
    .filesystem
    .write_bytes(&ticket.path, &ticket.database, &mut reader, &mime)
    .await
  {
    Ok(attachment) => Json(Response::ok(json!({
      "path": ticket.path,
      "size": attachment.size,
      "mime": attachment.mime,
    })))
    .into_response(),
    Err(e) => error_response(e),
  }
}

/// Stream a file's attachment. Public files need no credentials;
/// everything else requires a token with access to the database.
async fn download(
  State(engine): State<Arc<Engine>>,
  Path((db, path)): Path<(String, String)>,
  headers: HeaderMap,
) -> HttpResponse {
  let path = format!("/{path}");
  let public = match engine.filesystem.is_public(&path, &db).await {
    Ok(p) => p,
    Err(e) => return error_response(e),
  };
  if !public {
    match authenticated(&engine, &headers).await {
      Ok(user) if user.has_database(&db) => {}
      Ok(_) => {
        return error_response(EngineError::Unauthorized(format!(
          "no access to database '{db}'"
        )))
      }
      Err(e) => return error_response(e),
    }
  }

  let info = match engine.filesystem.info(&path, &db).await {
    Ok(i) => i,
    Err(e) => return error_response(e),
  };
  let Some(attachment) = info.attachment else {
    return error_response(EngineError::NotFound {
      kind: crate::error::NotFoundKind::Blob,
      name: path,
    });
  };

  let (rd, mut wr) = tokio::io::duplex(64 * 1024);
  let bst = engine.bytestore.clone();
  let blob_id = attachment.blob_id.clone();
  tokio::spawn(async move {
    if let Err(e) = bst.read(&db, &blob_id, &mut wr).await {
      tracing::warn!(blob = %blob_id, error = %e, "attachment stream aborted");
    }
  });

  HttpResponse::builder()
    .status(StatusCode::OK)
    .header(header::CONTENT_TYPE, attachment.mime)
    .header(header::CONTENT_LENGTH, attachment.size)
    .body(Body::from_stream(tokio_util::io::ReaderStream::new(rd)))
    .unwrap_or_else(|e| {
      error_response(EngineError::Internal(e.to_string()))
    })
}

/// Unauthenticated JSON read of a file flagged public.
async fn read_public(
  State(engine): State<Arc<Engine>>,
  Path((db, path)): Path<(String, String)>,
) -> HttpResponse {
  let path = format!("/{path}");
  match engine.filesystem.is_public(&path, &db).await {
    Ok(true) => {}
    Ok(false) => {
      return error_response(EngineError::Unauthorized(format!(
        "'{path}' is not public"
      )))
    }
    Err(e) => return error_response(e),
  }
  match engine.filesystem.read_json(&path, &db, &[]).await {
    Ok(content) => Json(Response::ok(content)).into_response(),
    Err(e) => error_response(e),
  }
}
