//! HTTP timestamp authority service.
//!
//! Serves `POST /sign` with the JSON protocol spoken by
//! [`timetrust_time::HttpAuthority`], signing with an in-process
//! [`LocalAuthority`] whose clock is kept synchronized in the background.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use timetrust_time::{LocalAuthority, SignRequest, SignResponse, SigningError};
use tracing::{info, warn};

type SharedAuthority = Arc<LocalAuthority>;

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug, Serialize)]
struct KeyResponse {
    public_key: String,
    key_id: Option<String>,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request<S: Into<String>>(message: S) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn unavailable<S: Into<String>>(message: S) -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            message: message.into(),
        }
    }
}

impl From<SigningError> for ApiError {
    fn from(err: SigningError) -> Self {
        match err {
            SigningError::SigningRejected(reason) => Self::bad_request(reason),
            SigningError::SigningUnavailable(reason) => Self::unavailable(reason),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let payload = Json(ErrorResponse {
            error: self.message,
        });
        (self.status, payload).into_response()
    }
}

pub fn build_router(authority: SharedAuthority) -> Router {
    Router::new()
        .route("/sign", post(handle_sign))
        .route("/key", get(handle_key))
        .with_state(authority)
}

async fn handle_sign(
    State(authority): State<SharedAuthority>,
    Json(request): Json<SignRequest>,
) -> Result<Json<SignResponse>, ApiError> {
    let digest = hex::decode(request.digest.trim())
        .map_err(|err| ApiError::bad_request(format!("digest is not hex: {err}")))?;
    let receipt = authority.sign_now(&digest).map_err(|err| {
        warn!(error = %err, "refusing to sign");
        ApiError::from(err)
    })?;
    info!(time = %receipt.time, digest_len = digest.len(), "digest timestamped");
    Ok(Json(receipt.into()))
}

async fn handle_key(State(authority): State<SharedAuthority>) -> Json<KeyResponse> {
    Json(KeyResponse {
        public_key: hex::encode(authority.public_key_bytes()),
        key_id: authority.key_id().map(str::to_string),
    })
}

pub async fn serve(authority: LocalAuthority, addr: SocketAddr) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind authority listener on {addr}"))?;
    info!(
        %addr,
        public_key = %hex::encode(authority.public_key_bytes()),
        "timestamp authority listening"
    );

    axum::serve(listener, build_router(Arc::new(authority)))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
        })
        .await
        .context("authority server terminated unexpectedly")
}
