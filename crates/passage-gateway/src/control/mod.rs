//! Control-plane API: health, tunnel discovery, login handshake

mod handlers;
mod models;

pub use models::{ErrorBody, TunnelProfileEntry};

use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use http::StatusCode;
use passage_auth::{AuthError, AuthenticatorFactory};
use passage_registry::TunnelRegistry;
use passage_session::{SessionAccessor, SessionError};
use std::sync::Arc;
use thiserror::Error;
use tracing::error;

/// Shared state for the control-plane handlers.
#[derive(Clone)]
pub struct ControlState {
    pub registry: Arc<dyn TunnelRegistry>,
    pub auth_factory: Arc<dyn AuthenticatorFactory>,
    pub sessions: Arc<dyn SessionAccessor>,
    /// Gateway base hostname, e.g. `tunnels.example.com`
    pub base_host: String,
    /// Scheme used when building externally visible URLs
    pub external_scheme: String,
    /// Secondary identity provider base URL, if configured
    pub idp_url: Option<String>,
}

/// Collaborator failures surfaced through the handler boundary.
///
/// These are not branch outcomes of the login state machine; they are
/// backend faults with no domain recovery and map uniformly to 500.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("authentication backend failure: {0}")]
    Auth(#[from] AuthError),

    #[error("session backend failure: {0}")]
    Session(#[from] SessionError),

    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!("Control-plane failure: {}", self);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorBody::new("internal error")),
        )
            .into_response()
    }
}

pub fn control_router(state: ControlState) -> Router {
    Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/profiles/{profile_id}/tunnels", get(handlers::profile_tunnels))
        .route("/login", get(handlers::login))
        .fallback(handlers::not_found)
        .with_state(state)
}
