//! Per-tunnel request authentication
//!
//! Authentication is a capability abstraction: an
//! [`AuthenticatorFactory`] turns a tunnel's public key material into a
//! request-scoped [`Authenticator`], so the verification mechanism can
//! be substituted per tenant without changing the login flow. The
//! default implementation verifies a JWT presented as a bearer token or
//! cookie against the tunnel's RSA public key.

mod jwt;

pub use jwt::{JwtAuthFactory, JwtAuthenticator};

use async_trait::async_trait;
use http::HeaderMap;
use passage_registry::ActiveTunnel;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identity claims produced by successful authentication.
///
/// Opaque to the gateway beyond being serializable into a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Claims(pub serde_json::Value);

/// Outcome of one authenticator invocation. Never persisted directly;
/// the login flow turns it into session state.
#[derive(Debug, Clone)]
pub struct AuthVerdict {
    pub authenticated: bool,
    pub claims: Option<Claims>,
}

impl AuthVerdict {
    pub fn granted(claims: Claims) -> Self {
        Self {
            authenticated: true,
            claims: Some(claims),
        }
    }

    pub fn denied() -> Self {
        Self {
            authenticated: false,
            claims: None,
        }
    }
}

/// Authentication errors
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid public key material: {0}")]
    InvalidKey(#[source] jsonwebtoken::errors::Error),

    #[error("Authenticator failure: {0}")]
    Internal(String),
}

/// Validates a raw request and returns an authentication verdict.
///
/// A bad or missing credential is a *denied verdict*, not an error;
/// errors are reserved for faults the caller cannot interpret.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, headers: &HeaderMap) -> Result<AuthVerdict, AuthError>;

    /// Authentication type name (for logging)
    fn auth_type(&self) -> &'static str;
}

/// Builds a request-scoped authenticator from a tunnel's key material.
pub trait AuthenticatorFactory: Send + Sync {
    fn build(&self, tunnel: &ActiveTunnel) -> Result<Box<dyn Authenticator>, AuthError>;
}
