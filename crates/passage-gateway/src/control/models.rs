//! Wire types for the control-plane API

use passage_registry::ActiveTunnel;
use serde::{Deserialize, Serialize};

/// Machine-readable error body, `{"error": "..."}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

impl ErrorBody {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}

/// Safe public projection of an active tunnel.
///
/// The public key and its thumbprint are deliberately absent.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelProfileEntry {
    pub env_id: String,
    pub hostname: String,
    pub access: serde_json::Value,
    pub meta: serde_json::Value,
}

impl From<ActiveTunnel> for TunnelProfileEntry {
    fn from(tunnel: ActiveTunnel) -> Self {
        Self {
            env_id: tunnel.env_id,
            hostname: tunnel.hostname,
            access: tunnel.access,
            meta: tunnel.meta,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginParams {
    pub env: String,
    #[serde(default = "default_return_path", rename = "returnPath")]
    pub return_path: String,
}

fn default_return_path() -> String {
    "/".to_string()
}
