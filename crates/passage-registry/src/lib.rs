//! Tunnel registry: active tunnel records and lookup interfaces
//!
//! The registry owns the `ActiveTunnel` records created when tenants
//! establish tunnel connections. The gateway core only reads them and
//! must tolerate "not found" at every lookup: a tunnel can disconnect
//! or expire between any two requests.

mod memory;
mod thumbprint;

pub use memory::MemoryRegistry;
pub use thumbprint::key_thumbprint;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One live tenant tunnel, reachable at a public hostname.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActiveTunnel {
    /// Tenant environment identifier (globally unique)
    pub env_id: String,
    /// Public hostname the tenant is reachable at
    pub hostname: String,
    /// Tenant's asymmetric public key, PEM encoded
    pub public_key: String,
    /// Stable short identifier derived from the public key; session
    /// partition key and lookup key
    pub public_key_thumbprint: String,
    /// Authorization policy descriptor, opaque to the gateway
    #[serde(default)]
    pub access: serde_json::Value,
    /// Opaque tenant metadata
    #[serde(default)]
    pub meta: serde_json::Value,
}

/// Registry errors
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Tunnel already registered for env: {0}")]
    AlreadyRegistered(String),

    #[error("Tunnel not found for env: {0}")]
    NotFound(String),
}

/// Lookup interface consumed by the gateway core.
///
/// Results are possibly stale the instant they return; callers must
/// not cache them across requests.
#[async_trait]
pub trait TunnelRegistry: Send + Sync {
    /// All active tunnels sharing a public-key thumbprint (possibly empty).
    async fn get_by_thumbprint(&self, thumbprint: &str) -> Vec<ActiveTunnel>;

    /// The active tunnel for an environment id, if any.
    async fn get_by_env_id(&self, env_id: &str) -> Option<ActiveTunnel>;
}
