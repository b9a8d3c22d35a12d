//! In-memory tunnel registry

use crate::{ActiveTunnel, RegistryError, TunnelRegistry};
use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

/// In-memory registry keyed by environment id.
///
/// Thumbprint lookups scan the env map; registries are small (one
/// entry per live tunnel) and mutation is rare compared to lookups.
pub struct MemoryRegistry {
    by_env: DashMap<String, ActiveTunnel>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self {
            by_env: DashMap::new(),
        }
    }

    /// Register a tunnel. A second registration for the same env is an
    /// error; the existing tunnel must be unregistered first.
    pub fn register(&self, tunnel: ActiveTunnel) -> Result<(), RegistryError> {
        if self.by_env.contains_key(&tunnel.env_id) {
            return Err(RegistryError::AlreadyRegistered(tunnel.env_id));
        }

        debug!(
            "Registering tunnel: {} -> {}",
            tunnel.env_id, tunnel.hostname
        );
        self.by_env.insert(tunnel.env_id.clone(), tunnel);
        Ok(())
    }

    /// Remove a tunnel, returning its record.
    pub fn unregister(&self, env_id: &str) -> Result<ActiveTunnel, RegistryError> {
        debug!("Unregistering tunnel: {}", env_id);
        self.by_env
            .remove(env_id)
            .map(|(_, tunnel)| tunnel)
            .ok_or_else(|| RegistryError::NotFound(env_id.to_string()))
    }

    /// Number of registered tunnels
    pub fn count(&self) -> usize {
        self.by_env.len()
    }
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TunnelRegistry for MemoryRegistry {
    async fn get_by_thumbprint(&self, thumbprint: &str) -> Vec<ActiveTunnel> {
        self.by_env
            .iter()
            .filter(|entry| entry.value().public_key_thumbprint == thumbprint)
            .map(|entry| entry.value().clone())
            .collect()
    }

    async fn get_by_env_id(&self, env_id: &str) -> Option<ActiveTunnel> {
        self.by_env.get(env_id).map(|entry| entry.value().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tunnel(env: &str, thumbprint: &str) -> ActiveTunnel {
        ActiveTunnel {
            env_id: env.to_string(),
            hostname: format!("{}.tunnels.example.com", env),
            public_key: "-----BEGIN PUBLIC KEY-----\ntest\n-----END PUBLIC KEY-----".to_string(),
            public_key_thumbprint: thumbprint.to_string(),
            access: serde_json::Value::Null,
            meta: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn test_register_lookup() {
        let registry = MemoryRegistry::new();
        registry.register(tunnel("env-1", "tp-a")).unwrap();

        let found = registry.get_by_env_id("env-1").await.unwrap();
        assert_eq!(found.hostname, "env-1.tunnels.example.com");
        assert!(registry.get_by_env_id("env-2").await.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_registration() {
        let registry = MemoryRegistry::new();
        registry.register(tunnel("env-1", "tp-a")).unwrap();

        let result = registry.register(tunnel("env-1", "tp-a"));
        assert!(matches!(result, Err(RegistryError::AlreadyRegistered(_))));
    }

    #[tokio::test]
    async fn test_thumbprint_lookup_groups_tunnels() {
        let registry = MemoryRegistry::new();
        registry.register(tunnel("env-1", "tp-a")).unwrap();
        registry.register(tunnel("env-2", "tp-a")).unwrap();
        registry.register(tunnel("env-3", "tp-b")).unwrap();

        let mut shared = registry.get_by_thumbprint("tp-a").await;
        shared.sort_by(|a, b| a.env_id.cmp(&b.env_id));
        assert_eq!(shared.len(), 2);
        assert_eq!(shared[0].env_id, "env-1");
        assert_eq!(shared[1].env_id, "env-2");

        assert!(registry.get_by_thumbprint("tp-missing").await.is_empty());
    }

    #[tokio::test]
    async fn test_unregister() {
        let registry = MemoryRegistry::new();
        registry.register(tunnel("env-1", "tp-a")).unwrap();
        assert_eq!(registry.count(), 1);

        registry.unregister("env-1").unwrap();
        assert_eq!(registry.count(), 0);
        assert!(registry.unregister("env-1").is_err());
    }
}
