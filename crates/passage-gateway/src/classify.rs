//! Host-header traffic classification

/// Where a request or upgrade belongs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrafficClass {
    /// The gateway's own endpoints (health, discovery, login)
    ControlPlane,
    /// Tenant tunnel traffic, offered to the tunnel proxy
    TunnelTraffic,
}

/// Classify a request's `Host` header against the gateway base hostname.
///
/// Control plane requires an exact, deliberate match on `auth.<base>`
/// or `api.<base>`; everything else (ports stripped, case ignored,
/// missing or malformed hosts included) defaults to "attempt
/// proxying". Pure and total.
pub fn classify(host: Option<&str>, base_host: &str) -> TrafficClass {
    let Some(host) = host else {
        return TrafficClass::TunnelTraffic;
    };

    // Remove port if present (e.g., "auth.example.com:8080")
    let host = host.split(':').next().unwrap_or(host).trim();
    let host = host.to_ascii_lowercase();
    let base = base_host.to_ascii_lowercase();

    if host == format!("auth.{}", base) || host == format!("api.{}", base) {
        TrafficClass::ControlPlane
    } else {
        TrafficClass::TunnelTraffic
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "tunnels.example.com";

    #[test]
    fn test_control_plane_hosts() {
        assert_eq!(
            classify(Some("auth.tunnels.example.com"), BASE),
            TrafficClass::ControlPlane
        );
        assert_eq!(
            classify(Some("api.tunnels.example.com"), BASE),
            TrafficClass::ControlPlane
        );
    }

    #[test]
    fn test_control_plane_with_port() {
        assert_eq!(
            classify(Some("auth.tunnels.example.com:8080"), BASE),
            TrafficClass::ControlPlane
        );
    }

    #[test]
    fn test_control_plane_case_insensitive() {
        assert_eq!(
            classify(Some("Auth.Tunnels.Example.Com"), BASE),
            TrafficClass::ControlPlane
        );
    }

    #[test]
    fn test_tenant_hosts_are_tunnel_traffic() {
        assert_eq!(
            classify(Some("env-1.tunnels.example.com"), BASE),
            TrafficClass::TunnelTraffic
        );
        assert_eq!(
            classify(Some("tunnels.example.com"), BASE),
            TrafficClass::TunnelTraffic
        );
        assert_eq!(
            classify(Some("other.example.net"), BASE),
            TrafficClass::TunnelTraffic
        );
    }

    #[test]
    fn test_near_misses_are_tunnel_traffic() {
        // Prefix/suffix lookalikes must not reach the control plane
        assert_eq!(
            classify(Some("auth.tunnels.example.com.evil.net"), BASE),
            TrafficClass::TunnelTraffic
        );
        assert_eq!(
            classify(Some("xauth.tunnels.example.com"), BASE),
            TrafficClass::TunnelTraffic
        );
    }

    #[test]
    fn test_missing_or_malformed_host() {
        assert_eq!(classify(None, BASE), TrafficClass::TunnelTraffic);
        assert_eq!(classify(Some(""), BASE), TrafficClass::TunnelTraffic);
        assert_eq!(classify(Some(":::"), BASE), TrafficClass::TunnelTraffic);
    }
}
