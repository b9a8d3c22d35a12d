//! Tunnel proxy seam: claim-or-decline routing for requests and upgrades
//!
//! The dispatcher never decides *how* tunnel traffic is forwarded; it
//! offers each request or upgrade to a [`TunnelProxy`] which either
//! claims it by returning a handler or declines with `None`. The
//! [`ForwardingProxy`] here forwards claimed traffic to attached
//! backend addresses; the real bytestream protocol between gateway and
//! tenant lives behind the same trait.

use async_trait::async_trait;
use axum::body::Body;
use dashmap::DashMap;
use futures::future::BoxFuture;
use http::{header, Request, Response, StatusCode, Uri};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

/// Raw bidirectional byte stream handed to upgrade handlers.
pub trait RawIo: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> RawIo for T {}

/// Parsed head of a protocol-upgrade request.
///
/// `head` holds every byte already consumed from the socket so a
/// handler can replay them verbatim to the tenant backend.
#[derive(Debug, Clone)]
pub struct UpgradeRequest {
    pub method: String,
    pub target: String,
    pub host: Option<String>,
    pub headers: Vec<(String, String)>,
    pub head: Vec<u8>,
}

/// Handler for a claimed normal request.
pub type RequestHandler =
    Box<dyn FnOnce(Request<Body>) -> BoxFuture<'static, Response<Body>> + Send>;

/// Handler for a claimed upgrade; owns the raw socket from here on.
pub type UpgradeHandler =
    Box<dyn FnOnce(UpgradeRequest, Box<dyn RawIo>) -> BoxFuture<'static, ()> + Send>;

/// Claim-or-decline routing interface. `None` means "not my traffic";
/// the dispatcher then falls through to the control plane (requests)
/// or terminates the socket (upgrades).
#[async_trait]
pub trait TunnelProxy: Send + Sync {
    async fn route_request(&self, req: &Request<Body>) -> Option<RequestHandler>;

    async fn route_upgrade(&self, upgrade: &UpgradeRequest) -> Option<UpgradeHandler>;
}

/// Forwarding proxy backed by a hostname → backend address table.
///
/// Backends are attached when a tenant tunnel comes up and detached on
/// disconnect; traffic for hosts with no attached backend is declined.
pub struct ForwardingProxy {
    backends: DashMap<String, String>,
    client: Client<HttpConnector, Body>,
}

impl ForwardingProxy {
    pub fn new() -> Self {
        Self {
            backends: DashMap::new(),
            client: Client::builder(TokioExecutor::new()).build_http(),
        }
    }

    /// Attach a backend address for a public hostname.
    pub fn attach(&self, hostname: &str, backend_addr: &str) {
        debug!("Attaching backend: {} -> {}", hostname, backend_addr);
        self.backends
            .insert(hostname.to_ascii_lowercase(), backend_addr.to_string());
    }

    /// Detach a hostname; returns false if it was not attached.
    pub fn detach(&self, hostname: &str) -> bool {
        self.backends
            .remove(&hostname.to_ascii_lowercase())
            .is_some()
    }

    fn backend_for(&self, host: Option<&str>) -> Option<String> {
        let host = host?;
        let host = host.split(':').next().unwrap_or(host).to_ascii_lowercase();
        self.backends.get(&host).map(|entry| entry.value().clone())
    }
}

impl Default for ForwardingProxy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TunnelProxy for ForwardingProxy {
    // Hand-desugared: `Request<Body>` is not `Sync`, so the future the
    // macro would generate (capturing `&Request<Body>`) is not `Send`.
    // Routing is synchronous anyway; compute first, return a ready future.
    fn route_request<'life0, 'life1, 'async_trait>(
        &'life0 self,
        req: &'life1 Request<Body>,
    ) -> BoxFuture<'async_trait, Option<RequestHandler>>
    where
        'life0: 'async_trait,
        'life1: 'async_trait,
    {
        let host = req
            .headers()
            .get(header::HOST)
            .and_then(|h| h.to_str().ok());
        let handler = self.backend_for(host).map(|backend| {
            let client = self.client.clone();
            Box::new(move |req| {
                Box::pin(forward_request(client, backend, req)) as BoxFuture<'static, _>
            }) as RequestHandler
        });
        Box::pin(async move { handler })
    }

    async fn route_upgrade(&self, upgrade: &UpgradeRequest) -> Option<UpgradeHandler> {
        let backend = self.backend_for(upgrade.host.as_deref())?;

        Some(Box::new(move |upgrade, io| {
            Box::pin(forward_upgrade(backend, upgrade, io))
        }))
    }
}

async fn forward_request(
    client: Client<HttpConnector, Body>,
    backend: String,
    mut req: Request<Body>,
) -> Response<Body> {
    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    let uri: Uri = match format!("http://{}{}", backend, path_and_query).parse() {
        Ok(uri) => uri,
        Err(e) => {
            warn!("Invalid backend URI for {}: {}", backend, e);
            return bad_gateway();
        }
    };
    *req.uri_mut() = uri;

    match client.request(req).await {
        Ok(resp) => resp.map(Body::new),
        Err(e) => {
            warn!("Backend request to {} failed: {}", backend, e);
            bad_gateway()
        }
    }
}

async fn forward_upgrade(backend: String, upgrade: UpgradeRequest, mut io: Box<dyn RawIo>) {
    let mut backend_io = match TcpStream::connect(&backend).await {
        Ok(stream) => stream,
        Err(e) => {
            debug!("Backend connect to {} failed: {}", backend, e);
            let _ = io.shutdown().await;
            return;
        }
    };

    // Replay the head bytes already consumed, then go transparent
    if let Err(e) = backend_io.write_all(&upgrade.head).await {
        debug!("Failed to replay upgrade head to {}: {}", backend, e);
        let _ = io.shutdown().await;
        return;
    }

    match tokio::io::copy_bidirectional(&mut io, &mut backend_io).await {
        Ok((up, down)) => debug!("Upgrade stream closed (↑{}B ↓{}B)", up, down),
        Err(e) => debug!("Upgrade stream error: {}", e),
    }
}

fn bad_gateway() -> Response<Body> {
    let mut resp = Response::new(Body::from("Bad Gateway"));
    *resp.status_mut() = StatusCode::BAD_GATEWAY;
    resp
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_for(host: &str) -> Request<Body> {
        Request::builder()
            .uri("/some/path")
            .header(header::HOST, host)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_unattached_host_is_declined() {
        let proxy = ForwardingProxy::new();
        assert!(proxy
            .route_request(&request_for("env-1.tunnels.example.com"))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_attached_host_is_claimed() {
        let proxy = ForwardingProxy::new();
        proxy.attach("env-1.tunnels.example.com", "127.0.0.1:3000");

        assert!(proxy
            .route_request(&request_for("env-1.tunnels.example.com"))
            .await
            .is_some());
        // Port in the Host header still matches
        assert!(proxy
            .route_request(&request_for("env-1.tunnels.example.com:8080"))
            .await
            .is_some());
    }

    #[tokio::test]
    async fn test_detach_stops_claiming() {
        let proxy = ForwardingProxy::new();
        proxy.attach("env-1.tunnels.example.com", "127.0.0.1:3000");
        assert!(proxy.detach("env-1.tunnels.example.com"));
        assert!(!proxy.detach("env-1.tunnels.example.com"));

        assert!(proxy
            .route_request(&request_for("env-1.tunnels.example.com"))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_upgrade_routing_uses_same_table() {
        let proxy = ForwardingProxy::new();
        proxy.attach("env-1.tunnels.example.com", "127.0.0.1:3000");

        let upgrade = UpgradeRequest {
            method: "GET".to_string(),
            target: "/socket".to_string(),
            host: Some("env-1.tunnels.example.com".to_string()),
            headers: vec![],
            head: Vec::new(),
        };
        assert!(proxy.route_upgrade(&upgrade).await.is_some());

        let unknown = UpgradeRequest {
            host: Some("env-2.tunnels.example.com".to_string()),
            ..upgrade
        };
        assert!(proxy.route_upgrade(&unknown).await.is_none());
    }
}
