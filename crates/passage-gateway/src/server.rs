//! Edge listener: accept loop, upgrade sniffing, hyper serving
//!
//! Each accepted connection has its request head read off the socket
//! first. If the head carries an `Upgrade` header the whole socket is
//! handed to the dispatcher's upgrade path before hyper ever sees it;
//! otherwise the consumed bytes are replayed through [`PrefixedIo`]
//! and the connection is served as ordinary HTTP/1.1.

use crate::dispatch::Dispatcher;
use crate::io::PrefixedIo;
use crate::proxy::UpgradeRequest;
use axum::body::Body;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

/// Upper bound on the request head read before dispatch.
const MAX_HEAD: usize = 16 * 1024;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error(
        "Failed to bind to {address}:{port}: {reason}. \
         The port may be in use or require elevated privileges."
    )]
    Bind {
        address: String,
        port: u16,
        reason: String,
    },
}

pub struct EdgeServer {
    dispatcher: Arc<Dispatcher>,
}

impl EdgeServer {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }

    /// Bind the listen address and run the accept loop until the task
    /// is cancelled.
    pub async fn run(&self, listen: SocketAddr) -> Result<(), ServerError> {
        let listener = TcpListener::bind(listen)
            .await
            .map_err(|e| ServerError::Bind {
                address: listen.ip().to_string(),
                port: listen.port(),
                reason: e.to_string(),
            })?;
        info!("Gateway listening on {}", listen);

        loop {
            let (socket, peer) = match listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    warn!("Accept failed: {}", e);
                    continue;
                }
            };

            let dispatcher = self.dispatcher.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(dispatcher, socket).await {
                    debug!("Connection from {} ended with error: {}", peer, e);
                }
            });
        }
    }
}

async fn handle_connection(
    dispatcher: Arc<Dispatcher>,
    mut socket: TcpStream,
) -> std::io::Result<()> {
    let head = read_head(&mut socket).await?;

    if let Some(upgrade) = parse_upgrade(&head) {
        dispatcher.dispatch_upgrade(upgrade, Box::new(socket)).await;
        return Ok(());
    }

    let io = TokioIo::new(PrefixedIo::new(head, socket));
    let service = service_fn(move |req| {
        let dispatcher = dispatcher.clone();
        async move {
            Ok::<_, Infallible>(dispatcher.dispatch_request(req.map(Body::new)).await)
        }
    });

    if let Err(e) = http1::Builder::new()
        .serve_connection(io, service)
        .with_upgrades()
        .await
    {
        debug!("HTTP connection error: {}", e);
    }
    Ok(())
}

/// Read until the end of the request head or the size cap.
///
/// Returns every byte consumed, including any body bytes that arrived
/// in the same segments; callers replay the buffer verbatim.
async fn read_head(socket: &mut TcpStream) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];

    loop {
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);

        if buf.windows(4).any(|w| w == b"\r\n\r\n") || buf.len() >= MAX_HEAD {
            break;
        }
    }
    Ok(buf)
}

/// Parse the head and return an [`UpgradeRequest`] if it asks for a
/// protocol upgrade. Incomplete or malformed heads return `None` and
/// fall through to hyper, which produces the error response.
fn parse_upgrade(head: &[u8]) -> Option<UpgradeRequest> {
    let mut header_storage = [httparse::EMPTY_HEADER; 64];
    let mut parsed = httparse::Request::new(&mut header_storage);

    match parsed.parse(head) {
        Ok(httparse::Status::Complete(_)) | Ok(httparse::Status::Partial) => {}
        Err(_) => return None,
    }

    let method = parsed.method?.to_string();
    let target = parsed.path?.to_string();

    let headers: Vec<(String, String)> = parsed
        .headers
        .iter()
        .take_while(|h| !h.name.is_empty())
        .map(|h| {
            (
                h.name.to_string(),
                String::from_utf8_lossy(h.value).into_owned(),
            )
        })
        .collect();

    let wants_upgrade = headers
        .iter()
        .any(|(name, _)| name.eq_ignore_ascii_case("upgrade"));
    if !wants_upgrade {
        return None;
    }

    let host = headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("host"))
        .map(|(_, value)| value.clone());

    Some(UpgradeRequest {
        method,
        target,
        host,
        headers,
        head: head.to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_request_is_not_an_upgrade() {
        let head = b"GET /index.html HTTP/1.1\r\nHost: env-1.tunnels.example.com\r\n\r\n";
        assert!(parse_upgrade(head).is_none());
    }

    #[test]
    fn test_websocket_upgrade_is_detected() {
        let head = b"GET /socket HTTP/1.1\r\n\
                     Host: env-1.tunnels.example.com\r\n\
                     Connection: Upgrade\r\n\
                     Upgrade: websocket\r\n\
                     Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n";
        let upgrade = parse_upgrade(head).unwrap();
        assert_eq!(upgrade.method, "GET");
        assert_eq!(upgrade.target, "/socket");
        assert_eq!(upgrade.host.as_deref(), Some("env-1.tunnels.example.com"));
        assert_eq!(upgrade.head, head.to_vec());
    }

    #[test]
    fn test_upgrade_header_case_insensitive() {
        let head = b"GET /socket HTTP/1.1\r\nHost: a.b\r\nUPGRADE: websocket\r\n\r\n";
        assert!(parse_upgrade(head).is_some());
    }

    #[test]
    fn test_garbage_head_is_not_an_upgrade() {
        assert!(parse_upgrade(b"\x00\x01\x02 not http at all").is_none());
        assert!(parse_upgrade(b"").is_none());
    }

    #[test]
    fn test_missing_host_still_parses() {
        let head = b"GET /socket HTTP/1.1\r\nUpgrade: websocket\r\n\r\n";
        let upgrade = parse_upgrade(head).unwrap();
        assert!(upgrade.host.is_none());
    }
}
