//! Gateway dispatcher: the single entry point for requests and upgrades
//!
//! Every inbound request or upgrade is classified by its `Host` header
//! exactly once and then either handed to the control plane or offered
//! to the tunnel proxy. Routing never errors: a declined route is a
//! value. The two decline surfaces differ, though: requests fall
//! through to the control router for a well-formed HTTP response,
//! while a declined upgrade has no response pipeline left and must
//! terminate the raw socket itself.

use crate::classify::{classify, TrafficClass};
use crate::proxy::{RawIo, TunnelProxy, UpgradeRequest};
use axum::body::Body;
use axum::Router;
use http::{header, Request, Response};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tower::ServiceExt;
use tracing::debug;

/// Terminal payload for a declined upgrade. Written raw: once upgrade
/// negotiation has begun there is no HTTP status line to produce.
const UPGRADE_DECLINED: &[u8] = b"Not found";

pub struct Dispatcher {
    base_host: String,
    proxy: Arc<dyn TunnelProxy>,
    control: Router,
}

impl Dispatcher {
    pub fn new(base_host: impl Into<String>, proxy: Arc<dyn TunnelProxy>, control: Router) -> Self {
        Self {
            base_host: base_host.into(),
            proxy,
            control,
        }
    }

    /// Dispatch a normal request.
    ///
    /// Control-plane hosts go straight to the control router without
    /// consulting the proxy. Tunnel traffic is offered to the proxy
    /// first; a decline falls back to the control router so unmatched
    /// traffic still receives a response instead of a dropped
    /// connection.
    pub async fn dispatch_request(&self, req: Request<Body>) -> Response<Body> {
        if req.uri().path() != "/healthz" {
            debug!(
                "Dispatching {} {} headers={:?}",
                req.method(),
                req.uri(),
                req.headers()
            );
        }

        let class = {
            let host = req
                .headers()
                .get(header::HOST)
                .and_then(|h| h.to_str().ok());
            classify(host, &self.base_host)
        };

        match class {
            TrafficClass::ControlPlane => self.control_plane(req).await,
            TrafficClass::TunnelTraffic => match self.proxy.route_request(&req).await {
                Some(handler) => handler(req).await,
                None => self.control_plane(req).await,
            },
        }
    }

    /// Dispatch a protocol-upgrade request; owns the raw socket.
    ///
    /// Upgrades are tunnel-only: control-plane hosts are never offered
    /// to the proxy. A declined upgrade gets a minimal terminal write
    /// and the socket is shut down.
    pub async fn dispatch_upgrade(&self, upgrade: UpgradeRequest, mut io: Box<dyn RawIo>) {
        debug!(
            "Dispatching upgrade {} {} host={:?}",
            upgrade.method, upgrade.target, upgrade.host
        );

        let handler = match classify(upgrade.host.as_deref(), &self.base_host) {
            TrafficClass::ControlPlane => None,
            TrafficClass::TunnelTraffic => self.proxy.route_upgrade(&upgrade).await,
        };

        match handler {
            Some(handler) => handler(upgrade, io).await,
            None => {
                let _ = io.write_all(UPGRADE_DECLINED).await;
                let _ = io.shutdown().await;
            }
        }
    }

    async fn control_plane(&self, req: Request<Body>) -> Response<Body> {
        match self.control.clone().oneshot(req).await {
            Ok(resp) => resp,
            Err(infallible) => match infallible {},
        }
    }
}
