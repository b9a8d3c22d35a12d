//! Gateway edge: traffic classification, dispatch, and the control plane
//!
//! The public edge of the tunnel service. A single listener accepts
//! every connection, classifies it by `Host` header, and either serves
//! it from the control-plane API (`auth.<base>` / `api.<base>`) or
//! offers it to the tunnel proxy.

pub mod classify;
pub mod control;
pub mod dispatch;
pub mod io;
pub mod proxy;
pub mod server;

pub use classify::{classify, TrafficClass};
pub use control::{control_router, ControlState, ErrorBody, TunnelProfileEntry};
pub use dispatch::Dispatcher;
pub use proxy::{
    ForwardingProxy, RawIo, RequestHandler, TunnelProxy, UpgradeHandler, UpgradeRequest,
};
pub use server::{EdgeServer, ServerError};
