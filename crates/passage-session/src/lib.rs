//! Browser sessions partitioned by tenant fingerprint
//!
//! A session is scoped to exactly one public-key thumbprint: the store
//! key is (browser session id × thumbprint), so one browser holds
//! independent sessions per tenant and claims never leak across
//! tenants sharing that browser.

mod memory;

pub use memory::MemorySessions;

use async_trait::async_trait;
use http::HeaderMap;
use passage_auth::Claims;
use thiserror::Error;

/// Session id cookie issued to browsers
pub const SESSION_COOKIE: &str = "passage_sid";

/// Session errors
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session store failure: {0}")]
    Store(String),
}

/// One browser's session for one tenant fingerprint.
///
/// `set` stages claims; nothing is observable on later requests until
/// `save` resolves.
#[async_trait]
pub trait Session: Send {
    /// Current authenticated claims, absent if unauthenticated
    fn user(&self) -> Option<&Claims>;

    /// Stage new claims for the next `save`
    fn set(&mut self, claims: Claims);

    /// Persist staged claims; durable once resolved
    async fn save(&mut self) -> Result<(), SessionError>;

    /// `Set-Cookie` value binding the browser to this session, if one
    /// needs to be issued on the response
    fn issue_cookie(&self) -> Option<String>;
}

/// Yields the session for a request/tenant pair, creating one if the
/// browser presents no usable session id.
#[async_trait]
pub trait SessionAccessor: Send + Sync {
    async fn open(
        &self,
        headers: &HeaderMap,
        thumbprint: &str,
    ) -> Result<Box<dyn Session>, SessionError>;
}
