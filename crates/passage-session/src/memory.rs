//! In-memory session store

use crate::{Session, SessionAccessor, SessionError, SESSION_COOKIE};
use async_trait::async_trait;
use dashmap::DashMap;
use http::{header, HeaderMap};
use passage_auth::Claims;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SessionKey {
    sid: String,
    thumbprint: String,
}

/// In-memory session store keyed by (sid, thumbprint).
pub struct MemorySessions {
    sessions: Arc<DashMap<SessionKey, Claims>>,
}

impl MemorySessions {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
        }
    }

    /// Number of persisted sessions
    pub fn count(&self) -> usize {
        self.sessions.len()
    }
}

impl Default for MemorySessions {
    fn default() -> Self {
        Self::new()
    }
}

/// Extract the browser session id from the Cookie header
fn client_sid(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::COOKIE)
        .and_then(|h| h.to_str().ok())
        .and_then(|cookies| {
            cookies
                .split(';')
                .map(|c| c.trim())
                .find_map(|c| c.strip_prefix(SESSION_COOKIE)?.strip_prefix('='))
        })
        .map(|sid| sid.to_string())
}

#[async_trait]
impl SessionAccessor for MemorySessions {
    async fn open(
        &self,
        headers: &HeaderMap,
        thumbprint: &str,
    ) -> Result<Box<dyn Session>, SessionError> {
        let (sid, fresh) = match client_sid(headers) {
            Some(sid) => (sid, false),
            None => (Uuid::new_v4().to_string(), true),
        };

        let key = SessionKey {
            sid,
            thumbprint: thumbprint.to_string(),
        };
        let user = self.sessions.get(&key).map(|entry| entry.value().clone());

        debug!(
            "Opened session for thumbprint {} (fresh: {}, authenticated: {})",
            thumbprint,
            fresh,
            user.is_some()
        );

        Ok(Box::new(MemorySession {
            store: self.sessions.clone(),
            key,
            user,
            staged: None,
            fresh,
        }))
    }
}

struct MemorySession {
    store: Arc<DashMap<SessionKey, Claims>>,
    key: SessionKey,
    user: Option<Claims>,
    staged: Option<Claims>,
    fresh: bool,
}

#[async_trait]
impl Session for MemorySession {
    fn user(&self) -> Option<&Claims> {
        self.user.as_ref()
    }

    fn set(&mut self, claims: Claims) {
        self.staged = Some(claims);
    }

    async fn save(&mut self) -> Result<(), SessionError> {
        if let Some(claims) = self.staged.take() {
            self.store.insert(self.key.clone(), claims.clone());
            self.user = Some(claims);
        }
        Ok(())
    }

    fn issue_cookie(&self) -> Option<String> {
        self.fresh.then(|| {
            format!(
                "{}={}; Path=/; HttpOnly; SameSite=Lax",
                SESSION_COOKIE, self.key.sid
            )
        })
    }
}
