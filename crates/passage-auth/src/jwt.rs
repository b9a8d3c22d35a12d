//! JWT verification against a tunnel's public key

use crate::{AuthError, AuthVerdict, Authenticator, AuthenticatorFactory, Claims};
use async_trait::async_trait;
use http::{header, HeaderMap};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use passage_registry::ActiveTunnel;
use tracing::debug;

/// Cookie carrying the tenant-issued token for browser clients
pub const TOKEN_COOKIE: &str = "passage_token";

/// JWT authenticator scoped to one tunnel's key.
///
/// Validates signature and expiration only; all other claims are
/// carried through opaquely for the session.
pub struct JwtAuthenticator {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtAuthenticator {
    /// Verify RS256 tokens against a PEM public key
    /// (begins with "-----BEGIN PUBLIC KEY-----").
    pub fn from_rsa_pem(public_key_pem: &[u8]) -> Result<Self, AuthError> {
        Ok(Self {
            decoding_key: DecodingKey::from_rsa_pem(public_key_pem)
                .map_err(AuthError::InvalidKey)?,
            validation: Self::validation(Algorithm::RS256),
        })
    }

    /// Verify HS256 tokens against a shared secret. Used by tests and
    /// tenants that registered a symmetric key out of band.
    pub fn from_secret(secret: &[u8]) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret),
            validation: Self::validation(Algorithm::HS256),
        }
    }

    fn validation(alg: Algorithm) -> Validation {
        let mut validation = Validation::new(alg);
        // Only signature and expiration matter at the edge; issuer and
        // audience are tenant policy, opaque to the gateway.
        validation.validate_exp = true;
        validation.validate_aud = false;
        validation.validate_nbf = false;
        validation
    }
}

#[async_trait]
impl Authenticator for JwtAuthenticator {
    async fn authenticate(&self, headers: &HeaderMap) -> Result<AuthVerdict, AuthError> {
        let Some(token) = extract_token(headers) else {
            return Ok(AuthVerdict::denied());
        };

        match decode::<serde_json::Value>(&token, &self.decoding_key, &self.validation) {
            Ok(data) => Ok(AuthVerdict::granted(Claims(data.claims))),
            Err(e) => {
                debug!("Token rejected: {}", e);
                Ok(AuthVerdict::denied())
            }
        }
    }

    fn auth_type(&self) -> &'static str {
        "jwt"
    }
}

/// Extract the presented token: `passage_token` cookie first (browser
/// clients), then `Authorization: Bearer` (API clients).
fn extract_token(headers: &HeaderMap) -> Option<String> {
    let from_cookie = headers
        .get(header::COOKIE)
        .and_then(|h| h.to_str().ok())
        .and_then(|cookies| {
            cookies
                .split(';')
                .map(|c| c.trim())
                .find_map(|c| c.strip_prefix(TOKEN_COOKIE)?.strip_prefix('='))
        });

    if let Some(token) = from_cookie {
        return Some(token.to_string());
    }

    headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(|t| t.to_string())
}

/// Default factory: RS256 against the tunnel's registered public key.
pub struct JwtAuthFactory;

impl AuthenticatorFactory for JwtAuthFactory {
    fn build(&self, tunnel: &ActiveTunnel) -> Result<Box<dyn Authenticator>, AuthError> {
        let authenticator = JwtAuthenticator::from_rsa_pem(tunnel.public_key.as_bytes())?;
        Ok(Box::new(authenticator))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    const TEST_SECRET: &[u8] = b"test_secret_key_1234567890";

    fn token_for(claims: &serde_json::Value, secret: &[u8]) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(secret),
        )
        .unwrap()
    }

    fn future_exp() -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64
            + 3600
    }

    #[tokio::test]
    async fn test_bearer_token_grants_claims() {
        let claims = json!({"sub": "user-1", "exp": future_exp()});
        let token = token_for(&claims, TEST_SECRET);

        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            format!("Bearer {}", token).parse().unwrap(),
        );

        let auth = JwtAuthenticator::from_secret(TEST_SECRET);
        let verdict = auth.authenticate(&headers).await.unwrap();

        assert!(verdict.authenticated);
        assert_eq!(verdict.claims.unwrap().0["sub"], "user-1");
    }

    #[tokio::test]
    async fn test_cookie_token_preferred_over_header() {
        let cookie_claims = json!({"sub": "cookie-user", "exp": future_exp()});
        let token = token_for(&cookie_claims, TEST_SECRET);

        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            format!("other=1; passage_token={}", token).parse().unwrap(),
        );
        headers.insert(header::AUTHORIZATION, "Bearer garbage".parse().unwrap());

        let auth = JwtAuthenticator::from_secret(TEST_SECRET);
        let verdict = auth.authenticate(&headers).await.unwrap();

        assert!(verdict.authenticated);
        assert_eq!(verdict.claims.unwrap().0["sub"], "cookie-user");
    }

    #[tokio::test]
    async fn test_missing_token_is_denied() {
        let auth = JwtAuthenticator::from_secret(TEST_SECRET);
        let verdict = auth.authenticate(&HeaderMap::new()).await.unwrap();

        assert!(!verdict.authenticated);
        assert!(verdict.claims.is_none());
    }

    #[tokio::test]
    async fn test_wrong_secret_is_denied() {
        let claims = json!({"sub": "user-1", "exp": future_exp()});
        let token = token_for(&claims, b"other_secret");

        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            format!("Bearer {}", token).parse().unwrap(),
        );

        let auth = JwtAuthenticator::from_secret(TEST_SECRET);
        let verdict = auth.authenticate(&headers).await.unwrap();
        assert!(!verdict.authenticated);
    }

    #[tokio::test]
    async fn test_expired_token_is_denied() {
        let claims = json!({"sub": "user-1", "exp": 1_000_000});
        let token = token_for(&claims, TEST_SECRET);

        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            format!("Bearer {}", token).parse().unwrap(),
        );

        let auth = JwtAuthenticator::from_secret(TEST_SECRET);
        let verdict = auth.authenticate(&headers).await.unwrap();
        assert!(!verdict.authenticated);
    }

    #[test]
    fn test_factory_rejects_malformed_key() {
        let tunnel = ActiveTunnel {
            env_id: "env-1".to_string(),
            hostname: "env-1.tunnels.example.com".to_string(),
            public_key: "not a pem".to_string(),
            public_key_thumbprint: "tp-a".to_string(),
            access: serde_json::Value::Null,
            meta: serde_json::Value::Null,
        };

        assert!(matches!(
            JwtAuthFactory.build(&tunnel),
            Err(AuthError::InvalidKey(_))
        ));
    }
}
