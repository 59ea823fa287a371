//! Authentication provider
//!
//! Register messages may carry a bearer token; in a secured deployment an
//! invalid or missing token is a protocol violation and the socket is
//! closed. Token issuing lives with the external identity service; this
//! module only validates.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::config::{SecurityConfig, SecurityMode};

/// Authentication errors
#[derive(Debug, Error)]
pub enum AuthError {
    /// No token supplied where one is required
    #[error("Missing authentication token")]
    Missing,

    /// Token malformed, expired or signed with the wrong secret
    #[error("Invalid token: {0}")]
    Invalid(String),
}

/// Claims extracted from a validated token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claims {
    /// Authenticated subject (userId)
    pub subject: String,
}

/// Token validation interface
///
/// Async because real providers may need to consult an external identity
/// service; the bundled implementations answer immediately.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Validate a token; `None` means the client sent no token
    async fn validate(&self, token: Option<&str>) -> Result<Claims, AuthError>;
}

/// Open deployment: every register is accepted
pub struct OpenAuth;

#[async_trait]
impl AuthProvider for OpenAuth {
    async fn validate(&self, _token: Option<&str>) -> Result<Claims, AuthError> {
        Ok(Claims {
            subject: String::new(),
        })
    }
}

/// HS256-shaped token validation against a shared secret
///
/// Tokens are `header.payload.signature` with base64url segments; the
/// payload carries `sub` and `exp`, the signature is the base64url of
/// `"{sub}:{secret}"`.
pub struct JwtAuth {
    secret: String,
}

impl JwtAuth {
    /// Create a validator for a shared secret
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Issue a token for a subject (used by tests and tooling)
    pub fn generate_token(&self, subject: &str, ttl_secs: i64) -> String {
        let exp = chrono::Utc::now().timestamp() + ttl_secs;
        let header = base64url_encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let payload = base64url_encode(
            format!(r#"{{"sub":"{}","exp":{}}}"#, subject, exp).as_bytes(),
        );
        let signature = base64url_encode(format!("{}:{}", subject, self.secret).as_bytes());
        format!("{}.{}.{}", header, payload, signature)
    }
}

#[async_trait]
impl AuthProvider for JwtAuth {
    async fn validate(&self, token: Option<&str>) -> Result<Claims, AuthError> {
        let token = token.ok_or(AuthError::Missing)?;
        let parts: Vec<&str> = token.split('.').collect();
        if parts.len() != 3 {
            return Err(AuthError::Invalid("wrong segment count".to_string()));
        }

        let payload_raw = base64url_decode(parts[1])
            .ok_or_else(|| AuthError::Invalid("payload is not base64url".to_string()))?;
        let payload: Value = serde_json::from_slice(&payload_raw)
            .map_err(|e| AuthError::Invalid(format!("payload is not JSON: {}", e)))?;

        let subject = payload
            .get("sub")
            .and_then(Value::as_str)
            .ok_or_else(|| AuthError::Invalid("missing sub claim".to_string()))?;
        let exp = payload
            .get("exp")
            .and_then(Value::as_i64)
            .ok_or_else(|| AuthError::Invalid("missing exp claim".to_string()))?;
        if exp <= chrono::Utc::now().timestamp() {
            return Err(AuthError::Invalid("token expired".to_string()));
        }

        let expected = base64url_encode(format!("{}:{}", subject, self.secret).as_bytes());
        if parts[2] != expected {
            return Err(AuthError::Invalid("signature mismatch".to_string()));
        }

        Ok(Claims {
            subject: subject.to_string(),
        })
    }
}

/// Pick the provider for the configured security mode
pub fn provider_for(config: &SecurityConfig) -> Arc<dyn AuthProvider> {
    match config.mode {
        SecurityMode::Open => Arc::new(OpenAuth),
        SecurityMode::SecretKey => {
            let secret = config.secret_key.clone().unwrap_or_default();
            Arc::new(JwtAuth::new(secret))
        }
    }
}

const BASE64URL: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

fn base64url_encode(data: &[u8]) -> String {
    let mut out = String::with_capacity((data.len() + 2) / 3 * 4);
    for chunk in data.chunks(3) {
        let b = [
            chunk[0],
            chunk.get(1).copied().unwrap_or(0),
            chunk.get(2).copied().unwrap_or(0),
        ];
        let n = (u32::from(b[0]) << 16) | (u32::from(b[1]) << 8) | u32::from(b[2]);
        out.push(BASE64URL[(n >> 18) as usize & 63] as char);
        out.push(BASE64URL[(n >> 12) as usize & 63] as char);
        if chunk.len() > 1 {
            out.push(BASE64URL[(n >> 6) as usize & 63] as char);
        }
        if chunk.len() > 2 {
            out.push(BASE64URL[n as usize & 63] as char);
        }
    }
    out
}

fn base64url_decode(encoded: &str) -> Option<Vec<u8>> {
    let value_of = |c: u8| BASE64URL.iter().position(|&b| b == c).map(|v| v as u32);
    let bytes = encoded.as_bytes();
    let mut out = Vec::with_capacity(bytes.len() / 4 * 3);
    for chunk in bytes.chunks(4) {
        if chunk.len() < 2 {
            return None;
        }
        let mut n: u32 = 0;
        for &c in chunk {
            n = (n << 6) | value_of(c)?;
        }
        n <<= 6 * (4 - chunk.len()) as u32;
        out.push((n >> 16) as u8);
        if chunk.len() > 2 {
            out.push((n >> 8) as u8);
        }
        if chunk.len() > 3 {
            out.push(n as u8);
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base64url_round_trip() {
        for input in ["", "a", "ab", "abc", "abcd", r#"{"sub":"u1","exp":99}"#] {
            let encoded = base64url_encode(input.as_bytes());
            assert_eq!(
                base64url_decode(&encoded).unwrap(),
                input.as_bytes(),
                "round trip failed for {:?}",
                input
            );
        }
    }

    #[tokio::test]
    async fn test_open_auth_accepts_anything() {
        assert!(OpenAuth.validate(None).await.is_ok());
        assert!(OpenAuth.validate(Some("junk")).await.is_ok());
    }

    #[tokio::test]
    async fn test_jwt_round_trip() {
        let auth = JwtAuth::new("super-secret");
        let token = auth.generate_token("u1", 3600);
        let claims = auth.validate(Some(&token)).await.unwrap();
        assert_eq!(claims.subject, "u1");
    }

    #[tokio::test]
    async fn test_jwt_rejects_missing_and_garbage() {
        let auth = JwtAuth::new("super-secret");
        assert!(matches!(auth.validate(None).await, Err(AuthError::Missing)));
        assert!(auth.validate(Some("not-a-token")).await.is_err());
        assert!(auth.validate(Some("a.b.c")).await.is_err());
    }

    #[tokio::test]
    async fn test_jwt_rejects_wrong_secret() {
        let issuer = JwtAuth::new("secret-a");
        let verifier = JwtAuth::new("secret-b");
        let token = issuer.generate_token("u1", 3600);
        assert!(verifier.validate(Some(&token)).await.is_err());
    }

    #[tokio::test]
    async fn test_jwt_rejects_expired() {
        let auth = JwtAuth::new("super-secret");
        let token = auth.generate_token("u1", -10);
        assert!(matches!(
            auth.validate(Some(&token)).await,
            Err(AuthError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn test_provider_for_modes() {
        let open = provider_for(&SecurityConfig::default());
        assert!(open.validate(None).await.is_ok());

        let secured = provider_for(&SecurityConfig {
            mode: SecurityMode::SecretKey,
            secret_key: Some("k".repeat(32)),
        });
        assert!(secured.validate(None).await.is_err());
    }
}
