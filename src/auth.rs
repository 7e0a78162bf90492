//! Optional API-key gate (`spec.md` §9: "policy, not architecture"). When
//! `API_AUTH_ENABLED` is unset the gate is a no-op; when set, the configured
//! header must carry a key whose SHA-256 hash matches one of the `name:hash`
//! pairs in `API_KEYS`, mirroring `app/middleware/rate_limit.py`'s
//! `get_api_key_identifier` (`examples/original_source/app/middleware/rate_limit.py:83-86`).

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use sha2::{Digest, Sha256};

use crate::error::AppError;
use crate::state::AppState;

pub async fn require_api_key(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    if !state.config.api_auth_enabled {
        return Ok(next.run(request).await);
    }

    let presented = request
        .headers()
        .get(state.config.api_key_header.as_str())
        .and_then(|v| v.to_str().ok());

    match presented {
        Some(key) if state.config.api_keys.values().any(|stored| *stored == hash_key(key)) => {
            Ok(next.run(request).await)
        }
        _ => Err(AppError::Unauthorized),
    }
}

/// Lowercase hex SHA-256 digest of a presented key, compared against the
/// stored `name:sha256hex` pairs rather than the plaintext key itself.
fn hash_key(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_key_is_deterministic_and_lowercase_hex() {
        let a = hash_key("super-secret-key");
        let b = hash_key("super-secret-key");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn hash_key_differs_for_different_input() {
        assert_ne!(hash_key("key-one"), hash_key("key-two"));
    }

    #[test]
    fn hash_key_never_equals_its_own_plaintext() {
        // Guards against the inverted-contract bug this module once had: the
        // presented plaintext key must be hashed before comparison, never
        // compared directly against the stored hash.
        let key = "super-secret-key";
        assert_ne!(hash_key(key), key);
    }
}
