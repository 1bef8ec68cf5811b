//! RS256 JWT minting for the broker connection.

use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};

use crate::error::{AgentError, Result};

#[derive(Serialize, Deserialize, Debug)]
struct Claims {
    aud: String,
    iat: i64,
    exp: i64,
}

/// Mint a broker password: audience = project id, valid for `ttl`.
pub fn create_jwt(project_id: &str, private_key_pem: &[u8], ttl: chrono::Duration) -> Result<String> {
    let now = chrono::Utc::now();
    let claims = Claims {
        aud: project_id.to_string(),
        iat: now.timestamp(),
        exp: (now + ttl).timestamp(),
    };
    let key = EncodingKey::from_rsa_pem(private_key_pem)
        .map_err(|e| AgentError::Validation(format!("invalid private key: {}", e)))?;
    encode(&Header::new(Algorithm::RS256), &claims, &key)
        .map_err(|e| AgentError::Validation(format!("failed to sign jwt: {}", e)))
}

/// Expiry of a token in epoch milliseconds, read without verification.
pub fn token_expiry_ms(token: &str) -> Result<i64> {
    use base64::Engine;

    let payload = token
        .split('.')
        .nth(1)
        .ok_or_else(|| AgentError::Validation("malformed jwt".to_string()))?;
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|e| AgentError::Validation(format!("malformed jwt payload: {}", e)))?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes)?;
    let exp = claims
        .get("exp")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| AgentError::Validation("jwt missing exp".to_string()))?;
    Ok(exp * 1000)
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;

    fn unsigned_token(exp: i64) -> String {
        let engine = &base64::engine::general_purpose::URL_SAFE_NO_PAD;
        let header = engine.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
        let payload = engine.encode(
            serde_json::to_vec(&serde_json::json!({"aud": "p", "iat": 1, "exp": exp})).unwrap(),
        );
        format!("{}.{}.signature", header, payload)
    }

    #[test]
    fn expiry_parsed_in_milliseconds() {
        let token = unsigned_token(1_700_000_000);
        assert_eq!(token_expiry_ms(&token).unwrap(), 1_700_000_000_000);
    }

    #[test]
    fn malformed_tokens_rejected() {
        assert!(token_expiry_ms("no-dots").is_err());
        assert!(token_expiry_ms("a.!!!.c").is_err());

        let engine = &base64::engine::general_purpose::URL_SAFE_NO_PAD;
        let no_exp = format!(
            "h.{}.s",
            engine.encode(br#"{"aud":"p"}"#)
        );
        assert!(token_expiry_ms(&no_exp).is_err());
    }

    #[test]
    fn create_jwt_rejects_garbage_key() {
        let err = create_jwt("project", b"not a pem", chrono::Duration::hours(1)).unwrap_err();
        assert!(matches!(err, AgentError::Validation(_)));
    }
}
