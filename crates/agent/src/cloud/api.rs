//! Signed HTTP calls to the cloud REST API.
//!
//! One signing path for every edge→cloud request: `Content-MD5` over the
//! body, a millisecond timestamp, and an HMAC-SHA256 over
//! `timestamp || md5` keyed with the edge secret.

use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use tracing::{error, warn};

use crate::error::{AgentError, Result};

type HmacSha256 = Hmac<Sha256>;

pub const HEADER_AUTH: &str = "X-ChrysEdge-Auth";
pub const HEADER_DATE: &str = "X-Chrys-Date";
pub const HEADER_CONTENT_MD5: &str = "Content-MD5";

/// Signature material for one request body at one timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSignature {
    pub content_md5: String,
    pub timestamp_ms: String,
    pub mac: String,
}

/// Sign `payload` with `edge_secret` at `timestamp_ms`.
pub fn sign_payload(payload: &[u8], edge_secret: &str, timestamp_ms: i64) -> RequestSignature {
    let content_md5 = format!("{:x}", md5::compute(payload));
    let timestamp_ms = timestamp_ms.to_string();
    let mac = hmac_hex(
        format!("{}{}", timestamp_ms, content_md5).as_bytes(),
        edge_secret,
    );
    RequestSignature {
        content_md5,
        timestamp_ms,
        mac,
    }
}

/// Hex HMAC-SHA256 of `payload` keyed with `secret`.
pub fn hmac_hex(payload: &[u8], secret: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("hmac accepts any key length");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Execute a signed request and return the response body on 2xx.
/// 401/403 surface as Permission, 404 as NotFound, the rest as Transient.
pub async fn call_api_with_body<T: Serialize>(
    client: &reqwest::Client,
    method: reqwest::Method,
    url: &str,
    body: &T,
    edge_key: &str,
    edge_secret: &str,
) -> Result<Vec<u8>> {
    let payload = serde_json::to_vec(body)?;
    let signature = sign_payload(&payload, edge_secret, chrono::Utc::now().timestamp_millis());

    let response = client
        .request(method, url)
        .header(HEADER_AUTH, format!("{}:{}", edge_key, signature.mac))
        .header(HEADER_DATE, &signature.timestamp_ms)
        .header(HEADER_CONTENT_MD5, &signature.content_md5)
        .header(reqwest::header::CONTENT_TYPE, "application/json")
        .body(payload)
        .send()
        .await?;

    let status = response.status();
    let bytes = response.bytes().await?;

    if status.is_success() {
        return Ok(bytes.to_vec());
    }
    match status.as_u16() {
        401 | 403 => {
            error!(%status, "cloud rejected edge credentials");
            Err(AgentError::Permission)
        }
        404 => {
            warn!(url, "cloud endpoint not found");
            Err(AgentError::NotFound(url.to_string()))
        }
        _ => Err(AgentError::Transient(format!(
            "cloud API returned {}: {}",
            status,
            String::from_utf8_lossy(&bytes)
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn md5_of_empty_body() {
        let signature = sign_payload(b"", "secret", 0);
        assert_eq!(signature.content_md5, "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[test]
    fn hmac_matches_rfc4231_vector() {
        // RFC 4231 test case 2.
        let mac = hmac_hex(b"what do ya want for nothing?", "Jefe");
        assert_eq!(
            mac,
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn signature_is_deterministic() {
        let a = sign_payload(b"{\"x\":1}", "secret", 1700000000000);
        let b = sign_payload(b"{\"x\":1}", "secret", 1700000000000);
        assert_eq!(a, b);
        assert_eq!(a.timestamp_ms, "1700000000000");
        assert_eq!(a.mac.len(), 64);
    }

    #[test]
    fn signature_varies_with_secret_and_time() {
        let a = sign_payload(b"body", "secret-a", 1);
        let b = sign_payload(b"body", "secret-b", 1);
        let c = sign_payload(b"body", "secret-a", 2);
        assert_ne!(a.mac, b.mac);
        assert_ne!(a.mac, c.mac);
    }
}
