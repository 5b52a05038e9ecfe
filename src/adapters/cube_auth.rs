//! Request signing for the Cube REST API.
//!
//! Every request carries `x-api-key`, `x-api-signature` and `x-api-timestamp`.
//! The signature is base64(HMAC-SHA256(secret, "cube.xyz" || ts_le_u64)),
//! where the secret is the hex-decoded API secret and `ts` is unix seconds.

use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine};
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use sha2::Sha256;

use crate::error::{Result, TrancheError};

type HmacSha256 = Hmac<Sha256>;

const SIGNING_PREFIX: &[u8] = b"cube.xyz";

#[derive(Clone)]
pub struct CubeCredentials {
    api_key: String,
    secret: Vec<u8>,
}

impl std::fmt::Debug for CubeCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CubeCredentials")
            .field("api_key", &self.api_key)
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl CubeCredentials {
    pub fn new(api_key: &str, api_secret_hex: &str) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(TrancheError::Signature("API key is empty".to_string()));
        }
        let secret = hex::decode(api_secret_hex.trim())
            .map_err(|e| TrancheError::Signature(format!("API secret is not hex: {}", e)))?;
        if secret.is_empty() {
            return Err(TrancheError::Signature("API secret is empty".to_string()));
        }
        Ok(Self {
            api_key: api_key.trim().to_string(),
            secret,
        })
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Signature for the given unix timestamp (seconds)
    pub fn sign(&self, timestamp: i64) -> Result<String> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| TrancheError::Signature(format!("invalid secret: {}", e)))?;
        mac.update(SIGNING_PREFIX);
        mac.update(&(timestamp as u64).to_le_bytes());
        Ok(BASE64_STANDARD.encode(mac.finalize().into_bytes()))
    }

    /// Authentication headers for a request sent now
    pub fn headers(&self) -> Result<HeaderMap> {
        self.headers_at(Utc::now().timestamp())
    }

    pub fn headers_at(&self, timestamp: i64) -> Result<HeaderMap> {
        let signature = self.sign(timestamp)?;

        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("x-api-key"),
            HeaderValue::from_str(&self.api_key)
                .map_err(|e| TrancheError::Signature(format!("invalid API key header: {}", e)))?,
        );
        headers.insert(
            HeaderName::from_static("x-api-signature"),
            HeaderValue::from_str(&signature)
                .map_err(|e| TrancheError::Signature(format!("invalid signature header: {}", e)))?,
        );
        headers.insert(
            HeaderName::from_static("x-api-timestamp"),
            HeaderValue::from(timestamp),
        );
        Ok(headers)
    }
}
