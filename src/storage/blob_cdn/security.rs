use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::{AppError, Result};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct Policy {
    pub expiry: i64,
}

/// Signs blob CDN URLs with an expiring policy
#[derive(Debug, Clone)]
pub struct CdnSecurity {
    secret: String,
    ttl_seconds: u64,
}

impl CdnSecurity {
    pub fn new(secret: impl Into<String>, ttl_seconds: u64) -> Self {
        Self {
            secret: secret.into(),
            ttl_seconds,
        }
    }

    /// Base64url-encoded JSON policy expiring at `expiry` (unix seconds).
    pub fn encode_policy(expiry: i64) -> Result<String> {
        let json = serde_json::to_vec(&Policy { expiry })?;
        Ok(URL_SAFE.encode(json))
    }

    /// Hex HMAC-SHA256 of an encoded policy.
    pub fn signature(&self, policy: &str) -> Result<String> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|e| AppError::Config(format!("invalid blob CDN secret: {}", e)))?;
        mac.update(policy.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// `policy=...&signature=...` valid for the configured lifetime.
    pub fn query(&self) -> Result<String> {
        let ttl = i64::try_from(self.ttl_seconds).unwrap_or(i64::MAX / 2);
        let policy = Self::encode_policy(Utc::now().timestamp().saturating_add(ttl))?;
        let signature = self.signature(&policy)?;
        Ok(format!("policy={}&signature={}", policy, signature))
    }

    pub fn sign_url(&self, url: &str) -> Result<String> {
        let separator = if url.contains('?') { '&' } else { '?' };
        Ok(format!("{}{}{}", url, separator, self.query()?))
    }
}
