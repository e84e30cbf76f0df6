//! q-sign request signing for COS-style object stores.
//!
//! Reference: https://cloud.tencent.com/document/product/436/7778

use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::header::HeaderMap;
use sha1::{Digest, Sha1};
use std::collections::{BTreeMap, HashMap};
use urlencoding::{decode, encode};

use crate::error::{AppError, Result};

type HmacSha1 = Hmac<Sha1>;

/// Request signer
pub struct Signer<'a> {
    method: &'a str,
    url_path: &'a str,
    headers: BTreeMap<String, String>,
    query: BTreeMap<String, String>,
}

impl<'a> Signer<'a> {
    pub fn new(
        method: &'a str,
        url_path: &'a str,
        headers: Option<&HeaderMap>,
        query: Option<&HashMap<String, String>>,
    ) -> Self {
        let headers = headers
            .map(|headers| {
                headers
                    .iter()
                    .map(|(k, v)| (k.as_str().to_string(), String::from_utf8_lossy(v.as_bytes()).into_owned()))
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        let query = query
            .map(|q| q.iter().map(|(k, v)| (k.clone(), v.clone())).collect::<Vec<_>>())
            .unwrap_or_default();

        Self {
            method,
            url_path,
            headers: Self::encode_pairs(headers),
            query: Self::encode_pairs(query),
        }
    }

    /// Lowercase url-encoded keys with url-encoded values, sorted by key.
    fn encode_pairs(pairs: Vec<(String, String)>) -> BTreeMap<String, String> {
        pairs
            .into_iter()
            .map(|(k, v)| (encode(&k).to_lowercase(), encode(&v).into_owned()))
            .collect()
    }

    fn key_list(map: &BTreeMap<String, String>) -> String {
        map.keys().cloned().collect::<Vec<_>>().join(";")
    }

    fn key_values(map: &BTreeMap<String, String>) -> String {
        map.iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&")
    }

    fn key_time(valid_seconds: u32) -> String {
        let start = Utc::now().timestamp();
        let end = start + i64::from(valid_seconds);
        format!("{};{}", start, end)
    }

    fn hmac_hex(key: &str, data: &str) -> Result<String> {
        let mut mac = HmacSha1::new_from_slice(key.as_bytes())
            .map_err(|e| AppError::Config(format!("invalid signing key: {}", e)))?;
        mac.update(data.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn http_string(&self) -> String {
        let path = decode(self.url_path)
            .map(|p| p.into_owned())
            .unwrap_or_else(|_| self.url_path.to_string());
        format!(
            "{}\n{}\n{}\n{}\n",
            self.method.to_lowercase(),
            path,
            Self::key_values(&self.query),
            Self::key_values(&self.headers)
        )
    }

    fn string_to_sign(&self, key_time: &str) -> String {
        let digest = Sha1::digest(self.http_string().as_bytes());
        format!("sha1\n{}\n{}\n", key_time, hex::encode(digest))
    }

    /// Authorization value valid for `valid_seconds` from now.
    pub fn signature(&self, secret_id: &str, secret_key: &str, valid_seconds: u32) -> Result<String> {
        let key_time = Self::key_time(valid_seconds);
        let sign_key = Self::hmac_hex(secret_key, &key_time)?;
        let signature = Self::hmac_hex(&sign_key, &self.string_to_sign(&key_time))?;
        Ok(format!(
            "q-sign-algorithm=sha1&q-ak={}&q-sign-time={}&q-key-time={}&q-header-list={}&q-url-param-list={}&q-signature={}",
            secret_id,
            key_time,
            key_time,
            Self::key_list(&self.headers),
            Self::key_list(&self.query),
            signature
        ))
    }
}
