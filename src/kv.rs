//! Consul KV read client
//!
//! Thin typed wrapper over the KV HTTP API: recursive prefix listing and
//! single-key reads. Auth is an optional `X-Consul-Token` header and/or
//! basic credentials, independently configurable. A 404 is "absent", and so
//! is every other transport failure as far as callers are concerned — the
//! resolver and schedule store degrade instead of erroring.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Short fixed timeout so a wedged config store degrades the current pass
/// instead of hanging the scheduler.
const KV_TIMEOUT: Duration = Duration::from_secs(5);

/// One entry of a recursive KV listing, as Consul serialises it.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct KvEntry {
    key: String,
    value: Option<String>,
}

pub struct KvClient {
    http: reqwest::Client,
    addr: String,
    token: Option<String>,
    basic: Option<(String, String)>,
}

impl KvClient {
    pub fn new(
        addr: String,
        token: Option<String>,
        basic: Option<(String, String)>,
    ) -> reqwest::Result<Self> {
        let http = reqwest::Client::builder().timeout(KV_TIMEOUT).build()?;
        Ok(Self {
            http,
            addr: addr.trim_end_matches('/').to_string(),
            token,
            basic,
        })
    }

    /// Recursive listing under `prefix`. Values are decoded; entries whose
    /// value is missing or undecodable are skipped. Any failure, 404
    /// included, yields an empty list.
    pub async fn list(&self, prefix: &str) -> Vec<(String, String)> {
        let entries = self
            .fetch(&format!("{prefix}?recurse=true"))
            .await
            .unwrap_or_default();
        entries
            .into_iter()
            .filter_map(|entry| {
                let raw = entry.value?;
                let decoded = decode_value(&raw)?;
                Some((entry.key, decoded))
            })
            .collect()
    }

    /// Single-key read, decoded and trimmed. `None` on absence or failure.
    pub async fn get(&self, key: &str) -> Option<String> {
        let entries = self.fetch(key).await?;
        let raw = entries.into_iter().next()?.value?;
        let decoded = decode_value(&raw)?;
        let trimmed = decoded.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(trimmed.to_string())
    }

    async fn fetch(&self, key_and_query: &str) -> Option<Vec<KvEntry>> {
        let url = format!("{}/v1/kv/{}", self.addr, key_and_query);
        let mut req = self.http.get(&url);
        if let Some(token) = &self.token {
            req = req.header("X-Consul-Token", token);
        }
        if let Some((user, pass)) = &self.basic {
            req = req.basic_auth(user, Some(pass));
        }
        let resp = match req.send().await {
            Ok(resp) => resp,
            Err(e) => {
                debug!("KV request to {} failed: {}", url, e);
                return None;
            }
        };
        if resp.status() == StatusCode::NOT_FOUND {
            return None;
        }
        if !resp.status().is_success() {
            debug!("KV request to {} returned {}", url, resp.status());
            return None;
        }
        resp.json::<Vec<KvEntry>>().await.ok()
    }
}

/// Values are base64 in the listing API but operators also paste plain text
/// through some UIs; accept both. Literal `\n` / `\r\n` sequences inside a
/// value are normalised to real newlines before any YAML parsing.
pub(crate) fn decode_value(raw: &str) -> Option<String> {
    let text = match BASE64.decode(raw) {
        Ok(bytes) => String::from_utf8(bytes).ok()?,
        Err(_) => raw.to_string(),
    };
    Some(normalize_escapes(text))
}

fn normalize_escapes(text: String) -> String {
    if text.contains("\\n") || text.contains("\\r\\n") {
        text.replace("\\r\\n", "\n").replace("\\n", "\n")
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_base64_value() {
        let encoded = BASE64.encode("host: 10.0.0.1\n");
        assert_eq!(decode_value(&encoded).unwrap(), "host: 10.0.0.1\n");
    }

    #[test]
    fn test_decode_plain_value() {
        assert_eq!(
            decode_value("host: 10.0.0.1").unwrap(),
            "host: 10.0.0.1"
        );
    }

    #[test]
    fn test_decode_normalises_literal_escapes() {
        let encoded = BASE64.encode("host: h\\nuser: u\\r\\npassword: p");
        assert_eq!(
            decode_value(&encoded).unwrap(),
            "host: h\nuser: u\npassword: p"
        );
    }

    #[test]
    fn test_decode_rejects_non_utf8() {
        let encoded = BASE64.encode([0xffu8, 0xfe, 0x00]);
        assert!(decode_value(&encoded).is_none());
    }

    #[test]
    fn test_kv_entry_deserialises_consul_shape() {
        let json = r#"[{"LockIndex":0,"Key":"routers/r1","Flags":0,"Value":"aG9zdDogaA==","CreateIndex":1,"ModifyIndex":1}]"#;
        let entries: Vec<KvEntry> = serde_json::from_str(json).unwrap();
        assert_eq!(entries[0].key, "routers/r1");
        assert_eq!(entries[0].value.as_deref(), Some("aG9zdDogaA=="));
    }
}
