//! Fleet inventory resolution
//!
//! Three prioritized config source tiers, tried in fixed order, first tier
//! yielding at least one valid record wins for the whole pass:
//!
//! 1. Consul KV under a configured prefix (recursive listing, one YAML
//!    record per key)
//! 2. a local directory of per-router YAML secret files
//! 3. a legacy static XML document (one element per router, four positional
//!    child fields: host / user / password / port)
//!
//! Partial-source blending is deliberately unsupported: a fleet migrating
//! from static config to the KV store commits to one tier per pass. A tier
//! holding only invalid records counts as empty and resolution falls
//! through.

use crate::kv::KvClient;
use crate::records::{parse_yaml_record, DeviceRecord, ResolvedFleet, DEFAULT_PORT};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, warn};

/// The fixed tier order. Data, not control flow: `resolve` iterates and
/// short-circuits instead of duplicating try/fallback logic per source.
const TIERS: [SourceTier; 3] = [
    SourceTier::KvStore,
    SourceTier::SecretsDir,
    SourceTier::StaticDocument,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceTier {
    KvStore,
    SecretsDir,
    StaticDocument,
}

pub struct SourceResolver {
    kv: Option<Arc<KvClient>>,
    kv_prefix: String,
    secrets_dir: PathBuf,
    static_config: PathBuf,
}

impl SourceResolver {
    pub fn new(
        kv: Option<Arc<KvClient>>,
        kv_prefix: String,
        secrets_dir: PathBuf,
        static_config: PathBuf,
    ) -> Self {
        Self {
            kv,
            kv_prefix,
            secrets_dir,
            static_config,
        }
    }

    /// Resolve the current fleet. Never fails: an unreachable or empty tier
    /// falls through to the next, and exhausting all tiers yields an empty
    /// fleet.
    pub async fn resolve(&self) -> ResolvedFleet {
        for tier in TIERS {
            let records = dedupe_by_name(self.load_tier(tier).await);
            if !records.is_empty() {
                debug!("resolved {} router(s) from {:?}", records.len(), tier);
                return records;
            }
        }
        debug!("no config source yielded any router record");
        Vec::new()
    }

    async fn load_tier(&self, tier: SourceTier) -> ResolvedFleet {
        match tier {
            SourceTier::KvStore => self.load_kv_tier().await,
            SourceTier::SecretsDir => self.load_secrets_tier().await,
            SourceTier::StaticDocument => self.load_static_tier().await,
        }
    }

    async fn load_kv_tier(&self) -> ResolvedFleet {
        let Some(kv) = &self.kv else {
            return Vec::new();
        };
        let mut records = Vec::new();
        for (key, text) in kv.list(&self.kv_prefix).await {
            // The key's last path segment names the router when the record
            // itself doesn't.
            let fallback = key.rsplit('/').next().unwrap_or("");
            match parse_yaml_record(&text, fallback) {
                Some(record) => records.push(record),
                None => debug!("skipping invalid KV record under {}", key),
            }
        }
        records
    }

    async fn load_secrets_tier(&self) -> ResolvedFleet {
        let mut entries = match fs::read_dir(&self.secrets_dir).await {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };
        let mut files = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            match entry.file_type().await {
                Ok(ft) if ft.is_file() => files.push(entry.path()),
                _ => {}
            }
        }
        // Directory iteration order is OS-dependent; sort for deterministic
        // output.
        files.sort();

        let mut records = Vec::new();
        for path in files {
            let text = match fs::read_to_string(&path).await {
                Ok(text) => text,
                Err(e) => {
                    debug!("skipping unreadable secret file {:?}: {}", path, e);
                    continue;
                }
            };
            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default();
            match parse_yaml_record(&text, stem) {
                Some(record) => records.push(record),
                None => debug!("skipping invalid secret file {:?}", path),
            }
        }
        records
    }

    async fn load_static_tier(&self) -> ResolvedFleet {
        let text = match fs::read_to_string(&self.static_config).await {
            Ok(text) => text,
            Err(_) => return Vec::new(),
        };
        parse_static_document(&text).unwrap_or_else(|e| {
            warn!(
                "static config {:?} is not valid XML: {}",
                self.static_config, e
            );
            Vec::new()
        })
    }
}

/// Legacy schema: one element per router whose tag is the router name, with
/// four ordered children read positionally as host / user / password / port.
fn parse_static_document(text: &str) -> Result<ResolvedFleet, roxmltree::Error> {
    let doc = roxmltree::Document::parse(text)?;
    let mut records = Vec::new();
    for router in doc.root_element().children().filter(|n| n.is_element()) {
        let name = router.tag_name().name().to_string();
        let fields: Vec<String> = router
            .children()
            .filter(|n| n.is_element())
            .map(|n| n.text().unwrap_or_default().trim().to_string())
            .collect();
        let (Some(host), Some(user), Some(password)) =
            (fields.first(), fields.get(1), fields.get(2))
        else {
            debug!("skipping malformed static entry {}", name);
            continue;
        };
        if name.is_empty() || host.is_empty() || user.is_empty() || password.is_empty() {
            debug!("skipping incomplete static entry {}", name);
            continue;
        }
        let port = fields
            .get(3)
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_PORT);
        records.push(DeviceRecord {
            name,
            host: host.clone(),
            port,
            user: user.clone(),
            password: password.clone(),
        });
    }
    Ok(records)
}

/// `name` is the fleet-membership key; keep the first record per name so a
/// duplicate inside one tier can't produce two artifacts for one router.
fn dedupe_by_name(records: ResolvedFleet) -> ResolvedFleet {
    let mut seen = HashSet::new();
    records
        .into_iter()
        .filter(|r| seen.insert(r.name.clone()))
        .collect()
}
