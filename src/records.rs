//! Router record data model
//!
//! One `DeviceRecord` per router: connection identity plus credentials.
//! Records arrive as loosely-typed YAML from any of the config source tiers
//! and are validated here; anything missing a required field is dropped by
//! the resolver rather than aborting a whole resolution pass.

use serde::Deserialize;
use std::fmt;

/// Default management port when a record carries none (or an unparseable one).
pub const DEFAULT_PORT: u16 = 22;

/// The ordered set of records produced by one resolution pass.
/// Recomputed fresh on every sweep and delta tick, never mutated in place.
pub type ResolvedFleet = Vec<DeviceRecord>;

/// Connection identity for one router.
///
/// `name` doubles as the archive subdirectory and the fleet-membership key,
/// so two sources producing the same name are the same router.
#[derive(Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
}

// Credentials must never reach a log line, even through {:?}.
impl fmt::Debug for DeviceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceRecord")
            .field("name", &self.name)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

/// Raw per-router record as it appears in a KV value or a secrets file.
/// Every field optional; validation happens in [`RawRecord::into_record`].
#[derive(Debug, Default, Deserialize)]
pub struct RawRecord {
    pub name: Option<String>,
    pub host: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    /// Kept loosely typed: sources hand us integers or strings ("8022", "abc").
    pub port: Option<serde_yaml::Value>,
}

impl RawRecord {
    /// Validate into a [`DeviceRecord`], `None` when a required field is
    /// missing or empty. `fallback_name` is the source's own key/filename,
    /// used when the record carries no explicit `name`.
    pub fn into_record(self, fallback_name: &str) -> Option<DeviceRecord> {
        let name = match self.name.filter(|n| !n.trim().is_empty()) {
            Some(n) => n,
            None => fallback_name.to_string(),
        };
        if name.trim().is_empty() {
            return None;
        }
        let host = self.host.filter(|h| !h.trim().is_empty())?;
        let user = self.user.filter(|u| !u.trim().is_empty())?;
        let password = self.password.filter(|p| !p.is_empty())?;
        Some(DeviceRecord {
            name,
            host,
            port: parse_port(self.port.as_ref()),
            user,
            password,
        })
    }
}

/// Parse a record's YAML into a validated [`DeviceRecord`].
pub fn parse_yaml_record(text: &str, fallback_name: &str) -> Option<DeviceRecord> {
    let raw: RawRecord = serde_yaml::from_str(text).ok()?;
    raw.into_record(fallback_name)
}

/// Port values come in as numbers, strings or nothing at all; anything that
/// doesn't fit in a u16 falls back to [`DEFAULT_PORT`].
pub fn parse_port(value: Option<&serde_yaml::Value>) -> u16 {
    match value {
        Some(serde_yaml::Value::Number(n)) => n
            .as_u64()
            .and_then(|p| u16::try_from(p).ok())
            .unwrap_or(DEFAULT_PORT),
        Some(serde_yaml::Value::String(s)) => s.trim().parse().unwrap_or(DEFAULT_PORT),
        _ => DEFAULT_PORT,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_record_parses() {
        let rec = parse_yaml_record(
            "name: core-1\nhost: 10.0.0.1\nuser: admin\npassword: s3cret\nport: 2222\n",
            "ignored",
        )
        .unwrap();
        assert_eq!(rec.name, "core-1");
        assert_eq!(rec.host, "10.0.0.1");
        assert_eq!(rec.port, 2222);
    }

    #[test]
    fn test_missing_password_is_dropped() {
        let rec = parse_yaml_record("host: 10.0.0.1\nuser: admin\n", "r1");
        assert!(rec.is_none());
    }

    #[test]
    fn test_unparseable_port_defaults_to_22() {
        let rec = parse_yaml_record(
            "host: 10.0.0.1\nuser: admin\npassword: x\nport: abc\n",
            "r1",
        )
        .unwrap();
        assert_eq!(rec.port, DEFAULT_PORT);
    }

    #[test]
    fn test_absent_port_defaults_to_22() {
        let rec = parse_yaml_record("host: 10.0.0.1\nuser: admin\npassword: x\n", "r1").unwrap();
        assert_eq!(rec.port, 22);
    }

    #[test]
    fn test_name_falls_back_to_source_key() {
        let rec = parse_yaml_record("host: h\nuser: u\npassword: p\n", "edge-7").unwrap();
        assert_eq!(rec.name, "edge-7");
    }

    #[test]
    fn test_empty_fallback_name_is_dropped() {
        let rec = parse_yaml_record("host: h\nuser: u\npassword: p\n", "");
        assert!(rec.is_none());
    }

    #[test]
    fn test_debug_never_prints_password() {
        let rec = DeviceRecord {
            name: "r1".into(),
            host: "h".into(),
            port: 22,
            user: "admin".into(),
            password: "topsecret".into(),
        };
        let printed = format!("{:?}", rec);
        assert!(!printed.contains("topsecret"));
    }
}
