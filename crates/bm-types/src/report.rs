//! The `BM_` key/value report protocol emitted by the remote agent.
//!
//! The remote side prints one `BM_KEY=value` pair per stdout line; anything
//! else (package manager chatter, shell noise) is ignored by the parser.
//! Downstream code depends on the stable markers `BM_PREFLIGHT`,
//! `BM_PUBLIC_IP`, `BM_RESULT_PROTOCOL`, and `BM_HANGAR_STATUS`.

use std::collections::HashMap;
use std::fmt;

/// Parsed `BM_*` key/value pairs from a remote run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KeyValues(HashMap<String, String>);

impl KeyValues {
    /// Extract `BM_*` pairs from arbitrary remote output.
    ///
    /// A line contributes a pair iff, after trimming, it begins with `BM_`
    /// and contains at least one `=`. Later lines overwrite earlier ones
    /// for duplicate keys.
    pub fn parse(output: &str) -> KeyValues {
        let mut map = HashMap::new();
        for line in output.lines() {
            let line = line.trim();
            if !line.starts_with("BM_") {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                map.insert(key.to_string(), value.to_string());
            }
        }
        KeyValues(map)
    }

    /// Value for `key`, or the empty string when absent.
    pub fn get(&self, key: &str) -> &str {
        self.0.get(key).map(String::as_str).unwrap_or("")
    }

    /// True iff the value is `1`, `true`, or `yes` (case-insensitive).
    pub fn get_bool(&self, key: &str) -> bool {
        matches!(
            self.get(key).trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes"
        )
    }

    /// Base-10 integer value; 0 when absent or unparseable.
    pub fn get_int(&self, key: &str) -> i64 {
        self.get(key).trim().parse().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Keys in unspecified order; callers sort for stable output.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

/// Reconciled state of the remote hangar.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HangarStatus {
    Online,
    Missing,
    Drift,
    Blinded,
    /// Future remote values are preserved opaquely rather than rejected.
    Other(String),
}

impl HangarStatus {
    pub fn parse(value: &str) -> Option<HangarStatus> {
        let value = value.trim();
        match value {
            "" => None,
            "online" => Some(HangarStatus::Online),
            "missing" => Some(HangarStatus::Missing),
            "drift" => Some(HangarStatus::Drift),
            "blinded" => Some(HangarStatus::Blinded),
            other => Some(HangarStatus::Other(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            HangarStatus::Online => "online",
            HangarStatus::Missing => "missing",
            HangarStatus::Drift => "drift",
            HangarStatus::Blinded => "blinded",
            HangarStatus::Other(v) => v,
        }
    }
}

impl fmt::Display for HangarStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-protocol slice of an inventory snapshot.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProtocolState {
    pub exists: bool,
    pub active: bool,
    /// Ports travel as strings: the remote may report nothing at all.
    pub port: String,
    pub user: String,
    pub pass: String,
    /// `managed`, `sidecar`, or `legacy`.
    pub mode: String,
    pub managed: bool,
    pub legacy: bool,
}

/// Decoded snapshot of a target after an inventory run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Inventory {
    /// Advisory only; multi-homed hosts may report an arbitrary address.
    pub public_ip: String,
    pub socks5: ProtocolState,
    pub http: ProtocolState,
    pub hangar_status: HangarStatus,
    pub metadata_exists: bool,
}

impl Inventory {
    /// Map inventory keys out of a parsed report.
    ///
    /// A missing `BM_HANGAR_STATUS` falls back to `online` when any service
    /// exists and `missing` otherwise, matching older agent revisions.
    pub fn from_values(kv: &KeyValues) -> Inventory {
        let status = HangarStatus::parse(kv.get("BM_HANGAR_STATUS")).unwrap_or_else(|| {
            if kv.get_bool("BM_SOCKS_EXISTS") || kv.get_bool("BM_HTTP_EXISTS") {
                HangarStatus::Online
            } else {
                HangarStatus::Missing
            }
        });
        Inventory {
            public_ip: kv.get("BM_PUBLIC_IP").to_string(),
            socks5: ProtocolState {
                exists: kv.get_bool("BM_SOCKS_EXISTS"),
                active: kv.get_bool("BM_SOCKS_ACTIVE"),
                port: kv.get("BM_SOCKS_PORT").to_string(),
                user: kv.get("BM_SOCKS_USER").to_string(),
                pass: kv.get("BM_SOCKS_PASS").to_string(),
                mode: kv.get("BM_SOCKS_MODE").to_string(),
                managed: true,
                legacy: false,
            },
            http: ProtocolState {
                exists: kv.get_bool("BM_HTTP_EXISTS"),
                active: kv.get_bool("BM_HTTP_ACTIVE"),
                port: kv.get("BM_HTTP_PORT").to_string(),
                user: kv.get("BM_HTTP_USER").to_string(),
                pass: kv.get("BM_HTTP_PASS").to_string(),
                mode: kv.get("BM_HTTP_MODE").to_string(),
                managed: kv.get_bool("BM_HTTP_MANAGED"),
                legacy: kv.get_bool("BM_HTTP_LEGACY"),
            },
            hangar_status: status,
            metadata_exists: kv.get_bool("BM_METADATA_EXISTS"),
        }
    }
}

/// Decoded result block of a show/apply/destroy run.
#[derive(Clone, Debug, Default)]
pub struct ActionResult {
    /// `SOCKS5`, `HTTP`, or `DESTROY`.
    pub protocol: String,
    pub http_mode: String,
    pub host: String,
    pub port: String,
    pub user: String,
    pub pass: String,
    /// `created|updated|show|destroyed|destroy-noop`.
    pub action: String,
    pub firewall_note: String,
    pub note: String,
    /// Unmodified combined remote output, for debugging.
    pub raw_output: String,
    /// Present when the remote also emitted inventory keys.
    pub inventory: Option<Inventory>,
    /// Full parsed mapping, including preflight keys.
    pub values: KeyValues,
}

#[cfg(test)]
#[path = "report_tests.rs"]
mod tests;
