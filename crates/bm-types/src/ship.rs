//! Ship profiles: a named connection target plus its proxy preferences.

use std::fmt;

/// Proxy protocol a hangar serves.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Protocol {
    /// Authenticated HTTP proxy (Squid).
    #[default]
    Http,
    /// Authenticated SOCKS5 proxy (microsocks).
    Socks5,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Socks5 => "socks5",
        }
    }

    /// Accepts the wire spellings, including the `socks` alias.
    pub fn parse(value: &str) -> Option<Protocol> {
        match value.trim().to_ascii_lowercase().as_str() {
            "http" => Some(Protocol::Http),
            "socks5" | "socks" => Some(Protocol::Socks5),
            _ => None,
        }
    }

    /// Default remote listen port for the protocol.
    pub fn default_port(&self) -> u16 {
        match self {
            Protocol::Http => 18181,
            Protocol::Socks5 => 1080,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// HTTP install flavor. `Auto` lets the remote agent pick managed unless a
/// foreign Squid config forces the sidecar.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum HttpMode {
    #[default]
    Auto,
    Sidecar,
}

impl HttpMode {
    /// Wire form: auto serialises as the empty string.
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMode::Auto => "",
            HttpMode::Sidecar => "sidecar",
        }
    }

    pub fn parse(value: &str) -> Option<HttpMode> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "auto" => Some(HttpMode::Auto),
            "sidecar" => Some(HttpMode::Sidecar),
            _ => None,
        }
    }
}

/// A saved connection profile.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ship {
    /// Sanitised identifier, doubles as the profile file stem.
    pub name: String,
    /// DNS name or IP literal. Required.
    pub host: String,
    pub ssh_port: u16,
    pub ssh_user: String,
    pub protocol: Protocol,
    pub http_mode: HttpMode,
    /// 0 means "unset"; normalised to the protocol default on save.
    pub proxy_port: u16,
    pub no_firewall_change: bool,
    /// Bind the remote proxy to loopback; the operator tunnels in over SSH.
    pub listen_local: bool,
    pub smart_blinder: bool,
    pub smart_blinder_idle_minutes: u32,
}

impl Default for Ship {
    fn default() -> Self {
        Ship {
            name: String::new(),
            host: String::new(),
            ssh_port: 22,
            ssh_user: "root".to_string(),
            protocol: Protocol::default(),
            http_mode: HttpMode::default(),
            proxy_port: 0,
            no_firewall_change: false,
            listen_local: false,
            smart_blinder: true,
            smart_blinder_idle_minutes: 10,
        }
    }
}

impl Ship {
    pub fn new(name: impl Into<String>, host: impl Into<String>) -> Ship {
        Ship {
            name: name.into(),
            host: host.into(),
            ..Ship::default()
        }
    }

    /// Fill zero/empty fields with their documented defaults.
    pub fn normalize(&mut self) {
        if self.ssh_port == 0 {
            self.ssh_port = 22;
        }
        if self.ssh_user.trim().is_empty() {
            self.ssh_user = "root".to_string();
        }
        if self.proxy_port == 0 {
            self.proxy_port = self.protocol.default_port();
        }
        if self.smart_blinder_idle_minutes == 0 {
            self.smart_blinder_idle_minutes = 10;
        }
    }
}

/// Sanitise a ship name into `[a-z0-9._-]` with collapsed dashes.
///
/// Lower-cases, maps spaces to dashes, substitutes a single dash for any
/// other disallowed character, collapses dash runs, and trims leading and
/// trailing dashes. The result may be empty, which callers must reject.
pub fn sanitize_name(raw: &str) -> String {
    let raw = raw.trim().to_lowercase().replace(' ', "-");
    let mut out = String::with_capacity(raw.len());
    let mut last_dash = false;
    for ch in raw.chars() {
        let ok = ch.is_ascii_lowercase() || ch.is_ascii_digit() || matches!(ch, '.' | '_' | '-');
        if ok {
            if ch == '-' {
                if last_dash {
                    continue;
                }
                last_dash = true;
            } else {
                last_dash = false;
            }
            out.push(ch);
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    out.trim_matches('-').to_string()
}

#[cfg(test)]
#[path = "ship_tests.rs"]
mod tests;
