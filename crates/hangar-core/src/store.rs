//! Directory-backed store of ship profile files.
//!
//! One `<name>.ship` file per profile, line-oriented `KEY=value`. Older
//! files missing newer keys load with their documented defaults; unknown
//! keys are ignored so future revisions stay readable.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use bm_types::{HttpMode, Protocol, Ship, sanitize_name};

use crate::error::{HangarError, HangarResult};

const SHIP_SUFFIX: &str = ".ship";

pub struct ShipStore {
    dir: PathBuf,
}

impl ShipStore {
    /// Open (and create, 0700) the profile directory. `None` resolves
    /// `BEAMMEUP_SHIPS_DIR`, falling back to `~/.beammeup/ships`.
    pub fn open(dir: Option<PathBuf>) -> HangarResult<ShipStore> {
        let dir = match dir {
            Some(dir) => dir,
            None => match env::var("BEAMMEUP_SHIPS_DIR") {
                Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
                _ => {
                    let home = env::var("HOME").map_err(|_| {
                        HangarError::Other("cannot resolve home directory".into())
                    })?;
                    PathBuf::from(home).join(".beammeup").join("ships")
                }
            },
        };
        fs::create_dir_all(&dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&dir, fs::Permissions::from_mode(0o700))?;
        }
        Ok(ShipStore { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}{SHIP_SUFFIX}"))
    }

    /// Alphabetised names of saved profiles.
    pub fn list(&self) -> HangarResult<Vec<String>> {
        let mut ships = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(stem) = name.strip_suffix(SHIP_SUFFIX) {
                ships.push(stem.to_string());
            }
        }
        ships.sort();
        Ok(ships)
    }

    pub fn load(&self, name: &str) -> HangarResult<Ship> {
        let name = sanitize_name(name);
        if name.is_empty() {
            return Err(HangarError::InvalidShip("invalid ship name".into()));
        }
        let content = fs::read_to_string(self.path(&name))
            .map_err(|err| HangarError::InvalidShip(format!("open ship file {name:?}: {err}")))?;

        let mut vals = HashMap::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                vals.insert(key.to_string(), value.to_string());
            }
        }
        let get = |key: &str| vals.get(key).map(String::as_str).unwrap_or("");

        let ship = Ship {
            name: name.clone(),
            host: get("HOST").to_string(),
            ssh_port: parse_port_default(get("SSH_PORT"), 22),
            ssh_user: default_if_empty(get("SSH_USER"), "root"),
            protocol: Protocol::parse(get("PROTOCOL")).unwrap_or_default(),
            http_mode: HttpMode::parse(get("HTTP_MODE")).unwrap_or_default(),
            proxy_port: parse_port_default(get("PROXY_PORT"), 18181),
            no_firewall_change: parse_bool(get("NO_FIREWALL_CHANGE")),
            listen_local: parse_bool(get("LISTEN_LOCAL")),
            smart_blinder: if vals.contains_key("SMART_BLINDER") {
                parse_bool(get("SMART_BLINDER"))
            } else {
                true
            },
            smart_blinder_idle_minutes: parse_int_default(get("SMART_BLINDER_IDLE_MINUTES"), 10),
        };
        if ship.host.trim().is_empty() {
            return Err(HangarError::InvalidShip(format!(
                "ship {name:?} missing HOST"
            )));
        }
        Ok(ship)
    }

    /// Validate, sanitise, fill defaults, and write the canonical ordered
    /// key sequence with owner-only permissions.
    pub fn save(&self, mut ship: Ship) -> HangarResult<Ship> {
        ship.name = sanitize_name(&ship.name);
        if ship.name.is_empty() {
            return Err(HangarError::InvalidShip("ship name is required".into()));
        }
        if ship.host.trim().is_empty() {
            return Err(HangarError::InvalidShip("ship host is required".into()));
        }
        ship.normalize();

        let content = format!(
            "HOST={}\nSSH_PORT={}\nSSH_USER={}\nPROTOCOL={}\nHTTP_MODE={}\nPROXY_PORT={}\nNO_FIREWALL_CHANGE={}\nLISTEN_LOCAL={}\nSMART_BLINDER={}\nSMART_BLINDER_IDLE_MINUTES={}\n",
            ship.host,
            ship.ssh_port,
            ship.ssh_user,
            ship.protocol.as_str(),
            ship.http_mode.as_str(),
            ship.proxy_port,
            flag(ship.no_firewall_change),
            flag(ship.listen_local),
            flag(ship.smart_blinder),
            ship.smart_blinder_idle_minutes,
        );

        let path = self.path(&ship.name);
        fs::write(&path, content)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o600))?;
        }
        Ok(ship)
    }

    /// Idempotent removal of a profile.
    pub fn delete(&self, name: &str) -> HangarResult<()> {
        let name = sanitize_name(name);
        if name.is_empty() {
            return Err(HangarError::InvalidShip("invalid ship name".into()));
        }
        match fs::remove_file(self.path(&name)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

fn flag(value: bool) -> &'static str {
    if value { "1" } else { "0" }
}

fn parse_bool(raw: &str) -> bool {
    raw == "1" || raw.eq_ignore_ascii_case("true")
}

fn default_if_empty(value: &str, default: &str) -> String {
    if value.trim().is_empty() {
        default.to_string()
    } else {
        value.to_string()
    }
}

fn parse_port_default(raw: &str, default: u16) -> u16 {
    match raw.trim().parse::<u16>() {
        Ok(v) if v > 0 => v,
        _ => default,
    }
}

fn parse_int_default(raw: &str, default: u32) -> u32 {
    match raw.trim().parse::<u32>() {
        Ok(v) if v > 0 => v,
        _ => default,
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
