use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::{ArgAction, Parser};

use bm_types::{HttpMode, Protocol};
use hangar_core::driver::{Action, LaunchRequest};
use secrecy::SecretString;
use ssh_core::{ConnectOptions, HostKeyMode};

#[derive(Debug, Parser)]
#[command(
    name = "beammeup",
    about = "Manage HTTP/SOCKS5 proxy hangars on a VPS over SSH"
)]
pub struct BeamArgs {
    /// VPS host or IP
    #[arg(long, value_name = "HOST")]
    host: Option<String>,
    /// Use a saved ship profile from ~/.beammeup/ships
    #[arg(long, value_name = "NAME")]
    ship: Option<String>,
    /// List saved ship profiles and exit
    #[arg(long, action = ArgAction::SetTrue)]
    list_ships: bool,
    /// SSH port (default: 22)
    #[arg(long, value_name = "PORT")]
    ssh_port: Option<u16>,
    /// SSH user (default: root)
    #[arg(long, value_name = "USER")]
    ssh_user: Option<String>,
    /// Provide the SSH password non-interactively; otherwise prompt
    #[arg(long, value_name = "PASSWORD")]
    ssh_password: Option<String>,
    /// Override the SSH host-key trust file path
    #[arg(long, value_name = "PATH")]
    ssh_known_hosts: Option<PathBuf>,
    /// Require a known SSH host key (no TOFU)
    #[arg(long, action = ArgAction::SetTrue)]
    strict_host_key: bool,
    /// Disable SSH host key verification (UNSAFE)
    #[arg(long, action = ArgAction::SetTrue)]
    insecure_ignore_host_key: bool,
    /// Target protocol: http or socks5
    #[arg(long, value_name = "PROTOCOL")]
    protocol: Option<String>,
    /// HTTP install flavor: auto or sidecar
    #[arg(long, value_name = "MODE")]
    http_mode: Option<String>,
    /// Proxy port for configure/preflight
    #[arg(long, value_name = "PORT")]
    proxy_port: Option<u16>,
    /// show|configure|rotate|destroy
    #[arg(long, value_name = "ACTION")]
    action: Option<String>,
    /// Print the detected hangar inventory and exit
    #[arg(long, action = ArgAction::SetTrue)]
    show_inventory: bool,
    /// Run checks only, make no remote changes
    #[arg(long, action = ArgAction::SetTrue)]
    preflight_only: bool,
    /// Do not add firewall rules on the VPS
    #[arg(long, action = ArgAction::SetTrue)]
    no_firewall_change: bool,
    /// Bind the proxy to localhost on the VPS (requires an SSH forward)
    #[arg(long, action = ArgAction::SetTrue)]
    listen_local: bool,
    /// Smart blinder: stop the proxy after idle (recommended)
    #[arg(long, action = ArgAction::SetTrue, overrides_with = "no_smart_blinder")]
    smart_blinder: bool,
    /// Disable the smart blinder
    #[arg(long, action = ArgAction::SetTrue, overrides_with = "smart_blinder")]
    no_smart_blinder: bool,
    /// Smart blinder idle minutes (default: 10)
    #[arg(long, value_name = "MINUTES")]
    smart_blinder_idle_minutes: Option<u32>,
    /// Stealth mode: local SOCKS5 proxy via the SSH tunnel, zero VPS footprint
    #[arg(long, action = ArgAction::SetTrue)]
    stealth: bool,
    /// Local bind address for --stealth
    #[arg(long, value_name = "ADDR", default_value = "127.0.0.1:1080")]
    local_addr: String,
    /// Skip confirmation prompts
    #[arg(long, action = ArgAction::SetTrue)]
    yes: bool,
}

/// Fully validated CLI request.
#[derive(Debug)]
pub struct CliRequest {
    pub list_ships: bool,
    pub stealth: bool,
    pub local_addr: String,
    pub yes: bool,
    pub launch: LaunchRequest,
    pub connect: ConnectOptions,
}

impl TryFrom<BeamArgs> for CliRequest {
    type Error = anyhow::Error;

    fn try_from(args: BeamArgs) -> Result<Self> {
        if args.strict_host_key && args.insecure_ignore_host_key {
            bail!("use either --strict-host-key or --insecure-ignore-host-key, not both");
        }
        if args.preflight_only && args.action.is_some() {
            bail!("use either --preflight-only or --action, not both");
        }

        let protocol = match args.protocol.as_deref() {
            None => None,
            Some(raw) => match Protocol::parse(raw) {
                Some(protocol) => Some(protocol),
                None => bail!("invalid --protocol. use http or socks5"),
            },
        };
        let http_mode = match args.http_mode.as_deref() {
            None => None,
            Some(raw) => match HttpMode::parse(raw) {
                Some(mode) => Some(mode),
                None => bail!("invalid --http-mode. use auto or sidecar"),
            },
        };

        let action = if args.show_inventory {
            Action::Inventory
        } else if args.preflight_only {
            Action::Preflight
        } else {
            match Action::parse(args.action.as_deref().unwrap_or("")) {
                Some(action) => action,
                None => bail!("invalid --action. use show, configure, rotate, or destroy"),
            }
        };

        let smart_blinder = if args.smart_blinder {
            Some(true)
        } else if args.no_smart_blinder {
            Some(false)
        } else {
            None
        };
        if matches!(args.smart_blinder_idle_minutes, Some(0)) {
            bail!("--smart-blinder-idle-minutes must be > 0");
        }

        let mut connect = ConnectOptions::from_env().map_err(anyhow::Error::from)?;
        if let Some(path) = args.ssh_known_hosts {
            connect.trust_file = path;
        }
        if args.strict_host_key {
            connect.host_key_mode = HostKeyMode::Strict;
        }
        if args.insecure_ignore_host_key {
            connect.host_key_mode = HostKeyMode::InsecureIgnore;
        }

        let launch = LaunchRequest {
            ship_name: args.ship,
            host: args.host,
            ssh_port: args.ssh_port,
            ssh_user: args.ssh_user,
            password: args
                .ssh_password
                .filter(|p| !p.trim().is_empty())
                .map(SecretString::from),
            protocol,
            http_mode,
            proxy_port: args.proxy_port,
            action,
            no_firewall_change: args.no_firewall_change,
            listen_local: args.listen_local.then_some(true),
            smart_blinder,
            smart_blinder_idle_minutes: args.smart_blinder_idle_minutes,
        };

        Ok(CliRequest {
            list_ships: args.list_ships,
            stealth: args.stealth,
            local_addr: args.local_addr,
            yes: args.yes,
            launch,
            connect,
        })
    }
}

#[cfg(test)]
#[path = "args_tests.rs"]
mod tests;
