//! Operation driver: turns a structured request into one remote action.
//!
//! Resolution order for every parameter is request flags over saved ship
//! over inventory ground truth over protocol defaults. An inventory run
//! always happens first so the decision is made against the target's real
//! state.

use bm_types::{
    ActionInput, ActionResult, AgentMode, HttpMode, Inventory, KeyValues, Protocol, Ship,
};
use secrecy::{ExposeSecret, SecretString};

use crate::error::{HangarError, HangarResult};
use crate::passwords::PasswordCache;
use crate::service::HangarService;
use crate::store::ShipStore;

/// Operator-facing verbs, mapped onto agent modes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Action {
    Show,
    #[default]
    Configure,
    Rotate,
    Destroy,
    Preflight,
    /// Inventory only; no mutating action follows.
    Inventory,
}

impl Action {
    /// Accepts the legacy `install`/`uninstall` aliases.
    pub fn parse(value: &str) -> Option<Action> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "configure" | "install" => Some(Action::Configure),
            "show" => Some(Action::Show),
            "rotate" => Some(Action::Rotate),
            "destroy" | "uninstall" => Some(Action::Destroy),
            _ => None,
        }
    }
}

/// A request from the CLI/TUI layer. `Option` fields are explicit-set
/// sentinels: `None` never stomps a saved ship value.
#[derive(Clone, Debug, Default)]
pub struct LaunchRequest {
    pub ship_name: Option<String>,
    pub host: Option<String>,
    pub ssh_port: Option<u16>,
    pub ssh_user: Option<String>,
    pub password: Option<SecretString>,
    pub protocol: Option<Protocol>,
    pub http_mode: Option<HttpMode>,
    pub proxy_port: Option<u16>,
    pub action: Action,
    pub no_firewall_change: bool,
    pub listen_local: Option<bool>,
    pub smart_blinder: Option<bool>,
    pub smart_blinder_idle_minutes: Option<u32>,
}

/// A request resolved against the ship store and a fresh inventory,
/// ready to execute. Callers may inspect (and confirm) before executing.
pub struct ResolvedOperation {
    pub ship: Ship,
    pub password: SecretString,
    pub inventory: Inventory,
    /// `None` for inventory-only requests.
    pub input: Option<ActionInput>,
}

/// What one driven operation produced.
#[derive(Debug)]
pub enum DriverOutcome {
    Inventory(Inventory),
    Preflight {
        protocol: String,
        port: String,
        values: KeyValues,
    },
    Result(ActionResult),
}

pub struct OperationDriver<'a> {
    store: &'a ShipStore,
    service: &'a HangarService,
    cache: &'a PasswordCache,
}

impl<'a> OperationDriver<'a> {
    pub fn new(
        store: &'a ShipStore,
        service: &'a HangarService,
        cache: &'a PasswordCache,
    ) -> Self {
        OperationDriver {
            store,
            service,
            cache,
        }
    }

    /// Merge the request with its saved ship, obtain a password, and take
    /// an inventory of the target.
    pub async fn resolve<P>(
        &self,
        request: LaunchRequest,
        prompt: P,
    ) -> HangarResult<ResolvedOperation>
    where
        P: FnOnce(&str) -> HangarResult<SecretString>,
    {
        if let Some(minutes) = request.smart_blinder_idle_minutes
            && minutes == 0
        {
            return Err(HangarError::Usage(
                "--smart-blinder-idle-minutes must be > 0".into(),
            ));
        }

        let mut ship = match &request.ship_name {
            Some(name) => self.store.load(name)?,
            None => Ship::default(),
        };
        // A loaded profile always carries a protocol; only host-only runs
        // leave it open for the inventory to decide.
        let protocol_known = request.protocol.is_some() || request.ship_name.is_some();

        if let Some(host) = &request.host
            && !host.trim().is_empty()
        {
            ship.host = host.trim().to_string();
        }
        if let Some(port) = request.ssh_port
            && port > 0
        {
            ship.ssh_port = port;
        }
        if let Some(user) = &request.ssh_user
            && !user.trim().is_empty()
        {
            ship.ssh_user = user.trim().to_string();
        }
        if let Some(protocol) = request.protocol {
            ship.protocol = protocol;
        }
        if let Some(http_mode) = request.http_mode {
            ship.http_mode = http_mode;
        }
        if let Some(port) = request.proxy_port
            && port > 0
        {
            ship.proxy_port = port;
        }
        if request.no_firewall_change {
            ship.no_firewall_change = true;
        }
        if let Some(listen_local) = request.listen_local {
            ship.listen_local = listen_local;
        }
        if let Some(smart_blinder) = request.smart_blinder {
            ship.smart_blinder = smart_blinder;
        }
        if let Some(minutes) = request.smart_blinder_idle_minutes {
            ship.smart_blinder_idle_minutes = minutes;
        }
        if ship.ssh_port == 0 {
            ship.ssh_port = 22;
        }
        if ship.ssh_user.trim().is_empty() {
            ship.ssh_user = "root".to_string();
        }

        if ship.host.trim().is_empty() {
            return Err(HangarError::Usage(
                "no host provided. use --host or --ship".into(),
            ));
        }

        let prompted;
        let password = if let Some(password) = request.password {
            prompted = false;
            password
        } else if let Some(cached) = self
            .cache
            .get(&ship.name)
            .filter(|_| !ship.name.is_empty())
        {
            prompted = false;
            cached
        } else {
            prompted = true;
            let label = format!("SSH password for {}@{}: ", ship.ssh_user, ship.host);
            prompt(&label)?
        };
        if password.expose_secret().trim().is_empty() {
            return Err(HangarError::Usage("ssh password is required".into()));
        }

        let inventory = self.service.inventory(&ship, &password).await?;

        if prompted && !ship.name.is_empty() {
            self.cache.set(ship.name.clone(), password.clone());
        }

        if request.action == Action::Inventory {
            return Ok(ResolvedOperation {
                ship,
                password,
                inventory,
                input: None,
            });
        }

        if request.action != Action::Destroy && !protocol_known {
            ship.protocol = if inventory.http.exists {
                Protocol::Http
            } else if inventory.socks5.exists {
                Protocol::Socks5
            } else {
                Protocol::Http
            };
        }

        let input = match request.action {
            Action::Show => ActionInput {
                mode: AgentMode::Show,
                protocol: Some(ship.protocol),
                ..ActionInput::default()
            },
            Action::Destroy => ActionInput {
                mode: AgentMode::Destroy,
                smart_blinder: ship.smart_blinder,
                smart_blinder_idle_minutes: ship.smart_blinder_idle_minutes,
                ..ActionInput::default()
            },
            Action::Preflight => ActionInput {
                mode: AgentMode::Preflight,
                protocol: Some(ship.protocol),
                http_mode: ship.http_mode,
                proxy_port: Some(resolve_proxy_port(&ship, &inventory)),
                smart_blinder: ship.smart_blinder,
                smart_blinder_idle_minutes: ship.smart_blinder_idle_minutes,
                ..ActionInput::default()
            },
            Action::Configure | Action::Rotate => ActionInput {
                mode: AgentMode::Apply,
                protocol: Some(ship.protocol),
                http_mode: ship.http_mode,
                proxy_port: Some(resolve_proxy_port(&ship, &inventory)),
                no_firewall_change: ship.no_firewall_change,
                listen_local: ship.listen_local,
                smart_blinder: ship.smart_blinder,
                smart_blinder_idle_minutes: ship.smart_blinder_idle_minutes,
                rotate_credentials: request.action == Action::Rotate,
            },
            Action::Inventory => unreachable!("handled above"),
        };

        Ok(ResolvedOperation {
            ship,
            password,
            inventory,
            input: Some(input),
        })
    }

    /// Execute a resolved operation.
    pub async fn execute(&self, op: &ResolvedOperation) -> HangarResult<DriverOutcome> {
        let Some(input) = &op.input else {
            return Ok(DriverOutcome::Inventory(op.inventory.clone()));
        };

        let result = self
            .service
            .execute(&op.ship, &op.password, input.clone())
            .await?;

        if input.mode == AgentMode::Preflight {
            if result.values.get("BM_PREFLIGHT") != "OK" {
                return Err(HangarError::RemoteRun {
                    mode: "preflight".into(),
                    detail: "preflight failed".into(),
                });
            }
            return Ok(DriverOutcome::Preflight {
                protocol: result.values.get("BM_PREFLIGHT_PROTOCOL").to_string(),
                port: result.values.get("BM_PREFLIGHT_PORT").to_string(),
                values: result.values,
            });
        }

        Ok(DriverOutcome::Result(result))
    }

    /// Resolve and execute in one step.
    pub async fn run<P>(&self, request: LaunchRequest, prompt: P) -> HangarResult<DriverOutcome>
    where
        P: FnOnce(&str) -> HangarResult<SecretString>,
    {
        let op = self.resolve(request, prompt).await?;
        self.execute(&op).await
    }
}

/// Effective proxy port: request/ship over inventory over protocol
/// default.
fn resolve_proxy_port(ship: &Ship, inventory: &Inventory) -> u16 {
    if ship.proxy_port > 0 {
        return ship.proxy_port;
    }
    let state = match ship.protocol {
        Protocol::Socks5 => &inventory.socks5,
        Protocol::Http => &inventory.http,
    };
    if let Ok(port) = state.port.trim().parse::<u16>()
        && port > 0
    {
        return port;
    }
    ship.protocol.default_port()
}

#[cfg(test)]
#[path = "driver_tests.rs"]
mod tests;
