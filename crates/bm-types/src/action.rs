//! Inputs for a single remote agent invocation.

use std::fmt;

use crate::ship::{HttpMode, Protocol};

/// Remote agent execution mode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AgentMode {
    #[default]
    Inventory,
    Show,
    Preflight,
    Apply,
    Destroy,
}

impl AgentMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentMode::Inventory => "inventory",
            AgentMode::Show => "show",
            AgentMode::Preflight => "preflight",
            AgentMode::Apply => "apply",
            AgentMode::Destroy => "destroy",
        }
    }

    /// Modes that carry the smart-blinder flags on the agent command line.
    pub fn takes_blinder_flags(&self) -> bool {
        matches!(
            self,
            AgentMode::Apply | AgentMode::Destroy | AgentMode::Preflight
        )
    }
}

impl fmt::Display for AgentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One fully-resolved remote action.
#[derive(Clone, Debug)]
pub struct ActionInput {
    pub mode: AgentMode,
    /// Required for show/preflight/apply; ignored by inventory and destroy.
    pub protocol: Option<Protocol>,
    pub http_mode: HttpMode,
    /// None lets the remote keep its current or default port.
    pub proxy_port: Option<u16>,
    pub no_firewall_change: bool,
    pub listen_local: bool,
    pub smart_blinder: bool,
    pub smart_blinder_idle_minutes: u32,
    pub rotate_credentials: bool,
}

impl Default for ActionInput {
    fn default() -> Self {
        ActionInput {
            mode: AgentMode::Inventory,
            protocol: None,
            http_mode: HttpMode::Auto,
            proxy_port: None,
            no_firewall_change: false,
            listen_local: false,
            smart_blinder: true,
            smart_blinder_idle_minutes: 10,
            rotate_credentials: false,
        }
    }
}

impl ActionInput {
    pub fn inventory() -> ActionInput {
        ActionInput::default()
    }
}
