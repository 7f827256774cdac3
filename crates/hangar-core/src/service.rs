//! Single-shot orchestrator for one remote action.
//!
//! Each call opens its own SSH connection, uploads the agent, runs it,
//! parses the `BM_` report, and closes the connection. Nothing is shared
//! between calls, so callers that mutate the same remote must serialise
//! themselves.

use std::sync::Arc;

use async_trait::async_trait;
use bm_types::{ActionInput, ActionResult, AgentMode, Inventory, KeyValues, Ship};
use secrecy::SecretString;
use ssh_core::{ConnectOptions, SshClient, Target};
use tracing::{debug, warn};

use crate::agent::{AGENT_SCRIPT, agent_args, remote_script_path, shell_join};
use crate::error::{HangarError, HangarResult};

const ERROR_TAIL_BYTES: usize = 8192;
const CONFLICT_NEEDLE: &str = "existing non-beammeup squid config detected";

/// Seam between the service and the SSH transport. The production
/// implementation uploads and runs the agent; tests substitute canned
/// reports.
#[async_trait]
pub trait RemoteRunner: Send + Sync {
    async fn run(
        &self,
        target: &Target,
        input: &ActionInput,
    ) -> HangarResult<(KeyValues, String)>;
}

/// Production runner: upload the agent, execute it, clean up.
pub struct SshRemoteRunner {
    options: ConnectOptions,
}

impl SshRemoteRunner {
    pub fn new(options: ConnectOptions) -> Self {
        SshRemoteRunner { options }
    }
}

#[async_trait]
impl RemoteRunner for SshRemoteRunner {
    async fn run(
        &self,
        target: &Target,
        input: &ActionInput,
    ) -> HangarResult<(KeyValues, String)> {
        let client = SshClient::connect(target, &self.options).await?;
        let outcome = run_agent(&client, input).await;
        client.close().await;
        outcome
    }
}

async fn run_agent(client: &SshClient, input: &ActionInput) -> HangarResult<(KeyValues, String)> {
    let remote_path = remote_script_path();
    client
        .upload(AGENT_SCRIPT.as_bytes(), &remote_path, 0o700)
        .await?;

    let command = format!("bash {} {}", remote_path, shell_join(&agent_args(input)));
    debug!(mode = %input.mode, "running remote agent");
    let run = client.run_combined(&command).await;

    // Best-effort removal regardless of how the run went.
    if let Err(err) = client.run_combined(&format!("rm -f {remote_path}")).await {
        warn!(?err, "failed to remove remote agent script");
    }

    let output = run?;
    let kv = KeyValues::parse(&output.output);

    if !output.success() && !has_success_marker(input.mode, &kv) {
        return Err(remote_failure(input.mode, &kv, &output.output));
    }

    Ok((kv, output.output))
}

/// Build the typed error for a failed remote run. Every `BM_` line is
/// stripped first so credentials cannot leak into error output.
fn remote_failure(mode: AgentMode, kv: &KeyValues, output: &str) -> HangarError {
    let mut detail = sanitize_remote_output(output);
    if detail.trim().is_empty() {
        let keys = redacted_keys(kv);
        if !keys.is_empty() {
            detail = format!("parsed keys: {}", keys.join(", "));
        }
    }
    let detail = tail_string(&detail, ERROR_TAIL_BYTES);
    if detail.to_lowercase().contains(CONFLICT_NEEDLE) {
        return HangarError::Conflict { message: detail };
    }
    HangarError::RemoteRun {
        mode: mode.as_str().to_string(),
        detail,
    }
}

/// Success markers accepted even when the agent exits non-zero: partial
/// failures after the report block still carry usable state.
fn has_success_marker(mode: AgentMode, kv: &KeyValues) -> bool {
    match mode {
        AgentMode::Inventory => !kv.get("BM_PUBLIC_IP").trim().is_empty(),
        AgentMode::Preflight => kv.get("BM_PREFLIGHT").trim() == "OK",
        AgentMode::Show | AgentMode::Apply | AgentMode::Destroy => {
            !kv.get("BM_RESULT_PROTOCOL").trim().is_empty()
        }
    }
}

/// Strip every `BM_` key/value line to avoid leaking credentials in error
/// messages.
fn sanitize_remote_output(out: &str) -> String {
    let mut sanitized = String::new();
    for line in out.lines() {
        let line = line.trim_end_matches('\r');
        if line.trim_start().starts_with("BM_") {
            continue;
        }
        sanitized.push_str(line);
        sanitized.push('\n');
    }
    sanitized.trim().to_string()
}

fn tail_string(s: &str, max: usize) -> String {
    if max == 0 || s.len() <= max {
        return s.to_string();
    }
    let max = max.max(80);
    if s.len() <= max {
        return s.to_string();
    }
    let mut start = s.len() - max;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    format!("[...output truncated...]\n{}", &s[start..])
        .trim()
        .to_string()
}

/// Sorted key list for debugging; anything whose key mentions PASS is
/// omitted.
fn redacted_keys(kv: &KeyValues) -> Vec<String> {
    let mut keys: Vec<String> = kv
        .keys()
        .filter(|k| !k.to_uppercase().contains("PASS"))
        .map(str::to_string)
        .collect();
    keys.sort();
    keys
}

/// Single-shot remote orchestrator.
pub struct HangarService {
    runner: Arc<dyn RemoteRunner>,
}

impl HangarService {
    pub fn new(options: ConnectOptions) -> Self {
        HangarService {
            runner: Arc::new(SshRemoteRunner::new(options)),
        }
    }

    /// Substitute the remote seam; used by tests and alternative
    /// transports.
    pub fn with_runner(runner: Arc<dyn RemoteRunner>) -> Self {
        HangarService { runner }
    }

    fn target(ship: &Ship, password: &SecretString) -> Target {
        Target {
            host: ship.host.clone(),
            port: ship.ssh_port,
            user: ship.ssh_user.clone(),
            password: password.clone(),
        }
    }

    /// Take a read-only snapshot of the target's hangar.
    pub async fn inventory(&self, ship: &Ship, password: &SecretString) -> HangarResult<Inventory> {
        let target = Self::target(ship, password);
        let (kv, raw) = self.runner.run(&target, &ActionInput::inventory()).await?;
        if kv.is_empty() {
            return Err(HangarError::InventoryEmpty { raw });
        }
        Ok(Inventory::from_values(&kv))
    }

    /// Run one remote action and decode its result block.
    pub async fn execute(
        &self,
        ship: &Ship,
        password: &SecretString,
        input: ActionInput,
    ) -> HangarResult<ActionResult> {
        let target = Self::target(ship, password);
        let (kv, raw) = self.runner.run(&target, &input).await?;

        let mut result = ActionResult {
            protocol: kv.get("BM_RESULT_PROTOCOL").to_string(),
            http_mode: kv.get("BM_RESULT_HTTP_MODE").to_string(),
            host: kv.get("BM_RESULT_HOST").to_string(),
            port: kv.get("BM_RESULT_PORT").to_string(),
            user: kv.get("BM_RESULT_USER").to_string(),
            pass: kv.get("BM_RESULT_PASS").to_string(),
            action: kv.get("BM_RESULT_ACTION").to_string(),
            firewall_note: kv.get("BM_RESULT_FIREWALL_NOTE").to_string(),
            note: kv.get("BM_RESULT_NOTE").to_string(),
            raw_output: raw,
            inventory: None,
            values: kv,
        };
        if result.host.is_empty() || result.host == "UNKNOWN" {
            result.host = ship.host.clone();
        }
        if !result.values.get("BM_SOCKS_EXISTS").is_empty() {
            result.inventory = Some(Inventory::from_values(&result.values));
        }
        Ok(result)
    }
}

#[cfg(test)]
#[path = "service_tests.rs"]
mod tests;
