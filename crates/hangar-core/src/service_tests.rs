use std::sync::Mutex;

use bm_types::HangarStatus;
use secrecy::ExposeSecret;

use super::*;

/// Canned runner recording the inputs it was called with.
struct MockRunner {
    reports: Mutex<Vec<HangarResult<(KeyValues, String)>>>,
    calls: Mutex<Vec<(String, String)>>,
}

impl MockRunner {
    fn with_report(output: &str) -> Arc<Self> {
        Arc::new(MockRunner {
            reports: Mutex::new(vec![Ok((
                KeyValues::parse(output),
                output.to_string(),
            ))]),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn failing(err: HangarError) -> Arc<Self> {
        Arc::new(MockRunner {
            reports: Mutex::new(vec![Err(err)]),
            calls: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl RemoteRunner for MockRunner {
    async fn run(
        &self,
        target: &Target,
        input: &ActionInput,
    ) -> HangarResult<(KeyValues, String)> {
        self.calls
            .lock()
            .unwrap()
            .push((target.user.clone(), input.mode.as_str().to_string()));
        self.reports.lock().unwrap().remove(0)
    }
}

fn ship() -> Ship {
    Ship {
        name: "test".into(),
        host: "203.0.113.5".into(),
        ..Ship::default()
    }
}

fn password() -> SecretString {
    SecretString::from("pw".to_string())
}

#[tokio::test]
async fn inventory_maps_the_report() {
    let runner = MockRunner::with_report(
        "BM_PUBLIC_IP=203.0.113.5\n\
         BM_SOCKS_EXISTS=1\nBM_SOCKS_ACTIVE=1\nBM_SOCKS_PORT=18080\nBM_SOCKS_USER=beamx\n\
         BM_HTTP_EXISTS=1\nBM_HTTP_ACTIVE=0\nBM_HTTP_PORT=18181\n\
         BM_HANGAR_STATUS=drift\nBM_METADATA_EXISTS=1\n",
    );
    let service = HangarService::with_runner(runner.clone());

    let inv = service.inventory(&ship(), &password()).await.unwrap();
    assert_eq!(inv.public_ip, "203.0.113.5");
    assert_eq!(inv.hangar_status, HangarStatus::Drift);
    assert!(inv.socks5.active);
    assert_eq!(inv.socks5.port, "18080");
    assert!(inv.http.exists);
    assert!(!inv.http.active);

    let calls = runner.calls.lock().unwrap();
    assert_eq!(calls.as_slice(), [("root".to_string(), "inventory".to_string())]);
}

#[tokio::test]
async fn inventory_with_no_keys_is_an_error() {
    let runner = MockRunner::with_report("plain chatter only\n");
    let service = HangarService::with_runner(runner);

    let err = service.inventory(&ship(), &password()).await.unwrap_err();
    match err {
        HangarError::InventoryEmpty { raw } => assert!(raw.contains("plain chatter")),
        other => panic!("expected InventoryEmpty, got {other}"),
    }
}

#[tokio::test]
async fn execute_substitutes_ship_host_for_unknown() {
    let runner = MockRunner::with_report(
        "BM_RESULT_PROTOCOL=HTTP\nBM_RESULT_HOST=UNKNOWN\nBM_RESULT_PORT=18181\n\
         BM_RESULT_USER=beamhttpx\nBM_RESULT_PASS=secret\nBM_RESULT_ACTION=updated\n",
    );
    let service = HangarService::with_runner(runner);

    let res = service
        .execute(&ship(), &password(), ActionInput {
            mode: AgentMode::Apply,
            ..ActionInput::default()
        })
        .await
        .unwrap();
    assert_eq!(res.host, "203.0.113.5");
    assert_eq!(res.protocol, "HTTP");
    assert_eq!(res.port, "18181");
    assert_eq!(res.user, "beamhttpx");
    assert_eq!(res.pass, "secret");
    assert!(res.inventory.is_none());
}

#[tokio::test]
async fn execute_attaches_inventory_when_present() {
    let runner = MockRunner::with_report(
        "BM_RESULT_PROTOCOL=SOCKS5\nBM_RESULT_HOST=198.51.100.1\nBM_RESULT_ACTION=created\n\
         BM_SOCKS_EXISTS=1\nBM_SOCKS_ACTIVE=1\nBM_HANGAR_STATUS=online\n",
    );
    let service = HangarService::with_runner(runner);

    let res = service
        .execute(&ship(), &password(), ActionInput {
            mode: AgentMode::Apply,
            ..ActionInput::default()
        })
        .await
        .unwrap();
    let inv = res.inventory.expect("inventory block");
    assert_eq!(inv.hangar_status, HangarStatus::Online);
}

#[tokio::test]
async fn runner_errors_pass_through() {
    let runner = MockRunner::failing(HangarError::RemoteRun {
        mode: "apply".into(),
        detail: "boom".into(),
    });
    let service = HangarService::with_runner(runner);

    let err = service.inventory(&ship(), &password()).await.unwrap_err();
    assert!(err.to_string().contains("boom"));
}

#[test]
fn success_markers_per_mode() {
    let inv = KeyValues::parse("BM_PUBLIC_IP=1.2.3.4\n");
    assert!(has_success_marker(AgentMode::Inventory, &inv));
    assert!(!has_success_marker(AgentMode::Apply, &inv));

    let pre = KeyValues::parse("BM_PREFLIGHT=OK\n");
    assert!(has_success_marker(AgentMode::Preflight, &pre));
    assert!(!has_success_marker(
        AgentMode::Preflight,
        &KeyValues::parse("BM_PREFLIGHT=FAIL\n")
    ));

    let result = KeyValues::parse("BM_RESULT_PROTOCOL=HTTP\n");
    assert!(has_success_marker(AgentMode::Show, &result));
    assert!(has_success_marker(AgentMode::Apply, &result));
    assert!(has_success_marker(AgentMode::Destroy, &result));
    assert!(!has_success_marker(AgentMode::Inventory, &result));
}

#[test]
fn remote_failure_strips_every_bm_line() {
    let output = "[remote] ERROR: boom\nBM_RESULT_PASS=topsecret\n";
    let err = remote_failure(AgentMode::Apply, &KeyValues::parse(output), output);
    let text = err.to_string();
    assert!(text.contains("boom"));
    assert!(!text.contains("topsecret"));
    for line in text.lines() {
        assert!(
            !line.trim_start().starts_with("BM_"),
            "sanitised output leaked a BM_ line: {line}"
        );
    }
}

#[test]
fn remote_failure_falls_back_to_redacted_key_list() {
    let output = "BM_RESULT_USER=beamx\nBM_RESULT_PASS=topsecret\nBM_RESULT_PORT=1080\n";
    let err = remote_failure(AgentMode::Apply, &KeyValues::parse(output), output);
    let text = err.to_string();
    assert!(text.contains("BM_RESULT_PORT"));
    assert!(text.contains("BM_RESULT_USER"));
    assert!(!text.contains("BM_RESULT_PASS"), "PASS keys must be omitted");
    assert!(!text.contains("topsecret"));
}

#[test]
fn remote_failure_detects_squid_conflict_and_adds_hint() {
    let output = "[remote] ERROR: Existing non-beammeup Squid config detected at /etc/squid/squid.conf. Refusing to overwrite.\n";
    let err = remote_failure(AgentMode::Apply, &KeyValues::parse(output), output);
    match &err {
        HangarError::Conflict { message } => {
            assert!(message.contains("Existing non-beammeup Squid config detected"));
        }
        other => panic!("expected Conflict, got {other}"),
    }
    let text = err.to_string();
    assert!(text.contains("--http-mode sidecar"));
}

#[test]
fn remote_failure_truncates_to_a_bounded_tail() {
    let noise = "x".repeat(20_000);
    let output = format!("{noise}\ntail-marker\n");
    let err = remote_failure(AgentMode::Apply, &KeyValues::parse(&output), &output);
    let text = err.to_string();
    assert!(text.contains("tail-marker"));
    assert!(text.contains("[...output truncated...]"));
    assert!(text.len() < 10_000);
}

#[test]
fn sanitize_handles_crlf_and_indented_bm_lines() {
    let out = "line one\r\n   BM_SECRET=x\r\nline two\r\n";
    let sanitized = sanitize_remote_output(out);
    assert_eq!(sanitized, "line one\nline two");
}

#[test]
fn password_is_not_part_of_any_error_text() {
    let pw = password();
    let output = "[remote] ERROR: auth backend fell over\n";
    let err = remote_failure(AgentMode::Apply, &KeyValues::parse(output), output);
    assert!(!err.to_string().contains(pw.expose_secret()));
}
