use bm_types::{ActionInput, AgentMode, HttpMode, Protocol};

use super::*;

#[test]
fn quote_wraps_and_escapes_single_quotes() {
    assert_eq!(shell_quote("plain"), "'plain'");
    assert_eq!(shell_quote("a b"), "'a b'");
    assert_eq!(shell_quote("it's"), r#"'it'"'"'s'"#);
    assert_eq!(shell_quote(""), "''");
}

#[test]
fn join_quotes_every_argument() {
    let args = vec!["--mode".to_string(), "apply".to_string()];
    assert_eq!(shell_join(&args), "'--mode' 'apply'");
}

#[test]
fn script_path_is_nanosecond_suffixed() {
    let path = remote_script_path();
    assert!(path.starts_with("/tmp/beammeup-v2-"));
    assert!(path.ends_with(".sh"));
    let digits = &path["/tmp/beammeup-v2-".len()..path.len() - 3];
    assert!(!digits.is_empty());
    assert!(digits.chars().all(|c| c.is_ascii_digit()));
}

#[test]
fn inventory_args_are_minimal() {
    let args = agent_args(&ActionInput::inventory());
    assert_eq!(args, vec!["--mode", "inventory"]);
}

#[test]
fn apply_args_carry_all_requested_flags() {
    let input = ActionInput {
        mode: AgentMode::Apply,
        protocol: Some(Protocol::Http),
        http_mode: HttpMode::Sidecar,
        proxy_port: Some(18181),
        no_firewall_change: true,
        listen_local: true,
        smart_blinder: true,
        smart_blinder_idle_minutes: 15,
        rotate_credentials: true,
    };
    let args = agent_args(&input);
    assert_eq!(
        args,
        vec![
            "--mode",
            "apply",
            "--protocol",
            "http",
            "--http-mode",
            "sidecar",
            "--proxy-port",
            "18181",
            "--no-firewall-change",
            "--listen-local",
            "--smart-blinder",
            "--smart-blinder-idle-minutes",
            "15",
            "--rotate-credentials",
        ]
    );
}

#[test]
fn blinder_flags_are_omitted_for_show_and_inventory() {
    let show = ActionInput {
        mode: AgentMode::Show,
        protocol: Some(Protocol::Socks5),
        smart_blinder: false,
        ..ActionInput::default()
    };
    let args = agent_args(&show);
    assert!(!args.iter().any(|a| a.contains("smart-blinder")));

    let destroy = ActionInput {
        mode: AgentMode::Destroy,
        smart_blinder: false,
        ..ActionInput::default()
    };
    let args = agent_args(&destroy);
    assert!(args.contains(&"--no-smart-blinder".to_string()));
}

#[test]
fn auto_http_mode_is_not_passed() {
    let input = ActionInput {
        mode: AgentMode::Apply,
        protocol: Some(Protocol::Http),
        http_mode: HttpMode::Auto,
        ..ActionInput::default()
    };
    let args = agent_args(&input);
    assert!(!args.contains(&"--http-mode".to_string()));
}

// The agent only runs on a Debian/Ubuntu target, so its invariants are
// asserted structurally against the script text.
#[test]
fn script_emits_the_stable_markers() {
    for marker in [
        "BM_PREFLIGHT=OK",
        "BM_PUBLIC_IP=",
        "BM_RESULT_PROTOCOL=",
        "BM_RESULT_PASS=",
        "BM_HANGAR_STATUS=",
        "BM_METADATA_EXISTS=",
    ] {
        assert!(AGENT_SCRIPT.contains(marker), "missing marker {marker}");
    }
}

#[test]
fn script_keeps_the_canonical_paths_and_units() {
    for needle in [
        "/etc/beammeup",
        "microsocks.env",
        "http.htpasswd",
        "http-sidecar/squid.conf",
        "hangar.json",
        "beammeup-microsocks.service",
        "beammeup-http-sidecar.service",
        "beammeup-blinder.timer",
        "/etc/squid/squid.conf.beammeup.bak",
        "/var/log/beammeup-http",
        "/tmp/beammeup-install.log",
    ] {
        assert!(AGENT_SCRIPT.contains(needle), "missing {needle}");
    }
}

#[test]
fn script_hardens_the_socks_unit() {
    for directive in [
        "NoNewPrivileges=true",
        "PrivateTmp=true",
        "ProtectHome=true",
        "ProtectSystem=strict",
        "LimitNOFILE=32768",
    ] {
        assert!(AGENT_SCRIPT.contains(directive), "missing {directive}");
    }
}

#[test]
fn script_parses_every_documented_flag() {
    for flag in [
        "--mode",
        "--protocol",
        "--http-mode",
        "--proxy-port",
        "--no-firewall-change",
        "--listen-local",
        "--smart-blinder",
        "--no-smart-blinder",
        "--smart-blinder-idle-minutes",
        "--rotate-credentials",
    ] {
        assert!(
            AGENT_SCRIPT.contains(&format!("{flag})")),
            "flag {flag} not handled"
        );
    }
}

#[test]
fn script_guards_distro_root_and_tooling() {
    assert!(AGENT_SCRIPT.contains("set -euo pipefail"));
    assert!(AGENT_SCRIPT.contains("ubuntu|debian"));
    assert!(AGENT_SCRIPT.contains("EUID == 0"));
    assert!(AGENT_SCRIPT.contains("command -v apt-get"));
    assert!(AGENT_SCRIPT.contains("command -v systemctl"));
    assert!(AGENT_SCRIPT.contains("DEBIAN_FRONTEND=noninteractive"));
}

#[test]
fn script_refuses_foreign_squid_configs() {
    assert!(AGENT_SCRIPT.contains("managed by beammeup"));
    assert!(AGENT_SCRIPT.contains("Existing non-beammeup Squid config detected"));
}

#[test]
fn script_reports_blinded_when_idle_stop_fired() {
    assert!(AGENT_SCRIPT.contains(r#"HANGAR_STATUS="blinded""#));
    assert!(AGENT_SCRIPT.contains("blinder.stopped"));
    assert!(AGENT_SCRIPT.contains("destroy-noop"));
}

#[test]
fn script_generates_the_documented_credential_shapes() {
    assert!(AGENT_SCRIPT.contains("beam$(generate_secret 'a-z0-9' 5)"));
    assert!(AGENT_SCRIPT.contains("beamhttp$(generate_secret 'a-z0-9' 4)"));
    assert!(AGENT_SCRIPT.contains("generate_secret 'A-Za-z0-9' 20"));
}
