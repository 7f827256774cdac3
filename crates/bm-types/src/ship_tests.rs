use super::*;

#[test]
fn sanitize_lowercases_and_dashes_spaces() {
    assert_eq!(sanitize_name("RPS VPS"), "rps-vps");
    assert_eq!(sanitize_name("  Edge Node 01  "), "edge-node-01");
}

#[test]
fn sanitize_substitutes_and_collapses() {
    assert_eq!(sanitize_name("a//b"), "a-b");
    assert_eq!(sanitize_name("a--b"), "a-b");
    assert_eq!(sanitize_name("web_1.eu"), "web_1.eu");
    assert_eq!(sanitize_name("--trim--"), "trim");
    assert_eq!(sanitize_name("!!!"), "");
}

#[test]
fn sanitize_is_idempotent() {
    for raw in ["RPS VPS", "a//b--c", "..dots..", "Ünïcode name", "-x-"] {
        let once = sanitize_name(raw);
        assert_eq!(sanitize_name(&once), once, "not idempotent for {raw:?}");
    }
}

#[test]
fn protocol_parse_accepts_socks_alias() {
    assert_eq!(Protocol::parse("socks"), Some(Protocol::Socks5));
    assert_eq!(Protocol::parse("SOCKS5"), Some(Protocol::Socks5));
    assert_eq!(Protocol::parse("http"), Some(Protocol::Http));
    assert_eq!(Protocol::parse("ftp"), None);
}

#[test]
fn http_mode_auto_is_empty_on_the_wire() {
    assert_eq!(HttpMode::Auto.as_str(), "");
    assert_eq!(HttpMode::parse("auto"), Some(HttpMode::Auto));
    assert_eq!(HttpMode::parse(""), Some(HttpMode::Auto));
    assert_eq!(HttpMode::parse("sidecar"), Some(HttpMode::Sidecar));
    assert_eq!(HttpMode::parse("managed"), None);
}

#[test]
fn normalize_fills_documented_defaults() {
    let mut ship = Ship {
        name: "x".into(),
        host: "203.0.113.5".into(),
        ssh_port: 0,
        ssh_user: " ".into(),
        protocol: Protocol::Socks5,
        proxy_port: 0,
        smart_blinder_idle_minutes: 0,
        ..Ship::default()
    };
    ship.normalize();
    assert_eq!(ship.ssh_port, 22);
    assert_eq!(ship.ssh_user, "root");
    assert_eq!(ship.proxy_port, 1080);
    assert_eq!(ship.smart_blinder_idle_minutes, 10);
}
