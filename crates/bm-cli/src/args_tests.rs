use super::*;

fn parse(args: &[&str]) -> Result<CliRequest> {
    let mut argv = vec!["beammeup"];
    argv.extend_from_slice(args);
    CliRequest::try_from(BeamArgs::try_parse_from(argv)?)
}

#[test]
fn defaults_to_configure_with_no_overrides() {
    let req = parse(&["--host", "203.0.113.5"]).unwrap();
    assert_eq!(req.launch.action, Action::Configure);
    assert_eq!(req.launch.host.as_deref(), Some("203.0.113.5"));
    assert!(req.launch.protocol.is_none());
    assert!(req.launch.listen_local.is_none());
    assert!(req.launch.smart_blinder.is_none());
    assert!(!req.stealth);
}

#[test]
fn conflicting_host_key_flags_are_rejected() {
    let err = parse(&["--strict-host-key", "--insecure-ignore-host-key"]).unwrap_err();
    assert!(err.to_string().contains("not both"));
}

#[test]
fn preflight_only_conflicts_with_action() {
    let err = parse(&["--preflight-only", "--action", "show"]).unwrap_err();
    assert!(err.to_string().contains("not both"));
}

#[test]
fn protocol_socks_alias_is_accepted() {
    let req = parse(&["--protocol", "socks"]).unwrap();
    assert_eq!(req.launch.protocol, Some(Protocol::Socks5));
    assert!(parse(&["--protocol", "ftp"]).is_err());
}

#[test]
fn action_aliases_normalise() {
    assert_eq!(
        parse(&["--action", "install"]).unwrap().launch.action,
        Action::Configure
    );
    assert_eq!(
        parse(&["--action", "uninstall"]).unwrap().launch.action,
        Action::Destroy
    );
    assert!(parse(&["--action", "oops"]).is_err());
}

#[test]
fn show_inventory_wins_over_default_action() {
    let req = parse(&["--show-inventory"]).unwrap();
    assert_eq!(req.launch.action, Action::Inventory);
}

#[test]
fn smart_blinder_flags_map_to_explicit_set_sentinels() {
    assert_eq!(parse(&[]).unwrap().launch.smart_blinder, None);
    assert_eq!(
        parse(&["--smart-blinder"]).unwrap().launch.smart_blinder,
        Some(true)
    );
    assert_eq!(
        parse(&["--no-smart-blinder"]).unwrap().launch.smart_blinder,
        Some(false)
    );
    // Later flag wins.
    assert_eq!(
        parse(&["--smart-blinder", "--no-smart-blinder"])
            .unwrap()
            .launch
            .smart_blinder,
        Some(false)
    );
}

#[test]
fn zero_idle_minutes_is_rejected() {
    let err = parse(&["--smart-blinder-idle-minutes", "0"]).unwrap_err();
    assert!(err.to_string().contains("must be > 0"));
}

#[test]
fn host_key_flags_override_the_environment_default() {
    let req = parse(&["--strict-host-key"]).unwrap();
    assert_eq!(req.connect.host_key_mode, ssh_core::HostKeyMode::Strict);

    let req = parse(&["--ssh-known-hosts", "/tmp/kh"]).unwrap();
    assert_eq!(req.connect.trust_file, std::path::PathBuf::from("/tmp/kh"));
}

#[test]
fn empty_password_flag_means_prompt() {
    let req = parse(&["--ssh-password", " "]).unwrap();
    assert!(req.launch.password.is_none());
}

#[test]
fn stealth_carries_the_local_bind_address() {
    let req = parse(&["--stealth", "--local-addr", "127.0.0.1:9050"]).unwrap();
    assert!(req.stealth);
    assert_eq!(req.local_addr, "127.0.0.1:9050");

    let req = parse(&["--stealth"]).unwrap();
    assert_eq!(req.local_addr, "127.0.0.1:1080");
}
