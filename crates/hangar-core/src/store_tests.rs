use std::fs;

use bm_types::{HttpMode, Protocol, Ship};
use tempfile::tempdir;

use super::*;

fn store_in(dir: &std::path::Path) -> ShipStore {
    ShipStore::open(Some(dir.to_path_buf())).unwrap()
}

#[test]
fn save_list_load_round_trip() {
    let dir = tempdir().unwrap();
    let store = store_in(dir.path());

    let saved = store
        .save(Ship {
            name: "RPS VPS".into(),
            host: "203.0.113.5".into(),
            ssh_user: "root".into(),
            ..Ship::default()
        })
        .unwrap();
    assert_eq!(saved.name, "rps-vps");

    assert_eq!(store.list().unwrap(), vec!["rps-vps".to_string()]);

    let loaded = store.load("rps-vps").unwrap();
    assert_eq!(loaded.host, "203.0.113.5");
    assert_eq!(loaded.ssh_port, 22);
    assert_eq!(loaded.protocol, Protocol::Http);
    assert_eq!(loaded.proxy_port, 18181);
    assert!(loaded.smart_blinder);
    assert_eq!(loaded.smart_blinder_idle_minutes, 10);
    assert_eq!(loaded, saved);
}

#[test]
fn save_writes_canonical_ordered_keys() {
    let dir = tempdir().unwrap();
    let store = store_in(dir.path());

    store
        .save(Ship {
            name: "edge".into(),
            host: "198.51.100.7".into(),
            protocol: Protocol::Http,
            http_mode: HttpMode::Sidecar,
            no_firewall_change: true,
            listen_local: true,
            smart_blinder_idle_minutes: 15,
            ..Ship::default()
        })
        .unwrap();

    let content = fs::read_to_string(dir.path().join("edge.ship")).unwrap();
    let expected = "HOST=198.51.100.7\nSSH_PORT=22\nSSH_USER=root\nPROTOCOL=http\nHTTP_MODE=sidecar\nPROXY_PORT=18181\nNO_FIREWALL_CHANGE=1\nLISTEN_LOCAL=1\nSMART_BLINDER=1\nSMART_BLINDER_IDLE_MINUTES=15\n";
    assert_eq!(content, expected);
}

#[test]
fn load_fills_defaults_for_legacy_files() {
    let dir = tempdir().unwrap();
    let store = store_in(dir.path());

    // A file written by an older release: only HOST and SSH_USER.
    fs::write(
        dir.path().join("legacy.ship"),
        "HOST=203.0.113.10\nSSH_USER=root\n",
    )
    .unwrap();

    let loaded = store.load("legacy").unwrap();
    assert_eq!(loaded.protocol, Protocol::Http);
    assert_eq!(loaded.ssh_port, 22);
    assert_eq!(loaded.proxy_port, 18181);
    assert!(!loaded.listen_local);
    assert!(loaded.smart_blinder, "smart blinder defaults on");
    assert_eq!(loaded.smart_blinder_idle_minutes, 10);
}

#[test]
fn load_ignores_comments_blanks_and_unknown_keys() {
    let dir = tempdir().unwrap();
    let store = store_in(dir.path());

    fs::write(
        dir.path().join("noisy.ship"),
        "# saved by a future version\n\nHOST=198.51.100.9\nFUTURE_KEY=whatever\nSMART_BLINDER=0\n",
    )
    .unwrap();

    let loaded = store.load("noisy").unwrap();
    assert_eq!(loaded.host, "198.51.100.9");
    assert!(!loaded.smart_blinder);
}

#[test]
fn load_requires_host() {
    let dir = tempdir().unwrap();
    let store = store_in(dir.path());
    fs::write(dir.path().join("hostless.ship"), "SSH_USER=root\n").unwrap();

    let err = store.load("hostless").unwrap_err();
    assert!(err.to_string().contains("missing HOST"));
}

#[test]
fn save_rejects_empty_name_and_host() {
    let dir = tempdir().unwrap();
    let store = store_in(dir.path());

    assert!(store.save(Ship::new("!!!", "203.0.113.5")).is_err());
    assert!(store.save(Ship::new("ok", " ")).is_err());
}

#[test]
fn delete_is_idempotent() {
    let dir = tempdir().unwrap();
    let store = store_in(dir.path());

    store.save(Ship::new("deleteme", "127.0.0.1")).unwrap();
    store.delete("deleteme").unwrap();
    assert!(!dir.path().join("deleteme.ship").exists());
    store.delete("deleteme").unwrap();
}

#[test]
fn list_skips_foreign_files() {
    let dir = tempdir().unwrap();
    let store = store_in(dir.path());
    fs::write(dir.path().join("notes.txt"), "x").unwrap();
    store.save(Ship::new("b", "h")).unwrap();
    store.save(Ship::new("a", "h")).unwrap();
    assert_eq!(store.list().unwrap(), vec!["a".to_string(), "b".to_string()]);
}

#[cfg(unix)]
#[test]
fn files_and_dir_are_owner_only() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempdir().unwrap();
    let ships_dir = dir.path().join("ships");
    let store = store_in(&ships_dir);
    store.save(Ship::new("perm", "127.0.0.1")).unwrap();

    let dir_mode = fs::metadata(&ships_dir).unwrap().permissions().mode() & 0o777;
    assert_eq!(dir_mode, 0o700);
    let file_mode = fs::metadata(ships_dir.join("perm.ship"))
        .unwrap()
        .permissions()
        .mode()
        & 0o777;
    assert_eq!(file_mode, 0o600);
}
