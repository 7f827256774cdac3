mod args;

use std::io::{BufRead, IsTerminal, Write};

use clap::Parser;
use secrecy::SecretString;
use tokio_util::sync::CancellationToken;

use bm_types::Inventory;
use hangar_core::{
    Action, DriverOutcome, HangarError, HangarResult, HangarService, OperationDriver,
    PasswordCache, ShipStore,
};
use ssh_core::{Target, tunnel};

use crate::args::{BeamArgs, CliRequest};

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_USAGE: i32 = 2;

/// Parse arguments, run the requested operation, and return the process
/// exit code.
pub async fn run() -> i32 {
    init_tracing();

    let args = match BeamArgs::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let code = if err.use_stderr() {
                EXIT_USAGE
            } else {
                EXIT_SUCCESS
            };
            let _ = err.print();
            return code;
        }
    };
    let request = match CliRequest::try_from(args) {
        Ok(request) => request,
        Err(err) => {
            print_err(&format!("{err}"));
            return EXIT_USAGE;
        }
    };

    match run_request(request).await {
        Ok(code) => code,
        Err(err) => {
            print_err(&format!("{err}"));
            match err {
                HangarError::Usage(_) => EXIT_USAGE,
                _ => EXIT_FAILURE,
            }
        }
    }
}

async fn run_request(request: CliRequest) -> HangarResult<i32> {
    let store = ShipStore::open(None)?;

    if request.list_ships {
        return list_ships(&store);
    }

    if request.stealth {
        return run_stealth(&store, request).await;
    }

    let service = HangarService::new(request.connect.clone());
    let cache = PasswordCache::new();
    let driver = OperationDriver::new(&store, &service, &cache);

    let action = request.launch.action;
    let resolved = driver.resolve(request.launch, prompt_password).await?;
    print_inventory_summary(&resolved.inventory);

    if action == Action::Destroy && !request.yes && !confirm_destroy(&resolved.ship.host)? {
        return Err(HangarError::Cancelled);
    }

    match driver.execute(&resolved).await? {
        DriverOutcome::Inventory(_) => Ok(EXIT_SUCCESS),
        DriverOutcome::Preflight { protocol, port, .. } => {
            println!("\nPreflight passed. No changes were made.");
            println!("Protocol: {protocol}");
            println!("Port: {port}");
            println!("Status: ready for launch.");
            Ok(EXIT_SUCCESS)
        }
        DriverOutcome::Result(res) => {
            if res.protocol == "DESTROY" {
                println!("\n[beammeup] destroy hangar complete.");
                println!("  Target: {}", res.host);
                if !res.note.is_empty() {
                    println!("  Result: {}", res.note);
                }
                println!("\n[beammeup] jump successful.");
                return Ok(EXIT_SUCCESS);
            }

            println!("\nbeammeup {} complete ({}).", res.action, res.protocol);
            println!("Connection details:");
            println!("  Host: {}", res.host);
            println!("  Port: {}", res.port);
            println!("  Username: {}", fallback(&res.user, "<not available>"));
            println!("  Password: {}", fallback(&res.pass, "<not retrievable>"));

            if !res.firewall_note.is_empty() {
                println!("\nFirewall note: {}", res.firewall_note);
            }
            if !res.note.is_empty() {
                println!("Note: {}", res.note);
            }

            println!("\n[beammeup] jump successful.");
            println!("\nChrome extension setup:");
            if res.protocol.eq_ignore_ascii_case("HTTP") {
                println!("  Type: HTTP proxy\n  Server: {}\n  Port: {}", res.host, res.port);
                println!("  Enter username/password when prompted");
                if !res.pass.is_empty() {
                    println!(
                        "\nQuick test:\n  curl -x 'http://{}:{}@{}:{}' https://api.ipify.org",
                        res.user, res.pass, res.host, res.port
                    );
                }
            } else {
                println!("  Type: SOCKS5\n  Server: {}\n  Port: {}", res.host, res.port);
                println!("  Username/Password: use values above");
                if !res.pass.is_empty() {
                    println!(
                        "\nQuick test:\n  curl -x 'socks5h://{}:{}@{}:{}' https://api.ipify.org",
                        res.user, res.pass, res.host, res.port
                    );
                }
            }
            Ok(EXIT_SUCCESS)
        }
    }
}

fn list_ships(store: &ShipStore) -> HangarResult<i32> {
    let ships = store.list()?;
    if ships.is_empty() {
        println!("No ships saved yet in {}", store.dir().display());
        return Ok(EXIT_SUCCESS);
    }
    println!("Saved ships ({}):", store.dir().display());
    for ship in ships {
        println!("  - {ship}");
    }
    Ok(EXIT_SUCCESS)
}

/// Stealth mode: local SOCKS5 proxy over the SSH tunnel. Runs until
/// Ctrl-C.
async fn run_stealth(store: &ShipStore, request: CliRequest) -> HangarResult<i32> {
    let launch = request.launch;
    let mut ship = match &launch.ship_name {
        Some(name) => store.load(name)?,
        None => bm_types::Ship::default(),
    };
    if let Some(host) = &launch.host
        && !host.trim().is_empty()
    {
        ship.host = host.trim().to_string();
    }
    if let Some(port) = launch.ssh_port
        && port > 0
    {
        ship.ssh_port = port;
    }
    if let Some(user) = &launch.ssh_user
        && !user.trim().is_empty()
    {
        ship.ssh_user = user.trim().to_string();
    }
    if ship.host.trim().is_empty() {
        return Err(HangarError::Usage(
            "no host provided. use --host or --ship".into(),
        ));
    }

    let password = match launch.password {
        Some(password) => password,
        None => prompt_password(&format!(
            "SSH password for {}@{}: ",
            ship.ssh_user, ship.host
        ))?,
    };

    let target = Target {
        host: ship.host,
        port: ship.ssh_port,
        user: ship.ssh_user,
        password,
    };

    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c_cancel.cancel();
        }
    });

    println!("[beammeup] stealth tunnel starting on {}", request.local_addr);
    println!("[beammeup] press Ctrl-C to close the tunnel.");
    tunnel::run(&target, &request.connect, &request.local_addr, cancel).await?;
    Ok(EXIT_SUCCESS)
}

fn prompt_password(label: &str) -> HangarResult<SecretString> {
    if !std::io::stdin().is_terminal() {
        return Err(HangarError::Usage("ssh password is required".into()));
    }
    let password = rpassword::prompt_password(label)?;
    Ok(SecretString::from(password))
}

fn confirm_destroy(host: &str) -> HangarResult<bool> {
    if !std::io::stdin().is_terminal() {
        return Err(HangarError::Usage(
            "refusing to destroy without --yes on a non-interactive run".into(),
        ));
    }
    print!("Destroy hangar on {host}? [y/N]: ");
    std::io::stdout().flush()?;
    let answer = read_line()?;
    if !matches!(answer.to_lowercase().as_str(), "y" | "yes") {
        return Ok(false);
    }
    print!("Type DESTROY to confirm: ");
    std::io::stdout().flush()?;
    Ok(read_line()? == "DESTROY")
}

fn read_line() -> HangarResult<String> {
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn print_inventory_summary(inventory: &Inventory) {
    println!("\n[ship-scan] detected beammeup setups on target:");
    if inventory.socks5.exists {
        let state = if inventory.socks5.active {
            "active"
        } else {
            "inactive"
        };
        println!(
            "  SOCKS5: {state}, port={}, user={}",
            fallback(&inventory.socks5.port, "unknown"),
            fallback(&inventory.socks5.user, "unknown")
        );
    } else {
        println!("  SOCKS5: not configured");
    }
    if inventory.http.exists {
        let state = if inventory.http.active {
            "active"
        } else {
            "inactive"
        };
        let legacy = if inventory.http.legacy {
            " (legacy config)"
        } else {
            ""
        };
        println!(
            "  HTTP:   {state}, port={}, user={}{legacy}",
            fallback(&inventory.http.port, "unknown"),
            fallback(&inventory.http.user, "unknown")
        );
    } else {
        println!("  HTTP:   not configured");
    }
    println!("  Hangar: {}", inventory.hangar_status);
}

fn fallback<'a>(value: &'a str, default: &'a str) -> &'a str {
    if value.trim().is_empty() { default } else { value }
}

fn print_err(message: &str) {
    eprintln!("[beammeup] ERROR: {message}");
}

fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .try_init();
}
