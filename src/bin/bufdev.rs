use std::path::PathBuf;
use std::sync::Arc;

use bufdev::board::{load_board, validate_board, BoardSpec};
use bufdev::device::Permission;
use bufdev::lifecycle::LifecycleCoordinator;
use bufdev::publish::MemoryPublisher;
use bufdev::registry::DeviceRegistry;
use bufdev::{OpenMode, Whence};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        print_usage();
        std::process::exit(1);
    }

    match args[1].as_str() {
        "list" => cmd_list(&args[2..])?,
        "validate" => cmd_validate(&args[2..])?,
        "exercise" => cmd_exercise(&args[2..])?,
        "version" | "--version" | "-V" => println!("bufdev {}", env!("CARGO_PKG_VERSION")),
        "help" | "--help" | "-h" => print_usage(),
        _ => {
            eprintln!("unknown command: {}", args[1]);
            print_usage();
            std::process::exit(1);
        }
    }

    Ok(())
}

fn load_or_default(args: &[String]) -> Result<BoardSpec, Box<dyn std::error::Error>> {
    match arg_value(args, "--board") {
        Some(path) => Ok(load_board(&PathBuf::from(path))?),
        None => Ok(BoardSpec::default()),
    }
}

fn bring_up(board: &BoardSpec) -> Result<LifecycleCoordinator, Box<dyn std::error::Error>> {
    let registry = Arc::new(DeviceRegistry::new());
    let coordinator = LifecycleCoordinator::new(registry, Arc::new(MemoryPublisher::new()));
    coordinator.initialize_all(board.base, &board.devices)?;
    Ok(coordinator)
}

fn cmd_validate(args: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let board = load_or_default(args)?;
    validate_board(&board)?;
    println!(
        "valid: {} devices at base {}",
        board.devices.len(),
        board.base
    );
    Ok(())
}

fn cmd_list(args: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let board = load_or_default(args)?;
    let coordinator = bring_up(&board)?;

    println!(
        "{:<6} {:<12} {:<12} {:>10}  {:<4} {}",
        "id", "name", "serial", "capacity", "perm", "state"
    );
    for info in coordinator.list() {
        println!(
            "{:<6} {:<12} {:<12} {:>10}  {:<4} {:?}",
            info.id, info.name, info.serial, info.capacity, info.permission, info.state
        );
    }
    Ok(())
}

fn cmd_exercise(args: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let board = load_or_default(args)?;
    let coordinator = bring_up(&board)?;

    let Some(info) = coordinator
        .list()
        .into_iter()
        .find(|d| d.permission == Permission::ReadWrite)
    else {
        return Err("board has no read-write device to exercise".into());
    };

    let mut handle = coordinator.open(info.id, OpenMode::ReadWrite)?;
    let payload: Vec<u8> = (0..info.capacity).map(|i| (i % 251) as u8).collect();
    let written = handle.write(&payload)?;
    handle.seek(0, Whence::Start)?;

    let mut readback = vec![0u8; written];
    let read = handle.read(&mut readback)?;
    handle.close();

    println!("device: {} ({})", info.id, info.name);
    println!("wrote: {} bytes", written);
    println!("read: {} bytes", read);
    println!(
        "round-trip: {}",
        if readback[..read] == payload[..read] {
            "ok"
        } else {
            "MISMATCH"
        }
    );

    coordinator.detach(info.id)?;
    println!(
        "detach: ok (open now fails: {})",
        coordinator.open(info.id, OpenMode::Read).is_err()
    );
    Ok(())
}

fn arg_value(args: &[String], key: &str) -> Option<String> {
    args.windows(2).find(|w| w[0] == key).map(|w| w[1].clone())
}

fn print_usage() {
    println!(
        r#"bufdev

USAGE:
  bufdev list [--board <board.json|yaml>]
  bufdev validate [--board <board.json|yaml>]
  bufdev exercise [--board <board.json|yaml>]

NOTES:
  - Board files: JSON (.json) and YAML (.yaml, .yml) are both supported.
  - Without --board, the built-in four-device board is used.
  - Set RUST_LOG=debug (or trace) for per-call logging."#
    );
}
