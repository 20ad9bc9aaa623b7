//! Davit - Main entry point.
//!
//! A TUI manager for SSH credentials with encrypted storage, remote sync,
//! and terminal handoff to interactive sessions.
//!
//! Usage: davit [OPTIONS]
//!
//! Options:
//!   --version, -v        Show version
//!   --edit, -e           Start in the edit view
//!   --transfer, -t       Start in the file-transfer view
//!   --config-dir <path>  Use a custom config directory

use std::env;
use std::io;
use std::panic;
use std::process::ExitCode;

use crossterm::execute;
use crossterm::terminal::{disable_raw_mode, LeaveAlternateScreen};

use davit::config::{StartMode, VaultPaths};
use davit::logging::{self, LogConfig};
use davit::supervisor::{
    CrosstermGate, Exit, RemoteFactory, SessionSupervisor, SshRunner, TuiFrontend,
};
use davit::sync::HttpRemote;

/// Crate version.
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default remote sync service.
const DEFAULT_SYNC_URL: &str = "https://sync.davit.dev";

fn main() -> ExitCode {
    // Parse command-line arguments
    let args: Vec<String> = env::args().collect();

    if args.iter().any(|a| a == "--version" || a == "-v") {
        println!("davit v{}", VERSION);
        return ExitCode::SUCCESS;
    }

    let mode = args
        .iter()
        .skip(1)
        .find_map(|a| StartMode::from_flag(a))
        .unwrap_or_default();

    let config_dir = args
        .iter()
        .position(|a| a == "--config-dir")
        .and_then(|i| args.get(i + 1))
        .cloned();
    let paths = match config_dir {
        Some(dir) => VaultPaths::with_root(dir),
        None => VaultPaths::new(),
    };

    if let Err(e) = paths.ensure_root() {
        eprintln!("cannot create config directory {:?}: {}", paths.root(), e);
        return ExitCode::FAILURE;
    }
    if let Err(e) = logging::init(&paths.logs_dir(), &LogConfig::default()) {
        eprintln!("cannot initialize logging: {}", e);
        return ExitCode::FAILURE;
    }

    // Set up panic hook to restore the terminal on panic
    let original_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        let _ = restore_terminal();
        original_hook(panic_info);
    }));

    let sync_url = env::var("DAVIT_SYNC_URL").unwrap_or_else(|_| DEFAULT_SYNC_URL.to_string());
    let remote = match HttpRemote::new(&sync_url) {
        Ok(remote) => remote,
        Err(e) => {
            eprintln!("cannot build sync client: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // Reload tears the instance down and relaunches a fresh one over the
    // same config directory.
    loop {
        let result = run_instance(&paths, mode, &remote);
        match result {
            Ok(Exit::Restart) => continue,
            Ok(Exit::Quit) => return ExitCode::SUCCESS,
            Err(e) => {
                let _ = restore_terminal();
                eprintln!("davit: {}", e);
                tracing::error!("fatal: {}", e);
                return ExitCode::FAILURE;
            }
        }
    }
}

/// Builds and runs one supervisor instance.
fn run_instance(
    paths: &VaultPaths,
    mode: StartMode,
    remote: &HttpRemote,
) -> Result<Exit, Box<dyn std::error::Error>> {
    let gate = CrosstermGate::enter()?;
    let frontend = TuiFrontend::new()?;

    let remote = remote.clone();
    let make_remote: RemoteFactory = Box::new(move || Box::new(remote.clone()));

    let mut supervisor = SessionSupervisor::new(
        paths.clone(),
        mode,
        frontend,
        gate,
        SshRunner,
        make_remote,
    );
    Ok(supervisor.run()?)
}

/// Restores the terminal to its original state.
fn restore_terminal() -> io::Result<()> {
    disable_raw_mode()?;
    execute!(io::stdout(), LeaveAlternateScreen)?;
    Ok(())
}
