//! Terminal handoff: releasing the terminal to an interactive remote
//! session and reclaiming it afterwards.
//!
//! The terminal device has exactly one owner at any instant. The supervisor
//! owns it in raw mode on the alternate screen; for the duration of a remote
//! session ownership transfers to the child process, cooked mode, main
//! screen. Both directions go through the [`TerminalGate`] so tests can
//! assert which mode the terminal ended up in.

use std::io::{self, Write};
use std::path::PathBuf;
use std::process::Command;

use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, Clear, ClearType, EnterAlternateScreen, LeaveAlternateScreen,
};
use tracing::{info, warn};

use super::SupervisorError;

/// Everything needed to start one interactive remote session.
#[derive(Debug, Clone)]
pub struct SessionSpec {
    /// Host display name, for status reporting.
    pub host_name: String,
    /// Login user.
    pub login: String,
    /// Hostname or IP address.
    pub address: String,
    /// SSH port.
    pub port: u16,
    /// Private-key file, when the host authenticates with a key.
    pub key_path: Option<PathBuf>,
    /// Password, when the host authenticates with one. Interactive runners
    /// may leave the prompt to the remote shell instead of consuming this.
    pub password: Option<String>,
}

impl SessionSpec {
    /// Returns the ssh command arguments for this session.
    #[must_use]
    pub fn ssh_args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(5);

        if self.port != 22 {
            args.push("-p".to_string());
            args.push(self.port.to_string());
        }
        if let Some(ref key) = self.key_path {
            args.push("-i".to_string());
            args.push(key.to_string_lossy().into_owned());
        }
        args.push(format!("{}@{}", self.login, self.address));

        args
    }
}

/// How a remote session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The remote command exited cleanly.
    Success,
    /// The remote command exited with an error.
    Failure(String),
}

/// Runs the interactive remote session while the supervisor is suspended.
/// The wire implementation is a collaborator; tests script it.
pub trait SessionRunner {
    /// Blocks until the session ends. Returns `Err` only when the session
    /// could not be started at all.
    fn run(&mut self, spec: &SessionSpec) -> Result<SessionOutcome, SupervisorError>;
}

/// Spawns the system `ssh` client with inherited stdio.
#[derive(Debug, Default)]
pub struct SshRunner;

impl SessionRunner for SshRunner {
    fn run(&mut self, spec: &SessionSpec) -> Result<SessionOutcome, SupervisorError> {
        info!("starting ssh session to {}", spec.host_name);

        let status = Command::new("ssh")
            .args(spec.ssh_args())
            .status()
            .map_err(|e| SupervisorError::Session(format!("failed to start ssh: {e}")))?;

        if status.success() {
            Ok(SessionOutcome::Success)
        } else {
            Ok(SessionOutcome::Failure(format!(
                "ssh exited with {}",
                status.code().map_or("signal".to_string(), |c| c.to_string())
            )))
        }
    }
}

/// Exclusive ownership of the terminal device.
pub trait TerminalGate {
    /// Hands the terminal to a remote session: cooked mode, main screen.
    fn release(&mut self) -> Result<(), SupervisorError>;

    /// Takes the terminal back for the interface: raw mode, alternate
    /// screen.
    fn reclaim(&mut self) -> Result<(), SupervisorError>;

    /// Returns true while the interface owns the terminal.
    fn is_interface_mode(&self) -> bool;
}

/// Real terminal gate over crossterm.
#[derive(Debug)]
pub struct CrosstermGate {
    interface_mode: bool,
}

impl CrosstermGate {
    /// Enters interface mode (raw + alternate screen) and returns the gate.
    pub fn enter() -> Result<Self, SupervisorError> {
        let mut gate = Self {
            interface_mode: false,
        };
        gate.reclaim()?;
        Ok(gate)
    }
}

impl TerminalGate for CrosstermGate {
    fn release(&mut self) -> Result<(), SupervisorError> {
        disable_raw_mode().map_err(|e| SupervisorError::Terminal(e.to_string()))?;
        execute!(io::stdout(), LeaveAlternateScreen)
            .map_err(|e| SupervisorError::Terminal(e.to_string()))?;
        io::stdout()
            .flush()
            .map_err(|e| SupervisorError::Terminal(e.to_string()))?;

        self.interface_mode = false;
        Ok(())
    }

    fn reclaim(&mut self) -> Result<(), SupervisorError> {
        enable_raw_mode().map_err(|e| SupervisorError::Terminal(e.to_string()))?;
        execute!(io::stdout(), EnterAlternateScreen, Clear(ClearType::All))
            .map_err(|e| SupervisorError::Terminal(e.to_string()))?;

        self.interface_mode = true;
        Ok(())
    }

    fn is_interface_mode(&self) -> bool {
        self.interface_mode
    }
}

impl Drop for CrosstermGate {
    fn drop(&mut self) {
        // Never leave the user's shell in raw mode, whatever happened.
        if self.interface_mode {
            if let Err(e) = self.release() {
                warn!("failed to restore terminal on shutdown: {e}");
            }
        }
    }
}
