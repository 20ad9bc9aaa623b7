//! The session supervisor: top-level control loop and state machine.
//!
//! One logical thread of control owns the terminal, the store, and the
//! decision of when a sync may run. States:
//!
//! ```text
//! Unlocking -> Supervising <-> Suspended
//!                  |
//!                  +-> Quitting | Restarting
//! ```
//!
//! While `Suspended`, the remote session owns the terminal; the supervisor
//! always returns to `Supervising` afterwards, even when the session or the
//! terminal reconfiguration failed. While a sync is in flight the store
//! lives on the worker thread, so no local mutation can interleave with
//! backup/restore.

mod frontend;
mod handoff;

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

pub use frontend::{Frontend, Notice, Request, TuiFrontend, VaultView};
pub use handoff::{
    CrosstermGate, SessionOutcome, SessionRunner, SessionSpec, SshRunner, TerminalGate,
};

use crate::cipher::CipherEngine;
use crate::config::{StartMode, VaultPaths};
use crate::store::{CredentialRef, CredentialStore, Host, StoreError};
use crate::sync::{
    spawn_sync, RemoteApi, SyncCoordinator, SyncError, SyncEvent, SyncHandle, SyncJob, SyncOutcome,
};

/// Errors surfaced by the supervisor.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// The terminal device could not be released or reconfigured.
    #[error("terminal error: {0}")]
    Terminal(String),

    /// The remote session could not be started.
    #[error("session error: {0}")]
    Session(String),

    /// Credential store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Synchronization failure escalated past the offline fallback.
    #[error(transparent)]
    Sync(#[from] SyncError),
}

/// Supervisor lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    /// Waiting for the passphrase.
    Unlocking,
    /// The interface owns the terminal.
    Supervising,
    /// A remote session owns the terminal.
    Suspended,
    /// Terminal state: exit.
    Quitting,
    /// Terminal state: relaunch with the same configuration.
    Restarting,
}

/// How the control loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    /// Exit the process.
    Quit,
    /// Relaunch a fresh instance over the same config directory.
    Restart,
}

/// Factory producing a remote client per sync run.
pub type RemoteFactory = Box<dyn Fn() -> Box<dyn RemoteApi>>;

/// The top-level control loop.
pub struct SessionSupervisor<F, G, R>
where
    F: Frontend,
    G: TerminalGate,
    R: SessionRunner,
{
    paths: VaultPaths,
    mode: StartMode,
    state: SupervisorState,
    frontend: F,
    gate: G,
    runner: R,
    make_remote: RemoteFactory,
    store: Option<CredentialStore>,
    cipher: Option<Arc<CipherEngine>>,
    token: Option<String>,
    sync: Option<SyncHandle>,
    offline: bool,
    status: String,
}

impl<F, G, R> SessionSupervisor<F, G, R>
where
    F: Frontend,
    G: TerminalGate,
    R: SessionRunner,
{
    /// Creates a supervisor in the `Unlocking` state.
    #[must_use]
    pub fn new(
        paths: VaultPaths,
        mode: StartMode,
        frontend: F,
        gate: G,
        runner: R,
        make_remote: RemoteFactory,
    ) -> Self {
        Self {
            paths,
            mode,
            state: SupervisorState::Unlocking,
            frontend,
            gate,
            runner,
            make_remote,
            store: None,
            cipher: None,
            token: None,
            sync: None,
            offline: false,
            status: String::new(),
        }
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SupervisorState {
        self.state
    }

    /// Returns true while the interface owns the terminal.
    #[must_use]
    pub fn terminal_in_interface_mode(&self) -> bool {
        self.gate.is_interface_mode()
    }

    /// Runs the control loop to completion.
    pub fn run(&mut self) -> Result<Exit, SupervisorError> {
        self.unlock()?;

        loop {
            match self.state {
                SupervisorState::Quitting => {
                    self.drain_sync();
                    return Ok(Exit::Quit);
                }
                SupervisorState::Restarting => {
                    self.drain_sync();
                    info!("restarting over {:?}", self.paths.root());
                    return Ok(Exit::Restart);
                }
                _ => {}
            }

            self.poll_sync()?;

            let request = {
                let hosts: &[Host] = match self.store.as_ref() {
                    Some(store) => &store.document().hosts,
                    None => &[],
                };
                let view = VaultView {
                    hosts,
                    syncing: self.sync.is_some(),
                    offline: self.offline,
                    status: &self.status,
                    mode: self.mode,
                };
                self.frontend.next_request(&view)
            };
            self.handle_request(request);
        }
    }

    /// `Unlocking -> Supervising`: derive the cipher, load the store, sort
    /// out the API token, and kick off the initial sync when online.
    fn unlock(&mut self) -> Result<(), SupervisorError> {
        let Some(passphrase) = self.frontend.prompt_passphrase() else {
            self.state = SupervisorState::Quitting;
            return Ok(());
        };
        let cipher = Arc::new(CipherEngine::derive(&passphrase));

        let mut store = CredentialStore::new(self.paths.clone());
        if let Err(e) = store.load() {
            // A malformed document is never reinitialized; the file may
            // still be repaired or restored by hand. Tell the user and
            // leave it exactly as it is.
            if matches!(e, StoreError::Parse(_)) {
                self.frontend.notify(Notice::Warning(format!(
                    "credential document is unreadable and was left untouched: {e}"
                )));
                self.state = SupervisorState::Quitting;
                return Ok(());
            }
            return Err(e.into());
        }

        let token = match store.load_api_token(&cipher) {
            Ok(token) => token,
            Err(StoreError::Cipher(_)) => {
                self.frontend.notify(Notice::Warning(
                    "stored API token cannot be read with this passphrase".to_string(),
                ));
                None
            }
            Err(e) => return Err(e.into()),
        };

        let token = match token {
            Some(token) => Some(token),
            None => {
                let entered = self.frontend.prompt_api_token().filter(|t| !t.is_empty());
                if let Some(ref t) = entered {
                    store.save_api_token(t, &cipher)?;
                }
                entered
            }
        };

        self.cipher = Some(cipher);
        self.token = token;
        self.state = SupervisorState::Supervising;

        if self.token.is_some() {
            self.start_sync(store, SyncJob::Full);
        } else {
            self.offline = true;
            self.status = "Unlocked (local-only)".to_string();
            self.store = Some(store);
        }
        Ok(())
    }

    fn start_sync(&mut self, store: CredentialStore, job: SyncJob) {
        let (Some(token), Some(cipher)) = (self.token.clone(), self.cipher.clone()) else {
            self.store = Some(store);
            return;
        };

        let coordinator = SyncCoordinator::new((self.make_remote)());
        self.sync = Some(spawn_sync(coordinator, token, store, cipher, job));
        self.status = match job {
            SyncJob::Full => "Syncing…".to_string(),
            SyncJob::PushOnly => "Pushing…".to_string(),
        };
    }

    /// Sync-on-write: after a successful local save while online, the new
    /// state is pushed in the background.
    fn push_after_save(&mut self) {
        if self.token.is_none() || self.offline || self.sync.is_some() {
            return;
        }
        if let Some(store) = self.store.take() {
            self.start_sync(store, SyncJob::PushOnly);
        }
    }

    fn poll_sync(&mut self) -> Result<(), SupervisorError> {
        let Some(handle) = self.sync.as_mut() else {
            return Ok(());
        };
        let Some(SyncEvent::Finished { store, result }) = handle.try_finish() else {
            return Ok(());
        };

        self.sync = None;
        self.store = Some(store);

        match result {
            Ok(SyncOutcome::Synced { last_sync }) => {
                self.offline = false;
                self.status = match last_sync {
                    Some(stamp) => format!("In sync (remote: {stamp})"),
                    None => "In sync".to_string(),
                };
            }
            Ok(SyncOutcome::Cancelled) => {
                self.status = "Sync cancelled".to_string();
            }
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) if e.is_offline() => {
                self.offline = true;
                self.status = "Offline (local-only)".to_string();
                self.frontend.notify(Notice::Warning(format!(
                    "sync unavailable, continuing offline: {e}"
                )));
            }
            Err(e) => {
                self.frontend.notify(Notice::Warning(format!("sync failed: {e}")));
            }
        }
        Ok(())
    }

    fn handle_request(&mut self, request: Request) {
        match request {
            Request::Quit => self.state = SupervisorState::Quitting,
            Request::Reload => self.state = SupervisorState::Restarting,
            Request::Sync => {
                if self.sync.is_some() {
                    self.frontend
                        .notify(Notice::Info("sync already in flight".to_string()));
                } else if self.token.is_none() {
                    self.frontend
                        .notify(Notice::Warning("no API token configured".to_string()));
                } else if let Some(store) = self.store.take() {
                    self.offline = false;
                    self.start_sync(store, SyncJob::Full);
                }
            }
            Request::CancelSync => {
                if let Some(ref handle) = self.sync {
                    handle.cancel();
                }
            }
            Request::Connect(index) => self.connect(index),
            Request::Tick => {}
        }
    }

    /// `Supervising -> Suspended -> Supervising`: the terminal handoff.
    fn connect(&mut self, index: usize) {
        if self.sync.is_some() {
            self.frontend.notify(Notice::Warning(
                "sync in flight; try again when it finishes".to_string(),
            ));
            return;
        }

        let spec = match self.session_spec(index) {
            Ok(spec) => spec,
            Err(msg) => {
                self.frontend.notify(Notice::Warning(msg));
                return;
            }
        };

        self.state = SupervisorState::Suspended;

        if let Err(e) = self.gate.release() {
            // Without a released terminal there is no session to run; report
            // and settle back into the interface.
            self.frontend
                .notify(Notice::Warning(format!("could not release terminal: {e}")));
            if let Err(e) = self.gate.reclaim() {
                self.frontend.notify(Notice::Warning(e.to_string()));
            }
            self.state = SupervisorState::Supervising;
            return;
        }

        let outcome = self.runner.run(&spec);

        // The terminal comes back whatever happened in the session.
        if let Err(e) = self.gate.reclaim() {
            self.frontend.notify(Notice::Warning(format!(
                "could not reconfigure terminal: {e}"
            )));
        }
        self.state = SupervisorState::Supervising;

        match outcome {
            Ok(SessionOutcome::Success) => {
                self.status = format!("Session with {} ended", spec.host_name);
                if let Some(store) = self.store.as_mut() {
                    match store.mark_host_connected(index) {
                        Ok(()) => self.push_after_save(),
                        Err(e) => warn!("failed to record connection: {e}"),
                    }
                }
            }
            Ok(SessionOutcome::Failure(msg)) => {
                self.frontend
                    .notify(Notice::Warning(format!("session ended with error: {msg}")));
            }
            Err(e) => {
                self.frontend.notify(Notice::Warning(e.to_string()));
            }
        }
    }

    /// Resolves a host's credential reference into a runnable session spec.
    fn session_spec(&self, index: usize) -> Result<SessionSpec, String> {
        let store = self
            .store
            .as_ref()
            .ok_or_else(|| "store not available".to_string())?;
        let document = store.document();
        let host = document
            .hosts
            .get(index)
            .ok_or_else(|| format!("no host at position {}", index + 1))?;

        let (key_path, password) = match host.credential_ref {
            CredentialRef::Password(i) => {
                let password = document
                    .passwords
                    .get(i)
                    .ok_or_else(|| format!("host '{}' references a missing password", host.name))?;
                (None, Some(password.password.clone()))
            }
            CredentialRef::Key(i) => {
                let key = document
                    .keys
                    .get(i)
                    .ok_or_else(|| format!("host '{}' references a missing key", host.name))?;
                (Some(store.key_path(key)), None)
            }
        };

        Ok(SessionSpec {
            host_name: host.name.clone(),
            login: host.login.clone(),
            address: host.address.clone(),
            port: host.port,
            key_path,
            password,
        })
    }

    /// Waits out an in-flight sync before leaving the loop, so worker
    /// writes never outlive the supervisor.
    fn drain_sync(&mut self) {
        if let Some(handle) = self.sync.take() {
            handle.cancel();
            if let Some(SyncEvent::Finished { store, .. }) = handle.wait() {
                self.store = Some(store);
            }
        }
    }
}
