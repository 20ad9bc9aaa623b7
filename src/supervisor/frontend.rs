//! The supervising interface, specified at its seam.
//!
//! List/form rendering and password-prompt widgets are collaborators of the
//! supervisor, not part of it: the supervisor only needs a way to prompt for
//! secrets, surface notices, and receive the next user request. Tests script
//! a [`Frontend`]; the binary uses [`TuiFrontend`].

use std::io::Stdout;
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Layout};
use ratatui::style::{Modifier, Style};
use ratatui::text::Line;
use ratatui::widgets::{Block, Borders, List, ListItem, ListState, Paragraph};
use ratatui::Terminal;

use crate::config::StartMode;
use crate::store::Host;
use crate::supervisor::SupervisorError;

/// Input poll interval for the interface loop.
const POLL_INTERVAL: Duration = Duration::from_millis(150);

/// A user request handed to the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Connect to the host at the given index.
    Connect(usize),
    /// Run a manual sync now.
    Sync,
    /// Cancel the sync in flight.
    CancelSync,
    /// Tear down and relaunch with the same configuration.
    Reload,
    /// Exit.
    Quit,
    /// Nothing happened this poll.
    Tick,
}

/// A notice surfaced to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// Informational status.
    Info(String),
    /// Recoverable problem the user should see.
    Warning(String),
}

/// Read-only view of supervisor state for rendering.
#[derive(Debug)]
pub struct VaultView<'a> {
    /// Saved hosts; empty while the store is held by a sync.
    pub hosts: &'a [Host],
    /// True while a sync is in flight.
    pub syncing: bool,
    /// True when the vault degraded to local-only mode.
    pub offline: bool,
    /// Current status line.
    pub status: &'a str,
    /// Which view the interface started in.
    pub mode: StartMode,
}

/// The supervising interface seam.
pub trait Frontend {
    /// Prompts for the unlock passphrase. `None` means the user aborted.
    fn prompt_passphrase(&mut self) -> Option<String>;

    /// Prompts for the remote API token. `None` means stay local-only.
    fn prompt_api_token(&mut self) -> Option<String>;

    /// Renders the view and returns the next request.
    fn next_request(&mut self, view: &VaultView<'_>) -> Request;

    /// Surfaces a notice.
    fn notify(&mut self, notice: Notice);
}

/// Minimal ratatui frontend: host list, status bar, masked prompts.
pub struct TuiFrontend {
    terminal: Terminal<CrosstermBackend<Stdout>>,
    selected: usize,
    last_notice: Option<Notice>,
}

impl TuiFrontend {
    /// Creates the frontend over stdout. The caller already put the terminal
    /// into interface mode.
    pub fn new() -> Result<Self, SupervisorError> {
        let backend = CrosstermBackend::new(std::io::stdout());
        let terminal =
            Terminal::new(backend).map_err(|e| SupervisorError::Terminal(e.to_string()))?;
        Ok(Self {
            terminal,
            selected: 0,
            last_notice: None,
        })
    }

    /// Reads one line in raw mode, masking input when `mask` is set.
    /// Enter submits, Esc aborts.
    fn read_line(&mut self, title: &str, mask: bool) -> Option<String> {
        let mut input = String::new();

        loop {
            let shown = if mask {
                "*".repeat(input.chars().count())
            } else {
                input.clone()
            };
            let draw = self.terminal.draw(|frame| {
                let [area, _] =
                    Layout::vertical([Constraint::Length(3), Constraint::Min(0)]).areas(frame.area());
                let widget = Paragraph::new(shown.as_str())
                    .block(Block::default().borders(Borders::ALL).title(title.to_string()));
                frame.render_widget(widget, area);
            });
            if draw.is_err() {
                return None;
            }

            match event::read() {
                Ok(Event::Key(key)) if key.kind == KeyEventKind::Press => match key.code {
                    KeyCode::Enter => return Some(input),
                    KeyCode::Esc => return None,
                    KeyCode::Backspace => {
                        input.pop();
                    }
                    KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                        return None;
                    }
                    KeyCode::Char(c) => input.push(c),
                    _ => {}
                },
                Ok(_) => {}
                Err(_) => return None,
            }
        }
    }

    fn draw_view(&mut self, view: &VaultView<'_>) {
        let selected = self.selected.min(view.hosts.len().saturating_sub(1));
        let notice_line = match &self.last_notice {
            Some(Notice::Warning(msg)) => format!("! {msg}"),
            Some(Notice::Info(msg)) => msg.clone(),
            None => String::new(),
        };

        let title = match view.mode {
            StartMode::Connect => "Hosts",
            StartMode::Edit => "Hosts (edit)",
            StartMode::Transfer => "Hosts (transfer)",
        };

        let mut flags = Vec::new();
        if view.syncing {
            flags.push("syncing…");
        }
        if view.offline {
            flags.push("offline");
        }
        let header = if flags.is_empty() {
            title.to_string()
        } else {
            format!("{title} [{}]", flags.join(", "))
        };

        let items: Vec<ListItem<'_>> = view
            .hosts
            .iter()
            .map(|h| ListItem::new(format!("{}  {}@{}:{}", h.name, h.login, h.address, h.port)))
            .collect();
        let mut list_state = ListState::default();
        if !view.hosts.is_empty() {
            list_state.select(Some(selected));
        }

        let status = view.status.to_string();
        let _ = self.terminal.draw(|frame| {
            let [list_area, status_area, notice_area] = Layout::vertical([
                Constraint::Min(3),
                Constraint::Length(1),
                Constraint::Length(1),
            ])
            .areas(frame.area());

            let list = List::new(items)
                .block(Block::default().borders(Borders::ALL).title(header))
                .highlight_style(Style::default().add_modifier(Modifier::REVERSED));
            frame.render_stateful_widget(list, list_area, &mut list_state);

            frame.render_widget(Paragraph::new(Line::from(status)), status_area);
            frame.render_widget(Paragraph::new(Line::from(notice_line)), notice_area);
        });
    }
}

impl Frontend for TuiFrontend {
    fn prompt_passphrase(&mut self) -> Option<String> {
        self.read_line("Passphrase", true)
    }

    fn prompt_api_token(&mut self) -> Option<String> {
        self.read_line("API token (Esc for local-only)", false)
    }

    fn next_request(&mut self, view: &VaultView<'_>) -> Request {
        self.draw_view(view);

        match event::poll(POLL_INTERVAL) {
            Ok(true) => {}
            Ok(false) | Err(_) => return Request::Tick,
        }
        let Ok(Event::Key(key)) = event::read() else {
            return Request::Tick;
        };
        if key.kind != KeyEventKind::Press {
            return Request::Tick;
        }

        match key.code {
            KeyCode::Char('q') => Request::Quit,
            KeyCode::Char('r') => Request::Reload,
            KeyCode::Char('s') => Request::Sync,
            KeyCode::Esc if view.syncing => Request::CancelSync,
            KeyCode::Down | KeyCode::Char('j') => {
                if self.selected + 1 < view.hosts.len() {
                    self.selected += 1;
                }
                Request::Tick
            }
            KeyCode::Up | KeyCode::Char('k') => {
                self.selected = self.selected.saturating_sub(1);
                Request::Tick
            }
            KeyCode::Enter if !view.hosts.is_empty() => {
                Request::Connect(self.selected.min(view.hosts.len() - 1))
            }
            _ => Request::Tick,
        }
    }

    fn notify(&mut self, notice: Notice) {
        self.last_notice = Some(notice);
    }
}
