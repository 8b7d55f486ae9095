//! Host-side effects of translation.
//!
//! The translator never calls into the host directly. It returns
//! [`HostAction`]s, and [`apply_actions`] replays them against any
//! [`PrinterHost`]. [`SessionHost`] is the in-process host used by the
//! serial bridge.

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};

use chitu_shared::{HostEvent, HostState, HostStatus, PrinterHost};

/// Prefix for lines echoed into the host terminal.
pub const TERMINAL_PREFIX: &str = "Repl:";

const TERMINAL_HISTORY: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostAction {
    SetState(HostState),
    UnselectFile,
    ClearCurrentFile,
    RecordPauseData,
    FireEvent(HostEvent),
    LogToTerminal(String),
}

impl HostAction {
    pub fn terminal(line: impl AsRef<str>) -> Self {
        HostAction::LogToTerminal(format!("{} {}", TERMINAL_PREFIX, line.as_ref()))
    }
}

pub fn apply_actions<H: PrinterHost + ?Sized>(host: &mut H, actions: &[HostAction]) {
    for action in actions {
        match action {
            HostAction::SetState(state) => host.change_state(*state),
            HostAction::UnselectFile => host.unselect_file(),
            HostAction::ClearCurrentFile => host.clear_current_file(),
            HostAction::RecordPauseData => host.record_pause_data(),
            HostAction::FireEvent(event) => host.fire_event(*event),
            HostAction::LogToTerminal(line) => host.log_lines(std::slice::from_ref(line)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct SelectedFile {
    path: PathBuf,
    layer_count: Option<u32>,
}

/// Minimal print-session host: connection state, file selection and events.
#[derive(Debug)]
pub struct SessionHost {
    state: HostState,
    selected: Option<SelectedFile>,
    current_file: Option<PathBuf>,
    recording_pause_data: bool,
    registered_events: HashSet<&'static str>,
    current_layer: u32,
    terminal: VecDeque<String>,
}

impl Default for SessionHost {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionHost {
    pub fn new() -> Self {
        let mut host = Self {
            state: HostState::Operational,
            selected: None,
            current_file: None,
            recording_pause_data: false,
            registered_events: HashSet::new(),
            current_layer: 0,
            terminal: VecDeque::with_capacity(TERMINAL_HISTORY),
        };
        for event in HostEvent::ALL {
            host.register_event(event);
        }
        host
    }

    pub fn register_event(&mut self, event: HostEvent) {
        if self.registered_events.insert(event.name()) {
            tracing::debug!("Registered custom event {}", event.name());
        }
    }

    pub fn state(&self) -> HostState {
        self.state
    }

    pub fn select_file(&mut self, path: impl Into<PathBuf>, layer_count: Option<u32>) {
        let path = path.into();
        tracing::info!("Selected {}", path.display());
        self.selected = Some(SelectedFile { path, layer_count });
    }

    pub fn selected_file(&self) -> Option<&Path> {
        self.selected.as_ref().map(|s| s.path.as_path())
    }

    pub fn current_file(&self) -> Option<&Path> {
        self.current_file.as_deref()
    }

    /// Start printing the selected file. Returns false when nothing is selected.
    pub fn start_print(&mut self) -> bool {
        let Some(selected) = &self.selected else {
            tracing::warn!("Cannot start print, no file selected");
            return false;
        };
        self.current_file = Some(selected.path.clone());
        self.current_layer = 0;
        self.change_state(HostState::Printing);
        true
    }

    pub fn is_recording_pause_data(&self) -> bool {
        self.recording_pause_data
    }

    pub fn current_layer(&self) -> u32 {
        self.current_layer
    }

    /// `"<layer>/<layers>"` while printing a file with a known layer count, else `"-"`.
    pub fn layer_progress(&self) -> String {
        match (&self.selected, self.is_printing()) {
            (Some(SelectedFile { layer_count: Some(total), .. }), true) => {
                format!("{}/{}", self.current_layer, total)
            }
            _ => "-".to_string(),
        }
    }

    pub fn terminal_lines(&self) -> impl Iterator<Item = &str> {
        self.terminal.iter().map(String::as_str)
    }
}

impl HostStatus for SessionHost {
    fn is_printing(&self) -> bool {
        self.state == HostState::Printing
    }

    fn is_pausing(&self) -> bool {
        self.state == HostState::Pausing
    }

    fn is_finishing(&self) -> bool {
        self.state == HostState::Finishing
    }
}

impl PrinterHost for SessionHost {
    fn change_state(&mut self, state: HostState) {
        if self.state != state {
            tracing::info!("Host state {} -> {}", self.state, state);
        }
        if state == HostState::Printing {
            self.recording_pause_data = false;
        }
        self.state = state;
    }

    fn unselect_file(&mut self) {
        self.selected = None;
    }

    fn clear_current_file(&mut self) {
        self.current_file = None;
    }

    fn record_pause_data(&mut self) {
        self.recording_pause_data = true;
    }

    fn fire_event(&mut self, event: HostEvent) {
        if !self.registered_events.contains(event.name()) {
            tracing::warn!("Dropping unregistered event {}", event.name());
            return;
        }
        match event {
            HostEvent::LayerChange => {
                self.current_layer = self.current_layer.saturating_add(1);
                tracing::debug!("Layer change, now at layer {}", self.current_layer);
            }
        }
    }

    fn log_lines(&mut self, lines: &[String]) {
        for line in lines {
            tracing::debug!("{}", line);
            if self.terminal.len() == TERMINAL_HISTORY {
                self.terminal.pop_front();
            }
            self.terminal.push_back(line.clone());
        }
    }
}
