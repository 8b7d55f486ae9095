// Seam between the firmware translator and the print-management host

/// Connection states the translator can force the host into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostState {
    Operational,
    Printing,
    Pausing,
    Paused,
    Finishing,
}

impl std::fmt::Display for HostState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HostState::Operational => write!(f, "OPERATIONAL"),
            HostState::Printing => write!(f, "PRINTING"),
            HostState::Pausing => write!(f, "PAUSING"),
            HostState::Paused => write!(f, "PAUSED"),
            HostState::Finishing => write!(f, "FINISHING"),
        }
    }
}

/// Custom events the host must register by name at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostEvent {
    LayerChange,
}

impl HostEvent {
    pub const ALL: [HostEvent; 1] = [HostEvent::LayerChange];

    pub fn name(&self) -> &'static str {
        match self {
            HostEvent::LayerChange => "layer_change",
        }
    }
}

/// Read-only view of the host state the rewrite rules depend on.
pub trait HostStatus {
    fn is_printing(&self) -> bool;
    fn is_pausing(&self) -> bool;
    fn is_finishing(&self) -> bool;
}

/// Operations the translator's actions are applied through.
pub trait PrinterHost: HostStatus {
    fn change_state(&mut self, state: HostState);
    fn unselect_file(&mut self);
    fn clear_current_file(&mut self);
    /// Start capturing position data for resuming after a pause.
    fn record_pause_data(&mut self);
    fn fire_event(&mut self, event: HostEvent);
    /// Echo lines into the host terminal.
    fn log_lines(&mut self, lines: &[String]);
}
