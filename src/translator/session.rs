use std::collections::HashSet;

/// Firmware version assumed until the board answers the start handshake.
pub const DEFAULT_FIRMWARE_VERSION: &str = "4.13";

/// Debounce for the firmware's duplicated 100% progress report.
///
/// `Confirmed` is only ever the result of advancing from `FirstSeen`; the
/// session emits completion and stores `Unset` instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompletionCounter {
    #[default]
    Unset,
    FirstSeen,
    Confirmed,
}

impl CompletionCounter {
    pub fn advance(self) -> CompletionCounter {
        match self {
            CompletionCounter::Unset => CompletionCounter::FirstSeen,
            CompletionCounter::FirstSeen | CompletionCounter::Confirmed => CompletionCounter::Confirmed,
        }
    }
}

/// Per-connection state owned by one translator.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub firmware_version: String,
    completion: CompletionCounter,
    logged_once: HashSet<String>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            firmware_version: DEFAULT_FIRMWARE_VERSION.to_string(),
            completion: CompletionCounter::Unset,
            logged_once: HashSet::new(),
        }
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn completion(&self) -> CompletionCounter {
        self.completion
    }

    /// Record one full-progress report; returns true when completion is confirmed.
    pub fn observe_full_progress(&mut self) -> bool {
        match self.completion.advance() {
            CompletionCounter::Confirmed => {
                self.completion = CompletionCounter::Unset;
                true
            }
            next => {
                self.completion = next;
                false
            }
        }
    }

    pub fn reset_completion(&mut self) {
        self.completion = CompletionCounter::Unset;
    }

    /// Log a rewrite. Tags marked `only_once` are logged at info level the
    /// first time and at debug level afterwards.
    pub fn log_replacement(&mut self, tag: &str, original: &str, replacement: &str, only_once: bool) {
        if !only_once || !self.logged_once.contains(tag) {
            tracing::info!("Replacing {} with {}", original, replacement);
            self.logged_once.insert(tag.to_string());
            if only_once {
                tracing::info!("Further replacements of this kind will be logged at DEBUG level.");
            }
        } else {
            tracing::debug!("Replacing {} with {}", original, replacement);
        }
    }

    pub fn has_logged(&self, tag: &str) -> bool {
        self.logged_once.contains(tag)
    }
}
