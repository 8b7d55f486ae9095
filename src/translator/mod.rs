//! Firmware response translator.
//!
//! Rewrites every line received from a ChiTu board into the vocabulary a
//! conventional (Marlin-style) host state machine understands. One
//! translator is created per printer connection and owns that
//! connection's [`SessionState`].

pub mod rules;
pub mod session;

pub use rules::{PIPELINE, Rule, RuleError, RuleOutcome};
pub use session::{CompletionCounter, SessionState};

use chitu_shared::{HostState, HostStatus, PrinterHost};

use crate::host::{HostAction, apply_actions};

/// Result of translating one received line.
#[derive(Debug, Clone, PartialEq)]
pub struct Translation {
    pub line: String,
    /// The firmware confirmed the print finished.
    pub completed: bool,
    pub actions: Vec<HostAction>,
}

#[derive(Debug, Default)]
pub struct FirmwareTranslator {
    session: SessionState,
}

impl FirmwareTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn firmware_version(&self) -> &str {
        &self.session.firmware_version
    }

    /// Run `line` through the rule pipeline without touching the host.
    pub fn translate<H: HostStatus + ?Sized>(&mut self, line: &str, host: &H) -> Translation {
        let mut current = line.to_string();
        let mut completed = false;
        let mut actions = Vec::new();

        for rule in PIPELINE {
            match rule.apply(&current, &mut self.session, host) {
                Ok(Some(outcome)) => {
                    current = outcome.line;
                    completed |= outcome.completed;
                    actions.extend(outcome.actions);
                }
                Ok(None) => {}
                Err(e) => tracing::info!("Rule {} failed, passing line through: {}", rule.name(), e),
            }
        }

        // The completion report is not followed by a ready signal, so the
        // host is put back into OPERATIONAL here.
        if completed {
            actions.push(HostAction::SetState(HostState::Operational));
            actions.push(HostAction::ClearCurrentFile);
        }

        Translation {
            line: current,
            completed,
            actions,
        }
    }

    /// Translate `line` and apply the resulting actions to `host`.
    pub fn process<H: PrinterHost + ?Sized>(&mut self, line: &str, host: &mut H) -> Translation {
        let translation = self.translate(line, &*host);
        apply_actions(host, &translation.actions);
        translation
    }
}
