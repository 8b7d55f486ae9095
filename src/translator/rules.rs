// Line rewrite rules for the ChiTu firmware dialect.
//
// Every rule looks at one line (already rewritten by the rules before it)
// and either declines (`Ok(None)`), rewrites it, or fails to parse a field
// it matched. Rules never touch the host; they describe what should happen
// through `HostAction`s.

use regex::{Captures, Regex};
use std::num::ParseIntError;
use std::sync::OnceLock;
use thiserror::Error;

use chitu_shared::{HostEvent, HostState, HostStatus};

use super::session::SessionState;
use crate::host::HostAction;

pub const BUSY_PROCESSING: &str = "echo:busy processing";
pub const DONE_PRINTING: &str = "Done printing file";
pub const NOT_SD_PRINTING: &str = "Not SD printing";
pub const START_PREFIX: &str = "ok start";

const FLOAT: &str = r"[-+]?[0-9]*\.?[0-9]+";
const INT: &str = r"\d+";

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("{rule}: cannot parse {field} from '{value}': {source}")]
    Parse {
        rule: &'static str,
        field: &'static str,
        value: String,
        #[source]
        source: ParseIntError,
    },
}

/// A rule's rewrite of one line.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleOutcome {
    pub line: String,
    pub actions: Vec<HostAction>,
    pub completed: bool,
}

impl RuleOutcome {
    fn rewrite(line: impl Into<String>) -> Self {
        Self {
            line: line.into(),
            actions: Vec::new(),
            completed: false,
        }
    }

    fn with_action(mut self, action: HostAction) -> Self {
        self.actions.push(action);
        self
    }

    fn completed(mut self) -> Self {
        self.completed = true;
        self
    }
}

struct Patterns {
    bed_temperature: Regex,
    pause_status: Regex,
    axis_x: Regex,
    axis_y: Regex,
    axis_z: Regex,
    sd_progress: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        bed_temperature: compile(&format!(
            r"(^|[^A-Za-z])[Bb]:\s*(?P<actual>{FLOAT})(\s*/?\s*(?P<target>{FLOAT}))"
        )),
        pause_status: compile(&format!(
            r"(^|[^A-Za-z])[Dd]:\s*(?P<current>{FLOAT})(\s*/?\s*(?P<total>{FLOAT}))(\s*/?\s*(?P<pause>{INT}))"
        )),
        axis_x: compile(&format!(r"(^|[^A-Za-z])[Xx]:(?P<value>{FLOAT})")),
        axis_y: compile(&format!(r"(^|[^A-Za-z])[Yy]:(?P<value>{FLOAT})")),
        axis_z: compile(&format!(r"(^|[^A-Za-z])[Zz]:(?P<value>{FLOAT})")),
        sd_progress: compile(r"(?P<current>[0-9]+)/(?P<total>[0-9]+)"),
    })
}

fn compile(pattern: &str) -> Regex {
    // Patterns are literals above; a failure here is a programming error.
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid rewrite pattern {pattern}: {e}"))
}

fn parse_int(rule: &'static str, field: &'static str, caps: &Captures<'_>) -> Result<i64, RuleError> {
    let value = caps.name(field).map(|m| m.as_str()).unwrap_or_default();
    value.parse::<i64>().map_err(|source| RuleError::Parse {
        rule,
        field,
        value: value.to_string(),
        source,
    })
}

/// Log a replacement and echo it to the host terminal.
fn replacement(session: &mut SessionState, tag: &str, original: &str, replacement: &str, only_once: bool) -> HostAction {
    session.log_replacement(tag, original, replacement, only_once);
    HostAction::terminal(format!("{} -> {}", original, replacement))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    BusyWait,
    Identifier,
    CompletionDebounce,
    StartHandshake,
    TemperatureStatus,
    PositionCleanup,
    NotPrinting,
}

/// Fixed application order.
pub const PIPELINE: [Rule; 7] = [
    Rule::BusyWait,
    Rule::Identifier,
    Rule::CompletionDebounce,
    Rule::StartHandshake,
    Rule::TemperatureStatus,
    Rule::PositionCleanup,
    Rule::NotPrinting,
];

impl Rule {
    pub fn name(self) -> &'static str {
        match self {
            Rule::BusyWait => "busy-wait",
            Rule::Identifier => "identifier",
            Rule::CompletionDebounce => "completion",
            Rule::StartHandshake => "start",
            Rule::TemperatureStatus => "m4000",
            Rule::PositionCleanup => "m114",
            Rule::NotPrinting => "not-printing",
        }
    }

    pub fn apply<H: HostStatus + ?Sized>(
        self,
        line: &str,
        session: &mut SessionState,
        host: &H,
    ) -> Result<Option<RuleOutcome>, RuleError> {
        match self {
            Rule::BusyWait => Ok(busy_wait(line, session)),
            Rule::Identifier => Ok(identifier(line, session)),
            Rule::CompletionDebounce => completion_debounce(line, session),
            Rule::StartHandshake => Ok(start_handshake(line, session)),
            Rule::TemperatureStatus => Ok(temperature_status(line, host)),
            Rule::PositionCleanup => Ok(position_cleanup(line)),
            Rule::NotPrinting => Ok(not_printing(line, session, host)),
        }
    }
}

fn busy_wait(line: &str, session: &mut SessionState) -> Option<RuleOutcome> {
    if !line.starts_with("wait") {
        return None;
    }
    let log = replacement(session, "wait", "wait", BUSY_PROCESSING, true);
    Some(RuleOutcome::rewrite(BUSY_PROCESSING).with_action(log))
}

fn identifier(line: &str, session: &mut SessionState) -> Option<RuleOutcome> {
    let version = &session.firmware_version;
    let rewritten = if line.contains("CBD make it") {
        line.replace(
            "CBD make it.",
            &format!("FIRMWARE_NAME:CBD made it PROTOCOL_VERSION:{} ", version),
        )
    } else if line.contains("ZWLF make it") {
        line.replace(
            "ZWLF make it",
            &format!("FIRMWARE_NAME:ZWLF made it PROTOCOL_VERSION:{} ", version),
        )
    } else {
        return None;
    };
    let log = replacement(session, "identifier", line, &rewritten, false);
    Some(RuleOutcome::rewrite(rewritten).with_action(log))
}

fn completion_debounce(line: &str, session: &mut SessionState) -> Result<Option<RuleOutcome>, RuleError> {
    if !line.contains("SD printing byte") {
        return Ok(None);
    }
    let Some(caps) = patterns().sd_progress.captures(line) else {
        return Ok(None);
    };
    let current = parse_int("completion", "current", &caps)?;
    let total = parse_int("completion", "total", &caps)?;
    tracing::info!("{}", line);
    if current != total || total == 0 {
        return Ok(None);
    }

    let layer_change = HostAction::FireEvent(HostEvent::LayerChange);
    if session.observe_full_progress() {
        tracing::info!("Done printing file");
        let log = replacement(session, "Done printing file", line, DONE_PRINTING, true);
        Ok(Some(
            RuleOutcome::rewrite(DONE_PRINTING)
                .with_action(layer_change)
                .with_action(log)
                .completed(),
        ))
    } else {
        tracing::info!("Full progress reported once, waiting for confirmation");
        Ok(Some(RuleOutcome::rewrite(line).with_action(layer_change)))
    }
}

fn start_handshake(line: &str, session: &mut SessionState) -> Option<RuleOutcome> {
    let version = line.strip_prefix("ok V")?;
    session.firmware_version = version.trim().to_string();
    let log = replacement(session, "start command", line, START_PREFIX, true);
    Some(RuleOutcome::rewrite(format!("{}{}", START_PREFIX, line)).with_action(log))
}

fn temperature_status<H: HostStatus + ?Sized>(line: &str, host: &H) -> Option<RuleOutcome> {
    let mut outcome = patterns().bed_temperature.captures(line).map(|caps| {
        let report = format!(" T:0 /0 B:{} /{}", &caps["actual"], &caps["target"]);
        RuleOutcome::rewrite(line.replace(&caps[0], &report))
    });

    match pause_report(line, host) {
        Ok(Some(paused)) => outcome = Some(paused),
        Ok(None) => {}
        Err(e) => tracing::info!("Error parsing M4000 response: {}", e),
    }

    outcome.map(|outcome| {
        let echo = HostAction::terminal(outcome.line.clone());
        outcome.with_action(echo)
    })
}

/// Pause branch of the M4000 status report: `D:<current>/<total>/<pause>`.
fn pause_report<H: HostStatus + ?Sized>(line: &str, host: &H) -> Result<Option<RuleOutcome>, RuleError> {
    if !host.is_pausing() {
        return Ok(None);
    }
    let p = patterns();
    let Some(caps) = p.pause_status.captures(line) else {
        return Ok(None);
    };
    let current = parse_int("m4000", "current", &caps)?;
    let _total = parse_int("m4000", "total", &caps)?;
    let pause = parse_int("m4000", "pause", &caps)?;
    if pause != 1 || current <= 0 {
        return Ok(None);
    }

    // All three axes or nothing.
    let (Some(x), Some(y), Some(z)) = (
        p.axis_x.captures(line),
        p.axis_y.captures(line),
        p.axis_z.captures(line),
    ) else {
        tracing::info!("Pause report without a complete X/Y/Z position, ignoring: {}", line);
        return Ok(None);
    };

    tracing::info!("printer paused from parse M4000");
    Ok(Some(
        RuleOutcome::rewrite(format!(
            "ok X:{} Y:{} Z:{} E:0.000000",
            &x["value"], &y["value"], &z["value"]
        ))
        .with_action(HostAction::RecordPauseData)
        .with_action(HostAction::SetState(HostState::Paused)),
    ))
}

fn position_cleanup(line: &str) -> Option<RuleOutcome> {
    if !line.contains("C: X:") {
        return None;
    }
    let rewritten = line.replace("C: ", "");
    let echo = HostAction::terminal(rewritten.clone());
    Some(RuleOutcome::rewrite(rewritten).with_action(echo))
}

fn not_printing<H: HostStatus + ?Sized>(line: &str, session: &mut SessionState, host: &H) -> Option<RuleOutcome> {
    if !line.contains("not printing now") {
        return None;
    }
    let mut outcome = RuleOutcome::rewrite(NOT_SD_PRINTING);
    if host.is_printing() || host.is_finishing() {
        session.reset_completion();
        let log = replacement(session, "Not SD printing", line, NOT_SD_PRINTING, true);
        outcome = outcome
            .with_action(log)
            .with_action(HostAction::UnselectFile)
            .with_action(HostAction::SetState(HostState::Operational))
            .with_action(HostAction::ClearCurrentFile);
        tracing::debug!("printer now operational");
    }
    Some(outcome)
}
