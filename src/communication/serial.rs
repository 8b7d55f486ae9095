// Serial link to a ChiTu board: every received line goes through the translator.

use serial2_tokio::SerialPort;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

use chitu_shared::config::SerialConfig;
use chitu_shared::{HostState, PrinterHost};

use crate::translator::FirmwareTranslator;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Serial port error: {0}")]
    Serial(#[from] std::io::Error),
    #[error("Not connected to printer")]
    NotConnected,
    #[error("Serial connection closed")]
    Closed,
}

/// Splits a byte stream into trimmed, non-empty lines.
#[derive(Debug, Default)]
pub struct LineSplitter {
    buffer: Vec<u8>,
}

impl LineSplitter {
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(end) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=end).collect();
            let line = String::from_utf8_lossy(&raw).trim().to_string();
            if !line.is_empty() {
                lines.push(line);
            }
        }
        lines
    }

    /// Bytes received after the last newline.
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }
}

/// Starts printing a file from the board's storage.
pub const START_PRINT_COMMAND: &str = "M6030";
pub const RESUME_COMMAND: &str = "M24";

/// Operator input to a running bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeCommand {
    Print(String),
    Pause,
    Resume,
    /// Sent to the board as typed.
    Raw(String),
}

impl BridgeCommand {
    /// `print <file>`, `pause` and `resume` drive the host; anything else is raw G-code.
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        if input.is_empty() {
            return None;
        }
        let (word, rest) = match input.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (input, ""),
        };
        Some(match (word.to_ascii_lowercase().as_str(), rest.is_empty()) {
            ("print", false) => BridgeCommand::Print(rest.to_string()),
            ("pause", true) => BridgeCommand::Pause,
            ("resume", true) => BridgeCommand::Resume,
            _ => BridgeCommand::Raw(input.to_string()),
        })
    }

    /// State the host enters once the command is on the wire.
    pub fn host_state(&self) -> Option<HostState> {
        match self {
            BridgeCommand::Print(_) | BridgeCommand::Resume => Some(HostState::Printing),
            BridgeCommand::Pause => Some(HostState::Pausing),
            BridgeCommand::Raw(_) => None,
        }
    }
}

pub struct SerialBridge {
    port: Option<Arc<SerialPort>>,
    config: SerialConfig,
}

impl SerialBridge {
    pub fn new(config: SerialConfig) -> Self {
        Self { port: None, config }
    }

    /// Open the configured port, falling back to `additional_ports` in order.
    pub fn connect(&mut self) -> Result<(), BridgeError> {
        let candidates = std::iter::once(&self.config.port).chain(self.config.additional_ports.iter());
        let mut last_error = None;
        for port in candidates {
            tracing::info!("Connecting to printer: {} at {} baud", port, self.config.baud);
            match SerialPort::open(port, self.config.baud) {
                Ok(serial) => {
                    self.port = Some(Arc::new(serial));
                    tracing::info!("Connected to printer on {}", port);
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!("Failed to open {}: {}", port, e);
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.map(BridgeError::Serial).unwrap_or(BridgeError::NotConnected))
    }

    fn port(&self) -> Result<&Arc<SerialPort>, BridgeError> {
        self.port.as_ref().ok_or(BridgeError::NotConnected)
    }

    pub async fn send_command(&self, command: &str) -> Result<(), BridgeError> {
        let port = self.port()?;
        tracing::debug!("Printer <- {}", command);
        let line = format!("{}\n", command);
        let mut written = 0;
        while written < line.len() {
            let n = port.write(&line.as_bytes()[written..]).await?;
            if n == 0 {
                return Err(BridgeError::Closed);
            }
            written += n;
        }
        Ok(())
    }

    /// Ask the board to identify itself; the answer goes through the translator like any line.
    pub async fn hello(&self) -> Result<(), BridgeError> {
        self.send_command(&self.config.hello_command).await
    }

    pub fn firmware_command(&self, command: &BridgeCommand) -> String {
        match command {
            BridgeCommand::Print(file) => format!("{} '{}'", START_PRINT_COMMAND, file),
            BridgeCommand::Pause => self.config.pause_command.clone(),
            BridgeCommand::Resume => RESUME_COMMAND.to_string(),
            BridgeCommand::Raw(line) => line.clone(),
        }
    }

    /// Send `command` to the board, then move `host` to the state it implies.
    pub async fn execute<H: PrinterHost + Send + ?Sized>(
        &self,
        command: &BridgeCommand,
        host: &mut H,
    ) -> Result<(), BridgeError> {
        self.send_command(&self.firmware_command(command)).await?;
        if let Some(state) = command.host_state() {
            host.change_state(state);
        }
        Ok(())
    }

    /// Translate received lines and execute `commands` until the port closes
    /// or `lines` has no receiver.
    pub async fn run<H: PrinterHost + Send + ?Sized>(
        &self,
        translator: &mut FirmwareTranslator,
        host: &mut H,
        mut commands: mpsc::UnboundedReceiver<BridgeCommand>,
        lines: mpsc::UnboundedSender<String>,
    ) -> Result<(), BridgeError> {
        let port = self.port()?.clone();
        let mut splitter = LineSplitter::default();
        let mut buf = vec![0u8; 1024];
        let mut accepting = true;

        loop {
            tokio::select! {
                read = port.read(&mut buf) => {
                    let n = read?;
                    if n == 0 {
                        tracing::info!("Printer closed the serial connection");
                        return Err(BridgeError::Closed);
                    }
                    for line in splitter.push(&buf[..n]) {
                        let translation = translator.process(&line, host);
                        if translation.line != line {
                            tracing::debug!("Printer -> {} (as {})", line, translation.line);
                        } else {
                            tracing::debug!("Printer -> {}", line);
                        }
                        if lines.send(translation.line).is_err() {
                            return Ok(());
                        }
                    }
                }
                command = commands.recv(), if accepting => match command {
                    Some(command) => self.execute(&command, host).await?,
                    None => {
                        tracing::debug!("No more operator commands");
                        accepting = false;
                    }
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::SessionHost;

    #[test]
    fn test_lines_split_across_reads() {
        let mut splitter = LineSplitter::default();
        assert!(splitter.push(b"ok V4.").is_empty());
        assert_eq!(splitter.push(b"20\r\nwait\n\n"), vec!["ok V4.20", "wait"]);
        assert!(splitter.pending().is_empty());
    }

    #[tokio::test]
    async fn test_send_without_port() {
        let bridge = SerialBridge::new(SerialConfig::default());
        assert!(matches!(bridge.send_command("M4002").await, Err(BridgeError::NotConnected)));
    }

    #[test]
    fn test_parse_operator_commands() {
        assert_eq!(BridgeCommand::parse("  "), None);
        assert_eq!(BridgeCommand::parse("pause"), Some(BridgeCommand::Pause));
        assert_eq!(BridgeCommand::parse("Resume"), Some(BridgeCommand::Resume));
        assert_eq!(
            BridgeCommand::parse("print cube v2.ctb"),
            Some(BridgeCommand::Print("cube v2.ctb".to_string()))
        );
        assert_eq!(BridgeCommand::parse("print"), Some(BridgeCommand::Raw("print".to_string())));
        assert_eq!(BridgeCommand::parse(" M114 "), Some(BridgeCommand::Raw("M114".to_string())));
    }

    #[test]
    fn test_pause_uses_configured_command() {
        let mut config = SerialConfig::default();
        config.pause_command = "M25 P1".to_string();
        let bridge = SerialBridge::new(config);
        assert_eq!(bridge.firmware_command(&BridgeCommand::Pause), "M25 P1");
        assert_eq!(BridgeCommand::Pause.host_state(), Some(HostState::Pausing));
        assert_eq!(
            bridge.firmware_command(&BridgeCommand::Print("cube.ctb".to_string())),
            "M6030 'cube.ctb'"
        );
        assert_eq!(BridgeCommand::Resume.host_state(), Some(HostState::Printing));
        assert_eq!(BridgeCommand::Raw("M114".to_string()).host_state(), None);
    }

    #[tokio::test]
    async fn test_failed_send_leaves_host_state() {
        let bridge = SerialBridge::new(SerialConfig::default());
        let mut host = SessionHost::new();
        let result = bridge.execute(&BridgeCommand::Pause, &mut host).await;
        assert!(matches!(result, Err(BridgeError::NotConnected)));
        assert_eq!(host.state(), HostState::Operational);
    }
}
