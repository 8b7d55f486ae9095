pub mod serial;

pub use serial::{BridgeCommand, BridgeError, LineSplitter, SerialBridge};
