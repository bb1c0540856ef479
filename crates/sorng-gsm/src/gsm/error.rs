//! Error types for the GSM modem crate.
//!
//! Protocol-level failures (`ERROR`, `+CME ERROR: 11`, …) are *not* errors
//! here: they travel as [`ResultCode`](crate::gsm::result_code::ResultCode)
//! values inside the command's response.  `GsmError` only covers the API
//! surface around the engine: the transport, configuration and waiting.

use thiserror::Error;

/// Top-level GSM modem error.
#[derive(Debug, Error)]
pub enum GsmError {
    /// Underlying OS-level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The serial port driver reported a failure.
    #[error("Serial port error: {0}")]
    SerialPort(String),

    /// An operation needed an open port.
    #[error("Port {0} is not open")]
    PortNotOpen(String),

    /// `open` was called on a port that is already open.
    #[error("Port {0} is already open")]
    PortAlreadyOpen(String),

    /// `connect` was called twice.
    #[error("Modem is already connected")]
    AlreadyConnected,

    /// The modem runtime is not running.
    #[error("Modem is not connected")]
    NotConnected,

    /// A caller-side wait expired.  The command itself stays queued.
    #[error("Timed out waiting for {0}")]
    Timeout(String),

    /// Rejected configuration value.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Shorthand result type.
pub type GsmResult<T> = Result<T, GsmError>;

impl From<serialport::Error> for GsmError {
    fn from(e: serialport::Error) -> Self {
        Self::SerialPort(e.to_string())
    }
}

impl From<serde_json::Error> for GsmError {
    fn from(e: serde_json::Error) -> Self {
        Self::InvalidConfig(e.to_string())
    }
}

impl From<GsmError> for String {
    fn from(e: GsmError) -> Self {
        e.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let e = GsmError::PortNotOpen("COM3".into());
        assert_eq!(e.to_string(), "Port COM3 is not open");
    }

    #[test]
    fn io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe gone");
        let e: GsmError = io.into();
        assert!(matches!(e, GsmError::Io(_)));
        assert!(e.to_string().contains("pipe gone"));
    }

    #[test]
    fn string_conversion() {
        let e = GsmError::Timeout("AT+CSQ".into());
        let s: String = e.into();
        assert!(s.contains("AT+CSQ"));
    }
}
