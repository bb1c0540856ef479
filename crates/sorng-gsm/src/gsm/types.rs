//! Shared types for the GSM modem crate.
//!
//! Covers serial port configuration, modem configuration, the dispatcher
//! state, the snapshot types carried by events, and the event enum itself.

use crate::gsm::error::{GsmError, GsmResult};
use crate::gsm::response::Response;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Port Configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Number of data bits per character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataBits {
    #[serde(rename = "7")]
    Seven,
    #[serde(rename = "8")]
    Eight,
}

impl Default for DataBits {
    fn default() -> Self {
        Self::Eight
    }
}

impl DataBits {
    pub fn value(&self) -> u8 {
        match self {
            Self::Seven => 7,
            Self::Eight => 8,
        }
    }
}

/// Parity checking mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Parity {
    None,
    Odd,
    Even,
}

impl Default for Parity {
    fn default() -> Self {
        Self::None
    }
}

impl Parity {
    pub fn label(&self) -> &'static str {
        match self {
            Self::None => "N",
            Self::Odd => "O",
            Self::Even => "E",
        }
    }
}

/// Number of stop bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopBits {
    #[serde(rename = "1")]
    One,
    #[serde(rename = "2")]
    Two,
}

impl Default for StopBits {
    fn default() -> Self {
        Self::One
    }
}

impl StopBits {
    pub fn label(&self) -> &'static str {
        match self {
            Self::One => "1",
            Self::Two => "2",
        }
    }
}

/// Flow control mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FlowControl {
    None,
    /// Software flow control (XON/XOFF).
    XonXoff,
    /// Hardware flow control (RTS/CTS).
    RtsCts,
}

impl Default for FlowControl {
    fn default() -> Self {
        Self::None
    }
}

/// RS-232 output line state as last driven by the host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlLines {
    /// Data Terminal Ready.
    pub dtr: bool,
    /// Request To Send.
    pub rts: bool,
}

/// Serial port configuration.
///
/// Defaults follow the convention of this modem family: 38400 baud, 8N1,
/// no flow control, RTS and DTR asserted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerialConfig {
    /// Port name (e.g. `COM1`, `/dev/ttyUSB0`).
    #[serde(default = "default_port_name")]
    pub port_name: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    #[serde(default)]
    pub data_bits: DataBits,

    #[serde(default)]
    pub parity: Parity,

    #[serde(default)]
    pub stop_bits: StopBits,

    #[serde(default)]
    pub flow_control: FlowControl,

    /// Read timeout in milliseconds.  Bounds how long a single read may
    /// block before the receive loop gets a chance to notice shutdown.
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,

    /// Assert DTR on open.
    #[serde(default = "default_true")]
    pub dtr_on_open: bool,

    /// Assert RTS on open.
    #[serde(default = "default_true")]
    pub rts_on_open: bool,
}

fn default_port_name() -> String {
    "COM1".to_string()
}
fn default_baud_rate() -> u32 {
    38400
}
fn default_read_timeout() -> u64 {
    100
}
fn default_true() -> bool {
    true
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: default_port_name(),
            baud_rate: default_baud_rate(),
            data_bits: DataBits::default(),
            parity: Parity::default(),
            stop_bits: StopBits::default(),
            flow_control: FlowControl::default(),
            read_timeout_ms: default_read_timeout(),
            dtr_on_open: true,
            rts_on_open: true,
        }
    }
}

impl SerialConfig {
    /// Shorthand notation (e.g. "38400-8N1").
    pub fn shorthand(&self) -> String {
        format!(
            "{}-{}{}{}",
            self.baud_rate,
            self.data_bits.value(),
            self.parity.label(),
            self.stop_bits.label()
        )
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Modem Configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Runtime configuration of a [`Modem`](crate::gsm::modem::Modem).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModemConfig {
    #[serde(default)]
    pub serial: SerialConfig,

    /// Pause between a command's terminal line and dispatch of the next one.
    #[serde(default = "default_settle_delay")]
    pub settle_delay_ms: u64,

    /// Queue the setup sequence (echo, CMEE, verbose, …) on connect.
    #[serde(default = "default_true")]
    pub bootstrap: bool,

    /// Run the periodic indicators / signal quality probe.
    #[serde(default = "default_true")]
    pub health_probe: bool,

    #[serde(default = "default_probe_initial_delay")]
    pub probe_initial_delay_ms: u64,

    #[serde(default = "default_probe_interval")]
    pub probe_interval_ms: u64,

    /// Consecutive unanswered probe cycles before `CommunicationLost`.
    #[serde(default = "default_missed_probe_limit")]
    pub missed_probe_limit: u32,

    /// Re-raise unchanged indicators after this many seconds.
    #[serde(default = "default_indicators_refresh")]
    pub indicators_refresh_secs: u64,

    /// Modem/host clock difference that triggers a warning.
    #[serde(default = "default_clock_drift_warn")]
    pub clock_drift_warn_secs: i64,

    /// Dispatch timeout applied to commands that carry none of their own.
    /// `None` keeps the queue waiting for a terminal line indefinitely.
    #[serde(default)]
    pub command_timeout_ms: Option<u64>,

    /// Buffered events per subscriber.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,

    /// Longest line the framer accumulates before dropping bytes.
    #[serde(default = "default_max_line_length")]
    pub max_line_length: usize,
}

fn default_settle_delay() -> u64 {
    100
}
fn default_probe_initial_delay() -> u64 {
    100
}
fn default_probe_interval() -> u64 {
    5000
}
fn default_missed_probe_limit() -> u32 {
    5
}
fn default_indicators_refresh() -> u64 {
    300
}
fn default_clock_drift_warn() -> i64 {
    10
}
fn default_event_capacity() -> usize {
    64
}
fn default_read_buffer_size() -> usize {
    256
}
fn default_max_line_length() -> usize {
    4096
}

impl Default for ModemConfig {
    fn default() -> Self {
        Self {
            serial: SerialConfig::default(),
            settle_delay_ms: default_settle_delay(),
            bootstrap: true,
            health_probe: true,
            probe_initial_delay_ms: default_probe_initial_delay(),
            probe_interval_ms: default_probe_interval(),
            missed_probe_limit: default_missed_probe_limit(),
            indicators_refresh_secs: default_indicators_refresh(),
            clock_drift_warn_secs: default_clock_drift_warn(),
            command_timeout_ms: None,
            event_capacity: default_event_capacity(),
            read_buffer_size: default_read_buffer_size(),
            max_line_length: default_max_line_length(),
        }
    }
}

impl ModemConfig {
    /// Parse and validate a JSON configuration document.
    pub fn from_json(text: &str) -> GsmResult<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> GsmResult<()> {
        if self.serial.port_name.trim().is_empty() {
            return Err(GsmError::InvalidConfig("port name is empty".into()));
        }
        if self.serial.baud_rate == 0 {
            return Err(GsmError::InvalidConfig("baud rate must be non-zero".into()));
        }
        if self.health_probe && self.probe_interval_ms == 0 {
            return Err(GsmError::InvalidConfig(
                "probe interval must be non-zero".into(),
            ));
        }
        if self.health_probe && self.missed_probe_limit == 0 {
            return Err(GsmError::InvalidConfig(
                "missed probe limit must be non-zero".into(),
            ));
        }
        if self.event_capacity == 0 || self.read_buffer_size == 0 || self.max_line_length == 0 {
            return Err(GsmError::InvalidConfig(
                "buffer sizes must be non-zero".into(),
            ));
        }
        if self.command_timeout_ms == Some(0) {
            return Err(GsmError::InvalidConfig(
                "command timeout must be non-zero when set".into(),
            ));
        }
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Dispatcher state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// State of the command dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ModemState {
    Unknown,
    /// Transport open, bootstrap sequence not yet acknowledged.
    Connected,
    Idle,
    /// A single-part command is in flight.
    Busy,
    /// A multipart command is waiting for the `>` prompt.
    MultipartCmdWait,
    /// The prompt arrived; the next part may be written.
    MultipartCmdReady,
}

impl Default for ModemState {
    fn default() -> Self {
        Self::Unknown
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Snapshots
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Modem status indicators as reported by `AT+CIND?`.
///
/// Integer fields use `-1` for "not reported".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Indicators {
    pub battery_charge: i32,
    pub signal_quality: i32,
    pub in_service: bool,
    pub message: bool,
    pub call: bool,
    pub roaming: bool,
    pub sms_full: i32,
}

impl Default for Indicators {
    fn default() -> Self {
        Self {
            battery_charge: -1,
            signal_quality: -1,
            in_service: false,
            message: false,
            call: false,
            roaming: false,
            sms_full: -1,
        }
    }
}

/// Received signal strength and bit error rate from `AT+CSQ`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalQuality {
    pub signal_strength: i32,
    pub bit_error_rate: i32,
}

impl SignalQuality {
    pub fn new(signal_strength: i32, bit_error_rate: i32) -> Self {
        Self {
            signal_strength,
            bit_error_rate,
        }
    }

    /// Convert the CSQ RSSI value to dBm.  `None` for 99 (not known) and
    /// out-of-range values.
    pub fn dbm(&self) -> Option<i32> {
        match self.signal_strength {
            0 => Some(-113),
            1 => Some(-111),
            v @ 2..=30 => Some(-109 + (v - 2) * 2),
            31 => Some(-51),
            _ => None,
        }
    }

    pub fn description(&self) -> &'static str {
        match self.signal_strength {
            0..=9 => "Marginal",
            10..=14 => "OK",
            15..=19 => "Good",
            20..=30 => "Excellent",
            31 => "Maximum",
            _ => "Unknown",
        }
    }
}

/// One message storage area from `AT+CPMS`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageStorageInfo {
    /// `SM` (SIM), `ME` (flash), `SR` (status reports) or `BM` (broadcast).
    pub location_code: String,
    pub count: i32,
    pub max_count: i32,
}

/// Status of a stored short message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SmsStatus {
    Unread,
    Read,
    Unsent,
    Sent,
    Unknown,
}

impl Default for SmsStatus {
    fn default() -> Self {
        Self::Unknown
    }
}

impl SmsStatus {
    /// Parse a text-mode status keyword (`"REC UNREAD"`, …).
    pub fn parse(keyword: &str) -> Self {
        match keyword.trim().to_uppercase().as_str() {
            "REC UNREAD" => Self::Unread,
            "REC READ" => Self::Read,
            "STO UNSENT" => Self::Unsent,
            "STO SENT" => Self::Sent,
            _ => Self::Unknown,
        }
    }

    pub fn keyword(&self) -> &'static str {
        match self {
            Self::Unread => "REC UNREAD",
            Self::Read => "REC READ",
            Self::Unsent => "STO UNSENT",
            Self::Sent => "STO SENT",
            Self::Unknown => "",
        }
    }
}

/// A short message read from modem storage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmsMessage {
    pub index: i32,
    pub status: SmsStatus,
    /// Originating or destination address.
    pub peer: String,
    pub timestamp: Option<NaiveDateTime>,
    pub text: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Events
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Events broadcast by a running modem.
#[derive(Debug, Clone)]
pub enum ModemEvent {
    /// The bootstrap handshake completed.
    Connected,
    /// The health probe went unanswered for too many cycles.
    CommunicationLost,
    IndicatorsChanged(Indicators),
    SignalQualityChanged(SignalQuality),
    /// A response that began with an echo nobody in the queue owned.
    ResponseReceived(Response),
    /// A line outside of any response.
    UnsolicitedNotification(String),
}
