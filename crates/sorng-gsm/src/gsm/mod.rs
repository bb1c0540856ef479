//! GSM crate: sub-modules.

pub mod error;
pub mod types;
pub mod transport;
pub mod framer;
pub mod result_code;
pub mod fields;
pub mod response;
pub mod responses;
pub mod command;
pub mod queue;
pub mod commands;
pub mod modem;

// Re-export top-level items for convenience.
pub use command::{Command, CommandKind};
pub use commands::{AtCommands, DeleteMode, ListMode};
pub use error::{GsmError, GsmResult};
pub use modem::Modem;
pub use response::{ModemResponse, Response, ResponseShape};
pub use responses::ResponseKind;
pub use result_code::{FailureCode, ResultCode};
pub use transport::{SerialPortTransport, SerialTransport, SimulatedTransport};
pub use types::*;
