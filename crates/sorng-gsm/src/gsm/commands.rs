//! AT command builders.
//!
//! Every builder returns a [`Command`] with the right response shape
//! attached; callers add callbacks, chains or timeouts as needed.

use crate::gsm::command::{Command, ESC};
use crate::gsm::responses::ResponseKind;
use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Standard AT commands
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Well-known command strings.
pub struct AtCommands;

impl AtCommands {
    pub const ECHO_ON: &'static str = "ATE1";
    /// Verbose result codes.
    pub const VERBOSE_ON: &'static str = "ATV1";
    /// Report `+CME ERROR: <n>` instead of a bare `ERROR`.
    pub const CMEE_ON: &'static str = "AT+CMEE=1";
    pub const SIGNAL_QUALITY: &'static str = "AT+CSQ";
    pub const INDICATORS: &'static str = "AT+CIND?";
    pub const CLOCK: &'static str = "AT+CCLK?";
    /// Serial number (IMEI).
    pub const IMEI: &'static str = "AT+CGSN";
    /// Subscriber identity (IMSI).
    pub const IMSI: &'static str = "AT+CIMI";
    pub const PREFERRED_STORAGE: &'static str = "AT+CPMS?";

    /// `ESC` aborts pending text entry; the `AT` after it gets an `OK`.
    pub fn escape() -> String {
        format!("{}AT", ESC)
    }

    pub fn set_preferred_storage(read: &str, write: &str, receive: &str) -> String {
        format!("AT+CPMS=\"{}\",\"{}\",\"{}\"", read, write, receive)
    }

    pub fn list_messages(mode: ListMode) -> String {
        format!("AT+CMGL=\"{}\"", mode.keyword())
    }

    pub fn read_message(index: i32) -> String {
        format!("AT+CMGR={}", index)
    }

    pub fn delete_messages(index: i32, mode: DeleteMode) -> String {
        match mode {
            DeleteMode::OnlyOne => format!("AT+CMGD={}", index),
            other => format!("AT+CMGD={},{}", index, other.flag()),
        }
    }

    pub fn send_message(number: &str) -> String {
        format!("AT+CMGS=\"{}\"", number)
    }
}

/// Which stored messages `AT+CMGL` returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ListMode {
    ReceivedUnread,
    ReceivedRead,
    StoredUnsent,
    StoredSent,
    All,
}

impl ListMode {
    pub fn keyword(&self) -> &'static str {
        match self {
            Self::ReceivedUnread => "REC UNREAD",
            Self::ReceivedRead => "REC READ",
            Self::StoredUnsent => "STO UNSENT",
            Self::StoredSent => "STO SENT",
            Self::All => "ALL",
        }
    }
}

/// `AT+CMGD` delete flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeleteMode {
    /// Only the message at the given index.
    OnlyOne,
    AllRead,
    AllReadAndSent,
    AllReadSentAndUnsent,
    /// Every message in storage, regardless of index.
    AllMessages,
}

impl DeleteMode {
    pub fn flag(&self) -> u8 {
        match self {
            Self::OnlyOne => 0,
            Self::AllRead => 1,
            Self::AllReadAndSent => 2,
            Self::AllReadSentAndUnsent => 3,
            Self::AllMessages => 4,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Command builders
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn escape() -> Command {
    Command::new(AtCommands::escape())
}

/// Arbitrary command text, generic response.
pub fn custom(text: impl Into<String>) -> Command {
    Command::new(text)
}

pub fn echo_on() -> Command {
    Command::new(AtCommands::ECHO_ON)
}

pub fn cmee_on() -> Command {
    Command::new(AtCommands::CMEE_ON)
}

pub fn verbose_on() -> Command {
    Command::new(AtCommands::VERBOSE_ON)
}

pub fn signal_quality() -> Command {
    Command::new(AtCommands::SIGNAL_QUALITY).with_shape(ResponseKind::SignalQuality)
}

pub fn indicators() -> Command {
    Command::new(AtCommands::INDICATORS).with_shape(ResponseKind::Indicators)
}

pub fn clock() -> Command {
    Command::new(AtCommands::CLOCK).with_shape(ResponseKind::Clock)
}

pub fn imei() -> Command {
    Command::new(AtCommands::IMEI).with_shape(ResponseKind::Imei)
}

pub fn sim_identity() -> Command {
    Command::new(AtCommands::IMSI).with_shape(ResponseKind::SimIdentity)
}

/// Select storage areas for reading, writing and receiving messages.
/// The reply carries usage only; the area names are taken from the request.
pub fn set_preferred_storage(read: &str, write: &str, receive: &str) -> Command {
    Command::new(AtCommands::set_preferred_storage(read, write, receive))
        .with_shape(ResponseKind::MessageStorage)
}

pub fn preferred_storage() -> Command {
    Command::new(AtCommands::PREFERRED_STORAGE).with_shape(ResponseKind::MessageStorage)
}

pub fn list_messages(mode: ListMode) -> Command {
    Command::new(AtCommands::list_messages(mode)).with_shape(ResponseKind::ListMessages)
}

pub fn read_message(index: i32) -> Command {
    Command::new(AtCommands::read_message(index)).with_shape(ResponseKind::ReadMessage(index))
}

pub fn delete_messages(index: i32, mode: DeleteMode) -> Command {
    Command::new(AtCommands::delete_messages(index, mode))
}

/// Text-mode send: the destination first, then the body after the prompt.
pub fn send_message(number: &str, text: &str) -> Command {
    Command::multipart([AtCommands::send_message(number), text.to_string()])
}

/// The setup sequence queued when a modem connects.
pub fn bootstrap() -> Vec<Command> {
    vec![
        escape(),
        echo_on(),
        cmee_on(),
        verbose_on(),
        signal_quality(),
        clock(),
        set_preferred_storage("ME", "ME", "ME"),
        imei(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gsm::command::CTRL_Z;

    #[test]
    fn list_modes() {
        assert_eq!(
            list_messages(ListMode::ReceivedUnread).text(),
            "AT+CMGL=\"REC UNREAD\""
        );
        assert_eq!(list_messages(ListMode::All).text(), "AT+CMGL=\"ALL\"");
        assert_eq!(
            AtCommands::list_messages(ListMode::StoredSent),
            "AT+CMGL=\"STO SENT\""
        );
    }

    #[test]
    fn delete_mode_omitted_for_single() {
        assert_eq!(delete_messages(3, DeleteMode::OnlyOne).text(), "AT+CMGD=3");
        assert_eq!(delete_messages(1, DeleteMode::AllRead).text(), "AT+CMGD=1,1");
        assert_eq!(
            delete_messages(1, DeleteMode::AllMessages).text(),
            "AT+CMGD=1,4"
        );
    }

    #[test]
    fn read_message_text() {
        assert_eq!(read_message(7).text(), "AT+CMGR=7");
    }

    #[test]
    fn escape_starts_with_esc() {
        let c = escape();
        assert_eq!(c.wire_bytes(), b"\x1bAT\r");
    }

    #[test]
    fn send_message_is_multipart() {
        let c = send_message("+15551234567", "Hello");
        let mp = c.multipart_parts().unwrap();
        assert_eq!(mp.parts(), ["AT+CMGS=\"+15551234567\"", "Hello"]);
        assert_eq!(mp.final_terminator(), CTRL_Z);
        assert_eq!(c.text(), "AT+CMGS=\"+15551234567\"");
    }

    #[test]
    fn bootstrap_sequence() {
        let texts: Vec<String> = bootstrap().iter().map(|c| c.text().to_string()).collect();
        assert_eq!(
            texts,
            vec![
                "\x1bAT",
                "ATE1",
                "AT+CMEE=1",
                "ATV1",
                "AT+CSQ",
                "AT+CCLK?",
                "AT+CPMS=\"ME\",\"ME\",\"ME\"",
                "AT+CGSN",
            ]
        );
    }

    #[test]
    fn list_mode_serde() {
        let json = serde_json::to_string(&ListMode::ReceivedUnread).unwrap();
        assert_eq!(json, "\"receivedUnread\"");
        let back: DeleteMode = serde_json::from_str("\"allReadAndSent\"").unwrap();
        assert_eq!(back.flag(), 2);
    }
}
