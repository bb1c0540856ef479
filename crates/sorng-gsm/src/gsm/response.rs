//! Raw command responses and the typed view built from them.

use crate::gsm::responses::*;
use crate::gsm::result_code::ResultCode;

/// Everything the modem sent back for one command: the lines between the
/// echo and the terminal result line, plus that result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModemResponse {
    command_text: String,
    result: ResultCode,
    lines: Vec<String>,
}

impl ModemResponse {
    pub fn new(command_text: impl Into<String>) -> Self {
        Self {
            command_text: command_text.into(),
            result: ResultCode::Unknown,
            lines: Vec::new(),
        }
    }

    /// Feed one received line.  A terminal result line fixes the result and
    /// returns `true`; anything else is kept verbatim.  Once the result is
    /// fixed further lines are ignored.
    pub fn accept(&mut self, line: &str) -> bool {
        if self.result.is_terminal() {
            return true;
        }
        let code = ResultCode::try_parse(line);
        if code.is_terminal() {
            self.result = code;
            true
        } else {
            self.lines.push(line.to_string());
            false
        }
    }

    pub fn command_text(&self) -> &str {
        &self.command_text
    }

    pub fn result(&self) -> &ResultCode {
        &self.result
    }

    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn line(&self, index: usize) -> Option<&str> {
        self.lines.get(index).map(String::as_str)
    }

    pub fn line_count(&self) -> usize {
        self.lines.len()
    }
}

/// A finalized response, shaped according to the command that produced it.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Generic(ModemResponse),
    SignalQuality(SignalQualityResponse),
    Indicators(IndicatorsResponse),
    MessageStorage(MessageStorageResponse),
    ReadMessage(ReadMessageResponse),
    ListMessages(ListMessagesResponse),
    Imei(IdentityResponse),
    SimIdentity(IdentityResponse),
    Clock(ClockResponse),
}

impl Response {
    /// The underlying raw response.
    pub fn base(&self) -> &ModemResponse {
        match self {
            Self::Generic(r) => r,
            Self::SignalQuality(r) => r.base(),
            Self::Indicators(r) => r.base(),
            Self::MessageStorage(r) => r.base(),
            Self::ReadMessage(r) => r.base(),
            Self::ListMessages(r) => r.base(),
            Self::Imei(r) | Self::SimIdentity(r) => r.base(),
            Self::Clock(r) => r.base(),
        }
    }

    pub fn result(&self) -> &ResultCode {
        self.base().result()
    }

    pub fn is_ok(&self) -> bool {
        self.base().is_ok()
    }

    pub fn command_text(&self) -> &str {
        self.base().command_text()
    }
}

/// Turns a finalized [`ModemResponse`] into the [`Response`] variant its
/// command promises.  Selected once per command at construction.
pub trait ResponseShape: Send + Sync {
    fn shape(&self, base: ModemResponse) -> Response;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_collects_until_terminal() {
        let mut r = ModemResponse::new("AT+CSQ");
        assert!(!r.accept("+CSQ: 18,99"));
        assert!(!r.accept("trailing data"));
        assert!(r.accept("OK"));
        assert_eq!(r.result(), &ResultCode::Ok);
        assert_eq!(r.line_count(), 2);
        assert_eq!(r.line(0), Some("+CSQ: 18,99"));
        assert_eq!(r.line(5), None);
        assert_eq!(r.command_text(), "AT+CSQ");
    }

    #[test]
    fn result_is_frozen_once_resolved() {
        let mut r = ModemResponse::new("AT");
        r.accept("ERROR");
        assert!(r.accept("OK"));
        assert_eq!(r.result(), &ResultCode::Error);
        assert!(r.lines().is_empty());
    }

    #[test]
    fn generic_shape_keeps_base() {
        let mut r = ModemResponse::new("ATI");
        r.accept("Quectel");
        r.accept("OK");
        let shaped = ResponseKind::Generic.shape(r.clone());
        assert_eq!(shaped.base(), &r);
        assert!(shaped.is_ok());
        assert_eq!(shaped.command_text(), "ATI");
    }
}
