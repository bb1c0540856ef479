//! Typed responses.
//!
//! Each type wraps the finalized [`ModemResponse`] it was built from and
//! exposes the decoded payload.  Payloads are only decoded when the command
//! ended with `OK`; on any other result they are `None`/empty.

use crate::gsm::fields::{after_colon, has_prefix, unquote, Fields};
use crate::gsm::response::{ModemResponse, Response, ResponseShape};
use crate::gsm::types::*;
use chrono::{NaiveDate, NaiveDateTime};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref CMGR_RE: Regex =
        Regex::new(r"(?P<status>[^,]*),(?P<peer>[^,]*),(?P<alpha>[^,]*),(?P<date>.*)")
            .expect("static regex");
    static ref CMGL_RE: Regex = Regex::new(
        r"^\s*(?P<index>\d+)\s*,(?P<status>[^,]*),(?P<peer>[^,]*),(?P<alpha>[^,]*),(?P<date>.*)$"
    )
    .expect("static regex");
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Shape selection
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Which typed response a command produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    Generic,
    SignalQuality,
    Indicators,
    MessageStorage,
    /// Carries the storage index that was read.
    ReadMessage(i32),
    ListMessages,
    Imei,
    SimIdentity,
    Clock,
}

impl ResponseShape for ResponseKind {
    fn shape(&self, base: ModemResponse) -> Response {
        match *self {
            Self::Generic => Response::Generic(base),
            Self::SignalQuality => Response::SignalQuality(SignalQualityResponse::from_base(base)),
            Self::Indicators => Response::Indicators(IndicatorsResponse::from_base(base)),
            Self::MessageStorage => {
                Response::MessageStorage(MessageStorageResponse::from_base(base))
            }
            Self::ReadMessage(index) => {
                Response::ReadMessage(ReadMessageResponse::from_base(index, base))
            }
            Self::ListMessages => Response::ListMessages(ListMessagesResponse::from_base(base)),
            Self::Imei => Response::Imei(IdentityResponse::from_base(base)),
            Self::SimIdentity => Response::SimIdentity(IdentityResponse::from_base(base)),
            Self::Clock => Response::Clock(ClockResponse::from_base(base)),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  +CSQ / +CIND
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq)]
pub struct SignalQualityResponse {
    base: ModemResponse,
    signal_quality: Option<SignalQuality>,
}

impl SignalQualityResponse {
    pub fn from_base(base: ModemResponse) -> Self {
        let signal_quality = base
            .is_ok()
            .then(|| Fields::find(base.lines(), "+CSQ"))
            .flatten()
            .map(|f| SignalQuality::new(f.int(0), f.int(1)));
        Self {
            base,
            signal_quality,
        }
    }

    pub fn base(&self) -> &ModemResponse {
        &self.base
    }

    pub fn signal_quality(&self) -> Option<SignalQuality> {
        self.signal_quality
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorsResponse {
    base: ModemResponse,
    indicators: Option<Indicators>,
}

impl IndicatorsResponse {
    pub fn from_base(base: ModemResponse) -> Self {
        let indicators = base
            .is_ok()
            .then(|| Fields::find(base.lines(), "+CIND"))
            .flatten()
            .map(|f| Indicators {
                battery_charge: f.int(0),
                signal_quality: f.int(1),
                in_service: f.flag(2),
                message: f.flag(3),
                call: f.flag(4),
                roaming: f.flag(5),
                sms_full: f.int(6),
            });
        Self { base, indicators }
    }

    pub fn base(&self) -> &ModemResponse {
        &self.base
    }

    pub fn indicators(&self) -> Option<Indicators> {
        self.indicators
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  +CPMS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq)]
pub struct MessageStorageResponse {
    base: ModemResponse,
    operative: Option<MessageStorageInfo>,
    composing: Option<MessageStorageInfo>,
    receiving: Option<MessageStorageInfo>,
}

impl MessageStorageResponse {
    pub fn from_base(base: ModemResponse) -> Self {
        let fields = base
            .is_ok()
            .then(|| Fields::find(base.lines(), "+CPMS"))
            .flatten();
        // The query names each area before its usage. The reply to a
        // selection carries usage pairs only; the names are in the request.
        let areas: Vec<MessageStorageInfo> = match &fields {
            Some(f) if f.int(0) < 0 => (0..3)
                .filter(|i| f.len() > i * 3)
                .map(|i| MessageStorageInfo {
                    location_code: f.string(i * 3).to_uppercase(),
                    count: f.int(i * 3 + 1),
                    max_count: f.int(i * 3 + 2),
                })
                .collect(),
            Some(f) => {
                let names = requested_storages(base.command_text());
                (0..3)
                    .filter(|i| f.len() > i * 2)
                    .map(|i| MessageStorageInfo {
                        location_code: names.get(i).cloned().unwrap_or_default(),
                        count: f.int(i * 2),
                        max_count: f.int(i * 2 + 1),
                    })
                    .collect()
            }
            None => Vec::new(),
        };
        let mut areas = areas.into_iter();
        let (operative, composing, receiving) = (areas.next(), areas.next(), areas.next());
        Self {
            base,
            operative,
            composing,
            receiving,
        }
    }

    pub fn base(&self) -> &ModemResponse {
        &self.base
    }

    /// Storage used for reading and deleting.
    pub fn operative(&self) -> Option<&MessageStorageInfo> {
        self.operative.as_ref()
    }

    /// Storage used for writing and sending.
    pub fn composing(&self) -> Option<&MessageStorageInfo> {
        self.composing.as_ref()
    }

    /// Storage new messages are delivered to.
    pub fn receiving(&self) -> Option<&MessageStorageInfo> {
        self.receiving.as_ref()
    }
}

/// Storage names from `AT+CPMS="ME","SM",...`; empty for the query form.
fn requested_storages(command_text: &str) -> Vec<String> {
    command_text
        .split_once('=')
        .map(|(_, args)| {
            args.split(',')
                .map(|a| unquote(a).to_uppercase())
                .collect()
        })
        .unwrap_or_default()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  +CMGR / +CMGL
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq)]
pub struct ReadMessageResponse {
    base: ModemResponse,
    message: Option<SmsMessage>,
}

impl ReadMessageResponse {
    pub fn from_base(index: i32, base: ModemResponse) -> Self {
        let mut message: Option<SmsMessage> = None;
        if base.is_ok() {
            for line in base.lines() {
                if has_prefix(line.trim_start(), "+CMGR") {
                    let header = after_colon(line.trim_start(), "+CMGR");
                    message = Some(CMGR_RE.captures(header).map_or_else(
                        || SmsMessage {
                            index,
                            ..SmsMessage::default()
                        },
                        |caps| SmsMessage {
                            index,
                            status: SmsStatus::parse(unquote(&caps["status"])),
                            peer: unquote(&caps["peer"]).to_string(),
                            timestamp: parse_timestamp(&caps["date"]),
                            text: String::new(),
                        },
                    ));
                } else if let Some(msg) = message.as_mut() {
                    msg.text.push_str(line);
                }
            }
        }
        Self { base, message }
    }

    pub fn base(&self) -> &ModemResponse {
        &self.base
    }

    pub fn message(&self) -> Option<&SmsMessage> {
        self.message.as_ref()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListMessagesResponse {
    base: ModemResponse,
    messages: Vec<SmsMessage>,
}

impl ListMessagesResponse {
    pub fn from_base(base: ModemResponse) -> Self {
        let mut messages: Vec<SmsMessage> = Vec::new();
        if base.is_ok() {
            for line in base.lines() {
                let trimmed = line.trim_start();
                if has_prefix(trimmed, "+CMGL") {
                    let header = after_colon(trimmed, "+CMGL");
                    match CMGL_RE.captures(header) {
                        Some(caps) => messages.push(SmsMessage {
                            index: caps["index"].parse().unwrap_or(-1),
                            status: SmsStatus::parse(unquote(&caps["status"])),
                            peer: unquote(&caps["peer"]).to_string(),
                            timestamp: parse_timestamp(&caps["date"]),
                            text: String::new(),
                        }),
                        None => log::debug!("unrecognised +CMGL header: {}", line),
                    }
                } else if let Some(msg) = messages.last_mut() {
                    msg.text.push_str(line);
                }
            }
        }
        Self { base, messages }
    }

    pub fn base(&self) -> &ModemResponse {
        &self.base
    }

    pub fn messages(&self) -> &[SmsMessage] {
        &self.messages
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Identity (+CGSN, +CIMI) and clock (+CCLK)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Single-value identity reply such as an IMEI or IMSI.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentityResponse {
    base: ModemResponse,
    value: Option<String>,
}

impl IdentityResponse {
    pub fn from_base(base: ModemResponse) -> Self {
        let value = base
            .is_ok()
            .then(|| {
                base.lines()
                    .iter()
                    .map(|l| l.trim())
                    .find(|l| !l.is_empty())
                    .map(|l| {
                        // Some firmware prefixes the value: `+CGSN: 3520…`
                        let v = match l.split_once(':') {
                            Some((tag, v)) if tag.starts_with('+') => v,
                            _ => l,
                        };
                        unquote(v).to_string()
                    })
            })
            .flatten()
            .filter(|v| !v.is_empty());
        Self { base, value }
    }

    pub fn base(&self) -> &ModemResponse {
        &self.base
    }

    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClockResponse {
    base: ModemResponse,
    time: Option<NaiveDateTime>,
}

impl ClockResponse {
    pub fn from_base(base: ModemResponse) -> Self {
        let time = base
            .is_ok()
            .then(|| {
                base.lines()
                    .iter()
                    .map(|l| l.trim_start())
                    .find(|l| has_prefix(l, "+CCLK"))
                    .and_then(|l| parse_timestamp(after_colon(l, "+CCLK")))
            })
            .flatten();
        Self { base, time }
    }

    pub fn base(&self) -> &ModemResponse {
        &self.base
    }

    /// Modem-local time; the timezone suffix is not applied.
    pub fn time(&self) -> Option<NaiveDateTime> {
        self.time
    }
}

/// Parse a `yy/MM/dd,hh:mm:ss[±zz]` timestamp, optionally quoted.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let text = unquote(raw);
    let (date, time) = text.split_once(',')?;

    let mut d = date.trim().split('/').map(str::trim);
    let year = i32::try_from(d.next()?.parse::<u32>().ok()?)
        .ok()?
        .checked_add(2000)?;
    let month = d.next()?.parse::<u32>().ok()?;
    let day = d.next()?.parse::<u32>().ok()?;

    let time = time
        .trim()
        .split(|c| c == '+' || c == '-')
        .next()
        .unwrap_or("");
    let mut t = time.split(':').map(|p| p.trim().parse::<u32>());
    let hour = t.next()?.ok()?;
    let minute = t.next().and_then(Result::ok).unwrap_or(0);
    let second = t.next().and_then(Result::ok).unwrap_or(0);

    NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, second)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gsm::result_code::ResultCode;

    fn response(command: &str, lines: &[&str], terminal: &str) -> ModemResponse {
        let mut r = ModemResponse::new(command);
        for l in lines {
            r.accept(l);
        }
        r.accept(terminal);
        r
    }

    fn ts(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap()
    }

    #[test]
    fn signal_quality_parses() {
        let r = SignalQualityResponse::from_base(response("AT+CSQ", &["+CSQ: 18,99"], "OK"));
        assert_eq!(r.signal_quality(), Some(SignalQuality::new(18, 99)));
        assert_eq!(r.base().line_count(), 1);
    }

    #[test]
    fn signal_quality_empty_on_error() {
        let r = SignalQualityResponse::from_base(response("AT+CSQ", &["+CSQ: 18,99"], "ERROR"));
        assert_eq!(r.signal_quality(), None);
        assert_eq!(r.base().result(), &ResultCode::Error);
    }

    #[test]
    fn indicators_parse_flags() {
        let r = IndicatorsResponse::from_base(response(
            "AT+CIND?",
            &["+CIND: 5,3,1,0,1,0,0"],
            "OK",
        ));
        let ind = r.indicators().unwrap();
        assert_eq!(ind.battery_charge, 5);
        assert_eq!(ind.signal_quality, 3);
        assert!(ind.in_service);
        assert!(!ind.message);
        assert!(ind.call);
        assert!(!ind.roaming);
        assert_eq!(ind.sms_full, 0);
    }

    #[test]
    fn indicators_short_line_defaults() {
        let r = IndicatorsResponse::from_base(response("AT+CIND?", &["+CIND: 5"], "OK"));
        let ind = r.indicators().unwrap();
        assert_eq!(ind.battery_charge, 5);
        assert_eq!(ind.signal_quality, -1);
        assert_eq!(ind.sms_full, -1);
        assert!(!ind.in_service);
    }

    #[test]
    fn message_storage_parses_three_areas() {
        let r = MessageStorageResponse::from_base(response(
            "AT+CPMS?",
            &["+CPMS: \"me\",3,99,\"ME\",3,99,\"sm\",0,30"],
            "OK",
        ));
        let op = r.operative().unwrap();
        assert_eq!(op.location_code, "ME");
        assert_eq!(op.count, 3);
        assert_eq!(op.max_count, 99);
        assert_eq!(r.composing().unwrap().location_code, "ME");
        let rx = r.receiving().unwrap();
        assert_eq!(rx.location_code, "SM");
        assert_eq!(rx.max_count, 30);
    }

    #[test]
    fn storage_selection_reply_takes_names_from_request() {
        let r = MessageStorageResponse::from_base(response(
            "AT+CPMS=\"ME\",\"ME\",\"SM\"",
            &["+CPMS: 3,99,4,99,0,30"],
            "OK",
        ));
        let op = r.operative().unwrap();
        assert_eq!(op.location_code, "ME");
        assert_eq!(op.count, 3);
        assert_eq!(op.max_count, 99);
        assert_eq!(r.composing().unwrap().count, 4);
        let rx = r.receiving().unwrap();
        assert_eq!(rx.location_code, "SM");
        assert_eq!(rx.count, 0);
        assert_eq!(rx.max_count, 30);
    }

    #[test]
    fn storage_selection_with_one_name() {
        let r = MessageStorageResponse::from_base(response(
            "AT+CPMS=\"SM\"",
            &["+CPMS: 1,30,1,30,1,30"],
            "OK",
        ));
        assert_eq!(r.operative().unwrap().location_code, "SM");
        assert_eq!(r.composing().unwrap().location_code, "");
        assert_eq!(r.receiving().unwrap().max_count, 30);
    }

    #[test]
    fn message_storage_missing_line() {
        let r = MessageStorageResponse::from_base(response("AT+CPMS?", &[], "OK"));
        assert!(r.operative().is_none());
    }

    #[test]
    fn read_message_parses_header_and_body() {
        let r = ReadMessageResponse::from_base(
            4,
            response(
                "AT+CMGR=4",
                &[
                    "+CMGR: \"REC UNREAD\",\"+15551234567\",,\"13/05/01,12:30:45+08\"",
                    "Hello ",
                    "world",
                ],
                "OK",
            ),
        );
        let msg = r.message().unwrap();
        assert_eq!(msg.index, 4);
        assert_eq!(msg.status, SmsStatus::Unread);
        assert_eq!(msg.peer, "+15551234567");
        assert_eq!(msg.timestamp, Some(ts(2013, 5, 1, 12, 30, 45)));
        assert_eq!(msg.text, "Hello world");
        assert_eq!(r.base().line_count(), 3);
    }

    #[test]
    fn read_message_none_on_cms_error() {
        let r = ReadMessageResponse::from_base(
            9,
            response("AT+CMGR=9", &[], "+CMS ERROR: 321"),
        );
        assert!(r.message().is_none());
        assert_eq!(r.base().result().description(), "Unknown Error 321");
    }

    #[test]
    fn list_messages_splits_entries() {
        let r = ListMessagesResponse::from_base(response(
            "AT+CMGL=\"ALL\"",
            &[
                "+CMGL: 1,\"REC READ\",\"+111\",,\"20/01/02,03:04:05+00\"",
                "first",
                "+CMGL: 2,\"STO SENT\",\"+222\",,\"20/01/03,04:05:06-04\"",
                "second",
                " part",
            ],
            "OK",
        ));
        let msgs = r.messages();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].index, 1);
        assert_eq!(msgs[0].status, SmsStatus::Read);
        assert_eq!(msgs[0].text, "first");
        assert_eq!(msgs[1].index, 2);
        assert_eq!(msgs[1].status, SmsStatus::Sent);
        assert_eq!(msgs[1].peer, "+222");
        assert_eq!(msgs[1].timestamp, Some(ts(2020, 1, 3, 4, 5, 6)));
        assert_eq!(msgs[1].text, "second part");
    }

    #[test]
    fn identity_takes_first_data_line() {
        let r = IdentityResponse::from_base(response("AT+CGSN", &["", "352099001761481"], "OK"));
        assert_eq!(r.value(), Some("352099001761481"));

        let r = IdentityResponse::from_base(response("AT+CGSN", &["+CGSN: \"490154203237518\""], "OK"));
        assert_eq!(r.value(), Some("490154203237518"));

        let r = IdentityResponse::from_base(response("AT+CIMI", &[], "+CME ERROR: 10"));
        assert_eq!(r.value(), None);
    }

    #[test]
    fn clock_parses_and_ignores_zone() {
        let r = ClockResponse::from_base(response(
            "AT+CCLK?",
            &["+CCLK: \"24/02/29,23:59:58+32\""],
            "OK",
        ));
        assert_eq!(r.time(), Some(ts(2024, 2, 29, 23, 59, 58)));
    }

    #[test]
    fn timestamp_rejects_garbage() {
        assert_eq!(parse_timestamp("\"not a date\""), None);
        assert_eq!(parse_timestamp("13/13/40,10:00:00"), None);
    }

    #[test]
    fn oversized_year_is_rejected() {
        assert_eq!(parse_timestamp("\"2147483000/01/01,00:00:00+00\""), None);
        assert_eq!(parse_timestamp("4294967295/01/01,00:00:00"), None);
        let r = ClockResponse::from_base(response(
            "AT+CCLK?",
            &["+CCLK: \"2147483000/01/01,00:00:00+00\""],
            "OK",
        ));
        assert_eq!(r.time(), None);
        assert!(r.base().is_ok());
    }

    #[test]
    fn kind_selects_variant() {
        let base = response("AT+CSQ", &["+CSQ: 7,0"], "OK");
        match ResponseKind::SignalQuality.shape(base.clone()) {
            Response::SignalQuality(r) => {
                assert_eq!(r.signal_quality(), Some(SignalQuality::new(7, 0)))
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            ResponseKind::Generic.shape(base.clone()),
            Response::Generic(base)
        );
    }
}
