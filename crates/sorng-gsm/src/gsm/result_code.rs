//! Final result codes.
//!
//! A response ends with one terminal line: a primitive code (`OK`, `ERROR`,
//! `NO CARRIER`, …) or an extended failure report from the mobile equipment
//! (`+CME ERROR: <n>`) or message service (`+CMS ERROR: <n>`).  Extended
//! sub-codes are interned: the first sighting of a number creates its
//! canonical entry and every later sighting shares it.

use lazy_static::lazy_static;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

const CME_PREFIX: &str = "+CME ERROR";
const CMS_PREFIX: &str = "+CMS ERROR";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Failure registries
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, PartialEq, Eq)]
pub struct FailureEntry {
    pub code: i32,
    pub description: String,
}

const CME_TABLE: &[(i32, &str)] = &[
    (3, "Operation Not Allowed"),
    (4, "Operation Not Supported"),
    (5, "PH-SIM Pin Required (SIM Lock)"),
    (10, "SIM Not Inserted"),
    (11, "SIM PIN Required"),
    (12, "SIM PUK Required"),
    (13, "SIM Failure"),
];

const CMS_TABLE: &[(i32, &str)] = &[
    (1, "Unassigned/unallocated number"),
    (3, "No route to destination"),
    (6, "Channel unacceptable"),
    (8, "Operator determined barring"),
    (16, "Normal call clearing"),
    (17, "User busy"),
    (18, "No user responding"),
];

type Registry = Mutex<HashMap<i32, Arc<FailureEntry>>>;

fn seed(table: &[(i32, &str)]) -> Registry {
    Mutex::new(
        table
            .iter()
            .map(|&(code, description)| {
                (
                    code,
                    Arc::new(FailureEntry {
                        code,
                        description: description.to_string(),
                    }),
                )
            })
            .collect(),
    )
}

lazy_static! {
    static ref CME_REGISTRY: Registry = seed(CME_TABLE);
    static ref CMS_REGISTRY: Registry = seed(CMS_TABLE);
    static ref CME_UNKNOWN: Arc<FailureEntry> = Arc::new(FailureEntry {
        code: -1,
        description: String::new(),
    });
    static ref CMS_UNKNOWN: Arc<FailureEntry> = Arc::new(FailureEntry {
        code: -1,
        description: String::new(),
    });
}

fn intern(registry: &Registry, code: i32) -> Arc<FailureEntry> {
    let mut map = registry.lock().unwrap_or_else(|p| p.into_inner());
    Arc::clone(map.entry(code).or_insert_with(|| {
        Arc::new(FailureEntry {
            code,
            description: format!("Unknown Error {}", code),
        })
    }))
}

/// Handle to an interned CME or CMS failure entry.
#[derive(Debug, Clone)]
pub struct FailureCode(Arc<FailureEntry>);

impl FailureCode {
    pub fn cme(code: i32) -> Self {
        Self(intern(&CME_REGISTRY, code))
    }

    pub fn cms(code: i32) -> Self {
        Self(intern(&CMS_REGISTRY, code))
    }

    /// Placeholder for a CME report whose code could not be read.
    pub fn cme_unknown() -> Self {
        Self(Arc::clone(&*CME_UNKNOWN))
    }

    pub fn cms_unknown() -> Self {
        Self(Arc::clone(&*CMS_UNKNOWN))
    }

    pub fn code(&self) -> i32 {
        self.0.code
    }

    pub fn description(&self) -> &str {
        &self.0.description
    }

    pub fn entry(&self) -> &Arc<FailureEntry> {
        &self.0
    }
}

impl PartialEq for FailureCode {
    fn eq(&self, other: &Self) -> bool {
        self.0.code == other.0.code
    }
}

impl Eq for FailureCode {}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  ResultCode
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultCode {
    /// No terminal line seen (yet).
    Unknown,
    Ok,
    Ring,
    NoCarrier,
    Error,
    Busy,
    NoAnswer,
    CmeError(FailureCode),
    CmsError(FailureCode),
}

impl Default for ResultCode {
    fn default() -> Self {
        Self::Unknown
    }
}

impl ResultCode {
    /// Interpret `line` as a final result code.  Anything that is not a
    /// terminal line resolves to `Unknown`.
    pub fn try_parse(line: &str) -> Self {
        let text = line.trim().to_uppercase();
        match text.as_str() {
            "OK" | "0" => return Self::Ok,
            "RING" | "2" => return Self::Ring,
            "NO CARRIER" | "3" => return Self::NoCarrier,
            "ERROR" | "4" => return Self::Error,
            "BUSY" | "7" => return Self::Busy,
            "NO ANSWER" | "8" => return Self::NoAnswer,
            _ => {}
        }

        if let Some(rest) = text.strip_prefix(CME_PREFIX) {
            return Self::CmeError(match failure_number(rest) {
                Some(code) => FailureCode::cme(code),
                None => FailureCode::cme_unknown(),
            });
        }
        if let Some(rest) = text.strip_prefix(CMS_PREFIX) {
            return Self::CmsError(match failure_number(rest) {
                Some(code) => FailureCode::cms(code),
                None => FailureCode::cms_unknown(),
            });
        }
        Self::Unknown
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Unknown)
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }

    /// Verbose (ATV1) wire text.
    pub fn verbose(&self) -> &'static str {
        match self {
            Self::Unknown => "",
            Self::Ok => "OK",
            Self::Ring => "RING",
            Self::NoCarrier => "NO CARRIER",
            Self::Error => "ERROR",
            Self::Busy => "BUSY",
            Self::NoAnswer => "NO ANSWER",
            Self::CmeError(_) => CME_PREFIX,
            Self::CmsError(_) => CMS_PREFIX,
        }
    }

    /// Numeric (ATV0) code, where one is defined.
    pub fn numeric(&self) -> Option<u8> {
        match self {
            Self::Ok => Some(0),
            Self::Ring => Some(2),
            Self::NoCarrier => Some(3),
            Self::Error => Some(4),
            Self::Busy => Some(7),
            Self::NoAnswer => Some(8),
            _ => None,
        }
    }

    pub fn description(&self) -> &str {
        match self {
            Self::Unknown => "Unknown",
            Self::Ok => "OK",
            Self::Ring => "Ring",
            Self::NoCarrier => "No Carrier",
            Self::Error => "Error",
            Self::Busy => "Busy",
            Self::NoAnswer => "No Answer",
            Self::CmeError(f) | Self::CmsError(f) => f.description(),
        }
    }

    pub fn failure(&self) -> Option<&FailureCode> {
        match self {
            Self::CmeError(f) | Self::CmsError(f) => Some(f),
            _ => None,
        }
    }
}

/// `rest` is whatever followed the family prefix, normally `": 11"`.
fn failure_number(rest: &str) -> Option<i32> {
    let token = rest.rsplit(':').next()?.trim();
    token.parse().ok()
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CmeError(code) | Self::CmsError(code) => {
                write!(f, "{}: {}", self.verbose(), code.code())
            }
            other => f.write_str(other.verbose()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitives_are_case_insensitive_and_trimmed() {
        assert_eq!(ResultCode::try_parse("OK"), ResultCode::Ok);
        assert_eq!(ResultCode::try_parse("  ok "), ResultCode::Ok);
        assert_eq!(ResultCode::try_parse("No Carrier"), ResultCode::NoCarrier);
        assert_eq!(ResultCode::try_parse("busy"), ResultCode::Busy);
        assert_eq!(ResultCode::try_parse("NO ANSWER"), ResultCode::NoAnswer);
        assert_eq!(ResultCode::try_parse("RING"), ResultCode::Ring);
        assert_eq!(ResultCode::try_parse("ERROR"), ResultCode::Error);
    }

    #[test]
    fn numeric_codes_resolve() {
        assert_eq!(ResultCode::try_parse("0"), ResultCode::Ok);
        assert_eq!(ResultCode::try_parse("4"), ResultCode::Error);
        assert_eq!(ResultCode::try_parse("8"), ResultCode::NoAnswer);
        assert_eq!(ResultCode::try_parse("1"), ResultCode::Unknown);
        assert_eq!(ResultCode::Busy.numeric(), Some(7));
    }

    #[test]
    fn data_lines_are_not_terminal() {
        for line in ["+CSQ: 18,99", "", "OKAY", "AT+CSQ", "+CMTI: \"ME\",3"] {
            let code = ResultCode::try_parse(line);
            assert_eq!(code, ResultCode::Unknown, "{line}");
            assert!(!code.is_terminal());
        }
    }

    #[test]
    fn cme_tabulated_code_is_interned() {
        let a = ResultCode::try_parse("+CME ERROR: 13");
        let b = ResultCode::try_parse("+cme error: 13");
        assert!(a.is_terminal());
        assert_eq!(a, b);
        assert_eq!(a.description(), "SIM Failure");
        assert!(Arc::ptr_eq(
            a.failure().unwrap().entry(),
            b.failure().unwrap().entry()
        ));
    }

    #[test]
    fn cme_sim_pin_required() {
        let code = ResultCode::try_parse("+CME ERROR: 11");
        assert!(matches!(&code, ResultCode::CmeError(f) if f.code() == 11));
        assert_eq!(code.description(), "SIM PIN Required");
        assert_eq!(code.to_string(), "+CME ERROR: 11");
    }

    #[test]
    fn unseen_cms_code_gets_synthesized_entry() {
        let first = ResultCode::try_parse("+CMS ERROR: 999");
        assert_eq!(first.description(), "Unknown Error 999");
        let again = ResultCode::try_parse("+CMS ERROR: 999");
        assert!(Arc::ptr_eq(
            first.failure().unwrap().entry(),
            again.failure().unwrap().entry()
        ));
    }

    #[test]
    fn families_are_distinct() {
        let cme = ResultCode::try_parse("+CME ERROR: 3");
        let cms = ResultCode::try_parse("+CMS ERROR: 3");
        assert_ne!(cme, cms);
        assert_eq!(cme.description(), "Operation Not Allowed");
        assert_eq!(cms.description(), "No route to destination");
    }

    #[test]
    fn non_numeric_sub_code_is_still_terminal() {
        let code = ResultCode::try_parse("+CME ERROR: SIM busy");
        assert!(code.is_terminal());
        let failure = code.failure().unwrap();
        assert_eq!(failure.code(), -1);
        assert_eq!(failure.description(), "");
        assert!(Arc::ptr_eq(
            failure.entry(),
            FailureCode::cme_unknown().entry()
        ));
    }

    #[test]
    fn equality_by_code_for_sub_codes() {
        assert_eq!(FailureCode::cms(17), FailureCode::cms(17));
        assert_ne!(FailureCode::cms(17), FailureCode::cms(18));
    }
}
