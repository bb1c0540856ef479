//! Comma-separated field extraction for `+XXXX: a,b,c` response lines.

/// Fields of one information response line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fields {
    values: Vec<String>,
}

impl Fields {
    /// Locate the first line starting with `prefix` (ASCII case-insensitive)
    /// and split whatever follows its `:`.
    pub fn find(lines: &[String], prefix: &str) -> Option<Self> {
        lines
            .iter()
            .map(|l| l.trim_start())
            .find(|l| has_prefix(l, prefix))
            .map(|l| Self::parse(after_colon(l, prefix)))
    }

    pub fn parse(text: &str) -> Self {
        Self {
            values: text.split(',').map(|v| v.trim().to_string()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Integer at `index`; `-1` when missing or not a number.
    pub fn int(&self, index: usize) -> i32 {
        self.values
            .get(index)
            .and_then(|v| unquote(v).trim().parse().ok())
            .unwrap_or(-1)
    }

    /// Text at `index` with surrounding quotes removed; empty when missing.
    pub fn string(&self, index: usize) -> String {
        self.values
            .get(index)
            .map(|v| unquote(v).to_string())
            .unwrap_or_default()
    }

    /// Non-zero integer flag.
    pub fn flag(&self, index: usize) -> bool {
        self.int(index) > 0
    }
}

pub(crate) fn has_prefix(line: &str, prefix: &str) -> bool {
    line.get(..prefix.len())
        .map_or(false, |head| head.eq_ignore_ascii_case(prefix))
}

/// Text after the first `:` following `prefix`, or after the prefix itself
/// when no colon is present.
pub(crate) fn after_colon<'a>(line: &'a str, prefix: &str) -> &'a str {
    let rest = line.get(prefix.len()..).unwrap_or("");
    match rest.split_once(':') {
        Some((_, value)) => value,
        None => rest,
    }
}

/// Strip one layer of `"` or `'` quoting.
pub fn unquote(value: &str) -> &str {
    let v = value.trim();
    for q in ['"', '\''] {
        if let Some(inner) = v.strip_prefix(q).and_then(|s| s.strip_suffix(q)) {
            return inner;
        }
    }
    v.trim_matches(|c| c == '"' || c == '\'')
}
