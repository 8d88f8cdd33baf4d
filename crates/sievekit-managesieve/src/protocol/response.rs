//! Response-line parsing for the ManageSieve protocol.
//!
//! Server responses are a sequence of data lines terminated by a
//! completion line starting with `OK`, `NO` or `BYE`, optionally carrying
//! a parenthesized response code and a human-readable string (RFC 5804
//! section 1.2/1.3).

use crate::{Error, Result};

/// Status of a completion line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseStatus {
    /// Command completed successfully.
    Ok,
    /// Command failed; the session stays usable.
    No,
    /// Server is closing the connection.
    Bye,
}

/// Parenthesized response code on a completion line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseCode {
    /// `(SASL "...")`: final server SASL data, base64.
    Sasl(String),
    /// Any other code, e.g. `QUOTA/MAXSIZE` or `NONEXISTENT`.
    Other(String),
}

impl ResponseCode {
    /// The code as text (`SASL` payloads excluded).
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Sasl(_) => "SASL",
            Self::Other(code) => code,
        }
    }
}

/// A parsed completion line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    /// `OK`, `NO` or `BYE`.
    pub status: ResponseStatus,
    /// Optional response code.
    pub code: Option<ResponseCode>,
    /// Optional human-readable text.
    pub text: Option<String>,
    /// Set when the human-readable text is sent as a literal of this many
    /// octets; the transport must read it before the response is complete.
    pub pending_literal: Option<usize>,
}

impl Completion {
    /// The diagnostic text, empty if the server sent none.
    #[must_use]
    pub fn text(&self) -> &str {
        self.text.as_deref().unwrap_or("")
    }
}

/// One entry of a LISTSCRIPTS response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptEntry {
    /// Script name.
    pub name: String,
    /// Whether the server marked it ACTIVE.
    pub active: bool,
}

/// Matches a line that is exactly a literal marker `{n}` or `{n+}`.
pub(crate) fn literal_marker(line: &[u8]) -> Option<usize> {
    if line.len() < 3 || line[0] != b'{' || *line.last()? != b'}' {
        return None;
    }
    let inner = &line[1..line.len() - 1];
    let digits = inner.strip_suffix(b"+").unwrap_or(inner);
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    std::str::from_utf8(digits).ok()?.parse().ok()
}

/// Reads a quoted string from the start of `input`, unescaping `\"` and
/// `\\`. Returns the content and the rest of the line.
pub(crate) fn unquote(input: &[u8]) -> Option<(String, &[u8])> {
    if input.first() != Some(&b'"') {
        return None;
    }
    let mut content = Vec::new();
    let mut i = 1;
    while i < input.len() {
        match input[i] {
            b'"' => {
                let text = String::from_utf8_lossy(&content).into_owned();
                return Some((text, &input[i + 1..]));
            }
            b'\\' if i + 1 < input.len() => {
                content.push(input[i + 1]);
                i += 2;
            }
            byte => {
                content.push(byte);
                i += 1;
            }
        }
    }
    None
}

fn trim_start(input: &[u8]) -> &[u8] {
    let skip = input.iter().take_while(|b| **b == b' ').count();
    &input[skip..]
}

/// Tries to parse a completion line. Returns `None` for data lines.
pub(crate) fn parse_completion(line: &[u8]) -> Result<Option<Completion>> {
    let word_len = line.iter().take_while(|b| b.is_ascii_alphabetic()).count();
    let (word, mut rest) = line.split_at(word_len);
    let status = if word.eq_ignore_ascii_case(b"OK") {
        ResponseStatus::Ok
    } else if word.eq_ignore_ascii_case(b"NO") {
        ResponseStatus::No
    } else if word.eq_ignore_ascii_case(b"BYE") {
        ResponseStatus::Bye
    } else {
        return Ok(None);
    };
    if !rest.is_empty() && rest[0] != b' ' {
        return Ok(None);
    }
    rest = trim_start(rest);

    let mut code = None;
    if rest.first() == Some(&b'(') {
        let close = rest
            .iter()
            .position(|b| *b == b')')
            .ok_or_else(|| Error::Protocol("unterminated response code".into()))?;
        let inner = &rest[1..close];
        code = Some(parse_response_code(inner));
        rest = trim_start(&rest[close + 1..]);
    }

    let mut text = None;
    let mut pending_literal = None;
    if let Some(size) = literal_marker(rest) {
        pending_literal = Some(size);
    } else if let Some((quoted, _)) = unquote(rest) {
        text = Some(quoted);
    } else if !rest.is_empty() {
        text = Some(String::from_utf8_lossy(rest).into_owned());
    }

    Ok(Some(Completion {
        status,
        code,
        text,
        pending_literal,
    }))
}

fn parse_response_code(inner: &[u8]) -> ResponseCode {
    let word_len = inner
        .iter()
        .take_while(|b| !b.is_ascii_whitespace())
        .count();
    let (word, rest) = inner.split_at(word_len);
    if word.eq_ignore_ascii_case(b"SASL")
        && let Some((payload, _)) = unquote(trim_start(rest))
    {
        return ResponseCode::Sasl(payload);
    }
    ResponseCode::Other(String::from_utf8_lossy(inner).into_owned())
}

impl ScriptEntry {
    /// Parses one LISTSCRIPTS data line.
    #[must_use]
    pub fn parse(line: &[u8]) -> Self {
        if let Some((name, rest)) = unquote(line) {
            let rest = trim_start(rest);
            let active = rest.len() >= 6 && rest[..6].eq_ignore_ascii_case(b"ACTIVE");
            Self { name, active }
        } else {
            // literal-framed names arrive as a bare payload line
            Self {
                name: String::from_utf8_lossy(line).into_owned(),
                active: false,
            }
        }
    }
}

/// Server capabilities: the key/value pairs announced in the greeting,
/// after STARTTLS and in CAPABILITY responses (RFC 5804 section 1.7).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    entries: Vec<(String, Option<String>)>,
}

impl Capabilities {
    /// Parses capability data lines (completion line excluded).
    #[must_use]
    pub fn parse(lines: &[Vec<u8>]) -> Self {
        let mut entries = Vec::new();
        for line in lines {
            let Some((name, rest)) = unquote(line) else {
                continue;
            };
            let value = unquote(trim_start(rest)).map(|(v, _)| v);
            entries.push((name.to_ascii_uppercase(), value));
        }
        Self { entries }
    }

    /// Whether the key was announced.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    /// Value of the given key, if announced with one.
    #[must_use]
    pub fn value(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .and_then(|(_, v)| v.as_deref())
    }

    /// All announced entries, in announcement order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_deref()))
    }

    /// `IMPLEMENTATION` string.
    #[must_use]
    pub fn implementation(&self) -> Option<&str> {
        self.value("IMPLEMENTATION")
    }

    /// Supported SASL mechanisms, uppercase.
    #[must_use]
    pub fn sasl_mechanisms(&self) -> Vec<String> {
        self.value("SASL")
            .map(|v| {
                v.split_ascii_whitespace()
                    .map(str::to_ascii_uppercase)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Sieve extensions supported by the server's interpreter.
    #[must_use]
    pub fn sieve_extensions(&self) -> Vec<&str> {
        self.value("SIEVE")
            .map(|v| v.split_ascii_whitespace().collect())
            .unwrap_or_default()
    }

    /// Whether STARTTLS is offered.
    #[must_use]
    pub fn has_starttls(&self) -> bool {
        self.contains("STARTTLS")
    }

    /// Whether RENAMESCRIPT is supported natively.
    #[must_use]
    pub fn has_rename(&self) -> bool {
        self.contains("RENAME")
    }

    /// Whether UNAUTHENTICATE is supported.
    #[must_use]
    pub fn has_unauthenticate(&self) -> bool {
        self.contains("UNAUTHENTICATE")
    }

    /// Protocol version (`VERSION`), present on RFC 5804 servers.
    #[must_use]
    pub fn version(&self) -> Option<&str> {
        self.value("VERSION")
    }

    /// `MAXREDIRECTS` limit, if announced.
    #[must_use]
    pub fn max_redirects(&self) -> Option<u32> {
        self.value("MAXREDIRECTS").and_then(|v| v.parse().ok())
    }

    /// `LANGUAGE` of human-readable strings, if announced.
    #[must_use]
    pub fn language(&self) -> Option<&str> {
        self.value("LANGUAGE")
    }

    /// NOTIFY methods supported, if announced.
    #[must_use]
    pub fn notify_methods(&self) -> Vec<&str> {
        self.value("NOTIFY")
            .map(|v| v.split_ascii_whitespace().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_marker() {
        assert_eq!(literal_marker(b"{123}"), Some(123));
        assert_eq!(literal_marker(b"{123+}"), Some(123));
        assert_eq!(literal_marker(b"{0}"), Some(0));
        assert_eq!(literal_marker(b"{}"), None);
        assert_eq!(literal_marker(b"{abc}"), None);
        assert_eq!(literal_marker(b"x{5}"), None);
        assert_eq!(literal_marker(b"OK"), None);
    }

    #[test]
    fn test_unquote() {
        assert_eq!(
            unquote(b"\"hello\" rest"),
            Some(("hello".to_string(), &b" rest"[..]))
        );
        assert_eq!(
            unquote(b"\"es\\\"caped\\\\\""),
            Some(("es\"caped\\".to_string(), &b""[..]))
        );
        assert_eq!(unquote(b"bare"), None);
        assert_eq!(unquote(b"\"unterminated"), None);
    }

    #[test]
    fn test_completion_ok_plain() {
        let completion = parse_completion(b"OK").unwrap().unwrap();
        assert_eq!(completion.status, ResponseStatus::Ok);
        assert_eq!(completion.code, None);
        assert_eq!(completion.text, None);
    }

    #[test]
    fn test_completion_ok_with_text() {
        let completion = parse_completion(b"OK \"Putscript completed.\"")
            .unwrap()
            .unwrap();
        assert_eq!(completion.status, ResponseStatus::Ok);
        assert_eq!(completion.text(), "Putscript completed.");
    }

    #[test]
    fn test_completion_no_with_code() {
        let completion = parse_completion(b"NO (QUOTA/MAXSIZE) \"Quota exceeded\"")
            .unwrap()
            .unwrap();
        assert_eq!(completion.status, ResponseStatus::No);
        assert_eq!(
            completion.code,
            Some(ResponseCode::Other("QUOTA/MAXSIZE".into()))
        );
        assert_eq!(completion.text(), "Quota exceeded");
    }

    #[test]
    fn test_completion_sasl_code() {
        let completion = parse_completion(b"OK (SASL \"cnNwYXV0aA==\") \"done\"")
            .unwrap()
            .unwrap();
        assert_eq!(
            completion.code,
            Some(ResponseCode::Sasl("cnNwYXV0aA==".into()))
        );
    }

    #[test]
    fn test_completion_bye() {
        let completion = parse_completion(b"BYE \"Too many failed attempts\"")
            .unwrap()
            .unwrap();
        assert_eq!(completion.status, ResponseStatus::Bye);
    }

    #[test]
    fn test_completion_with_literal_text() {
        let completion = parse_completion(b"NO {14}").unwrap().unwrap();
        assert_eq!(completion.pending_literal, Some(14));
    }

    #[test]
    fn test_data_lines_are_not_completions() {
        assert!(parse_completion(b"\"IMPLEMENTATION\" \"X\"").unwrap().is_none());
        assert!(parse_completion(b"\"OK-script\"").unwrap().is_none());
        // an alphabetic word that merely starts with NO is data
        assert!(parse_completion(b"NOPE").unwrap().is_none());
    }

    #[test]
    fn test_script_line() {
        assert_eq!(
            ScriptEntry::parse(b"\"summer\" ACTIVE"),
            ScriptEntry {
                name: "summer".into(),
                active: true
            }
        );
        assert_eq!(
            ScriptEntry::parse(b"\"vacation\""),
            ScriptEntry {
                name: "vacation".into(),
                active: false
            }
        );
        // Cyrus spells it "ACTIVE", others may not shout
        assert!(ScriptEntry::parse(b"\"x\" active").active);
    }

    #[test]
    fn test_capabilities_dovecot_greeting() {
        let lines: Vec<Vec<u8>> = vec![
            b"\"IMPLEMENTATION\" \"Dovecot Pigeonhole\"".to_vec(),
            b"\"SIEVE\" \"fileinto reject envelope vacation relational regex copy body date\"".to_vec(),
            b"\"NOTIFY\" \"mailto\"".to_vec(),
            b"\"SASL\" \"PLAIN\"".to_vec(),
            b"\"STARTTLS\"".to_vec(),
            b"\"VERSION\" \"1.0\"".to_vec(),
        ];
        let caps = Capabilities::parse(&lines);
        assert_eq!(caps.implementation(), Some("Dovecot Pigeonhole"));
        assert_eq!(caps.sasl_mechanisms(), vec!["PLAIN".to_string()]);
        assert!(caps.sieve_extensions().contains(&"vacation"));
        assert!(caps.has_starttls());
        assert!(!caps.has_rename());
        assert_eq!(caps.version(), Some("1.0"));
        assert_eq!(caps.notify_methods(), vec!["mailto"]);
    }

    #[test]
    fn test_capabilities_case_and_numbers() {
        let lines: Vec<Vec<u8>> = vec![
            b"\"MaxRedirects\" \"10\"".to_vec(),
            b"\"Rename\"".to_vec(),
            b"\"UNAUTHENTICATE\"".to_vec(),
        ];
        let caps = Capabilities::parse(&lines);
        assert_eq!(caps.max_redirects(), Some(10));
        assert!(caps.has_rename());
        assert!(caps.has_unauthenticate());
    }
}
