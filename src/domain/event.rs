//! API request events and their line format.
//!
//! Each accepted or rejected request becomes one line of the event log:
//!
//! ```text
//! 2025-03-01 12:00:00 [API_REQUEST] token=abc status=SUCCESS ip=10.0.0.7 endpoint=/api/flights params=from=TPE,to=NRT
//! ```
//!
//! Fields appear in exactly this order. `params` always comes last and runs
//! to the end of the line, so it may contain spaces. When writing, `%`, control
//! characters and non-ASCII bytes are percent-encoded in every text field,
//! and spaces too in `token` and `endpoint`. A caller therefore cannot break
//! out of its own fields or start a new line.

use crate::domain::time::LOG_TIMESTAMP_FORMAT;
use chrono::{DateTime, NaiveDateTime, Utc};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

const REQUEST_MARKER: &str = " [API_REQUEST] ";

/// Space-delimited fields.
const FIELD_ENCODE_SET: &AsciiSet = &CONTROLS.add(b' ').add(b'%');
/// `params` may keep its spaces.
const PARAMS_ENCODE_SET: &AsciiSet = &CONTROLS.add(b'%');

/// How the API answered a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    Success,
    Error,
    RateLimited,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "SUCCESS",
            Outcome::Error => "ERROR",
            Outcome::RateLimited => "RATE_LIMITED",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Outcome {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUCCESS" => Ok(Outcome::Success),
            "ERROR" => Ok(Outcome::Error),
            "RATE_LIMITED" => Ok(Outcome::RateLimited),
            other => Err(ParseError::BadOutcome(other.to_string())),
        }
    }
}

/// Error returned for an event log line that cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The line is not an `[API_REQUEST]` record
    NotARequest,
    /// The timestamp prefix is not in a recognized layout
    BadTimestamp(String),
    /// A required field is absent
    MissingField(&'static str),
    /// The status field holds an unknown value
    BadOutcome(String),
    /// The ip field is not an IP address
    BadAddress(String),
    /// Text after `endpoint` that is not `params=`
    UnexpectedField(String),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::NotARequest => write!(f, "line is not an API_REQUEST record"),
            ParseError::BadTimestamp(ts) => write!(f, "unparseable timestamp '{}'", ts),
            ParseError::MissingField(name) => write!(f, "missing field '{}'", name),
            ParseError::BadOutcome(s) => write!(f, "unknown status '{}'", s),
            ParseError::BadAddress(s) => write!(f, "invalid ip address '{}'", s),
            ParseError::UnexpectedField(s) => write!(f, "unexpected text '{}' after endpoint", s),
        }
    }
}

impl std::error::Error for ParseError {}

/// One API request as recorded in the event log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestEvent {
    pub timestamp: DateTime<Utc>,
    pub principal_id: String,
    pub source_address: IpAddr,
    pub endpoint: String,
    pub outcome: Outcome,
    pub params: String,
}

impl RequestEvent {
    /// Render the event as a single log line, without trailing newline.
    ///
    /// Timestamps are written at second precision.
    pub fn to_line(&self) -> String {
        format!(
            "{}{}token={} status={} ip={} endpoint={} params={}",
            self.timestamp.format(LOG_TIMESTAMP_FORMAT),
            REQUEST_MARKER,
            utf8_percent_encode(&self.principal_id, FIELD_ENCODE_SET),
            self.outcome,
            self.source_address,
            utf8_percent_encode(&self.endpoint, FIELD_ENCODE_SET),
            utf8_percent_encode(&self.params, PARAMS_ENCODE_SET)
        )
    }

    /// Parse one log line.
    ///
    /// `token`, `status`, `ip` and `endpoint` must appear once each, in that
    /// order, separated by single spaces.
    pub fn parse_line(line: &str) -> Result<Self, ParseError> {
        let line = line.trim_end_matches(['\r', '\n']);
        let (stamp, body) = line.split_once(REQUEST_MARKER).ok_or(ParseError::NotARequest)?;
        let timestamp = parse_timestamp(stamp.trim())?;

        let mut rest = body.trim_start();
        let token = take_field(&mut rest, "token")?;
        let status = take_field(&mut rest, "status")?;
        let ip = take_field(&mut rest, "ip")?;
        let endpoint = take_field(&mut rest, "endpoint")?;

        let params = if rest.is_empty() {
            String::new()
        } else {
            let raw = rest
                .strip_prefix("params=")
                .ok_or_else(|| ParseError::UnexpectedField(rest.to_string()))?;
            decode(raw)
        };

        if token.is_empty() {
            return Err(ParseError::MissingField("token"));
        }
        let outcome = status.parse()?;
        let source_address = ip
            .parse::<IpAddr>()
            .map_err(|_| ParseError::BadAddress(ip.to_string()))?;

        Ok(Self {
            timestamp,
            principal_id: decode(token),
            source_address,
            endpoint: decode(endpoint),
            outcome,
            params,
        })
    }
}

/// Split `key=value` off the front of `rest`, leaving `rest` after the
/// following space.
fn take_field<'a>(rest: &mut &'a str, key: &'static str) -> Result<&'a str, ParseError> {
    let value = rest
        .strip_prefix(key)
        .and_then(|r| r.strip_prefix('='))
        .ok_or(ParseError::MissingField(key))?;
    let (value, tail) = value.split_once(' ').unwrap_or((value, ""));
    *rest = tail;
    Ok(value)
}

fn decode(raw: &str) -> String {
    percent_decode_str(raw).decode_utf8_lossy().into_owned()
}

impl FromStr for RequestEvent {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_line(s)
    }
}

/// Accepts the native `%Y-%m-%d %H:%M:%S` layout (read as UTC) and RFC 3339.
fn parse_timestamp(stamp: &str) -> Result<DateTime<Utc>, ParseError> {
    if let Ok(naive) = NaiveDateTime::parse_from_str(stamp, LOG_TIMESTAMP_FORMAT) {
        return Ok(naive.and_utc());
    }
    DateTime::parse_from_rfc3339(stamp)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| ParseError::BadTimestamp(stamp.to_string()))
}
