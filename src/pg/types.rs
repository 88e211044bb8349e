//! PostgreSQL type conversion between wire text and native values.
//!
//! All traffic uses the text format (format code 0). Decoding resolves by the
//! server-declared column OID; encoding resolves by the native value variant,
//! since untyped parameters carry no wire type yet. Both directions fall back
//! to plain string passthrough.

use std::net::IpAddr;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::error::{PgError, PgResult};

// ============================================================================
// Type OIDs
// ============================================================================

/// PostgreSQL type object identifiers (OIDs).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Oid(pub i32);

impl Oid {
    pub const BOOL: Oid = Oid(16);
    pub const BYTEA: Oid = Oid(17);
    pub const CHAR: Oid = Oid(18);
    pub const NAME: Oid = Oid(19);
    pub const INT8: Oid = Oid(20);
    pub const INT2: Oid = Oid(21);
    pub const INT2_VECTOR: Oid = Oid(22);
    pub const INT4: Oid = Oid(23);
    pub const TEXT: Oid = Oid(25);
    pub const OID_TYPE: Oid = Oid(26);
    pub const XID: Oid = Oid(28);
    pub const JSON: Oid = Oid(114);
    pub const CIDR: Oid = Oid(650);
    pub const FLOAT4: Oid = Oid(700);
    pub const FLOAT8: Oid = Oid(701);
    pub const UNKNOWN: Oid = Oid(705);
    pub const MONEY: Oid = Oid(790);
    pub const MACADDR: Oid = Oid(829);
    pub const INET: Oid = Oid(869);
    pub const BPCHAR: Oid = Oid(1042);
    pub const VARCHAR: Oid = Oid(1043);
    pub const DATE: Oid = Oid(1082);
    pub const TIME: Oid = Oid(1083);
    pub const TIMESTAMP: Oid = Oid(1114);
    pub const TIMESTAMPTZ: Oid = Oid(1184);
    pub const NUMERIC: Oid = Oid(1700);
    pub const CSTRING: Oid = Oid(2275);
    pub const UUID: Oid = Oid(2950);
    pub const JSONB: Oid = Oid(3802);

    #[inline]
    pub fn from_i32(oid: i32) -> Self {
        Oid(oid)
    }

    #[inline]
    pub fn as_i32(self) -> i32 {
        self.0
    }
}

// ============================================================================
// Native values
// ============================================================================

/// A decoded PostgreSQL value, or a parameter to bind.
///
/// Serializes untagged: shaped rows go straight into JSON response bodies.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Arbitrary-precision decimal, kept as the exact wire text where an f64
    /// round-trip would lose precision.
    Numeric(String),
    Text(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<FixedOffset>),
    /// Bare network address (no slash in the wire text).
    Inet(IpAddr),
    /// Slash-notation network.
    Cidr { address: IpAddr, prefix: u8 },
    Json(serde_json::Value),
    Uuid(Uuid),
    /// int2vector, whitespace-separated on the wire.
    IntVector(Vec<i64>),
}

impl Value {
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Integer view, for callers that expect a count-like column.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(v) => Some(v),
            _ => None,
        }
    }
}

// ============================================================================
// Decoding (wire text -> Value, keyed by OID)
// ============================================================================

/// Decode the text representation of a column value by its type OID.
///
/// Unknown OIDs decode as plain text passthrough. NULL never reaches this
/// function: a wire length of -1 is mapped to [`Value::Null`] before any
/// converter runs.
pub fn decode(oid: Oid, text: &str) -> PgResult<Value> {
    match oid {
        Oid::BOOL => Ok(Value::Bool(text == "t")),
        Oid::INT2 | Oid::INT4 | Oid::INT8 | Oid::OID_TYPE | Oid::XID => text
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|e| PgError::Type(format!("invalid integer {text:?}: {e}"))),
        Oid::FLOAT4 | Oid::FLOAT8 => text
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|e| PgError::Type(format!("invalid float {text:?}: {e}"))),
        Oid::NUMERIC => numeric_in(text),
        Oid::BYTEA => bytes_in(text),
        Oid::DATE => date_in(text),
        Oid::TIME => time_in(text),
        Oid::TIMESTAMP => timestamp_in(text),
        Oid::TIMESTAMPTZ => timestamptz_in(text),
        Oid::INET | Oid::CIDR => inet_in(text),
        Oid::JSON | Oid::JSONB => serde_json::from_str(text)
            .map(Value::Json)
            .map_err(|e| PgError::Type(format!("invalid json: {e}"))),
        Oid::UUID => Uuid::parse_str(text)
            .map(Value::Uuid)
            .map_err(|e| PgError::Type(format!("invalid uuid {text:?}: {e}"))),
        Oid::INT2_VECTOR => vector_in(text),
        // char, name, text, varchar, bpchar, money, macaddr, cstring,
        // unknown and every OID without a dedicated converter.
        _ => Ok(Value::Text(text.to_string())),
    }
}

/// Encode a native value to its text wire representation.
///
/// `None` means wire NULL (length -1, no bytes). The exhaustive match over
/// variants replaces runtime type-table lookup: every variant has exactly one
/// textual form.
pub fn encode(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Bool(v) => Some(if *v { "true" } else { "false" }.to_string()),
        Value::Int(v) => Some(v.to_string()),
        Value::Float(v) => Some(v.to_string()),
        Value::Numeric(v) => Some(v.clone()),
        Value::Text(v) => Some(v.clone()),
        Value::Bytes(v) => Some(bytes_out(v)),
        Value::Date(v) => Some(v.format("%Y-%m-%d").to_string()),
        Value::Time(v) => Some(v.format("%H:%M:%S%.f").to_string()),
        Value::Timestamp(v) => Some(v.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
        Value::TimestampTz(v) => Some(
            v.with_timezone(&Utc)
                .to_rfc3339_opts(SecondsFormat::AutoSi, true),
        ),
        Value::Inet(v) => Some(v.to_string()),
        Value::Cidr { address, prefix } => Some(format!("{address}/{prefix}")),
        Value::Json(v) => Some(v.to_string()),
        Value::Uuid(v) => Some(v.to_string()),
        Value::IntVector(v) => Some(
            v.iter()
                .map(|n| n.to_string())
                .collect::<Vec<_>>()
                .join(" "),
        ),
    }
}

// ============================================================================
// Individual converters
// ============================================================================

fn is_infinity(text: &str) -> bool {
    text == "infinity" || text == "-infinity"
}

fn numeric_in(text: &str) -> PgResult<Value> {
    // Validate the shape, keep the exact text.
    let mut rest = text.strip_prefix(['+', '-']).unwrap_or(text);
    if let Some((mantissa, exponent)) = rest.split_once(['e', 'E']) {
        let exp = exponent.strip_prefix(['+', '-']).unwrap_or(exponent);
        if exp.is_empty() || !exp.bytes().all(|b| b.is_ascii_digit()) {
            return Err(PgError::Type(format!("invalid numeric {text:?}")));
        }
        rest = mantissa;
    }
    let digits = rest.bytes().filter(|b| b.is_ascii_digit()).count();
    let valid = digits > 0
        && rest.bytes().filter(|b| *b == b'.').count() <= 1
        && rest.bytes().all(|b| b.is_ascii_digit() || b == b'.');
    if valid || text == "NaN" {
        Ok(Value::Numeric(text.to_string()))
    } else {
        Err(PgError::Type(format!("invalid numeric {text:?}")))
    }
}

fn bytes_in(text: &str) -> PgResult<Value> {
    let hex = text
        .strip_prefix("\\x")
        .ok_or_else(|| PgError::Type(format!("bytea without \\x prefix: {text:?}")))?;
    if hex.len() % 2 != 0 {
        return Err(PgError::Type("odd-length bytea hex".to_string()));
    }
    let mut out = Vec::with_capacity(hex.len() / 2);
    for chunk in hex.as_bytes().chunks(2) {
        let pair = std::str::from_utf8(chunk).map_err(|e| PgError::Type(e.to_string()))?;
        let byte = u8::from_str_radix(pair, 16)
            .map_err(|e| PgError::Type(format!("invalid bytea hex {pair:?}: {e}")))?;
        out.push(byte);
    }
    Ok(Value::Bytes(out))
}

fn bytes_out(data: &[u8]) -> String {
    let mut out = String::with_capacity(2 + data.len() * 2);
    out.push_str("\\x");
    for b in data {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

fn date_in(text: &str) -> PgResult<Value> {
    if is_infinity(text) {
        // Stable sentinel, never a date.
        return Ok(Value::Text(text.to_string()));
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .map(Value::Date)
        .map_err(|e| PgError::Type(format!("invalid date {text:?}: {e}")))
}

fn time_in(text: &str) -> PgResult<Value> {
    NaiveTime::parse_from_str(text, "%H:%M:%S%.f")
        .map(Value::Time)
        .map_err(|e| PgError::Type(format!("invalid time {text:?}: {e}")))
}

/// Fallback formats for timestamps that miss the strict server layout.
const LENIENT_TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%d",
    "%d.%m.%Y %H:%M:%S%.f",
];

fn timestamp_in(text: &str) -> PgResult<Value> {
    if is_infinity(text) {
        return Ok(Value::Text(text.to_string()));
    }
    if let Ok(ts) = NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f") {
        return Ok(Value::Timestamp(ts));
    }
    for format in LENIENT_TIMESTAMP_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(text, format) {
            return Ok(Value::Timestamp(ts));
        }
        if let Ok(date) = NaiveDate::parse_from_str(text, format) {
            return Ok(Value::Timestamp(date.and_time(NaiveTime::MIN)));
        }
    }
    Err(PgError::Type(format!("invalid timestamp {text:?}")))
}

fn timestamptz_in(text: &str) -> PgResult<Value> {
    if is_infinity(text) {
        return Ok(Value::Text(text.to_string()));
    }
    // %#z accepts the server's hour-only offsets ("+03") as well as "+0300".
    if let Ok(ts) = DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f%#z") {
        return Ok(Value::TimestampTz(ts));
    }
    DateTime::parse_from_rfc3339(text)
        .map(Value::TimestampTz)
        .map_err(|e| PgError::Type(format!("invalid timestamptz {text:?}: {e}")))
}

fn inet_in(text: &str) -> PgResult<Value> {
    // Slash notation implies a network, a bare address otherwise.
    if let Some((addr, prefix)) = text.split_once('/') {
        let address = IpAddr::from_str(addr)
            .map_err(|e| PgError::Type(format!("invalid network address {text:?}: {e}")))?;
        let prefix = prefix
            .parse::<u8>()
            .map_err(|e| PgError::Type(format!("invalid network prefix {text:?}: {e}")))?;
        Ok(Value::Cidr { address, prefix })
    } else {
        IpAddr::from_str(text)
            .map(Value::Inet)
            .map_err(|e| PgError::Type(format!("invalid address {text:?}: {e}")))
    }
}

fn vector_in(text: &str) -> PgResult<Value> {
    text.split_whitespace()
        .map(|part| {
            part.parse::<i64>()
                .map_err(|e| PgError::Type(format!("invalid int2vector {text:?}: {e}")))
        })
        .collect::<PgResult<Vec<_>>>()
        .map(Value::IntVector)
}
