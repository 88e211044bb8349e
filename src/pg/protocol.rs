//! PostgreSQL wire protocol message encoding and decoding.
//!
//! Implements the v3 protocol framing: a 1-byte tag, a 4-byte big-endian
//! length that includes itself, and the payload. The startup packet alone
//! carries no tag.
//! Reference: https://www.postgresql.org/docs/current/protocol-message-formats.html

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::HashMap;

use super::error::{PgError, PgResult};
use super::types::Oid;

/// PostgreSQL protocol version 3.0.
pub const PROTOCOL_VERSION: i32 = 196608; // (3 << 16) | 0

/// Transaction status carried by every ReadyForQuery message.
/// Connection-scoped, not per-query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    /// `I`: not in a transaction block.
    Idle,
    /// `T`: inside a transaction block.
    InTransaction,
    /// `E`: inside a failed transaction block.
    InFailedTransaction,
}

impl TransactionStatus {
    fn from_status_byte(b: u8) -> PgResult<Self> {
        match b {
            b'I' => Ok(TransactionStatus::Idle),
            b'T' => Ok(TransactionStatus::InTransaction),
            b'E' => Ok(TransactionStatus::InFailedTransaction),
            other => Err(PgError::Protocol(format!(
                "unknown transaction status byte: {:?}",
                other as char
            ))),
        }
    }
}

// ============================================================================
// Frontend (client -> server) messages
// ============================================================================

/// Trait for encoding frontend messages.
pub trait FrontendMessage {
    fn encode(&self) -> BytesMut;
}

/// Startup packet: no tag, length + protocol version + key/value cstring
/// pairs + zero terminator.
#[derive(Debug, Clone)]
pub struct StartupMessage {
    pub user: String,
    pub database: String,
    pub application_name: Option<String>,
    pub replication: Option<String>,
}

impl FrontendMessage for StartupMessage {
    fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();

        // Length placeholder, filled in at the end.
        buf.put_i32(0);
        buf.put_i32(PROTOCOL_VERSION);

        put_cstr(&mut buf, "user");
        put_cstr(&mut buf, &self.user);
        put_cstr(&mut buf, "database");
        put_cstr(&mut buf, &self.database);
        if let Some(name) = &self.application_name {
            put_cstr(&mut buf, "application_name");
            put_cstr(&mut buf, name);
        }
        if let Some(replication) = &self.replication {
            put_cstr(&mut buf, "replication");
            put_cstr(&mut buf, replication);
        }
        buf.put_u8(0);

        let len = buf.len() as i32;
        buf[0..4].copy_from_slice(&len.to_be_bytes());
        buf
    }
}

/// Password message (`p`): response bytes + NUL, for both cleartext and MD5.
#[derive(Debug, Clone)]
pub struct PasswordMessage {
    pub password: String,
}

impl FrontendMessage for PasswordMessage {
    fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_u8(b'p');
        buf.put_i32(4 + self.password.len() as i32 + 1);
        put_cstr(&mut buf, &self.password);
        buf
    }
}

/// Simple query message (`Q`): statement text, NUL-terminated.
#[derive(Debug, Clone)]
pub struct QueryMessage {
    pub query: String,
}

impl FrontendMessage for QueryMessage {
    fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_u8(b'Q');
        buf.put_i32(4 + self.query.len() as i32 + 1);
        put_cstr(&mut buf, &self.query);
        buf
    }
}

/// Parse message (`P`): statement name (empty = unnamed), statement text,
/// parameter type OIDs (0 = let the server infer).
#[derive(Debug, Clone)]
pub struct ParseMessage {
    pub name: String,
    pub query: String,
    pub param_oids: Vec<Oid>,
}

impl FrontendMessage for ParseMessage {
    fn encode(&self) -> BytesMut {
        let mut body = BytesMut::new();
        put_cstr(&mut body, &self.name);
        put_cstr(&mut body, &self.query);
        body.put_i16(self.param_oids.len() as i16);
        for oid in &self.param_oids {
            body.put_i32(if oid.as_i32() == -1 { 0 } else { oid.as_i32() });
        }
        with_tag(b'P', body)
    }
}

/// Bind message (`B`): unnamed portal and statement, all-text parameter
/// format (format-code count 0), length-prefixed text parameter values with
/// -1 for NULL, all-text result format (count 0).
#[derive(Debug, Clone)]
pub struct BindMessage {
    pub portal: String,
    pub statement: String,
    pub params: Vec<Option<String>>,
}

impl FrontendMessage for BindMessage {
    fn encode(&self) -> BytesMut {
        let mut body = BytesMut::new();
        put_cstr(&mut body, &self.portal);
        put_cstr(&mut body, &self.statement);
        // Zero parameter format codes: everything is text.
        body.put_i16(0);
        body.put_i16(self.params.len() as i16);
        for param in &self.params {
            match param {
                None => body.put_i32(-1),
                Some(text) => {
                    body.put_i32(text.len() as i32);
                    body.put_slice(text.as_bytes());
                }
            }
        }
        // Zero result format codes: everything is text.
        body.put_i16(0);
        with_tag(b'B', body)
    }
}

/// Describe message (`D`), statement variant: `'S'` + statement name.
#[derive(Debug, Clone)]
pub struct DescribeStatementMessage {
    pub name: String,
}

impl FrontendMessage for DescribeStatementMessage {
    fn encode(&self) -> BytesMut {
        let mut body = BytesMut::new();
        body.put_u8(b'S');
        put_cstr(&mut body, &self.name);
        with_tag(b'D', body)
    }
}

/// Execute message (`E`): portal name + max rows (0 = unlimited).
#[derive(Debug, Clone)]
pub struct ExecuteMessage {
    pub portal: String,
    pub max_rows: i32,
}

impl FrontendMessage for ExecuteMessage {
    fn encode(&self) -> BytesMut {
        let mut body = BytesMut::new();
        put_cstr(&mut body, &self.portal);
        body.put_i32(self.max_rows);
        with_tag(b'E', body)
    }
}

/// Sync message (`S`): empty payload; returns the server to ready-for-query.
#[derive(Debug, Clone, Copy)]
pub struct SyncMessage;

impl FrontendMessage for SyncMessage {
    fn encode(&self) -> BytesMut {
        with_tag(b'S', BytesMut::new())
    }
}

/// Terminate message (`X`): empty payload; polite connection shutdown.
#[derive(Debug, Clone, Copy)]
pub struct TerminateMessage;

impl FrontendMessage for TerminateMessage {
    fn encode(&self) -> BytesMut {
        with_tag(b'X', BytesMut::new())
    }
}

fn with_tag(tag: u8, body: BytesMut) -> BytesMut {
    let mut buf = BytesMut::with_capacity(5 + body.len());
    buf.put_u8(tag);
    buf.put_i32(body.len() as i32 + 4);
    buf.put_slice(&body);
    buf
}

fn put_cstr(buf: &mut BytesMut, text: &str) {
    buf.put_slice(text.as_bytes());
    buf.put_u8(0);
}

// ============================================================================
// Backend (server -> client) messages
// ============================================================================

/// Column descriptor from a RowDescription message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescription {
    pub name: String,
    pub table_oid: i32,
    pub column_attr_num: i16,
    pub type_oid: Oid,
    pub type_size: i16,
    pub type_modifier: i32,
    pub format: i16,
}

/// Backend message, one variant per tag the client consumes.
///
/// Decoding fails on any other tag: an unknown tag means the byte stream is
/// desynchronized and must not be silently skipped.
#[derive(Debug, Clone)]
pub enum BackendMessage {
    AuthenticationOk,
    AuthenticationCleartextPassword,
    AuthenticationMd5Password { salt: [u8; 4] },
    ParameterStatus { name: String, value: String },
    BackendKeyData { process_id: i32, secret_key: i32 },
    ReadyForQuery { status: TransactionStatus },
    RowDescription { fields: Vec<FieldDescription> },
    DataRow { values: Vec<Option<Bytes>> },
    CommandComplete { tag: String },
    EmptyQueryResponse,
    ParseComplete,
    BindComplete,
    CloseComplete,
    NoData,
    ParameterDescription { param_oids: Vec<Oid> },
    NoticeResponse { fields: HashMap<u8, String> },
    ErrorResponse { fields: HashMap<u8, String> },
}

impl BackendMessage {
    /// Decode one message from its tag and exact payload (header excluded).
    pub fn decode(tag: u8, payload: Bytes) -> PgResult<Self> {
        match tag {
            b'R' => Self::decode_auth(payload),
            b'S' => Self::decode_parameter_status(payload),
            b'K' => Self::decode_backend_key_data(payload),
            b'Z' => Self::decode_ready_for_query(payload),
            b'T' => Self::decode_row_description(payload),
            b'D' => Self::decode_data_row(payload),
            b'C' => Self::decode_command_complete(payload),
            b'I' => Ok(BackendMessage::EmptyQueryResponse),
            b'1' => Ok(BackendMessage::ParseComplete),
            b'2' => Ok(BackendMessage::BindComplete),
            b'3' => Ok(BackendMessage::CloseComplete),
            b'n' => Ok(BackendMessage::NoData),
            b't' => Self::decode_parameter_description(payload),
            b'N' => Ok(BackendMessage::NoticeResponse {
                fields: read_error_fields(payload)?,
            }),
            b'E' => Ok(BackendMessage::ErrorResponse {
                fields: read_error_fields(payload)?,
            }),
            other => Err(PgError::Protocol(format!(
                "unknown message tag: {:?}",
                other as char
            ))),
        }
    }

    fn decode_auth(mut payload: Bytes) -> PgResult<Self> {
        if payload.remaining() < 4 {
            return Err(PgError::Protocol("truncated authentication request".into()));
        }
        let subtype = payload.get_i32();
        match subtype {
            0 => Ok(BackendMessage::AuthenticationOk),
            3 => Ok(BackendMessage::AuthenticationCleartextPassword),
            5 => {
                if payload.remaining() < 4 {
                    return Err(PgError::Protocol("MD5 request without salt".into()));
                }
                let mut salt = [0u8; 4];
                payload.copy_to_slice(&mut salt);
                Ok(BackendMessage::AuthenticationMd5Password { salt })
            }
            other => Err(PgError::Auth(format!(
                "unsupported authentication subtype: {other}"
            ))),
        }
    }

    fn decode_parameter_status(mut payload: Bytes) -> PgResult<Self> {
        let name = read_cstring(&mut payload)?;
        let value = read_cstring(&mut payload)?;
        Ok(BackendMessage::ParameterStatus { name, value })
    }

    fn decode_backend_key_data(mut payload: Bytes) -> PgResult<Self> {
        if payload.remaining() < 8 {
            return Err(PgError::Protocol("truncated backend key data".into()));
        }
        Ok(BackendMessage::BackendKeyData {
            process_id: payload.get_i32(),
            secret_key: payload.get_i32(),
        })
    }

    fn decode_ready_for_query(mut payload: Bytes) -> PgResult<Self> {
        if payload.remaining() < 1 {
            return Err(PgError::Protocol("ready-for-query without status".into()));
        }
        let status = TransactionStatus::from_status_byte(payload.get_u8())?;
        Ok(BackendMessage::ReadyForQuery { status })
    }

    fn decode_row_description(mut payload: Bytes) -> PgResult<Self> {
        if payload.remaining() < 2 {
            return Err(PgError::Protocol("truncated row description".into()));
        }
        let count = payload.get_i16() as usize;
        let mut fields = Vec::with_capacity(count);
        for _ in 0..count {
            let name = read_cstring(&mut payload)?;
            if payload.remaining() < 18 {
                return Err(PgError::Protocol("truncated column descriptor".into()));
            }
            fields.push(FieldDescription {
                name,
                table_oid: payload.get_i32(),
                column_attr_num: payload.get_i16(),
                type_oid: Oid::from_i32(payload.get_i32()),
                type_size: payload.get_i16(),
                type_modifier: payload.get_i32(),
                format: payload.get_i16(),
            });
        }
        Ok(BackendMessage::RowDescription { fields })
    }

    fn decode_data_row(mut payload: Bytes) -> PgResult<Self> {
        if payload.remaining() < 2 {
            return Err(PgError::Protocol("truncated data row".into()));
        }
        let count = payload.get_i16() as usize;
        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            if payload.remaining() < 4 {
                return Err(PgError::Protocol("truncated data row field".into()));
            }
            let len = payload.get_i32();
            if len == -1 {
                values.push(None);
            } else {
                let len = len as usize;
                if payload.remaining() < len {
                    return Err(PgError::Protocol("data row field overruns frame".into()));
                }
                values.push(Some(payload.split_to(len)));
            }
        }
        Ok(BackendMessage::DataRow { values })
    }

    fn decode_command_complete(mut payload: Bytes) -> PgResult<Self> {
        let tag = read_cstring(&mut payload)?;
        Ok(BackendMessage::CommandComplete { tag })
    }

    fn decode_parameter_description(mut payload: Bytes) -> PgResult<Self> {
        if payload.remaining() < 2 {
            return Err(PgError::Protocol("truncated parameter description".into()));
        }
        let count = payload.get_i16() as usize;
        let mut param_oids = Vec::with_capacity(count);
        for _ in 0..count {
            if payload.remaining() < 4 {
                return Err(PgError::Protocol("truncated parameter oid".into()));
            }
            param_oids.push(Oid::from_i32(payload.get_i32()));
        }
        Ok(BackendMessage::ParameterDescription { param_oids })
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Read a NUL-terminated UTF-8 string from the buffer.
fn read_cstring(buf: &mut Bytes) -> PgResult<String> {
    let end = buf
        .iter()
        .position(|b| *b == 0)
        .ok_or_else(|| PgError::Protocol("missing NUL terminator in string".into()))?;
    let raw = buf.split_to(end);
    buf.advance(1);
    String::from_utf8(raw.to_vec())
        .map_err(|e| PgError::Protocol(format!("invalid UTF-8 in string: {e}")))
}

/// Read error/notice response fields: (type byte, cstring) pairs up to a
/// zero byte.
fn read_error_fields(mut payload: Bytes) -> PgResult<HashMap<u8, String>> {
    let mut fields = HashMap::new();
    while payload.remaining() > 0 {
        let field_type = payload.get_u8();
        if field_type == 0 {
            break;
        }
        fields.insert(field_type, read_cstring(&mut payload)?);
    }
    Ok(fields)
}
