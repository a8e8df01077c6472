//! Backend (server to client) message decoding.
//!
//! [`BackendMessage::decode`] turns one framed payload into a fully typed
//! message. Subtypes that the wire only distinguishes inside the payload,
//! such as the authentication request family, are resolved here so the
//! connection engine can dispatch on variants alone.

use super::codec::{read_bytes, read_cstr, read_i16, read_i32, read_u32, read_u8};
use super::types::{FormatCode, Oid, TransactionStatus};
use crate::error::{Error, ErrorFields, Result};

/// Backend message type bytes.
pub mod msg_type {
    pub const AUTHENTICATION: u8 = b'R';
    pub const BACKEND_KEY_DATA: u8 = b'K';
    pub const PARAMETER_STATUS: u8 = b'S';
    pub const READY_FOR_QUERY: u8 = b'Z';
    pub const ROW_DESCRIPTION: u8 = b'T';
    pub const DATA_ROW: u8 = b'D';
    pub const COMMAND_COMPLETE: u8 = b'C';
    pub const EMPTY_QUERY_RESPONSE: u8 = b'I';
    pub const ERROR_RESPONSE: u8 = b'E';
    pub const NOTICE_RESPONSE: u8 = b'N';
    pub const NOTIFICATION_RESPONSE: u8 = b'A';
    pub const PARSE_COMPLETE: u8 = b'1';
    pub const BIND_COMPLETE: u8 = b'2';
    pub const CLOSE_COMPLETE: u8 = b'3';
    pub const PARAMETER_DESCRIPTION: u8 = b't';
    pub const NO_DATA: u8 = b'n';
    pub const PORTAL_SUSPENDED: u8 = b's';
    pub const COPY_IN_RESPONSE: u8 = b'G';
    pub const COPY_OUT_RESPONSE: u8 = b'H';
    pub const COPY_BOTH_RESPONSE: u8 = b'W';
    pub const COPY_DATA: u8 = b'd';
    pub const COPY_DONE: u8 = b'c';
    pub const FUNCTION_CALL_RESPONSE: u8 = b'V';
    pub const NEGOTIATE_PROTOCOL_VERSION: u8 = b'v';
}

/// Subtype codes of the Authentication ('R') message.
pub mod auth_type {
    pub const OK: i32 = 0;
    pub const KERBEROS_V5: i32 = 2;
    pub const CLEARTEXT_PASSWORD: i32 = 3;
    pub const MD5_PASSWORD: i32 = 5;
    pub const SCM_CREDENTIAL: i32 = 6;
    pub const GSS: i32 = 7;
    pub const GSS_CONTINUE: i32 = 8;
    pub const SSPI: i32 = 9;
    pub const SASL: i32 = 10;
    pub const SASL_CONTINUE: i32 = 11;
    pub const SASL_FINAL: i32 = 12;
}

/// Decoded authentication request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthRequest {
    /// Authentication succeeded
    Ok,
    /// Send the password in cleartext
    CleartextPassword,
    /// Send `md5(md5(password + user) + salt)` prefixed with "md5"
    Md5Password { salt: [u8; 4] },
    /// SASL exchange; the server lists mechanisms it accepts
    Sasl { mechanisms: Vec<String> },
    /// SASL continuation data (server-first or server-intermediate message)
    SaslContinue { data: Vec<u8> },
    /// SASL final data (server signature)
    SaslFinal { data: Vec<u8> },
    /// A mechanism this client does not implement
    Unsupported { code: i32 },
}

impl AuthRequest {
    fn decode(payload: &[u8]) -> Result<Self> {
        let (code, rest) = read_i32(payload)?;
        match code {
            auth_type::OK => Ok(AuthRequest::Ok),
            auth_type::CLEARTEXT_PASSWORD => Ok(AuthRequest::CleartextPassword),
            auth_type::MD5_PASSWORD => {
                let (salt, _) = read_bytes(rest, 4)?;
                let mut buf = [0u8; 4];
                buf.copy_from_slice(salt);
                Ok(AuthRequest::Md5Password { salt: buf })
            }
            auth_type::SASL => {
                // List of NUL-terminated mechanism names, then a final NUL.
                let mut mechanisms = Vec::new();
                let mut rest = rest;
                while !rest.is_empty() && rest[0] != 0 {
                    let (name, r) = read_cstr(rest)?;
                    mechanisms.push(name.to_string());
                    rest = r;
                }
                Ok(AuthRequest::Sasl { mechanisms })
            }
            auth_type::SASL_CONTINUE => Ok(AuthRequest::SaslContinue { data: rest.to_vec() }),
            auth_type::SASL_FINAL => Ok(AuthRequest::SaslFinal { data: rest.to_vec() }),
            _ => Ok(AuthRequest::Unsupported { code }),
        }
    }
}

/// One column of a RowDescription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    /// OID of the source table, 0 if not a simple table column.
    pub table_oid: Oid,
    /// Attribute number in the source table, 0 if none.
    pub column_attr: i16,
    pub type_oid: Oid,
    /// Type size; negative for variable-length types.
    pub type_len: i16,
    /// Type modifier (e.g. varchar length).
    pub type_mod: i32,
    pub format: FormatCode,
}

impl Column {
    fn decode(data: &[u8]) -> Result<(Self, &[u8])> {
        let (name, rest) = read_cstr(data)?;
        let (table_oid, rest) = read_u32(rest)?;
        let (column_attr, rest) = read_i16(rest)?;
        let (type_oid, rest) = read_u32(rest)?;
        let (type_len, rest) = read_i16(rest)?;
        let (type_mod, rest) = read_i32(rest)?;
        let (format, rest) = read_i16(rest)?;
        Ok((
            Column {
                name: name.to_string(),
                table_oid,
                column_attr,
                type_oid,
                type_len,
                type_mod,
                format: FormatCode::from_i16(format),
            },
            rest,
        ))
    }
}

/// Asynchronous NOTIFY delivered by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// PID of the notifying backend.
    pub pid: i32,
    pub channel: String,
    /// Empty string when NOTIFY was sent without a payload.
    pub payload: String,
}

/// Header of a CopyInResponse / CopyOutResponse / CopyBothResponse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyResponse {
    pub overall_format: FormatCode,
    pub column_formats: Vec<FormatCode>,
}

impl CopyResponse {
    fn decode(payload: &[u8]) -> Result<Self> {
        let (overall, rest) = read_u8(payload)?;
        let (ncols, mut rest) = read_i16(rest)?;
        let mut column_formats = Vec::with_capacity(ncols.max(0) as usize);
        for _ in 0..ncols {
            let (fmt, r) = read_i16(rest)?;
            column_formats.push(FormatCode::from_i16(fmt));
            rest = r;
        }
        Ok(CopyResponse {
            overall_format: if overall == 1 { FormatCode::Binary } else { FormatCode::Text },
            column_formats,
        })
    }
}

/// One decoded backend message, payload owned.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendMessage {
    Authentication(AuthRequest),
    BackendKeyData { pid: i32, secret_key: i32 },
    ParameterStatus { name: String, value: String },
    ReadyForQuery(TransactionStatus),
    RowDescription(Vec<Column>),
    /// One row; `None` entries are SQL NULL (wire length -1).
    DataRow(Vec<Option<Vec<u8>>>),
    /// Command tag such as "SELECT 3" or "INSERT 0 5".
    CommandComplete(String),
    EmptyQueryResponse,
    ErrorResponse(ErrorFields),
    NoticeResponse(ErrorFields),
    NotificationResponse(Notification),
    ParseComplete,
    BindComplete,
    CloseComplete,
    ParameterDescription(Vec<Oid>),
    NoData,
    PortalSuspended,
    CopyInResponse(CopyResponse),
    CopyOutResponse(CopyResponse),
    CopyBothResponse(CopyResponse),
    CopyData(Vec<u8>),
    CopyDone,
}

impl BackendMessage {
    /// Decode one message from its type byte and complete payload
    /// (the length word already stripped).
    pub fn decode(tag: u8, payload: &[u8]) -> Result<BackendMessage> {
        match tag {
            msg_type::AUTHENTICATION => {
                Ok(BackendMessage::Authentication(AuthRequest::decode(payload)?))
            }
            msg_type::BACKEND_KEY_DATA => {
                let (pid, rest) = read_i32(payload)?;
                let (secret_key, _) = read_i32(rest)?;
                Ok(BackendMessage::BackendKeyData { pid, secret_key })
            }
            msg_type::PARAMETER_STATUS => {
                let (name, rest) = read_cstr(payload)?;
                let (value, _) = read_cstr(rest)?;
                Ok(BackendMessage::ParameterStatus {
                    name: name.to_string(),
                    value: value.to_string(),
                })
            }
            msg_type::READY_FOR_QUERY => {
                let (status, _) = read_u8(payload)?;
                let status = TransactionStatus::from_byte(status).ok_or_else(|| {
                    Error::Protocol(format!("ReadyForQuery: bad status byte 0x{status:02x}"))
                })?;
                Ok(BackendMessage::ReadyForQuery(status))
            }
            msg_type::ROW_DESCRIPTION => {
                let (ncols, mut rest) = read_i16(payload)?;
                let mut columns = Vec::with_capacity(ncols.max(0) as usize);
                for _ in 0..ncols {
                    let (col, r) = Column::decode(rest)?;
                    columns.push(col);
                    rest = r;
                }
                Ok(BackendMessage::RowDescription(columns))
            }
            msg_type::DATA_ROW => {
                let (ncols, mut rest) = read_i16(payload)?;
                let mut values = Vec::with_capacity(ncols.max(0) as usize);
                for _ in 0..ncols {
                    let (len, r) = read_i32(rest)?;
                    if len < 0 {
                        values.push(None);
                        rest = r;
                    } else {
                        let (value, r) = read_bytes(r, len as usize)?;
                        values.push(Some(value.to_vec()));
                        rest = r;
                    }
                }
                Ok(BackendMessage::DataRow(values))
            }
            msg_type::COMMAND_COMPLETE => {
                let (cmd_tag, _) = read_cstr(payload)?;
                Ok(BackendMessage::CommandComplete(cmd_tag.to_string()))
            }
            msg_type::EMPTY_QUERY_RESPONSE => Ok(BackendMessage::EmptyQueryResponse),
            msg_type::ERROR_RESPONSE => {
                Ok(BackendMessage::ErrorResponse(decode_error_fields(payload)?))
            }
            msg_type::NOTICE_RESPONSE => {
                Ok(BackendMessage::NoticeResponse(decode_error_fields(payload)?))
            }
            msg_type::NOTIFICATION_RESPONSE => {
                let (pid, rest) = read_i32(payload)?;
                let (channel, rest) = read_cstr(rest)?;
                let (notify_payload, _) = read_cstr(rest)?;
                Ok(BackendMessage::NotificationResponse(Notification {
                    pid,
                    channel: channel.to_string(),
                    payload: notify_payload.to_string(),
                }))
            }
            msg_type::PARSE_COMPLETE => Ok(BackendMessage::ParseComplete),
            msg_type::BIND_COMPLETE => Ok(BackendMessage::BindComplete),
            msg_type::CLOSE_COMPLETE => Ok(BackendMessage::CloseComplete),
            msg_type::PARAMETER_DESCRIPTION => {
                let (nparams, mut rest) = read_i16(payload)?;
                let mut oids = Vec::with_capacity(nparams.max(0) as usize);
                for _ in 0..nparams {
                    let (oid, r) = read_u32(rest)?;
                    oids.push(oid);
                    rest = r;
                }
                Ok(BackendMessage::ParameterDescription(oids))
            }
            msg_type::NO_DATA => Ok(BackendMessage::NoData),
            msg_type::PORTAL_SUSPENDED => Ok(BackendMessage::PortalSuspended),
            msg_type::COPY_IN_RESPONSE => {
                Ok(BackendMessage::CopyInResponse(CopyResponse::decode(payload)?))
            }
            msg_type::COPY_OUT_RESPONSE => {
                Ok(BackendMessage::CopyOutResponse(CopyResponse::decode(payload)?))
            }
            msg_type::COPY_BOTH_RESPONSE => {
                Ok(BackendMessage::CopyBothResponse(CopyResponse::decode(payload)?))
            }
            msg_type::COPY_DATA => Ok(BackendMessage::CopyData(payload.to_vec())),
            msg_type::COPY_DONE => Ok(BackendMessage::CopyDone),
            _ => Err(Error::Protocol(format!(
                "unknown backend message type 0x{tag:02x} ('{}')",
                tag as char
            ))),
        }
    }

    /// Type byte this message arrived with, for logging.
    pub fn tag(&self) -> u8 {
        match self {
            BackendMessage::Authentication(_) => msg_type::AUTHENTICATION,
            BackendMessage::BackendKeyData { .. } => msg_type::BACKEND_KEY_DATA,
            BackendMessage::ParameterStatus { .. } => msg_type::PARAMETER_STATUS,
            BackendMessage::ReadyForQuery(_) => msg_type::READY_FOR_QUERY,
            BackendMessage::RowDescription(_) => msg_type::ROW_DESCRIPTION,
            BackendMessage::DataRow(_) => msg_type::DATA_ROW,
            BackendMessage::CommandComplete(_) => msg_type::COMMAND_COMPLETE,
            BackendMessage::EmptyQueryResponse => msg_type::EMPTY_QUERY_RESPONSE,
            BackendMessage::ErrorResponse(_) => msg_type::ERROR_RESPONSE,
            BackendMessage::NoticeResponse(_) => msg_type::NOTICE_RESPONSE,
            BackendMessage::NotificationResponse(_) => msg_type::NOTIFICATION_RESPONSE,
            BackendMessage::ParseComplete => msg_type::PARSE_COMPLETE,
            BackendMessage::BindComplete => msg_type::BIND_COMPLETE,
            BackendMessage::CloseComplete => msg_type::CLOSE_COMPLETE,
            BackendMessage::ParameterDescription(_) => msg_type::PARAMETER_DESCRIPTION,
            BackendMessage::NoData => msg_type::NO_DATA,
            BackendMessage::PortalSuspended => msg_type::PORTAL_SUSPENDED,
            BackendMessage::CopyInResponse(_) => msg_type::COPY_IN_RESPONSE,
            BackendMessage::CopyOutResponse(_) => msg_type::COPY_OUT_RESPONSE,
            BackendMessage::CopyBothResponse(_) => msg_type::COPY_BOTH_RESPONSE,
            BackendMessage::CopyData(_) => msg_type::COPY_DATA,
            BackendMessage::CopyDone => msg_type::COPY_DONE,
        }
    }
}

/// Parse the field list of an ErrorResponse / NoticeResponse.
///
/// The payload is a sequence of (field code byte, NUL-terminated value)
/// pairs ended by a zero byte. Unknown field codes are skipped.
pub fn decode_error_fields(payload: &[u8]) -> Result<ErrorFields> {
    let mut fields = ErrorFields::default();
    let mut rest = payload;
    loop {
        let (code, r) = read_u8(rest)?;
        if code == 0 {
            break;
        }
        let (value, r) = read_cstr(r)?;
        rest = r;
        match code {
            b'S' => fields.severity = Some(value.to_string()),
            b'V' => fields.severity_non_localized = Some(value.to_string()),
            b'C' => fields.code = Some(value.to_string()),
            b'M' => fields.message = Some(value.to_string()),
            b'D' => fields.detail = Some(value.to_string()),
            b'H' => fields.hint = Some(value.to_string()),
            b'P' => fields.position = value.parse().ok(),
            b'p' => fields.internal_position = value.parse().ok(),
            b'q' => fields.internal_query = Some(value.to_string()),
            b'W' => fields.where_ = Some(value.to_string()),
            b's' => fields.schema = Some(value.to_string()),
            b't' => fields.table = Some(value.to_string()),
            b'c' => fields.column = Some(value.to_string()),
            b'd' => fields.data_type = Some(value.to_string()),
            b'n' => fields.constraint = Some(value.to_string()),
            b'F' => fields.file = Some(value.to_string()),
            b'L' => fields.line = value.parse().ok(),
            b'R' => fields.routine = Some(value.to_string()),
            _ => {}
        }
    }
    Ok(fields)
}

/// Extract the affected row count from a command tag.
///
/// "INSERT 0 5" yields 5, "UPDATE 3" yields 3, "CREATE TABLE" yields 0.
pub fn rows_affected(cmd_tag: &str) -> u64 {
    cmd_tag
        .rsplit(' ')
        .next()
        .and_then(|last| last.parse().ok())
        .unwrap_or(0)
}
