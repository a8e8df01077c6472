//! Error types for pglink.

use thiserror::Error;

/// Result type for pglink operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Fields of a PostgreSQL ErrorResponse or NoticeResponse.
///
/// Every field the backend may send is preserved so callers can inspect
/// SQLSTATE, position, hints etc. programmatically.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorFields {
    /// Severity: ERROR, FATAL, PANIC, WARNING, NOTICE, DEBUG, INFO, LOG
    pub severity: Option<String>,
    /// Non-localized severity (never translated, PostgreSQL 9.6+)
    pub severity_non_localized: Option<String>,
    /// SQLSTATE error code (5 characters)
    pub code: Option<String>,
    /// Primary error message
    pub message: Option<String>,
    /// Detailed error explanation
    pub detail: Option<String>,
    /// Suggestion for fixing the error
    pub hint: Option<String>,
    /// Cursor position in the query string (1-based)
    pub position: Option<u32>,
    /// Position in an internally-generated query
    pub internal_position: Option<u32>,
    /// Text of the failed internally-generated query
    pub internal_query: Option<String>,
    /// Context / call stack
    pub where_: Option<String>,
    /// Schema name
    pub schema: Option<String>,
    /// Table name
    pub table: Option<String>,
    /// Column name
    pub column: Option<String>,
    /// Data type name
    pub data_type: Option<String>,
    /// Constraint name
    pub constraint: Option<String>,
    /// Source file name
    pub file: Option<String>,
    /// Source line number
    pub line: Option<u32>,
    /// Source routine name
    pub routine: Option<String>,
}

impl ErrorFields {
    /// Look up a field by its wire field code (e.g. `b'C'` for SQLSTATE).
    ///
    /// Numeric fields are rendered back to their decimal string form.
    pub fn get(&self, field_code: u8) -> Option<String> {
        match field_code {
            b'S' => self.severity.clone(),
            b'V' => self.severity_non_localized.clone(),
            b'C' => self.code.clone(),
            b'M' => self.message.clone(),
            b'D' => self.detail.clone(),
            b'H' => self.hint.clone(),
            b'P' => self.position.map(|p| p.to_string()),
            b'p' => self.internal_position.map(|p| p.to_string()),
            b'q' => self.internal_query.clone(),
            b'W' => self.where_.clone(),
            b's' => self.schema.clone(),
            b't' => self.table.clone(),
            b'c' => self.column.clone(),
            b'd' => self.data_type.clone(),
            b'n' => self.constraint.clone(),
            b'F' => self.file.clone(),
            b'L' => self.line.map(|l| l.to_string()),
            b'R' => self.routine.clone(),
            _ => None,
        }
    }
}

impl std::fmt::Display for ErrorFields {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(severity) = &self.severity {
            write!(f, "{}: ", severity)?;
        }
        if let Some(message) = &self.message {
            write!(f, "{}", message)?;
        }
        if let Some(code) = &self.code {
            write!(f, " (SQLSTATE {})", code)?;
        }
        if let Some(detail) = &self.detail {
            write!(f, "\nDETAIL: {}", detail)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\nHINT: {}", hint)?;
        }
        Ok(())
    }
}

/// Error type for pglink.
#[derive(Debug, Error)]
pub enum Error {
    /// Server error response
    #[error("PostgreSQL error: {0}")]
    Server(ErrorFields),

    /// Protocol error (malformed message, unexpected response, etc.)
    ///
    /// The byte stream cannot be trusted once a framing assumption is
    /// violated, so these are fatal to the connection.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// TLS error
    #[cfg(feature = "tls")]
    #[error("TLS error: {0}")]
    Tls(#[from] native_tls::Error),

    /// Connection is broken and cannot be reused
    #[error("Connection is broken")]
    ConnectionBroken,

    /// Invalid usage (e.g. dispatching a query while busy)
    #[error("Invalid usage: {0}")]
    InvalidUsage(String),

    /// Unsupported protocol feature
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl Error {
    /// Returns true if the error means the connection cannot be reused.
    pub fn is_connection_broken(&self) -> bool {
        match self {
            Error::Io(_) | Error::ConnectionBroken | Error::Protocol(_) => true,
            Error::Server(fields) => {
                matches!(fields.severity.as_deref(), Some("FATAL") | Some("PANIC"))
            }
            _ => false,
        }
    }

    /// Get the SQLSTATE code if this is a server error.
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Server(fields) => fields.code.as_deref(),
            _ => None,
        }
    }

    /// Classify a server error by its SQLSTATE class.
    pub fn sqlstate_class(&self) -> Option<SqlStateClass> {
        self.sqlstate().map(SqlStateClass::of)
    }
}

impl From<std::convert::Infallible> for Error {
    fn from(infallible: std::convert::Infallible) -> Self {
        match infallible {}
    }
}

/// Coarse SQLSTATE classification (the two-character class prefix).
///
/// One error type plus a classification lookup, instead of an exception
/// subtype per SQLSTATE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlStateClass {
    SuccessfulCompletion,
    Warning,
    NoData,
    ConnectionException,
    DataException,
    IntegrityConstraintViolation,
    InvalidTransactionState,
    InvalidAuthorizationSpecification,
    SyntaxErrorOrAccessRuleViolation,
    InsufficientResources,
    ProgramLimitExceeded,
    OperatorIntervention,
    SystemError,
    InternalError,
    Other,
}

impl SqlStateClass {
    /// Classify a 5-character SQLSTATE by its class prefix.
    pub fn of(code: &str) -> Self {
        match code.get(..2) {
            Some("00") => SqlStateClass::SuccessfulCompletion,
            Some("01") => SqlStateClass::Warning,
            Some("02") => SqlStateClass::NoData,
            Some("08") => SqlStateClass::ConnectionException,
            Some("22") => SqlStateClass::DataException,
            Some("23") => SqlStateClass::IntegrityConstraintViolation,
            Some("25") => SqlStateClass::InvalidTransactionState,
            Some("28") => SqlStateClass::InvalidAuthorizationSpecification,
            Some("42") => SqlStateClass::SyntaxErrorOrAccessRuleViolation,
            Some("53") => SqlStateClass::InsufficientResources,
            Some("54") => SqlStateClass::ProgramLimitExceeded,
            Some("57") => SqlStateClass::OperatorIntervention,
            Some("58") => SqlStateClass::SystemError,
            Some("XX") => SqlStateClass::InternalError,
            _ => SqlStateClass::Other,
        }
    }
}

/// SQLSTATE reported while the server is starting up or shutting down.
/// Ping classification uses it to distinguish "server not accepting
/// connections" from other failures.
pub const ERRCODE_CANNOT_CONNECT_NOW: &str = "57P03";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlstate_class_prefixes() {
        assert_eq!(
            SqlStateClass::of("57P03"),
            SqlStateClass::OperatorIntervention
        );
        assert_eq!(
            SqlStateClass::of("28P01"),
            SqlStateClass::InvalidAuthorizationSpecification
        );
        assert_eq!(
            SqlStateClass::of("23505"),
            SqlStateClass::IntegrityConstraintViolation
        );
        assert_eq!(SqlStateClass::of("Z9999"), SqlStateClass::Other);
        assert_eq!(SqlStateClass::of(""), SqlStateClass::Other);
    }

    #[test]
    fn error_fields_lookup_by_code() {
        let fields = ErrorFields {
            code: Some("42601".into()),
            message: Some("syntax error".into()),
            position: Some(12),
            ..Default::default()
        };
        assert_eq!(fields.get(b'C').as_deref(), Some("42601"));
        assert_eq!(fields.get(b'M').as_deref(), Some("syntax error"));
        assert_eq!(fields.get(b'P').as_deref(), Some("12"));
        assert_eq!(fields.get(b'H'), None);
    }

    #[test]
    fn fatal_severity_breaks_connection() {
        let err = Error::Server(ErrorFields {
            severity: Some("FATAL".into()),
            ..Default::default()
        });
        assert!(err.is_connection_broken());

        let err = Error::Server(ErrorFields {
            severity: Some("ERROR".into()),
            ..Default::default()
        });
        assert!(!err.is_connection_broken());
    }
}
