//! Query results.

use std::collections::HashMap;

use crate::error::ErrorFields;
use crate::protocol::backend::{rows_affected, Column, CopyResponse};
use crate::protocol::types::{FormatCode, Oid};

/// Outcome class of one query result, mirroring libpq's `ExecStatusType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecStatus {
    /// The query string was empty
    EmptyQuery,
    /// Command finished, no rows to return
    CommandOk,
    /// Command finished with a (possibly empty) row set
    TuplesOk,
    /// COPY TO STDOUT transfer is in progress
    CopyOut,
    /// COPY FROM STDIN transfer is in progress
    CopyIn,
    /// Streaming replication copy is in progress
    CopyBoth,
    /// The server reply could not be understood
    BadResponse,
    /// A notice, retained when collected as a result
    NonfatalError,
    /// The server reported an error
    FatalError,
    /// One row of a single-row-mode stream
    SingleTuple,
}

impl ExecStatus {
    /// Whether this result reports success.
    pub fn is_ok(self) -> bool {
        !matches!(
            self,
            ExecStatus::BadResponse | ExecStatus::NonfatalError | ExecStatus::FatalError
        )
    }
}

/// One accumulated query result: column metadata plus the rows that arrived
/// for it, or the error that ended it.
///
/// Values are raw wire bytes; `None` is SQL NULL.
#[derive(Debug, Clone)]
pub struct QueryResult {
    status: ExecStatus,
    columns: Vec<Column>,
    name_index: HashMap<String, usize>,
    rows: Vec<Vec<Option<Vec<u8>>>>,
    cmd_tag: Option<String>,
    error: Option<ErrorFields>,
    copy: Option<CopyResponse>,
    param_oids: Vec<Oid>,
}

impl QueryResult {
    pub(crate) fn new(status: ExecStatus) -> Self {
        Self {
            status,
            columns: Vec::new(),
            name_index: HashMap::new(),
            rows: Vec::new(),
            cmd_tag: None,
            error: None,
            copy: None,
            param_oids: Vec::new(),
        }
    }

    pub(crate) fn with_columns(status: ExecStatus, columns: Vec<Column>) -> Self {
        let mut result = Self::new(status);
        result.set_columns(columns);
        result
    }

    pub(crate) fn from_error(fields: ErrorFields) -> Self {
        let mut result = Self::new(ExecStatus::FatalError);
        result.error = Some(fields);
        result
    }

    pub(crate) fn bad_response(message: &str) -> Self {
        let mut result = Self::new(ExecStatus::BadResponse);
        result.error = Some(ErrorFields {
            severity: Some("ERROR".into()),
            message: Some(message.to_string()),
            ..Default::default()
        });
        result
    }

    pub(crate) fn from_copy(status: ExecStatus, copy: CopyResponse) -> Self {
        let mut result = Self::new(status);
        result.copy = Some(copy);
        result
    }

    pub(crate) fn set_columns(&mut self, columns: Vec<Column>) {
        // First column wins on duplicate names, like PQfnumber.
        self.name_index = HashMap::with_capacity(columns.len());
        for (i, col) in columns.iter().enumerate() {
            self.name_index.entry(col.name.clone()).or_insert(i);
        }
        self.columns = columns;
    }

    pub(crate) fn set_cmd_tag(&mut self, tag: &str) {
        self.cmd_tag = Some(tag.to_string());
    }

    pub(crate) fn push_row(&mut self, row: Vec<Option<Vec<u8>>>) {
        self.rows.push(row);
    }

    /// Split off a one-row result sharing this result's metadata.
    pub(crate) fn single_tuple(&self, row: Vec<Option<Vec<u8>>>) -> Self {
        let mut single = Self::with_columns(ExecStatus::SingleTuple, self.columns.clone());
        single.rows.push(row);
        single
    }

    pub fn status(&self) -> ExecStatus {
        self.status
    }

    /// Number of rows.
    pub fn ntuples(&self) -> usize {
        self.rows.len()
    }

    /// Number of columns.
    pub fn nfields(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, index: usize) -> Option<&Column> {
        self.columns.get(index)
    }

    /// Column index for a name, first match wins.
    pub fn field_number(&self, name: &str) -> Option<usize> {
        self.name_index.get(name).copied()
    }

    pub fn field_name(&self, index: usize) -> Option<&str> {
        self.columns.get(index).map(|c| c.name.as_str())
    }

    pub fn field_type(&self, index: usize) -> Option<Oid> {
        self.columns.get(index).map(|c| c.type_oid)
    }

    pub fn field_format(&self, index: usize) -> Option<FormatCode> {
        self.columns.get(index).map(|c| c.format)
    }

    /// Raw value bytes at (row, column); `None` if NULL or out of range.
    pub fn value(&self, row: usize, column: usize) -> Option<&[u8]> {
        self.rows
            .get(row)?
            .get(column)?
            .as_deref()
    }

    /// Whether the value at (row, column) is SQL NULL. Out-of-range
    /// positions read as NULL.
    pub fn is_null(&self, row: usize, column: usize) -> bool {
        match self.rows.get(row).and_then(|r| r.get(column)) {
            Some(value) => value.is_none(),
            None => true,
        }
    }

    pub fn rows(&self) -> &[Vec<Option<Vec<u8>>>] {
        &self.rows
    }

    /// Command tag reported by CommandComplete, e.g. "SELECT 3".
    pub fn cmd_status(&self) -> Option<&str> {
        self.cmd_tag.as_deref()
    }

    /// Rows affected according to the command tag.
    pub fn rows_affected(&self) -> u64 {
        self.cmd_tag.as_deref().map(rows_affected).unwrap_or(0)
    }

    /// Error fields when `status` is `FatalError` or `NonfatalError`.
    pub fn error_fields(&self) -> Option<&ErrorFields> {
        self.error.as_ref()
    }

    pub fn error_message(&self) -> Option<String> {
        self.error.as_ref().map(|e| e.to_string())
    }

    /// Per-column format codes of a COPY transfer.
    pub fn copy_response(&self) -> Option<&CopyResponse> {
        self.copy.as_ref()
    }

    pub(crate) fn set_param_oids(&mut self, oids: Vec<Oid>) {
        self.param_oids = oids;
    }

    /// Parameter type OIDs from describing a prepared statement.
    pub fn param_types(&self) -> &[Oid] {
        &self.param_oids
    }
}
