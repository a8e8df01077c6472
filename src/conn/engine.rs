//! Sans-I/O protocol engine.
//!
//! [`Engine`] owns every piece of connection state the protocol defines and
//! consumes framed backend messages; it never touches a socket. The
//! [`Connection`](super::Connection) facade moves bytes between the
//! transport and this engine and blocks where its API is synchronous.
//!
//! Two status axes drive dispatch. [`ConnectionStatus`] tracks startup and
//! only ever moves forward (or to `Bad`). [`AsyncStatus`] tracks the query
//! cycle: `Idle` between queries, `Busy` while responses are being parsed,
//! `Ready` when a result can be handed out, and the three copy states
//! while a COPY transfer owns the stream.

use std::collections::{HashMap, VecDeque};

use tracing::{debug, trace};

use crate::error::{Error, ErrorFields, Result};
use crate::protocol::backend::{msg_type, BackendMessage, Notification};
use crate::protocol::frame::ReadBuffer;
use crate::protocol::types::TransactionStatus;
use crate::result::{ExecStatus, QueryResult};

use super::startup::AuthState;

/// Startup progress, one step per server round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Nothing attempted yet
    Needed,
    /// TCP connect in flight
    Started,
    /// Socket connected, startup packet not sent
    Made,
    /// SSLRequest sent, waiting for the one-byte verdict
    SslStartup,
    /// StartupMessage sent, authenticating
    AwaitingResponse,
    /// Authentication succeeded, waiting for ReadyForQuery
    AuthOk,
    /// Fully established
    Ok,
    /// Unusable
    Bad,
}

/// Where the connection is in the query cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncStatus {
    Idle,
    Busy,
    Ready,
    CopyIn,
    CopyOut,
    CopyBoth,
}

/// What kind of command sequence is in flight. Dispatch differs: a Describe
/// sequence ends at RowDescription or NoData, a Prepare at ParseComplete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryClass {
    Simple,
    Extended,
    Prepare,
    Describe,
}

/// One step of draining a COPY OUT stream.
#[derive(Debug, PartialEq, Eq)]
pub enum CopyOut {
    /// One CopyData payload
    Data(Vec<u8>),
    /// The transfer ended; fetch results as usual
    Done,
    /// Nothing buffered, read more from the socket
    NeedRead,
}

/// Protocol state machine, fed with raw bytes and drained of results.
pub struct Engine {
    read: ReadBuffer,
    status: ConnectionStatus,
    async_status: AsyncStatus,
    transaction_status: TransactionStatus,
    query_class: QueryClass,
    single_row_mode: bool,
    /// An ErrorResponse arrived; rows still in flight are discarded until
    /// the next ReadyForQuery.
    draining_rows: bool,

    result: Option<QueryResult>,
    /// Accumulating result shelved while a single-row result is pending.
    next_result: Option<QueryResult>,

    auth: AuthState,
    backend_pid: i32,
    backend_secret: i32,
    server_params: HashMap<String, String>,
    notifications: VecDeque<Notification>,
    notices: VecDeque<ErrorFields>,

    /// The server asked for credentials at some point; ping uses this to
    /// tell "wrong password" from "server not accepting connections".
    auth_req_received: bool,
    last_sqlstate: Option<String>,
}

impl Engine {
    pub fn new() -> Self {
        Self {
            read: ReadBuffer::new(),
            status: ConnectionStatus::Needed,
            async_status: AsyncStatus::Idle,
            transaction_status: TransactionStatus::Idle,
            query_class: QueryClass::Simple,
            single_row_mode: false,
            draining_rows: false,
            result: None,
            next_result: None,
            auth: AuthState::new(),
            backend_pid: 0,
            backend_secret: 0,
            server_params: HashMap::new(),
            notifications: VecDeque::new(),
            notices: VecDeque::new(),
            auth_req_received: false,
            last_sqlstate: None,
        }
    }

    // -- byte intake ------------------------------------------------------

    /// Buffer bytes read from the socket.
    pub fn feed(&mut self, data: &[u8]) {
        self.read.extend(data);
    }

    /// Decode the next complete message, async ones included.
    pub fn next_message(&mut self) -> Result<Option<BackendMessage>> {
        match self.read.next_message()? {
            Some((tag, payload)) => {
                let msg = BackendMessage::decode(tag, &payload)?;
                trace!(tag = %(tag as char), "backend message");
                Ok(Some(msg))
            }
            None => Ok(None),
        }
    }

    fn next_tag_is(&self, tags: &[u8]) -> Result<bool> {
        Ok(match self.read.peek_type()? {
            Some(tag) => tags.contains(&tag),
            None => false,
        })
    }

    // -- accessors --------------------------------------------------------

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub(crate) fn set_status(&mut self, status: ConnectionStatus) {
        self.status = status;
    }

    pub fn async_status(&self) -> AsyncStatus {
        self.async_status
    }

    /// Transaction status: `Unknown` on an unusable connection, `Active`
    /// while a command is in flight, otherwise as of the last ReadyForQuery.
    pub fn transaction_status(&self) -> TransactionStatus {
        if self.status != ConnectionStatus::Ok {
            TransactionStatus::Unknown
        } else if self.async_status != AsyncStatus::Idle {
            TransactionStatus::Active
        } else {
            self.transaction_status
        }
    }

    pub fn query_class(&self) -> QueryClass {
        self.query_class
    }

    pub fn backend_pid(&self) -> i32 {
        self.backend_pid
    }

    pub fn backend_secret(&self) -> i32 {
        self.backend_secret
    }

    pub fn parameter_status(&self, name: &str) -> Option<&str> {
        self.server_params.get(name).map(String::as_str)
    }

    pub fn take_notification(&mut self) -> Option<Notification> {
        self.notifications.pop_front()
    }

    pub(crate) fn take_notice(&mut self) -> Option<ErrorFields> {
        self.notices.pop_front()
    }

    pub(crate) fn auth_req_received(&self) -> bool {
        self.auth_req_received
    }

    pub(crate) fn last_sqlstate(&self) -> Option<&str> {
        self.last_sqlstate.as_deref()
    }

    // -- startup ----------------------------------------------------------

    /// Process one message of the startup conversation.
    ///
    /// Replies (password messages, SASL rounds) are appended to `out`.
    /// Returns `true` once ReadyForQuery arrives and the connection is
    /// usable.
    pub fn process_startup(
        &mut self,
        msg: BackendMessage,
        user: &str,
        password: Option<&str>,
        out: &mut Vec<u8>,
    ) -> Result<bool> {
        match msg {
            BackendMessage::Authentication(req) => {
                self.auth_req_received = true;
                self.auth.respond(&req, user, password, out)?;
                if req == crate::protocol::backend::AuthRequest::Ok {
                    self.status = ConnectionStatus::AuthOk;
                }
                Ok(false)
            }
            BackendMessage::BackendKeyData { pid, secret_key } => {
                self.backend_pid = pid;
                self.backend_secret = secret_key;
                Ok(false)
            }
            BackendMessage::ParameterStatus { name, value } => {
                self.server_params.insert(name, value);
                Ok(false)
            }
            BackendMessage::NoticeResponse(fields) => {
                self.notices.push_back(fields);
                Ok(false)
            }
            BackendMessage::ReadyForQuery(tx) => {
                self.transaction_status = tx;
                self.status = ConnectionStatus::Ok;
                self.async_status = AsyncStatus::Idle;
                debug!(backend_pid = self.backend_pid, "connection established");
                Ok(true)
            }
            BackendMessage::ErrorResponse(fields) => {
                self.last_sqlstate = fields.code.clone();
                self.status = ConnectionStatus::Bad;
                Err(Error::Server(fields))
            }
            other => Err(Error::Protocol(format!(
                "unexpected message during startup: '{}'",
                other.tag() as char
            ))),
        }
    }

    // -- query lifecycle --------------------------------------------------

    /// Reset per-query state and mark the connection busy. Fails when the
    /// connection is bad or a previous command is still being collected.
    pub fn start_query(&mut self, class: QueryClass) -> Result<()> {
        if self.status != ConnectionStatus::Ok {
            return Err(Error::ConnectionBroken);
        }
        if self.async_status != AsyncStatus::Idle {
            return Err(Error::InvalidUsage(
                "another command is already in progress".into(),
            ));
        }
        self.result = None;
        self.next_result = None;
        self.single_row_mode = false;
        self.draining_rows = false;
        self.query_class = class;
        self.async_status = AsyncStatus::Busy;
        Ok(())
    }

    /// Switch the current query to row-at-a-time result delivery.
    ///
    /// Only valid right after dispatching a Simple or Extended query,
    /// before any response has been parsed.
    pub fn set_single_row_mode(&mut self) -> Result<()> {
        if self.async_status != AsyncStatus::Busy {
            return Err(Error::InvalidUsage("connection is not busy".into()));
        }
        if !matches!(self.query_class, QueryClass::Simple | QueryClass::Extended) {
            return Err(Error::InvalidUsage(
                "connection is not executing a query".into(),
            ));
        }
        if self.result.is_some() {
            return Err(Error::InvalidUsage("a result was already received".into()));
        }
        self.single_row_mode = true;
        Ok(())
    }

    /// Parse as much buffered input as the current state allows.
    ///
    /// Asynchronous messages are handled in any state. Everything else is
    /// only consumed while `Busy`; buffered frames sit untouched during
    /// copy states and between queries.
    ///
    /// A protocol error means the stream can no longer be trusted; the
    /// connection is marked bad and never resynchronized.
    pub fn parse_input(&mut self) -> Result<()> {
        let parsed = self.parse_messages();
        if matches!(parsed, Err(Error::Protocol(_))) {
            self.mark_broken();
        }
        parsed
    }

    fn parse_messages(&mut self) -> Result<()> {
        loop {
            if self.next_tag_is(&[
                msg_type::PARAMETER_STATUS,
                msg_type::NOTIFICATION_RESPONSE,
                msg_type::NOTICE_RESPONSE,
            ])? {
                match self.next_message()? {
                    Some(msg) => {
                        self.handle_async(msg);
                        continue;
                    }
                    None => return Ok(()),
                }
            }

            if self.async_status != AsyncStatus::Busy {
                return Ok(());
            }

            let Some(msg) = self.next_message()? else {
                return Ok(());
            };
            self.dispatch(msg)?;
        }
    }

    /// `true` while responses are still being collected, meaning a call to
    /// fetch the next result would have to read from the socket.
    pub fn is_busy(&mut self) -> Result<bool> {
        self.parse_input()?;
        Ok(self.async_status == AsyncStatus::Busy)
    }

    /// Hand out the next finished result, `None` once the query cycle is
    /// back to idle. Must only be called when not busy.
    pub fn take_result(&mut self) -> Option<QueryResult> {
        match self.async_status {
            AsyncStatus::Idle => None,
            AsyncStatus::Ready => {
                let res = self.swap_in_next_result();
                self.async_status = AsyncStatus::Busy;
                Some(res)
            }
            AsyncStatus::CopyIn => self.copy_state_result(ExecStatus::CopyIn),
            AsyncStatus::CopyOut => self.copy_state_result(ExecStatus::CopyOut),
            AsyncStatus::CopyBoth => self.copy_state_result(ExecStatus::CopyBoth),
            AsyncStatus::Busy => Some(QueryResult::bad_response(
                "result requested while still busy",
            )),
        }
    }

    fn swap_in_next_result(&mut self) -> QueryResult {
        let res = self
            .result
            .take()
            .unwrap_or_else(|| QueryResult::bad_response("no result was produced"));
        self.result = self.next_result.take();
        res
    }

    fn copy_state_result(&mut self, status: ExecStatus) -> Option<QueryResult> {
        if self.result.as_ref().map(QueryResult::status) == Some(status) {
            Some(self.swap_in_next_result())
        } else {
            Some(QueryResult::new(status))
        }
    }

    fn handle_async(&mut self, msg: BackendMessage) {
        match msg {
            BackendMessage::ParameterStatus { name, value } => {
                debug!(name = %name, value = %value, "parameter status");
                self.server_params.insert(name, value);
            }
            BackendMessage::NotificationResponse(n) => {
                self.notifications.push_back(n);
            }
            BackendMessage::NoticeResponse(fields) => {
                debug!(notice = %fields, "server notice");
                self.notices.push_back(fields);
            }
            // callers only pass the three async types
            _ => {}
        }
    }

    fn dispatch(&mut self, msg: BackendMessage) -> Result<()> {
        match msg {
            BackendMessage::CommandComplete(tag) => {
                let result = self
                    .result
                    .get_or_insert_with(|| QueryResult::new(ExecStatus::CommandOk));
                result.set_cmd_tag(&tag);
                self.async_status = AsyncStatus::Ready;
            }

            BackendMessage::ErrorResponse(fields) => {
                self.last_sqlstate = fields.code.clone();
                self.result = Some(QueryResult::from_error(fields));
                self.draining_rows = true;
                self.async_status = AsyncStatus::Ready;
            }

            BackendMessage::EmptyQueryResponse => {
                self.result = Some(QueryResult::new(ExecStatus::EmptyQuery));
                self.async_status = AsyncStatus::Ready;
            }

            BackendMessage::ReadyForQuery(tx) => {
                self.transaction_status = tx;
                self.draining_rows = false;
                self.async_status = AsyncStatus::Idle;
            }

            BackendMessage::ParseComplete => {
                // Ends a bare prepare; part of the pipeline otherwise.
                if self.query_class == QueryClass::Prepare {
                    if self.result.is_none() {
                        self.result = Some(QueryResult::new(ExecStatus::CommandOk));
                    }
                    self.async_status = AsyncStatus::Ready;
                }
            }

            BackendMessage::BindComplete | BackendMessage::CloseComplete => {}

            BackendMessage::PortalSuspended => {
                // row-limited Execute; the portal still holds rows
                self.result
                    .get_or_insert_with(|| QueryResult::new(ExecStatus::CommandOk));
                self.async_status = AsyncStatus::Ready;
            }

            BackendMessage::ParameterDescription(oids) => {
                let mut result = QueryResult::new(ExecStatus::CommandOk);
                result.set_param_oids(oids);
                self.result = Some(result);
            }

            BackendMessage::RowDescription(columns) => {
                if self.result.is_some() && self.query_class != QueryClass::Describe {
                    return Err(Error::Protocol(
                        "RowDescription while a result is already pending".into(),
                    ));
                }
                match &mut self.result {
                    Some(result) => result.set_columns(columns),
                    None => {
                        let status = if self.query_class == QueryClass::Describe {
                            ExecStatus::CommandOk
                        } else {
                            ExecStatus::TuplesOk
                        };
                        self.result = Some(QueryResult::with_columns(status, columns));
                    }
                }
                if self.query_class == QueryClass::Describe {
                    self.async_status = AsyncStatus::Ready;
                }
            }

            BackendMessage::NoData => {
                // The described statement returns no rows.
                if self.query_class == QueryClass::Describe {
                    if self.result.is_none() {
                        self.result = Some(QueryResult::new(ExecStatus::CommandOk));
                    }
                    self.async_status = AsyncStatus::Ready;
                }
            }

            BackendMessage::DataRow(row) => {
                // rows still in flight after an error are discarded
                if self.draining_rows {
                    return Ok(());
                }
                let Some(result) = &mut self.result else {
                    return Err(Error::Protocol(
                        "DataRow without a preceding RowDescription".into(),
                    ));
                };
                if result.status() != ExecStatus::TuplesOk {
                    return Err(Error::Protocol(
                        "DataRow without a preceding RowDescription".into(),
                    ));
                }
                if self.single_row_mode {
                    let single = result.single_tuple(row);
                    self.next_result = self.result.take();
                    self.result = Some(single);
                    self.async_status = AsyncStatus::Ready;
                } else {
                    result.push_row(row);
                }
            }

            BackendMessage::CopyInResponse(copy) => {
                self.result = Some(QueryResult::from_copy(ExecStatus::CopyIn, copy));
                self.async_status = AsyncStatus::CopyIn;
            }

            BackendMessage::CopyOutResponse(copy) => {
                self.result = Some(QueryResult::from_copy(ExecStatus::CopyOut, copy));
                self.async_status = AsyncStatus::CopyOut;
            }

            BackendMessage::CopyBothResponse(copy) => {
                self.result = Some(QueryResult::from_copy(ExecStatus::CopyBoth, copy));
                self.async_status = AsyncStatus::CopyBoth;
            }

            // stray copy traffic after leaving copy mode early
            BackendMessage::CopyData(_) | BackendMessage::CopyDone => {}

            other => {
                self.result = Some(QueryResult::bad_response(&format!(
                    "unexpected response '{}'",
                    other.tag() as char
                )));
                self.async_status = AsyncStatus::Ready;
            }
        }
        Ok(())
    }

    // -- copy transfers ---------------------------------------------------

    /// Whether CopyData may be sent right now.
    pub fn can_put_copy_data(&self) -> bool {
        matches!(
            self.async_status,
            AsyncStatus::CopyIn | AsyncStatus::CopyBoth
        )
    }

    /// Leave the copy-in state after CopyDone or CopyFail was queued.
    pub fn end_copy_in(&mut self) {
        self.result = None;
        self.async_status = if self.async_status == AsyncStatus::CopyBoth {
            AsyncStatus::CopyOut
        } else {
            AsyncStatus::Busy
        };
    }

    /// Whether CopyData may be received right now.
    pub fn in_copy_out(&self) -> bool {
        matches!(
            self.async_status,
            AsyncStatus::CopyOut | AsyncStatus::CopyBoth
        )
    }

    /// Pull the next step of a COPY OUT transfer from the buffer.
    ///
    /// Async messages in the stream are absorbed. Any message other than
    /// CopyData or CopyDone also ends the transfer and is left buffered
    /// for [`parse_input`](Self::parse_input).
    pub fn poll_copy_out(&mut self) -> Result<CopyOut> {
        let polled = self.next_copy_chunk();
        if matches!(polled, Err(Error::Protocol(_))) {
            self.mark_broken();
        }
        polled
    }

    fn next_copy_chunk(&mut self) -> Result<CopyOut> {
        loop {
            let Some(tag) = self.read.peek_type()? else {
                return Ok(CopyOut::NeedRead);
            };

            match tag {
                msg_type::PARAMETER_STATUS
                | msg_type::NOTIFICATION_RESPONSE
                | msg_type::NOTICE_RESPONSE => match self.next_message()? {
                    Some(msg) => self.handle_async(msg),
                    None => return Ok(CopyOut::NeedRead),
                },
                msg_type::COPY_DATA | msg_type::COPY_DONE => match self.next_message()? {
                    Some(BackendMessage::CopyData(data)) => return Ok(CopyOut::Data(data)),
                    Some(BackendMessage::CopyDone) => {
                        self.async_status = if self.async_status == AsyncStatus::CopyBoth {
                            AsyncStatus::CopyIn
                        } else {
                            AsyncStatus::Busy
                        };
                        self.result = None;
                        return Ok(CopyOut::Done);
                    }
                    Some(other) => {
                        return Err(Error::Protocol(format!(
                            "copy stream desynchronized at '{}'",
                            other.tag() as char
                        )));
                    }
                    None => return Ok(CopyOut::NeedRead),
                },
                _ => {
                    // ErrorResponse or CommandComplete; the normal result
                    // path takes over from here.
                    self.async_status = AsyncStatus::Busy;
                    return Ok(CopyOut::Done);
                }
            }
        }
    }

    /// Tear down all protocol state after a fatal transport error.
    pub fn mark_broken(&mut self) {
        self.status = ConnectionStatus::Bad;
        self.async_status = AsyncStatus::Idle;
        self.read.clear();
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(tag: u8, payload: &[u8]) -> Vec<u8> {
        let mut f = vec![tag];
        f.extend_from_slice(&(4 + payload.len() as i32).to_be_bytes());
        f.extend_from_slice(payload);
        f
    }

    fn row_description(names: &[&str]) -> Vec<u8> {
        let mut p = (names.len() as i16).to_be_bytes().to_vec();
        for name in names {
            p.extend_from_slice(name.as_bytes());
            p.push(0);
            p.extend_from_slice(&0u32.to_be_bytes());
            p.extend_from_slice(&0i16.to_be_bytes());
            p.extend_from_slice(&25u32.to_be_bytes());
            p.extend_from_slice(&(-1i16).to_be_bytes());
            p.extend_from_slice(&(-1i32).to_be_bytes());
            p.extend_from_slice(&0i16.to_be_bytes());
        }
        frame(b'T', &p)
    }

    fn data_row(values: &[Option<&[u8]>]) -> Vec<u8> {
        let mut p = (values.len() as i16).to_be_bytes().to_vec();
        for v in values {
            match v {
                Some(v) => {
                    p.extend_from_slice(&(v.len() as i32).to_be_bytes());
                    p.extend_from_slice(v);
                }
                None => p.extend_from_slice(&(-1i32).to_be_bytes()),
            }
        }
        frame(b'D', &p)
    }

    fn command_complete(tag: &str) -> Vec<u8> {
        let mut p = tag.as_bytes().to_vec();
        p.push(0);
        frame(b'C', &p)
    }

    fn ready(status: u8) -> Vec<u8> {
        frame(b'Z', &[status])
    }

    fn ready_engine() -> Engine {
        let mut engine = Engine::new();
        engine.set_status(ConnectionStatus::Ok);
        engine
    }

    #[test]
    fn simple_query_cycle() {
        let mut e = ready_engine();
        e.start_query(QueryClass::Simple).unwrap();

        e.feed(&row_description(&["n"]));
        e.feed(&data_row(&[Some(b"1")]));
        e.feed(&data_row(&[None]));
        e.feed(&command_complete("SELECT 2"));
        e.feed(&ready(b'I'));

        assert!(!e.is_busy().unwrap());
        let res = e.take_result().unwrap();
        assert_eq!(res.status(), ExecStatus::TuplesOk);
        assert_eq!(res.ntuples(), 2);
        assert_eq!(res.value(0, 0), Some(&b"1"[..]));
        assert!(res.is_null(1, 0));
        assert_eq!(res.cmd_status(), Some("SELECT 2"));

        assert!(!e.is_busy().unwrap());
        assert!(e.take_result().is_none());
        assert_eq!(e.async_status(), AsyncStatus::Idle);
    }

    #[test]
    fn multi_statement_query() {
        let mut e = ready_engine();
        e.start_query(QueryClass::Simple).unwrap();

        e.feed(&command_complete("CREATE TABLE"));
        e.feed(&row_description(&["x"]));
        e.feed(&data_row(&[Some(b"9")]));
        e.feed(&command_complete("SELECT 1"));
        e.feed(&ready(b'I'));

        assert!(!e.is_busy().unwrap());
        let first = e.take_result().unwrap();
        assert_eq!(first.status(), ExecStatus::CommandOk);
        assert_eq!(first.cmd_status(), Some("CREATE TABLE"));

        assert!(!e.is_busy().unwrap());
        let second = e.take_result().unwrap();
        assert_eq!(second.status(), ExecStatus::TuplesOk);
        assert_eq!(second.ntuples(), 1);

        assert!(!e.is_busy().unwrap());
        assert!(e.take_result().is_none());
    }

    #[test]
    fn error_response_replaces_partial_result() {
        let mut e = ready_engine();
        e.start_query(QueryClass::Simple).unwrap();

        e.feed(&row_description(&["n"]));
        e.feed(&data_row(&[Some(b"1")]));
        e.feed(&frame(b'E', b"SERROR\0C22012\0Mdivision by zero\0\0"));
        // server may still flush rows already in flight
        e.feed(&data_row(&[Some(b"2")]));
        e.feed(&ready(b'I'));

        assert!(!e.is_busy().unwrap());
        let res = e.take_result().unwrap();
        assert_eq!(res.status(), ExecStatus::FatalError);
        assert_eq!(res.error_fields().unwrap().code.as_deref(), Some("22012"));
        assert_eq!(res.ntuples(), 0);
        assert!(!e.is_busy().unwrap());
        assert!(e.take_result().is_none());
    }

    #[test]
    fn data_row_before_row_description_is_protocol_error() {
        let mut e = ready_engine();
        e.start_query(QueryClass::Simple).unwrap();
        e.feed(&data_row(&[Some(b"1")]));
        assert!(matches!(e.parse_input(), Err(Error::Protocol(_))));
        // the stream is desynchronized, so the connection is unusable
        assert_eq!(e.status(), ConnectionStatus::Bad);
        assert!(matches!(
            e.start_query(QueryClass::Simple),
            Err(Error::ConnectionBroken)
        ));
    }

    #[test]
    fn single_row_mode_streams_rows() {
        let mut e = ready_engine();
        e.start_query(QueryClass::Simple).unwrap();
        e.set_single_row_mode().unwrap();

        e.feed(&row_description(&["n"]));
        e.feed(&data_row(&[Some(b"1")]));
        e.feed(&data_row(&[Some(b"2")]));
        e.feed(&command_complete("SELECT 2"));
        e.feed(&ready(b'I'));

        assert!(!e.is_busy().unwrap());
        let first = e.take_result().unwrap();
        assert_eq!(first.status(), ExecStatus::SingleTuple);
        assert_eq!(first.ntuples(), 1);
        assert_eq!(first.value(0, 0), Some(&b"1"[..]));

        assert!(!e.is_busy().unwrap());
        let second = e.take_result().unwrap();
        assert_eq!(second.status(), ExecStatus::SingleTuple);
        assert_eq!(second.value(0, 0), Some(&b"2"[..]));

        // the end of the stream is a zero-row TuplesOk with the tag
        assert!(!e.is_busy().unwrap());
        let last = e.take_result().unwrap();
        assert_eq!(last.status(), ExecStatus::TuplesOk);
        assert_eq!(last.ntuples(), 0);
        assert_eq!(last.cmd_status(), Some("SELECT 2"));

        assert!(!e.is_busy().unwrap());
        assert!(e.take_result().is_none());
    }

    #[test]
    fn single_row_mode_preconditions() {
        let mut e = ready_engine();
        assert!(e.set_single_row_mode().is_err());

        e.start_query(QueryClass::Prepare).unwrap();
        assert!(e.set_single_row_mode().is_err());
    }

    #[test]
    fn async_messages_intercepted_mid_query() {
        let mut e = ready_engine();
        e.start_query(QueryClass::Simple).unwrap();

        let mut notify = 7i32.to_be_bytes().to_vec();
        notify.extend_from_slice(b"jobs\0done\0");
        e.feed(&frame(b'A', &notify));
        e.feed(&frame(b'S', b"application_name\0myapp\0"));
        e.feed(&frame(b'N', b"SNOTICE\0C01000\0Mheads up\0\0"));
        e.feed(&command_complete("SET"));
        e.feed(&ready(b'I'));

        assert!(!e.is_busy().unwrap());
        assert_eq!(e.take_notification().unwrap().channel, "jobs");
        assert_eq!(e.parameter_status("application_name"), Some("myapp"));
        assert_eq!(e.take_notice().unwrap().code.as_deref(), Some("01000"));
        assert_eq!(e.take_result().unwrap().status(), ExecStatus::CommandOk);
    }

    #[test]
    fn async_messages_consumed_while_idle() {
        let mut e = ready_engine();
        let mut notify = 1i32.to_be_bytes().to_vec();
        notify.extend_from_slice(b"alerts\0\0");
        e.feed(&frame(b'A', &notify));
        e.parse_input().unwrap();
        let n = e.take_notification().unwrap();
        assert_eq!(n.channel, "alerts");
        assert_eq!(n.payload, "");
    }

    #[test]
    fn prepare_finishes_at_parse_complete() {
        let mut e = ready_engine();
        e.start_query(QueryClass::Prepare).unwrap();
        e.feed(&frame(b'1', b""));
        e.feed(&ready(b'I'));

        assert!(!e.is_busy().unwrap());
        assert_eq!(e.take_result().unwrap().status(), ExecStatus::CommandOk);
        assert!(!e.is_busy().unwrap());
        assert!(e.take_result().is_none());
    }

    #[test]
    fn describe_statement_result() {
        let mut e = ready_engine();
        e.start_query(QueryClass::Describe).unwrap();

        let mut pd = 1i16.to_be_bytes().to_vec();
        pd.extend_from_slice(&23u32.to_be_bytes());
        e.feed(&frame(b't', &pd));
        e.feed(&row_description(&["n"]));
        e.feed(&ready(b'I'));

        assert!(!e.is_busy().unwrap());
        let res = e.take_result().unwrap();
        assert_eq!(res.status(), ExecStatus::CommandOk);
        assert_eq!(res.param_types(), &[23]);
        assert_eq!(res.field_name(0), Some("n"));
    }

    #[test]
    fn describe_no_data() {
        let mut e = ready_engine();
        e.start_query(QueryClass::Describe).unwrap();
        e.feed(&frame(b'n', b""));
        e.feed(&ready(b'I'));

        assert!(!e.is_busy().unwrap());
        assert_eq!(e.take_result().unwrap().status(), ExecStatus::CommandOk);
    }

    #[test]
    fn extended_query_ignores_pipeline_acks() {
        let mut e = ready_engine();
        e.start_query(QueryClass::Extended).unwrap();

        e.feed(&frame(b'1', b""));
        e.feed(&frame(b'2', b""));
        e.feed(&row_description(&["v"]));
        e.feed(&data_row(&[Some(b"x")]));
        e.feed(&command_complete("SELECT 1"));
        e.feed(&ready(b'T'));

        assert!(!e.is_busy().unwrap());
        let res = e.take_result().unwrap();
        assert_eq!(res.status(), ExecStatus::TuplesOk);
        assert_eq!(res.ntuples(), 1);
        assert!(!e.is_busy().unwrap());
        assert!(e.take_result().is_none());
        assert_eq!(
            e.transaction_status(),
            TransactionStatus::InTransaction
        );
    }

    #[test]
    fn transaction_status_reflects_connection_state() {
        let mut e = Engine::new();
        assert_eq!(e.transaction_status(), TransactionStatus::Unknown);

        e.set_status(ConnectionStatus::Ok);
        assert_eq!(e.transaction_status(), TransactionStatus::Idle);

        e.start_query(QueryClass::Simple).unwrap();
        assert_eq!(e.transaction_status(), TransactionStatus::Active);

        e.feed(&command_complete("BEGIN"));
        e.feed(&ready(b'T'));
        assert!(!e.is_busy().unwrap());
        e.take_result().unwrap();
        assert!(!e.is_busy().unwrap());
        assert_eq!(e.transaction_status(), TransactionStatus::InTransaction);

        e.mark_broken();
        assert_eq!(e.transaction_status(), TransactionStatus::Unknown);
    }

    #[test]
    fn copy_out_flow() {
        let mut e = ready_engine();
        e.start_query(QueryClass::Simple).unwrap();

        let mut copy_hdr = vec![0u8];
        copy_hdr.extend_from_slice(&1i16.to_be_bytes());
        copy_hdr.extend_from_slice(&0i16.to_be_bytes());
        e.feed(&frame(b'H', &copy_hdr));

        e.parse_input().unwrap();
        assert_eq!(e.async_status(), AsyncStatus::CopyOut);
        let start = e.take_result().unwrap();
        assert_eq!(start.status(), ExecStatus::CopyOut);
        assert_eq!(start.copy_response().unwrap().column_formats.len(), 1);

        e.feed(&frame(b'd', b"1\taa\n"));
        e.feed(&frame(b'd', b"2\tbb\n"));
        assert_eq!(e.poll_copy_out().unwrap(), CopyOut::Data(b"1\taa\n".to_vec()));
        assert_eq!(e.poll_copy_out().unwrap(), CopyOut::Data(b"2\tbb\n".to_vec()));
        assert_eq!(e.poll_copy_out().unwrap(), CopyOut::NeedRead);

        e.feed(&frame(b'd', b"3\tcc\n"));
        e.feed(&frame(b'c', b""));
        e.feed(&command_complete("COPY 3"));
        e.feed(&ready(b'I'));
        assert_eq!(e.poll_copy_out().unwrap(), CopyOut::Data(b"3\tcc\n".to_vec()));
        assert_eq!(e.poll_copy_out().unwrap(), CopyOut::Done);

        assert!(!e.is_busy().unwrap());
        let done = e.take_result().unwrap();
        assert_eq!(done.status(), ExecStatus::CommandOk);
        assert_eq!(done.cmd_status(), Some("COPY 3"));
        assert!(!e.is_busy().unwrap());
        assert!(e.take_result().is_none());
        assert_eq!(e.async_status(), AsyncStatus::Idle);
    }

    #[test]
    fn copy_in_flow() {
        let mut e = ready_engine();
        e.start_query(QueryClass::Simple).unwrap();

        let mut copy_hdr = vec![0u8];
        copy_hdr.extend_from_slice(&1i16.to_be_bytes());
        copy_hdr.extend_from_slice(&0i16.to_be_bytes());
        e.feed(&frame(b'G', &copy_hdr));

        e.parse_input().unwrap();
        assert_eq!(e.take_result().unwrap().status(), ExecStatus::CopyIn);
        assert!(e.can_put_copy_data());

        e.end_copy_in();
        assert_eq!(e.async_status(), AsyncStatus::Busy);

        e.feed(&command_complete("COPY 2"));
        e.feed(&ready(b'I'));
        assert!(!e.is_busy().unwrap());
        assert_eq!(e.take_result().unwrap().cmd_status(), Some("COPY 2"));
    }

    #[test]
    fn parsing_an_empty_buffer_changes_nothing() {
        let mut copy_hdr = vec![0u8];
        copy_hdr.extend_from_slice(&1i16.to_be_bytes());
        copy_hdr.extend_from_slice(&0i16.to_be_bytes());

        let mut e = ready_engine();
        for _ in 0..3 {
            e.parse_input().unwrap();
            assert_eq!(e.async_status(), AsyncStatus::Idle);
        }

        e.start_query(QueryClass::Simple).unwrap();
        for _ in 0..3 {
            e.parse_input().unwrap();
            assert_eq!(e.async_status(), AsyncStatus::Busy);
        }

        e.feed(&frame(b'H', &copy_hdr));
        e.parse_input().unwrap();
        for _ in 0..3 {
            e.parse_input().unwrap();
            assert_eq!(e.async_status(), AsyncStatus::CopyOut);
        }

        e.feed(&frame(b'c', b""));
        e.feed(&command_complete("COPY 0"));
        assert_eq!(e.poll_copy_out().unwrap(), CopyOut::Done);
        assert!(!e.is_busy().unwrap());
        for _ in 0..3 {
            e.parse_input().unwrap();
            assert_eq!(e.async_status(), AsyncStatus::Ready);
        }

        let mut e = ready_engine();
        e.start_query(QueryClass::Simple).unwrap();
        e.feed(&frame(b'G', &copy_hdr));
        e.parse_input().unwrap();
        for _ in 0..3 {
            e.parse_input().unwrap();
            assert_eq!(e.async_status(), AsyncStatus::CopyIn);
        }
    }

    #[test]
    fn startup_conversation() {
        let mut e = Engine::new();
        e.set_status(ConnectionStatus::AwaitingResponse);
        let mut out = Vec::new();

        let mut md5 = 5i32.to_be_bytes().to_vec();
        md5.extend_from_slice(&[9, 9, 9, 9]);
        let msg = BackendMessage::decode(b'R', &md5).unwrap();
        assert!(!e
            .process_startup(msg, "bob", Some("pw"), &mut out)
            .unwrap());
        assert_eq!(out[0], b'p');
        assert!(e.auth_req_received());

        out.clear();
        let ok = BackendMessage::decode(b'R', &0i32.to_be_bytes()).unwrap();
        assert!(!e.process_startup(ok, "bob", Some("pw"), &mut out).unwrap());
        assert!(out.is_empty());
        assert_eq!(e.status(), ConnectionStatus::AuthOk);

        let key = BackendMessage::BackendKeyData {
            pid: 4321,
            secret_key: 99,
        };
        assert!(!e.process_startup(key, "bob", None, &mut out).unwrap());

        let ps = BackendMessage::ParameterStatus {
            name: "server_version".into(),
            value: "16.2".into(),
        };
        assert!(!e.process_startup(ps, "bob", None, &mut out).unwrap());

        let rfq = BackendMessage::ReadyForQuery(TransactionStatus::Idle);
        assert!(e.process_startup(rfq, "bob", None, &mut out).unwrap());
        assert_eq!(e.status(), ConnectionStatus::Ok);
        assert_eq!(e.backend_pid(), 4321);
        assert_eq!(e.parameter_status("server_version"), Some("16.2"));
    }

    #[test]
    fn startup_error_records_sqlstate() {
        let mut e = Engine::new();
        e.set_status(ConnectionStatus::AwaitingResponse);
        let mut out = Vec::new();
        let msg = BackendMessage::decode(
            b'E',
            b"SFATAL\0C57P03\0Mthe database system is starting up\0\0",
        )
        .unwrap();
        let err = e.process_startup(msg, "bob", None, &mut out).unwrap_err();
        assert!(matches!(err, Error::Server(_)));
        assert_eq!(e.last_sqlstate(), Some("57P03"));
        assert_eq!(e.status(), ConnectionStatus::Bad);
    }

    #[test]
    fn start_query_rejected_while_busy() {
        let mut e = ready_engine();
        e.start_query(QueryClass::Simple).unwrap();
        assert!(matches!(
            e.start_query(QueryClass::Simple),
            Err(Error::InvalidUsage(_))
        ));
    }

    #[test]
    fn unexpected_message_yields_bad_response() {
        let mut e = ready_engine();
        e.start_query(QueryClass::Simple).unwrap();
        let mut key = 1i32.to_be_bytes().to_vec();
        key.extend_from_slice(&2i32.to_be_bytes());
        e.feed(&frame(b'K', &key));
        e.parse_input().unwrap();
        let res = e.take_result().unwrap();
        assert_eq!(res.status(), ExecStatus::BadResponse);
    }

    #[test]
    fn second_row_description_is_protocol_error() {
        let mut e = ready_engine();
        e.start_query(QueryClass::Simple).unwrap();
        e.feed(&row_description(&["a", "b"]));
        e.parse_input().unwrap();
        // second RowDescription without CommandComplete is invalid
        e.feed(&row_description(&["c"]));
        assert!(matches!(e.parse_input(), Err(Error::Protocol(_))));
    }
}
