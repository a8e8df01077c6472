//! Connection facade.
//!
//! [`Connection`] ties the [`Transport`] to the sans-I/O [`Engine`]: it
//! moves bytes, blocks where the synchronous API promises to, and exposes
//! the libpq-shaped operation set (exec, prepared statements, COPY,
//! LISTEN/NOTIFY, cancellation).

use std::io::ErrorKind;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{Error, ErrorFields, Result, ERRCODE_CANNOT_CONNECT_NOW};
use crate::opts::Opts;
use crate::protocol::backend::Notification;
use crate::protocol::frontend;
use crate::protocol::types::{FormatCode, Oid, TransactionStatus};
use crate::result::{ExecStatus, QueryResult};

mod engine;
mod startup;
mod transport;

pub use engine::{AsyncStatus, ConnectionStatus, CopyOut, Engine, QueryClass};
pub use transport::Transport;

/// What a caller driving the connection establishment should wait for next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollingStatus {
    /// Wait for the socket to become readable, then poll again
    Reading,
    /// Wait for the socket to become writable, then poll again
    Writing,
    /// The connection is established
    Ok,
    /// The connection attempt failed
    Failed,
}

/// Server liveness probe verdict, mirroring libpq's `PQping`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingStatus {
    /// The server is accepting connections
    Ok,
    /// The server is alive but rejecting connections (e.g. starting up)
    Reject,
    /// The server did not respond
    NoResponse,
    /// The options were unusable, no contact was attempted
    NoAttempt,
}

const READ_CHUNK: usize = 8 * 1024;

/// A connection to a PostgreSQL server.
pub struct Connection {
    transport: Transport,
    engine: Engine,
    opts: Opts,
    out: Vec<u8>,
    nonblocking: bool,
    notice_handler: Option<Box<dyn FnMut(ErrorFields) + Send>>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("transport", &self.transport)
            .field("status", &self.engine.status())
            .field("async_status", &self.engine.async_status())
            .finish()
    }
}

fn write_startup_packet(out: &mut Vec<u8>, opts: &Opts) {
    let mut params: Vec<(&str, &str)> = vec![("user", &opts.user)];
    let database = opts.database();
    params.push(("database", database));
    if let Some(options) = &opts.options {
        params.push(("options", options));
    }
    for (name, value) in &opts.params {
        params.push((name, value));
    }
    frontend::write_startup(out, &params);
}

/// Negotiate SSL on a fresh socket per the ssl mode, before any startup
/// traffic.
fn negotiate_ssl(mut transport: Transport, opts: &Opts) -> Result<Transport> {
    if !opts.ssl_mode.try_ssl() {
        return Ok(transport);
    }
    let mut request = Vec::with_capacity(8);
    frontend::write_ssl_request(&mut request);
    transport.write_all(&request)?;
    transport.flush()?;

    let mut answer = [0u8; 1];
    transport.read_exact(&mut answer)?;
    match answer[0] {
        b'S' => transport.upgrade_tls(&opts.host, opts.ssl_mode),
        b'N' => {
            if opts.ssl_mode.required() {
                return Err(Error::Protocol(
                    "server refused SSL but sslmode requires it".into(),
                ));
            }
            debug!("server declined SSL, continuing in cleartext");
            Ok(transport)
        }
        // A pre-v3 server answers SSLRequest with an ErrorResponse. The
        // stream position is unknown after that, so reopen the socket and
        // proceed without SSL.
        b'E' => {
            if opts.ssl_mode.required() {
                return Err(Error::Protocol(
                    "server errored on SSLRequest but sslmode requires SSL".into(),
                ));
            }
            debug!("server errored on SSLRequest, reconnecting without SSL");
            let stream = transport::dial_opts(opts, None)?;
            Ok(Transport::plain(stream))
        }
        other => Err(Error::Protocol(format!(
            "invalid SSLRequest response 0x{other:02x}"
        ))),
    }
}

impl Connection {
    // -- establishment ----------------------------------------------------

    /// Start connecting: open the socket, negotiate SSL, and send the
    /// startup packet. Authentication is driven by [`connect_poll`].
    ///
    /// [`connect_poll`]: Self::connect_poll
    pub fn connect_start<O>(opts: O) -> Result<Self>
    where
        O: TryInto<Opts>,
        Error: From<O::Error>,
    {
        let opts = opts.try_into().map_err(Error::from)?.resolve();

        let mut engine = Engine::new();
        engine.set_status(ConnectionStatus::Started);
        let stream = transport::dial_opts(&opts, None)?;
        engine.set_status(ConnectionStatus::Made);

        let transport = match negotiate_ssl(Transport::plain(stream), &opts) {
            Ok(t) => t,
            Err(e) => {
                engine.set_status(ConnectionStatus::Bad);
                return Err(e);
            }
        };

        let mut conn = Self {
            transport,
            engine,
            opts,
            out: Vec::with_capacity(8 * 1024),
            nonblocking: false,
            notice_handler: None,
        };
        write_startup_packet(&mut conn.out, &conn.opts);
        conn.flush_out()?;
        conn.engine.set_status(ConnectionStatus::AwaitingResponse);
        Ok(conn)
    }

    /// Advance connection establishment with whatever input has arrived.
    ///
    /// On `Reading`, wait for the socket and call [`block`](Self::block) or
    /// [`consume_input`](Self::consume_input) before polling again.
    pub fn connect_poll(&mut self) -> Result<PollingStatus> {
        match self.engine.status() {
            ConnectionStatus::Ok => return Ok(PollingStatus::Ok),
            ConnectionStatus::Bad => return Ok(PollingStatus::Failed),
            _ => {}
        }

        loop {
            let Some(msg) = self.engine.next_message()? else {
                return Ok(PollingStatus::Reading);
            };
            let mut reply = Vec::new();
            let done = self.engine.process_startup(
                msg,
                &self.opts.user,
                self.opts.password.as_deref(),
                &mut reply,
            )?;
            if !reply.is_empty() {
                self.transport.write_all(&reply)?;
                self.transport.flush()?;
            }
            self.deliver_notices();
            if done {
                return Ok(PollingStatus::Ok);
            }
        }
    }

    fn finish_connecting(&mut self) -> Result<()> {
        loop {
            match self.connect_poll() {
                Ok(PollingStatus::Ok) => return Ok(()),
                Ok(PollingStatus::Failed) => return Err(Error::ConnectionBroken),
                Ok(PollingStatus::Reading | PollingStatus::Writing) => {
                    self.read_blocking(None)?;
                }
                Err(e) => {
                    self.engine.mark_broken();
                    return Err(e);
                }
            }
        }
    }

    /// Connect and authenticate, blocking until ReadyForQuery.
    pub fn connect<O>(opts: O) -> Result<Self>
    where
        O: TryInto<Opts>,
        Error: From<O::Error>,
    {
        let mut conn = Self::connect_start(opts)?;
        conn.finish_connecting()?;
        Ok(conn)
    }

    /// Probe whether the server at `opts` accepts connections.
    ///
    /// An authentication failure still counts as `Ok`: the server is up,
    /// the credentials are the caller's problem.
    pub fn ping<O>(opts: O) -> PingStatus
    where
        O: TryInto<Opts>,
        Error: From<O::Error>,
    {
        let opts = match opts.try_into() {
            Ok(opts) => opts,
            Err(_) => return PingStatus::NoAttempt,
        };
        let mut conn = match Self::connect_start::<Opts>(opts) {
            Ok(conn) => conn,
            Err(Error::InvalidUsage(_)) => return PingStatus::NoAttempt,
            Err(_) => return PingStatus::NoResponse,
        };
        match conn.finish_connecting() {
            Ok(()) => {
                let _ = conn.close();
                PingStatus::Ok
            }
            Err(_) => {
                if conn.engine.auth_req_received() {
                    return PingStatus::Ok;
                }
                match conn.engine.last_sqlstate() {
                    Some(ERRCODE_CANNOT_CONNECT_NOW) => PingStatus::Reject,
                    Some(code) if code.len() == 5 => PingStatus::Ok,
                    _ => PingStatus::NoResponse,
                }
            }
        }
    }

    // -- byte movement ----------------------------------------------------

    fn flush_out(&mut self) -> Result<()> {
        if !self.out.is_empty() {
            let result = self.transport.write_all(&self.out);
            self.out.clear();
            self.check_io(result)?;
            let flushed = self.transport.flush();
            self.check_io(flushed)?;
        }
        Ok(())
    }

    fn check_io<T>(&mut self, result: std::io::Result<T>) -> Result<T> {
        match result {
            Ok(v) => Ok(v),
            Err(e) => {
                self.engine.mark_broken();
                Err(Error::Io(e))
            }
        }
    }

    fn maybe_flush(&mut self) -> Result<()> {
        if self.nonblocking {
            Ok(())
        } else {
            self.flush_out()
        }
    }

    /// Push any queued output to the server.
    pub fn flush(&mut self) -> Result<()> {
        self.flush_out()
    }

    /// In nonblocking mode, dispatch calls only queue their messages and
    /// [`flush`](Self::flush) pushes them out when the caller chooses.
    pub fn set_nonblocking(&mut self, nonblocking: bool) {
        self.nonblocking = nonblocking;
    }

    pub fn is_nonblocking(&self) -> bool {
        self.nonblocking
    }

    /// Read whatever the socket has without blocking and buffer it.
    ///
    /// Also flushes pending output first; the server cannot answer a
    /// message it never received.
    pub fn consume_input(&mut self) -> Result<()> {
        self.flush_out()?;
        self.transport.set_nonblocking(true)?;
        let mut chunk = [0u8; READ_CHUNK];
        let outcome = loop {
            match self.transport.read(&mut chunk) {
                Ok(0) => {
                    break Err(Error::ConnectionBroken);
                }
                Ok(n) => self.engine.feed(&chunk[..n]),
                Err(e) if e.kind() == ErrorKind::WouldBlock => break Ok(()),
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => break Err(Error::Io(e)),
            }
        };
        self.transport.set_nonblocking(false)?;
        if outcome.is_err() {
            self.engine.mark_broken();
        }
        outcome
    }

    /// One blocking read into the engine. `timeout` of `None` waits
    /// indefinitely; returns false if the timeout expired first.
    fn read_blocking(&mut self, timeout: Option<Duration>) -> Result<bool> {
        self.flush_out()?;
        self.transport.set_read_timeout(timeout)?;
        let mut chunk = [0u8; READ_CHUNK];
        let outcome = loop {
            match self.transport.read(&mut chunk) {
                Ok(0) => break Err(Error::ConnectionBroken),
                Ok(n) => {
                    self.engine.feed(&chunk[..n]);
                    break Ok(true);
                }
                Err(e)
                    if timeout.is_some()
                        && matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
                {
                    break Ok(false);
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => break Err(Error::Io(e)),
            }
        };
        self.transport.set_read_timeout(None)?;
        if outcome.is_err() {
            self.engine.mark_broken();
        }
        outcome
    }

    /// Wait until the server sends something, up to `timeout`. Returns
    /// false on timeout.
    pub fn block(&mut self, timeout: Option<Duration>) -> Result<bool> {
        self.read_blocking(timeout)
    }

    fn deliver_notices(&mut self) {
        while let Some(notice) = self.engine.take_notice() {
            match &mut self.notice_handler {
                Some(handler) => handler(notice),
                None => warn!(notice = %notice, "server notice"),
            }
        }
    }

    /// Install a handler for NoticeResponse messages. Without one, notices
    /// are logged and dropped.
    pub fn set_notice_handler(&mut self, handler: Box<dyn FnMut(ErrorFields) + Send>) {
        self.notice_handler = Some(handler);
    }

    // -- synchronous query API --------------------------------------------

    /// Run a query with the simple protocol and return the last result.
    /// The SQL may contain multiple statements.
    pub fn exec(&mut self, sql: &str) -> Result<QueryResult> {
        self.exec_start()?;
        self.send_query(sql)?;
        self.exec_finish()
    }

    /// Run a single parameterized statement with the extended protocol.
    ///
    /// `param_formats` may be empty (all text) or one entry per parameter;
    /// `None` parameters bind SQL NULL.
    pub fn exec_params(
        &mut self,
        sql: &str,
        params: &[Option<&[u8]>],
        param_formats: &[FormatCode],
        result_format: FormatCode,
        param_oids: &[Oid],
    ) -> Result<QueryResult> {
        self.exec_start()?;
        self.send_query_params(sql, params, param_formats, result_format, param_oids)?;
        self.exec_finish()
    }

    /// Create a named prepared statement.
    pub fn prepare(&mut self, name: &str, sql: &str, param_oids: &[Oid]) -> Result<QueryResult> {
        self.exec_start()?;
        self.send_prepare(name, sql, param_oids)?;
        self.exec_finish()
    }

    /// Execute a previously prepared statement.
    pub fn exec_prepared(
        &mut self,
        name: &str,
        params: &[Option<&[u8]>],
        param_formats: &[FormatCode],
        result_format: FormatCode,
    ) -> Result<QueryResult> {
        self.exec_start()?;
        self.send_query_prepared(name, params, param_formats, result_format)?;
        self.exec_finish()
    }

    /// Fetch parameter types and result shape of a prepared statement.
    pub fn describe_prepared(&mut self, name: &str) -> Result<QueryResult> {
        self.exec_start()?;
        self.send_describe_prepared(name)?;
        self.exec_finish()
    }

    /// Fetch the result shape of an open portal.
    pub fn describe_portal(&mut self, name: &str) -> Result<QueryResult> {
        self.exec_start()?;
        self.send_describe_portal(name)?;
        self.exec_finish()
    }

    fn exec_start(&mut self) -> Result<()> {
        if self.engine.status() != ConnectionStatus::Ok {
            return Err(Error::ConnectionBroken);
        }
        // drop leftovers of an earlier client that stopped reading results
        loop {
            match self.engine.async_status() {
                AsyncStatus::Idle => return Ok(()),
                AsyncStatus::CopyIn | AsyncStatus::CopyOut | AsyncStatus::CopyBoth => {
                    return Err(Error::InvalidUsage(
                        "a COPY transfer is still in progress".into(),
                    ));
                }
                _ => {
                    if self.get_result()?.is_none() {
                        return Ok(());
                    }
                }
            }
        }
    }

    fn exec_finish(&mut self) -> Result<QueryResult> {
        let mut last: Option<QueryResult> = None;
        while let Some(result) = self.get_result()? {
            // a COPY start hands control to the caller immediately
            if matches!(
                result.status(),
                ExecStatus::CopyIn | ExecStatus::CopyOut | ExecStatus::CopyBoth
            ) {
                return Ok(result);
            }
            // the first error wins over later statements' outcomes
            match &last {
                Some(prev) if prev.status() == ExecStatus::FatalError => {}
                _ => last = Some(result),
            }
        }
        last.ok_or_else(|| Error::Protocol("query produced no result".into()))
    }

    /// Run `work` inside a transaction: BEGIN before, COMMIT after, and
    /// ROLLBACK if `work` returns an error.
    pub fn transaction<T, F>(&mut self, work: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        let begin = self.exec("BEGIN")?;
        if begin.status() != ExecStatus::CommandOk {
            return Err(Error::InvalidUsage(format!(
                "BEGIN failed: {}",
                begin.error_message().unwrap_or_default()
            )));
        }
        match work(self) {
            Ok(value) => {
                self.exec("COMMIT")?;
                Ok(value)
            }
            Err(e) => {
                if !self.is_bad() {
                    let _ = self.exec("ROLLBACK");
                }
                Err(e)
            }
        }
    }

    // -- asynchronous query API -------------------------------------------

    /// Dispatch a simple-protocol query without waiting for results.
    pub fn send_query(&mut self, sql: &str) -> Result<()> {
        self.engine.start_query(QueryClass::Simple)?;
        frontend::write_query(&mut self.out, sql);
        self.maybe_flush()
    }

    /// Dispatch an unnamed parse/bind/describe/execute/sync pipeline.
    pub fn send_query_params(
        &mut self,
        sql: &str,
        params: &[Option<&[u8]>],
        param_formats: &[FormatCode],
        result_format: FormatCode,
        param_oids: &[Oid],
    ) -> Result<()> {
        self.engine.start_query(QueryClass::Extended)?;
        frontend::write_parse(&mut self.out, "", sql, param_oids);
        frontend::write_bind(&mut self.out, "", "", params, param_formats, result_format);
        frontend::write_describe_portal(&mut self.out, "");
        frontend::write_execute(&mut self.out, "", 0);
        frontend::write_sync(&mut self.out);
        self.maybe_flush()
    }

    /// Dispatch a Parse for a named statement.
    pub fn send_prepare(&mut self, name: &str, sql: &str, param_oids: &[Oid]) -> Result<()> {
        self.engine.start_query(QueryClass::Prepare)?;
        frontend::write_parse(&mut self.out, name, sql, param_oids);
        frontend::write_sync(&mut self.out);
        self.maybe_flush()
    }

    /// Dispatch execution of a named prepared statement.
    pub fn send_query_prepared(
        &mut self,
        name: &str,
        params: &[Option<&[u8]>],
        param_formats: &[FormatCode],
        result_format: FormatCode,
    ) -> Result<()> {
        self.engine.start_query(QueryClass::Extended)?;
        frontend::write_bind(&mut self.out, "", name, params, param_formats, result_format);
        frontend::write_describe_portal(&mut self.out, "");
        frontend::write_execute(&mut self.out, "", 0);
        frontend::write_sync(&mut self.out);
        self.maybe_flush()
    }

    /// Dispatch a Describe of a prepared statement.
    pub fn send_describe_prepared(&mut self, name: &str) -> Result<()> {
        self.engine.start_query(QueryClass::Describe)?;
        frontend::write_describe_statement(&mut self.out, name);
        frontend::write_sync(&mut self.out);
        self.maybe_flush()
    }

    /// Dispatch a Describe of a portal.
    pub fn send_describe_portal(&mut self, name: &str) -> Result<()> {
        self.engine.start_query(QueryClass::Describe)?;
        frontend::write_describe_portal(&mut self.out, name);
        frontend::write_sync(&mut self.out);
        self.maybe_flush()
    }

    /// Next result of the current query, blocking while responses are in
    /// flight. `None` means the query cycle is complete.
    pub fn get_result(&mut self) -> Result<Option<QueryResult>> {
        while self.is_busy()? {
            self.read_blocking(None)?;
        }
        let result = self.engine.take_result();
        self.deliver_notices();
        Ok(result)
    }

    /// Whether [`get_result`](Self::get_result) would block. Parses any
    /// buffered input as a side effect.
    pub fn is_busy(&mut self) -> Result<bool> {
        let busy = self.engine.is_busy()?;
        self.deliver_notices();
        Ok(busy)
    }

    /// Ask for results row by row. Valid only between dispatching a query
    /// and receiving its first response.
    pub fn set_single_row_mode(&mut self) -> Result<()> {
        self.engine.set_single_row_mode()
    }

    // -- COPY -------------------------------------------------------------

    /// Send a chunk of COPY FROM STDIN data.
    pub fn put_copy_data(&mut self, data: &[u8]) -> Result<()> {
        if !self.engine.can_put_copy_data() {
            return Err(Error::InvalidUsage("not in COPY IN mode".into()));
        }
        // keep absorbing notices and notifications queued behind the copy
        self.engine.parse_input()?;
        self.deliver_notices();
        frontend::write_copy_data(&mut self.out, data);
        self.maybe_flush()
    }

    /// Finish a COPY FROM STDIN transfer. A `Some` error aborts the copy
    /// with CopyFail instead.
    pub fn put_copy_end(&mut self, error: Option<&str>) -> Result<()> {
        if !self.engine.can_put_copy_data() {
            return Err(Error::InvalidUsage("not in COPY IN mode".into()));
        }
        match error {
            Some(reason) => frontend::write_copy_fail(&mut self.out, reason),
            None => frontend::write_copy_done(&mut self.out),
        }
        // the Sync that ended the pipeline was consumed by the copy; an
        // extended-protocol copy needs a fresh one to close the cycle
        if self.engine.query_class() != QueryClass::Simple {
            frontend::write_sync(&mut self.out);
        }
        self.engine.end_copy_in();
        self.maybe_flush()
    }

    /// Receive one chunk of COPY TO STDOUT data, blocking until a chunk or
    /// the end of the transfer arrives. `None` means the copy is over;
    /// call [`get_result`](Self::get_result) to collect its outcome.
    pub fn get_copy_data(&mut self) -> Result<Option<Vec<u8>>> {
        loop {
            match self.poll_copy_data()? {
                CopyOut::Data(chunk) => return Ok(Some(chunk)),
                CopyOut::Done => return Ok(None),
                CopyOut::NeedRead => {
                    self.read_blocking(None)?;
                }
            }
        }
    }

    /// Non-blocking variant of [`get_copy_data`](Self::get_copy_data):
    /// `NeedRead` means nothing was buffered.
    pub fn poll_copy_data(&mut self) -> Result<CopyOut> {
        if !self.engine.in_copy_out() {
            return Err(Error::InvalidUsage("not in COPY OUT mode".into()));
        }
        // drain what is already buffered before touching the socket
        let mut step = self.engine.poll_copy_out()?;
        if step == CopyOut::NeedRead {
            self.consume_input()?;
            step = self.engine.poll_copy_out()?;
        }
        self.deliver_notices();
        Ok(step)
    }

    // -- notifications ----------------------------------------------------

    /// Pop a pending notification, parsing buffered input first. Does not
    /// read from the socket.
    pub fn notifies(&mut self) -> Result<Option<Notification>> {
        self.engine.parse_input()?;
        self.deliver_notices();
        Ok(self.engine.take_notification())
    }

    /// Wait up to `timeout` for a notification. `None` waits indefinitely.
    pub fn wait_for_notify(&mut self, timeout: Option<Duration>) -> Result<Option<Notification>> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if let Some(n) = self.notifies()? {
                return Ok(Some(n));
            }
            let remaining = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(None);
                    }
                    Some(deadline - now)
                }
                None => None,
            };
            if !self.read_blocking(remaining)? {
                return Ok(None);
            }
        }
    }

    // -- cancellation and shutdown ----------------------------------------

    /// Ask the server to abandon the query currently running on this
    /// connection. Opens a second, short-lived connection to carry the
    /// request.
    pub fn cancel(&mut self) -> Result<()> {
        let stream = transport::dial_opts(&self.opts, None)?;
        let mut transport = negotiate_ssl(Transport::plain(stream), &self.opts)?;

        let mut packet = Vec::with_capacity(16);
        frontend::write_cancel_request(
            &mut packet,
            self.engine.backend_pid(),
            self.engine.backend_secret(),
        );
        transport.write_all(&packet)?;
        transport.flush()?;

        // The server answers by closing the socket; waiting for that EOF
        // guarantees the cancel was processed before the caller proceeds.
        let mut byte = [0u8; 1];
        let _ = transport.read(&mut byte);
        Ok(())
    }

    /// Send Terminate and shut the connection down.
    pub fn close(&mut self) -> Result<()> {
        if self.engine.status() == ConnectionStatus::Ok {
            frontend::write_terminate(&mut self.out);
            let _ = self.flush_out();
        }
        self.engine.mark_broken();
        Ok(())
    }

    // -- introspection ----------------------------------------------------

    pub fn status(&self) -> ConnectionStatus {
        self.engine.status()
    }

    /// Whether the connection can no longer be used.
    pub fn is_bad(&self) -> bool {
        self.engine.status() == ConnectionStatus::Bad
    }

    /// Transaction status: `Unknown` when the connection is unusable,
    /// `Active` while a command is in flight, otherwise as of the last
    /// ReadyForQuery.
    pub fn transaction_status(&self) -> TransactionStatus {
        self.engine.transaction_status()
    }

    /// PID of the server backend process serving this connection.
    pub fn backend_pid(&self) -> i32 {
        self.engine.backend_pid()
    }

    /// Latest value of a run-time parameter reported by the server.
    pub fn parameter_status(&self, name: &str) -> Option<&str> {
        self.engine.parameter_status(name)
    }

    /// Server version as a number, e.g. 160002 for 16.2, 90603 for 9.6.3.
    pub fn server_version(&self) -> Option<i32> {
        server_version_num(self.parameter_status("server_version")?)
    }

    pub fn client_encoding(&self) -> Option<&str> {
        self.parameter_status("client_encoding")
    }

    /// Change the client encoding with `SET client_encoding`.
    pub fn set_client_encoding(&mut self, encoding: &str) -> Result<()> {
        let sql = format!(
            "SET client_encoding TO '{}'",
            crate::escape::escape_string(encoding, true)
        );
        let result = self.exec(&sql)?;
        if result.status() != ExecStatus::CommandOk {
            return Err(Error::InvalidUsage(format!(
                "changing client encoding failed: {}",
                result.error_message().unwrap_or_default()
            )));
        }
        Ok(())
    }

    /// Whether the server treats backslashes in string literals literally.
    pub fn standard_conforming_strings(&self) -> bool {
        self.parameter_status("standard_conforming_strings") == Some("on")
    }

    /// Escape a string for inclusion in a SQL literal, honoring this
    /// connection's `standard_conforming_strings` setting.
    pub fn escape_string(&self, s: &str) -> String {
        crate::escape::escape_string(s, self.standard_conforming_strings())
    }

    /// Escape binary data into bytea literal form.
    pub fn escape_bytea(&self, data: &[u8]) -> String {
        crate::escape::escape_bytea(data, self.standard_conforming_strings())
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if self.engine.status() == ConnectionStatus::Ok {
            frontend::write_terminate(&mut self.out);
            let _ = self.flush_out();
        }
    }
}

/// Parse a `server_version` parameter into libpq's numeric form.
fn server_version_num(version: &str) -> Option<i32> {
    let mut parts = version.split('.');
    let major = leading_int(parts.next()?)?;
    let minor = parts.next().and_then(leading_int).unwrap_or(0);
    if major >= 10 {
        Some(major * 10000 + minor)
    } else {
        let patch = parts.next().and_then(leading_int).unwrap_or(0);
        Some(major * 10000 + minor * 100 + patch)
    }
}

fn leading_int(s: &str) -> Option<i32> {
    let digits: String = s.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}
