//! Frontend (client to server) message writers.
//!
//! Each writer appends one complete message to the output buffer. Callers
//! batch several writers into one buffer and flush it in a single write.

use super::codec::MessageBuilder;
use super::types::{FormatCode, Oid};

/// Frontend message type bytes.
pub mod msg_type {
    pub const PASSWORD: u8 = b'p'; // also SASLInitialResponse / SASLResponse
    pub const QUERY: u8 = b'Q';
    pub const PARSE: u8 = b'P';
    pub const BIND: u8 = b'B';
    pub const EXECUTE: u8 = b'E';
    pub const DESCRIBE: u8 = b'D';
    pub const CLOSE: u8 = b'C';
    pub const SYNC: u8 = b'S';
    pub const FLUSH: u8 = b'H';
    pub const COPY_DATA: u8 = b'd';
    pub const COPY_DONE: u8 = b'c';
    pub const COPY_FAIL: u8 = b'f';
    pub const FUNCTION_CALL: u8 = b'F';
    pub const TERMINATE: u8 = b'X';
}

/// Protocol version 3.0 (0x00030000).
pub const PROTOCOL_VERSION_3_0: i32 = 196608;

/// Magic code of the SSLRequest packet.
pub const SSL_REQUEST_CODE: i32 = 80877103;

/// Magic code of the CancelRequest packet.
pub const CANCEL_REQUEST_CODE: i32 = 80877102;

/// Write an SSLRequest packet.
///
/// Sent instead of StartupMessage to negotiate TLS. The server answers with
/// a single byte, 'S' (proceed with TLS) or 'N' (no TLS), before any
/// regular message.
pub fn write_ssl_request(buf: &mut Vec<u8>) {
    let mut msg = MessageBuilder::new_untagged(buf);
    msg.write_i32(SSL_REQUEST_CODE);
    msg.finish();
}

/// Write a StartupMessage with the given (name, value) parameter pairs.
///
/// "user" is required; "database", "options" and run-time parameters such
/// as `application_name` are optional.
pub fn write_startup(buf: &mut Vec<u8>, params: &[(&str, &str)]) {
    let mut msg = MessageBuilder::new_untagged(buf);
    msg.write_i32(PROTOCOL_VERSION_3_0);
    for (name, value) in params {
        msg.write_cstr(name);
        msg.write_cstr(value);
    }
    msg.write_u8(0);
    msg.finish();
}

/// Write a CancelRequest packet.
///
/// Sent on a fresh connection; the server cancels the query running on the
/// backend identified by `pid`/`secret_key` and closes the socket without
/// replying.
pub fn write_cancel_request(buf: &mut Vec<u8>, pid: i32, secret_key: i32) {
    let mut msg = MessageBuilder::new_untagged(buf);
    msg.write_i32(CANCEL_REQUEST_CODE);
    msg.write_i32(pid);
    msg.write_i32(secret_key);
    msg.finish();
}

/// Write a Terminate message.
pub fn write_terminate(buf: &mut Vec<u8>) {
    MessageBuilder::new(buf, msg_type::TERMINATE).finish();
}

/// Write a Query message (simple query protocol).
pub fn write_query(buf: &mut Vec<u8>, sql: &str) {
    let mut msg = MessageBuilder::new(buf, msg_type::QUERY);
    msg.write_cstr(sql);
    msg.finish();
}

/// Write a PasswordMessage carrying a cleartext or MD5-hashed password.
pub fn write_password(buf: &mut Vec<u8>, password: &str) {
    let mut msg = MessageBuilder::new(buf, msg_type::PASSWORD);
    msg.write_cstr(password);
    msg.finish();
}

/// Write a SASLInitialResponse selecting `mechanism`.
pub fn write_sasl_initial_response(buf: &mut Vec<u8>, mechanism: &str, initial: &[u8]) {
    let mut msg = MessageBuilder::new(buf, msg_type::PASSWORD);
    msg.write_cstr(mechanism);
    msg.write_i32(initial.len() as i32);
    msg.write_bytes(initial);
    msg.finish();
}

/// Write a SASLResponse continuation.
pub fn write_sasl_response(buf: &mut Vec<u8>, data: &[u8]) {
    let mut msg = MessageBuilder::new(buf, msg_type::PASSWORD);
    msg.write_bytes(data);
    msg.finish();
}

/// Write a Parse message.
///
/// - `name`: prepared statement name, empty for the unnamed statement
/// - `query`: SQL with `$1`, `$2`, ... placeholders
/// - `param_oids`: declared parameter types, 0 lets the server infer
pub fn write_parse(buf: &mut Vec<u8>, name: &str, query: &str, param_oids: &[Oid]) {
    let mut msg = MessageBuilder::new(buf, msg_type::PARSE);
    msg.write_cstr(name);
    msg.write_cstr(query);
    msg.write_i16(param_oids.len() as i16);
    for &oid in param_oids {
        msg.write_u32(oid);
    }
    msg.finish();
}

/// Write a Bind message.
///
/// `params` holds one entry per placeholder; `None` binds SQL NULL, which
/// goes on the wire as length -1 with no value bytes. `param_formats` may be
/// empty (all text), hold one code applied to every parameter, or one code
/// per parameter. `result_format` applies to every result column.
pub fn write_bind(
    buf: &mut Vec<u8>,
    portal: &str,
    statement: &str,
    params: &[Option<&[u8]>],
    param_formats: &[FormatCode],
    result_format: FormatCode,
) {
    let mut msg = MessageBuilder::new(buf, msg_type::BIND);
    msg.write_cstr(portal);
    msg.write_cstr(statement);

    msg.write_i16(param_formats.len() as i16);
    for &fmt in param_formats {
        msg.write_i16(fmt as i16);
    }

    msg.write_i16(params.len() as i16);
    for param in params {
        match param {
            Some(value) => {
                msg.write_i32(value.len() as i32);
                msg.write_bytes(value);
            }
            None => msg.write_i32(-1),
        }
    }

    msg.write_i16(1);
    msg.write_i16(result_format as i16);
    msg.finish();
}

/// Write an Execute message. `max_rows` of 0 means no limit.
pub fn write_execute(buf: &mut Vec<u8>, portal: &str, max_rows: i32) {
    let mut msg = MessageBuilder::new(buf, msg_type::EXECUTE);
    msg.write_cstr(portal);
    msg.write_i32(max_rows);
    msg.finish();
}

fn write_target(buf: &mut Vec<u8>, type_byte: u8, target: u8, name: &str) {
    let mut msg = MessageBuilder::new(buf, type_byte);
    msg.write_u8(target);
    msg.write_cstr(name);
    msg.finish();
}

/// Write a Describe message for a prepared statement.
pub fn write_describe_statement(buf: &mut Vec<u8>, name: &str) {
    write_target(buf, msg_type::DESCRIBE, b'S', name);
}

/// Write a Describe message for a portal.
pub fn write_describe_portal(buf: &mut Vec<u8>, name: &str) {
    write_target(buf, msg_type::DESCRIBE, b'P', name);
}

/// Write a Close message for a prepared statement.
pub fn write_close_statement(buf: &mut Vec<u8>, name: &str) {
    write_target(buf, msg_type::CLOSE, b'S', name);
}

/// Write a Close message for a portal.
pub fn write_close_portal(buf: &mut Vec<u8>, name: &str) {
    write_target(buf, msg_type::CLOSE, b'P', name);
}

/// Write a Sync message, ending an extended query sequence.
pub fn write_sync(buf: &mut Vec<u8>) {
    MessageBuilder::new(buf, msg_type::SYNC).finish();
}

/// Write a Flush message, forcing pending responses without ending the
/// sequence.
pub fn write_flush(buf: &mut Vec<u8>) {
    MessageBuilder::new(buf, msg_type::FLUSH).finish();
}

/// Write a CopyData message.
pub fn write_copy_data(buf: &mut Vec<u8>, data: &[u8]) {
    let mut msg = MessageBuilder::new(buf, msg_type::COPY_DATA);
    msg.write_bytes(data);
    msg.finish();
}

/// Write a CopyDone message.
pub fn write_copy_done(buf: &mut Vec<u8>) {
    MessageBuilder::new(buf, msg_type::COPY_DONE).finish();
}

/// Write a CopyFail message with an error reason.
pub fn write_copy_fail(buf: &mut Vec<u8>, reason: &str) {
    let mut msg = MessageBuilder::new(buf, msg_type::COPY_FAIL);
    msg.write_cstr(reason);
    msg.finish();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ssl_request_bytes() {
        let mut buf = Vec::new();
        write_ssl_request(&mut buf);
        assert_eq!(buf.len(), 8);
        assert_eq!(&buf[0..4], &8_i32.to_be_bytes());
        assert_eq!(&buf[4..8], &SSL_REQUEST_CODE.to_be_bytes());
    }

    #[test]
    fn cancel_request_bytes() {
        let mut buf = Vec::new();
        write_cancel_request(&mut buf, 1234, 5678);
        assert_eq!(buf.len(), 16);
        assert_eq!(&buf[0..4], &16_i32.to_be_bytes());
        assert_eq!(&buf[4..8], &CANCEL_REQUEST_CODE.to_be_bytes());
        assert_eq!(&buf[8..12], &1234_i32.to_be_bytes());
        assert_eq!(&buf[12..16], &5678_i32.to_be_bytes());
    }

    #[test]
    fn startup_bytes() {
        let mut buf = Vec::new();
        write_startup(&mut buf, &[("user", "alice"), ("database", "appdb")]);
        let len = i32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        assert_eq!(len as usize, buf.len());
        assert_eq!(&buf[4..8], &PROTOCOL_VERSION_3_0.to_be_bytes());
        assert_eq!(&buf[8..], b"user\0alice\0database\0appdb\0\0");
    }

    #[test]
    fn query_bytes() {
        let mut buf = Vec::new();
        write_query(&mut buf, "SELECT 1");
        assert_eq!(buf[0], b'Q');
        assert_eq!(&buf[1..5], &13_i32.to_be_bytes());
        assert_eq!(&buf[5..], b"SELECT 1\0");
    }

    #[test]
    fn bind_null_param() {
        let mut buf = Vec::new();
        write_bind(&mut buf, "", "stmt", &[None], &[], FormatCode::Text);
        assert_eq!(buf[0], b'B');
        // portal "" + statement "stmt" + 0 format codes
        let payload = &buf[5..];
        assert_eq!(&payload[..6], b"\0stmt\0");
        assert_eq!(&payload[6..8], &0_i16.to_be_bytes()); // no param formats
        assert_eq!(&payload[8..10], &1_i16.to_be_bytes()); // one param
        assert_eq!(&payload[10..14], &(-1_i32).to_be_bytes()); // NULL
        assert_eq!(&payload[14..16], &1_i16.to_be_bytes()); // one result format
        assert_eq!(&payload[16..18], &0_i16.to_be_bytes()); // text
    }

    #[test]
    fn bind_value_param() {
        let mut buf = Vec::new();
        write_bind(
            &mut buf,
            "",
            "",
            &[Some(b"42")],
            &[FormatCode::Text],
            FormatCode::Binary,
        );
        let payload = &buf[5..];
        assert_eq!(&payload[..2], b"\0\0");
        assert_eq!(&payload[2..4], &1_i16.to_be_bytes());
        assert_eq!(&payload[4..6], &0_i16.to_be_bytes());
        assert_eq!(&payload[6..8], &1_i16.to_be_bytes());
        assert_eq!(&payload[8..12], &2_i32.to_be_bytes());
        assert_eq!(&payload[12..14], b"42");
        assert_eq!(&payload[14..16], &1_i16.to_be_bytes());
        assert_eq!(&payload[16..18], &1_i16.to_be_bytes());
    }

    #[test]
    fn describe_and_close() {
        let mut buf = Vec::new();
        write_describe_statement(&mut buf, "s1");
        assert_eq!(buf[0], b'D');
        assert_eq!(buf[5], b'S');
        assert_eq!(&buf[6..], b"s1\0");

        buf.clear();
        write_close_portal(&mut buf, "p1");
        assert_eq!(buf[0], b'C');
        assert_eq!(buf[5], b'P');
        assert_eq!(&buf[6..], b"p1\0");
    }

    #[test]
    fn bare_messages() {
        for (writer, tag) in [
            (write_sync as fn(&mut Vec<u8>), b'S'),
            (write_flush, b'H'),
            (write_copy_done, b'c'),
            (write_terminate, b'X'),
        ] {
            let mut buf = Vec::new();
            writer(&mut buf);
            assert_eq!(buf[0], tag);
            assert_eq!(&buf[1..], &4_i32.to_be_bytes());
        }
    }

    #[test]
    fn copy_data_bytes() {
        let mut buf = Vec::new();
        write_copy_data(&mut buf, b"1\tfoo\n");
        assert_eq!(buf[0], b'd');
        assert_eq!(&buf[1..5], &10_i32.to_be_bytes());
        assert_eq!(&buf[5..], b"1\tfoo\n");
    }

    #[test]
    fn sasl_initial_response_bytes() {
        let mut buf = Vec::new();
        write_sasl_initial_response(&mut buf, "SCRAM-SHA-256", b"n,,n=,r=abc");
        assert_eq!(buf[0], b'p');
        let payload = &buf[5..];
        assert_eq!(&payload[..14], b"SCRAM-SHA-256\0");
        assert_eq!(&payload[14..18], &11_i32.to_be_bytes());
        assert_eq!(&payload[18..], b"n,,n=,r=abc");
    }
}
