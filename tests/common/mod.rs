//! A scripted single-connection server for protocol-level tests.

#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread::JoinHandle;

use pglink::{Opts, SslMode};

/// Surface client-side traces in failing test output.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_test_writer()
        .try_init();
}

pub struct MockServer {
    pub port: u16,
    handle: JoinHandle<()>,
}

impl MockServer {
    /// Bind an ephemeral port and run `script` against the first
    /// connection that arrives.
    pub fn spawn<F>(script: F) -> Self
    where
        F: FnOnce(&mut TcpStream) + Send + 'static,
    {
        init_logging();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            script(&mut stream);
        });
        MockServer { port, handle }
    }

    pub fn opts(&self) -> Opts {
        Opts {
            host: "127.0.0.1".into(),
            port: self.port,
            user: "mock".into(),
            ssl_mode: SslMode::Disable,
            ..Opts::default()
        }
    }

    /// Wait for the script to finish; panics propagate test failures from
    /// the server thread.
    pub fn join(self) {
        self.handle.join().unwrap();
    }
}

// -- frontend side: reading what the client sent --------------------------

/// Read the length-prefixed, untagged startup packet body.
pub fn read_startup(stream: &mut TcpStream) -> Vec<u8> {
    let mut len = [0u8; 4];
    stream.read_exact(&mut len).unwrap();
    let len = i32::from_be_bytes(len) as usize;
    let mut body = vec![0u8; len - 4];
    stream.read_exact(&mut body).unwrap();
    body
}

/// Read one tagged frontend message, returning its type byte and payload.
pub fn read_message(stream: &mut TcpStream) -> (u8, Vec<u8>) {
    let mut header = [0u8; 5];
    stream.read_exact(&mut header).unwrap();
    let len = i32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;
    let mut payload = vec![0u8; len - 4];
    stream.read_exact(&mut payload).unwrap();
    (header[0], payload)
}

/// Read frontend messages up to and including Sync, returning the tags.
pub fn read_until_sync(stream: &mut TcpStream) -> Vec<u8> {
    let mut tags = Vec::new();
    loop {
        let (tag, _) = read_message(stream);
        tags.push(tag);
        if tag == b'S' {
            return tags;
        }
    }
}

// -- backend side: canned responses ----------------------------------------

pub fn msg(tag: u8, body: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];
    out.extend_from_slice(&(body.len() as i32 + 4).to_be_bytes());
    out.extend_from_slice(body);
    out
}

pub fn send(stream: &mut TcpStream, bytes: &[u8]) {
    stream.write_all(bytes).unwrap();
    stream.flush().unwrap();
}

pub fn auth_request(code: i32, extra: &[u8]) -> Vec<u8> {
    let mut body = code.to_be_bytes().to_vec();
    body.extend_from_slice(extra);
    msg(b'R', &body)
}

pub fn parameter_status(name: &str, value: &str) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(name.as_bytes());
    body.push(0);
    body.extend_from_slice(value.as_bytes());
    body.push(0);
    msg(b'S', &body)
}

pub fn backend_key_data(pid: i32, secret: i32) -> Vec<u8> {
    let mut body = pid.to_be_bytes().to_vec();
    body.extend_from_slice(&secret.to_be_bytes());
    msg(b'K', &body)
}

pub fn ready_for_query(status: u8) -> Vec<u8> {
    msg(b'Z', &[status])
}

/// One text column of type `text` per name.
pub fn row_description(names: &[&str]) -> Vec<u8> {
    let mut body = (names.len() as i16).to_be_bytes().to_vec();
    for name in names {
        body.extend_from_slice(name.as_bytes());
        body.push(0);
        body.extend_from_slice(&0i32.to_be_bytes()); // table oid
        body.extend_from_slice(&0i16.to_be_bytes()); // column attr
        body.extend_from_slice(&25i32.to_be_bytes()); // type oid
        body.extend_from_slice(&(-1i16).to_be_bytes()); // type len
        body.extend_from_slice(&(-1i32).to_be_bytes()); // type mod
        body.extend_from_slice(&0i16.to_be_bytes()); // format
    }
    msg(b'T', &body)
}

pub fn data_row(values: &[Option<&[u8]>]) -> Vec<u8> {
    let mut body = (values.len() as i16).to_be_bytes().to_vec();
    for value in values {
        match value {
            Some(v) => {
                body.extend_from_slice(&(v.len() as i32).to_be_bytes());
                body.extend_from_slice(v);
            }
            None => body.extend_from_slice(&(-1i32).to_be_bytes()),
        }
    }
    msg(b'D', &body)
}

pub fn command_complete(tag: &str) -> Vec<u8> {
    let mut body = tag.as_bytes().to_vec();
    body.push(0);
    msg(b'C', &body)
}

pub fn error_response(severity: &str, code: &str, message: &str) -> Vec<u8> {
    let mut body = Vec::new();
    for (field, value) in [(b'S', severity), (b'C', code), (b'M', message)] {
        body.push(field);
        body.extend_from_slice(value.as_bytes());
        body.push(0);
    }
    body.push(0);
    msg(b'E', &body)
}

pub fn notification(pid: i32, channel: &str, payload: &str) -> Vec<u8> {
    let mut body = pid.to_be_bytes().to_vec();
    body.extend_from_slice(channel.as_bytes());
    body.push(0);
    body.extend_from_slice(payload.as_bytes());
    body.push(0);
    msg(b'A', &body)
}

pub fn copy_out_response(columns: i16) -> Vec<u8> {
    copy_response(b'H', columns)
}

pub fn copy_in_response(columns: i16) -> Vec<u8> {
    copy_response(b'G', columns)
}

fn copy_response(tag: u8, columns: i16) -> Vec<u8> {
    let mut body = vec![0u8]; // overall text format
    body.extend_from_slice(&columns.to_be_bytes());
    for _ in 0..columns {
        body.extend_from_slice(&0i16.to_be_bytes());
    }
    msg(tag, &body)
}

pub fn copy_data(data: &[u8]) -> Vec<u8> {
    msg(b'd', data)
}

pub fn copy_done() -> Vec<u8> {
    msg(b'c', &[])
}

/// Accept the startup packet and answer with a trust-auth handshake.
pub fn handshake(stream: &mut TcpStream) {
    let _ = read_startup(stream);
    let mut greeting = auth_request(0, &[]);
    greeting.extend_from_slice(&parameter_status("server_version", "16.2"));
    greeting.extend_from_slice(&parameter_status("client_encoding", "UTF8"));
    greeting.extend_from_slice(&parameter_status("standard_conforming_strings", "on"));
    greeting.extend_from_slice(&backend_key_data(4242, 117));
    greeting.extend_from_slice(&ready_for_query(b'I'));
    send(stream, &greeting);
}
