//! Byte transport under the protocol: TCP, optionally wrapped in TLS.

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::opts::{Opts, SslMode};

/// Established byte stream to the server.
pub enum Transport {
    Plain(TcpStream),
    #[cfg(feature = "tls")]
    Tls(Box<native_tls::TlsStream<TcpStream>>),
}

/// Open a TCP connection, trying every resolved address.
pub fn dial(host: &str, port: u16, timeout: Option<Duration>) -> Result<TcpStream> {
    if host.is_empty() {
        return Err(Error::InvalidUsage("host is empty".into()));
    }
    let addrs: Vec<_> = (host, port).to_socket_addrs()?.collect();
    if addrs.is_empty() {
        return Err(Error::InvalidUsage(format!(
            "host resolved to no addresses: {host}"
        )));
    }
    let mut last_err = None;
    for addr in addrs {
        let attempt = match timeout {
            Some(t) => TcpStream::connect_timeout(&addr, t),
            None => TcpStream::connect(addr),
        };
        match attempt {
            Ok(stream) => {
                stream.set_nodelay(true)?;
                return Ok(stream);
            }
            Err(e) => last_err = Some(e),
        }
    }
    // addrs was non-empty, so at least one attempt ran
    Err(last_err
        .map(Error::Io)
        .unwrap_or(Error::ConnectionBroken))
}

impl Transport {
    pub fn plain(stream: TcpStream) -> Self {
        Transport::Plain(stream)
    }

    fn tcp(&self) -> &TcpStream {
        match self {
            Transport::Plain(s) => s,
            #[cfg(feature = "tls")]
            Transport::Tls(s) => s.get_ref(),
        }
    }

    /// Switch the underlying socket between blocking and non-blocking reads.
    pub fn set_nonblocking(&self, nonblocking: bool) -> Result<()> {
        self.tcp().set_nonblocking(nonblocking)?;
        Ok(())
    }

    /// Bound the next blocking read. `None` removes the bound.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.tcp().set_read_timeout(timeout)?;
        Ok(())
    }

    pub fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Transport::Plain(s) => s.read(buf),
            #[cfg(feature = "tls")]
            Transport::Tls(s) => s.read(buf),
        }
    }

    pub fn read_exact(&mut self, buf: &mut [u8]) -> std::io::Result<()> {
        match self {
            Transport::Plain(s) => s.read_exact(buf),
            #[cfg(feature = "tls")]
            Transport::Tls(s) => s.read_exact(buf),
        }
    }

    pub fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        match self {
            Transport::Plain(s) => s.write_all(buf),
            #[cfg(feature = "tls")]
            Transport::Tls(s) => s.write_all(buf),
        }
    }

    pub fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Transport::Plain(s) => s.flush(),
            #[cfg(feature = "tls")]
            Transport::Tls(s) => s.flush(),
        }
    }

    /// Run the client half of a TLS handshake over an accepted SSLRequest.
    ///
    /// Verification follows the ssl mode: `require` skips it entirely,
    /// `verify-ca` checks the chain, `verify-full` also checks the
    /// hostname.
    #[cfg(feature = "tls")]
    pub fn upgrade_tls(self, host: &str, mode: SslMode) -> Result<Self> {
        let Transport::Plain(stream) = self else {
            return Err(Error::InvalidUsage("connection is already encrypted".into()));
        };
        let connector = native_tls::TlsConnector::builder()
            .danger_accept_invalid_certs(!mode.verify_ca())
            .danger_accept_invalid_hostnames(!mode.verify_hostname())
            .build()?;
        let tls = connector
            .connect(host, stream)
            .map_err(|e| match e {
                native_tls::HandshakeError::Failure(e) => Error::Tls(e),
                native_tls::HandshakeError::WouldBlock(_) => {
                    Error::Protocol("TLS handshake interrupted".into())
                }
            })?;
        Ok(Transport::Tls(Box::new(tls)))
    }

    #[cfg(not(feature = "tls"))]
    pub fn upgrade_tls(self, _host: &str, _mode: SslMode) -> Result<Self> {
        Err(Error::Unsupported(
            "server accepted SSL but the tls feature is disabled".into(),
        ))
    }

    pub fn is_encrypted(&self) -> bool {
        match self {
            Transport::Plain(_) => false,
            #[cfg(feature = "tls")]
            Transport::Tls(_) => true,
        }
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transport::Plain(s) => f.debug_tuple("Plain").field(&s.peer_addr().ok()).finish(),
            #[cfg(feature = "tls")]
            Transport::Tls(s) => f
                .debug_tuple("Tls")
                .field(&s.get_ref().peer_addr().ok())
                .finish(),
        }
    }
}

/// Dial the server named by `opts`.
pub fn dial_opts(opts: &Opts, timeout: Option<Duration>) -> Result<TcpStream> {
    dial(&opts.host, opts.port, timeout)
}
