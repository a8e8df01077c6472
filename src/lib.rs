//! A from-scratch PostgreSQL frontend/backend protocol v3 client.
//!
//! # Features
//!
//! - **Sans-I/O core**: protocol state lives in an [`conn::Engine`] that
//!   never touches a socket, so every transition is unit-testable
//! - **Full query surface**: simple and extended queries, prepared
//!   statements, single-row mode, COPY in both directions
//! - **Asynchronous traffic**: LISTEN/NOTIFY, notices, and parameter
//!   changes are captured in any connection state
//! - **Auth**: cleartext, MD5, and SCRAM-SHA-256; optional TLS behind the
//!   `tls` feature
//!
//! # Example
//!
//! ```no_run
//! use pglink::{Connection, Opts};
//!
//! fn main() -> pglink::Result<()> {
//!     let opts = Opts {
//!         host: "localhost".into(),
//!         user: "postgres".into(),
//!         dbname: Some("mydb".into()),
//!         password: Some("secret".into()),
//!         ..Default::default()
//!     };
//!
//!     let mut conn = Connection::connect(opts)?;
//!     let result = conn.exec("SELECT now()")?;
//!     for row in 0..result.ntuples() {
//!         println!("{:?}", result.value(row, 0));
//!     }
//!     conn.close()?;
//!     Ok(())
//! }
//! ```

pub mod conn;
pub mod error;
pub mod escape;
pub mod lo;
pub mod opts;
pub mod protocol;
pub mod result;

pub use conn::{AsyncStatus, Connection, ConnectionStatus, CopyOut, PingStatus, PollingStatus};
pub use error::{Error, ErrorFields, Result, SqlStateClass};
pub use lo::Whence;
pub use opts::{Opts, SslMode};
pub use protocol::backend::Notification;
pub use protocol::types::{FormatCode, Oid, TransactionStatus};
pub use result::{ExecStatus, QueryResult};
