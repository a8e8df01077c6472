//! PostgreSQL wire protocol v3.
//!
//! Split the way the protocol itself is split: [`codec`] holds the scalar
//! encoding primitives, [`frontend`] writes client messages, [`backend`]
//! decodes server messages, and [`frame`] finds message boundaries in the
//! raw byte stream.

pub mod backend;
pub mod codec;
pub mod frame;
pub mod frontend;
pub mod types;
