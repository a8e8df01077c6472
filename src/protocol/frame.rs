//! Incremental message framing over a byte stream.
//!
//! The transport appends whatever bytes the socket yields; [`ReadBuffer`]
//! hands back one complete message at a time and never splits or merges
//! frames, regardless of how the bytes arrived.

use crate::error::{Error, Result};

/// Largest message payload this client accepts, 1 GiB minus one. Matches the
/// backend's own allocation limit; anything larger means a corrupt length
/// word.
const MAX_MESSAGE_LEN: i32 = 0x3fff_ffff;

/// Buffer of raw backend bytes with frame extraction.
#[derive(Debug, Default)]
pub struct ReadBuffer {
    buf: Vec<u8>,
    pos: usize,
}

impl ReadBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes received from the socket.
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Number of unconsumed bytes.
    pub fn len(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Discard everything, for connection resets.
    pub fn clear(&mut self) {
        self.buf.clear();
        self.pos = 0;
    }

    fn pending(&self) -> &[u8] {
        &self.buf[self.pos..]
    }

    /// Parse the header of the next frame without consuming it.
    ///
    /// Returns `(tag, total frame size)` once 5 header bytes are buffered.
    fn peek_header(&self) -> Result<Option<(u8, usize)>> {
        let pending = self.pending();
        if pending.len() < 5 {
            return Ok(None);
        }
        let tag = pending[0];
        let len = i32::from_be_bytes([pending[1], pending[2], pending[3], pending[4]]);
        if !(4..=MAX_MESSAGE_LEN).contains(&len) {
            return Err(Error::Protocol(format!(
                "invalid message length {} for type 0x{:02x}",
                len, tag
            )));
        }
        Ok(Some((tag, 1 + len as usize)))
    }

    /// Type byte of the next message, if its header is buffered.
    pub fn peek_type(&self) -> Result<Option<u8>> {
        Ok(self.peek_header()?.map(|(tag, _)| tag))
    }

    /// Whether a full message is buffered.
    pub fn has_complete_message(&self) -> Result<bool> {
        match self.peek_header()? {
            Some((_, total)) => Ok(self.pending().len() >= total),
            None => Ok(false),
        }
    }

    /// Extract the next complete message as `(tag, payload)`.
    ///
    /// Returns `Ok(None)` when the buffered bytes do not yet form a whole
    /// frame. The length word is stripped from the payload.
    pub fn next_message(&mut self) -> Result<Option<(u8, Vec<u8>)>> {
        let Some((tag, total)) = self.peek_header()? else {
            return Ok(None);
        };
        if self.pending().len() < total {
            return Ok(None);
        }
        let payload = self.buf[self.pos + 5..self.pos + total].to_vec();
        self.pos += total;

        // Reclaim consumed space once everything buffered has been handed out.
        if self.pos == self.buf.len() {
            self.buf.clear();
            self.pos = 0;
        } else if self.pos > 64 * 1024 {
            self.buf.drain(..self.pos);
            self.pos = 0;
        }
        Ok(Some((tag, payload)))
    }
}
