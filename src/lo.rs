//! Large object client.
//!
//! Large objects are manipulated through the server-side `lo_*` SQL
//! functions, invoked over the extended protocol with binary parameter
//! and result formats so the payload bytes pass through untouched.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use crate::conn::Connection;
use crate::error::{Error, Result};
use crate::protocol::types::{FormatCode, Oid};
use crate::result::{ExecStatus, QueryResult};

/// Open flag: read access.
pub const INV_READ: i32 = 0x40000;
/// Open flag: write access.
pub const INV_WRITE: i32 = 0x20000;

const OID_BYTEA: Oid = 17;
const OID_INT4: Oid = 23;
const OID_OID: Oid = 26;

const IMPORT_CHUNK: usize = 8 * 1024;

/// Seek origin for [`Connection::lo_seek`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Start,
    Current,
    End,
}

impl Whence {
    fn as_i32(self) -> i32 {
        match self {
            Whence::Start => 0,
            Whence::Current => 1,
            Whence::End => 2,
        }
    }
}

fn first_value(result: &QueryResult) -> Result<&[u8]> {
    if result.status() != ExecStatus::TuplesOk {
        if let Some(fields) = result.error_fields() {
            return Err(Error::Server(fields.clone()));
        }
        return Err(Error::Protocol(format!(
            "large object call returned {:?}",
            result.status()
        )));
    }
    result
        .value(0, 0)
        .ok_or_else(|| Error::Protocol("large object call returned NULL".into()))
}

fn first_i32(result: &QueryResult) -> Result<i32> {
    let value = first_value(result)?;
    let bytes: [u8; 4] = value
        .try_into()
        .map_err(|_| Error::Protocol("expected a 4-byte integer result".into()))?;
    Ok(i32::from_be_bytes(bytes))
}

impl Connection {
    fn lo_call(&mut self, sql: &str, params: &[Option<&[u8]>], oids: &[Oid]) -> Result<QueryResult> {
        let formats = vec![FormatCode::Binary; params.len()];
        self.exec_params(sql, params, &formats, FormatCode::Binary, oids)
    }

    /// Create a large object and return its oid.
    pub fn lo_creat(&mut self, mode: i32) -> Result<Oid> {
        let result = self.lo_call(
            "SELECT lo_creat($1)",
            &[Some(&mode.to_be_bytes())],
            &[OID_INT4],
        )?;
        Ok(first_i32(&result)? as Oid)
    }

    /// Create a large object with a caller-chosen oid.
    pub fn lo_create(&mut self, oid: Oid) -> Result<Oid> {
        let result = self.lo_call(
            "SELECT lo_create($1)",
            &[Some(&oid.to_be_bytes())],
            &[OID_OID],
        )?;
        Ok(first_i32(&result)? as Oid)
    }

    /// Delete a large object.
    pub fn lo_unlink(&mut self, oid: Oid) -> Result<()> {
        let result = self.lo_call(
            "SELECT lo_unlink($1)",
            &[Some(&oid.to_be_bytes())],
            &[OID_OID],
        )?;
        if first_i32(&result)? < 0 {
            return Err(Error::InvalidUsage(format!("lo_unlink({oid}) failed")));
        }
        Ok(())
    }

    /// Open a large object within the current transaction. Returns a
    /// descriptor valid until commit, rollback, or [`lo_close`].
    ///
    /// [`lo_close`]: Self::lo_close
    pub fn lo_open(&mut self, oid: Oid, mode: i32) -> Result<i32> {
        let result = self.lo_call(
            "SELECT lo_open($1, $2)",
            &[Some(&oid.to_be_bytes()), Some(&mode.to_be_bytes())],
            &[OID_OID, OID_INT4],
        )?;
        let fd = first_i32(&result)?;
        if fd < 0 {
            return Err(Error::InvalidUsage(format!("lo_open({oid}) failed")));
        }
        Ok(fd)
    }

    /// Close a large object descriptor.
    pub fn lo_close(&mut self, fd: i32) -> Result<()> {
        let result = self.lo_call(
            "SELECT lo_close($1)",
            &[Some(&fd.to_be_bytes())],
            &[OID_INT4],
        )?;
        if first_i32(&result)? < 0 {
            return Err(Error::InvalidUsage(format!("lo_close({fd}) failed")));
        }
        Ok(())
    }

    /// Read up to `len` bytes from a descriptor at its current position.
    pub fn lo_read(&mut self, fd: i32, len: i32) -> Result<Vec<u8>> {
        let result = self.lo_call(
            "SELECT loread($1, $2)",
            &[Some(&fd.to_be_bytes()), Some(&len.to_be_bytes())],
            &[OID_INT4, OID_INT4],
        )?;
        Ok(first_value(&result)?.to_vec())
    }

    /// Write bytes at the descriptor's current position. Returns the
    /// number of bytes written.
    pub fn lo_write(&mut self, fd: i32, data: &[u8]) -> Result<i32> {
        let result = self.lo_call(
            "SELECT lowrite($1, $2)",
            &[Some(&fd.to_be_bytes()), Some(data)],
            &[OID_INT4, OID_BYTEA],
        )?;
        let written = first_i32(&result)?;
        if written < 0 {
            return Err(Error::InvalidUsage(format!("lowrite({fd}) failed")));
        }
        Ok(written)
    }

    /// Reposition a descriptor. Returns the new position.
    pub fn lo_seek(&mut self, fd: i32, offset: i32, whence: Whence) -> Result<i32> {
        let result = self.lo_call(
            "SELECT lo_lseek($1, $2, $3)",
            &[
                Some(&fd.to_be_bytes()),
                Some(&offset.to_be_bytes()),
                Some(&whence.as_i32().to_be_bytes()),
            ],
            &[OID_INT4, OID_INT4, OID_INT4],
        )?;
        first_i32(&result)
    }

    /// Current position of a descriptor.
    pub fn lo_tell(&mut self, fd: i32) -> Result<i32> {
        let result = self.lo_call(
            "SELECT lo_tell($1)",
            &[Some(&fd.to_be_bytes())],
            &[OID_INT4],
        )?;
        first_i32(&result)
    }

    /// Truncate (or zero-extend) a large object to `len` bytes.
    pub fn lo_truncate(&mut self, fd: i32, len: i32) -> Result<()> {
        let result = self.lo_call(
            "SELECT lo_truncate($1, $2)",
            &[Some(&fd.to_be_bytes()), Some(&len.to_be_bytes())],
            &[OID_INT4, OID_INT4],
        )?;
        if first_i32(&result)? < 0 {
            return Err(Error::InvalidUsage(format!("lo_truncate({fd}) failed")));
        }
        Ok(())
    }

    /// Import a local file as a new large object and return its oid.
    pub fn lo_import(&mut self, path: &Path) -> Result<Oid> {
        let mut file = File::open(path)?;
        let oid = self.lo_creat(INV_READ | INV_WRITE)?;
        let fd = self.lo_open(oid, INV_WRITE)?;
        let mut chunk = [0u8; IMPORT_CHUNK];
        loop {
            let n = file.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            let mut written = 0;
            while written < n {
                written += self.lo_write(fd, &chunk[written..n])? as usize;
            }
        }
        self.lo_close(fd)?;
        Ok(oid)
    }

    /// Export a large object into a local file.
    pub fn lo_export(&mut self, oid: Oid, path: &Path) -> Result<()> {
        let mut file = File::create(path)?;
        let fd = self.lo_open(oid, INV_READ)?;
        loop {
            let chunk = self.lo_read(fd, IMPORT_CHUNK as i32)?;
            if chunk.is_empty() {
                break;
            }
            file.write_all(&chunk)?;
        }
        self.lo_close(fd)?;
        file.flush()?;
        Ok(())
    }
}
