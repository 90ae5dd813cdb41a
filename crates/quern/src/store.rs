//! Capability traits for the embedded store.
//!
//! The engine never parses ECSQL or touches pages itself; it consumes the
//! store through these seams: open a read-only connection, prepare and step
//! a statement, read blob bytes at an offset. Production code implements
//! them over the real store; tests use the in-memory fixture from
//! `quern_test_utils`.

use serde_json::Value;
use thiserror::Error;

use quern_protocol::EcSqlParams;

/// Store-side failure taxonomy. The worker converts every variant into an
/// `Error` response; it never unwinds a worker thread.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Statement failed to prepare (syntax or semantic error).
    #[error("{0}")]
    Prepare(String),

    /// Statement failed while stepping.
    #[error("{0}")]
    Step(String),

    /// Blob resolution: the class name is unknown to the catalog.
    #[error("unknown class '{0}'")]
    ClassNotFound(String),

    /// Blob resolution: class exists but the property/instance does not
    /// open as a blob.
    #[error("unable to open blob: {0}")]
    BlobOpen(String),

    /// Read-only connection could not be opened.
    #[error("cannot open read-only connection: {0}")]
    Connection(String),
}

/// Per-column facts reported by a prepared statement.
#[derive(Debug, Clone)]
pub struct ColumnInfo {
    pub name: String,
    pub type_name: String,
    /// Extended-type tag such as `Id` or `ClassId`.
    pub extended_type: Option<String>,
    /// Owning class, absent for expression columns.
    pub class_name: Option<String>,
    /// True for computed/expression columns.
    pub generated: bool,
}

/// A handle to the underlying store. Shared by the manager and every
/// worker; each worker opens its own read-only connection from it.
pub trait QueryStore: Send + Sync {
    fn open_reader(&self) -> Result<Box<dyn StoreReader>, StoreError>;
}

/// One read-only connection, owned by a single worker thread and reused
/// across requests.
pub trait StoreReader: Send {
    /// Prepare a statement with its bound parameters.
    fn prepare(&mut self, ecsql: &str, params: &EcSqlParams)
        -> Result<Box<dyn RowCursor>, StoreError>;

    /// Resolve class + property access string + instance id to an open
    /// blob.
    fn open_blob(
        &mut self,
        class_name: &str,
        access_string: &str,
        instance_id: u64,
    ) -> Result<Box<dyn BlobHandle>, StoreError>;
}

/// Steppable cursor over a prepared statement.
pub trait RowCursor: Send {
    fn columns(&self) -> &[ColumnInfo];

    /// Produce the next row as JSON cells in column order, or `None` at the
    /// end of the result set.
    fn next_row(&mut self) -> Result<Option<Vec<Value>>, StoreError>;
}

/// An opened blob.
pub trait BlobHandle: Send {
    fn size(&self) -> u64;

    /// Read exactly `length` bytes at `offset`. The engine validates the
    /// window against `size()` before calling.
    fn read(&mut self, offset: u64, length: usize) -> Result<Vec<u8>, StoreError>;
}
