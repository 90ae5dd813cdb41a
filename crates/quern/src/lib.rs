//! Quern: a concurrent query-execution engine for an embedded relational
//! store.
//!
//! Callers enqueue read-only ECSQL or blob-read requests; a bounded pool
//! of worker threads executes them under per-request (time, memory)
//! quotas with cooperative restart-token cancellation, and delivers
//! exactly one response per request through a blocking future or a
//! callback.
//!
//! The store itself is an external collaborator consumed through the
//! traits in [`store`]; the engine owns admission, scheduling, quota
//! enforcement, and delivery.

pub mod bridge;
pub mod config;
pub mod manager;
pub mod quota;
pub mod reader;
pub mod registry;
pub mod store;
mod worker;

pub use bridge::ResponseFuture;
pub use config::{QueryConfig, QueryQuota};
pub use manager::QueryManager;
pub use reader::{EcSqlReader, JsonFormat, ReaderError, Row};
pub use registry::{CancelFlag, RestartTokenRegistry};
pub use store::{BlobHandle, ColumnInfo, QueryStore, RowCursor, StoreError, StoreReader};

// Re-export the wire model so embedders need only one dependency.
pub use quern_protocol::{
    BlobBytes, BlobIoRequest, BlobRange, ColumnMeta, EcSqlParams, EcSqlRequest, EcSqlValue,
    ParamKey, ParamKind, QueryStats, QueryStatus, Request, RequestId, RequestKind, Response,
    ResponsePayload, RowSet,
};
