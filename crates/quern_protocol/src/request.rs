//! Query and blob-read requests.

use std::time::Duration;

use crate::params::EcSqlParams;

/// Process-unique request identifier, assigned by the manager at enqueue.
pub type RequestId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    EcSql,
    BlobIo,
}

/// A read-only ECSQL statement request.
#[derive(Debug, Clone)]
pub struct EcSqlRequest {
    pub ecsql: String,
    pub params: EcSqlParams,
    /// Rows the executor steps past before buffering. This is the paging
    /// cursor the reader uses to resume after a `Partial` response; skipped
    /// rows remain cancellation/time checkpoints but count as no progress.
    pub skip_rows: u64,
    restart_token: Option<String>,
    delay: Option<Duration>,
}

impl EcSqlRequest {
    pub fn new(ecsql: impl Into<String>, params: EcSqlParams) -> Self {
        Self {
            ecsql: ecsql.into(),
            params,
            skip_rows: 0,
            restart_token: None,
            delay: None,
        }
    }

    /// Make a newer request with the same token supersede this one.
    pub fn with_restart_token(mut self, token: impl Into<String>) -> Self {
        self.restart_token = Some(token.into());
        self
    }

    /// Inject an artificial delay before execution starts.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_skip_rows(mut self, skip: u64) -> Self {
        self.skip_rows = skip;
        self
    }
}

impl From<EcSqlRequest> for Request {
    fn from(request: EcSqlRequest) -> Self {
        Request::EcSql(request)
    }
}

/// Byte window of a blob read: `(offset, length)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobRange {
    pub offset: u64,
    pub length: u32,
}

/// A raw blob read keyed by class, property access string, and instance id.
#[derive(Debug, Clone)]
pub struct BlobIoRequest {
    pub class_name: String,
    pub access_string: String,
    pub instance_id: u64,
    /// Window to read; the whole blob when absent.
    pub range: Option<BlobRange>,
    restart_token: Option<String>,
    delay: Option<Duration>,
}

impl BlobIoRequest {
    pub fn new(
        class_name: impl Into<String>,
        access_string: impl Into<String>,
        instance_id: u64,
    ) -> Self {
        Self {
            class_name: class_name.into(),
            access_string: access_string.into(),
            instance_id,
            range: None,
            restart_token: None,
            delay: None,
        }
    }

    pub fn with_range(mut self, offset: u64, length: u32) -> Self {
        self.range = Some(BlobRange { offset, length });
        self
    }

    pub fn with_restart_token(mut self, token: impl Into<String>) -> Self {
        self.restart_token = Some(token.into());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

impl From<BlobIoRequest> for Request {
    fn from(request: BlobIoRequest) -> Self {
        Request::BlobIo(request)
    }
}

/// A request accepted by the manager. Immutable once enqueued; the engine
/// tracks cancellation through a flag held next to the queue entry, not by
/// mutating the request.
#[derive(Debug, Clone)]
pub enum Request {
    EcSql(EcSqlRequest),
    BlobIo(BlobIoRequest),
}

impl Request {
    pub fn kind(&self) -> RequestKind {
        match self {
            Request::EcSql(_) => RequestKind::EcSql,
            Request::BlobIo(_) => RequestKind::BlobIo,
        }
    }

    pub fn restart_token(&self) -> Option<&str> {
        match self {
            Request::EcSql(r) => r.restart_token.as_deref(),
            Request::BlobIo(r) => r.restart_token.as_deref(),
        }
    }

    pub fn delay(&self) -> Option<Duration> {
        match self {
            Request::EcSql(r) => r.delay,
            Request::BlobIo(r) => r.delay,
        }
    }
}
