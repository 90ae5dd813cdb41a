//! Responses, statuses, row sets, and column metadata.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::request::RequestId;

/// Terminal status of an executed request.
/// This is the CANONICAL status enum - every response carries exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueryStatus {
    /// Full result delivered.
    Done,
    /// Quota exhausted after at least one unit of progress; the payload is
    /// a valid order-preserving prefix.
    Partial,
    /// Quota exhausted before any progress; empty payload.
    Timeout,
    /// Superseded by a newer request with the same restart token.
    Cancel,
    /// Resolution or execution failure; see `Response::error`.
    Error,
}

impl QueryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryStatus::Done => "DONE",
            QueryStatus::Partial => "PARTIAL",
            QueryStatus::Timeout => "TIMEOUT",
            QueryStatus::Cancel => "CANCEL",
            QueryStatus::Error => "ERROR",
        }
    }

    /// Partial and Done both carry usable payload prefixes.
    pub fn has_payload(&self) -> bool {
        matches!(self, QueryStatus::Done | QueryStatus::Partial)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, QueryStatus::Error)
    }
}

impl fmt::Display for QueryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for QueryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "DONE" => Ok(QueryStatus::Done),
            "PARTIAL" => Ok(QueryStatus::Partial),
            "TIMEOUT" => Ok(QueryStatus::Timeout),
            "CANCEL" => Ok(QueryStatus::Cancel),
            "ERROR" => Ok(QueryStatus::Error),
            _ => Err(format!("Invalid query status: '{}'", s)),
        }
    }
}

/// Resource accounting for one executed request.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryStats {
    total_time: Duration,
    mem_used: u64,
}

impl QueryStats {
    pub fn new(total_time: Duration, mem_used: u64) -> Self {
        Self {
            total_time,
            mem_used,
        }
    }

    /// Wall time from worker pickup through completion, injected delay
    /// included.
    pub fn total_time(&self) -> Duration {
        self.total_time
    }

    /// Serialized bytes of rows / blob bytes produced.
    pub fn mem_used(&self) -> u64 {
        self.mem_used
    }
}

/// Per-column metadata of a query result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMeta {
    /// Ordinal position in the row.
    pub index: usize,
    /// Storage name as declared.
    pub name: String,
    /// `name` with its first letter lowercased.
    pub json_name: String,
    /// Declared type name, e.g. `long`, `string`, `binary`.
    pub type_name: String,
    /// Extended-type tag such as `Id` or `ClassId`, when declared.
    pub extended_type: Option<String>,
    /// Owning class, absent for expression columns.
    pub class_name: Option<String>,
    /// True for computed/expression columns such as `COUNT(*)`.
    pub generated: bool,
}

impl ColumnMeta {
    /// Lowercase the first letter: the documented json-name rule.
    pub fn json_name_for(name: &str) -> String {
        let mut chars = name.chars();
        match chars.next() {
            Some(first) => first.to_lowercase().collect::<String>() + chars.as_str(),
            None => String::new(),
        }
    }
}

/// Buffered rows plus their column metadata. Row cells are JSON values in
/// column order.
#[derive(Debug, Clone, Default)]
pub struct RowSet {
    pub columns: Vec<ColumnMeta>,
    pub rows: Vec<Vec<Value>>,
}

impl RowSet {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Bytes read from a blob window.
#[derive(Debug, Clone, Default)]
pub struct BlobBytes {
    data: Vec<u8>,
}

impl BlobBytes {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Closed payload variant so callers can match exhaustively instead of
/// downcasting.
#[derive(Debug, Clone)]
pub enum ResponsePayload {
    Rows(RowSet),
    Blob(BlobBytes),
    None,
}

/// Exactly one `Response` is delivered per accepted request.
#[derive(Debug, Clone)]
pub struct Response {
    id: RequestId,
    status: QueryStatus,
    payload: ResponsePayload,
    stats: QueryStats,
    error: Option<String>,
}

impl Response {
    pub fn done(id: RequestId, payload: ResponsePayload, stats: QueryStats) -> Self {
        Self {
            id,
            status: QueryStatus::Done,
            payload,
            stats,
            error: None,
        }
    }

    pub fn partial(id: RequestId, payload: ResponsePayload, stats: QueryStats) -> Self {
        Self {
            id,
            status: QueryStatus::Partial,
            payload,
            stats,
            error: None,
        }
    }

    pub fn timeout(id: RequestId, stats: QueryStats) -> Self {
        Self {
            id,
            status: QueryStatus::Timeout,
            payload: ResponsePayload::None,
            stats,
            error: None,
        }
    }

    pub fn cancel(id: RequestId, stats: QueryStats) -> Self {
        Self {
            id,
            status: QueryStatus::Cancel,
            payload: ResponsePayload::None,
            stats,
            error: None,
        }
    }

    pub fn error(id: RequestId, message: impl Into<String>, stats: QueryStats) -> Self {
        Self {
            id,
            status: QueryStatus::Error,
            payload: ResponsePayload::None,
            stats,
            error: Some(message.into()),
        }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn status(&self) -> QueryStatus {
        self.status
    }

    /// Valid iff `status() == QueryStatus::Error`.
    pub fn error_message(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn stats(&self) -> &QueryStats {
        &self.stats
    }

    pub fn payload(&self) -> &ResponsePayload {
        &self.payload
    }

    pub fn rows(&self) -> Option<&RowSet> {
        match &self.payload {
            ResponsePayload::Rows(rows) => Some(rows),
            _ => None,
        }
    }

    pub fn blob(&self) -> Option<&BlobBytes> {
        match &self.payload {
            ResponsePayload::Blob(blob) => Some(blob),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_string_round_trip() {
        for status in [
            QueryStatus::Done,
            QueryStatus::Partial,
            QueryStatus::Timeout,
            QueryStatus::Cancel,
            QueryStatus::Error,
        ] {
            assert_eq!(status.as_str().parse::<QueryStatus>().unwrap(), status);
        }
        assert!("RUNNING".parse::<QueryStatus>().is_err());
    }

    #[test]
    fn test_json_name_lowering() {
        assert_eq!(ColumnMeta::json_name_for("Name"), "name");
        assert_eq!(ColumnMeta::json_name_for("ECInstanceId"), "eCInstanceId");
        assert_eq!(ColumnMeta::json_name_for("lastMod"), "lastMod");
        assert_eq!(ColumnMeta::json_name_for(""), "");
    }

    #[test]
    fn test_payload_accessors() {
        let stats = QueryStats::default();
        let done = Response::done(7, ResponsePayload::Rows(RowSet::default()), stats);
        assert!(done.rows().is_some());
        assert!(done.blob().is_none());

        let err = Response::error(8, "bad statement", stats);
        assert_eq!(err.status(), QueryStatus::Error);
        assert_eq!(err.error_message(), Some("bad statement"));
        assert!(err.rows().is_none());
    }
}
