//! Wire model for the Quern concurrent query engine.
//!
//! Everything a caller hands to the engine (requests, bound parameter
//! values) and everything the engine hands back (responses, row sets,
//! column metadata) lives here. The parameter JSON encoding is a
//! compatibility contract: each bound value serializes as
//! `{ "type": <code>, "value": <encoded> }` with fixed type codes, and
//! round-tripping a parameter set through [`EcSqlParams::to_js`] /
//! [`EcSqlParams::from_js`] reproduces identical JSON bytes.

pub mod error;
pub mod params;
pub mod request;
pub mod response;
pub mod value;

pub use error::{ProtocolError, Result};
pub use params::{EcSqlParams, ParamKey};
pub use request::{BlobIoRequest, BlobRange, EcSqlRequest, Request, RequestId, RequestKind};
pub use response::{
    BlobBytes, ColumnMeta, QueryStats, QueryStatus, Response, ResponsePayload, RowSet,
};
pub use value::{decode_id_set, encode_id_set, format_id, parse_id, EcSqlValue, ParamKind};
