//! Synchronous pull cursor over an ECSQL request.
//!
//! Wraps one statement, submitted lazily on the first `next()`. When a
//! page comes back `Partial` the reader resubmits the statement with the
//! consumed-row count as the skip cursor, so every row is delivered
//! exactly once and in execution order.

use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;

use quern_protocol::{ColumnMeta, EcSqlParams, EcSqlRequest, QueryStatus};

use crate::manager::QueryManager;

#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("query failed: {0}")]
    Query(String),

    #[error("query hit its quota before producing any rows")]
    Timeout,

    #[error("query was cancelled")]
    Cancelled,
}

/// Key style for [`Row::to_json`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonFormat {
    /// Keys are the lowerCamel json names.
    UseJsonName,
    /// Keys are the declared column names.
    UseName,
}

/// A view of the current row, indexable by ordinal, column metadata, or
/// json name.
pub struct Row<'a> {
    columns: &'a [ColumnMeta],
    cells: &'a [Value],
}

impl<'a> Row<'a> {
    pub fn columns(&self) -> &[ColumnMeta] {
        self.columns
    }

    pub fn value(&self, ordinal: usize) -> Option<&Value> {
        self.cells.get(ordinal)
    }

    pub fn value_by_column(&self, column: &ColumnMeta) -> Option<&Value> {
        self.cells.get(column.index)
    }

    pub fn value_by_json_name(&self, json_name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|c| c.json_name == json_name)
            .and_then(|c| self.cells.get(c.index))
    }

    /// Render the row as a JSON object keyed per `format`.
    pub fn to_json(&self, format: JsonFormat) -> Value {
        let mut obj = Map::new();
        for column in self.columns {
            let key = match format {
                JsonFormat::UseJsonName => column.json_name.clone(),
                JsonFormat::UseName => column.name.clone(),
            };
            let cell = self.cells.get(column.index).cloned().unwrap_or(Value::Null);
            obj.insert(key, cell);
        }
        Value::Object(obj)
    }
}

/// Pull cursor built on top of enqueue/get.
pub struct EcSqlReader {
    manager: Arc<QueryManager>,
    ecsql: String,
    params: EcSqlParams,
    columns: Vec<ColumnMeta>,
    page: Option<Vec<Vec<Value>>>,
    row_index: Option<usize>,
    /// Rows handed to the caller so far; the skip cursor of the next page.
    consumed: u64,
    finished: bool,
    started: bool,
}

impl EcSqlReader {
    pub fn new(manager: &Arc<QueryManager>, ecsql: impl Into<String>, params: EcSqlParams) -> Self {
        Self {
            manager: Arc::clone(manager),
            ecsql: ecsql.into(),
            params,
            columns: Vec::new(),
            page: None,
            row_index: None,
            consumed: 0,
            finished: false,
            started: false,
        }
    }

    /// Advance to the next row. `Ok(false)` once a `Done` page is
    /// exhausted.
    pub fn next(&mut self) -> Result<bool, ReaderError> {
        loop {
            if self.page.is_none() {
                if self.finished {
                    return Ok(false);
                }
                self.fetch_page()?;
            }

            let page = self.page.as_ref().unwrap();
            let next_index = self.row_index.map_or(0, |i| i + 1);
            if next_index < page.len() {
                self.row_index = Some(next_index);
                self.consumed += 1;
                return Ok(true);
            }

            // Page exhausted; fetch the continuation unless it was final.
            self.page = None;
            self.row_index = None;
            if self.finished {
                return Ok(false);
            }
        }
    }

    /// Column metadata; fetches the first page when needed.
    pub fn columns(&mut self) -> Result<&[ColumnMeta], ReaderError> {
        if !self.started && self.page.is_none() {
            self.fetch_page()?;
        }
        Ok(&self.columns)
    }

    /// The current row, if `next()` returned true.
    pub fn row(&self) -> Option<Row<'_>> {
        let page = self.page.as_ref()?;
        let index = self.row_index?;
        Some(Row {
            columns: &self.columns,
            cells: page.get(index)?,
        })
    }

    fn fetch_page(&mut self) -> Result<(), ReaderError> {
        let request = EcSqlRequest::new(self.ecsql.clone(), self.params.clone())
            .with_skip_rows(self.consumed);
        let response = self.manager.enqueue(request).get();
        self.started = true;

        match response.status() {
            QueryStatus::Done | QueryStatus::Partial => {
                let rows = response.rows().cloned().unwrap_or_default();
                if self.columns.is_empty() {
                    self.columns = rows.columns;
                }
                self.finished = response.status() == QueryStatus::Done;
                self.page = Some(rows.rows);
                self.row_index = None;
                Ok(())
            }
            QueryStatus::Timeout => Err(ReaderError::Timeout),
            QueryStatus::Cancel => Err(ReaderError::Cancelled),
            QueryStatus::Error => Err(ReaderError::Query(
                response
                    .error_message()
                    .unwrap_or("execution failed")
                    .to_string(),
            )),
        }
    }
}
