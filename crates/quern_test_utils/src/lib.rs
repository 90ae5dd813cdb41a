//! In-memory store fixture implementing the Quern store traits.
//!
//! Tests declare classes, instances, blob columns, and scripted statements
//! up front; the engine then runs against the fixture exactly as it would
//! against a real store. Scripted statements can attach a per-row cost to
//! simulate expensive user functions.

use serde_json::Value;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use quern::store::{BlobHandle, ColumnInfo, QueryStore, RowCursor, StoreError, StoreReader};
use quern_protocol::{format_id, EcSqlParams};

/// A declared property of a fixture class.
#[derive(Debug, Clone)]
pub struct PropertyDef {
    pub name: String,
    pub type_name: String,
}

/// A fixture class: name plus properties in declaration order.
#[derive(Debug, Clone)]
pub struct ClassDef {
    pub name: String,
    pub properties: Vec<PropertyDef>,
}

/// A canned statement: fixed columns, fixed rows, optional per-row cost.
#[derive(Debug, Clone, Default)]
pub struct Script {
    columns: Vec<ColumnInfo>,
    rows: Vec<Vec<Value>>,
    row_cost: Duration,
}

impl Script {
    /// Plain data columns, `(name, type_name)` each.
    pub fn new(columns: &[(&str, &str)], rows: Vec<Vec<Value>>) -> Self {
        Self {
            columns: columns
                .iter()
                .map(|(name, type_name)| ColumnInfo {
                    name: (*name).to_string(),
                    type_name: (*type_name).to_string(),
                    extended_type: None,
                    class_name: None,
                    generated: false,
                })
                .collect(),
            rows,
            row_cost: Duration::ZERO,
        }
    }

    /// Mark one column as a computed/expression column.
    pub fn with_generated(mut self, column: &str) -> Self {
        for info in &mut self.columns {
            if info.name == column {
                info.generated = true;
            }
        }
        self
    }

    /// Sleep this long before yielding each row, like an expensive per-row
    /// function call.
    pub fn with_row_cost(mut self, cost: Duration) -> Self {
        self.row_cost = cost;
        self
    }
}

struct StoreData {
    classes: Vec<ClassDef>,
    /// class name -> instance id -> property values
    instances: HashMap<String, BTreeMap<u64, HashMap<String, Value>>>,
    /// (class name, access string, instance id) -> bytes
    blobs: HashMap<(String, String, u64), Vec<u8>>,
    scripts: HashMap<String, Script>,
}

impl StoreData {
    fn find_class(&self, name: &str) -> Option<(usize, &ClassDef)> {
        self.classes
            .iter()
            .enumerate()
            .find(|(_, class)| class.name.eq_ignore_ascii_case(name))
    }
}

/// Builder for [`MemoryStore`].
pub struct MemoryStoreBuilder {
    data: StoreData,
}

impl Default for MemoryStoreBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStoreBuilder {
    pub fn new() -> Self {
        Self {
            data: StoreData {
                classes: Vec::new(),
                instances: HashMap::new(),
                blobs: HashMap::new(),
                scripts: HashMap::new(),
            },
        }
    }

    /// Declare a class with `(name, type_name)` properties.
    pub fn class(mut self, name: &str, properties: &[(&str, &str)]) -> Self {
        self.data.classes.push(ClassDef {
            name: name.to_string(),
            properties: properties
                .iter()
                .map(|(prop, type_name)| PropertyDef {
                    name: (*prop).to_string(),
                    type_name: (*type_name).to_string(),
                })
                .collect(),
        });
        self
    }

    /// Insert an instance of a declared class.
    pub fn instance(mut self, class: &str, id: u64, values: &[(&str, Value)]) -> Self {
        let row = values
            .iter()
            .map(|(prop, value)| ((*prop).to_string(), value.clone()))
            .collect();
        self.data
            .instances
            .entry(class.to_string())
            .or_default()
            .insert(id, row);
        self
    }

    /// Attach blob bytes to (class, access string, instance).
    pub fn blob(mut self, class: &str, access_string: &str, id: u64, bytes: Vec<u8>) -> Self {
        self.data
            .blobs
            .insert((class.to_string(), access_string.to_string(), id), bytes);
        self
    }

    /// Script an exact statement text.
    pub fn statement(mut self, ecsql: &str, script: Script) -> Self {
        self.data.scripts.insert(ecsql.to_string(), script);
        self
    }

    pub fn build(self) -> Arc<dyn QueryStore> {
        Arc::new(MemoryStore {
            data: Arc::new(self.data),
        })
    }
}

/// The fixture store handle. Every opened reader shares the same data.
pub struct MemoryStore {
    data: Arc<StoreData>,
}

impl QueryStore for MemoryStore {
    fn open_reader(&self) -> Result<Box<dyn StoreReader>, StoreError> {
        Ok(Box::new(MemoryReader {
            data: Arc::clone(&self.data),
        }))
    }
}

struct MemoryReader {
    data: Arc<StoreData>,
}

impl StoreReader for MemoryReader {
    fn prepare(
        &mut self,
        ecsql: &str,
        _params: &EcSqlParams,
    ) -> Result<Box<dyn RowCursor>, StoreError> {
        if let Some(script) = self.data.scripts.get(ecsql) {
            return Ok(Box::new(FixedCursor {
                columns: script.columns.clone(),
                rows: script.rows.clone().into(),
                row_cost: script.row_cost,
            }));
        }

        if let Some(class_name) = select_star_target(ecsql) {
            if let Some((class_index, class)) = self.data.find_class(class_name) {
                return Ok(Box::new(self.select_all(class_index, class)));
            }
        }

        Err(StoreError::Prepare(format!(
            "unable to prepare ECSQL statement: {}",
            ecsql
        )))
    }

    fn open_blob(
        &mut self,
        class_name: &str,
        access_string: &str,
        instance_id: u64,
    ) -> Result<Box<dyn BlobHandle>, StoreError> {
        let (_, class) = self
            .data
            .find_class(class_name)
            .ok_or_else(|| StoreError::ClassNotFound(class_name.to_string()))?;

        let key = (
            class.name.clone(),
            access_string.to_string(),
            instance_id,
        );
        let bytes = self.data.blobs.get(&key).ok_or_else(|| {
            StoreError::BlobOpen(format!(
                "no blob at '{}' on instance {}",
                access_string,
                format_id(instance_id)
            ))
        })?;

        Ok(Box::new(MemoryBlob {
            bytes: bytes.clone(),
        }))
    }
}

impl MemoryReader {
    fn select_all(&self, class_index: usize, class: &ClassDef) -> FixedCursor {
        let mut columns = vec![
            ColumnInfo {
                name: "ECInstanceId".to_string(),
                type_name: "long".to_string(),
                extended_type: Some("Id".to_string()),
                class_name: Some(class.name.clone()),
                generated: false,
            },
            ColumnInfo {
                name: "ECClassId".to_string(),
                type_name: "long".to_string(),
                extended_type: Some("ClassId".to_string()),
                class_name: Some(class.name.clone()),
                generated: false,
            },
        ];
        for property in &class.properties {
            columns.push(ColumnInfo {
                name: property.name.clone(),
                type_name: property.type_name.clone(),
                extended_type: None,
                class_name: Some(class.name.clone()),
                generated: false,
            });
        }

        let class_id = 0x100 + class_index as u64;
        let empty = BTreeMap::new();
        let instances = self.data.instances.get(&class.name).unwrap_or(&empty);

        let rows = instances
            .iter()
            .map(|(id, values)| {
                let mut cells = vec![
                    Value::String(format_id(*id)),
                    Value::String(format_id(class_id)),
                ];
                for property in &class.properties {
                    cells.push(values.get(&property.name).cloned().unwrap_or(Value::Null));
                }
                cells
            })
            .collect::<Vec<_>>();

        FixedCursor {
            columns,
            rows: rows.into(),
            row_cost: Duration::ZERO,
        }
    }
}

/// Pull `SELECT * FROM <class>` apart; anything else is not understood by
/// the fixture.
fn select_star_target(ecsql: &str) -> Option<&str> {
    let trimmed = ecsql.trim();
    let lower = trimmed.to_ascii_lowercase();
    let rest = lower.strip_prefix("select * from ")?;
    let target_len = rest.split_whitespace().next()?.len();
    let start = trimmed.len() - rest.len();
    Some(&trimmed[start..start + target_len])
}

struct FixedCursor {
    columns: Vec<ColumnInfo>,
    rows: VecDeque<Vec<Value>>,
    row_cost: Duration,
}

impl RowCursor for FixedCursor {
    fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }

    fn next_row(&mut self) -> Result<Option<Vec<Value>>, StoreError> {
        match self.rows.pop_front() {
            Some(row) => {
                if !self.row_cost.is_zero() {
                    thread::sleep(self.row_cost);
                }
                Ok(Some(row))
            }
            None => Ok(None),
        }
    }
}

struct MemoryBlob {
    bytes: Vec<u8>,
}

impl BlobHandle for MemoryBlob {
    fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn read(&mut self, offset: u64, length: usize) -> Result<Vec<u8>, StoreError> {
        let start = offset as usize;
        let end = start.checked_add(length).filter(|&e| e <= self.bytes.len());
        match end {
            Some(end) => Ok(self.bytes[start..end].to_vec()),
            None => Err(StoreError::Step("blob read out of range".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_star_target() {
        assert_eq!(select_star_target("SELECT * FROM ts.Foo"), Some("ts.Foo"));
        assert_eq!(select_star_target("select * from ts.foo "), Some("ts.foo"));
        assert_eq!(select_star_target("SELECT Name FROM ts.Foo"), None);
    }

    #[test]
    fn test_unknown_statement_fails_prepare() {
        let store = MemoryStoreBuilder::new().build();
        let mut reader = store.open_reader().unwrap();
        let result = reader.prepare("DELETE FROM ts.Foo", &EcSqlParams::new());
        assert!(matches!(result, Err(StoreError::Prepare(_))));
    }
}
