use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::database::Table;
use crate::errors::{DomainError, DomainResult};
use crate::types::{Row, Timestamp};
use crate::validation::Validate;

/// A typed record backed by one synchronised table.
///
/// Implementors serialise to a JSON object whose keys are the table's column
/// names, so the generic store never needs per-entity SQL.
pub trait Entity: Validate + Serialize + DeserializeOwned + Send + Sync + Unpin + 'static {
    const TABLE: Table;

    fn id(&self) -> Uuid;

    fn last_modified_at(&self) -> Timestamp;

    fn to_row(&self) -> DomainResult<Row> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            other => Err(DomainError::Serialization(format!(
                "{} did not serialise to an object: {}",
                Self::TABLE,
                other
            ))),
        }
    }

    fn from_row(row: Row) -> DomainResult<Self> {
        Ok(serde_json::from_value(Value::Object(row))?)
    }
}
