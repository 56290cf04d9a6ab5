use serde_json::{Number, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row as _, Sqlite};

use crate::database::schema::{Column, ColumnType, TableSchema};
use crate::errors::{DbError, DomainError, DomainResult, ValidationError};
use crate::types::{RecordSyncStatus, Row};

/// A row as stored locally, including the bookkeeping columns that never go on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRow {
    pub row: Row,
    pub deleted: bool,
    pub sync_status: RecordSyncStatus,
}

/// Decode a sqlite row selected with `schema.column_list()` (plus optional bookkeeping columns).
pub(crate) fn decode_row(schema: &TableSchema, row: &SqliteRow) -> DomainResult<Row> {
    let mut out = Row::new();
    for column in schema.columns {
        let value = match column.kind {
            ColumnType::Uuid | ColumnType::Text | ColumnType::Decimal | ColumnType::Date => row
                .try_get::<Option<String>, _>(column.name)
                .map_err(DbError::from)?
                .map(Value::String),
            ColumnType::Integer | ColumnType::Timestamp => row
                .try_get::<Option<i64>, _>(column.name)
                .map_err(DbError::from)?
                .map(|v| Value::Number(Number::from(v))),
            ColumnType::Boolean => row
                .try_get::<Option<bool>, _>(column.name)
                .map_err(DbError::from)?
                .map(Value::Bool),
        };
        out.insert(column.name.to_string(), value.unwrap_or(Value::Null));
    }
    Ok(out)
}

pub(crate) fn decode_stored(schema: &TableSchema, row: &SqliteRow) -> DomainResult<StoredRow> {
    let deleted: bool = row.try_get("deleted").map_err(DbError::from)?;
    let status: String = row.try_get("sync_status").map_err(DbError::from)?;
    let sync_status = RecordSyncStatus::from_str(&status).ok_or_else(|| {
        DomainError::Validation(ValidationError::invalid_value("sync_status", &status))
    })?;
    Ok(StoredRow {
        row: decode_row(schema, row)?,
        deleted,
        sync_status,
    })
}

/// Push a typed bind for `value` according to the column's declared type.
pub(crate) fn push_bind_value(
    builder: &mut QueryBuilder<'_, Sqlite>,
    column: &Column,
    value: &Value,
) -> DomainResult<()> {
    if value.is_null() {
        if !column.nullable {
            return Err(ValidationError::required(column.name).into());
        }
        match column.kind {
            ColumnType::Integer | ColumnType::Timestamp => builder.push_bind(None::<i64>),
            ColumnType::Boolean => builder.push_bind(None::<bool>),
            _ => builder.push_bind(None::<String>),
        };
        return Ok(());
    }

    match column.kind {
        ColumnType::Uuid | ColumnType::Text | ColumnType::Date => {
            let text = value
                .as_str()
                .ok_or_else(|| type_mismatch(column, "a string"))?;
            builder.push_bind(text.to_string());
        }
        ColumnType::Decimal => {
            // Accept both the string encoding and plain JSON numbers from older servers.
            let text = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                _ => return Err(type_mismatch(column, "a decimal")),
            };
            builder.push_bind(text);
        }
        ColumnType::Integer | ColumnType::Timestamp => {
            let number = value
                .as_i64()
                .ok_or_else(|| type_mismatch(column, "an integer"))?;
            builder.push_bind(number);
        }
        ColumnType::Boolean => {
            let flag = match value {
                Value::Bool(b) => *b,
                Value::Number(n) => n.as_i64().map(|v| v != 0).ok_or_else(|| type_mismatch(column, "a boolean"))?,
                _ => return Err(type_mismatch(column, "a boolean")),
            };
            builder.push_bind(flag);
        }
    }
    Ok(())
}

fn type_mismatch(column: &Column, expected: &str) -> DomainError {
    DomainError::Validation(ValidationError::format(
        column.name,
        &format!("expected {}", expected),
    ))
}

/// Columns whose values differ between two rows of the same table.
pub(crate) fn changed_columns(schema: &TableSchema, before: &Row, after: &Row) -> Vec<&'static str> {
    schema
        .columns
        .iter()
        .filter(|c| c.name != "id" && c.name != "last_modified_at")
        .filter(|c| before.get(c.name) != after.get(c.name))
        .map(|c| c.name)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Table;
    use serde_json::json;

    #[test]
    fn test_changed_columns_ignores_bookkeeping() {
        let schema = Table::Payers.schema();
        let before = json!({"id": "a", "name": "Ama", "phone": null, "last_modified_at": 1});
        let after = json!({"id": "a", "name": "Ama K.", "phone": null, "last_modified_at": 2});
        let changed = changed_columns(
            schema,
            before.as_object().unwrap(),
            after.as_object().unwrap(),
        );
        assert_eq!(changed, vec!["name"]);
    }

    #[test]
    fn test_null_rejected_for_required_column() {
        let schema = Table::Payers.schema();
        let mut builder = QueryBuilder::<Sqlite>::new("SELECT ");
        let name = schema.column("name").unwrap();
        assert!(push_bind_value(&mut builder, name, &Value::Null).is_err());
        let notes = schema.column("notes").unwrap();
        assert!(push_bind_value(&mut builder, notes, &Value::Null).is_ok());
    }

    #[test]
    fn test_type_mismatch_reported() {
        let schema = Table::Invoices.schema();
        let mut builder = QueryBuilder::<Sqlite>::new("SELECT ");
        let amount = schema.column("amount_due").unwrap();
        assert!(push_bind_value(&mut builder, amount, &json!("150.00")).is_ok());
        assert!(push_bind_value(&mut builder, amount, &json!(150)).is_ok());
        assert!(push_bind_value(&mut builder, amount, &json!(true)).is_err());
        let stamp = schema.column("last_modified_at").unwrap();
        assert!(push_bind_value(&mut builder, stamp, &json!("yesterday")).is_err());
    }
}
