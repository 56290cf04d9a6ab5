use serde::Serialize;
use serde_json::Value;
use sqlx::{QueryBuilder, Sqlite};

use crate::database::row::push_bind_value;
use crate::database::schema::TableSchema;
use crate::errors::{DomainResult, ValidationError};

/// Conjunction of equality predicates over mapped columns.
///
/// Tombstoned records are excluded unless [`Filter::with_deleted`] is set.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    conditions: Vec<(String, Value)>,
    include_deleted: bool,
    order_by: Option<String>,
}

impl Filter {
    /// Matches every live record.
    pub fn all() -> Self {
        Self::default()
    }

    /// Require `column = value`. A `None`/null value becomes `column IS NULL`.
    pub fn eq<V: Serialize>(mut self, column: &str, value: V) -> Self {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        self.conditions.push((column.to_string(), value));
        self
    }

    /// Also return tombstoned records.
    pub fn with_deleted(mut self) -> Self {
        self.include_deleted = true;
        self
    }

    /// Order ascending by a mapped column (defaults to `last_modified_at`).
    pub fn order_by(mut self, column: &str) -> Self {
        self.order_by = Some(column.to_string());
        self
    }

    /// Append ` WHERE ... ORDER BY ...` for `schema` to the builder.
    pub(crate) fn push_sql(&self, schema: &TableSchema, builder: &mut QueryBuilder<'_, Sqlite>) -> DomainResult<()> {
        builder.push(" WHERE 1 = 1");
        if !self.include_deleted {
            builder.push(" AND deleted = 0");
        }
        for (name, value) in &self.conditions {
            let column = schema
                .column(name)
                .ok_or_else(|| ValidationError::invalid_value(name, "unknown column"))?;
            if value.is_null() {
                builder.push(format!(" AND {} IS NULL", column.name));
            } else {
                builder.push(format!(" AND {} = ", column.name));
                push_bind_value(builder, column, value)?;
            }
        }
        let order = match &self.order_by {
            Some(name) => {
                schema
                    .column(name)
                    .ok_or_else(|| ValidationError::invalid_value(name, "unknown column"))?
                    .name
            }
            None => "last_modified_at",
        };
        builder.push(format!(" ORDER BY {}, id", order));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Table;
    use uuid::Uuid;

    #[test]
    fn test_unknown_column_rejected() {
        let mut builder = QueryBuilder::<Sqlite>::new("SELECT id FROM payers");
        let filter = Filter::all().eq("name; DROP TABLE payers", "x");
        assert!(filter.push_sql(Table::Payers.schema(), &mut builder).is_err());
    }

    #[test]
    fn test_sql_shape() {
        let mut builder = QueryBuilder::<Sqlite>::new("SELECT id FROM invoices");
        Filter::all()
            .eq("payer_id", Uuid::nil())
            .eq("status", "unpaid")
            .push_sql(Table::Invoices.schema(), &mut builder)
            .unwrap();
        assert_eq!(
            builder.sql(),
            "SELECT id FROM invoices WHERE 1 = 1 AND deleted = 0 AND payer_id = ? AND status = ? ORDER BY last_modified_at, id"
        );
    }

    #[test]
    fn test_null_condition_and_deleted() {
        let mut builder = QueryBuilder::<Sqlite>::new("SELECT id FROM payments");
        Filter::all()
            .eq("invoice_id", None::<Uuid>)
            .with_deleted()
            .push_sql(Table::Payments.schema(), &mut builder)
            .unwrap();
        assert_eq!(
            builder.sql(),
            "SELECT id FROM payments WHERE 1 = 1 AND invoice_id IS NULL ORDER BY last_modified_at, id"
        );
    }
}
