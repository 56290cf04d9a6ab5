//! Static column-to-field mapping for every synchronised table.
//!
//! Each entity struct serialises to a JSON object whose keys are exactly the
//! column names listed here. The store, the change log and the sync merger
//! only ever address tables and columns through this metadata, so identifiers
//! interpolated into SQL are always compile-time constants.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Every table the Entity Store owns, declared in foreign-key dependency order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Users,
    LoginHistories,
    Payers,
    Properties,
    Invoices,
    Payments,
    PaymentHistories,
}

/// SQLite storage class plus the JSON shape a column takes on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Uuid,
    Text,
    Integer,
    Boolean,
    /// `rust_decimal::Decimal`, string encoded.
    Decimal,
    /// `chrono::NaiveDate`, `YYYY-MM-DD`.
    Date,
    /// Milliseconds since the Unix epoch.
    Timestamp,
}

#[derive(Debug, Clone, Copy)]
pub struct Column {
    pub name: &'static str,
    pub kind: ColumnType,
    pub nullable: bool,
    pub references: Option<Table>,
}

const fn required(name: &'static str, kind: ColumnType) -> Column {
    Column { name, kind, nullable: false, references: None }
}

const fn optional(name: &'static str, kind: ColumnType) -> Column {
    Column { name, kind, nullable: true, references: None }
}

const fn foreign(name: &'static str, table: Table, nullable: bool) -> Column {
    Column { name, kind: ColumnType::Uuid, nullable, references: Some(table) }
}

const ID: Column = required("id", ColumnType::Uuid);
const LAST_MODIFIED_AT: Column = required("last_modified_at", ColumnType::Timestamp);

#[derive(Debug)]
pub struct TableSchema {
    pub table: Table,
    pub columns: &'static [Column],
}

static USERS: TableSchema = TableSchema {
    table: Table::Users,
    columns: &[
        ID,
        required("username", ColumnType::Text),
        required("full_name", ColumnType::Text),
        optional("email", ColumnType::Text),
        required("role", ColumnType::Text),
        required("is_active", ColumnType::Boolean),
        LAST_MODIFIED_AT,
    ],
};

static LOGIN_HISTORIES: TableSchema = TableSchema {
    table: Table::LoginHistories,
    columns: &[
        ID,
        foreign("user_id", Table::Users, false),
        required("device_id", ColumnType::Text),
        required("logged_in_at", ColumnType::Timestamp),
        optional("logged_out_at", ColumnType::Timestamp),
        LAST_MODIFIED_AT,
    ],
};

static PAYERS: TableSchema = TableSchema {
    table: Table::Payers,
    columns: &[
        ID,
        required("name", ColumnType::Text),
        optional("tin", ColumnType::Text),
        optional("phone", ColumnType::Text),
        optional("email", ColumnType::Text),
        optional("address", ColumnType::Text),
        optional("business_name", ColumnType::Text),
        optional("business_category", ColumnType::Text),
        required("vendor", ColumnType::Boolean),
        required("property_owner", ColumnType::Boolean),
        optional("notes", ColumnType::Text),
        LAST_MODIFIED_AT,
    ],
};

static PROPERTIES: TableSchema = TableSchema {
    table: Table::Properties,
    columns: &[
        ID,
        foreign("owner_id", Table::Payers, false),
        required("address", ColumnType::Text),
        required("property_type", ColumnType::Text),
        required("assessed_value", ColumnType::Decimal),
        optional("assessment_date", ColumnType::Date),
        optional("payment_expiry_date", ColumnType::Date),
        LAST_MODIFIED_AT,
    ],
};

static INVOICES: TableSchema = TableSchema {
    table: Table::Invoices,
    columns: &[
        ID,
        foreign("payer_id", Table::Payers, false),
        required("description", ColumnType::Text),
        required("amount_due", ColumnType::Decimal),
        required("due_date", ColumnType::Date),
        required("status", ColumnType::Text),
        LAST_MODIFIED_AT,
    ],
};

static PAYMENTS: TableSchema = TableSchema {
    table: Table::Payments,
    columns: &[
        ID,
        foreign("payer_id", Table::Payers, false),
        foreign("invoice_id", Table::Invoices, true),
        required("amount", ColumnType::Decimal),
        required("method", ColumnType::Text),
        required("status", ColumnType::Text),
        required("ref_no", ColumnType::Text),
        optional("notes", ColumnType::Text),
        required("paid_at", ColumnType::Timestamp),
        LAST_MODIFIED_AT,
    ],
};

static PAYMENT_HISTORIES: TableSchema = TableSchema {
    table: Table::PaymentHistories,
    columns: &[
        ID,
        foreign("payment_id", Table::Payments, false),
        required("field_name", ColumnType::Text),
        optional("old_value", ColumnType::Text),
        optional("new_value", ColumnType::Text),
        required("changed_at", ColumnType::Timestamp),
        required("device_id", ColumnType::Text),
        LAST_MODIFIED_AT,
    ],
};

impl Table {
    /// Tables in the order they are applied on pull and sent on push.
    pub const SYNC_ORDER: [Table; 7] = [
        Table::Users,
        Table::LoginHistories,
        Table::Payers,
        Table::Properties,
        Table::Invoices,
        Table::Payments,
        Table::PaymentHistories,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Table::Users => "users",
            Table::LoginHistories => "login_histories",
            Table::Payers => "payers",
            Table::Properties => "properties",
            Table::Invoices => "invoices",
            Table::Payments => "payments",
            Table::PaymentHistories => "payment_histories",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::SYNC_ORDER.iter().copied().find(|t| t.name() == name)
    }

    pub fn schema(&self) -> &'static TableSchema {
        match self {
            Table::Users => &USERS,
            Table::LoginHistories => &LOGIN_HISTORIES,
            Table::Payers => &PAYERS,
            Table::Properties => &PROPERTIES,
            Table::Invoices => &INVOICES,
            Table::Payments => &PAYMENTS,
            Table::PaymentHistories => &PAYMENT_HISTORIES,
        }
    }

    /// `(child table, foreign key column)` pairs pointing at this table.
    pub fn dependents(&self) -> Vec<(Table, &'static str)> {
        Self::SYNC_ORDER
            .iter()
            .flat_map(|child| {
                child
                    .schema()
                    .columns
                    .iter()
                    .filter(|c| c.references == Some(*self))
                    .map(move |c| (*child, c.name))
            })
            .collect()
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl TableSchema {
    pub fn column(&self, name: &str) -> Option<&'static Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Comma separated list of every mapped column, for SELECT/INSERT.
    pub fn column_list(&self) -> String {
        self.columns
            .iter()
            .map(|c| c.name)
            .collect::<Vec<_>>()
            .join(", ")
    }
}
