pub mod entity;
pub mod query;
pub mod row;
pub mod schema;
pub mod store;

pub use entity::Entity;
pub use query::Filter;
pub use row::StoredRow;
pub use schema::{Column, ColumnType, Table, TableSchema};
pub use store::{EntityStore, StoreOptions, WriteTxn};
