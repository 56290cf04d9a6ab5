pub mod types;

pub use types::{Invoice, InvoiceStatus};
