pub mod types;

pub use types::PaymentHistory;
