pub mod types;

pub use types::{generate_ref_no, Payment, PaymentMethod, PaymentStatus};
