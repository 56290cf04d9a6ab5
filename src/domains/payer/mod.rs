pub mod types;

pub use types::Payer;
