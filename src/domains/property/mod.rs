pub mod types;

pub use types::Property;
