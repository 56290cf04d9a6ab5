pub mod types;

// Re-export main items for other domains to use
pub use types::{LoginHistory, User, UserRole};
