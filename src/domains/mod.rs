pub mod invoice;
pub mod payer;
pub mod payment;
pub mod payment_history;
pub mod property;
pub mod settings;
pub mod sync;
pub mod user;

pub use invoice::{Invoice, InvoiceStatus};
pub use payer::Payer;
pub use payment::{Payment, PaymentMethod, PaymentStatus};
pub use payment_history::PaymentHistory;
pub use property::Property;
pub use user::{LoginHistory, User, UserRole};
