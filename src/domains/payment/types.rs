use chrono::{NaiveDate, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::database::{Entity, Table};
use crate::errors::DomainResult;
use crate::types::{now_millis, Timestamp};
use crate::validation::{Validate, ValidationBuilder};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    MobileMoney,
    BankTransfer,
    Card,
    Cheque,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::MobileMoney => "mobile_money",
            PaymentMethod::BankTransfer => "bank_transfer",
            PaymentMethod::Card => "card",
            PaymentMethod::Cheque => "cheque",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "cash" => Some(PaymentMethod::Cash),
            "mobile_money" => Some(PaymentMethod::MobileMoney),
            "bank_transfer" => Some(PaymentMethod::BankTransfer),
            "card" => Some(PaymentMethod::Card),
            "cheque" => Some(PaymentMethod::Cheque),
            _ => None,
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Synced,
    Conflicted,
    Refunded,
    Cancelled,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Synced => "synced",
            PaymentStatus::Conflicted => "conflicted",
            PaymentStatus::Refunded => "refunded",
            PaymentStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(PaymentStatus::Pending),
            "completed" => Some(PaymentStatus::Completed),
            "synced" => Some(PaymentStatus::Synced),
            "conflicted" => Some(PaymentStatus::Conflicted),
            "refunded" => Some(PaymentStatus::Refunded),
            "cancelled" => Some(PaymentStatus::Cancelled),
            _ => None,
        }
    }

    /// Refunded and cancelled payments no longer count towards what a payer owes.
    pub fn is_void(&self) -> bool {
        matches!(self, PaymentStatus::Refunded | PaymentStatus::Cancelled)
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

const REF_NO_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Receipt reference in the form `PAY-YYYYMMDD-XXXXXX`.
///
/// Generated on the device so receipts can be printed offline; uniqueness is
/// enforced by the `payments.ref_no` index.
pub fn generate_ref_no(date: NaiveDate) -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..6)
        .map(|_| REF_NO_ALPHABET[rng.random_range(0..REF_NO_ALPHABET.len())] as char)
        .collect();
    format!("PAY-{}-{}", date.format("%Y%m%d"), suffix)
}

/// Money collected from a payer, optionally against an invoice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub payer_id: Uuid,
    pub invoice_id: Option<Uuid>,
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub ref_no: String,
    pub notes: Option<String>,
    pub paid_at: Timestamp,
    pub last_modified_at: Timestamp,
}

impl Payment {
    pub fn new(payer_id: Uuid, invoice_id: Option<Uuid>, amount: Decimal, method: PaymentMethod, ref_no: &str) -> Self {
        let now = now_millis();
        Self {
            id: Uuid::new_v4(),
            payer_id,
            invoice_id,
            amount,
            method,
            status: PaymentStatus::Pending,
            ref_no: ref_no.to_string(),
            notes: None,
            paid_at: now,
            last_modified_at: now,
        }
    }

    /// A payment taken now, with a freshly generated receipt reference.
    pub fn collect(payer_id: Uuid, invoice_id: Option<Uuid>, amount: Decimal, method: PaymentMethod) -> Self {
        let ref_no = generate_ref_no(Utc::now().date_naive());
        Self::new(payer_id, invoice_id, amount, method, &ref_no)
    }
}

impl Validate for Payment {
    fn validate(&self) -> DomainResult<()> {
        ValidationBuilder::new("payer_id", Some(self.payer_id)).not_nil().validate()?;
        ValidationBuilder::new("amount", Some(self.amount)).positive().validate()?;
        ValidationBuilder::new("ref_no", Some(self.ref_no.clone())).ref_no().validate()?;
        if let Some(notes) = &self.notes {
            ValidationBuilder::new("notes", Some(notes.clone())).max_length(1000).validate()?;
        }
        Ok(())
    }
}

impl Entity for Payment {
    const TABLE: Table = Table::Payments;

    fn id(&self) -> Uuid {
        self.id
    }

    fn last_modified_at(&self) -> Timestamp {
        self.last_modified_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::ref_no_regex;
    use rust_decimal_macros::dec;

    #[test]
    fn test_generated_ref_no_is_valid() {
        let date = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        for _ in 0..20 {
            let ref_no = generate_ref_no(date);
            assert!(ref_no.starts_with("PAY-20240501-"));
            assert!(ref_no_regex().is_match(&ref_no), "{}", ref_no);
        }
        let payment = Payment::collect(Uuid::new_v4(), None, dec!(12.50), PaymentMethod::MobileMoney);
        assert!(payment.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_amount_and_ref() {
        let payer = Uuid::new_v4();
        assert!(Payment::new(payer, None, dec!(0), PaymentMethod::Cash, "PAY-20240501-ABC123").validate().is_err());
        assert!(Payment::new(payer, None, dec!(5), PaymentMethod::Cash, "receipt-1").validate().is_err());
    }

    #[test]
    fn test_enum_wire_format() {
        let payment = Payment::new(Uuid::new_v4(), None, dec!(5), PaymentMethod::MobileMoney, "PAY-20240501-ABC123");
        let row = payment.to_row().unwrap();
        assert_eq!(row["method"], "mobile_money");
        assert_eq!(row["status"], "pending");
        assert_eq!(row["amount"], "5");
        assert!(row["invoice_id"].is_null());
        assert!(PaymentStatus::Refunded.is_void());
        assert_eq!(PaymentMethod::from_str("Cheque"), Some(PaymentMethod::Cheque));
    }
}
