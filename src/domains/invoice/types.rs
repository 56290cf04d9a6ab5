use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::database::{Entity, Table};
use crate::errors::DomainResult;
use crate::types::{now_millis, Timestamp};
use crate::validation::{Validate, ValidationBuilder};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    Unpaid,
    Paid,
    Overdue,
    Pending,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Unpaid => "unpaid",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Overdue => "overdue",
            InvoiceStatus::Pending => "pending",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "unpaid" => Some(InvoiceStatus::Unpaid),
            "paid" => Some(InvoiceStatus::Paid),
            "overdue" => Some(InvoiceStatus::Overdue),
            "pending" => Some(InvoiceStatus::Pending),
            _ => None,
        }
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An amount billed to a payer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: Uuid,
    pub payer_id: Uuid,
    pub description: String,
    pub amount_due: Decimal,
    pub due_date: NaiveDate,
    pub status: InvoiceStatus,
    pub last_modified_at: Timestamp,
}

impl Invoice {
    pub fn new(payer_id: Uuid, description: &str, amount_due: Decimal, due_date: NaiveDate) -> Self {
        Self {
            id: Uuid::new_v4(),
            payer_id,
            description: description.to_string(),
            amount_due,
            due_date,
            status: InvoiceStatus::Unpaid,
            last_modified_at: now_millis(),
        }
    }

    pub fn is_overdue(&self, today: NaiveDate) -> bool {
        self.status != InvoiceStatus::Paid && self.due_date < today
    }
}

impl Validate for Invoice {
    fn validate(&self) -> DomainResult<()> {
        ValidationBuilder::new("payer_id", Some(self.payer_id)).not_nil().validate()?;
        ValidationBuilder::new("description", Some(self.description.clone()))
            .not_blank()
            .max_length(500)
            .validate()?;
        ValidationBuilder::new("amount_due", Some(self.amount_due))
            .non_negative()
            .validate()
    }
}

impl Entity for Invoice {
    const TABLE: Table = Table::Invoices;

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
    use rust_decimal_macros::dec;

    #[test]
    fn test_overdue_and_validation() {
        let due = NaiveDate::from_ymd_opt(2024, 6, 30).unwrap();
        let mut invoice = Invoice::new(Uuid::new_v4(), "Business operating permit", dec!(250), due);
        assert!(invoice.validate().is_ok());
        assert!(invoice.is_overdue(NaiveDate::from_ymd_opt(2024, 7, 1).unwrap()));
        invoice.status = InvoiceStatus::Paid;
        assert!(!invoice.is_overdue(NaiveDate::from_ymd_opt(2024, 7, 1).unwrap()));

        invoice.amount_due = dec!(-1);
        assert!(invoice.validate().is_err());
        assert!(Invoice::new(Uuid::nil(), "x", dec!(1), due).validate().is_err());
    }

    #[test]
    fn test_status_wire_format() {
        let invoice = Invoice::new(Uuid::new_v4(), "Rate", dec!(10.00), NaiveDate::from_ymd_opt(2024, 1, 31).unwrap());
        let row = invoice.to_row().unwrap();
        assert_eq!(row["status"], "unpaid");
        assert_eq!(row["due_date"], "2024-01-31");
        assert_eq!(InvoiceStatus::from_str("OVERDUE"), Some(InvoiceStatus::Overdue));
    }
}
