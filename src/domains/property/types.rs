use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::database::{Entity, Table};
use crate::errors::{DomainError, DomainResult, ValidationError};
use crate::types::{now_millis, Timestamp};
use crate::validation::{Validate, ValidationBuilder};

/// Rateable property owned by a payer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub address: String,
    /// Free-form classification used by the assessing authority (e.g. `residential`, `kiosk`).
    pub property_type: String,
    pub assessed_value: Decimal,
    pub assessment_date: Option<NaiveDate>,
    pub payment_expiry_date: Option<NaiveDate>,
    pub last_modified_at: Timestamp,
}

impl Property {
    pub fn new(owner_id: Uuid, address: &str, property_type: &str, assessed_value: Decimal) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id,
            address: address.to_string(),
            property_type: property_type.to_string(),
            assessed_value,
            assessment_date: None,
            payment_expiry_date: None,
            last_modified_at: now_millis(),
        }
    }

    /// Whether the paid-up period has lapsed as of `today`.
    pub fn payment_expired(&self, today: NaiveDate) -> bool {
        self.payment_expiry_date.map_or(false, |expiry| expiry < today)
    }
}

impl Validate for Property {
    fn validate(&self) -> DomainResult<()> {
        ValidationBuilder::new("owner_id", Some(self.owner_id)).not_nil().validate()?;
        ValidationBuilder::new("address", Some(self.address.clone())).not_blank().validate()?;
        ValidationBuilder::new("property_type", Some(self.property_type.clone()))
            .not_blank()
            .max_length(50)
            .validate()?;
        ValidationBuilder::new("assessed_value", Some(self.assessed_value))
            .non_negative()
            .validate()?;

        if let (Some(assessed), Some(expiry)) = (self.assessment_date, self.payment_expiry_date) {
            if expiry < assessed {
                return Err(DomainError::Validation(ValidationError::invalid_value(
                    "payment_expiry_date",
                    "cannot be before assessment_date",
                )));
            }
        }
        Ok(())
    }
}

impl Entity for Property {
    const TABLE: Table = Table::Properties;

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
    fn test_expiry_rules() {
        let mut property = Property::new(Uuid::new_v4(), "12 Harbour Rd", "residential", dec!(45000));
        property.assessment_date = NaiveDate::from_ymd_opt(2024, 1, 1);
        property.payment_expiry_date = NaiveDate::from_ymd_opt(2024, 12, 31);
        assert!(property.validate().is_ok());
        assert!(property.payment_expired(NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()));
        assert!(!property.payment_expired(NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()));

        property.payment_expiry_date = NaiveDate::from_ymd_opt(2023, 12, 31);
        assert!(property.validate().is_err());
    }

    #[test]
    fn test_decimal_and_dates_are_strings_on_the_wire() {
        let mut property = Property::new(Uuid::new_v4(), "Stall 4", "kiosk", dec!(1200.50));
        property.assessment_date = NaiveDate::from_ymd_opt(2024, 3, 15);
        let row = property.to_row().unwrap();
        assert_eq!(row["assessed_value"], "1200.50");
        assert_eq!(row["assessment_date"], "2024-03-15");
        assert!(row["payment_expiry_date"].is_null());
    }
}
