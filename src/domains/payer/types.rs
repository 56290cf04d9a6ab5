use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::database::{Entity, Table};
use crate::errors::DomainResult;
use crate::types::{now_millis, Timestamp};
use crate::validation::{optional_email, optional_phone, Validate, ValidationBuilder};

/// A person or business liable for rates, levies or fees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payer {
    pub id: Uuid,
    pub name: String,
    /// Taxpayer identification number.
    pub tin: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
    pub business_name: Option<String>,
    pub business_category: Option<String>,
    pub vendor: bool,
    pub property_owner: bool,
    pub notes: Option<String>,
    pub last_modified_at: Timestamp,
}

impl Payer {
    pub fn new(name: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            tin: None,
            phone: None,
            email: None,
            address: None,
            business_name: None,
            business_category: None,
            vendor: false,
            property_owner: false,
            notes: None,
            last_modified_at: now_millis(),
        }
    }

    /// Name shown on receipts: the business name when there is one.
    pub fn display_name(&self) -> &str {
        match self.business_name.as_deref() {
            Some(business) if !business.trim().is_empty() => business,
            _ => &self.name,
        }
    }
}

impl Validate for Payer {
    fn validate(&self) -> DomainResult<()> {
        ValidationBuilder::new("id", Some(self.id)).not_nil().validate()?;
        ValidationBuilder::new("name", Some(self.name.clone()))
            .not_blank()
            .max_length(200)
            .validate()?;
        optional_phone(&self.phone)?;
        optional_email(&self.email)?;
        Ok(())
    }
}

impl Entity for Payer {
    const TABLE: Table = Table::Payers;

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

    #[test]
    fn test_row_keys_match_columns() {
        let row = Payer::new("Kojo").to_row().unwrap();
        let columns: Vec<&str> = Table::Payers.schema().columns.iter().map(|c| c.name).collect();
        let keys: Vec<&str> = row.keys().map(String::as_str).collect();
        assert_eq!(keys.len(), columns.len());
        assert!(columns.iter().all(|c| row.contains_key(*c)));
    }

    #[test]
    fn test_validation() {
        assert!(Payer::new("  ").validate().is_err());

        let mut payer = Payer::new("Akua Stores");
        assert!(payer.validate().is_ok());
        payer.email = Some("not-an-email".to_string());
        assert!(payer.validate().is_err());
        payer.email = None;
        payer.business_name = Some("Akua Provisions".to_string());
        assert_eq!(payer.display_name(), "Akua Provisions");
    }
}
