use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::database::{Entity, Table};
use crate::errors::DomainResult;
use crate::types::Timestamp;
use crate::validation::{Validate, ValidationBuilder};

/// Audit record of one column change on a payment, written by the device that made it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentHistory {
    pub id: Uuid,
    pub payment_id: Uuid,
    pub field_name: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub changed_at: Timestamp,
    pub device_id: String,
    pub last_modified_at: Timestamp,
}

impl PaymentHistory {
    pub fn for_change(
        payment_id: Uuid,
        field_name: &str,
        old_value: Option<&Value>,
        new_value: Option<&Value>,
        device_id: &str,
        changed_at: Timestamp,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            payment_id,
            field_name: field_name.to_string(),
            old_value: render(old_value),
            new_value: render(new_value),
            changed_at,
            device_id: device_id.to_string(),
            last_modified_at: changed_at,
        }
    }
}

fn render(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

impl Validate for PaymentHistory {
    fn validate(&self) -> DomainResult<()> {
        ValidationBuilder::new("payment_id", Some(self.payment_id)).not_nil().validate()?;
        ValidationBuilder::new("field_name", Some(self.field_name.clone())).not_blank().validate()?;
        ValidationBuilder::new("device_id", Some(self.device_id.clone())).not_blank().validate()
    }
}

impl Entity for PaymentHistory {
    const TABLE: Table = Table::PaymentHistories;

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
    use serde_json::json;

    #[test]
    fn test_values_rendered_as_text() {
        let history = PaymentHistory::for_change(
            Uuid::new_v4(),
            "paid_at",
            Some(&json!(1714550400000i64)),
            Some(&Value::Null),
            "dev-a",
            1714550500000,
        );
        assert_eq!(history.old_value.as_deref(), Some("1714550400000"));
        assert_eq!(history.new_value, None);
        assert!(history.validate().is_ok());

        let unknown = PaymentHistory::for_change(Uuid::new_v4(), "notes", None, Some(&json!("ok")), "", 0);
        assert!(unknown.validate().is_err());
    }
}
