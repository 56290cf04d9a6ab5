use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::database::{Entity, Table};
use crate::errors::{DomainError, DomainResult, ValidationError};
use crate::types::{now_millis, Timestamp};
use crate::validation::{optional_email, Validate, ValidationBuilder};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Collector,
    Supervisor,
    Admin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Collector => "collector",
            UserRole::Supervisor => "supervisor",
            UserRole::Admin => "admin",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "collector" => Some(UserRole::Collector),
            "supervisor" => Some(UserRole::Supervisor),
            "admin" => Some(UserRole::Admin),
            _ => None,
        }
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Field agent or back-office account. Credentials live with the external session provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub full_name: String,
    pub email: Option<String>,
    pub role: UserRole,
    pub is_active: bool,
    pub last_modified_at: Timestamp,
}

impl User {
    pub fn new(username: &str, full_name: &str, role: UserRole) -> Self {
        Self {
            id: Uuid::new_v4(),
            username: username.to_string(),
            full_name: full_name.to_string(),
            email: None,
            role,
            is_active: true,
            last_modified_at: now_millis(),
        }
    }
}

impl Validate for User {
    fn validate(&self) -> DomainResult<()> {
        ValidationBuilder::new("username", Some(self.username.clone()))
            .not_blank()
            .min_length(3)
            .max_length(50)
            .validate()?;
        ValidationBuilder::new("full_name", Some(self.full_name.clone()))
            .not_blank()
            .max_length(100)
            .validate()?;
        optional_email(&self.email)
    }
}

impl Entity for User {
    const TABLE: Table = Table::Users;

    fn id(&self) -> Uuid {
        self.id
    }

    fn last_modified_at(&self) -> Timestamp {
        self.last_modified_at
    }
}

/// One sign-in session of a user on a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginHistory {
    pub id: Uuid,
    pub user_id: Uuid,
    pub device_id: String,
    pub logged_in_at: Timestamp,
    pub logged_out_at: Option<Timestamp>,
    pub last_modified_at: Timestamp,
}

impl LoginHistory {
    pub fn start(user_id: Uuid, device_id: &str) -> Self {
        let now = now_millis();
        Self {
            id: Uuid::new_v4(),
            user_id,
            device_id: device_id.to_string(),
            logged_in_at: now,
            logged_out_at: None,
            last_modified_at: now,
        }
    }

    /// Close the session; a second call keeps the first logout time.
    pub fn finish(&mut self) {
        if self.logged_out_at.is_none() {
            self.logged_out_at = Some(now_millis().max(self.logged_in_at));
        }
    }

    pub fn is_open(&self) -> bool {
        self.logged_out_at.is_none()
    }
}

impl Validate for LoginHistory {
    fn validate(&self) -> DomainResult<()> {
        ValidationBuilder::new("user_id", Some(self.user_id)).not_nil().validate()?;
        ValidationBuilder::new("device_id", Some(self.device_id.clone())).not_blank().validate()?;
        if let Some(out) = self.logged_out_at {
            if out < self.logged_in_at {
                return Err(DomainError::Validation(ValidationError::invalid_value(
                    "logged_out_at",
                    "cannot be before logged_in_at",
                )));
            }
        }
        Ok(())
    }
}

impl Entity for LoginHistory {
    const TABLE: Table = Table::LoginHistories;

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
    use crate::database::store::tests::test_store;
    use crate::database::Filter;

    #[test]
    fn test_role_wire_format() {
        let row = User::new("ksarpong", "Kofi Sarpong", UserRole::Supervisor).to_row().unwrap();
        assert_eq!(row["role"], "supervisor");
        assert_eq!(row["is_active"], true);
        assert_eq!(UserRole::from_str("ADMIN"), Some(UserRole::Admin));
    }

    #[tokio::test]
    async fn test_login_session_round_trip() {
        let (store, _dir) = test_store("tablet-07").await;
        let user = User::new("amensah", "Ama Mensah", UserRole::Collector);
        let mut session = LoginHistory::start(user.id, store.device_id());

        let mut txn = store.begin_write().await.unwrap();
        txn.create(&user).await.unwrap();
        txn.create(&session).await.unwrap();
        txn.commit().await.unwrap();

        session.finish();
        let first_logout = session.logged_out_at;
        session.finish();
        assert_eq!(session.logged_out_at, first_logout);

        let mut txn = store.begin_write().await.unwrap();
        txn.update(&session).await.unwrap();
        txn.commit().await.unwrap();

        let sessions: Vec<LoginHistory> = store.query(&Filter::all().eq("user_id", user.id)).await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert!(!sessions[0].is_open());
        assert_eq!(sessions[0].device_id, "tablet-07");
    }
}
