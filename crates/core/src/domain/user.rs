use anyhow::ensure;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub firstname: String,
    pub lastname: String,
    pub created_at: DateTime<Utc>,
}

/// Registration payload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewUser {
    pub email: String,
    pub firstname: String,
    pub lastname: String,
}

impl NewUser {
    /// Trims every field and rejects blank names or a malformed email.
    pub fn validate(self) -> anyhow::Result<Self> {
        let email = self.email.trim().to_lowercase();
        let firstname = self.firstname.trim().to_string();
        let lastname = self.lastname.trim().to_string();

        ensure!(!firstname.is_empty(), "firstname is required");
        ensure!(!lastname.is_empty(), "lastname is required");
        let valid_email = email
            .split_once('@')
            .is_some_and(|(local, domain)| {
                !local.is_empty() && domain.contains('.') && !domain.contains('@')
            });
        ensure!(valid_email, "email is invalid: {email}");

        Ok(Self {
            email,
            firstname,
            lastname,
        })
    }
}
