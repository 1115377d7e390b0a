//! Customer records keyed by normalized email.

use chrono::{DateTime, Utc};
use kct_core::Email;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A customer row. Identity is the normalized email; the processor's own
/// customer id is attached when a `customer.created` event arrives.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Customer {
    pub id: Uuid,
    pub email: Email,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub processor_customer_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Fields for an upsert. Only present fields overwrite existing values, so a
/// later event with less detail never erases what an earlier one filled in.
#[derive(Debug, Clone)]
pub struct NewCustomer {
    pub email: Email,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub processor_customer_id: Option<String>,
}

impl NewCustomer {
    #[must_use]
    pub fn from_email(email: Email) -> Self {
        Self {
            email,
            first_name: None,
            last_name: None,
            phone: None,
            processor_customer_id: None,
        }
    }

    /// Split a single "full name" field into first/last on the first space.
    #[must_use]
    pub fn with_full_name(mut self, name: &str) -> Self {
        let name = name.trim();
        if name.is_empty() {
            return self;
        }
        match name.split_once(' ') {
            Some((first, rest)) => {
                self.first_name = Some(first.to_owned());
                self.last_name = Some(rest.trim().to_owned());
            }
            None => self.first_name = Some(name.to_owned()),
        }
        self
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_full_name_split() {
        let email = Email::parse("a@b.com").unwrap();
        let new = NewCustomer::from_email(email).with_full_name("Jordan Q. Vance");
        assert_eq!(new.first_name.as_deref(), Some("Jordan"));
        assert_eq!(new.last_name.as_deref(), Some("Q. Vance"));
    }

    #[test]
    fn test_single_name() {
        let email = Email::parse("a@b.com").unwrap();
        let new = NewCustomer::from_email(email).with_full_name("Cher");
        assert_eq!(new.first_name.as_deref(), Some("Cher"));
        assert_eq!(new.last_name, None);
    }

    #[test]
    fn test_blank_name_ignored() {
        let email = Email::parse("a@b.com").unwrap();
        let new = NewCustomer::from_email(email).with_full_name("   ");
        assert_eq!(new.first_name, None);
    }
}
