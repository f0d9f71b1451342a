use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub age: i32,
    pub married: bool,
    pub nationality: String,
}

/// Writable user columns, used for bulk inserts and full updates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserFields {
    pub name: String,
    pub email: String,
    pub age: i32,
    pub married: bool,
    pub nationality: String,
}

impl UserFields {
    pub fn new(
        name: impl Into<String>,
        email: impl Into<String>,
        age: i32,
        married: bool,
        nationality: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            age,
            married,
            nationality: nationality.into(),
        }
    }

    /// Field-level validation; the map is keyed by field name.
    pub fn validate(&self) -> Result<(), HashMap<String, String>> {
        let mut field_errors = HashMap::new();
        if self.name.trim().is_empty() {
            field_errors.insert("name".to_string(), "Name must not be empty".to_string());
        }
        let email = self.email.trim();
        if email.is_empty() || !email.contains('@') || email.starts_with('@') {
            field_errors.insert("email".to_string(), "Email must look like local@domain".to_string());
        }
        if !(0..=150).contains(&self.age) {
            field_errors.insert("age".to_string(), "Age must be between 0 and 150".to_string());
        }
        if self.nationality.trim().is_empty() {
            field_errors.insert("nationality".to_string(), "Nationality must not be empty".to_string());
        }

        if field_errors.is_empty() { Ok(()) } else { Err(field_errors) }
    }

    pub fn into_user(self, id: i64) -> User {
        User {
            id,
            name: self.name,
            email: self.email,
            age: self.age,
            married: self.married,
            nationality: self.nationality,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_fields() {
        let fields = UserFields::new("Luna Lovegood", "luna@hogwarts", 20, true, "Irish");
        assert!(fields.validate().is_ok());
    }

    #[test]
    fn reports_each_bad_field() {
        let fields = UserFields::new(" ", "hogwarts", 200, false, "");
        let errors = fields.validate().unwrap_err();
        assert_eq!(errors.len(), 4);
        assert!(errors.contains_key("email"));
        assert!(errors.contains_key("age"));
    }
}
