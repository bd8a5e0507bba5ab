use serde::{Deserialize, Serialize};
use sqlx::FromRow;

pub const DEFAULT_PAGE_SIZE: i64 = 200;

/// User record in the database.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq, Eq)]
pub struct User {
    pub id: i64,                      // assigned by the store
    pub email: String,                // login key
    #[serde(skip_serializing, default)]
    pub password_hash: String,        // Argon2 hash, not exposed in JSON
    pub address: String,
}

/// Row to insert on registration.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password_hash: String,
    pub address: String,
}

/// Full replacement of a user's mutable fields. `password_hash: None` keeps
/// the stored hash.
#[derive(Debug, Clone)]
pub struct UserChanges {
    pub id: i64,
    pub email: String,
    pub address: String,
    pub password_hash: Option<String>,
}

impl UserChanges {
    pub fn touch(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            address: user.address.clone(),
            password_hash: None,
        }
    }
}

/// Listing query. Results are ordered by id descending; a non-zero `cursor`
/// keeps only ids strictly below it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub email: Option<String>,
    pub password_hash: Option<String>,
    pub address: Option<String>, // regex
    pub cursor: i64,
    pub num: i64,
}

impl Default for Filter {
    fn default() -> Self {
        Self {
            email: None,
            password_hash: None,
            address: None,
            cursor: 0,
            num: DEFAULT_PAGE_SIZE,
        }
    }
}

impl Filter {
    pub fn by_email(email: &str) -> Self {
        Self {
            email: Some(email.to_string()),
            num: 1,
            ..Self::default()
        }
    }
}
