use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The user snapshot embedded in a token. Never carries the password hash.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClaimsUser {
    pub id: i64,
    pub email: String,
    pub address: String,
}

/// JWT payload issued at login.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub user: ClaimsUser, // authenticated user
    pub iat: usize,       // issued at (unix timestamp)
    pub exp: usize,       // expires at (unix timestamp)
    pub iss: String,      // issuer
    pub aud: String,      // audience
    pub jti: Uuid,        // token id, keeps same-second logins distinct
}
