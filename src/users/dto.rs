use serde::{Deserialize, Serialize};

use crate::users::repo_types::User;

/// Body of register and full update. Missing fields default to empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserPayload {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub address: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

/// Listing query string. Numbers arrive as text so malformed values map to
/// a 400 with the usual error body.
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub email: Option<String>,
    pub address: Option<String>,
    pub num: Option<String>,
    pub cursor: Option<String>,
}

/// Returned by login: the public user plus the freshly issued token.
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    #[serde(flatten)]
    pub user: User,
    pub token: String,
}
