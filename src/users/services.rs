use std::sync::Arc;

use axum::extract::FromRef;
use serde_json::{Map, Value};
use tracing::{error, info, instrument, warn};

use crate::{
    auth::{
        claims::ClaimsUser,
        jwt::JwtKeys,
        password::{hash_password, verify_password},
    },
    error::AppError,
    state::AppState,
    users::{
        dto::{LoginResponse, UserPayload},
        repo::UserRepository,
        repo_types::{Filter, NewUser, User, UserChanges},
    },
};

/// Applies a JSON merge patch (RFC 7396) to `target` in place.
pub fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(map) = target {
        for (key, value) in patch_map {
            if value.is_null() {
                map.remove(key);
            } else {
                merge_patch(map.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

/// User usecases: registration, login, listing and record maintenance.
#[derive(Clone)]
pub struct UserService {
    repo: Arc<dyn UserRepository>,
    keys: JwtKeys,
}

impl FromRef<AppState> for UserService {
    fn from_ref(state: &AppState) -> Self {
        Self::new(state.users.clone(), JwtKeys::from_ref(state))
    }
}

impl UserService {
    pub fn new(repo: Arc<dyn UserRepository>, keys: JwtKeys) -> Self {
        Self { repo, keys }
    }

    #[instrument(skip(self, input), fields(email = %input.email))]
    pub async fn register(&self, input: UserPayload) -> Result<User, AppError> {
        let existing = self.repo.fetch(&Filter::by_email(&input.email)).await?;
        if !existing.is_empty() {
            warn!("email already registered");
            return Err(AppError::AlreadyExists);
        }

        let password_hash = hash_password(&input.password)?;
        let user = self
            .repo
            .store(NewUser {
                email: input.email,
                password_hash,
                address: input.address,
            })
            .await?;

        info!(user_id = user.id, "user registered");
        Ok(user)
    }

    #[instrument(skip(self, password))]
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginResponse, AppError> {
        let mut found = self.repo.fetch(&Filter::by_email(email)).await?;
        let Some(mut user) = found.pop() else {
            warn!("login unknown email");
            return Err(AppError::InvalidCredentials);
        };

        let matched = verify_password(password, &user.password_hash).unwrap_or_else(|e| {
            error!(user_id = user.id, error = %e, "stored password hash unreadable");
            false
        });
        if !matched {
            warn!(user_id = user.id, "login invalid password");
            return Err(AppError::InvalidCredentials);
        }
        user.password_hash.clear();

        let token = self.keys.sign(ClaimsUser {
            id: user.id,
            email: user.email.clone(),
            address: user.address.clone(),
        })?;
        self.repo.insert_token(user.id, &token).await?;

        if !self.repo.update(&UserChanges::touch(&user)).await? {
            warn!(user_id = user.id, "user vanished during login");
            return Err(AppError::NotFound);
        }

        info!(user_id = user.id, "user logged in");
        Ok(LoginResponse { user, token })
    }

    pub async fn fetch(&self, filter: &Filter) -> Result<Vec<User>, AppError> {
        Ok(self.repo.fetch(filter).await?)
    }

    pub async fn get_by_id(&self, id: i64) -> Result<User, AppError> {
        self.repo.get_by_id(id).await?.ok_or(AppError::NotFound)
    }

    /// Replaces email and address as given; a non-empty password is
    /// re-hashed, an empty one keeps the stored hash.
    #[instrument(skip(self, input))]
    pub async fn update(&self, id: i64, input: UserPayload) -> Result<User, AppError> {
        let password_hash = if input.password.is_empty() {
            None
        } else {
            Some(hash_password(&input.password)?)
        };

        let changes = UserChanges {
            id,
            email: input.email,
            address: input.address,
            password_hash,
        };
        if !self.repo.update(&changes).await? {
            return Err(AppError::NotFound);
        }

        info!(user_id = id, "user updated");
        Ok(User {
            id,
            email: changes.email,
            password_hash: String::new(),
            address: changes.address,
        })
    }

    /// Merges `patch` into the current record and saves it through
    /// [`UserService::update`]. The id in the patch, if any, is ignored.
    #[instrument(skip(self, patch))]
    pub async fn partial_update(&self, id: i64, patch: &[u8]) -> Result<User, AppError> {
        let current = self.get_by_id(id).await?;

        let patch: Value = serde_json::from_slice(patch)
            .map_err(|e| AppError::bad_request(format!("Invalid patch document: {e}")))?;
        let mut doc = serde_json::to_value(&current).map_err(anyhow::Error::from)?;
        merge_patch(&mut doc, &patch);

        let input: UserPayload = serde_json::from_value(doc)
            .map_err(|e| AppError::bad_request(format!("Invalid patched user: {e}")))?;
        self.update(id, input).await
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, id: i64) -> Result<(), AppError> {
        if !self.repo.delete(id).await? {
            return Err(AppError::NotFound);
        }
        info!(user_id = id, "user deleted");
        Ok(())
    }
}
