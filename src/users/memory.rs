//! In-memory `UserRepository` used by the unit tests.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use regex::Regex;
use tokio::sync::RwLock;

use crate::users::{
    repo::{RepoError, UserRepository},
    repo_types::{Filter, NewUser, User, UserChanges},
};

#[derive(Debug, Clone)]
struct Row {
    user: User,
    deleted: bool,
}

#[derive(Debug, Default)]
pub struct InMemoryUserRepository {
    rows: RwLock<Vec<Row>>,
    tokens: RwLock<Vec<(i64, String)>>,
    fail_writes: AtomicBool,
}

impl InMemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent write fail with a database error.
    pub fn fail_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }

    /// Number of rows ever stored, deleted ones included.
    pub async fn stored_count(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn raw(&self, id: i64) -> Option<User> {
        self.rows
            .read()
            .await
            .iter()
            .find(|r| r.user.id == id)
            .map(|r| r.user.clone())
    }

    pub async fn tokens_for(&self, user_id: i64) -> Vec<String> {
        self.tokens
            .read()
            .await
            .iter()
            .filter(|(uid, _)| *uid == user_id)
            .map(|(_, t)| t.clone())
            .collect()
    }

    fn check_writable(&self) -> Result<(), RepoError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(RepoError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }

    fn email_taken(rows: &[Row], email: &str, except: Option<i64>) -> bool {
        rows.iter()
            .any(|r| !r.deleted && r.user.email == email && Some(r.user.id) != except)
    }
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn store(&self, user: NewUser) -> Result<User, RepoError> {
        self.check_writable()?;
        let mut rows = self.rows.write().await;
        if Self::email_taken(&rows, &user.email, None) {
            return Err(RepoError::Duplicate);
        }
        let id = rows.len() as i64 + 1;
        let stored = User {
            id,
            email: user.email,
            password_hash: user.password_hash,
            address: user.address,
        };
        rows.push(Row {
            user: stored.clone(),
            deleted: false,
        });
        Ok(stored)
    }

    async fn fetch(&self, filter: &Filter) -> Result<Vec<User>, RepoError> {
        let address = match &filter.address {
            // Postgres rejects a malformed `~` pattern at query time.
            Some(pattern) => match Regex::new(pattern) {
                Ok(re) => Some(re),
                Err(e) => {
                    return Err(RepoError::Database(sqlx::Error::Protocol(format!(
                        "invalid regular expression: {e}"
                    ))))
                }
            },
            None => None,
        };
        let rows = self.rows.read().await;
        let mut users: Vec<User> = rows
            .iter()
            .filter(|r| !r.deleted)
            .map(|r| &r.user)
            .filter(|u| filter.email.as_ref().map_or(true, |e| &u.email == e))
            .filter(|u| {
                filter
                    .password_hash
                    .as_ref()
                    .map_or(true, |h| &u.password_hash == h)
            })
            .filter(|u| address.as_ref().map_or(true, |re| re.is_match(&u.address)))
            .filter(|u| filter.cursor == 0 || u.id < filter.cursor)
            .cloned()
            .collect();
        users.sort_by(|a, b| b.id.cmp(&a.id));
        users.truncate(filter.num.max(0) as usize);
        Ok(users)
    }

    async fn update(&self, changes: &UserChanges) -> Result<bool, RepoError> {
        self.check_writable()?;
        let mut rows = self.rows.write().await;
        if !rows.iter().any(|r| r.user.id == changes.id && !r.deleted) {
            return Ok(false);
        }
        if Self::email_taken(&rows, &changes.email, Some(changes.id)) {
            return Err(RepoError::Duplicate);
        }
        let Some(row) = rows.iter_mut().find(|r| r.user.id == changes.id && !r.deleted) else {
            return Ok(false);
        };
        row.user.email = changes.email.clone();
        row.user.address = changes.address.clone();
        if let Some(hash) = &changes.password_hash {
            row.user.password_hash = hash.clone();
        }
        Ok(true)
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<User>, RepoError> {
        let rows = self.rows.read().await;
        Ok(rows
            .iter()
            .find(|r| r.user.id == id && !r.deleted)
            .map(|r| r.user.clone()))
    }

    async fn delete(&self, id: i64) -> Result<bool, RepoError> {
        self.check_writable()?;
        let mut rows = self.rows.write().await;
        match rows.iter_mut().find(|r| r.user.id == id && !r.deleted) {
            Some(row) => {
                row.deleted = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn insert_token(&self, user_id: i64, token: &str) -> Result<(), RepoError> {
        self.check_writable()?;
        self.tokens.write().await.push((user_id, token.to_string()));
        Ok(())
    }

    async fn validate_token(&self, token: &str) -> Result<bool, RepoError> {
        Ok(self.tokens.read().await.iter().any(|(_, t)| t == token))
    }
}
