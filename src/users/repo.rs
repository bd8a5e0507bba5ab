use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};
use thiserror::Error;
use tracing::debug;

use crate::users::repo_types::{Filter, NewUser, User, UserChanges};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("unique constraint violated")]
    Duplicate,
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

fn classify(err: sqlx::Error) -> RepoError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => RepoError::Duplicate,
        _ => RepoError::Database(err),
    }
}

/// Storage for users and their issued tokens.
///
/// Reads never return soft-deleted rows, and `update`/`delete` report `false`
/// when no live row matched.
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn store(&self, user: NewUser) -> Result<User, RepoError>;
    async fn fetch(&self, filter: &Filter) -> Result<Vec<User>, RepoError>;

    async fn update(&self, changes: &UserChanges) -> Result<bool, RepoError>;
    async fn get_by_id(&self, id: i64) -> Result<Option<User>, RepoError>;
    async fn delete(&self, id: i64) -> Result<bool, RepoError>;
    async fn insert_token(&self, user_id: i64, token: &str) -> Result<(), RepoError>;
    async fn validate_token(&self, token: &str) -> Result<bool, RepoError>;
}

/// Live rows matching `filter`, newest first, strictly below a non-zero cursor.
fn fetch_query(filter: &Filter) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::<Postgres>::new(
        "SELECT id, email, password_hash, address FROM users WHERE delete_time IS NULL",
    );
    if let Some(email) = &filter.email {
        qb.push(" AND email = ").push_bind(email.clone());
    }
    if let Some(hash) = &filter.password_hash {
        qb.push(" AND password_hash = ").push_bind(hash.clone());
    }
    if let Some(address) = &filter.address {
        qb.push(" AND address ~ ").push_bind(address.clone());
    }
    if filter.cursor != 0 {
        qb.push(" AND id < ").push_bind(filter.cursor);
    }
    qb.push(" ORDER BY id DESC LIMIT ").push_bind(filter.num);
    qb
}

#[derive(Debug, Clone)]
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn store(&self, user: NewUser) -> Result<User, RepoError> {
        let mut tx = self.pool.begin().await?;
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO users (email, password_hash, address, create_time)
            VALUES ($1, $2, $3, now())
            RETURNING id
            "#,
        )
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.address)
        .fetch_one(&mut *tx)
        .await
        .map_err(classify)?;
        tx.commit().await?;

        debug!(user_id = id, "user stored");
        Ok(User {
            id,
            email: user.email,
            password_hash: user.password_hash,
            address: user.address,
        })
    }

    async fn fetch(&self, filter: &Filter) -> Result<Vec<User>, RepoError> {
        let mut qb = QueryBuilder::<Postgres>::new(
            "SELECT id, email, password_hash, address FROM users WHERE delete_time IS NULL",
        );
        if let Some(email) = &filter.email {
            qb.push(" AND email = ").push_bind(email.clone());
        }
        if let Some(hash) = &filter.password_hash {
            qb.push(" AND password_hash = ").push_bind(hash.clone());
        }
        if let Some(address) = &filter.address {
            qb.push(" AND address ~ ").push_bind(address.clone());
        }
        if filter.cursor != 0 {
            qb.push(" AND id < ").push_bind(filter.cursor);
        }
        qb.push(" ORDER BY id DESC LIMIT ").push_bind(filter.num);

        let rows = qb.build_query_as::<User>().fetch_all(&self.pool).await?;
        Ok(rows)
    }

    async fn update(&self, changes: &UserChanges) -> Result<bool, RepoError> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            r#"
            UPDATE users
               SET email = $1,
                   address = $2,
                   password_hash = COALESCE($3, password_hash),
                   update_time = now()
             WHERE id = $4 AND delete_time IS NULL
            "#,
        )
        .bind(&changes.email)
        .bind(&changes.address)
        .bind(changes.password_hash.as_deref())
        .bind(changes.id)
        .execute(&mut *tx)
        .await
        .map_err(classify)?;

        if result.rows_affected() != 1 {
            tx.rollback().await?;
            return Ok(false);
        }
        tx.commit().await?;
        Ok(true)
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<User>, RepoError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, password_hash, address
              FROM users
             WHERE id = $1 AND delete_time IS NULL
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn delete(&self, id: i64) -> Result<bool, RepoError> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            r#"
            UPDATE users
               SET delete_time = now()
             WHERE id = $1 AND delete_time IS NULL
            "#,
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() != 1 {
            tx.rollback().await?;
            return Ok(false);
        }
        tx.commit().await?;
        Ok(true)
    }

    async fn insert_token(&self, user_id: i64, token: &str) -> Result<(), RepoError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO tokens (user_id, token, create_time)
            VALUES ($1, $2, now())
            "#,
        )
        .bind(user_id)
        .bind(token)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn validate_token(&self, token: &str) -> Result<bool, RepoError> {
        let found: bool =
            sqlx::query_scalar(r#"SELECT EXISTS (SELECT 1 FROM tokens WHERE token = $1)"#)
                .bind(token)
                .fetch_one(&self.pool)
                .await?;
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_query_defaults_to_live_rows_newest_first() {
        let qb = fetch_query(&Filter::default());
        assert_eq!(
            qb.sql(),
            "SELECT id, email, password_hash, address FROM users WHERE delete_time IS NULL \
             ORDER BY id DESC LIMIT $1"
        );
    }

    #[test]
    fn fetch_query_binds_every_filter_in_order() {
        let qb = fetch_query(&Filter {
            email: Some("gama@example.com".into()),
            password_hash: Some("hash".into()),
            address: Some("^Men".into()),
            cursor: 10,
            num: 5,
        });
        assert_eq!(
            qb.sql(),
            "SELECT id, email, password_hash, address FROM users WHERE delete_time IS NULL \
             AND email = $1 AND password_hash = $2 AND address ~ $3 AND id < $4 \
             ORDER BY id DESC LIMIT $5"
        );
    }

    #[test]
    fn zero_cursor_adds_no_bound() {
        let qb = fetch_query(&Filter::by_email("gama@example.com"));
        assert!(!qb.sql().contains("id <"));
        assert!(qb.sql().contains("email = $1"));
    }

    /// Runs against the database named by `TEST_DATABASE_URL`; skipped when it
    /// is unset. Truncates `users` and `tokens`.
    async fn live_pool() -> Option<PgPool> {
        let url = std::env::var("TEST_DATABASE_URL").ok()?;
        let pool = PgPool::connect(&url).await.expect("connect test database");
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .expect("run migrations");
        sqlx::query("TRUNCATE tokens, users RESTART IDENTITY CASCADE")
            .execute(&pool)
            .await
            .expect("truncate");
        Some(pool)
    }

    fn new_user(i: i64) -> NewUser {
        NewUser {
            email: format!("user{i}@example.com"),
            password_hash: format!("hash-{i}"),
            address: format!("Street {i}"),
        }
    }

    fn ids(users: &[User]) -> Vec<i64> {
        users.iter().map(|u| u.id).collect()
    }

    #[tokio::test]
    async fn postgres_repository_round_trip() {
        let Some(pool) = live_pool().await else {
            return;
        };
        let repo = PgUserRepository::new(pool);

        for i in 1..=4 {
            assert_eq!(repo.store(new_user(i)).await.unwrap().id, i);
        }
        assert!(matches!(
            repo.store(new_user(1)).await,
            Err(RepoError::Duplicate)
        ));

        let page = repo
            .fetch(&Filter {
                cursor: 4,
                num: 2,
                ..Filter::default()
            })
            .await
            .unwrap();
        assert_eq!(ids(&page), vec![3, 2]);

        let moved = UserChanges {
            id: 2,
            email: "user2@example.com".into(),
            address: "Moved".into(),
            password_hash: None,
        };
        assert!(repo.update(&moved).await.unwrap());
        let stored = repo.get_by_id(2).await.unwrap().unwrap();
        assert_eq!(stored.address, "Moved");
        assert_eq!(stored.password_hash, "hash-2");

        assert!(repo.delete(3).await.unwrap());
        assert!(!repo.delete(3).await.unwrap());
        assert!(repo.get_by_id(3).await.unwrap().is_none());
        assert_eq!(ids(&repo.fetch(&Filter::default()).await.unwrap()), vec![4, 2, 1]);

        let on_deleted = UserChanges {
            id: 3,
            email: "user3@example.com".into(),
            address: "Ghost".into(),
            password_hash: Some("other".into()),
        };
        assert!(!repo.update(&on_deleted).await.unwrap());

        // the deleted row frees its email
        assert_eq!(repo.store(new_user(3)).await.unwrap().id, 5);

        assert!(matches!(
            repo.fetch(&Filter {
                address: Some("Street [".into()),
                ..Filter::default()
            })
            .await,
            Err(RepoError::Database(_))
        ));

        repo.insert_token(1, "issued-token").await.unwrap();
        assert!(repo.validate_token("issued-token").await.unwrap());
        assert!(!repo.validate_token("other-token").await.unwrap());
    }
}
