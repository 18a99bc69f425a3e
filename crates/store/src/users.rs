//! User persistence
//!
//! Login and token refresh live in the auth collaborator; this store only
//! owns the rows it reads.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::StoreError;

/// A stored user account
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: String,
    pub email: String,
    pub password_hash: String,
    pub display_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A user account about to be created
#[derive(Debug, Clone)]
pub struct NewUser {
    pub id: String,
    pub email: String,
    pub password_hash: String,
    pub display_name: Option<String>,
}

/// User store trait for abstraction
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn create(&self, user: &NewUser) -> Result<(), StoreError>;
    async fn get_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;
}

/// SQLite implementation of the user store
pub struct SqliteUserStore {
    pool: SqlitePool,
}

impl SqliteUserStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserStore for SqliteUserStore {
    async fn create(&self, user: &NewUser) -> Result<(), StoreError> {
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO users (id, email, password_hash, display_name, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&user.id)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.display_name)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, email, password_hash, display_name, created_at, updated_at \
             FROM users WHERE email = ?",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_pool;

    #[tokio::test]
    async fn test_create_and_get_by_email() {
        let store = SqliteUserStore::new(test_pool().await);

        store
            .create(&NewUser {
                id: "u-1".to_string(),
                email: "ops@example.com".to_string(),
                password_hash: "argon2...".to_string(),
                display_name: None,
            })
            .await
            .unwrap();

        let user = store.get_by_email("ops@example.com").await.unwrap().unwrap();
        assert_eq!(user.id, "u-1");
        assert!(store.get_by_email("nobody@example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_email_unique() {
        let store = SqliteUserStore::new(test_pool().await);
        let user = NewUser {
            id: "u-1".to_string(),
            email: "ops@example.com".to_string(),
            password_hash: "h".to_string(),
            display_name: None,
        };
        store.create(&user).await.unwrap();

        let mut dup = user.clone();
        dup.id = "u-2".to_string();
        assert!(store.create(&dup).await.is_err());
    }
}
