//! Account repository.

use super::{bounded, DbError};
use sqlx::SqlitePool;

/// A registered account.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Account {
    #[sqlx(rename = "account_id")]
    pub id: i64,
    pub username: String,
    pub password_hash: String,
    pub password_salt: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub is_active: bool,
    pub is_operator: bool,
    pub last_login_at: Option<i64>,
}

const ACCOUNT_COLUMNS: &str = "account_id, username, password_hash, password_salt, \
     created_at, updated_at, is_active, is_operator, last_login_at";

/// Repository for account operations.
pub struct AccountRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> AccountRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a new account. The paired address-security row is created by
    /// the store-side trigger.
    pub async fn create(
        &self,
        username: &str,
        password_hash: &str,
        password_salt: &str,
    ) -> Result<Account, DbError> {
        bounded(async {
            let now = chrono::Utc::now().timestamp();
            let result = sqlx::query(
                "INSERT INTO accounts \
                 (username, password_hash, password_salt, created_at, updated_at, is_active, is_operator) \
                 VALUES (?, ?, ?, ?, ?, 1, 0)",
            )
            .bind(username)
            .bind(password_hash)
            .bind(password_salt)
            .bind(now)
            .bind(now)
            .execute(self.pool)
            .await
            .map_err(|e| {
                if let sqlx::Error::Database(ref db_err) = e {
                    if db_err.is_unique_violation() {
                        return DbError::UsernameExists(username.to_string());
                    }
                }
                DbError::from(e)
            })?;

            self.fetch_by_id(result.last_insert_rowid()).await
        })
        .await
    }

    pub async fn get_by_id(&self, account_id: i64) -> Result<Account, DbError> {
        bounded(self.fetch_by_id(account_id)).await
    }

    async fn fetch_by_id(&self, account_id: i64) -> Result<Account, DbError> {
        sqlx::query_as::<_, Account>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE account_id = ?"
        ))
        .bind(account_id)
        .fetch_optional(self.pool)
        .await?
        .ok_or_else(|| DbError::AccountNotFound(format!("#{account_id}")))
    }

    pub async fn get_by_username(&self, username: &str) -> Result<Account, DbError> {
        bounded(async {
            sqlx::query_as::<_, Account>(&format!(
                "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE username = ?"
            ))
            .bind(username)
            .fetch_optional(self.pool)
            .await?
            .ok_or_else(|| DbError::AccountNotFound(username.to_string()))
        })
        .await
    }

    pub async fn username_exists(&self, username: &str) -> Result<bool, DbError> {
        bounded(async {
            let count: i64 =
                sqlx::query_scalar("SELECT COUNT(*) FROM accounts WHERE username = ?")
                    .bind(username)
                    .fetch_one(self.pool)
                    .await?;
            Ok(count > 0)
        })
        .await
    }

    pub async fn update_last_login(&self, account_id: i64) -> Result<(), DbError> {
        bounded(async {
            sqlx::query("UPDATE accounts SET last_login_at = ? WHERE account_id = ?")
                .bind(chrono::Utc::now().timestamp())
                .bind(account_id)
                .execute(self.pool)
                .await?;
            Ok(())
        })
        .await
    }

    pub async fn set_operator(&self, account_id: i64, is_operator: bool) -> Result<(), DbError> {
        bounded(async {
            sqlx::query(
                "UPDATE accounts SET is_operator = ?, updated_at = ? WHERE account_id = ?",
            )
            .bind(is_operator)
            .bind(chrono::Utc::now().timestamp())
            .bind(account_id)
            .execute(self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    pub async fn set_active(&self, account_id: i64, is_active: bool) -> Result<(), DbError> {
        bounded(async {
            sqlx::query("UPDATE accounts SET is_active = ?, updated_at = ? WHERE account_id = ?")
                .bind(is_active)
                .bind(chrono::Utc::now().timestamp())
                .bind(account_id)
                .execute(self.pool)
                .await?;
            Ok(())
        })
        .await
    }

    /// Replace the stored digest and salt (password change).
    pub async fn update_credentials(
        &self,
        account_id: i64,
        password_hash: &str,
        password_salt: &str,
    ) -> Result<(), DbError> {
        bounded(async {
            sqlx::query(
                "UPDATE accounts SET password_hash = ?, password_salt = ?, updated_at = ? \
                 WHERE account_id = ?",
            )
            .bind(password_hash)
            .bind(password_salt)
            .bind(chrono::Utc::now().timestamp())
            .bind(account_id)
            .execute(self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    pub async fn list(&self, limit: i64, offset: i64) -> Result<Vec<Account>, DbError> {
        bounded(async {
            Ok(sqlx::query_as::<_, Account>(&format!(
                "SELECT {ACCOUNT_COLUMNS} FROM accounts ORDER BY created_at DESC LIMIT ? OFFSET ?"
            ))
            .bind(limit)
            .bind(offset)
            .fetch_all(self.pool)
            .await?)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use crate::db::test_db;
    use crate::db::DbError;

    #[tokio::test]
    async fn create_and_fetch() {
        let db = test_db().await;
        let repo = db.accounts();

        let account = repo.create("alice", &"a".repeat(64), &"b".repeat(32)).await.unwrap();
        assert!(account.is_active);
        assert!(!account.is_operator);
        assert!(account.last_login_at.is_none());

        let by_name = repo.get_by_username("alice").await.unwrap();
        assert_eq!(by_name.id, account.id);
        assert!(repo.username_exists("alice").await.unwrap());
        assert!(!repo.username_exists("bob").await.unwrap());
    }

    #[tokio::test]
    async fn duplicate_username_is_typed() {
        let db = test_db().await;
        let repo = db.accounts();
        repo.create("carol", &"a".repeat(64), &"b".repeat(32)).await.unwrap();
        let err = repo
            .create("carol", &"c".repeat(64), &"d".repeat(32))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::UsernameExists(_)));
    }

    #[tokio::test]
    async fn missing_account_is_not_found() {
        let db = test_db().await;
        assert!(matches!(
            db.accounts().get_by_username("ghost").await,
            Err(DbError::AccountNotFound(_))
        ));
    }

    #[tokio::test]
    async fn flags_and_credentials_update() {
        let db = test_db().await;
        let repo = db.accounts();
        let account = repo.create("dave", &"a".repeat(64), &"b".repeat(32)).await.unwrap();

        repo.set_operator(account.id, true).await.unwrap();
        repo.set_active(account.id, false).await.unwrap();
        repo.update_last_login(account.id).await.unwrap();
        repo.update_credentials(account.id, &"e".repeat(64), &"f".repeat(32))
            .await
            .unwrap();

        let reloaded = repo.get_by_id(account.id).await.unwrap();
        assert!(reloaded.is_operator);
        assert!(!reloaded.is_active);
        assert!(reloaded.last_login_at.is_some());
        assert_eq!(reloaded.password_hash, "e".repeat(64));
        assert_eq!(reloaded.password_salt, "f".repeat(32));
    }
}
