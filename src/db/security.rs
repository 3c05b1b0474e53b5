//! Address-security records and the append-only login attempt log.

use super::{bounded, DbError};
use sqlx::SqlitePool;

/// Per-account address-security state.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AddressRecord {
    pub account_id: i64,
    pub last_known_address: Option<String>,
    pub suspicion_count: i64,
    pub is_locked: bool,
    pub lock_reason: Option<String>,
    pub locked_at: Option<i64>,
    pub locked_by: Option<i64>,
}

/// One authentication attempt. Account id 0 marks an unknown username.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LoginAttempt {
    pub attempt_id: i64,
    pub account_id: i64,
    pub address: String,
    pub attempted_at: i64,
    pub succeeded: bool,
    pub client_info: Option<String>,
}

/// Repository for address tracking and login attempts.
pub struct SecurityRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> SecurityRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Append a login attempt row. Never mutated afterwards.
    pub async fn record_login_attempt(
        &self,
        account_id: i64,
        address: &str,
        succeeded: bool,
        client_info: Option<&str>,
    ) -> Result<(), DbError> {
        bounded(async {
            sqlx::query(
                "INSERT INTO login_attempts (account_id, address, attempted_at, succeeded, client_info) \
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(account_id)
            .bind(address)
            .bind(chrono::Utc::now().timestamp())
            .bind(succeeded)
            .bind(client_info)
            .execute(self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    /// Fetch the address record; its absence is a persistence fault, since
    /// the account-insert trigger should have created it.
    pub async fn address_record(&self, account_id: i64) -> Result<AddressRecord, DbError> {
        bounded(async {
            sqlx::query_as::<_, AddressRecord>(
                "SELECT account_id, last_known_address, suspicion_count, is_locked, \
                        lock_reason, locked_at, locked_by \
                 FROM address_security WHERE account_id = ?",
            )
            .bind(account_id)
            .fetch_optional(self.pool)
            .await?
            .ok_or(DbError::SecurityRecordMissing(account_id))
        })
        .await
    }

    pub async fn update_last_known_address(
        &self,
        account_id: i64,
        address: &str,
    ) -> Result<(), DbError> {
        bounded(async {
            sqlx::query("UPDATE address_security SET last_known_address = ? WHERE account_id = ?")
                .bind(address)
                .bind(account_id)
                .execute(self.pool)
                .await?;
            Ok(())
        })
        .await
    }

    /// Atomically bump the suspicion counter and return the new value.
    /// The increment-and-read is one statement; concurrent logins cannot
    /// observe a stale count.
    pub async fn increment_suspicion(&self, account_id: i64) -> Result<i64, DbError> {
        bounded(async {
            sqlx::query_scalar::<_, i64>(
                "UPDATE address_security SET suspicion_count = suspicion_count + 1 \
                 WHERE account_id = ? RETURNING suspicion_count",
            )
            .bind(account_id)
            .fetch_optional(self.pool)
            .await?
            .ok_or(DbError::SecurityRecordMissing(account_id))
        })
        .await
    }

    /// Lower the suspicion counter, with a floor of zero.
    pub async fn decrement_suspicion(&self, account_id: i64) -> Result<i64, DbError> {
        bounded(async {
            sqlx::query_scalar::<_, i64>(
                "UPDATE address_security SET suspicion_count = \
                     CASE WHEN suspicion_count > 0 THEN suspicion_count - 1 ELSE 0 END \
                 WHERE account_id = ? RETURNING suspicion_count",
            )
            .bind(account_id)
            .fetch_optional(self.pool)
            .await?
            .ok_or(DbError::SecurityRecordMissing(account_id))
        })
        .await
    }

    pub async fn reset_suspicion(&self, account_id: i64) -> Result<(), DbError> {
        bounded(async {
            sqlx::query("UPDATE address_security SET suspicion_count = 0 WHERE account_id = ?")
                .bind(account_id)
                .execute(self.pool)
                .await?;
            Ok(())
        })
        .await
    }

    pub async fn lock_account(
        &self,
        account_id: i64,
        reason: &str,
        locked_by: Option<i64>,
    ) -> Result<(), DbError> {
        bounded(async {
            sqlx::query(
                "UPDATE address_security SET is_locked = 1, lock_reason = ?, locked_at = ?, locked_by = ? \
                 WHERE account_id = ?",
            )
            .bind(reason)
            .bind(chrono::Utc::now().timestamp())
            .bind(locked_by)
            .bind(account_id)
            .execute(self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    /// Clear the lock and reset the suspicion counter to zero.
    pub async fn unlock_account(&self, account_id: i64) -> Result<(), DbError> {
        bounded(async {
            sqlx::query(
                "UPDATE address_security SET is_locked = 0, suspicion_count = 0, \
                     lock_reason = NULL, locked_at = NULL, locked_by = NULL \
                 WHERE account_id = ?",
            )
            .bind(account_id)
            .execute(self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    /// Recent attempts for an account, newest first.
    pub async fn login_history(
        &self,
        account_id: i64,
        limit: i64,
    ) -> Result<Vec<LoginAttempt>, DbError> {
        bounded(async {
            Ok(sqlx::query_as::<_, LoginAttempt>(
                "SELECT attempt_id, account_id, address, attempted_at, succeeded, client_info \
                 FROM login_attempts WHERE account_id = ? \
                 ORDER BY attempted_at DESC, attempt_id DESC LIMIT ?",
            )
            .bind(account_id)
            .bind(limit)
            .fetch_all(self.pool)
            .await?)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use crate::db::{test_db, DbError};

    async fn seeded_account(db: &crate::db::Database) -> i64 {
        db.accounts()
            .create("tracked", &"a".repeat(64), &"b".repeat(32))
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn suspicion_counter_is_atomic_and_floored() {
        let db = test_db().await;
        let id = seeded_account(&db).await;
        let repo = db.security();

        assert_eq!(repo.increment_suspicion(id).await.unwrap(), 1);
        assert_eq!(repo.increment_suspicion(id).await.unwrap(), 2);
        assert_eq!(repo.decrement_suspicion(id).await.unwrap(), 1);
        assert_eq!(repo.decrement_suspicion(id).await.unwrap(), 0);
        assert_eq!(repo.decrement_suspicion(id).await.unwrap(), 0);

        repo.reset_suspicion(id).await.unwrap();
        assert_eq!(repo.address_record(id).await.unwrap().suspicion_count, 0);
    }

    #[tokio::test]
    async fn lock_and_unlock_cycle() {
        let db = test_db().await;
        let id = seeded_account(&db).await;
        let repo = db.security();

        repo.increment_suspicion(id).await.unwrap();
        repo.lock_account(id, "Too many address changes (4)", None)
            .await
            .unwrap();

        let record = repo.address_record(id).await.unwrap();
        assert!(record.is_locked);
        assert_eq!(
            record.lock_reason.as_deref(),
            Some("Too many address changes (4)")
        );
        assert!(record.locked_at.is_some());
        assert!(record.locked_by.is_none());

        repo.unlock_account(id).await.unwrap();
        let record = repo.address_record(id).await.unwrap();
        assert!(!record.is_locked);
        assert_eq!(record.suspicion_count, 0);
        assert!(record.lock_reason.is_none());
    }

    #[tokio::test]
    async fn missing_record_is_a_distinct_error() {
        let db = test_db().await;
        assert!(matches!(
            db.security().address_record(999).await,
            Err(DbError::SecurityRecordMissing(999))
        ));
        assert!(matches!(
            db.security().increment_suspicion(999).await,
            Err(DbError::SecurityRecordMissing(999))
        ));
    }

    #[tokio::test]
    async fn login_history_is_newest_first() {
        let db = test_db().await;
        let id = seeded_account(&db).await;
        let repo = db.security();

        repo.record_login_attempt(id, "10.0.0.1", false, None).await.unwrap();
        repo.record_login_attempt(id, "10.0.0.2", true, Some("ref-client/1.0"))
            .await
            .unwrap();
        repo.record_login_attempt(0, "10.0.0.3", false, None).await.unwrap();

        let history = repo.login_history(id, 10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].address, "10.0.0.2");
        assert!(history[0].succeeded);
        assert_eq!(history[0].client_info.as_deref(), Some("ref-client/1.0"));
    }
}
