//! Bans, the operator audit log, and the key/value config table.

use super::{bounded, DbError};
use sqlx::SqlitePool;

/// An account ban.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Ban {
    #[sqlx(rename = "ban_id")]
    pub id: i64,
    pub account_id: i64,
    pub banned_by: i64,
    pub reason: String,
    pub banned_at: i64,
    pub expires_at: Option<i64>,
    pub is_active: bool,
}

/// One operator action. Append-only.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AuditEntry {
    #[sqlx(rename = "entry_id")]
    pub id: i64,
    pub operator_id: i64,
    pub action: String,
    pub target_account: Option<i64>,
    pub target_room: Option<i64>,
    pub detail: String,
    pub performed_at: i64,
}

/// Repository for bans, audit entries, and stored config.
pub struct AdminRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> AdminRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a ban. `expires_at` of `None` means permanent.
    pub async fn create_ban(
        &self,
        account_id: i64,
        banned_by: i64,
        reason: &str,
        expires_at: Option<i64>,
    ) -> Result<(), DbError> {
        bounded(async {
            sqlx::query(
                "INSERT INTO bans (account_id, banned_by, reason, banned_at, expires_at, is_active) \
                 VALUES (?, ?, ?, ?, ?, 1)",
            )
            .bind(account_id)
            .bind(banned_by)
            .bind(reason)
            .bind(chrono::Utc::now().timestamp())
            .bind(expires_at)
            .execute(self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    /// Deactivate every active ban on the account.
    pub async fn deactivate_bans(&self, account_id: i64) -> Result<(), DbError> {
        bounded(async {
            sqlx::query("UPDATE bans SET is_active = 0 WHERE account_id = ? AND is_active = 1")
                .bind(account_id)
                .execute(self.pool)
                .await?;
            Ok(())
        })
        .await
    }

    /// Any active, unexpired ban blocks login.
    pub async fn is_currently_banned(&self, account_id: i64) -> Result<bool, DbError> {
        bounded(async {
            let count: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM bans \
                 WHERE account_id = ? AND is_active = 1 \
                   AND (expires_at IS NULL OR expires_at > ?)",
            )
            .bind(account_id)
            .bind(chrono::Utc::now().timestamp())
            .fetch_one(self.pool)
            .await?;
            Ok(count > 0)
        })
        .await
    }

    pub async fn list_active_bans(&self) -> Result<Vec<Ban>, DbError> {
        bounded(async {
            Ok(sqlx::query_as::<_, Ban>(
                "SELECT ban_id, account_id, banned_by, reason, banned_at, expires_at, is_active \
                 FROM bans WHERE is_active = 1 ORDER BY banned_at DESC",
            )
            .fetch_all(self.pool)
            .await?)
        })
        .await
    }

    /// Append an audit entry. Never mutated afterwards.
    pub async fn append_audit(
        &self,
        operator_id: i64,
        action: &str,
        target_account: Option<i64>,
        target_room: Option<i64>,
        detail: &str,
    ) -> Result<(), DbError> {
        bounded(async {
            sqlx::query(
                "INSERT INTO audit_log (operator_id, action, target_account, target_room, detail, performed_at) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(operator_id)
            .bind(action)
            .bind(target_account)
            .bind(target_room)
            .bind(detail)
            .bind(chrono::Utc::now().timestamp())
            .execute(self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    /// Audit entries, newest first.
    pub async fn read_audit(&self, limit: i64, offset: i64) -> Result<Vec<AuditEntry>, DbError> {
        bounded(async {
            Ok(sqlx::query_as::<_, AuditEntry>(
                "SELECT entry_id, operator_id, action, target_account, target_room, detail, performed_at \
                 FROM audit_log ORDER BY performed_at DESC, entry_id DESC LIMIT ? OFFSET ?",
            )
            .bind(limit)
            .bind(offset)
            .fetch_all(self.pool)
            .await?)
        })
        .await
    }

    pub async fn get_config(&self, key: &str) -> Result<String, DbError> {
        bounded(async {
            sqlx::query_scalar::<_, String>("SELECT value FROM config WHERE key = ?")
                .bind(key)
                .fetch_optional(self.pool)
                .await?
                .ok_or_else(|| DbError::ConfigKeyNotFound(key.to_string()))
        })
        .await
    }

    pub async fn set_config(&self, key: &str, value: &str) -> Result<(), DbError> {
        bounded(async {
            sqlx::query(
                "INSERT INTO config (key, value, updated_at) VALUES (?, ?, ?) \
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            )
            .bind(key)
            .bind(value)
            .bind(chrono::Utc::now().timestamp())
            .execute(self.pool)
            .await?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use crate::db::{test_db, Database, DbError};

    async fn account(db: &Database, name: &str) -> i64 {
        db.accounts()
            .create(name, &"a".repeat(64), &"b".repeat(32))
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn permanent_ban_blocks_until_deactivated() {
        let db = test_db().await;
        let target = account(&db, "banned").await;
        let op = account(&db, "op").await;
        let repo = db.admin();

        repo.create_ban(target, op, "spamming", None).await.unwrap();
        assert!(repo.is_currently_banned(target).await.unwrap());
        assert_eq!(repo.list_active_bans().await.unwrap().len(), 1);

        repo.deactivate_bans(target).await.unwrap();
        assert!(!repo.is_currently_banned(target).await.unwrap());
        assert!(repo.list_active_bans().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn expired_ban_does_not_block() {
        let db = test_db().await;
        let target = account(&db, "parolee").await;
        let op = account(&db, "op").await;
        let repo = db.admin();

        let past = chrono::Utc::now().timestamp() - 60;
        repo.create_ban(target, op, "cooldown", Some(past)).await.unwrap();
        assert!(!repo.is_currently_banned(target).await.unwrap());

        let future = chrono::Utc::now().timestamp() + 3600;
        repo.create_ban(target, op, "again", Some(future)).await.unwrap();
        assert!(repo.is_currently_banned(target).await.unwrap());
    }

    #[tokio::test]
    async fn audit_append_and_read() {
        let db = test_db().await;
        let op = account(&db, "op").await;
        let repo = db.admin();

        repo.append_audit(op, "ban", Some(42), None, "Banned user spammer (ID 42): spam")
            .await
            .unwrap();
        repo.append_audit(op, "broadcast", None, None, "Broadcast message: maintenance soon")
            .await
            .unwrap();

        let entries = repo.read_audit(10, 0).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].action, "broadcast");
        assert_eq!(entries[1].target_account, Some(42));

        let first_page = repo.read_audit(1, 0).await.unwrap();
        assert_eq!(first_page.len(), 1);
    }

    #[tokio::test]
    async fn config_roundtrip_and_missing_key() {
        let db = test_db().await;
        let repo = db.admin();

        assert!(matches!(
            repo.get_config("server.version").await,
            Err(DbError::ConfigKeyNotFound(_))
        ));

        repo.set_config("server.version", "0.3.0").await.unwrap();
        assert_eq!(repo.get_config("server.version").await.unwrap(), "0.3.0");

        repo.set_config("server.version", "0.3.1").await.unwrap();
        assert_eq!(repo.get_config("server.version").await.unwrap(), "0.3.1");
    }
}
