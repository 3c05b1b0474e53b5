//! Operator service: privileged actions with audit trail.
//!
//! Every action authorizes through `require_operator` first, and every
//! state-mutating action appends an audit entry. Audit writes are
//! fire-and-forget once the action itself has taken effect.

use crate::db::{Account, AuditEntry, Database, DbError};
use thiserror::Error;
use tracing::{info, warn};

/// Operator action failures.
#[derive(Debug, Error)]
pub enum AdminError {
    #[error("permission denied: admin privileges required")]
    PermissionDenied,
    #[error("cannot {0} admin users")]
    CannotTargetOperator(&'static str),
    #[error("cannot remove your own admin privileges")]
    SelfDemotion,
    #[error("invalid duration format: {0}")]
    BadDuration(String),
    #[error(transparent)]
    Db(#[from] DbError),
}

/// Aggregated server statistics for `ADMIN stats`.
#[derive(Debug, Default)]
pub struct ServerStats {
    pub total_users: usize,
    pub active_users: usize,
    pub admin_users: usize,
    pub active_bans: usize,
}

/// Privileged operations over the account store.
pub struct AdminService {
    db: Database,
}

impl AdminService {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Fetch the actor and fail unless they carry the operator flag.
    pub async fn require_operator(&self, actor_id: i64) -> Result<Account, AdminError> {
        let actor = self.db.accounts().get_by_id(actor_id).await?;
        if !actor.is_operator {
            return Err(AdminError::PermissionDenied);
        }
        Ok(actor)
    }

    /// Grant operator privileges.
    pub async fn make_operator(
        &self,
        actor_id: i64,
        target_username: &str,
    ) -> Result<Account, AdminError> {
        self.require_operator(actor_id).await?;
        let target = self.db.accounts().get_by_username(target_username).await?;

        self.db.accounts().set_operator(target.id, true).await?;
        self.audit(
            actor_id,
            "makeadmin",
            Some(target.id),
            &format!("Granted admin privileges to user ID {}", target.id),
        )
        .await;
        Ok(target)
    }

    /// Revoke operator privileges. Operators cannot demote themselves.
    pub async fn remove_operator(
        &self,
        actor_id: i64,
        target_username: &str,
    ) -> Result<Account, AdminError> {
        self.require_operator(actor_id).await?;
        let target = self.db.accounts().get_by_username(target_username).await?;

        if target.id == actor_id {
            return Err(AdminError::SelfDemotion);
        }

        self.db.accounts().set_operator(target.id, false).await?;
        self.audit(
            actor_id,
            "removeadmin",
            Some(target.id),
            &format!("Revoked admin privileges from user ID {}", target.id),
        )
        .await;
        Ok(target)
    }

    /// Ban an account: creates the ban row and deactivates the account.
    /// `duration_seconds` of 0 means permanent.
    pub async fn ban(
        &self,
        actor_id: i64,
        target_username: &str,
        reason: &str,
        duration_seconds: u64,
    ) -> Result<Account, AdminError> {
        self.require_operator(actor_id).await?;
        let target = self.db.accounts().get_by_username(target_username).await?;

        if target.is_operator {
            return Err(AdminError::CannotTargetOperator("ban"));
        }

        let expires_at = if duration_seconds > 0 {
            Some(chrono::Utc::now().timestamp() + duration_seconds as i64)
        } else {
            None
        };

        self.db
            .admin()
            .create_ban(target.id, actor_id, reason, expires_at)
            .await?;
        self.db.accounts().set_active(target.id, false).await?;

        self.audit(
            actor_id,
            "ban",
            Some(target.id),
            &format!("Banned user {target_username} (ID {}): {reason}", target.id),
        )
        .await;
        info!(actor_id, target = %target_username, duration_seconds, "User banned");
        Ok(target)
    }

    /// Lift all active bans and reactivate the account.
    pub async fn unban(&self, actor_id: i64, target_username: &str) -> Result<Account, AdminError> {
        self.require_operator(actor_id).await?;
        let target = self.db.accounts().get_by_username(target_username).await?;

        self.db.admin().deactivate_bans(target.id).await?;
        self.db.accounts().set_active(target.id, true).await?;

        self.audit(
            actor_id,
            "unban",
            Some(target.id),
            &format!("Unbanned user {target_username} (ID {})", target.id),
        )
        .await;
        Ok(target)
    }

    /// Clear an address-anomaly lock (also resets the suspicion counter).
    pub async fn unlock(&self, actor_id: i64, target_username: &str) -> Result<Account, AdminError> {
        self.require_operator(actor_id).await?;
        let target = self.db.accounts().get_by_username(target_username).await?;

        self.db.security().unlock_account(target.id).await?;

        self.audit(
            actor_id,
            "unlock",
            Some(target.id),
            &format!("Unlocked account for user {target_username} (ID {})", target.id),
        )
        .await;
        Ok(target)
    }

    /// Authorize and audit a kick. The connection engine performs the
    /// disconnect itself.
    pub async fn kick(
        &self,
        actor_id: i64,
        target_username: &str,
        reason: &str,
    ) -> Result<Account, AdminError> {
        self.require_operator(actor_id).await?;
        let target = self.db.accounts().get_by_username(target_username).await?;

        if target.is_operator {
            return Err(AdminError::CannotTargetOperator("kick"));
        }

        self.audit(
            actor_id,
            "kick",
            Some(target.id),
            &format!("Kicked user {target_username} (ID {}): {reason}", target.id),
        )
        .await;
        Ok(target)
    }

    /// Authorize and audit a broadcast. The engine fans out the NOTICE.
    pub async fn broadcast(&self, actor_id: i64, message: &str) -> Result<(), AdminError> {
        self.require_operator(actor_id).await?;
        self.audit(actor_id, "broadcast", None, &format!("Broadcast message: {message}"))
            .await;
        Ok(())
    }

    /// Stored totals; the engine appends its live counters.
    pub async fn server_stats(&self, actor_id: i64) -> Result<ServerStats, AdminError> {
        self.require_operator(actor_id).await?;

        let accounts = self.db.accounts().list(10_000, 0).await?;
        let bans = self.db.admin().list_active_bans().await?;

        Ok(ServerStats {
            total_users: accounts.len(),
            active_users: accounts.iter().filter(|a| a.is_active).count(),
            admin_users: accounts.iter().filter(|a| a.is_operator).count(),
            active_bans: bans.len(),
        })
    }

    /// Read the audit trail. Reading does not itself append.
    pub async fn list_audit(
        &self,
        actor_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AuditEntry>, AdminError> {
        self.require_operator(actor_id).await?;
        Ok(self.db.admin().read_audit(limit, offset).await?)
    }

    async fn audit(&self, actor_id: i64, action: &str, target: Option<i64>, detail: &str) {
        if let Err(e) = self
            .db
            .admin()
            .append_audit(actor_id, action, target, None, detail)
            .await
        {
            warn!(actor_id, action, error = %e, "Failed to append audit entry");
        }
    }
}

/// Parse a ban duration: an integer number of seconds, or a human form like
/// `90s`, `15m`, `2h`, `500ms`. Empty string and `0` mean permanent.
pub fn parse_duration(input: &str) -> Result<u64, AdminError> {
    let input = input.trim();
    if input.is_empty() || input == "0" {
        return Ok(0);
    }

    if let Ok(seconds) = input.parse::<u64>() {
        return Ok(seconds);
    }

    let split = input
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| AdminError::BadDuration(input.to_string()))?;
    let (number, unit) = input.split_at(split);
    let number: u64 = number
        .parse()
        .map_err(|_| AdminError::BadDuration(input.to_string()))?;

    let seconds = match unit {
        "ms" => number / 1000,
        "s" => number,
        "m" => number * 60,
        "h" => number * 3600,
        "d" => number * 86_400,
        _ => return Err(AdminError::BadDuration(input.to_string())),
    };
    Ok(seconds)
}
