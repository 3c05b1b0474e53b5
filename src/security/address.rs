//! Address-anomaly tracking.
//!
//! Compares a freshly authenticated account's source address to its
//! last-known one, raising a suspicion counter on change and locking the
//! account once the counter exceeds the configured threshold. The lock fires
//! on the first increment that *exceeds* the threshold: with the default of
//! 3, the fourth distinct address locks.

use crate::db::{Database, DbError};
use thiserror::Error;
use tracing::{info, warn};

/// Address-tracking errors.
#[derive(Debug, Error)]
pub enum TrackError {
    /// The account is (or has just become) locked; the reason is
    /// client-visible.
    #[error("account locked: {0}")]
    Locked(String),
    #[error(transparent)]
    Db(#[from] DbError),
}

/// Decides whether a successfully authenticated account may proceed.
pub struct AddressTracker {
    db: Database,
    threshold: i64,
    enabled: bool,
}

impl AddressTracker {
    pub fn new(db: Database, threshold: i64, enabled: bool) -> Self {
        Self {
            db,
            threshold,
            enabled,
        }
    }

    /// Run the address check for a successful authentication.
    ///
    /// The suspicion increment is a single atomic store operation; this code
    /// never read-modify-writes the counter.
    pub async fn check_and_track(&self, account_id: i64, address: &str) -> Result<(), TrackError> {
        if !self.enabled {
            return Ok(());
        }

        let record = self.db.security().address_record(account_id).await?;

        if record.is_locked {
            let reason = record
                .lock_reason
                .unwrap_or_else(|| "account locked".to_string());
            return Err(TrackError::Locked(reason));
        }

        let last_known = match record.last_known_address {
            // First successful login: remember the address and admit.
            None => {
                if let Err(e) = self
                    .db
                    .security()
                    .update_last_known_address(account_id, address)
                    .await
                {
                    warn!(account_id, error = %e, "Failed to record first-login address");
                }
                return Ok(());
            }
            Some(addr) => addr,
        };

        if last_known == address {
            return Ok(());
        }

        info!(account_id, from = %last_known, to = %address, "Address change detected");
        let new_count = self.db.security().increment_suspicion(account_id).await?;
        info!(account_id, count = new_count, threshold = self.threshold, "Suspicion raised");

        if new_count > self.threshold {
            let reason = format!("Too many address changes ({new_count})");
            self.db
                .security()
                .lock_account(account_id, &reason, None)
                .await?;
            warn!(account_id, count = new_count, "Account locked for address anomalies");
            return Err(TrackError::Locked(reason));
        }

        if let Err(e) = self
            .db
            .security()
            .update_last_known_address(account_id, address)
            .await
        {
            warn!(account_id, error = %e, "Failed to update last known address");
        }
        Ok(())
    }

    /// Admin-initiated lock, recording the operator who applied it.
    pub async fn lock_manual(
        &self,
        account_id: i64,
        reason: &str,
        locked_by: i64,
    ) -> Result<(), TrackError> {
        self.db
            .security()
            .lock_account(account_id, reason, Some(locked_by))
            .await?;
        info!(account_id, locked_by, "Account manually locked");
        Ok(())
    }

    /// Clear the lock and reset the suspicion counter.
    pub async fn unlock(&self, account_id: i64) -> Result<(), TrackError> {
        self.db.security().unlock_account(account_id).await?;
        info!(account_id, "Account unlocked");
        Ok(())
    }
}
