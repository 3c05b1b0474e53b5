//! Authentication service: registration, credential verification, and
//! password changes.
//!
//! Failed-attempt bookkeeping is fire-and-forget: a logging write that fails
//! never aborts the authentication flow itself.

use crate::crypto::{hashing, CryptoError};
use crate::db::{Account, Database, DbError};
use thiserror::Error;
use tracing::{info, warn};

/// Authentication failures.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid username: {0}")]
    BadUsername(String),
    #[error("username already exists")]
    UsernameTaken,
    #[error("weak password: {0}")]
    WeakPassword(String),
    #[error("invalid username or password")]
    InvalidCredentials,
    #[error("account is inactive")]
    AccountInactive,
    #[error(transparent)]
    Db(#[from] DbError),
}

/// Registration and login against the account store.
pub struct AuthService {
    db: Database,
    min_password_length: usize,
    require_special: bool,
}

impl AuthService {
    pub fn new(db: Database, min_password_length: usize, require_special: bool) -> Self {
        Self {
            db,
            min_password_length,
            require_special,
        }
    }

    /// Register a new account. The wire-level "password" is the client-side
    /// SHA-256 hex digest; it is re-salted and re-hashed here like any other
    /// password material.
    pub async fn register(&self, username: &str, password: &str) -> Result<Account, AuthError> {
        validate_username(username)?;

        if self.db.accounts().username_exists(username).await? {
            return Err(AuthError::UsernameTaken);
        }

        hashing::validate_password_strength(password, self.min_password_length, self.require_special)
            .map_err(|e| match e {
                CryptoError::WeakPassword(detail) => AuthError::WeakPassword(detail),
                other => AuthError::WeakPassword(other.to_string()),
            })?;

        let salt = hashing::generate_salt();
        let digest = hashing::digest_password(password, &salt);

        let account = self
            .db
            .accounts()
            .create(username, &digest, &salt)
            .await
            .map_err(|e| match e {
                DbError::UsernameExists(_) => AuthError::UsernameTaken,
                other => AuthError::Db(other),
            })?;

        info!(username = %account.username, account_id = account.id, "Account registered");
        Ok(account)
    }

    /// Verify credentials and return the account. The caller is responsible
    /// for running the address-anomaly check afterwards.
    pub async fn login(
        &self,
        username: &str,
        password: &str,
        address: &str,
    ) -> Result<Account, AuthError> {
        let account = match self.db.accounts().get_by_username(username).await {
            Ok(account) => account,
            Err(DbError::AccountNotFound(_)) => {
                // Unknown username: log against account id 0, reveal nothing.
                self.record_attempt(0, address, false).await;
                return Err(AuthError::InvalidCredentials);
            }
            Err(other) => return Err(other.into()),
        };

        if !account.is_active || self.db.admin().is_currently_banned(account.id).await? {
            self.record_attempt(account.id, address, false).await;
            return Err(AuthError::AccountInactive);
        }

        if !hashing::verify_password(password, &account.password_salt, &account.password_hash) {
            self.record_attempt(account.id, address, false).await;
            return Err(AuthError::InvalidCredentials);
        }

        self.record_attempt(account.id, address, true).await;
        if let Err(e) = self.db.accounts().update_last_login(account.id).await {
            warn!(account_id = account.id, error = %e, "Failed to update last login time");
        }

        info!(username = %account.username, account_id = account.id, %address, "Login verified");
        Ok(account)
    }

    /// Change an account's password, verifying the old one first.
    pub async fn change_password(
        &self,
        account_id: i64,
        old_password: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        let account = self.db.accounts().get_by_id(account_id).await?;

        if !hashing::verify_password(old_password, &account.password_salt, &account.password_hash) {
            return Err(AuthError::InvalidCredentials);
        }

        hashing::validate_password_strength(
            new_password,
            self.min_password_length,
            self.require_special,
        )
        .map_err(|e| match e {
            CryptoError::WeakPassword(detail) => AuthError::WeakPassword(detail),
            other => AuthError::WeakPassword(other.to_string()),
        })?;

        let salt = hashing::generate_salt();
        let digest = hashing::digest_password(new_password, &salt);
        self.db
            .accounts()
            .update_credentials(account_id, &digest, &salt)
            .await?;

        info!(account_id, "Password changed");
        Ok(())
    }

    pub async fn get_by_username(&self, username: &str) -> Result<Account, AuthError> {
        Ok(self.db.accounts().get_by_username(username).await?)
    }

    async fn record_attempt(&self, account_id: i64, address: &str, succeeded: bool) {
        if let Err(e) = self
            .db
            .security()
            .record_login_attempt(account_id, address, succeeded, None)
            .await
        {
            warn!(account_id, error = %e, "Failed to record login attempt");
        }
    }
}

/// Usernames: 3 to 50 characters from `[A-Za-z0-9_-]`.
fn validate_username(username: &str) -> Result<(), AuthError> {
    if username.len() < 3 {
        return Err(AuthError::BadUsername(
            "username must be at least 3 characters long".into(),
        ));
    }
    if username.len() > 50 {
        return Err(AuthError::BadUsername(
            "username must be at most 50 characters long".into(),
        ));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(AuthError::BadUsername(
            "username can only contain letters, numbers, underscores, and hyphens".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_db;

    async fn service() -> AuthService {
        AuthService::new(test_db().await, 8, false)
    }

    #[tokio::test]
    async fn register_then_login() {
        let auth = service().await;
        let account = auth.register("alice", "clienthash0123").await.unwrap();
        assert!(account.is_active);

        let logged_in = auth
            .login("alice", "clienthash0123", "10.0.0.1")
            .await
            .unwrap();
        assert_eq!(logged_in.id, account.id);

        let history = auth.db.security().login_history(account.id, 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert!(history[0].succeeded);

        let reloaded = auth.db.accounts().get_by_id(account.id).await.unwrap();
        assert!(reloaded.last_login_at.is_some());
    }

    #[tokio::test]
    async fn username_validation() {
        let auth = service().await;
        assert!(matches!(
            auth.register("ab", "longenough").await,
            Err(AuthError::BadUsername(_))
        ));
        assert!(matches!(
            auth.register(&"x".repeat(51), "longenough").await,
            Err(AuthError::BadUsername(_))
        ));
        assert!(matches!(
            auth.register("bad name!", "longenough").await,
            Err(AuthError::BadUsername(_))
        ));
        assert!(auth.register("good_name-1", "longenough").await.is_ok());
    }

    #[tokio::test]
    async fn duplicate_registration_rejected() {
        let auth = service().await;
        auth.register("alice", "clienthash0123").await.unwrap();
        assert!(matches!(
            auth.register("alice", "clienthash0123").await,
            Err(AuthError::UsernameTaken)
        ));
    }

    #[tokio::test]
    async fn weak_password_rejected() {
        let auth = service().await;
        assert!(matches!(
            auth.register("alice", "short").await,
            Err(AuthError::WeakPassword(_))
        ));
    }

    #[tokio::test]
    async fn wrong_password_and_unknown_user_are_indistinguishable() {
        let auth = service().await;
        auth.register("alice", "clienthash0123").await.unwrap();

        let wrong = auth
            .login("alice", "wronghash", "10.0.0.1")
            .await
            .unwrap_err();
        let unknown = auth
            .login("nobody", "whatever0", "10.0.0.1")
            .await
            .unwrap_err();
        assert_eq!(wrong.to_string(), unknown.to_string());

        // Unknown-user attempts land on account id 0.
        let history = auth.db.security().login_history(0, 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert!(!history[0].succeeded);
    }

    #[tokio::test]
    async fn inactive_account_rejected() {
        let auth = service().await;
        let account = auth.register("alice", "clienthash0123").await.unwrap();
        auth.db.accounts().set_active(account.id, false).await.unwrap();

        assert!(matches!(
            auth.login("alice", "clienthash0123", "10.0.0.1").await,
            Err(AuthError::AccountInactive)
        ));
    }

    #[tokio::test]
    async fn banned_account_rejected() {
        let auth = service().await;
        let account = auth.register("alice", "clienthash0123").await.unwrap();
        auth.db
            .admin()
            .create_ban(account.id, 1, "spam", None)
            .await
            .unwrap();

        assert!(matches!(
            auth.login("alice", "clienthash0123", "10.0.0.1").await,
            Err(AuthError::AccountInactive)
        ));
    }

    #[tokio::test]
    async fn change_password_roundtrip() {
        let auth = service().await;
        let account = auth.register("alice", "originalpw").await.unwrap();

        assert!(matches!(
            auth.change_password(account.id, "wrongpw00", "newpassword").await,
            Err(AuthError::InvalidCredentials)
        ));

        auth.change_password(account.id, "originalpw", "newpassword")
            .await
            .unwrap();

        assert!(auth.login("alice", "originalpw", "10.0.0.1").await.is_err());
        assert!(auth.login("alice", "newpassword", "10.0.0.1").await.is_ok());
    }
}
