//! Unified error handling for emberd.
//!
//! Every protocol command resolves to `Result<(), HandlerError>`; the
//! connection loop serializes failures back to the client as `ERROR :<text>`
//! lines. `should_disconnect` is the typed replacement for the original
//! protocol's substring match on "account locked" — the client-visible text
//! still carries that phrase, but the engine keys the close on the variant.

use crate::crypto::CryptoError;
use crate::db::DbError;
use crate::security::address::TrackError;
use crate::security::session::SessionError;
use crate::services::admin::AdminError;
use crate::services::auth::AuthError;
use thiserror::Error;

/// Errors that can occur while handling a protocol command.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("{0}")]
    BadRequest(String),

    #[error("not authenticated")]
    Unauthenticated,

    #[error("already logged in")]
    AlreadyAuthenticated,

    #[error("invalid username or password")]
    InvalidCredentials,

    #[error("account is inactive")]
    AccountInactive,

    #[error("username already exists")]
    UsernameTaken,

    #[error("invalid username: {0}")]
    BadUsername(String),

    #[error("weak password: {0}")]
    WeakPassword(String),

    /// Fatal for the connection: the engine closes after surfacing it.
    #[error("account locked: {0}")]
    AccountLocked(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("user {0} is offline (message not delivered)")]
    UserOffline(String),

    #[error("cannot send to {0}: not a member")]
    NotRoomMember(String),

    #[error("internal storage error")]
    Persistence(#[source] DbError),

    #[error("{0}")]
    Crypto(#[from] CryptoError),

    #[error("server busy, try again")]
    QueueFull,

    #[error("Server shutting down")]
    ShuttingDown,
}

impl HandlerError {
    /// Static error code for log labeling.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::Unauthenticated => "unauthenticated",
            Self::AlreadyAuthenticated => "already_authenticated",
            Self::InvalidCredentials => "invalid_credentials",
            Self::AccountInactive => "account_inactive",
            Self::UsernameTaken => "username_taken",
            Self::BadUsername(_) => "bad_username",
            Self::WeakPassword(_) => "weak_password",
            Self::AccountLocked(_) => "account_locked",
            Self::PermissionDenied(_) => "permission_denied",
            Self::NotFound(_) => "not_found",
            Self::UserOffline(_) => "user_offline",
            Self::NotRoomMember(_) => "not_room_member",
            Self::Persistence(_) => "persistence",
            Self::Crypto(_) => "crypto",
            Self::QueueFull => "queue_full",
            Self::ShuttingDown => "shutting_down",
        }
    }

    /// Whether the engine must close the connection after sending the error.
    pub fn should_disconnect(&self) -> bool {
        matches!(self, Self::AccountLocked(_) | Self::ShuttingDown)
    }
}

impl From<DbError> for HandlerError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::AccountNotFound(name) => Self::NotFound(format!("user {name}")),
            DbError::RoomNotFound(name) => Self::NotFound(format!("room {name}")),
            DbError::ConfigKeyNotFound(key) => Self::NotFound(format!("config key {key}")),
            other => Self::Persistence(other),
        }
    }
}

impl From<AuthError> for HandlerError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::BadUsername(detail) => Self::BadUsername(detail),
            AuthError::UsernameTaken => Self::UsernameTaken,
            AuthError::WeakPassword(detail) => Self::WeakPassword(detail),
            AuthError::InvalidCredentials => Self::InvalidCredentials,
            AuthError::AccountInactive => Self::AccountInactive,
            AuthError::Db(db) => db.into(),
        }
    }
}

impl From<AdminError> for HandlerError {
    fn from(err: AdminError) -> Self {
        match err {
            AdminError::PermissionDenied => {
                Self::PermissionDenied("admin privileges required".into())
            }
            AdminError::CannotTargetOperator(action) => {
                Self::PermissionDenied(format!("cannot {action} admin users"))
            }
            AdminError::SelfDemotion => {
                Self::BadRequest("cannot remove your own admin privileges".into())
            }
            AdminError::BadDuration(detail) => {
                Self::BadRequest(format!("invalid duration format: {detail}"))
            }
            AdminError::Db(db) => db.into(),
        }
    }
}

impl From<TrackError> for HandlerError {
    fn from(err: TrackError) -> Self {
        match err {
            TrackError::Locked(reason) => Self::AccountLocked(reason),
            TrackError::Db(db) => db.into(),
        }
    }
}

impl From<SessionError> for HandlerError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::NotFound => Self::NotFound("session".into()),
            SessionError::Expired => Self::Unauthenticated,
        }
    }
}

/// Result type for command handlers.
pub type HandlerResult = Result<(), HandlerError>;
