//! Registration, login, and key-exchange handlers.

use super::{Context, Handler, Line};
use crate::crypto::rsa as rsa_keys;
use crate::error::{HandlerError, HandlerResult};
use crate::state::ConnectionHandle;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use std::sync::Arc;
use tracing::info;

/// `REGISTER <username> <password_hash>`
///
/// The wire "password" is the client-side SHA-256 hex digest of the user's
/// cleartext password; the server never sees the cleartext.
pub struct RegisterHandler;

#[async_trait]
impl Handler for RegisterHandler {
    async fn handle(&self, ctx: &mut Context<'_>, line: &Line) -> HandlerResult {
        let (Some(username), Some(password)) = (line.arg(0), line.arg(1)) else {
            return Err(HandlerError::BadRequest(
                "usage: REGISTER <username> <password_hash>".into(),
            ));
        };

        let account = ctx.hub.auth.register(username, password).await?;
        ctx.notice("*", "Registration successful. Please login.").await;
        info!(username = %account.username, account_id = account.id, "User registered");
        Ok(())
    }
}

/// `LOGIN <username> <password_hash>`
///
/// Credential check, then the address-anomaly gate, then session issuance
/// and admission to the connection index.
pub struct LoginHandler;

#[async_trait]
impl Handler for LoginHandler {
    async fn handle(&self, ctx: &mut Context<'_>, line: &Line) -> HandlerResult {
        if ctx.client.is_authenticated() {
            return Err(HandlerError::AlreadyAuthenticated);
        }

        let (Some(username), Some(password)) = (line.arg(0), line.arg(1)) else {
            return Err(HandlerError::BadRequest(
                "usage: LOGIN <username> <password_hash>".into(),
            ));
        };

        let account = ctx.hub.auth.login(username, password, ctx.addr).await?;
        ctx.hub.tracker.check_and_track(account.id, ctx.addr).await?;

        let session_key = ctx
            .hub
            .crypto
            .generate_session_key(ctx.hub.config.security.aes_key_size)?;

        let session = ctx
            .hub
            .sessions
            .create_session(account.clone(), ctx.addr.to_string(), session_key.clone())
            .await;

        let handle = Arc::new(ConnectionHandle::new(
            session.id.clone(),
            account.id,
            account.username.clone(),
            ctx.sender.clone(),
        ));
        ctx.hub.connections.insert(Arc::clone(&handle));

        ctx.client.account = Some(account.clone());
        ctx.client.session_id = Some(session.id.clone());
        ctx.client.session_key = Some(session_key);
        ctx.client.handle = Some(handle);

        ctx.notice(
            username,
            format!("Login successful. Session ID: {}", session.id),
        )
        .await;
        ctx.notice(username, "Please exchange encryption keys using KEYEXCHANGE")
            .await;

        info!(
            username = %account.username,
            account_id = account.id,
            address = %ctx.addr,
            "User logged in"
        );
        Ok(())
    }
}

/// `KEYEXCHANGE <payload>`
///
/// Delivers the AES session key. The client payload is tolerated but not
/// interpreted, except when `features.encrypt_session_key` is on: then it is
/// read as the client's base64-encoded PKIX public key and the session key
/// is RSA-wrapped to it.
pub struct KeyExchangeHandler;

#[async_trait]
impl Handler for KeyExchangeHandler {
    async fn handle(&self, ctx: &mut Context<'_>, line: &Line) -> HandlerResult {
        let account = ctx.require_auth()?.clone();

        if line.arg(0).is_none() {
            return Err(HandlerError::BadRequest(
                "usage: KEYEXCHANGE <encrypted_session_key>".into(),
            ));
        }

        let session_key = ctx
            .client
            .session_key
            .as_ref()
            .ok_or(HandlerError::Unauthenticated)?;

        let payload = if ctx.hub.config.features.encrypt_session_key {
            let der = BASE64
                .decode(line.arg(0).unwrap_or_default())
                .map_err(|e| crate::crypto::CryptoError::BadEncoding(e.to_string()))?;
            let client_key = rsa_keys::public_key_from_der(&der)?;
            ctx.hub.crypto.wrap_session_key(&client_key, session_key)?
        } else {
            BASE64.encode(session_key.as_slice())
        };

        ctx.send(format!("SESSIONKEY :{payload}")).await;
        ctx.notice(
            &account.username,
            "Key exchange complete. All messages will be encrypted.",
        )
        .await;
        Ok(())
    }
}
