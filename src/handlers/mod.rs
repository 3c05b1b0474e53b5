//! Protocol command handlers.
//!
//! Incoming lines are parsed into a [`Line`] (whitespace-split tokens with
//! the IRC-style `:`-trailing convention), then dispatched through the
//! [`Registry`] to the matching [`Handler`].

mod admin;
mod auth;
mod channel;
mod connection;

pub use admin::AdminHandler;
pub use auth::{KeyExchangeHandler, LoginHandler, RegisterHandler};
pub use channel::{JoinHandler, PartHandler, PrivmsgHandler};
pub use connection::{PingHandler, PongHandler, QuitHandler};

use crate::db::Account;
use crate::error::{HandlerError, HandlerResult};
use crate::state::{ConnectionHandle, Hub};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use zeroize::Zeroizing;

/// A parsed wire line: uppercased command plus positional arguments. An
/// argument introduced by `:` extends through the end of the line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    pub command: String,
    pub args: Vec<String>,
}

impl Line {
    /// Parse a raw line. Returns `None` for empty/whitespace-only input.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut rest = raw.trim();
        if rest.is_empty() {
            return None;
        }

        let mut command = None;
        let mut args = Vec::new();
        loop {
            rest = rest.trim_start();
            if rest.is_empty() {
                break;
            }
            if command.is_some() && rest.starts_with(':') {
                args.push(rest[1..].to_string());
                break;
            }
            let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
            let token = &rest[..end];
            if command.is_none() {
                command = Some(token.to_ascii_uppercase());
            } else {
                args.push(token.to_string());
            }
            rest = &rest[end..];
        }

        Some(Self {
            command: command?,
            args,
        })
    }

    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(String::as_str)
    }

    /// Join arguments from `index` onward with single spaces (for free-text
    /// tails that were not sent with the `:` convention).
    pub fn join_from(&self, index: usize) -> String {
        self.args[index.min(self.args.len())..].join(" ")
    }
}

/// Mutable per-connection protocol state.
#[derive(Default)]
pub struct ClientState {
    pub account: Option<Account>,
    pub session_id: Option<String>,
    pub session_key: Option<Zeroizing<Vec<u8>>>,
    pub handle: Option<Arc<ConnectionHandle>>,
    /// Set by QUIT; the read loop exits after the current command.
    pub quitting: bool,
}

impl ClientState {
    pub fn is_authenticated(&self) -> bool {
        self.account.is_some()
    }
}

/// Handler context for one command invocation.
pub struct Context<'a> {
    pub hub: &'a Arc<Hub>,
    pub sender: &'a mpsc::Sender<String>,
    /// Client source address without the port.
    pub addr: &'a str,
    pub client: &'a mut ClientState,
}

impl Context<'_> {
    /// Queue a line for this connection.
    pub async fn send(&self, line: impl Into<String>) {
        let _ = self.sender.send(line.into()).await;
    }

    /// Queue a server NOTICE addressed to `target` (`*` pre-auth).
    pub async fn notice(&self, target: &str, text: impl AsRef<str>) {
        self.send(format!(
            ":{} NOTICE {} :{}",
            self.hub.server_name(),
            target,
            text.as_ref()
        ))
        .await;
    }

    /// The authenticated account, or `Unauthenticated`.
    pub fn require_auth(&self) -> Result<&Account, HandlerError> {
        self.client.account.as_ref().ok_or(HandlerError::Unauthenticated)
    }

    /// IRC-style source prefix for the authenticated user.
    pub fn prefix(&self) -> Result<String, HandlerError> {
        let account = self.require_auth()?;
        Ok(format!(
            ":{}!{}@{}",
            account.username, account.username, self.addr
        ))
    }
}

/// Trait implemented by all command handlers.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, ctx: &mut Context<'_>, line: &Line) -> HandlerResult;
}

/// Registry of command handlers.
pub struct Registry {
    handlers: HashMap<&'static str, Box<dyn Handler>>,
}

impl Registry {
    /// Create a registry with every protocol command registered.
    pub fn new() -> Self {
        let mut handlers: HashMap<&'static str, Box<dyn Handler>> = HashMap::new();

        handlers.insert("REGISTER", Box::new(RegisterHandler));
        handlers.insert("LOGIN", Box::new(LoginHandler));
        handlers.insert("KEYEXCHANGE", Box::new(KeyExchangeHandler));

        handlers.insert("JOIN", Box::new(JoinHandler));
        handlers.insert("PART", Box::new(PartHandler));
        handlers.insert("PRIVMSG", Box::new(PrivmsgHandler));

        handlers.insert("PING", Box::new(PingHandler));
        handlers.insert("PONG", Box::new(PongHandler));
        handlers.insert("QUIT", Box::new(QuitHandler));

        handlers.insert("ADMIN", Box::new(AdminHandler));

        Self { handlers }
    }

    /// Dispatch a parsed line to its handler.
    pub async fn dispatch(&self, ctx: &mut Context<'_>, line: &Line) -> HandlerResult {
        match self.handlers.get(line.command.as_str()) {
            Some(handler) => handler.handle(ctx, line).await,
            None => Err(HandlerError::BadRequest(format!(
                "unknown command: {}",
                line.command
            ))),
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
