//! Keepalive and teardown handlers.

use super::{Context, Handler, Line};
use crate::error::HandlerResult;
use async_trait::async_trait;
use tracing::info;

/// `PING [:<token>]` — replies PONG with the token or the server name.
pub struct PingHandler;

#[async_trait]
impl Handler for PingHandler {
    async fn handle(&self, ctx: &mut Context<'_>, line: &Line) -> HandlerResult {
        let token = line.arg(0).unwrap_or(ctx.hub.server_name());
        ctx.send(format!("PONG :{token}")).await;
        Ok(())
    }
}

/// `PONG` — ignored.
pub struct PongHandler;

#[async_trait]
impl Handler for PongHandler {
    async fn handle(&self, _ctx: &mut Context<'_>, _line: &Line) -> HandlerResult {
        Ok(())
    }
}

/// `QUIT [:<message>]`
pub struct QuitHandler;

#[async_trait]
impl Handler for QuitHandler {
    async fn handle(&self, ctx: &mut Context<'_>, line: &Line) -> HandlerResult {
        let message = if line.args.is_empty() {
            "Client quit".to_string()
        } else {
            line.join_from(0)
        };

        ctx.send(format!("ERROR :Closing connection: {message}")).await;

        if let Some(account) = &ctx.client.account {
            info!(username = %account.username, %message, "User quit");
        }

        ctx.client.quitting = true;
        Ok(())
    }
}
