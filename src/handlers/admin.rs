//! `ADMIN <subcommand>` routing.
//!
//! The operator service authorizes and audits; side effects it cannot apply
//! (disconnects, fan-out, live counters) happen here against the engine's
//! connection index.

use super::{Context, Handler, Line};
use crate::error::{HandlerError, HandlerResult};
use crate::services::admin::parse_duration;
use async_trait::async_trait;
use tracing::info;

pub struct AdminHandler;

#[async_trait]
impl Handler for AdminHandler {
    async fn handle(&self, ctx: &mut Context<'_>, line: &Line) -> HandlerResult {
        let account = ctx.require_auth()?.clone();
        let Some(sub) = line.arg(0) else {
            return Err(HandlerError::BadRequest(
                "usage: ADMIN <subcommand> [args...]".into(),
            ));
        };

        let actor_id = account.id;
        let actor = account.username.as_str();
        match sub.to_ascii_lowercase().as_str() {
            "kick" => self.kick(ctx, actor_id, actor, line).await,
            "ban" => self.ban(ctx, actor_id, actor, line).await,
            "unban" => self.unban(ctx, actor_id, actor, line).await,
            "unlock" => self.unlock(ctx, actor_id, actor, line).await,
            "makeadmin" => self.make_admin(ctx, actor_id, actor, line).await,
            "removeadmin" => self.remove_admin(ctx, actor_id, actor, line).await,
            "broadcast" => self.broadcast(ctx, actor_id, actor, line).await,
            "stats" => self.stats(ctx, actor_id, actor).await,
            "log" => self.audit_log(ctx, actor_id, actor, line).await,
            other => Err(HandlerError::BadRequest(format!(
                "unknown admin command: {other}"
            ))),
        }
    }
}

impl AdminHandler {
    async fn kick(
        &self,
        ctx: &Context<'_>,
        actor_id: i64,
        actor: &str,
        line: &Line,
    ) -> HandlerResult {
        let (Some(username), Some(_)) = (line.arg(1), line.arg(2)) else {
            return Err(HandlerError::BadRequest(
                "usage: ADMIN kick <username> <reason>".into(),
            ));
        };
        let reason = line.join_from(2);

        let target = ctx.hub.admin.kick(actor_id, username, &reason).await?;

        if let Some(conn) = ctx.hub.connections.find_by_account(target.id) {
            conn.send(format!("ERROR :Kicked by admin: {reason}")).await;
            conn.disconnect.cancel();
        }

        ctx.notice(actor, format!("User {username} has been kicked")).await;
        info!(actor = %actor, target = %username, %reason, "Admin kick");
        Ok(())
    }

    async fn ban(
        &self,
        ctx: &Context<'_>,
        actor_id: i64,
        actor: &str,
        line: &Line,
    ) -> HandlerResult {
        let (Some(username), Some(duration), Some(_)) = (line.arg(1), line.arg(2), line.arg(3))
        else {
            return Err(HandlerError::BadRequest(
                "usage: ADMIN ban <username> <duration_seconds> <reason>".into(),
            ));
        };
        let reason = line.join_from(3);
        let duration_seconds = parse_duration(duration)?;

        let target = ctx
            .hub
            .admin
            .ban(actor_id, username, &reason, duration_seconds)
            .await?;

        if let Some(conn) = ctx.hub.connections.find_by_account(target.id) {
            conn.send(format!("ERROR :Banned by admin: {reason}")).await;
            conn.disconnect.cancel();
        }

        let span = if duration_seconds > 0 {
            format!("for {duration_seconds} seconds")
        } else {
            "permanently".to_string()
        };
        ctx.notice(actor, format!("User {username} has been banned {span}"))
            .await;
        info!(actor = %actor, target = %username, %span, %reason, "Admin ban");
        Ok(())
    }

    async fn unban(
        &self,
        ctx: &Context<'_>,
        actor_id: i64,
        actor: &str,
        line: &Line,
    ) -> HandlerResult {
        let Some(username) = line.arg(1) else {
            return Err(HandlerError::BadRequest("usage: ADMIN unban <username>".into()));
        };

        ctx.hub.admin.unban(actor_id, username).await?;
        ctx.notice(actor, format!("User {username} has been unbanned")).await;
        Ok(())
    }

    async fn unlock(
        &self,
        ctx: &Context<'_>,
        actor_id: i64,
        actor: &str,
        line: &Line,
    ) -> HandlerResult {
        let Some(username) = line.arg(1) else {
            return Err(HandlerError::BadRequest("usage: ADMIN unlock <username>".into()));
        };

        ctx.hub.admin.unlock(actor_id, username).await?;
        ctx.notice(actor, format!("Account unlocked for user {username}")).await;
        Ok(())
    }

    async fn make_admin(
        &self,
        ctx: &Context<'_>,
        actor_id: i64,
        actor: &str,
        line: &Line,
    ) -> HandlerResult {
        let Some(username) = line.arg(1) else {
            return Err(HandlerError::BadRequest(
                "usage: ADMIN makeadmin <username>".into(),
            ));
        };

        ctx.hub.admin.make_operator(actor_id, username).await?;
        ctx.notice(actor, format!("Admin privileges granted to {username}")).await;
        Ok(())
    }

    async fn remove_admin(
        &self,
        ctx: &Context<'_>,
        actor_id: i64,
        actor: &str,
        line: &Line,
    ) -> HandlerResult {
        let Some(username) = line.arg(1) else {
            return Err(HandlerError::BadRequest(
                "usage: ADMIN removeadmin <username>".into(),
            ));
        };

        ctx.hub.admin.remove_operator(actor_id, username).await?;
        ctx.notice(actor, format!("Admin privileges revoked from {username}")).await;
        Ok(())
    }

    async fn broadcast(
        &self,
        ctx: &Context<'_>,
        actor_id: i64,
        actor: &str,
        line: &Line,
    ) -> HandlerResult {
        if line.arg(1).is_none() {
            return Err(HandlerError::BadRequest(
                "usage: ADMIN broadcast <message>".into(),
            ));
        }
        let message = line.join_from(1);

        // Audit first; the fan-out only happens for an authorized actor.
        ctx.hub.admin.broadcast(actor_id, &message).await?;

        ctx.hub
            .connections
            .broadcast_all(&format!(
                ":{} NOTICE * :[BROADCAST] {message}",
                ctx.hub.server_name()
            ))
            .await;
        info!(actor = %actor, %message, "Admin broadcast");
        Ok(())
    }

    async fn stats(&self, ctx: &Context<'_>, actor_id: i64, actor: &str) -> HandlerResult {
        let stats = ctx.hub.admin.server_stats(actor_id).await?;
        let pool = ctx.hub.pool.stats();

        ctx.notice(actor, "=== Server Statistics ===").await;
        ctx.notice(actor, format!("total_users: {}", stats.total_users)).await;
        ctx.notice(actor, format!("active_users: {}", stats.active_users)).await;
        ctx.notice(actor, format!("admin_users: {}", stats.admin_users)).await;
        ctx.notice(actor, format!("active_bans: {}", stats.active_bans)).await;
        ctx.notice(
            actor,
            format!("active_connections: {}", ctx.hub.connections.len()),
        )
        .await;
        ctx.notice(
            actor,
            format!("active_sessions: {}", ctx.hub.sessions.active_count().await),
        )
        .await;
        ctx.notice(
            actor,
            format!(
                "pool_workers: {}/{}",
                pool.active_workers, pool.max_workers
            ),
        )
        .await;
        ctx.notice(
            actor,
            format!("pool_queue: {}/{}", pool.queue_length, pool.queue_capacity),
        )
        .await;
        Ok(())
    }

    async fn audit_log(
        &self,
        ctx: &Context<'_>,
        actor_id: i64,
        actor: &str,
        line: &Line,
    ) -> HandlerResult {
        let limit = line
            .arg(1)
            .and_then(|s| s.parse::<i64>().ok())
            .unwrap_or(10)
            .clamp(1, 100);

        let entries = ctx.hub.admin.list_audit(actor_id, limit, 0).await?;

        ctx.notice(actor, format!("=== Admin Action Log (last {limit}) ==="))
            .await;
        for entry in entries {
            let when = chrono::DateTime::from_timestamp(entry.performed_at, 0)
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| entry.performed_at.to_string());
            ctx.notice(
                actor,
                format!(
                    "[{when}] Admin ID {}: {} - {}",
                    entry.operator_id, entry.action, entry.detail
                ),
            )
            .await;
        }
        Ok(())
    }
}
