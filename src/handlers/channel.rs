//! Room membership and messaging handlers.

use super::{Context, Handler, Line};
use crate::db::{DbError, Role, Room};
use crate::error::{HandlerError, HandlerResult};
use async_trait::async_trait;
use tracing::{debug, info};

/// `JOIN <#room>`
///
/// Creates the room on first join (the creator becomes owner in the same
/// unit of work). A repeated JOIN of a room the connection is already in is
/// a no-op: members see exactly one JOIN broadcast.
pub struct JoinHandler;

#[async_trait]
impl Handler for JoinHandler {
    async fn handle(&self, ctx: &mut Context<'_>, line: &Line) -> HandlerResult {
        let account = ctx.require_auth()?.clone();
        let Some(room_name) = line.arg(0) else {
            return Err(HandlerError::BadRequest("usage: JOIN <room>".into()));
        };

        let room = match ctx.hub.db.rooms().get_by_name(room_name).await {
            Ok(room) => room,
            Err(DbError::RoomNotFound(_)) => {
                let room = ctx
                    .hub
                    .db
                    .rooms()
                    .create(room_name, account.id, false)
                    .await?;
                info!(room = %room_name, creator = %account.username, "Room created");
                room
            }
            Err(other) => return Err(other.into()),
        };

        let is_member = ctx.hub.db.rooms().is_member(room.id, account.id).await?;
        let handle = ctx
            .client
            .handle
            .as_ref()
            .ok_or(HandlerError::Unauthenticated)?;

        if is_member && handle.is_in_room(room.id) {
            debug!(room = %room_name, user = %account.username, "Repeated JOIN ignored");
            return Ok(());
        }

        if !is_member {
            ctx.hub
                .db
                .rooms()
                .add_member(room.id, account.id, Role::Member)
                .await?;
        }
        handle.join_room(room.id);

        let join_msg = format!("{} JOIN :{}", ctx.prefix()?, room_name);
        ctx.send(join_msg.clone()).await;

        if let Some(topic) = &room.topic {
            ctx.send(format!(
                ":{} 332 {} {} :{}",
                ctx.hub.server_name(),
                account.username,
                room_name,
                topic
            ))
            .await;
        }

        self.send_names(ctx, &room, room_name, &account.username).await?;

        let session_id = ctx.client.session_id.clone().unwrap_or_default();
        ctx.hub
            .connections
            .broadcast_to_room(room.id, &join_msg, &session_id)
            .await;

        info!(room = %room_name, user = %account.username, "User joined room");
        Ok(())
    }
}

impl JoinHandler {
    /// One 353 NAMES line (owners `@`, moderators `+`), then the 366 tail.
    async fn send_names(
        &self,
        ctx: &Context<'_>,
        room: &Room,
        room_name: &str,
        nick: &str,
    ) -> HandlerResult {
        let members = ctx.hub.db.rooms().members(room.id).await?;

        let mut names = Vec::with_capacity(members.len());
        for member in &members {
            match ctx.hub.db.accounts().get_by_id(member.account_id).await {
                Ok(account) => names.push(format!("{}{}", member.role.sigil(), account.username)),
                Err(e) => debug!(account_id = member.account_id, error = %e, "Skipping member in NAMES"),
            }
        }

        if !names.is_empty() {
            ctx.send(format!(
                ":{} 353 {} = {} :{}",
                ctx.hub.server_name(),
                nick,
                room_name,
                names.join(" ")
            ))
            .await;
        }
        ctx.send(format!(
            ":{} 366 {} {} :End of NAMES list",
            ctx.hub.server_name(),
            nick,
            room_name
        ))
        .await;
        Ok(())
    }
}

/// `PART <#room>`
pub struct PartHandler;

#[async_trait]
impl Handler for PartHandler {
    async fn handle(&self, ctx: &mut Context<'_>, line: &Line) -> HandlerResult {
        let account = ctx.require_auth()?.clone();
        let Some(room_name) = line.arg(0) else {
            return Err(HandlerError::BadRequest("usage: PART <room>".into()));
        };

        let room = ctx.hub.db.rooms().get_by_name(room_name).await?;

        if !ctx.hub.db.rooms().is_member(room.id, account.id).await? {
            return Err(HandlerError::BadRequest(format!(
                "you are not in room {room_name}"
            )));
        }

        let part_msg = format!("{} PART :{}", ctx.prefix()?, room_name);

        // Other members first, then the membership teardown, then the echo.
        let session_id = ctx.client.session_id.clone().unwrap_or_default();
        ctx.hub
            .connections
            .broadcast_to_room(room.id, &part_msg, &session_id)
            .await;

        ctx.hub.db.rooms().remove_member(room.id, account.id).await?;
        if let Some(handle) = ctx.client.handle.as_ref() {
            handle.leave_room(room.id);
        }

        ctx.send(part_msg).await;
        info!(room = %room_name, user = %account.username, "User left room");
        Ok(())
    }
}

/// `PRIVMSG <target> :<message>` — room fan-out or direct message.
pub struct PrivmsgHandler;

#[async_trait]
impl Handler for PrivmsgHandler {
    async fn handle(&self, ctx: &mut Context<'_>, line: &Line) -> HandlerResult {
        let account = ctx.require_auth()?.clone();
        let (Some(target), Some(_)) = (line.arg(0), line.arg(1)) else {
            return Err(HandlerError::BadRequest(
                "usage: PRIVMSG <target> :<message>".into(),
            ));
        };
        let target = target.to_string();
        let message = line.join_from(1);

        if target.starts_with('#') {
            self.send_to_room(ctx, &account.username, account.id, &target, &message)
                .await
        } else {
            self.send_direct(ctx, &account.username, &target, &message).await
        }
    }
}

impl PrivmsgHandler {
    async fn send_to_room(
        &self,
        ctx: &Context<'_>,
        username: &str,
        account_id: i64,
        room_name: &str,
        message: &str,
    ) -> HandlerResult {
        let room = ctx.hub.db.rooms().get_by_name(room_name).await?;

        if !ctx.hub.db.rooms().is_member(room.id, account_id).await? {
            return Err(HandlerError::NotRoomMember(room_name.to_string()));
        }

        let msg = format!("{} PRIVMSG {} :{}", ctx.prefix()?, room_name, message);

        let session_id = ctx.client.session_id.clone().unwrap_or_default();
        ctx.hub
            .connections
            .broadcast_to_room(room.id, &msg, &session_id)
            .await;
        ctx.send(msg).await;

        debug!(room = %room_name, user = %username, "Room message delivered");
        Ok(())
    }

    async fn send_direct(
        &self,
        ctx: &Context<'_>,
        username: &str,
        target: &str,
        message: &str,
    ) -> HandlerResult {
        if !ctx.hub.config.features.enable_direct_messages {
            return Err(HandlerError::BadRequest(
                "direct messages are disabled".into(),
            ));
        }

        let target_account = ctx.hub.auth.get_by_username(target).await?;

        let Some(conn) = ctx.hub.connections.find_by_account(target_account.id) else {
            return Err(HandlerError::UserOffline(target.to_string()));
        };

        conn.send(format!("{} PRIVMSG {} :{}", ctx.prefix()?, target, message))
            .await;
        debug!(from = %username, to = %target, "Direct message delivered");
        Ok(())
    }
}
