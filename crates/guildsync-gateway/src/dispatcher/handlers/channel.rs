use guildsync_core::{ChannelId, GuildId};
use serde_json::{Map, Value};
use tracing::trace;

use super::{known_guild, required};
use crate::cache::{Channel, patch};
use crate::dispatcher::{DispatchContext, HandlerResult};
use crate::notify::ClientEvent;

/// Direct-message channels carry no `guild_id` and are not cached.
fn guild_of(data: &Map<String, Value>) -> Option<GuildId> {
    let guild_id = patch::id(data, "guild_id");
    if guild_id.is_none() {
        trace!("ignoring channel event without guild");
    }
    guild_id
}

pub(super) fn channel_create(data: &Map<String, Value>, ctx: &DispatchContext<'_>) -> HandlerResult {
    let id: ChannelId = required(data, "id")?;
    let Some(guild) = guild_of(data).and_then(|g| known_guild(ctx, g)) else {
        return Ok(());
    };
    let guild = guild.read();
    let result = guild.channels.upsert(id, data, false, || Channel::new(id, guild.id));
    let channel = result.entry.read().clone();
    drop(guild);
    ctx.emit(ClientEvent::ChannelCreate { channel });
    Ok(())
}

pub(super) fn channel_update(data: &Map<String, Value>, ctx: &DispatchContext<'_>) -> HandlerResult {
    let id: ChannelId = required(data, "id")?;
    let Some(guild) = guild_of(data).and_then(|g| known_guild(ctx, g)) else {
        return Ok(());
    };
    let keep_old = ctx.keep_old("channelUpdate");
    let guild = guild.read();
    let result = guild.channels.upsert(id, data, keep_old, || Channel::new(id, guild.id));
    let channel = result.entry.read().clone();
    drop(guild);
    ctx.emit(ClientEvent::ChannelUpdate {
        channel,
        old: result.old,
    });
    Ok(())
}

pub(super) fn channel_delete(data: &Map<String, Value>, ctx: &DispatchContext<'_>) -> HandlerResult {
    let id: ChannelId = required(data, "id")?;
    let Some(guild) = guild_of(data).and_then(|g| known_guild(ctx, g)) else {
        return Ok(());
    };
    let removed = guild.read().channels.delete(&id);
    if let Some(channel) = removed {
        let channel = channel.read().clone();
        ctx.emit(ClientEvent::ChannelDelete { channel });
    }
    Ok(())
}
