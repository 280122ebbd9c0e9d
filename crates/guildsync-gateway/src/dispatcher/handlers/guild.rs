use std::collections::HashSet;

use guildsync_core::{EmojiId, GuildId};
use serde_json::{Map, Value};
use tracing::debug;

use super::{known_guild, required};
use crate::cache::{Emoji, Patch, objects, patch};
use crate::dispatcher::{DispatchContext, HandlerResult};
use crate::notify::ClientEvent;

pub(super) fn guild_create(data: &Map<String, Value>, ctx: &DispatchContext<'_>) -> HandlerResult {
    let result = ctx.cache.load_guild(data, false)?;
    let guild = result.entry.read().snapshot();
    if !guild.available {
        debug!(guild_id = %guild.id, "guild announced unavailable");
        return Ok(());
    }
    ctx.emit(ClientEvent::GuildCreate { guild });
    Ok(())
}

pub(super) fn guild_update(data: &Map<String, Value>, ctx: &DispatchContext<'_>) -> HandlerResult {
    let id: GuildId = required(data, "id")?;
    let Some(guild) = known_guild(ctx, id) else {
        return Ok(());
    };
    let keep_old = ctx.keep_old("guildUpdate");

    let (guild, old) = {
        let mut guild = guild.write();
        let old = keep_old.then(|| guild.snapshot());
        let _ = guild.patch(data);
        (guild.snapshot(), old)
    };
    ctx.emit(ClientEvent::GuildUpdate { guild, old });
    Ok(())
}

/// `unavailable: true` marks an outage; otherwise the client left the guild.
pub(super) fn guild_delete(data: &Map<String, Value>, ctx: &DispatchContext<'_>) -> HandlerResult {
    let id: GuildId = required(data, "id")?;
    let outage = data.get("unavailable").and_then(Value::as_bool).unwrap_or(false);

    if outage {
        if let Some(guild) = known_guild(ctx, id) {
            guild.write().mark_unavailable();
        }
        ctx.emit(ClientEvent::GuildUnavailable { guild_id: id });
        return Ok(());
    }

    if let Some(guild) = ctx.cache.remove_guild(id) {
        let guild = guild.read().snapshot();
        ctx.emit(ClientEvent::GuildDelete { guild });
    }
    Ok(())
}

/// The payload carries the guild's complete emoji list: entries not in it
/// are deleted.
pub(super) fn emojis_update(data: &Map<String, Value>, ctx: &DispatchContext<'_>) -> HandlerResult {
    let guild_id: GuildId = required(data, "guild_id")?;
    let Some(guild) = known_guild(ctx, guild_id) else {
        return Ok(());
    };
    let keep_old = ctx.keep_old("emojiUpdate");

    let mut events = Vec::new();
    {
        let guild = guild.read();
        let mut seen = HashSet::new();
        for fields in objects(data, "emojis") {
            let Some(id) = patch::id::<EmojiId>(fields, "id") else {
                continue;
            };
            let _ = seen.insert(id);
            let result = guild.emojis.upsert(id, fields, keep_old, || Emoji::new(id));
            let emoji = result.entry.read().clone();
            if result.created {
                events.push(ClientEvent::EmojiCreate { guild_id, emoji });
            } else if !result.diff.is_empty() {
                events.push(ClientEvent::EmojiUpdate {
                    guild_id,
                    emoji,
                    old: result.old,
                });
            }
        }
        for id in guild.emojis.ids() {
            if seen.contains(&id) {
                continue;
            }
            if let Some(removed) = guild.emojis.delete(&id) {
                let emoji = removed.read().clone();
                events.push(ClientEvent::EmojiDelete { guild_id, emoji });
            }
        }
    }

    for event in events {
        ctx.emit(event);
    }
    Ok(())
}
