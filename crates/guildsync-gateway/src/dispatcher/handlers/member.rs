use guildsync_core::{GuildId, UserId};
use serde_json::{Map, Value};
use tracing::{debug, trace};

use super::{known_guild, object, required};
use crate::cache::objects;
use crate::correlation::{Chunk, Progress};
use crate::dispatcher::{DispatchContext, HandlerResult};
use crate::notify::ClientEvent;

pub(super) fn member_add(data: &Map<String, Value>, ctx: &DispatchContext<'_>) -> HandlerResult {
    let guild_id: GuildId = required(data, "guild_id")?;
    let Some(guild) = known_guild(ctx, guild_id) else {
        return Ok(());
    };
    let member = ctx.cache.ingest_member(&mut guild.write(), data, false, false)?;
    let member = member.entry.read().clone();
    ctx.emit(ClientEvent::MemberAdd { member });
    Ok(())
}

pub(super) fn member_update(data: &Map<String, Value>, ctx: &DispatchContext<'_>) -> HandlerResult {
    let guild_id: GuildId = required(data, "guild_id")?;
    let Some(guild) = known_guild(ctx, guild_id) else {
        return Ok(());
    };
    let keep_old = ctx.keep_old("guildMemberUpdate");
    let result = ctx.cache.ingest_member(&mut guild.write(), data, true, keep_old)?;
    let member = result.entry.read().clone();
    ctx.emit(ClientEvent::MemberUpdate {
        member,
        old: result.old,
    });
    Ok(())
}

pub(super) fn member_remove(data: &Map<String, Value>, ctx: &DispatchContext<'_>) -> HandlerResult {
    let guild_id: GuildId = required(data, "guild_id")?;
    let user_id: UserId = required(object(data, "user")?, "id")?;
    let Some(guild) = known_guild(ctx, guild_id) else {
        return Ok(());
    };
    let removed = guild.write().remove_member(user_id);
    if let Some(member) = removed {
        let member = member.read().clone();
        ctx.emit(ClientEvent::MemberRemove { member });
    }
    Ok(())
}

/// Members are written to the cache before the chunk reaches the pending
/// request, so a completed fetch always observes them.
pub(super) fn members_chunk(data: &Map<String, Value>, ctx: &DispatchContext<'_>) -> HandlerResult {
    let guild_id: GuildId = required(data, "guild_id")?;

    let mut members = Vec::new();
    let progress = known_guild(ctx, guild_id).map(|guild| {
        let mut guild = guild.write();
        for fields in objects(data, "members") {
            match ctx.cache.ingest_member(&mut guild, fields, true, false) {
                Ok(result) => members.push(result.entry.read().user_id),
                Err(e) => debug!(guild_id = %guild_id, error = %e, "skipping member in chunk"),
            }
        }
        for fields in objects(data, "presences") {
            if let Err(e) = ctx.cache.ingest_presence(&guild, fields, false) {
                debug!(guild_id = %guild_id, error = %e, "skipping presence in chunk");
            }
        }
        Progress {
            have: u64::try_from(guild.members.count()).unwrap_or(u64::MAX),
            want: guild.info.member_count,
        }
    });

    let outcome = ctx.members.feed(
        &guild_id,
        Chunk {
            payload: Value::Object(data.clone()),
            progress,
        },
    );
    trace!(guild_id = %guild_id, members = members.len(), ?outcome, "member chunk applied");

    ctx.emit(ClientEvent::MembersChunk { guild_id, members });
    Ok(())
}
