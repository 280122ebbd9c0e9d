use guildsync_core::{GuildId, UserId};
use serde_json::{Map, Value};
use tracing::trace;

use super::{known_guild, required};
use crate::cache::patch;
use crate::dispatcher::{DispatchContext, HandlerResult};
use crate::notify::ClientEvent;

/// Patches a cached user; updates for users never seen are ignored.
pub(super) fn user_update(data: &Map<String, Value>, ctx: &DispatchContext<'_>) -> HandlerResult {
    let id: UserId = required(data, "id")?;
    if !ctx.cache.users().contains(&id) {
        trace!(user_id = %id, "update for uncached user ignored");
        return Ok(());
    }
    let keep_old = ctx.keep_old("userUpdate");
    let result = ctx.cache.upsert_user(data, keep_old)?;
    let user = result.entry.read().clone();
    ctx.emit(ClientEvent::UserUpdate {
        user,
        old: result.old,
    });
    Ok(())
}

pub(super) fn presence_update(data: &Map<String, Value>, ctx: &DispatchContext<'_>) -> HandlerResult {
    let guild_id: GuildId = required(data, "guild_id")?;
    let Some(guild) = known_guild(ctx, guild_id) else {
        return Ok(());
    };
    let keep_old = ctx.keep_old("presenceUpdate");
    let result = ctx.cache.ingest_presence(&guild.read(), data, keep_old)?;
    let presence = result.entry.read().clone();
    ctx.emit(ClientEvent::PresenceUpdate {
        guild_id,
        presence,
        old: result.old,
    });
    Ok(())
}

pub(super) fn voice_state_update(data: &Map<String, Value>, ctx: &DispatchContext<'_>) -> HandlerResult {
    let Some(guild_id) = patch::id::<GuildId>(data, "guild_id") else {
        trace!("ignoring voice state without guild");
        return Ok(());
    };
    let Some(guild) = known_guild(ctx, guild_id) else {
        return Ok(());
    };
    let keep_old = ctx.keep_old("voiceStateUpdate");
    let change = ctx.cache.apply_voice_state(&mut guild.write(), data, keep_old)?;
    let member = change.member.read().clone();
    ctx.emit(ClientEvent::VoiceStateUpdate {
        member,
        old: change.old,
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::dispatcher::test_support::Harness;
    use crate::notify::{ClientEvent, ClonePolicy};
    use guildsync_core::ChannelId;
    use serde_json::json;

    fn ready(harness: &Harness) {
        let _ = harness.send("READY", json!({"user": {"id": "1", "username": "old"}, "guilds": []}));
        let _ = harness.send(
            "GUILD_CREATE",
            json!({"id": "10", "members": [{"user": {"id": "1", "username": "old"}}]}),
        );
    }

    #[test]
    fn user_update_carries_old_and_new() {
        let harness = Harness::new();
        ready(&harness);
        let _ = harness.send("USER_UPDATE", json!({"id": "1", "username": "new"}));
        match harness.last_event() {
            ClientEvent::UserUpdate { user, old } => {
                assert_eq!(user.username, "new");
                assert_eq!(old.unwrap().username, "old");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn user_update_without_clone() {
        let harness = Harness::with_clones(ClonePolicy::new(["userUpdate"]));
        ready(&harness);
        let _ = harness.send("USER_UPDATE", json!({"id": "1", "username": "new"}));
        assert!(matches!(harness.last_event(), ClientEvent::UserUpdate { old: None, .. }));
    }

    #[test]
    fn unknown_user_update_is_ignored() {
        let harness = Harness::new();
        let _ = harness.send("USER_UPDATE", json!({"id": "5", "username": "x"}));
        assert!(harness.cache.users().is_empty());
        assert!(harness.events().is_empty());
    }

    #[test]
    fn presence_update() {
        let harness = Harness::new();
        ready(&harness);
        let _ = harness.send("PRESENCE_UPDATE", json!({"guild_id": "10", "user": {"id": "1"}, "status": "dnd"}));
        assert!(matches!(
            harness.last_event(),
            ClientEvent::PresenceUpdate { ref presence, .. } if presence.status == "dnd"
        ));
    }

    #[test]
    fn voice_join_and_leave() {
        let harness = Harness::new();
        ready(&harness);
        let _ = harness.send(
            "VOICE_STATE_UPDATE",
            json!({"guild_id": "10", "user_id": "1", "channel_id": "30", "session_id": "v"}),
        );
        match harness.last_event() {
            ClientEvent::VoiceStateUpdate { member, old } => {
                assert_eq!(member.voice.unwrap().channel_id, Some(ChannelId::new(30)));
                assert!(old.unwrap().voice.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }

        let _ = harness.send("VOICE_STATE_UPDATE", json!({"guild_id": "10", "user_id": "1", "channel_id": null}));
        assert!(matches!(
            harness.last_event(),
            ClientEvent::VoiceStateUpdate { ref member, .. } if member.voice.is_none()
        ));
    }
}
