//! Built-in cache handlers, one function per dispatch event.

mod channel;
mod guild;
mod member;
mod role;
mod session;
mod user;

use guildsync_core::constants::event;
use guildsync_core::{GuildId, MalformedEnvelope};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::debug;

use super::{DispatchContext, EventDispatcher};
use crate::cache::{Guild, Shared, missing, patch};

pub(super) fn register_all(dispatcher: &mut EventDispatcher) {
    dispatcher.register(event::READY, session::ready);
    dispatcher.register(event::RESUMED, session::resumed);

    dispatcher.register(event::GUILD_CREATE, guild::guild_create);
    dispatcher.register(event::GUILD_UPDATE, guild::guild_update);
    dispatcher.register(event::GUILD_DELETE, guild::guild_delete);
    dispatcher.register(event::GUILD_EMOJIS_UPDATE, guild::emojis_update);

    dispatcher.register(event::GUILD_MEMBER_ADD, member::member_add);
    dispatcher.register(event::GUILD_MEMBER_UPDATE, member::member_update);
    dispatcher.register(event::GUILD_MEMBER_REMOVE, member::member_remove);
    dispatcher.register(event::GUILD_MEMBERS_CHUNK, member::members_chunk);

    dispatcher.register(event::GUILD_ROLE_CREATE, role::role_create);
    dispatcher.register(event::GUILD_ROLE_UPDATE, role::role_update);
    dispatcher.register(event::GUILD_ROLE_DELETE, role::role_delete);

    dispatcher.register(event::CHANNEL_CREATE, channel::channel_create);
    dispatcher.register(event::CHANNEL_UPDATE, channel::channel_update);
    dispatcher.register(event::CHANNEL_DELETE, channel::channel_delete);

    dispatcher.register(event::USER_UPDATE, user::user_update);
    dispatcher.register(event::PRESENCE_UPDATE, user::presence_update);
    dispatcher.register(event::VOICE_STATE_UPDATE, user::voice_state_update);
}

fn required<T: DeserializeOwned>(data: &Map<String, Value>, key: &str) -> Result<T, MalformedEnvelope> {
    patch::id(data, key).ok_or_else(|| missing(key, data))
}

fn object<'a>(data: &'a Map<String, Value>, key: &str) -> Result<&'a Map<String, Value>, MalformedEnvelope> {
    data.get(key)
        .and_then(Value::as_object)
        .ok_or_else(|| missing(key, data))
}

/// The guild an event targets; events for guilds not in the cache are
/// dropped.
fn known_guild(ctx: &DispatchContext<'_>, id: GuildId) -> Option<Shared<Guild>> {
    let guild = ctx.cache.guild(id);
    if guild.is_none() {
        debug!(guild_id = %id, "event for uncached guild ignored");
    }
    guild
}
