//! The live entity graph: guilds, their nested stores, and global users.
//!
//! Entities are patched in place and never replaced wholesale, so a handle
//! obtained from a store keeps observing later updates. Lock order is always
//! guild, then nested entity, then user; nothing takes a guild lock while
//! holding an entity lock.

pub mod entities;
pub mod guild;
pub mod patch;
pub mod store;

pub use entities::{Activity, Channel, Emoji, Member, Presence, Role, User, VoiceState};
pub use guild::{Guild, GuildInfo, GuildSnapshot};
pub use patch::{AppliedDiff, Patch};
pub use store::{Shared, Store, Upserted};

use std::collections::HashSet;
use std::hash::Hash;

use guildsync_core::{GuildId, MalformedEnvelope, UserId};
use parking_lot::RwLock;
use serde_json::{Map, Value};
use tracing::debug;

/// Result type for cache ingestion: payloads missing their identity are
/// rejected as malformed.
pub type IngestResult<T> = Result<T, MalformedEnvelope>;

pub(crate) fn missing(what: &str, fields: &Map<String, Value>) -> MalformedEnvelope {
    let raw = serde_json::to_vec(fields).unwrap_or_default();
    MalformedEnvelope::new(format!("missing or invalid {what}"), &raw)
}

pub(crate) fn objects<'a>(fields: &'a Map<String, Value>, key: &str) -> impl Iterator<Item = &'a Map<String, Value>> {
    fields
        .get(key)
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_object)
}

/// A voice-state change applied to a member.
pub struct VoiceChange {
    /// The member whose voice state changed.
    pub member: Shared<Member>,
    /// Member snapshot before the change, when requested.
    pub old: Option<Member>,
}

/// Root of the cached object graph.
#[derive(Debug, Default)]
pub struct EntityCache {
    guilds: Store<GuildId, Guild>,
    users: Store<UserId, User>,
    current_user: RwLock<Option<UserId>>,
}

impl EntityCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Guild store.
    pub fn guilds(&self) -> &Store<GuildId, Guild> {
        &self.guilds
    }

    /// Global user store.
    pub fn users(&self) -> &Store<UserId, User> {
        &self.users
    }

    /// Look up a guild.
    pub fn guild(&self, id: GuildId) -> Option<Shared<Guild>> {
        self.guilds.get(&id)
    }

    /// The connected user, once a session is established.
    pub fn current_user(&self) -> Option<UserId> {
        *self.current_user.read()
    }

    /// Record the connected user.
    pub fn set_current_user(&self, id: UserId) {
        *self.current_user.write() = Some(id);
    }

    /// Drop everything (used before a full resync).
    pub fn clear(&self) {
        self.guilds.clear();
        self.users.clear();
        *self.current_user.write() = None;
        debug!("entity cache cleared");
    }

    // ── Users ───────────────────────────────────────────────────────────────

    /// Create or patch a user from a user object.
    pub fn upsert_user(&self, fields: &Map<String, Value>, keep_old: bool) -> IngestResult<Upserted<User>> {
        let id: UserId = patch::id(fields, "id").ok_or_else(|| missing("user id", fields))?;
        Ok(self.users.upsert(id, fields, keep_old, || User::new(id)))
    }

    // ── Guilds ──────────────────────────────────────────────────────────────

    /// Ingest a full guild snapshot (or an unavailable stub).
    ///
    /// The snapshot's `member_count` overwrites the counter. Roles, channels
    /// and emojis absent from the snapshot are pruned; members are only
    /// added, since large guilds send a partial member list.
    pub fn load_guild(&self, fields: &Map<String, Value>, keep_old: bool) -> IngestResult<Upserted<Guild>> {
        let id: GuildId = patch::id(fields, "id").ok_or_else(|| missing("guild id", fields))?;
        let unavailable = fields.get("unavailable").and_then(Value::as_bool).unwrap_or(false);

        if let Some(existing) = self.guilds.get(&id) {
            let (old, diff) = {
                let mut guild = existing.write();
                let old = keep_old.then(|| guild.snapshot());
                let diff = guild.patch(fields);
                if !unavailable {
                    self.load_collections(&mut guild, fields);
                }
                (old, diff)
            };
            return Ok(Upserted {
                entry: existing,
                old,
                created: false,
                diff,
            });
        }

        let mut guild = Guild::new(id);
        let diff = guild.patch(fields);
        if !unavailable {
            self.load_collections(&mut guild, fields);
        }
        Ok(Upserted {
            entry: self.guilds.set(id, guild),
            old: None,
            created: true,
            diff,
        })
    }

    fn load_collections(&self, guild: &mut Guild, fields: &Map<String, Value>) {
        let guild_id = guild.id;
        guild.available = true;

        let roles = upsert_all(&guild.roles, fields, "roles", Role::new);
        guild.roles.retain(|id| roles.contains(id));

        let channels = upsert_all(&guild.channels, fields, "channels", |id| Channel::new(id, guild_id));
        guild.channels.retain(|id| channels.contains(id));

        let emojis = upsert_all(&guild.emojis, fields, "emojis", Emoji::new);
        guild.emojis.retain(|id| emojis.contains(id));

        for member in objects(fields, "members") {
            if let Err(e) = self.ingest_member(guild, member, true, false) {
                debug!(guild_id = %guild_id, error = %e, "skipping member in snapshot");
            }
        }
        for presence in objects(fields, "presences") {
            if let Err(e) = self.ingest_presence(guild, presence, false) {
                debug!(guild_id = %guild_id, error = %e, "skipping presence in snapshot");
            }
        }
        for voice in objects(fields, "voice_states") {
            if let Err(e) = self.apply_voice_state(guild, voice, false) {
                debug!(guild_id = %guild_id, error = %e, "skipping voice state in snapshot");
            }
        }
    }

    /// Remove a guild entirely.
    pub fn remove_guild(&self, id: GuildId) -> Option<Shared<Guild>> {
        self.guilds.delete(&id)
    }

    // ── Guild children ──────────────────────────────────────────────────────

    /// Record a member from a member object (with nested `user`).
    pub fn ingest_member(
        &self,
        guild: &mut Guild,
        fields: &Map<String, Value>,
        initial: bool,
        keep_old: bool,
    ) -> IngestResult<Upserted<Member>> {
        let user = fields
            .get("user")
            .and_then(Value::as_object)
            .ok_or_else(|| missing("member user", fields))?;
        let user_id = self.upsert_user(user, false)?.entry.read().id;
        Ok(guild.add_member(user_id, fields, initial, keep_old))
    }

    /// Record a presence. The nested user is patched only when it is known
    /// or the payload carries more than its id.
    pub fn ingest_presence(
        &self,
        guild: &Guild,
        fields: &Map<String, Value>,
        keep_old: bool,
    ) -> IngestResult<Upserted<Presence>> {
        let user = fields
            .get("user")
            .and_then(Value::as_object)
            .ok_or_else(|| missing("presence user", fields))?;
        let user_id: UserId = patch::id(user, "id").ok_or_else(|| missing("presence user id", fields))?;
        if self.users.contains(&user_id) || user.contains_key("username") {
            let _ = self.upsert_user(user, false)?;
        }
        Ok(guild
            .presences
            .upsert(user_id, fields, keep_old, || Presence::new(user_id)))
    }

    /// Apply a voice state to its member. A payload carrying `member`
    /// introduces the member if it is not cached yet.
    pub fn apply_voice_state(
        &self,
        guild: &mut Guild,
        fields: &Map<String, Value>,
        keep_old: bool,
    ) -> IngestResult<VoiceChange> {
        let user_id: UserId = patch::id(fields, "user_id").ok_or_else(|| missing("voice user id", fields))?;
        let member = match guild.members.get(&user_id) {
            Some(member) => member,
            None => {
                let payload = fields
                    .get("member")
                    .and_then(Value::as_object)
                    .ok_or_else(|| missing("voice member", fields))?;
                self.ingest_member(guild, payload, true, false)?.entry
            }
        };

        let old = {
            let mut entry = member.write();
            let old = keep_old.then(|| entry.snapshot());
            let mut voice = entry.voice.take().unwrap_or_default();
            let _ = voice.patch(fields);
            entry.voice = voice.channel_id.is_some().then_some(voice);
            old
        };
        Ok(VoiceChange { member, old })
    }
}

fn upsert_all<K, V>(
    store: &Store<K, V>,
    fields: &Map<String, Value>,
    key: &str,
    init: impl Fn(K) -> V,
) -> HashSet<K>
where
    K: Eq + Hash + Copy + serde::de::DeserializeOwned,
    V: Patch,
{
    let mut seen = HashSet::new();
    for item in objects(fields, key) {
        let Some(id) = patch::id::<K>(item, "id") else {
            continue;
        };
        let _ = store.upsert(id, item, false, || init(id));
        let _ = seen.insert(id);
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;
    use guildsync_core::{ChannelId, RoleId};
    use serde_json::json;

    fn fields(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn snapshot() -> Map<String, Value> {
        fields(json!({
            "id": "100",
            "name": "guild",
            "member_count": 3,
            "roles": [{"id": "100", "name": "@everyone"}, {"id": "101", "name": "mods"}],
            "channels": [{"id": "200", "type": 0, "name": "general"}],
            "emojis": [{"id": "300", "name": "wave"}],
            "members": [
                {"user": {"id": "1", "username": "ana"}, "roles": ["101"]},
                {"user": {"id": "2", "username": "bo"}, "roles": []}
            ],
            "presences": [{"user": {"id": "1"}, "status": "online"}],
            "voice_states": [{"user_id": "2", "channel_id": "200", "session_id": "s"}]
        }))
    }

    #[test]
    fn load_guild_populates_graph() {
        let cache = EntityCache::new();
        let result = cache.load_guild(&snapshot(), false).unwrap();
        assert!(result.created);

        let guild = result.entry.read();
        assert!(guild.available);
        assert_eq!(guild.info.member_count, 3);
        assert_eq!(guild.roles.count(), 2);
        assert_eq!(guild.members.count(), 2);
        assert_eq!(guild.default_role().unwrap().name, "@everyone");
        assert_eq!(guild.presences.cloned(&UserId::new(1)).unwrap().status, "online");
        let bo = guild.members.cloned(&UserId::new(2)).unwrap();
        assert_eq!(bo.voice.unwrap().channel_id, Some(ChannelId::new(200)));
        assert_eq!(cache.users().cloned(&UserId::new(1)).unwrap().username, "ana");
    }

    #[test]
    fn unavailable_stub_has_no_collections() {
        let cache = EntityCache::new();
        let result = cache.load_guild(&fields(json!({"id": "5", "unavailable": true})), false).unwrap();
        let guild = result.entry.read();
        assert!(!guild.available);
        assert!(guild.roles.is_empty());
    }

    #[test]
    fn reload_patches_in_place_and_prunes() {
        let cache = EntityCache::new();
        let first = cache.load_guild(&snapshot(), false).unwrap().entry;

        let mut second = snapshot();
        let _ = second.insert("roles".into(), json!([{"id": "100", "name": "@everyone"}]));
        let _ = second.insert("member_count".into(), json!(10));
        let result = cache.load_guild(&second, true).unwrap();

        assert!(!result.created);
        assert!(std::sync::Arc::ptr_eq(&first, &result.entry));
        assert_eq!(result.old.unwrap().info.member_count, 3);
        let guild = first.read();
        assert_eq!(guild.info.member_count, 10);
        assert!(guild.roles.get(&RoleId::new(101)).is_none());
    }

    #[test]
    fn missing_guild_id_is_malformed() {
        let cache = EntityCache::new();
        let err = cache.load_guild(&fields(json!({"name": "x"})), false).err().unwrap();
        assert!(err.reason.contains("guild id"));
    }

    #[test]
    fn voice_disconnect_clears_state() {
        let cache = EntityCache::new();
        let guild = cache.load_guild(&snapshot(), false).unwrap().entry;
        let change = cache
            .apply_voice_state(
                &mut guild.write(),
                &fields(json!({"user_id": "2", "channel_id": null})),
                true,
            )
            .unwrap();
        assert!(change.old.unwrap().voice.is_some());
        assert!(change.member.read().voice.is_none());
    }

    #[test]
    fn id_only_presence_user_is_not_created() {
        let cache = EntityCache::new();
        let guild = cache.load_guild(&snapshot(), false).unwrap().entry;
        let _ = cache
            .ingest_presence(&guild.read(), &fields(json!({"user": {"id": "77"}, "status": "idle"})), false)
            .unwrap();
        assert!(cache.users().get(&UserId::new(77)).is_none());
        assert!(guild.read().presences.contains(&UserId::new(77)));
    }

    #[test]
    fn clear_drops_everything() {
        let cache = EntityCache::new();
        let _ = cache.load_guild(&snapshot(), false).unwrap();
        cache.set_current_user(UserId::new(1));
        cache.clear();
        assert!(cache.guilds().is_empty());
        assert!(cache.users().is_empty());
        assert!(cache.current_user().is_none());
    }
}
