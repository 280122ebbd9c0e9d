//! Leaf entities: users, members, roles, channels, emojis, presences.
//!
//! Each entity snapshots as a plain clone of itself. Members and presences
//! refer to their user by id; the user itself lives in the global user store.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use guildsync_core::{ChannelId, EmojiId, GuildId, RoleId, UserId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::patch::{AppliedDiff, Patch, set, set_nullable};

// ─────────────────────────────────────────────────────────────────────────────
// User
// ─────────────────────────────────────────────────────────────────────────────

/// A user, shared across every guild it appears in.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct User {
    /// User id.
    pub id: UserId,
    /// Username.
    pub username: String,
    /// Legacy discriminator.
    pub discriminator: String,
    /// Display name.
    pub global_name: Option<String>,
    /// Avatar hash.
    pub avatar: Option<String>,
    /// Whether the account is a bot.
    pub bot: bool,
}

impl User {
    /// A user known only by id.
    pub fn new(id: UserId) -> Self {
        Self {
            id,
            username: String::new(),
            discriminator: "0".to_owned(),
            global_name: None,
            avatar: None,
            bot: false,
        }
    }

    /// `username#discriminator`, or the bare username for migrated accounts.
    pub fn tag(&self) -> String {
        if self.discriminator == "0" {
            self.username.clone()
        } else {
            format!("{}#{}", self.username, self.discriminator)
        }
    }

    /// Creation time derived from the id.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.id.created_at()
    }
}

impl Patch for User {
    type Snapshot = Self;

    fn patch(&mut self, fields: &Map<String, Value>) -> AppliedDiff {
        let mut diff = AppliedDiff::default();
        set(&mut self.username, fields, "username", &mut diff);
        set(&mut self.discriminator, fields, "discriminator", &mut diff);
        set_nullable(&mut self.global_name, fields, "global_name", &mut diff);
        set_nullable(&mut self.avatar, fields, "avatar", &mut diff);
        set(&mut self.bot, fields, "bot", &mut diff);
        diff
    }

    fn snapshot(&self) -> Self {
        self.clone()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Member / VoiceState
// ─────────────────────────────────────────────────────────────────────────────

/// A user's voice connection within a guild.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct VoiceState {
    /// Connected channel, `None` once disconnected.
    pub channel_id: Option<ChannelId>,
    /// Voice session id.
    pub session_id: String,
    /// Server-deafened.
    pub deaf: bool,
    /// Server-muted.
    pub mute: bool,
    /// Self-deafened.
    pub self_deaf: bool,
    /// Self-muted.
    pub self_mute: bool,
    /// Camera on.
    pub self_video: bool,
    /// Suppressed (stage channels).
    pub suppress: bool,
}

impl Patch for VoiceState {
    type Snapshot = Self;

    fn patch(&mut self, fields: &Map<String, Value>) -> AppliedDiff {
        let mut diff = AppliedDiff::default();
        set_nullable(&mut self.channel_id, fields, "channel_id", &mut diff);
        set(&mut self.session_id, fields, "session_id", &mut diff);
        set(&mut self.deaf, fields, "deaf", &mut diff);
        set(&mut self.mute, fields, "mute", &mut diff);
        set(&mut self.self_deaf, fields, "self_deaf", &mut diff);
        set(&mut self.self_mute, fields, "self_mute", &mut diff);
        set(&mut self.self_video, fields, "self_video", &mut diff);
        set(&mut self.suppress, fields, "suppress", &mut diff);
        diff
    }

    fn snapshot(&self) -> Self {
        self.clone()
    }
}

/// A user's membership in one guild.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Member {
    /// Owning guild.
    pub guild_id: GuildId,
    /// The member's user (in the global user store).
    pub user_id: UserId,
    /// Guild nickname.
    pub nick: Option<String>,
    /// Assigned roles (the implicit default role is not listed).
    pub roles: Vec<RoleId>,
    /// ISO8601 join time.
    pub joined_at: Option<String>,
    /// Server-deafened.
    pub deaf: bool,
    /// Server-muted.
    pub mute: bool,
    /// Current voice state, if connected.
    pub voice: Option<VoiceState>,
}

impl Member {
    /// A member with no data beyond its identity.
    pub fn new(guild_id: GuildId, user_id: UserId) -> Self {
        Self {
            guild_id,
            user_id,
            nick: None,
            roles: Vec::new(),
            joined_at: None,
            deaf: false,
            mute: false,
            voice: None,
        }
    }

    /// Whether the member holds `role` (the default role is held implicitly).
    pub fn has_role(&self, role: RoleId) -> bool {
        role.get() == self.guild_id.get() || self.roles.contains(&role)
    }
}

impl Patch for Member {
    type Snapshot = Self;

    fn patch(&mut self, fields: &Map<String, Value>) -> AppliedDiff {
        let mut diff = AppliedDiff::default();
        set_nullable(&mut self.nick, fields, "nick", &mut diff);
        set(&mut self.roles, fields, "roles", &mut diff);
        set_nullable(&mut self.joined_at, fields, "joined_at", &mut diff);
        set(&mut self.deaf, fields, "deaf", &mut diff);
        set(&mut self.mute, fields, "mute", &mut diff);
        diff
    }

    fn snapshot(&self) -> Self {
        self.clone()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Role
// ─────────────────────────────────────────────────────────────────────────────

/// A guild role.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Role {
    /// Role id (equal to the guild id for the default role).
    pub id: RoleId,
    /// Name.
    pub name: String,
    /// RGB color, 0 for none.
    pub color: u32,
    /// Shown separately in the member list.
    pub hoist: bool,
    /// Sort position.
    pub position: i64,
    /// Permission bitfield, as the decimal string sent on the wire.
    pub permissions: String,
    /// Managed by an integration.
    pub managed: bool,
    /// Mentionable by everyone.
    pub mentionable: bool,
}

impl Role {
    /// An empty role.
    pub fn new(id: RoleId) -> Self {
        Self {
            id,
            name: String::new(),
            color: 0,
            hoist: false,
            position: 0,
            permissions: "0".to_owned(),
            managed: false,
            mentionable: false,
        }
    }
}

impl Patch for Role {
    type Snapshot = Self;

    fn patch(&mut self, fields: &Map<String, Value>) -> AppliedDiff {
        let mut diff = AppliedDiff::default();
        set(&mut self.name, fields, "name", &mut diff);
        set(&mut self.color, fields, "color", &mut diff);
        set(&mut self.hoist, fields, "hoist", &mut diff);
        set(&mut self.position, fields, "position", &mut diff);
        set(&mut self.permissions, fields, "permissions", &mut diff);
        set(&mut self.managed, fields, "managed", &mut diff);
        set(&mut self.mentionable, fields, "mentionable", &mut diff);
        diff
    }

    fn snapshot(&self) -> Self {
        self.clone()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Channel
// ─────────────────────────────────────────────────────────────────────────────

/// A guild channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Channel {
    /// Channel id.
    pub id: ChannelId,
    /// Owning guild.
    pub guild_id: GuildId,
    /// Channel type (wire `type`).
    pub kind: u8,
    /// Name.
    pub name: String,
    /// Sort position.
    pub position: i64,
    /// Topic.
    pub topic: Option<String>,
    /// Age-restricted.
    pub nsfw: bool,
    /// Parent category.
    pub parent_id: Option<ChannelId>,
    /// Voice bitrate.
    pub bitrate: Option<u32>,
    /// Voice user limit.
    pub user_limit: Option<u32>,
}

impl Channel {
    /// An empty channel.
    pub fn new(id: ChannelId, guild_id: GuildId) -> Self {
        Self {
            id,
            guild_id,
            kind: 0,
            name: String::new(),
            position: 0,
            topic: None,
            nsfw: false,
            parent_id: None,
            bitrate: None,
            user_limit: None,
        }
    }
}

impl Patch for Channel {
    type Snapshot = Self;

    fn patch(&mut self, fields: &Map<String, Value>) -> AppliedDiff {
        let mut diff = AppliedDiff::default();
        set(&mut self.kind, fields, "type", &mut diff);
        set(&mut self.name, fields, "name", &mut diff);
        set(&mut self.position, fields, "position", &mut diff);
        set_nullable(&mut self.topic, fields, "topic", &mut diff);
        set(&mut self.nsfw, fields, "nsfw", &mut diff);
        set_nullable(&mut self.parent_id, fields, "parent_id", &mut diff);
        set_nullable(&mut self.bitrate, fields, "bitrate", &mut diff);
        set_nullable(&mut self.user_limit, fields, "user_limit", &mut diff);
        diff
    }

    fn snapshot(&self) -> Self {
        self.clone()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Emoji
// ─────────────────────────────────────────────────────────────────────────────

/// A custom guild emoji.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Emoji {
    /// Emoji id.
    pub id: EmojiId,
    /// Name.
    pub name: String,
    /// Roles allowed to use it (empty means everyone).
    pub roles: Vec<RoleId>,
    /// Must be wrapped in colons.
    pub require_colons: bool,
    /// Managed by an integration.
    pub managed: bool,
    /// Animated.
    pub animated: bool,
    /// Usable (false when boosts lapse).
    pub available: bool,
}

impl Emoji {
    /// An empty emoji.
    pub fn new(id: EmojiId) -> Self {
        Self {
            id,
            name: String::new(),
            roles: Vec::new(),
            require_colons: true,
            managed: false,
            animated: false,
            available: true,
        }
    }
}

impl Patch for Emoji {
    type Snapshot = Self;

    fn patch(&mut self, fields: &Map<String, Value>) -> AppliedDiff {
        let mut diff = AppliedDiff::default();
        set(&mut self.name, fields, "name", &mut diff);
        set(&mut self.roles, fields, "roles", &mut diff);
        set(&mut self.require_colons, fields, "require_colons", &mut diff);
        set(&mut self.managed, fields, "managed", &mut diff);
        set(&mut self.animated, fields, "animated", &mut diff);
        set(&mut self.available, fields, "available", &mut diff);
        diff
    }

    fn snapshot(&self) -> Self {
        self.clone()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Presence
// ─────────────────────────────────────────────────────────────────────────────

/// One activity shown in a presence.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activity {
    /// Activity name.
    pub name: String,
    /// Activity type (wire `type`).
    #[serde(rename = "type", default)]
    pub kind: u8,
    /// Stream URL.
    #[serde(default)]
    pub url: Option<String>,
}

/// A user's presence within one guild.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Presence {
    /// The user.
    pub user_id: UserId,
    /// `online`, `idle`, `dnd` or `offline`.
    pub status: String,
    /// Current activities.
    pub activities: Vec<Activity>,
    /// Status per client platform.
    pub client_status: BTreeMap<String, String>,
}

impl Presence {
    /// An offline presence.
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            status: "offline".to_owned(),
            activities: Vec::new(),
            client_status: BTreeMap::new(),
        }
    }
}

impl Patch for Presence {
    type Snapshot = Self;

    fn patch(&mut self, fields: &Map<String, Value>) -> AppliedDiff {
        let mut diff = AppliedDiff::default();
        set(&mut self.status, fields, "status", &mut diff);
        set(&mut self.activities, fields, "activities", &mut diff);
        set(&mut self.client_status, fields, "client_status", &mut diff);
        diff
    }

    fn snapshot(&self) -> Self {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn fields(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn user_patch_reports_changed_fields() {
        let mut user = User::new(UserId::new(1));
        let diff = user.patch(&fields(json!({"username": "ana", "bot": false, "avatar": "a1"})));
        assert_eq!(diff.fields(), ["username", "avatar"]);
        assert_eq!(user.tag(), "ana");
    }

    #[test]
    fn user_patch_is_idempotent() {
        let mut user = User::new(UserId::new(1));
        let patch = fields(json!({"username": "ana", "discriminator": "0420"}));
        let _ = user.patch(&patch);
        let once = user.clone();
        assert!(user.patch(&patch).is_empty());
        assert_eq!(user, once);
        assert_eq!(user.tag(), "ana#0420");
    }

    #[test]
    fn member_roles_parse_string_ids() {
        let mut member = Member::new(GuildId::new(10), UserId::new(1));
        let _ = member.patch(&fields(json!({"roles": ["11", "12"], "nick": "n"})));
        assert_eq!(member.roles, vec![RoleId::new(11), RoleId::new(12)]);
        assert!(member.has_role(RoleId::new(10)));
        assert!(member.has_role(RoleId::new(12)));
        assert!(!member.has_role(RoleId::new(13)));
    }

    #[test]
    fn member_nick_cleared_by_null() {
        let mut member = Member::new(GuildId::new(10), UserId::new(1));
        let _ = member.patch(&fields(json!({"nick": "n"})));
        let _ = member.patch(&fields(json!({"nick": null})));
        assert_eq!(member.nick, None);
    }

    #[test]
    fn channel_maps_wire_type() {
        let mut channel = Channel::new(ChannelId::new(3), GuildId::new(1));
        let _ = channel.patch(&fields(json!({"type": 2, "bitrate": 64000, "name": "voice"})));
        assert_eq!(channel.kind, 2);
        assert_eq!(channel.bitrate, Some(64000));
    }

    #[test]
    fn presence_activities() {
        let mut presence = Presence::new(UserId::new(1));
        let diff = presence.patch(&fields(json!({
            "status": "online",
            "activities": [{"name": "chess", "type": 0}],
            "client_status": {"desktop": "online"}
        })));
        assert_eq!(diff.fields().len(), 3);
        assert_eq!(presence.activities[0].name, "chess");
        assert_eq!(presence.client_status["desktop"], "online");
    }

    #[test]
    fn voice_state_disconnect() {
        let mut voice = VoiceState::default();
        let _ = voice.patch(&fields(json!({"channel_id": "9", "self_mute": true})));
        assert_eq!(voice.channel_id, Some(ChannelId::new(9)));
        let _ = voice.patch(&fields(json!({"channel_id": null})));
        assert_eq!(voice.channel_id, None);
        assert!(voice.self_mute);
    }

    proptest! {
        #[test]
        fn role_patch_is_idempotent(
            name in "[a-z]{0,12}",
            color in any::<u32>(),
            hoist in any::<bool>(),
            position in -50i64..50,
        ) {
            let mut role = Role::new(RoleId::new(4));
            let patch = fields(json!({"name": name, "color": color, "hoist": hoist, "position": position}));
            let _ = role.patch(&patch);
            let once = role.clone();
            prop_assert!(role.patch(&patch).is_empty());
            prop_assert_eq!(role, once);
        }

        #[test]
        fn empty_patch_changes_nothing(username in "[a-z]{1,12}", bot in any::<bool>()) {
            let mut user = User::new(UserId::new(2));
            let _ = user.patch(&fields(json!({"username": username, "bot": bot})));
            let before = user.clone();
            prop_assert!(user.patch(&Map::new()).is_empty());
            prop_assert_eq!(user, before);
        }
    }
}
