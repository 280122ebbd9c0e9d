//! The guild aggregate: scalar settings plus nested entity stores.

use chrono::{DateTime, Utc};
use guildsync_core::{ChannelId, EmojiId, GuildId, RoleId, Snowflake, UserId};
use serde::Serialize;
use serde_json::{Map, Value};

use super::entities::{Channel, Emoji, Member, Presence, Role};
use super::patch::{AppliedDiff, Patch, set, set_nullable};
use super::store::{Shared, Store, Upserted};

/// Scalar guild settings, patched in place by snapshots and updates.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct GuildInfo {
    /// Name.
    pub name: String,
    /// Icon hash.
    pub icon: Option<String>,
    /// Invite splash hash.
    pub splash: Option<String>,
    /// Owner.
    pub owner_id: Option<UserId>,
    /// Whether the guild is above the large threshold.
    pub large: bool,
    /// Total members as reported by the remote.
    pub member_count: u64,
    /// Default notification level.
    pub default_message_notifications: u8,
    /// Explicit content filter level.
    pub explicit_content_filter: u8,
    /// Voice region.
    pub region: Option<String>,
    /// Verification level.
    pub verification_level: u8,
    /// Channel for system messages.
    pub system_channel_id: Option<ChannelId>,
    /// AFK voice channel.
    pub afk_channel_id: Option<ChannelId>,
    /// AFK timeout in seconds.
    pub afk_timeout: u32,
    /// Enabled guild features.
    pub features: Vec<String>,
    /// Required MFA level.
    pub mfa_level: u8,
    /// Owning application for bot-created guilds.
    pub application_id: Option<Snowflake>,
    /// Embed enabled.
    pub embed_enabled: bool,
    /// Embed channel.
    pub embed_channel_id: Option<ChannelId>,
    /// Widget enabled.
    pub widget_enabled: bool,
    /// Widget channel.
    pub widget_channel_id: Option<ChannelId>,
}

impl GuildInfo {
    fn patch(&mut self, fields: &Map<String, Value>, diff: &mut AppliedDiff) {
        set(&mut self.name, fields, "name", diff);
        set_nullable(&mut self.icon, fields, "icon", diff);
        set_nullable(&mut self.splash, fields, "splash", diff);
        set_nullable(&mut self.owner_id, fields, "owner_id", diff);
        set(&mut self.large, fields, "large", diff);
        set(&mut self.member_count, fields, "member_count", diff);
        set(
            &mut self.default_message_notifications,
            fields,
            "default_message_notifications",
            diff,
        );
        set(&mut self.explicit_content_filter, fields, "explicit_content_filter", diff);
        set_nullable(&mut self.region, fields, "region", diff);
        set(&mut self.verification_level, fields, "verification_level", diff);
        set_nullable(&mut self.system_channel_id, fields, "system_channel_id", diff);
        set_nullable(&mut self.afk_channel_id, fields, "afk_channel_id", diff);
        set(&mut self.afk_timeout, fields, "afk_timeout", diff);
        set(&mut self.features, fields, "features", diff);
        set(&mut self.mfa_level, fields, "mfa_level", diff);
        set_nullable(&mut self.application_id, fields, "application_id", diff);
        set(&mut self.embed_enabled, fields, "embed_enabled", diff);
        set_nullable(&mut self.embed_channel_id, fields, "embed_channel_id", diff);
        set(&mut self.widget_enabled, fields, "widget_enabled", diff);
        set_nullable(&mut self.widget_channel_id, fields, "widget_channel_id", diff);
    }
}

/// Immutable copy of a guild's scalar state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GuildSnapshot {
    /// Guild id.
    pub id: GuildId,
    /// Whether the guild was available.
    pub available: bool,
    /// Scalar settings.
    pub info: GuildInfo,
}

impl GuildSnapshot {
    /// Creation time derived from the id.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.id.created_at()
    }
}

/// A guild and everything cached beneath it.
#[derive(Debug)]
pub struct Guild {
    /// Guild id.
    pub id: GuildId,
    /// False while the remote reports an outage.
    pub available: bool,
    /// Scalar settings.
    pub info: GuildInfo,
    /// Channels.
    pub channels: Store<ChannelId, Channel>,
    /// Custom emojis.
    pub emojis: Store<EmojiId, Emoji>,
    /// Members known locally (a subset for large guilds).
    pub members: Store<UserId, Member>,
    /// Roles, including the default role.
    pub roles: Store<RoleId, Role>,
    /// Presences.
    pub presences: Store<UserId, Presence>,
}

impl Guild {
    /// An unavailable guild known only by id.
    pub fn new(id: GuildId) -> Self {
        Self {
            id,
            available: false,
            info: GuildInfo::default(),
            channels: Store::new(),
            emojis: Store::new(),
            members: Store::new(),
            roles: Store::new(),
            presences: Store::new(),
        }
    }

    /// Record a member. Only a genuine join (`initial == false`) moves the
    /// member counter; snapshot and chunk ingestion do not.
    pub fn add_member(
        &mut self,
        user_id: UserId,
        fields: &Map<String, Value>,
        initial: bool,
        keep_old: bool,
    ) -> Upserted<Member> {
        let guild_id = self.id;
        let result = self
            .members
            .upsert(user_id, fields, keep_old, || Member::new(guild_id, user_id));
        if !initial {
            self.info.member_count = self.info.member_count.saturating_add(1);
        }
        result
    }

    /// Forget a member; the counter drops only if the member was known.
    pub fn remove_member(&mut self, user_id: UserId) -> Option<Shared<Member>> {
        let removed = self.members.delete(&user_id)?;
        self.info.member_count = self.info.member_count.saturating_sub(1);
        let _ = self.presences.delete(&user_id);
        Some(removed)
    }

    /// Whether every member reported by the remote is cached locally.
    pub fn is_fully_fetched(&self) -> bool {
        u64::try_from(self.members.count()).unwrap_or(u64::MAX) >= self.info.member_count
    }

    /// Drop nested state when the guild goes unavailable.
    pub fn mark_unavailable(&mut self) {
        self.available = false;
        self.channels.clear();
        self.emojis.clear();
        self.members.clear();
        self.roles.clear();
        self.presences.clear();
    }

    /// The `@everyone` role, whose id equals the guild id.
    pub fn default_role(&self) -> Option<Role> {
        self.roles.cloned(&RoleId::from(self.id))
    }

    /// The AFK voice channel.
    pub fn afk_channel(&self) -> Option<Channel> {
        self.channels.cloned(&self.info.afk_channel_id?)
    }

    /// The system message channel.
    pub fn system_channel(&self) -> Option<Channel> {
        self.channels.cloned(&self.info.system_channel_id?)
    }

    /// The owner's member entry, if cached.
    pub fn owner(&self) -> Option<Member> {
        self.members.cloned(&self.info.owner_id?)
    }

    /// The connected user's member entry.
    pub fn me(&self, current_user: UserId) -> Option<Member> {
        self.members.cloned(&current_user)
    }

    /// Icon URL under `cdn`; animated icons use gif.
    pub fn icon_url(&self, cdn: &str, size: Option<u32>) -> Option<String> {
        let icon = self.info.icon.as_deref()?;
        let ext = if icon.starts_with("a_") { "gif" } else { "png" };
        Some(cdn_url(cdn, &format!("icons/{}/{icon}.{ext}", self.id), size))
    }

    /// Invite splash URL under `cdn`.
    pub fn splash_url(&self, cdn: &str, size: Option<u32>) -> Option<String> {
        let splash = self.info.splash.as_deref()?;
        Some(cdn_url(cdn, &format!("splashes/{}/{splash}.png", self.id), size))
    }

    /// Creation time derived from the id.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.id.created_at()
    }
}

fn cdn_url(cdn: &str, path: &str, size: Option<u32>) -> String {
    let base = cdn.trim_end_matches('/');
    match size {
        Some(size) => format!("{base}/{path}?size={size}"),
        None => format!("{base}/{path}"),
    }
}

impl Patch for Guild {
    type Snapshot = GuildSnapshot;

    fn patch(&mut self, fields: &Map<String, Value>) -> AppliedDiff {
        let mut diff = AppliedDiff::default();
        if let Some(unavailable) = fields.get("unavailable").and_then(Value::as_bool) {
            if self.available == unavailable {
                self.available = !unavailable;
                diff.record("unavailable");
            }
        }
        self.info.patch(fields, &mut diff);
        diff
    }

    fn snapshot(&self) -> GuildSnapshot {
        GuildSnapshot {
            id: self.id,
            available: self.available,
            info: self.info.clone(),
        }
    }
}
