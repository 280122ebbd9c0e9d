//! Change notifications published to client code.
//!
//! Update events carry the entity after the change and, unless disabled for
//! that event, a detached snapshot from before it.

use std::collections::HashSet;

use guildsync_core::{GuildId, UserId};
use tokio::sync::broadcast;

use crate::cache::{Channel, Emoji, GuildSnapshot, Member, Presence, Role, User};
use crate::session::SessionState;

/// Something client code may want to react to.
#[derive(Clone, Debug)]
pub enum ClientEvent {
    /// A session was established.
    Ready {
        /// The connected user.
        user: Option<User>,
        /// Guilds announced (most still unavailable).
        guilds: usize,
    },
    /// A session was resumed.
    Resumed,
    /// A guild became available or was joined.
    GuildCreate {
        /// The guild.
        guild: GuildSnapshot,
    },
    /// Guild settings changed.
    GuildUpdate {
        /// After.
        guild: GuildSnapshot,
        /// Before.
        old: Option<GuildSnapshot>,
    },
    /// The client left or was removed from a guild.
    GuildDelete {
        /// Last known state.
        guild: GuildSnapshot,
    },
    /// A guild went unavailable (outage).
    GuildUnavailable {
        /// The guild.
        guild_id: GuildId,
    },
    /// A user joined a guild.
    MemberAdd {
        /// The new member.
        member: Member,
    },
    /// A member changed.
    MemberUpdate {
        /// After.
        member: Member,
        /// Before.
        old: Option<Member>,
    },
    /// A member left.
    MemberRemove {
        /// Last known state.
        member: Member,
    },
    /// One chunk of a member request was applied.
    MembersChunk {
        /// The guild.
        guild_id: GuildId,
        /// Members in the chunk.
        members: Vec<UserId>,
    },
    /// A role was created.
    RoleCreate {
        /// The guild.
        guild_id: GuildId,
        /// The role.
        role: Role,
    },
    /// A role changed.
    RoleUpdate {
        /// The guild.
        guild_id: GuildId,
        /// After.
        role: Role,
        /// Before.
        old: Option<Role>,
    },
    /// A role was deleted.
    RoleDelete {
        /// The guild.
        guild_id: GuildId,
        /// Last known state.
        role: Role,
    },
    /// A channel was created.
    ChannelCreate {
        /// The channel.
        channel: Channel,
    },
    /// A channel changed.
    ChannelUpdate {
        /// After.
        channel: Channel,
        /// Before.
        old: Option<Channel>,
    },
    /// A channel was deleted.
    ChannelDelete {
        /// Last known state.
        channel: Channel,
    },
    /// An emoji was added.
    EmojiCreate {
        /// The guild.
        guild_id: GuildId,
        /// The emoji.
        emoji: Emoji,
    },
    /// An emoji changed.
    EmojiUpdate {
        /// The guild.
        guild_id: GuildId,
        /// After.
        emoji: Emoji,
        /// Before.
        old: Option<Emoji>,
    },
    /// An emoji was removed.
    EmojiDelete {
        /// The guild.
        guild_id: GuildId,
        /// Last known state.
        emoji: Emoji,
    },
    /// A user changed.
    UserUpdate {
        /// After.
        user: User,
        /// Before.
        old: Option<User>,
    },
    /// A presence changed.
    PresenceUpdate {
        /// The guild.
        guild_id: GuildId,
        /// After.
        presence: Presence,
        /// Before.
        old: Option<Presence>,
    },
    /// A member's voice state changed.
    VoiceStateUpdate {
        /// After.
        member: Member,
        /// Before.
        old: Option<Member>,
    },
    /// The session moved between lifecycle states.
    StateChanged {
        /// Previous state.
        from: SessionState,
        /// New state.
        to: SessionState,
    },
}

impl ClientEvent {
    /// Stable event name, also used to disable "old" snapshots.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ready { .. } => "ready",
            Self::Resumed => "resumed",
            Self::GuildCreate { .. } => "guildCreate",
            Self::GuildUpdate { .. } => "guildUpdate",
            Self::GuildDelete { .. } => "guildDelete",
            Self::GuildUnavailable { .. } => "guildUnavailable",
            Self::MemberAdd { .. } => "guildMemberAdd",
            Self::MemberUpdate { .. } => "guildMemberUpdate",
            Self::MemberRemove { .. } => "guildMemberRemove",
            Self::MembersChunk { .. } => "guildMembersChunk",
            Self::RoleCreate { .. } => "roleCreate",
            Self::RoleUpdate { .. } => "roleUpdate",
            Self::RoleDelete { .. } => "roleDelete",
            Self::ChannelCreate { .. } => "channelCreate",
            Self::ChannelUpdate { .. } => "channelUpdate",
            Self::ChannelDelete { .. } => "channelDelete",
            Self::EmojiCreate { .. } => "emojiCreate",
            Self::EmojiUpdate { .. } => "emojiUpdate",
            Self::EmojiDelete { .. } => "emojiDelete",
            Self::UserUpdate { .. } => "userUpdate",
            Self::PresenceUpdate { .. } => "presenceUpdate",
            Self::VoiceStateUpdate { .. } => "voiceStateUpdate",
            Self::StateChanged { .. } => "stateChanged",
        }
    }
}

/// Destination for change notifications.
pub trait NotificationSink: Send + Sync {
    /// Publish one event. Must not block.
    fn emit(&self, event: ClientEvent);
}

impl NotificationSink for broadcast::Sender<ClientEvent> {
    fn emit(&self, event: ClientEvent) {
        // No subscribers is fine.
        let _ = self.send(event);
    }
}

/// Which update events skip the "before" snapshot.
#[derive(Clone, Debug, Default)]
pub struct ClonePolicy {
    disabled: HashSet<String>,
}

impl ClonePolicy {
    /// Disable snapshots for the named events (see [`ClientEvent::name`]).
    pub fn new<I, S>(disabled: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            disabled: disabled.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether `event` should carry an "old" snapshot.
    pub fn keep_old(&self, event: &str) -> bool {
        !self.disabled.contains(event)
    }
}

/// Sink that keeps every event, for tests.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct RecordingSink(parking_lot::Mutex<Vec<ClientEvent>>);

#[cfg(test)]
impl RecordingSink {
    pub(crate) fn events(&self) -> Vec<ClientEvent> {
        self.0.lock().clone()
    }
}

#[cfg(test)]
impl NotificationSink for RecordingSink {
    fn emit(&self, event: ClientEvent) {
        self.0.lock().push(event);
    }
}
