//! Package-level and gateway protocol constants.

/// Current version of guildsync (sourced from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Package name, also sent as the identify `browser`/`device` default.
pub const NAME: &str = "guildsync";

/// Gateway opcodes.
pub mod opcode {
    /// An event was dispatched.
    pub const DISPATCH: u8 = 0;
    /// Keep-alive, sent by either side.
    pub const HEARTBEAT: u8 = 1;
    /// Start a new session.
    pub const IDENTIFY: u8 = 2;
    /// Update the client's presence.
    pub const PRESENCE_UPDATE: u8 = 3;
    /// Join, leave or move between voice channels.
    pub const VOICE_STATE_UPDATE: u8 = 4;
    /// Resume a previous session.
    pub const RESUME: u8 = 6;
    /// The remote asks the client to reconnect and resume.
    pub const RECONNECT: u8 = 7;
    /// Request guild members (answered by member chunk events).
    pub const REQUEST_GUILD_MEMBERS: u8 = 8;
    /// The session is invalid; `d` says whether it can be resumed.
    pub const INVALID_SESSION: u8 = 9;
    /// First message after connecting, carries the heartbeat interval.
    pub const HELLO: u8 = 10;
    /// Acknowledges a heartbeat.
    pub const HEARTBEAT_ACK: u8 = 11;
}

/// Gateway close codes with special handling.
pub mod close_code {
    /// The token was rejected.
    pub const AUTHENTICATION_FAILED: u16 = 4004;
    /// The sequence sent with resume was invalid.
    pub const INVALID_SEQUENCE: u16 = 4007;
    /// The session timed out.
    pub const SESSION_TIMED_OUT: u16 = 4009;
    /// Invalid shard.
    pub const INVALID_SHARD: u16 = 4010;
    /// The session would have handled too many guilds.
    pub const SHARDING_REQUIRED: u16 = 4011;
    /// Invalid gateway version.
    pub const INVALID_API_VERSION: u16 = 4012;
    /// Invalid intents.
    pub const INVALID_INTENTS: u16 = 4013;
    /// Disallowed intents.
    pub const DISALLOWED_INTENTS: u16 = 4014;

    /// Close codes after which reconnecting is pointless.
    pub const FATAL: [u16; 6] = [
        AUTHENTICATION_FAILED,
        INVALID_SHARD,
        SHARDING_REQUIRED,
        INVALID_API_VERSION,
        INVALID_INTENTS,
        DISALLOWED_INTENTS,
    ];

    /// Close codes that invalidate the session (reconnect, but identify anew).
    pub const RESYNC: [u16; 2] = [INVALID_SEQUENCE, SESSION_TIMED_OUT];

    /// Whether the code forbids reconnecting.
    pub fn is_fatal(code: u16) -> bool {
        FATAL.contains(&code)
    }

    /// Whether the code forbids resuming.
    pub fn requires_resync(code: u16) -> bool {
        RESYNC.contains(&code)
    }
}

/// Gateway dispatch event names.
pub mod event {
    /// Session established.
    pub const READY: &str = "READY";
    /// Session resumed.
    pub const RESUMED: &str = "RESUMED";
    /// Guild became available or was joined.
    pub const GUILD_CREATE: &str = "GUILD_CREATE";
    /// Guild settings changed.
    pub const GUILD_UPDATE: &str = "GUILD_UPDATE";
    /// Guild became unavailable or was left.
    pub const GUILD_DELETE: &str = "GUILD_DELETE";
    /// A user joined a guild.
    pub const GUILD_MEMBER_ADD: &str = "GUILD_MEMBER_ADD";
    /// A member changed.
    pub const GUILD_MEMBER_UPDATE: &str = "GUILD_MEMBER_UPDATE";
    /// A user left a guild.
    pub const GUILD_MEMBER_REMOVE: &str = "GUILD_MEMBER_REMOVE";
    /// One chunk of a member request.
    pub const GUILD_MEMBERS_CHUNK: &str = "GUILD_MEMBERS_CHUNK";
    /// A role was created.
    pub const GUILD_ROLE_CREATE: &str = "GUILD_ROLE_CREATE";
    /// A role changed.
    pub const GUILD_ROLE_UPDATE: &str = "GUILD_ROLE_UPDATE";
    /// A role was deleted.
    pub const GUILD_ROLE_DELETE: &str = "GUILD_ROLE_DELETE";
    /// A channel was created.
    pub const CHANNEL_CREATE: &str = "CHANNEL_CREATE";
    /// A channel changed.
    pub const CHANNEL_UPDATE: &str = "CHANNEL_UPDATE";
    /// A channel was deleted.
    pub const CHANNEL_DELETE: &str = "CHANNEL_DELETE";
    /// The guild's emoji list was replaced.
    pub const GUILD_EMOJIS_UPDATE: &str = "GUILD_EMOJIS_UPDATE";
    /// The connected user changed.
    pub const USER_UPDATE: &str = "USER_UPDATE";
    /// A user's presence changed.
    pub const PRESENCE_UPDATE: &str = "PRESENCE_UPDATE";
    /// A user's voice state changed.
    pub const VOICE_STATE_UPDATE: &str = "VOICE_STATE_UPDATE";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_semver() {
        let parts: Vec<&str> = VERSION.split('.').collect();
        assert_eq!(parts.len(), 3, "VERSION must be semver (MAJOR.MINOR.PATCH)");
        for part in parts {
            let _: u32 = part.parse().expect("each semver segment must be a number");
        }
    }

    #[test]
    fn fatal_and_resync_codes_are_disjoint() {
        for code in close_code::FATAL {
            assert!(!close_code::requires_resync(code));
        }
        assert!(close_code::is_fatal(4004));
        assert!(close_code::requires_resync(4009));
        assert!(!close_code::is_fatal(1000));
        assert!(!close_code::requires_resync(4000));
    }
}
