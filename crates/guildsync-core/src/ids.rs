//! Branded snowflake ID newtypes.
//!
//! Every remote object is keyed by a 64-bit snowflake. Each entity kind gets a
//! distinct newtype so a role id can't be passed where a guild id is expected.
//!
//! On the wire snowflakes are decimal strings; numbers are accepted as well.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Milliseconds between the Unix epoch and the snowflake epoch (2015-01-01).
pub const SNOWFLAKE_EPOCH_MS: u64 = 1_420_070_400_000;

/// A raw 64-bit snowflake.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Snowflake(u64);

impl Snowflake {
    /// Wrap a raw value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// The raw value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Creation time in milliseconds since the Unix epoch.
    #[must_use]
    pub const fn timestamp_ms(self) -> u64 {
        (self.0 >> 22) + SNOWFLAKE_EPOCH_MS
    }

    /// Creation time as a UTC datetime.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn created_at(self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.timestamp_ms() as i64)
            .single()
            .unwrap_or_default()
    }
}

impl fmt::Display for Snowflake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Snowflake {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

impl From<u64> for Snowflake {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl Serialize for Snowflake {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Snowflake {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct SnowflakeVisitor;

        impl Visitor<'_> for SnowflakeVisitor {
            type Value = Snowflake;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a snowflake as a decimal string or integer")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Snowflake, E> {
                Ok(Snowflake(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Snowflake, E> {
                u64::try_from(v)
                    .map(Snowflake)
                    .map_err(|_| E::custom("negative snowflake"))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Snowflake, E> {
                v.parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(SnowflakeVisitor)
    }
}

macro_rules! snowflake_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Snowflake);

        impl $name {
            /// Wrap a raw snowflake value.
            #[must_use]
            pub const fn new(value: u64) -> Self {
                Self(Snowflake::new(value))
            }

            /// The raw value.
            #[must_use]
            pub const fn get(self) -> u64 {
                self.0.get()
            }

            /// The underlying snowflake.
            #[must_use]
            pub const fn snowflake(self) -> Snowflake {
                self.0
            }

            /// Creation time derived from the snowflake.
            #[must_use]
            pub fn created_at(self) -> DateTime<Utc> {
                self.0.created_at()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.parse().map(Self)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self::new(value)
            }
        }

        impl From<Snowflake> for $name {
            fn from(value: Snowflake) -> Self {
                Self(value)
            }
        }
    };
}

snowflake_id! {
    /// Identifier of a guild.
    GuildId
}

snowflake_id! {
    /// Identifier of a user (also keys that user's member and presence records).
    UserId
}

snowflake_id! {
    /// Identifier of a channel.
    ChannelId
}

snowflake_id! {
    /// Identifier of a role. The `@everyone` role shares its guild's id.
    RoleId
}

snowflake_id! {
    /// Identifier of a custom emoji.
    EmojiId
}

impl From<GuildId> for RoleId {
    fn from(id: GuildId) -> Self {
        Self(id.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialize_from_string() {
        let id: GuildId = serde_json::from_str("\"175928847299117063\"").unwrap();
        assert_eq!(id.get(), 175_928_847_299_117_063);
    }

    #[test]
    fn deserialize_from_number() {
        let id: UserId = serde_json::from_str("42").unwrap();
        assert_eq!(id.get(), 42);
    }

    #[test]
    fn deserialize_rejects_garbage() {
        assert!(serde_json::from_str::<UserId>("\"abc\"").is_err());
        assert!(serde_json::from_str::<UserId>("-5").is_err());
        assert!(serde_json::from_str::<UserId>("true").is_err());
    }

    #[test]
    fn serializes_as_string() {
        let id = ChannelId::new(81_384_788_765_712_384);
        assert_eq!(
            serde_json::to_string(&id).unwrap(),
            "\"81384788765712384\""
        );
    }

    #[test]
    fn timestamp_derived_from_id() {
        // 175928847299117063 >> 22 = 41944705796, + epoch
        let id = Snowflake::new(175_928_847_299_117_063);
        assert_eq!(id.timestamp_ms(), 1_462_015_105_796);
        assert_eq!(id.created_at().timestamp_millis(), 1_462_015_105_796);
    }

    #[test]
    fn zero_id_is_epoch() {
        let id = GuildId::new(0);
        assert_eq!(id.created_at().timestamp_millis(), 1_420_070_400_000);
    }

    #[test]
    fn display_and_parse() {
        let id: RoleId = "12345".parse().unwrap();
        assert_eq!(id.to_string(), "12345");
    }

    #[test]
    fn default_role_shares_guild_id() {
        let guild = GuildId::new(99);
        assert_eq!(RoleId::from(guild).get(), 99);
    }
}
