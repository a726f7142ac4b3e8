//! Core identifier types with validation.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Validation errors for core types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Snowflake identifiers are never zero.
    #[error("{field} cannot be zero")]
    Zero { field: &'static str },

    /// The value could not be parsed as an unsigned integer.
    #[error("invalid {field}: {value}")]
    NotANumber { field: &'static str, value: String },

    /// Unknown enum value in configuration or storage.
    #[error("invalid {field}: {value}")]
    UnknownVariant { field: &'static str, value: String },
}

/// Generates a validated snowflake ID newtype with common trait implementations.
macro_rules! define_snowflake_id {
    (
        $(#[$meta:meta])*
        $name:ident, $field_name:literal
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "u64", into = "u64")]
        pub struct $name(u64);

        impl $name {
            /// Creates a new ID after validation.
            pub const fn new(id: u64) -> Result<Self, ValidationError> {
                if id == 0 {
                    return Err(ValidationError::Zero { field: $field_name });
                }
                Ok(Self(id))
            }

            /// Returns the raw snowflake value.
            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl TryFrom<u64> for $name {
            type Error = ValidationError;

            fn try_from(value: u64) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for u64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl std::str::FromStr for $name {
            type Err = ValidationError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let value = s.trim().parse::<u64>().map_err(|_| ValidationError::NotANumber {
                    field: $field_name,
                    value: s.to_string(),
                })?;
                Self::new(value)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_snowflake_id!(
    /// A voice or text channel identifier.
    ChannelId, "channel ID"
);

define_snowflake_id!(
    /// A user (participant) identifier.
    UserId, "user ID"
);

define_snowflake_id!(
    /// A guild (server) identifier.
    GuildId, "guild ID"
);

define_snowflake_id!(
    /// A channel category identifier.
    CategoryId, "category ID"
);

/// Mute/deafen status attached to a presence interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct VoiceStatus {
    pub mute: bool,
    pub deaf: bool,
}

impl VoiceStatus {
    /// Unmuted and undeafened.
    pub const ACTIVE: Self = Self {
        mute: false,
        deaf: false,
    };

    #[must_use]
    pub const fn new(mute: bool, deaf: bool) -> Self {
        Self { mute, deaf }
    }
}

/// The parts of a guild member needed to produce a display label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberProfile {
    pub id: UserId,
    pub username: String,
    /// Server nickname or global display name, if the member has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl MemberProfile {
    /// Nickname or global name, falling back to the username.
    pub fn effective_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.username)
    }
}

/// The parts of a voice channel needed to produce a label and resolve its rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelProfile {
    pub id: ChannelId,
    pub name: String,
    pub guild_id: GuildId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_id: Option<CategoryId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_reject_zero() {
        assert_eq!(
            ChannelId::new(0),
            Err(ValidationError::Zero {
                field: "channel ID"
            })
        );
        assert!(UserId::new(42).is_ok());
    }

    #[test]
    fn ids_parse_from_strings() {
        let id: ChannelId = "1234567890123".parse().unwrap();
        assert_eq!(id.get(), 1_234_567_890_123);
        assert!(matches!(
            "abc".parse::<ChannelId>(),
            Err(ValidationError::NotANumber { .. })
        ));
    }

    #[test]
    fn ids_deserialize_with_validation() {
        let parsed: UserId = serde_json::from_str("17").unwrap();
        assert_eq!(parsed.get(), 17);
        assert!(serde_json::from_str::<UserId>("0").is_err());
    }

    #[test]
    fn effective_name_prefers_display_name() {
        let mut member = MemberProfile {
            id: UserId::new(1).unwrap(),
            username: "alice".to_string(),
            display_name: None,
        };
        assert_eq!(member.effective_name(), "alice");
        member.display_name = Some("Alice A.".to_string());
        assert_eq!(member.effective_name(), "Alice A.");
    }
}
