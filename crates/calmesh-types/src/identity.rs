//! Identity types for CalMesh
//!
//! All identity types are strongly typed wrappers around ULIDs with a typed
//! prefix (`acc_`, `usr_`, `evt_`, ...) to prevent accidental mixing of
//! different ID types. The prefixed form is the wire and storage format.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// Error returned when parsing a prefixed ID fails
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdParseError {
    pub expected_prefix: &'static str,
    pub input: String,
}

impl fmt::Display for IdParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid {}-prefixed id: {:?}",
            self.expected_prefix, self.input
        )
    }
}

impl std::error::Error for IdParseError {}

/// Macro to generate ID types with common implementations
macro_rules! define_id_type {
    ($name:ident, $prefix:literal, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub Ulid);

        impl $name {
            /// Generate a new random ID
            pub fn new() -> Self {
                Self(Ulid::new())
            }

            /// The typed prefix, without the trailing underscore
            pub const PREFIX: &'static str = $prefix;

            /// Parse from a string (with or without prefix)
            pub fn parse(s: &str) -> Result<Self, IdParseError> {
                let raw = s.strip_prefix(concat!($prefix, "_")).unwrap_or(s);
                Ulid::from_string(raw)
                    .map(Self)
                    .map_err(|_| IdParseError {
                        expected_prefix: $prefix,
                        input: s.to_string(),
                    })
            }

            /// Get the inner ULID
            pub fn as_ulid(&self) -> &Ulid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}_{}", $prefix, self.0)
            }
        }

        impl FromStr for $name {
            type Err = IdParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                Self::parse(&s).map_err(de::Error::custom)
            }
        }
    };
}

// Entity identity types
define_id_type!(AccountId, "acc", "Unique identifier for a linked provider account");
define_id_type!(UserId, "usr", "Unique identifier for a CalMesh user");
define_id_type!(CanonicalEventId, "evt", "Unique identifier for a canonical event");
define_id_type!(MirrorId, "mir", "Unique identifier for a mirror projection");
define_id_type!(CalendarId, "cal", "Unique identifier for a tracked calendar");

// Scheduling identity types
define_id_type!(SessionId, "ses", "Unique identifier for a scheduling session");
define_id_type!(CandidateId, "cnd", "Unique identifier for a scored candidate slot");
define_id_type!(HoldId, "hld", "Unique identifier for a tentative hold");
define_id_type!(PolicyId, "pol", "Unique identifier for a projection policy");
define_id_type!(VipId, "vip", "Unique identifier for a VIP policy");
define_id_type!(ConstraintId, "con", "Unique identifier for a scheduling constraint");

// Infrastructure identity types
define_id_type!(ChannelId, "chn", "Unique identifier for a Google watch channel");
define_id_type!(SubscriptionId, "sub", "Unique identifier for a Microsoft Graph subscription");
define_id_type!(JournalId, "jnl", "Unique identifier for an event journal entry");

/// External calendar provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Google,
    Microsoft,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Google => "google",
            Self::Microsoft => "microsoft",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "google" => Some(Self::Google),
            "microsoft" => Some(Self::Microsoft),
            _ => None,
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefixed_display_and_parse() {
        let id = AccountId::new();
        let s = id.to_string();
        assert!(s.starts_with("acc_"));
        assert_eq!(AccountId::parse(&s).unwrap(), id);
        // Bare ULID also parses
        assert_eq!(AccountId::parse(&id.0.to_string()).unwrap(), id);
    }

    #[test]
    fn test_wrong_prefix_rejected() {
        let id = UserId::new();
        assert!(AccountId::parse(&id.to_string()).is_err());
    }

    #[test]
    fn test_serde_round_trip() {
        let id = CanonicalEventId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id));
        let back: CanonicalEventId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_provider_round_trip() {
        assert_eq!(Provider::parse("google"), Some(Provider::Google));
        assert_eq!(Provider::Microsoft.as_str(), "microsoft");
        let json = serde_json::to_string(&Provider::Google).unwrap();
        assert_eq!(json, "\"google\"");
    }
}
