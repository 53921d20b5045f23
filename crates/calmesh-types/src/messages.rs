//! Queue message envelopes
//!
//! All queues are at-least-once; consumers are idempotent. Sync messages are
//! deduplicated by cursor monotonicity and per-event version; write messages
//! carry a content-derived `idempotency_key`.

use serde::{Deserialize, Serialize};

use crate::event::ProjectedPayload;
use crate::identity::{AccountId, CanonicalEventId};

/// Why a full sync was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncReason {
    Onboarding,
    Token410,
    Manual,
}

impl SyncReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Onboarding => "onboarding",
            Self::Token410 => "token_410",
            Self::Manual => "manual",
        }
    }
}

/// Messages on the sync queue
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SyncMessage {
    /// Act on a provider webhook ping
    #[serde(rename = "SYNC_INCREMENTAL")]
    Incremental {
        account_id: AccountId,
        #[serde(skip_serializing_if = "Option::is_none")]
        channel_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        resource_id: Option<String>,
        ping_ts: i64,
        #[serde(skip_serializing_if = "Option::is_none")]
        calendar_id: Option<String>,
    },
    /// Rebuild the sync cursor from scratch
    #[serde(rename = "SYNC_FULL")]
    Full {
        account_id: AccountId,
        reason: SyncReason,
    },
}

impl SyncMessage {
    pub fn account_id(&self) -> AccountId {
        match self {
            Self::Incremental { account_id, .. } | Self::Full { account_id, .. } => *account_id,
        }
    }
}

/// Messages on the write queue
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WriteMessage {
    #[serde(rename = "UPSERT_MIRROR")]
    UpsertMirror {
        canonical_event_id: CanonicalEventId,
        target_account_id: AccountId,
        target_calendar_id: String,
        projected_payload: ProjectedPayload,
        idempotency_key: String,
    },
    #[serde(rename = "DELETE_MIRROR")]
    DeleteMirror {
        canonical_event_id: CanonicalEventId,
        target_account_id: AccountId,
        provider_event_id: String,
        idempotency_key: String,
    },
}

impl WriteMessage {
    pub fn target_account_id(&self) -> AccountId {
        match self {
            Self::UpsertMirror {
                target_account_id, ..
            }
            | Self::DeleteMirror {
                target_account_id, ..
            } => *target_account_id,
        }
    }

    pub fn idempotency_key(&self) -> &str {
        match self {
            Self::UpsertMirror {
                idempotency_key, ..
            }
            | Self::DeleteMirror {
                idempotency_key, ..
            } => idempotency_key,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_message_tag() {
        let msg = SyncMessage::Full {
            account_id: AccountId::new(),
            reason: SyncReason::Token410,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "SYNC_FULL");
        assert_eq!(json["reason"], "token_410");
    }

    #[test]
    fn test_write_message_round_trip() {
        let msg = WriteMessage::DeleteMirror {
            canonical_event_id: CanonicalEventId::new(),
            target_account_id: AccountId::new(),
            provider_event_id: "g1".into(),
            idempotency_key: "abc".into(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"DELETE_MIRROR\""));
        let back: WriteMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back.idempotency_key(), "abc");
    }
}
