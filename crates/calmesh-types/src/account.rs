//! Linked-account records and per-account actor state

use serde::{Deserialize, Serialize};

use crate::identity::{AccountId, Provider, UserId};

/// Lifecycle status of a linked account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Active,
    Revoked,
    Unlinked,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Revoked => "revoked",
            Self::Unlinked => "unlinked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "revoked" => Some(Self::Revoked),
            "unlinked" => Some(Self::Unlinked),
            _ => None,
        }
    }
}

/// One linked provider account, owned by the registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountRecord {
    pub account_id: AccountId,
    pub user_id: UserId,
    pub provider: Provider,
    pub provider_subject: String,
    pub email: String,
    pub status: AccountStatus,
    pub created_at: i64,
}

/// Per-account sync cursor and outcome tracking
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_success_ts: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync_ts: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure_reason: Option<String>,
}

/// An active Google watch channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchChannel {
    pub channel_id: String,
    pub account_id: AccountId,
    pub calendar_id: String,
    pub resource_id: String,
    pub expiry: i64,
    pub status: String,
}

/// An active Microsoft Graph subscription
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MsSubscription {
    pub subscription_id: String,
    pub account_id: AccountId,
    pub resource: String,
    pub client_state: String,
    pub expiry: i64,
    pub status: String,
}

/// Envelope decrypt monitoring snapshot; `failure_count > 0` is alertable
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EncryptionHealth {
    pub failure_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_success_ts: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure_ts: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure_error: Option<String>,
}

/// Full account-actor health snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountHealth {
    pub account_id: AccountId,
    pub provider: Provider,
    pub has_tokens: bool,
    pub sync: SyncState,
    pub watch_channels: usize,
    pub ms_subscriptions: usize,
    pub encryption: EncryptionHealth,
}
