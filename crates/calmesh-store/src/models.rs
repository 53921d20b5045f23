//! Row types bridging SQLite and the domain model
//!
//! Rows hold raw column types; `TryFrom` conversions reject corrupt enum or
//! id values with a `Storage` error rather than panicking.

use sqlx::FromRow;

use calmesh_types::*;

pub(crate) fn corrupt(field: &str, value: &str) -> CalError {
    CalError::Storage(format!("corrupt {field} value {value:?}"))
}

pub(crate) fn parse_id<T: std::str::FromStr>(field: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| corrupt(field, value))
}

#[derive(Debug, FromRow)]
pub struct AccountRow {
    pub account_id: String,
    pub user_id: String,
    pub provider: String,
    pub provider_subject: String,
    pub email: String,
    pub status: String,
    pub created_at: i64,
}

impl TryFrom<AccountRow> for AccountRecord {
    type Error = CalError;

    fn try_from(row: AccountRow) -> Result<Self> {
        Ok(Self {
            account_id: parse_id("account_id", &row.account_id)?,
            user_id: parse_id("user_id", &row.user_id)?,
            provider: Provider::parse(&row.provider)
                .ok_or_else(|| corrupt("provider", &row.provider))?,
            provider_subject: row.provider_subject,
            email: row.email,
            status: AccountStatus::parse(&row.status)
                .ok_or_else(|| corrupt("status", &row.status))?,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct SyncStateRow {
    pub sync_token: Option<String>,
    pub last_success_ts: Option<i64>,
    pub last_sync_ts: Option<i64>,
    pub last_failure_reason: Option<String>,
}

impl From<SyncStateRow> for SyncState {
    fn from(row: SyncStateRow) -> Self {
        Self {
            sync_token: row.sync_token,
            last_success_ts: row.last_success_ts,
            last_sync_ts: row.last_sync_ts,
            last_failure_reason: row.last_failure_reason,
        }
    }
}

#[derive(Debug, FromRow)]
pub struct WatchChannelRow {
    pub channel_id: String,
    pub account_id: String,
    pub calendar_id: String,
    pub resource_id: String,
    pub expiry: i64,
    pub status: String,
}

impl TryFrom<WatchChannelRow> for WatchChannel {
    type Error = CalError;

    fn try_from(row: WatchChannelRow) -> Result<Self> {
        Ok(Self {
            channel_id: row.channel_id,
            account_id: parse_id("account_id", &row.account_id)?,
            calendar_id: row.calendar_id,
            resource_id: row.resource_id,
            expiry: row.expiry,
            status: row.status,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct MsSubscriptionRow {
    pub subscription_id: String,
    pub account_id: String,
    pub resource: String,
    pub client_state: String,
    pub expiry: i64,
    pub status: String,
}

impl TryFrom<MsSubscriptionRow> for MsSubscription {
    type Error = CalError;

    fn try_from(row: MsSubscriptionRow) -> Result<Self> {
        Ok(Self {
            subscription_id: row.subscription_id,
            account_id: parse_id("account_id", &row.account_id)?,
            resource: row.resource,
            client_state: row.client_state,
            expiry: row.expiry,
            status: row.status,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct EncryptionMonitorRow {
    pub failure_count: i64,
    pub last_success_ts: Option<i64>,
    pub last_failure_ts: Option<i64>,
    pub last_failure_error: Option<String>,
}

impl From<EncryptionMonitorRow> for EncryptionHealth {
    fn from(row: EncryptionMonitorRow) -> Self {
        Self {
            failure_count: row.failure_count,
            last_success_ts: row.last_success_ts,
            last_failure_ts: row.last_failure_ts,
            last_failure_error: row.last_failure_error,
        }
    }
}

#[derive(Debug, FromRow)]
pub struct CanonicalEventRow {
    pub canonical_event_id: String,
    pub user_id: String,
    pub origin_account_id: String,
    pub origin_event_id: String,
    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start_ts: i64,
    pub end_ts: i64,
    pub all_day: bool,
    pub status: String,
    pub visibility: Option<String>,
    pub transparency: String,
    pub recurrence_rule: Option<String>,
    pub source: String,
    pub version: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl TryFrom<CanonicalEventRow> for CanonicalEvent {
    type Error = CalError;

    fn try_from(row: CanonicalEventRow) -> Result<Self> {
        Ok(Self {
            canonical_event_id: parse_id("canonical_event_id", &row.canonical_event_id)?,
            user_id: parse_id("user_id", &row.user_id)?,
            origin_account_id: parse_id("origin_account_id", &row.origin_account_id)?,
            origin_event_id: row.origin_event_id,
            title: row.title,
            description: row.description,
            location: row.location,
            start: row.start_ts,
            end: row.end_ts,
            all_day: row.all_day,
            status: EventStatus::parse(&row.status)
                .ok_or_else(|| corrupt("status", &row.status))?,
            visibility: row.visibility,
            transparency: Transparency::parse(&row.transparency)
                .ok_or_else(|| corrupt("transparency", &row.transparency))?,
            recurrence_rule: row.recurrence_rule,
            source: EventSource::parse(&row.source)
                .ok_or_else(|| corrupt("source", &row.source))?,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct MirrorRow {
    pub canonical_event_id: String,
    pub target_account_id: String,
    pub target_calendar_id: String,
    pub provider_event_id: Option<String>,
    pub last_projected_hash: Option<String>,
    pub last_write_ts: Option<i64>,
    pub state: String,
    pub error_message: Option<String>,
}

impl TryFrom<MirrorRow> for Mirror {
    type Error = CalError;

    fn try_from(row: MirrorRow) -> Result<Self> {
        Ok(Self {
            canonical_event_id: parse_id("canonical_event_id", &row.canonical_event_id)?,
            target_account_id: parse_id("target_account_id", &row.target_account_id)?,
            target_calendar_id: row.target_calendar_id,
            provider_event_id: row.provider_event_id,
            last_projected_hash: row.last_projected_hash,
            last_write_ts: row.last_write_ts,
            state: MirrorState::parse(&row.state).ok_or_else(|| corrupt("state", &row.state))?,
            error_message: row.error_message,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct PolicyRow {
    pub policy_id: String,
    pub user_id: String,
    pub name: String,
    pub is_default: bool,
    pub created_at: i64,
}

impl TryFrom<PolicyRow> for Policy {
    type Error = CalError;

    fn try_from(row: PolicyRow) -> Result<Self> {
        Ok(Self {
            policy_id: parse_id("policy_id", &row.policy_id)?,
            user_id: parse_id("user_id", &row.user_id)?,
            name: row.name,
            is_default: row.is_default,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct PolicyEdgeRow {
    pub from_account_id: String,
    pub to_account_id: String,
    pub detail_level: String,
    pub calendar_kind: String,
}

impl TryFrom<PolicyEdgeRow> for PolicyEdge {
    type Error = CalError;

    fn try_from(row: PolicyEdgeRow) -> Result<Self> {
        Ok(Self {
            from_account_id: parse_id("from_account_id", &row.from_account_id)?,
            to_account_id: parse_id("to_account_id", &row.to_account_id)?,
            detail_level: DetailLevel::parse(&row.detail_level)
                .ok_or_else(|| corrupt("detail_level", &row.detail_level))?,
            calendar_kind: CalendarKind::parse(&row.calendar_kind)
                .ok_or_else(|| corrupt("calendar_kind", &row.calendar_kind))?,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct SessionRow {
    pub session_id: String,
    pub user_id: String,
    pub status: String,
    pub objective_json: String,
    pub created_at: i64,
    pub committed_candidate_id: Option<String>,
    pub committed_event_id: Option<String>,
}

impl TryFrom<SessionRow> for SchedulingSession {
    type Error = CalError;

    fn try_from(row: SessionRow) -> Result<Self> {
        Ok(Self {
            session_id: parse_id("session_id", &row.session_id)?,
            user_id: parse_id("user_id", &row.user_id)?,
            status: SessionStatus::parse(&row.status)
                .ok_or_else(|| corrupt("status", &row.status))?,
            objective: serde_json::from_str(&row.objective_json)?,
            created_at: row.created_at,
            committed_candidate_id: row
                .committed_candidate_id
                .as_deref()
                .map(|s| parse_id("committed_candidate_id", s))
                .transpose()?,
            committed_event_id: row
                .committed_event_id
                .as_deref()
                .map(|s| parse_id("committed_event_id", s))
                .transpose()?,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct CandidateRow {
    pub candidate_id: String,
    pub session_id: String,
    pub start_ts: i64,
    pub end_ts: i64,
    pub score: i64,
    pub explanation: String,
    pub status: String,
}

impl TryFrom<CandidateRow> for Candidate {
    type Error = CalError;

    fn try_from(row: CandidateRow) -> Result<Self> {
        Ok(Self {
            candidate_id: parse_id("candidate_id", &row.candidate_id)?,
            session_id: parse_id("session_id", &row.session_id)?,
            start: row.start_ts,
            end: row.end_ts,
            score: row.score,
            explanation: row.explanation,
            status: CandidateStatus::parse(&row.status)
                .ok_or_else(|| corrupt("status", &row.status))?,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct HoldRow {
    pub hold_id: String,
    pub session_id: String,
    pub account_id: String,
    pub provider_event_id: Option<String>,
    pub expires_at: i64,
    pub status: String,
}

impl TryFrom<HoldRow> for Hold {
    type Error = CalError;

    fn try_from(row: HoldRow) -> Result<Self> {
        Ok(Self {
            hold_id: parse_id("hold_id", &row.hold_id)?,
            session_id: parse_id("session_id", &row.session_id)?,
            account_id: parse_id("account_id", &row.account_id)?,
            provider_event_id: row.provider_event_id,
            expires_at: row.expires_at,
            status: HoldStatus::parse(&row.status)
                .ok_or_else(|| corrupt("status", &row.status))?,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct ConstraintRow {
    pub constraint_id: String,
    pub user_id: String,
    pub kind: String,
    pub config_json: String,
    pub active_from: Option<i64>,
    pub active_to: Option<i64>,
}

impl TryFrom<ConstraintRow> for Constraint {
    type Error = CalError;

    fn try_from(row: ConstraintRow) -> Result<Self> {
        Ok(Self {
            constraint_id: parse_id("constraint_id", &row.constraint_id)?,
            user_id: parse_id("user_id", &row.user_id)?,
            kind: ConstraintKind::parse(&row.kind).ok_or_else(|| corrupt("kind", &row.kind))?,
            config: serde_json::from_str(&row.config_json)?,
            active_from: row.active_from,
            active_to: row.active_to,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct VipRow {
    pub vip_id: String,
    pub user_id: String,
    pub participant_hash: String,
    pub display_name: String,
    pub priority_weight: f64,
    pub conditions_json: String,
}

impl TryFrom<VipRow> for VipPolicy {
    type Error = CalError;

    fn try_from(row: VipRow) -> Result<Self> {
        Ok(Self {
            vip_id: parse_id("vip_id", &row.vip_id)?,
            user_id: parse_id("user_id", &row.user_id)?,
            participant_hash: row.participant_hash,
            display_name: row.display_name,
            priority_weight: row.priority_weight,
            conditions: serde_json::from_str(&row.conditions_json)?,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct ParticipantStatsRow {
    pub participant_hash: String,
    pub sessions_participated: i64,
    pub sessions_preferred: i64,
    pub last_session_ts: i64,
}

impl From<ParticipantStatsRow> for ParticipantStats {
    fn from(row: ParticipantStatsRow) -> Self {
        Self {
            participant_hash: row.participant_hash,
            sessions_participated: row.sessions_participated,
            sessions_preferred: row.sessions_preferred,
            last_session_ts: row.last_session_ts,
        }
    }
}

#[derive(Debug, FromRow)]
pub struct JournalRow {
    pub journal_id: String,
    pub user_id: String,
    pub canonical_event_id: Option<String>,
    pub ts: i64,
    pub actor: String,
    pub change_type: String,
    pub patch_json: Option<String>,
    pub reason: Option<String>,
}

impl TryFrom<JournalRow> for JournalEntry {
    type Error = CalError;

    fn try_from(row: JournalRow) -> Result<Self> {
        Ok(Self {
            journal_id: parse_id("journal_id", &row.journal_id)?,
            user_id: parse_id("user_id", &row.user_id)?,
            canonical_event_id: row
                .canonical_event_id
                .as_deref()
                .map(|s| parse_id("canonical_event_id", s))
                .transpose()?,
            ts: row.ts,
            actor: row.actor,
            change_type: row.change_type,
            patch: row
                .patch_json
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            reason: row.reason,
        })
    }
}
