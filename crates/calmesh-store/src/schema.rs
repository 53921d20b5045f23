//! SQLite schema
//!
//! Every statement is `IF NOT EXISTS`; the schema is applied lazily on
//! connect and is safe to re-apply across restarts.

/// Ordered DDL statements
pub const SCHEMA: &[&str] = &[
    // Registry: account -> user routing
    r#"
    CREATE TABLE IF NOT EXISTS accounts (
        account_id       TEXT PRIMARY KEY,
        user_id          TEXT NOT NULL,
        provider         TEXT NOT NULL,
        provider_subject TEXT NOT NULL,
        email            TEXT NOT NULL,
        status           TEXT NOT NULL DEFAULT 'active',
        created_at       INTEGER NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_accounts_user ON accounts(user_id)",
    // Encrypted token envelopes, one per account
    r#"
    CREATE TABLE IF NOT EXISTS account_auth (
        account_id TEXT PRIMARY KEY,
        envelope   TEXT NOT NULL,
        scopes     TEXT NOT NULL DEFAULT '',
        updated_at INTEGER NOT NULL
    )
    "#,
    // Sync cursor + outcome tracking, one per account
    r#"
    CREATE TABLE IF NOT EXISTS account_sync (
        account_id          TEXT PRIMARY KEY,
        sync_token          TEXT,
        last_success_ts     INTEGER,
        last_sync_ts        INTEGER,
        last_failure_reason TEXT
    )
    "#,
    // Google watch channels
    r#"
    CREATE TABLE IF NOT EXISTS watch_channels (
        channel_id  TEXT PRIMARY KEY,
        account_id  TEXT NOT NULL,
        calendar_id TEXT NOT NULL,
        resource_id TEXT NOT NULL,
        expiry      INTEGER NOT NULL,
        status      TEXT NOT NULL DEFAULT 'active'
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_channels_account ON watch_channels(account_id)",
    // Microsoft Graph subscriptions
    r#"
    CREATE TABLE IF NOT EXISTS ms_subscriptions (
        subscription_id TEXT PRIMARY KEY,
        account_id      TEXT NOT NULL,
        resource        TEXT NOT NULL,
        client_state    TEXT NOT NULL,
        expiry          INTEGER NOT NULL,
        status          TEXT NOT NULL DEFAULT 'active'
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_subscriptions_account ON ms_subscriptions(account_id)",
    // Enabled provider calendars per account
    r#"
    CREATE TABLE IF NOT EXISTS calendar_scopes (
        account_id  TEXT NOT NULL,
        calendar_id TEXT NOT NULL,
        enabled     INTEGER NOT NULL DEFAULT 1,
        PRIMARY KEY (account_id, calendar_id)
    )
    "#,
    // Envelope decrypt monitoring, one row per account
    r#"
    CREATE TABLE IF NOT EXISTS encryption_monitor (
        account_id         TEXT PRIMARY KEY,
        failure_count      INTEGER NOT NULL DEFAULT 0,
        last_success_ts    INTEGER,
        last_failure_ts    INTEGER,
        last_failure_error TEXT
    )
    "#,
    // Canonical events
    r#"
    CREATE TABLE IF NOT EXISTS canonical_events (
        canonical_event_id TEXT PRIMARY KEY,
        user_id            TEXT NOT NULL,
        origin_account_id  TEXT NOT NULL,
        origin_event_id    TEXT NOT NULL,
        title              TEXT NOT NULL,
        description        TEXT,
        location           TEXT,
        start_ts           INTEGER NOT NULL,
        end_ts             INTEGER NOT NULL,
        all_day            INTEGER NOT NULL DEFAULT 0,
        status             TEXT NOT NULL,
        visibility         TEXT,
        transparency       TEXT NOT NULL,
        recurrence_rule    TEXT,
        source             TEXT NOT NULL,
        version            INTEGER NOT NULL,
        created_at         INTEGER NOT NULL,
        updated_at         INTEGER NOT NULL,
        CHECK (end_ts >= start_ts)
    )
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS idx_canonical_origin
        ON canonical_events(origin_account_id, origin_event_id)
        WHERE source = 'provider'
    "#,
    "CREATE INDEX IF NOT EXISTS idx_canonical_user_start ON canonical_events(user_id, start_ts, canonical_event_id)",
    // Mirror projections
    r#"
    CREATE TABLE IF NOT EXISTS event_mirrors (
        canonical_event_id  TEXT NOT NULL,
        target_account_id   TEXT NOT NULL,
        target_calendar_id  TEXT NOT NULL,
        provider_event_id   TEXT,
        last_projected_hash TEXT,
        last_write_ts       INTEGER,
        state               TEXT NOT NULL,
        error_message       TEXT,
        PRIMARY KEY (canonical_event_id, target_account_id)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_mirrors_target ON event_mirrors(target_account_id, state)",
    // Projection policies
    r#"
    CREATE TABLE IF NOT EXISTS policies (
        policy_id  TEXT PRIMARY KEY,
        user_id    TEXT NOT NULL,
        name       TEXT NOT NULL,
        is_default INTEGER NOT NULL DEFAULT 0,
        created_at INTEGER NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_policies_user ON policies(user_id)",
    r#"
    CREATE TABLE IF NOT EXISTS policy_edges (
        policy_id       TEXT NOT NULL,
        from_account_id TEXT NOT NULL,
        to_account_id   TEXT NOT NULL,
        detail_level    TEXT NOT NULL,
        calendar_kind   TEXT NOT NULL,
        PRIMARY KEY (policy_id, from_account_id, to_account_id)
    )
    "#,
    // Scheduling sessions
    r#"
    CREATE TABLE IF NOT EXISTS scheduling_sessions (
        session_id             TEXT PRIMARY KEY,
        user_id                TEXT NOT NULL,
        status                 TEXT NOT NULL,
        objective_json         TEXT NOT NULL,
        created_at             INTEGER NOT NULL,
        committed_candidate_id TEXT,
        committed_event_id     TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_sessions_user ON scheduling_sessions(user_id, status)",
    r#"
    CREATE TABLE IF NOT EXISTS session_candidates (
        candidate_id TEXT PRIMARY KEY,
        session_id   TEXT NOT NULL,
        start_ts     INTEGER NOT NULL,
        end_ts       INTEGER NOT NULL,
        score        INTEGER NOT NULL,
        explanation  TEXT NOT NULL,
        status       TEXT NOT NULL DEFAULT 'proposed'
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_candidates_session ON session_candidates(session_id)",
    r#"
    CREATE TABLE IF NOT EXISTS session_holds (
        hold_id           TEXT PRIMARY KEY,
        session_id        TEXT NOT NULL,
        account_id        TEXT NOT NULL,
        provider_event_id TEXT,
        expires_at        INTEGER NOT NULL,
        status            TEXT NOT NULL DEFAULT 'held'
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_holds_session ON session_holds(session_id)",
    "CREATE INDEX IF NOT EXISTS idx_holds_status ON session_holds(status, expires_at)",
    // Scheduling constraints
    r#"
    CREATE TABLE IF NOT EXISTS constraints (
        constraint_id TEXT PRIMARY KEY,
        user_id       TEXT NOT NULL,
        kind          TEXT NOT NULL,
        config_json   TEXT NOT NULL,
        active_from   INTEGER,
        active_to     INTEGER
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_constraints_user ON constraints(user_id)",
    // VIP policies
    r#"
    CREATE TABLE IF NOT EXISTS vip_policies (
        vip_id           TEXT PRIMARY KEY,
        user_id          TEXT NOT NULL,
        participant_hash TEXT NOT NULL,
        display_name     TEXT NOT NULL,
        priority_weight  REAL NOT NULL,
        conditions_json  TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_vips_user ON vip_policies(user_id)",
    // Scheduling history
    r#"
    CREATE TABLE IF NOT EXISTS scheduling_history (
        session_id       TEXT NOT NULL,
        user_id          TEXT NOT NULL,
        participant_hash TEXT NOT NULL,
        got_preferred    INTEGER NOT NULL,
        scheduled_ts     INTEGER NOT NULL,
        PRIMARY KEY (session_id, participant_hash)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_history_participant ON scheduling_history(user_id, participant_hash)",
    // Event journal (append-only)
    r#"
    CREATE TABLE IF NOT EXISTS event_journal (
        journal_id         TEXT PRIMARY KEY,
        user_id            TEXT NOT NULL,
        canonical_event_id TEXT,
        ts                 INTEGER NOT NULL,
        actor              TEXT NOT NULL,
        change_type        TEXT NOT NULL,
        patch_json         TEXT,
        reason             TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_journal_user ON event_journal(user_id, journal_id)",
    "CREATE INDEX IF NOT EXISTS idx_journal_event ON event_journal(canonical_event_id)",
];
