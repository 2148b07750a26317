//! DDL for the relational ledger backends
//!
//! Both dialects carry the same logical schema: `error_message` is nullable
//! and `checksum` is unique among rows that have not failed, so a failed
//! remediation can be staged again under an attempt-suffixed id.

pub(crate) const SQLITE: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS actions (
        id TEXT PRIMARY KEY,
        resource_id TEXT NOT NULL,
        action_kind TEXT NOT NULL,
        status TEXT NOT NULL,
        checksum TEXT NOT NULL,
        payload TEXT NOT NULL,
        risk_score REAL NOT NULL,
        estimated_savings REAL NOT NULL,
        created_at TEXT NOT NULL,
        started_at TEXT,
        completed_at TEXT,
        error_message TEXT
    )
    "#,
    "DROP INDEX IF EXISTS idx_actions_checksum",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_actions_checksum_live ON actions(checksum) WHERE status <> 'failed'",
    "CREATE INDEX IF NOT EXISTS idx_actions_checksum_all ON actions(checksum)",
    "CREATE INDEX IF NOT EXISTS idx_actions_status ON actions(status)",
    "CREATE INDEX IF NOT EXISTS idx_actions_resource_id ON actions(resource_id)",
    "CREATE INDEX IF NOT EXISTS idx_actions_created_at ON actions(created_at)",
    r#"
    CREATE TABLE IF NOT EXISTS savings_events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        action_id TEXT NOT NULL REFERENCES actions(id),
        resource_id TEXT NOT NULL,
        kind TEXT NOT NULL,
        estimated REAL NOT NULL,
        actual REAL,
        created_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_savings_action_id ON savings_events(action_id)",
];

pub(crate) const POSTGRES: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS actions (
        id TEXT PRIMARY KEY,
        resource_id TEXT NOT NULL,
        action_kind TEXT NOT NULL,
        status TEXT NOT NULL,
        checksum TEXT NOT NULL,
        payload JSONB NOT NULL,
        risk_score DOUBLE PRECISION NOT NULL,
        estimated_savings DOUBLE PRECISION NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        started_at TIMESTAMPTZ,
        completed_at TIMESTAMPTZ,
        error_message TEXT
    )
    "#,
    "DROP INDEX IF EXISTS idx_actions_checksum",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_actions_checksum_live ON actions(checksum) WHERE status <> 'failed'",
    "CREATE INDEX IF NOT EXISTS idx_actions_checksum_all ON actions(checksum)",
    "CREATE INDEX IF NOT EXISTS idx_actions_status ON actions(status)",
    "CREATE INDEX IF NOT EXISTS idx_actions_resource_id ON actions(resource_id)",
    "CREATE INDEX IF NOT EXISTS idx_actions_created_at ON actions(created_at)",
    r#"
    CREATE TABLE IF NOT EXISTS savings_events (
        id BIGSERIAL PRIMARY KEY,
        action_id TEXT NOT NULL REFERENCES actions(id),
        resource_id TEXT NOT NULL,
        kind TEXT NOT NULL,
        estimated DOUBLE PRECISION NOT NULL,
        actual DOUBLE PRECISION,
        created_at TIMESTAMPTZ NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_savings_action_id ON savings_events(action_id)",
];

/// Learning outcomes; shared by the learning store backends
pub(crate) const SQLITE_OUTCOMES: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS outcomes (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        action_id TEXT NOT NULL UNIQUE,
        resource_id TEXT NOT NULL,
        kind TEXT NOT NULL,
        risk_score REAL NOT NULL,
        actual_savings REAL NOT NULL,
        success INTEGER NOT NULL,
        created_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_outcomes_resource_id ON outcomes(resource_id)",
];

pub(crate) const POSTGRES_OUTCOMES: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS outcomes (
        seq BIGSERIAL,
        action_id TEXT PRIMARY KEY,
        resource_id TEXT NOT NULL,
        kind TEXT NOT NULL,
        risk_score DOUBLE PRECISION NOT NULL,
        actual_savings DOUBLE PRECISION NOT NULL,
        success BOOLEAN NOT NULL,
        created_at TIMESTAMPTZ NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_outcomes_resource_id ON outcomes(resource_id)",
];
