//! SQL migration definitions for the cogreader database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Initial schema: summary_cache",
            sql: r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Summarizer response cache
CREATE TABLE IF NOT EXISTS summary_cache (
    id          TEXT PRIMARY KEY,
    prompt_hash TEXT NOT NULL,
    model_id    TEXT NOT NULL,
    task        TEXT NOT NULL,
    result_json TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    UNIQUE(prompt_hash, model_id)
);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
        Migration {
            version: 2,
            description: "Reading run history",
            sql: r#"
CREATE TABLE IF NOT EXISTS reading_runs (
    id             TEXT PRIMARY KEY,
    source         TEXT NOT NULL,
    title          TEXT NOT NULL,
    passes         INTEGER NOT NULL,
    model_id       TEXT NOT NULL,
    started_at     TEXT NOT NULL,
    finished_at    TEXT,
    section_count  INTEGER,
    degraded_count INTEGER
);

CREATE INDEX IF NOT EXISTS idx_reading_runs_started ON reading_runs(started_at);

INSERT INTO schema_migrations (version) VALUES (2);
"#,
        },
    ]
}
