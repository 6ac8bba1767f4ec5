//! SQL migration definitions for the docweave instance database.
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
    vec![Migration {
        version: 1,
        description: "Initial schema: instances keyed by (category, slug)",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Slug -> instance id, per category
CREATE TABLE IF NOT EXISTS instances (
    category   TEXT NOT NULL,
    slug       TEXT NOT NULL,
    id         TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (category, slug)
);

CREATE INDEX IF NOT EXISTS idx_instances_id ON instances(id);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
