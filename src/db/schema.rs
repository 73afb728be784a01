//! Database schema and migrations for Tidedrive.
//!
//! This module contains all database migrations that will be applied
//! sequentially when the database is first opened or upgraded.

/// Database migrations.
///
/// Each migration is a SQL script that will be executed in order.
/// The schema_version table tracks which migrations have been applied.
pub const MIGRATIONS: &[&str] = &[
    // v1: Users table. Authentication lives outside this crate; this is the
    // registry sharing grants are resolved against.
    r#"
CREATE TABLE users (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    username    TEXT NOT NULL UNIQUE,
    email       TEXT,
    created_at  TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX idx_users_username ON users(username);
"#,
    // v2: Nodes table - one row per file or folder in a user's tree.
    // The tree is a parent-pointer arena: child sets are derived from
    // parent_id, so parent/child symmetry holds by construction.
    r#"
CREATE TABLE nodes (
    id          TEXT PRIMARY KEY,                   -- UUID v4, immutable
    owner_id    INTEGER NOT NULL REFERENCES users(id),
    name        TEXT NOT NULL,
    path        TEXT NOT NULL,                      -- materialized, root is '/'
    is_file     INTEGER NOT NULL DEFAULT 0,
    parent_id   TEXT REFERENCES nodes(id),          -- NULL only for the per-owner root
    is_deleted  INTEGER NOT NULL DEFAULT 0,
    version     INTEGER NOT NULL DEFAULT 0,         -- bumped on structural writes
    blob_id     TEXT,                               -- file-only: blob locator
    object_id   TEXT,                               -- file-only: store object handle
    filename    TEXT,                               -- file-only metadata
    mimetype    TEXT,
    size        INTEGER,
    uploaded_at TEXT,
    created_at  TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX idx_nodes_owner_path ON nodes(owner_id, path);
CREATE INDEX idx_nodes_parent_id ON nodes(parent_id);
CREATE INDEX idx_nodes_is_deleted ON nodes(is_deleted);
CREATE INDEX idx_nodes_owner_file ON nodes(owner_id, is_file, is_deleted);

-- At most one live root per owner
CREATE UNIQUE INDEX idx_nodes_owner_root ON nodes(owner_id)
    WHERE parent_id IS NULL AND is_deleted = 0;
"#,
    // v3: Collaborators table - per-node sharing grants, unique by user.
    r#"
CREATE TABLE collaborators (
    node_id      TEXT NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
    user_id      INTEGER NOT NULL REFERENCES users(id),
    access_level TEXT NOT NULL,                     -- 'read', 'write', 'admin'
    added_at     TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (node_id, user_id)
);

CREATE INDEX idx_collaborators_user_id ON collaborators(user_id);
"#,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_not_empty() {
        assert!(!MIGRATIONS.is_empty());
    }

    #[test]
    fn test_migrations_contain_core_tables() {
        let all: String = MIGRATIONS.concat();
        assert!(all.contains("CREATE TABLE users"));
        assert!(all.contains("CREATE TABLE nodes"));
        assert!(all.contains("CREATE TABLE collaborators"));
    }
}
