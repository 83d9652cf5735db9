//! Credential database layout.
//!
//! Each entry of [`MIGRATIONS`] moves the schema one version forward; the
//! current version lives in SQLite's `user_version` header field.

pub const MIGRATIONS: &[&str] = &[
    // 1: one row at most, since the process manages a single session.
    "CREATE TABLE credentials (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        material TEXT NOT NULL,
        encrypted INTEGER NOT NULL DEFAULT 0,
        updated_at TEXT NOT NULL
    );",
];

pub const PRAGMAS: &str = "
PRAGMA journal_mode = WAL;
PRAGMA busy_timeout = 5000;
PRAGMA synchronous = NORMAL;
";

pub fn latest_version() -> u32 {
    MIGRATIONS.len() as u32
}
