//! `SQLite` schema definitions for the user registry.

/// SQL statement to create the roles table.
pub const CREATE_ROLES_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS roles (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE
)
";

/// SQL statement to create the users table.
///
/// `username` uses the default `BINARY` collation, so uniqueness and lookups
/// are case-sensitive.
pub const CREATE_USERS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    username TEXT NOT NULL UNIQUE,
    record_number TEXT NOT NULL,
    email TEXT,
    role_id INTEGER REFERENCES roles(id),
    created_at TEXT NOT NULL
)
";

/// SQL statement to create an index on `role_id` for role lookups.
pub const CREATE_ROLE_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_users_role ON users(role_id)
";

/// SQL statement to create the metadata table for storing key-value pairs.
pub const CREATE_METADATA_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
";

/// All schema creation statements in order.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    CREATE_ROLES_TABLE,
    CREATE_USERS_TABLE,
    CREATE_ROLE_INDEX,
    CREATE_METADATA_TABLE,
];
