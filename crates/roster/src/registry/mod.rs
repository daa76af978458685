//! User registry.
//!
//! The [`Registry`] trait is the seam the registration workflow depends on;
//! [`SqliteRegistry`] is the `SQLite`-backed implementation. Usernames are
//! unique at the store level, so two writers racing past the lookup cannot
//! both insert: the loser gets [`Error::Conflict`].

pub mod migrations;
pub mod schema;

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::user::{NewUser, Role, User};

/// Default time a writer waits on a locked database.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const USER_COLUMNS: &str = "id, username, record_number, email, role_id, created_at";

/// Lookup and creation of users, keyed by username.
pub trait Registry {
    /// Find a user by exact, case-sensitive username.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn find(&self, username: &str) -> Result<Option<User>>;

    /// Create and durably commit a new user.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Conflict`] if the username already exists, or a
    /// persistence error if the write or commit fails.
    fn create(&self, new_user: &NewUser) -> Result<User>;
}

/// `SQLite`-backed registry.
#[derive(Debug)]
pub struct SqliteRegistry {
    /// Path to the database file.
    path: PathBuf,
    /// Database connection.
    conn: Connection,
}

impl SqliteRegistry {
    /// Open or create a registry database at the given path.
    ///
    /// Creates the parent directories and database file if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or schema initialization fails.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        debug!("Opening registry at {}", path.display());
        let conn = Connection::open(&path).map_err(|source| Error::DatabaseOpen {
            path: path.clone(),
            source,
        })?;

        // WAL lets readers proceed while a registration is being written
        conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA foreign_keys=ON;",
        )?;

        // Create base schema
        migrations::initialize_schema(&conn)?;

        info!("Registry opened at {}", path.display());
        Ok(Self { path, conn })
    }

    /// Create an in-memory registry for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| Error::DatabaseOpen {
            path: PathBuf::from(":memory:"),
            source,
        })?;

        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        migrations::initialize_schema(&conn)?;

        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn,
        })
    }

    /// Get the path to the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Change how long a write waits for a competing writer.
    ///
    /// # Errors
    ///
    /// Returns an error if the setting cannot be applied.
    pub fn set_busy_timeout(&self, timeout: Duration) -> Result<()> {
        self.conn.busy_timeout(timeout)?;
        Ok(())
    }

    /// All users, in registration order.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn list_users(&self) -> Result<Vec<User>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY id"))?;

        let users = stmt
            .query_map([], Self::row_to_user)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(users)
    }

    /// Count registered users.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn count(&self) -> Result<i64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Create a role.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is taken or the write fails.
    pub fn create_role(&self, name: &str) -> Result<Role> {
        self.conn
            .execute("INSERT INTO roles (name) VALUES (?1)", [name])?;
        let id = self.conn.last_insert_rowid();
        debug!("Created role {} with id {}", name, id);
        Ok(Role {
            id,
            name: name.to_string(),
        })
    }

    /// Look up a role by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn find_role(&self, id: i64) -> Result<Option<Role>> {
        let role = self
            .conn
            .query_row("SELECT id, name FROM roles WHERE id = ?1", [id], |row| {
                Ok(Role {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            })
            .optional()?;
        Ok(role)
    }

    fn row_to_user(row: &rusqlite::Row) -> rusqlite::Result<User> {
        let created_at_str: String = row.get(5)?;
        let created_at = DateTime::parse_from_rfc3339(&created_at_str)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    5,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })?;

        Ok(User {
            id: row.get(0)?,
            username: row.get(1)?,
            record_number: row.get(2)?,
            email: row.get(3)?,
            role_id: row.get(4)?,
            created_at,
        })
    }
}

impl Registry for SqliteRegistry {
    fn find(&self, username: &str) -> Result<Option<User>> {
        let user = self
            .conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?1"),
                [username],
                Self::row_to_user,
            )
            .optional()?;
        Ok(user)
    }

    fn create(&self, new_user: &NewUser) -> Result<User> {
        let created_at = Utc::now();

        // Dropping the transaction without commit rolls the insert back.
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;
        match tx.execute(
            r"
            INSERT INTO users (username, record_number, email, created_at)
            VALUES (?1, ?2, ?3, ?4)
            ",
            params![
                new_user.username,
                new_user.record_number,
                new_user.email,
                created_at.to_rfc3339(),
            ],
        ) {
            Ok(_) => {}
            Err(err) if is_unique_violation(&err) => {
                debug!("Username {} already taken", new_user.username);
                return Err(Error::conflict(&new_user.username));
            }
            Err(err) => return Err(err.into()),
        }
        let id = tx.last_insert_rowid();

        // Durable before the caller sees the user
        tx.commit()?;

        debug!("Created user {} with id {}", new_user.username, id);
        Ok(User {
            id,
            username: new_user.username.clone(),
            record_number: new_user.record_number.clone(),
            email: new_user.email.clone(),
            role_id: None,
            created_at,
        })
    }
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_registry() -> SqliteRegistry {
        SqliteRegistry::open_in_memory().expect("failed to create test registry")
    }

    fn temp_db_path(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("roster_registry_{tag}_{}.db", std::process::id()))
    }

    fn remove_db(path: &Path) {
        let _ = std::fs::remove_file(path);
        let _ = std::fs::remove_file(path.with_extension("db-wal"));
        let _ = std::fs::remove_file(path.with_extension("db-shm"));
    }

    #[test]
    fn test_open_in_memory() {
        let registry = create_test_registry();
        assert_eq!(registry.count().unwrap(), 0);
        assert_eq!(registry.path(), Path::new(":memory:"));
    }

    #[test]
    fn test_create_and_find() {
        let registry = create_test_registry();
        let created = registry
            .create(&NewUser::new("alice", "123", Some("alice@example.org".to_string())))
            .unwrap();

        let found = registry.find("alice").unwrap().unwrap();
        assert_eq!(found.id, created.id);
        assert_eq!(found.record_number, "123");
        assert_eq!(found.email.as_deref(), Some("alice@example.org"));
        assert!(found.role_id.is_none());
    }

    #[test]
    fn test_find_absent() {
        let registry = create_test_registry();
        assert!(registry.find("nobody").unwrap().is_none());
    }

    #[test]
    fn test_find_is_case_sensitive() {
        let registry = create_test_registry();
        registry.create(&NewUser::new("Alice", "1", None)).unwrap();

        assert!(registry.find("alice").unwrap().is_none());
        assert!(registry.find("Alice").unwrap().is_some());
    }

    #[test]
    fn test_usernames_differing_in_case_are_distinct() {
        let registry = create_test_registry();
        registry.create(&NewUser::new("bob", "1", None)).unwrap();
        registry.create(&NewUser::new("Bob", "2", None)).unwrap();
        assert_eq!(registry.count().unwrap(), 2);
    }

    #[test]
    fn test_duplicate_create_is_conflict() {
        let registry = create_test_registry();
        registry.create(&NewUser::new("alice", "123", None)).unwrap();

        let err = registry
            .create(&NewUser::new("alice", "456", None))
            .unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(registry.count().unwrap(), 1);

        let kept = registry.find("alice").unwrap().unwrap();
        assert_eq!(kept.record_number, "123");
    }

    #[test]
    fn test_conflict_rolls_back_cleanly() {
        let registry = create_test_registry();
        registry.create(&NewUser::new("alice", "1", None)).unwrap();
        let _ = registry.create(&NewUser::new("alice", "2", None));

        // The connection is usable after the rolled-back transaction.
        registry.create(&NewUser::new("carol", "3", None)).unwrap();
        assert_eq!(registry.count().unwrap(), 2);
    }

    #[test]
    fn test_list_users_in_registration_order() {
        let registry = create_test_registry();
        for name in ["zoe", "adam", "mia"] {
            registry.create(&NewUser::new(name, "0", None)).unwrap();
        }

        let names: Vec<String> = registry
            .list_users()
            .unwrap()
            .into_iter()
            .map(|u| u.username)
            .collect();
        assert_eq!(names, vec!["zoe", "adam", "mia"]);
    }

    #[test]
    fn test_created_at_survives_roundtrip() {
        let registry = create_test_registry();
        let created = registry.create(&NewUser::new("alice", "1", None)).unwrap();
        let found = registry.find("alice").unwrap().unwrap();
        assert_eq!(found.created_at.timestamp(), created.created_at.timestamp());
    }

    #[test]
    fn test_roles() {
        let registry = create_test_registry();
        let admin = registry.create_role("Admin").unwrap();
        let user = registry.create_role("User").unwrap();
        assert_ne!(admin.id, user.id);

        assert_eq!(registry.find_role(admin.id).unwrap(), Some(admin));
        assert_eq!(registry.find_role(user.id).unwrap(), Some(user));
    }

    #[test]
    fn test_duplicate_role_name_fails() {
        let registry = create_test_registry();
        registry.create_role("Admin").unwrap();
        assert!(registry.create_role("Admin").is_err());
    }

    #[test]
    fn test_new_users_have_no_role() {
        let registry = create_test_registry();
        registry.create_role("User").unwrap();
        let created = registry.create(&NewUser::new("alice", "1", None)).unwrap();
        assert!(created.role_id.is_none());
        assert!(registry.find("alice").unwrap().unwrap().role_id.is_none());
    }

    #[test]
    fn test_find_role_absent() {
        let registry = create_test_registry();
        assert!(registry.find_role(42).unwrap().is_none());
    }

    #[test]
    fn test_open_file_based_persists() {
        let db_path = temp_db_path("persist");
        remove_db(&db_path);

        let registry = SqliteRegistry::open(&db_path).unwrap();
        registry.create(&NewUser::new("alice", "1", None)).unwrap();
        assert_eq!(registry.path(), db_path);
        drop(registry);

        let reopened = SqliteRegistry::open(&db_path).unwrap();
        assert!(reopened.find("alice").unwrap().is_some());

        drop(reopened);
        remove_db(&db_path);
    }

    #[test]
    fn test_open_creates_parent_dirs() {
        let nested_path = std::env::temp_dir().join(format!(
            "roster_registry_{}/nested/roster.db",
            std::process::id()
        ));
        if let Some(parent) = nested_path.parent() {
            let _ = std::fs::remove_dir_all(parent);
        }

        let registry = SqliteRegistry::open(&nested_path).unwrap();
        assert!(nested_path.exists());

        drop(registry);
        if let Some(parent) = nested_path.parent().and_then(Path::parent) {
            let _ = std::fs::remove_dir_all(parent);
        }
    }

    #[test]
    fn test_second_connection_sees_conflict() {
        let db_path = temp_db_path("conflict");
        remove_db(&db_path);

        let first = SqliteRegistry::open(&db_path).unwrap();
        let second = SqliteRegistry::open(&db_path).unwrap();

        // Both lookups happen before either write.
        assert!(first.find("dave").unwrap().is_none());
        assert!(second.find("dave").unwrap().is_none());

        first.create(&NewUser::new("dave", "1", None)).unwrap();
        let err = second.create(&NewUser::new("dave", "2", None)).unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(second.count().unwrap(), 1);

        drop(first);
        drop(second);
        remove_db(&db_path);
    }

    #[test]
    fn test_set_busy_timeout() {
        let registry = create_test_registry();
        assert!(registry
            .set_busy_timeout(Duration::from_millis(250))
            .is_ok());
    }
}
