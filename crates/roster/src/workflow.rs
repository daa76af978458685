//! The registration-and-notification workflow.
//!
//! A [`Registrar`] takes one [`Submission`], looks the username up, creates
//! the user if it is new and then notifies. The status returned to the
//! caller is decided by the registry alone; the notification outcome rides
//! along for observability.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::notifier::{MailTransport, NotificationAttempt, Notifier, REGISTRATION_SUBJECT};
use crate::registry::Registry;
use crate::user::{NewUser, User};

/// Whether a username was already registered when it was submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    /// First submission of this username; a record was created.
    New,
    /// The username was already registered; nothing changed.
    Known,
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::New => write!(f, "new"),
            Self::Known => write!(f, "known"),
        }
    }
}

/// One form submission.
///
/// Required fields are expected to be non-empty already.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    /// Requested username.
    pub name: String,
    /// Institutional record number.
    pub record_number: String,
    /// Optional contact address.
    pub email: Option<String>,
    /// Also notify the fixed secondary address.
    pub notify_secondary: bool,
}

impl Submission {
    /// Create a submission with no email and no opt-in.
    #[must_use]
    pub fn new(name: impl Into<String>, record_number: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            record_number: record_number.into(),
            email: None,
            notify_secondary: false,
        }
    }

    /// Set the email. A blank value counts as not provided.
    #[must_use]
    pub fn with_email(mut self, email: Option<String>) -> Self {
        self.email = email.filter(|e| !e.trim().is_empty());
        self
    }

    /// Set the secondary-address opt-in.
    #[must_use]
    pub fn with_notify_secondary(mut self, notify_secondary: bool) -> Self {
        self.notify_secondary = notify_secondary;
        self
    }

    fn to_new_user(&self) -> NewUser {
        NewUser::new(&self.name, &self.record_number, self.email.clone())
    }
}

/// Result of a blocking submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionReport {
    /// New or known.
    pub status: SubmissionStatus,
    /// The stored record.
    pub user: User,
    /// The notification attempt; `None` for known users.
    pub notification: Option<NotificationAttempt>,
}

/// Result of a submission whose notification runs in the background.
#[derive(Debug)]
pub struct DetachedSubmission {
    /// New or known.
    pub status: SubmissionStatus,
    /// The stored record.
    pub user: User,
    /// Handle on the background attempt; `None` for known users.
    pub notification: Option<JoinHandle<NotificationAttempt>>,
}

/// Runs submissions against a registry and a notifier.
#[derive(Debug)]
pub struct Registrar<R, T> {
    registry: R,
    notifier: Arc<Notifier<T>>,
}

impl<R: Registry, T: MailTransport> Registrar<R, T> {
    /// Create a registrar.
    #[must_use]
    pub fn new(registry: R, notifier: Notifier<T>) -> Self {
        Self {
            registry,
            notifier: Arc::new(notifier),
        }
    }

    /// Create a registrar sharing an existing notifier.
    #[must_use]
    pub fn with_shared_notifier(registry: R, notifier: Arc<Notifier<T>>) -> Self {
        Self { registry, notifier }
    }

    /// The registry in use.
    #[must_use]
    pub fn registry(&self) -> &R {
        &self.registry
    }

    /// The notifier in use.
    #[must_use]
    pub fn notifier(&self) -> &Arc<Notifier<T>> {
        &self.notifier
    }

    /// Register the submission if new, then notify synchronously.
    ///
    /// # Errors
    ///
    /// Returns an error only if the registry fails; in that case no
    /// notification is attempted. Delivery failures are reported in the
    /// returned [`SubmissionReport`], never as an error.
    pub fn submit(&self, submission: &Submission) -> Result<SubmissionReport> {
        let (status, user) = self.register(submission)?;

        // Only a fresh registration is announced
        let notification = match status {
            SubmissionStatus::New => Some(
                self.notifier
                    .notify_registration(&user, submission.notify_secondary),
            ),
            SubmissionStatus::Known => None,
        };

        Ok(SubmissionReport {
            status,
            user,
            notification,
        })
    }

    /// Look the username up and create it if absent.
    ///
    /// A lost race on the unique username resolves to the winner's record.
    fn register(&self, submission: &Submission) -> Result<(SubmissionStatus, User)> {
        if let Some(user) = self.registry.find(&submission.name)? {
            debug!("Username {} already registered", user.username);
            return Ok((SubmissionStatus::Known, user));
        }

        // Create new user
        match self.registry.create(&submission.to_new_user()) {
            Ok(user) => {
                info!(username = %user.username, id = user.id, "Registered new user");
                Ok((SubmissionStatus::New, user))
            }
            Err(err) if err.is_conflict() => {
                debug!("Lost registration race for {}", submission.name);
                let user = self.registry.find(&submission.name)?.ok_or_else(|| {
                    Error::internal(format!(
                        "username '{}' conflicted but cannot be found",
                        submission.name
                    ))
                })?;
                Ok((SubmissionStatus::Known, user))
            }
            Err(err) => Err(err),
        }
    }
}

impl<R: Registry, T: MailTransport + 'static> Registrar<R, T> {
    /// Register the submission, then hand the notification to a background task.
    ///
    /// Must be called from within a tokio runtime. The returned status does
    /// not wait on the notification.
    ///
    /// # Errors
    ///
    /// Returns an error only if the registry fails.
    pub fn submit_detached(&self, submission: &Submission) -> Result<DetachedSubmission> {
        let (status, user) = self.register(submission)?;
        let notification = match status {
            SubmissionStatus::New => {
                let recipients = self
                    .notifier
                    .recipients(user.email.as_deref(), submission.notify_secondary);
                Some(self.notifier.notify_detached(
                    recipients,
                    REGISTRATION_SUBJECT.to_string(),
                    crate::notifier::registration_body(&user),
                ))
            }
            SubmissionStatus::Known => None,
        };

        Ok(DetachedSubmission {
            status,
            user,
            notification,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::path::{Path, PathBuf};
    use std::sync::Barrier;

    use super::*;
    use crate::notifier::tests::{test_mail_config, RecordingTransport};
    use crate::notifier::DeliveryError;
    use crate::registry::SqliteRegistry;

    /// Counts calls into an in-memory registry.
    struct CountingRegistry {
        inner: SqliteRegistry,
        finds: Cell<usize>,
        creates: Cell<usize>,
    }

    impl CountingRegistry {
        fn new() -> Self {
            Self {
                inner: SqliteRegistry::open_in_memory().unwrap(),
                finds: Cell::new(0),
                creates: Cell::new(0),
            }
        }
    }

    impl Registry for CountingRegistry {
        fn find(&self, username: &str) -> Result<Option<User>> {
            self.finds.set(self.finds.get() + 1);
            self.inner.find(username)
        }

        fn create(&self, new_user: &NewUser) -> Result<User> {
            self.creates.set(self.creates.get() + 1);
            self.inner.create(new_user)
        }
    }

    /// Registry whose writes always fail.
    struct BrokenRegistry;

    impl Registry for BrokenRegistry {
        fn find(&self, _username: &str) -> Result<Option<User>> {
            Ok(None)
        }

        fn create(&self, _new_user: &NewUser) -> Result<User> {
            Err(Error::DatabaseQuery(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_IOERR),
                Some("disk I/O error".to_string()),
            )))
        }
    }

    /// Registry where another writer slips in between lookup and create.
    struct RacedRegistry {
        inner: SqliteRegistry,
        first_lookup_done: Cell<bool>,
    }

    impl Registry for RacedRegistry {
        fn find(&self, username: &str) -> Result<Option<User>> {
            if self.first_lookup_done.replace(true) {
                self.inner.find(username)
            } else {
                self.inner.create(&NewUser::new(username, "winner", None))?;
                Ok(None)
            }
        }

        fn create(&self, new_user: &NewUser) -> Result<User> {
            self.inner.create(new_user)
        }
    }

    fn registrar<R: Registry>(registry: R) -> Registrar<R, RecordingTransport> {
        Registrar::new(
            registry,
            Notifier::new(test_mail_config(), RecordingTransport::default()),
        )
    }

    fn temp_db_path(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("roster_workflow_{tag}_{}.db", std::process::id()))
    }

    fn remove_db(path: &Path) {
        let _ = std::fs::remove_file(path);
        let _ = std::fs::remove_file(path.with_extension("db-wal"));
        let _ = std::fs::remove_file(path.with_extension("db-shm"));
    }

    #[test]
    fn test_status_display() {
        assert_eq!(SubmissionStatus::New.to_string(), "new");
        assert_eq!(SubmissionStatus::Known.to_string(), "known");
        assert_eq!(
            serde_json::to_string(&SubmissionStatus::Known).unwrap(),
            "\"known\""
        );
    }

    #[test]
    fn test_blank_email_is_not_provided() {
        let submission = Submission::new("alice", "1").with_email(Some("   ".to_string()));
        assert!(submission.email.is_none());

        let submission = Submission::new("alice", "1").with_email(Some("a@b.org".to_string()));
        assert_eq!(submission.email.as_deref(), Some("a@b.org"));
    }

    #[test]
    fn test_first_submission_is_new_and_notifies() {
        let registrar = registrar(CountingRegistry::new());
        let report = registrar.submit(&Submission::new("alice", "123")).unwrap();

        assert_eq!(report.status, SubmissionStatus::New);
        assert_eq!(report.user.username, "alice");
        let attempt = report.notification.unwrap();
        assert!(attempt.outcome.is_delivered());
        assert_eq!(attempt.email.to, vec!["a@x"]);
        assert!(attempt.email.text.contains("Nome: alice"));
        assert!(attempt.email.text.contains("Prontuário: 123"));
        assert_eq!(attempt.email.subject, "[Flasky] Novo usuário cadastrado");
    }

    #[test]
    fn test_resubmission_is_known_noop() {
        let registrar = registrar(CountingRegistry::new());
        registrar.submit(&Submission::new("alice", "123")).unwrap();
        let report = registrar.submit(&Submission::new("alice", "999")).unwrap();

        assert_eq!(report.status, SubmissionStatus::Known);
        assert_eq!(report.user.record_number, "123");
        assert!(report.notification.is_none());

        let registry = registrar.registry();
        assert_eq!(registry.creates.get(), 1);
        assert_eq!(registry.finds.get(), 2);
        assert_eq!(registry.inner.count().unwrap(), 1);
        assert_eq!(registrar.notifier().transport().sent().len(), 1);
    }

    #[test]
    fn test_full_recipient_set() {
        let registrar = registrar(CountingRegistry::new());
        let submission = Submission::new("bob", "42")
            .with_email(Some("u@y".to_string()))
            .with_notify_secondary(true);
        let report = registrar.submit(&submission).unwrap();

        assert_eq!(
            report.notification.unwrap().email.to,
            vec!["a@x", "u@y", "flaskaulasweb@zohomail.com"]
        );
        assert_eq!(report.user.email.as_deref(), Some("u@y"));
    }

    #[test]
    fn test_delivery_failure_keeps_registration() {
        let registrar = Registrar::new(
            CountingRegistry::new(),
            Notifier::new(test_mail_config(), RecordingTransport::failing()),
        );
        let report = registrar.submit(&Submission::new("carol", "7")).unwrap();

        assert_eq!(report.status, SubmissionStatus::New);
        assert!(matches!(
            report.notification.unwrap().outcome.error(),
            Some(DeliveryError::Transport { .. })
        ));
        assert!(registrar.registry().inner.find("carol").unwrap().is_some());
    }

    #[test]
    fn test_persistence_failure_aborts_without_notification() {
        let registrar = registrar(BrokenRegistry);
        let err = registrar.submit(&Submission::new("dave", "1")).unwrap_err();

        assert!(err.is_persistence_error());
        assert!(registrar.notifier().transport().sent().is_empty());
    }

    #[test]
    fn test_conflict_resolves_to_known() {
        let registrar = registrar(RacedRegistry {
            inner: SqliteRegistry::open_in_memory().unwrap(),
            first_lookup_done: Cell::new(false),
        });
        let report = registrar.submit(&Submission::new("erin", "mine")).unwrap();

        assert_eq!(report.status, SubmissionStatus::Known);
        assert_eq!(report.user.record_number, "winner");
        assert!(report.notification.is_none());
        assert!(registrar.notifier().transport().sent().is_empty());
    }

    #[test]
    fn test_concurrent_submissions_create_one_record() {
        let db_path = temp_db_path("concurrent");
        remove_db(&db_path);

        let transport = Arc::new(RecordingTransport::default());
        let notifier = Arc::new(Notifier::new(test_mail_config(), Arc::clone(&transport)));

        // Open (and migrate) sequentially, race only the submissions.
        let registrars: Vec<_> = (0..2)
            .map(|_| {
                Registrar::with_shared_notifier(
                    SqliteRegistry::open(&db_path).unwrap(),
                    Arc::clone(&notifier),
                )
            })
            .collect();

        let barrier = Barrier::new(registrars.len());
        let statuses: Vec<SubmissionStatus> = std::thread::scope(|scope| {
            let handles: Vec<_> = registrars
                .into_iter()
                .map(|registrar| {
                    let barrier = &barrier;
                    scope.spawn(move || {
                        barrier.wait();
                        registrar
                            .submit(&Submission::new("frank", "1"))
                            .unwrap()
                            .status
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(
            statuses
                .iter()
                .filter(|s| **s == SubmissionStatus::New)
                .count(),
            1
        );
        assert_eq!(transport.sent().len(), 1);

        let check = SqliteRegistry::open(&db_path).unwrap();
        assert_eq!(check.count().unwrap(), 1);
        drop(check);
        remove_db(&db_path);
    }

    #[tokio::test]
    async fn test_submit_detached_new() {
        let registrar = registrar(CountingRegistry::new());
        let submission = Submission::new("gina", "5").with_email(Some("g@y.org".to_string()));
        let detached: crate::DetachedSubmission = registrar.submit_detached(&submission).unwrap();

        assert_eq!(detached.status, SubmissionStatus::New);
        let attempt = detached.notification.unwrap().await.unwrap();
        assert!(attempt.outcome.is_delivered());
        assert_eq!(attempt.email.to, vec!["a@x", "g@y.org"]);
    }

    #[tokio::test]
    async fn test_submit_detached_known_has_no_task() {
        let registrar = registrar(CountingRegistry::new());
        registrar.submit(&Submission::new("hank", "5")).unwrap();

        let detached = registrar
            .submit_detached(&Submission::new("hank", "5"))
            .unwrap();
        assert_eq!(detached.status, SubmissionStatus::Known);
        assert!(detached.notification.is_none());
    }

    #[tokio::test]
    async fn test_submit_detached_failure_does_not_change_status() {
        let registrar = Registrar::new(
            CountingRegistry::new(),
            Notifier::new(test_mail_config(), RecordingTransport::failing()),
        );
        let detached = registrar
            .submit_detached(&Submission::new("ivy", "8"))
            .unwrap();

        assert_eq!(detached.status, SubmissionStatus::New);
        let attempt = detached.notification.unwrap().await.unwrap();
        assert!(!attempt.outcome.is_delivered());
    }
}
