//! Best-effort registration notifications.
//!
//! The [`Notifier`] builds the recipient set for a registration, composes
//! the message and makes exactly one delivery attempt through a
//! [`MailTransport`]. Failures are captured in the returned
//! [`NotificationAttempt`] and logged; they never reach the caller as an
//! error.

pub mod transport;

use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{looks_like_address, MailConfig};
use crate::user::User;

pub use transport::{DeliveryError, HttpTransport, MailTransport, OutboundEmail, ProviderResponse};

/// Subject text for new registrations, before the configured prefix.
pub const REGISTRATION_SUBJECT: &str = "Novo usuário cadastrado";

/// Ordered recipient addresses for one notification.
///
/// Insertion order is kept and nothing is filtered or de-duplicated: an
/// empty address is sent as-is and left for the provider to reject.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct RecipientSet(Vec<String>);

impl RecipientSet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an address.
    pub fn push(&mut self, address: impl Into<String>) {
        self.0.push(address.into());
    }

    /// Number of addresses.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no address has been added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The addresses, in order.
    #[must_use]
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    /// Consume the set, returning the addresses.
    #[must_use]
    pub fn into_vec(self) -> Vec<String> {
        self.0
    }
}

impl<S: Into<String>> FromIterator<S> for RecipientSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

/// How a delivery attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationOutcome {
    /// The provider accepted the message.
    Delivered(ProviderResponse),
    /// The attempt failed; nothing will retry it.
    Failed(DeliveryError),
}

impl NotificationOutcome {
    /// Check if the provider accepted the message.
    #[must_use]
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered(_))
    }

    /// The provider response, if delivered.
    #[must_use]
    pub fn response(&self) -> Option<&ProviderResponse> {
        match self {
            Self::Delivered(response) => Some(response),
            Self::Failed(_) => None,
        }
    }

    /// The failure cause, if any.
    #[must_use]
    pub fn error(&self) -> Option<&DeliveryError> {
        match self {
            Self::Delivered(_) => None,
            Self::Failed(err) => Some(err),
        }
    }
}

/// One notification: the message sent and what happened to it.
///
/// Lives only as long as the caller keeps it; nothing is persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationAttempt {
    /// The message handed to the transport.
    pub email: OutboundEmail,
    /// The result of the single delivery attempt.
    pub outcome: NotificationOutcome,
}

/// Sends registration notifications through a [`MailTransport`].
#[derive(Debug)]
pub struct Notifier<T> {
    config: MailConfig,
    transport: T,
}

impl Notifier<HttpTransport> {
    /// Create a notifier posting to the configured HTTP provider.
    #[must_use]
    pub fn http(config: MailConfig) -> Self {
        let transport = HttpTransport::new(&config);
        Self::new(config, transport)
    }
}

impl<T: MailTransport> Notifier<T> {
    /// Create a notifier with an explicit transport.
    #[must_use]
    pub fn new(config: MailConfig, transport: T) -> Self {
        Self { config, transport }
    }

    /// The mail configuration this notifier was built with.
    #[must_use]
    pub fn config(&self) -> &MailConfig {
        &self.config
    }

    /// The underlying transport.
    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Build the recipient set for a submission.
    ///
    /// Administrator first, then the submitter's email if one was given,
    /// then the secondary address if the submitter opted in.
    #[must_use]
    pub fn recipients(&self, user_email: Option<&str>, notify_secondary: bool) -> RecipientSet {
        let mut recipients = RecipientSet::new();
        recipients.push(self.config.admin_address.as_str());
        if let Some(email) = user_email {
            recipients.push(email);
        }
        if notify_secondary {
            recipients.push(self.config.secondary_address.as_str());
        }
        recipients
    }

    /// Prefix a subject with the configured tag.
    #[must_use]
    pub fn subject_line(&self, subject: &str) -> String {
        format!("{} {subject}", self.config.subject_prefix)
    }

    /// Make a single delivery attempt.
    ///
    /// Never fails: transport and provider errors end up in the outcome.
    pub fn notify(
        &self,
        recipients: &RecipientSet,
        subject: &str,
        body: &str,
    ) -> NotificationAttempt {
        // Sent as-is; the provider decides
        for address in recipients.as_slice() {
            if !looks_like_address(address) {
                debug!("Passing through suspicious recipient {:?}", address);
            }
        }

        let email = OutboundEmail {
            from: self.config.from_address.clone(),
            to: recipients.as_slice().to_vec(),
            subject: self.subject_line(subject),
            text: body.to_string(),
        };

        // Exactly one attempt, no retry
        let outcome = match self.transport.send(&email) {
            Ok(response) => {
                info!(
                    status = response.status,
                    body = %response.body,
                    recipients = email.to.len(),
                    "Notification sent"
                );
                NotificationOutcome::Delivered(response)
            }
            Err(err) => {
                warn!(error = %err, recipients = email.to.len(), "Notification failed");
                NotificationOutcome::Failed(err)
            }
        };

        NotificationAttempt { email, outcome }
    }

    /// Notify about a freshly committed registration.
    pub fn notify_registration(&self, user: &User, notify_secondary: bool) -> NotificationAttempt {
        let recipients = self.recipients(user.email.as_deref(), notify_secondary);
        self.notify(&recipients, REGISTRATION_SUBJECT, &registration_body(user))
    }
}

impl<T: MailTransport + 'static> Notifier<T> {
    /// Run [`Notifier::notify`] on the blocking pool.
    ///
    /// Must be called from within a tokio runtime. Dropping the handle does
    /// not cancel the attempt.
    pub fn notify_detached(
        self: &Arc<Self>,
        recipients: RecipientSet,
        subject: String,
        body: String,
    ) -> JoinHandle<NotificationAttempt> {
        let notifier = Arc::clone(self);
        tokio::task::spawn_blocking(move || notifier.notify(&recipients, &subject, &body))
    }
}

/// Plain-text body announcing a registration.
#[must_use]
pub fn registration_body(user: &User) -> String {
    format!(
        "Novo usuário cadastrado:\nNome: {name}\nProntuário: {record}\n\
         Usuário: {name}\nE-mail: {email}",
        name = user.username,
        record = user.record_number,
        email = user.email.as_deref().unwrap_or_default(),
    )
}
