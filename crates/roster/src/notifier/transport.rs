//! Outbound mail transport.
//!
//! [`MailTransport`] is the opaque "send" capability the notifier depends
//! on. [`HttpTransport`] posts a form to a Mailgun-style HTTP API with basic
//! authentication.

use std::fmt;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Serialize;
use thiserror::Error;

use crate::config::MailConfig;

/// A fully composed message, ready for the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboundEmail {
    /// Sender address.
    pub from: String,
    /// Recipients, in order.
    pub to: Vec<String>,
    /// Subject, prefix included.
    pub subject: String,
    /// Plain-text body.
    pub text: String,
}

/// What the provider answered to an accepted request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderResponse {
    /// HTTP status code.
    pub status: u16,
    /// Raw response body.
    pub body: String,
}

/// Why a delivery attempt failed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// A required provider setting is empty.
    #[error("mail provider not configured: {setting} is empty")]
    Unconfigured {
        /// The missing configuration key.
        setting: &'static str,
    },

    /// The request never got a response (DNS, connect, TLS, timeout...).
    #[error("{kind} error reaching mail provider: {message}")]
    Transport {
        /// Coarse failure class.
        kind: &'static str,
        /// Transport error text.
        message: String,
    },

    /// The provider answered with a non-2xx status.
    #[error("mail provider rejected message with status {status}: {body}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Raw response body.
        body: String,
    },

    /// The response could not be read.
    #[error("unreadable provider response: {0}")]
    InvalidResponse(String),
}

/// The capability to hand one message to a mail provider.
pub trait MailTransport: Send + Sync {
    /// Make a single delivery attempt.
    ///
    /// # Errors
    ///
    /// Returns a [`DeliveryError`] describing any transport or provider failure.
    fn send(&self, email: &OutboundEmail) -> Result<ProviderResponse, DeliveryError>;
}

impl<T: MailTransport + ?Sized> MailTransport for Arc<T> {
    fn send(&self, email: &OutboundEmail) -> Result<ProviderResponse, DeliveryError> {
        (**self).send(email)
    }
}

/// Form-POST transport for HTTP mail APIs.
#[derive(Clone)]
pub struct HttpTransport {
    agent: ureq::Agent,
    endpoint: String,
    authorization: String,
}

impl fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTransport")
            .field("endpoint", &self.endpoint)
            .field("authorization", &"<redacted>")
            .finish_non_exhaustive()
    }
}

impl HttpTransport {
    /// Build a transport from mail configuration.
    #[must_use]
    pub fn new(config: &MailConfig) -> Self {
        let timeout = config.timeout();
        // A redirected POST is reported, never replayed.
        let agent = ureq::AgentBuilder::new()
            .redirects(0)
            .timeout_connect(timeout)
            .timeout_read(timeout)
            .timeout_write(timeout)
            .user_agent(&config.user_agent)
            .build();

        Self {
            agent,
            endpoint: config.api_url.clone(),
            authorization: basic_auth(&config.api_user, &config.api_key),
        }
    }

    /// The endpoint requests are posted to.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl MailTransport for HttpTransport {
    fn send(&self, email: &OutboundEmail) -> Result<ProviderResponse, DeliveryError> {
        if self.endpoint.is_empty() {
            return Err(DeliveryError::Unconfigured {
                setting: "mail.api_url",
            });
        }

        let form = form_fields(email);
        match self
            .agent
            .post(&self.endpoint)
            .set("Authorization", &self.authorization)
            .send_form(&form)
        {
            Ok(response) => {
                let status = response.status();
                let body = response
                    .into_string()
                    .map_err(|e| DeliveryError::InvalidResponse(e.to_string()))?;
                // ureq only errors on 4xx/5xx; anything else outside 2xx is a rejection too
                if !(200..300).contains(&status) {
                    return Err(DeliveryError::Rejected { status, body });
                }
                Ok(ProviderResponse { status, body })
            }
            Err(ureq::Error::Status(status, response)) => Err(DeliveryError::Rejected {
                status,
                body: response.into_string().unwrap_or_default(),
            }),
            Err(ureq::Error::Transport(transport)) => {
                let message = transport.to_string();
                let kind = classify_transport_error(&format!("{:?} {message}", transport.kind()));
                Err(DeliveryError::Transport { kind, message })
            }
        }
    }
}

/// Form body: `to` is repeated once per recipient.
fn form_fields(email: &OutboundEmail) -> Vec<(&str, &str)> {
    let mut form = Vec::with_capacity(email.to.len() + 3);
    form.push(("from", email.from.as_str()));
    for recipient in &email.to {
        form.push(("to", recipient.as_str()));
    }
    form.push(("subject", email.subject.as_str()));
    form.push(("text", email.text.as_str()));
    form
}

fn basic_auth(user: &str, password: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{user}:{password}")))
}

fn classify_transport_error(raw: &str) -> &'static str {
    let lower = raw.to_ascii_lowercase();
    if lower.contains("timeout") || lower.contains("timed out") {
        "timeout"
    } else if lower.contains("tls") || lower.contains("ssl") {
        "tls"
    } else if lower.contains("dns") {
        "dns"
    } else if lower.contains("connection") || lower.contains("connect") {
        "connection"
    } else if lower.contains("url") || lower.contains("scheme") {
        "invalid_url"
    } else {
        "transport"
    }
}
