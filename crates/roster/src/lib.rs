//! `roster` - user registration with best-effort email notification
//!
//! A submission is looked up in the [`registry`], created if the username is
//! new, and announced by email through the [`notifier`]. Delivery failures
//! are logged and reported in the result, never raised: the registration
//! stands either way.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod notifier;
pub mod registry;
pub mod user;
pub mod workflow;

pub use config::Config;
pub use error::{Error, Result};
pub use logging::init_logging;
pub use notifier::{NotificationAttempt, NotificationOutcome, Notifier, RecipientSet};
pub use registry::{Registry, SqliteRegistry};
pub use user::{NewUser, Role, User};
pub use workflow::{
    DetachedSubmission, Registrar, Submission, SubmissionReport, SubmissionStatus,
};
