//! CLI command definitions.

use std::path::PathBuf;

use clap::{Args, Subcommand};

use crate::workflow::Submission;

/// Register command arguments.
#[derive(Debug, Args)]
pub struct RegisterCommand {
    /// Username to register
    pub name: String,

    /// Institutional record number (prontuário)
    #[arg(short, long)]
    pub record_number: String,

    /// Contact email, also notified of the registration
    #[arg(short, long)]
    pub email: Option<String>,

    /// Also notify the secondary address
    #[arg(short = 's', long)]
    pub notify_secondary: bool,

    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

impl RegisterCommand {
    /// Turn the arguments into a workflow submission.
    #[must_use]
    pub fn to_submission(&self) -> Submission {
        Submission::new(&self.name, &self.record_number)
            .with_email(self.email.clone())
            .with_notify_secondary(self.notify_secondary)
    }
}

/// Users command arguments.
#[derive(Debug, Args)]
pub struct UsersCommand {
    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}
