//! `roster` - CLI front-end for the registration workflow.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use roster::cli::{Cli, Command, ConfigCommand, RegisterCommand, UsersCommand};
use roster::{init_logging, Config, Notifier, Registrar, SqliteRegistry, SubmissionStatus};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbosity());

    // Load configuration per command; `config validate` must reach a broken file
    match cli.command {
        Command::Register(register_cmd) => {
            handle_register(&load_config(cli.config)?, &register_cmd)
        }
        Command::Users(users_cmd) => handle_users(&load_config(cli.config)?, &users_cmd),
        Command::Config(config_cmd) => handle_config(cli.config, config_cmd),
    }
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<Config> {
    Config::load_from(path).context("loading configuration")
}

fn open_registry(config: &Config) -> anyhow::Result<SqliteRegistry> {
    let path = config.database_path();
    let registry = SqliteRegistry::open(&path)
        .with_context(|| format!("opening registry at {}", path.display()))?;
    registry.set_busy_timeout(config.busy_timeout())?;
    Ok(registry)
}

fn handle_register(config: &Config, cmd: &RegisterCommand) -> anyhow::Result<()> {
    let registrar = Registrar::new(open_registry(config)?, Notifier::http(config.mail.clone()));

    // Delivery problems are logged by the notifier; only registry failures abort
    let report = registrar
        .submit(&cmd.to_submission())
        .context("registration failed")?;

    if cmd.json {
        let output = serde_json::json!({
            "status": report.status,
            "user": report.user,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        let username = &report.user.username;
        match report.status {
            SubmissionStatus::New => println!("Pleased to meet you, {username}!"),
            SubmissionStatus::Known => println!("Happy to see you again, {username}!"),
        }
    }
    Ok(())
}

fn handle_users(config: &Config, cmd: &UsersCommand) -> anyhow::Result<()> {
    let users = open_registry(config)?.list_users()?;

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&users)?);
        return Ok(());
    }

    if users.is_empty() {
        println!("No users registered.");
        return Ok(());
    }
    println!("{:<24} {:<16} {}", "USERNAME", "RECORD", "EMAIL");
    for user in &users {
        println!(
            "{:<24} {:<16} {}",
            user.username,
            user.record_number,
            user.email.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

fn handle_config(config_path: Option<PathBuf>, cmd: ConfigCommand) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            let config = load_config(config_path)?;

            // Never print the provider key
            let mut shown = config.clone();
            if !shown.mail.api_key.is_empty() {
                shown.mail.api_key = "<redacted>".to_string();
            }
            if json {
                println!("{}", serde_json::to_string_pretty(&shown)?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Storage]");
                println!("  Database path:      {}", config.database_path().display());
                println!("  Busy timeout (ms):  {}", shown.storage.busy_timeout_ms);
                println!();
                println!("[Mail]");
                println!("  API URL:            {}", shown.mail.api_url);
                println!("  API user:           {}", shown.mail.api_user);
                println!("  API key:            {}", shown.mail.api_key);
                println!("  From:               {}", shown.mail.from_address);
                println!("  Admin:              {}", shown.mail.admin_address);
                println!("  Subject prefix:     {}", shown.mail.subject_prefix);
                println!("  Secondary address:  {}", shown.mail.secondary_address);
                println!("  Timeout (ms):       {}", shown.mail.timeout_ms);
            }
        }
        ConfigCommand::Path => {
            let path = config_path.unwrap_or_else(Config::default_config_path);
            println!("{}", path.display());
        }
        ConfigCommand::Validate { file } => validate_config(file.or(config_path))?,
    }
    Ok(())
}

fn validate_config(file: Option<PathBuf>) -> anyhow::Result<()> {
    let path = file.unwrap_or_else(Config::default_config_path);
    println!("Validating configuration: {}", path.display());
    Config::load_from(Some(path.clone()))
        .with_context(|| format!("configuration {} is invalid", path.display()))?;
    println!("Configuration is valid.");
    Ok(())
}
