use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use sidequeue::users::{InMemoryUserRepository, LogMailer, UserService};
use sidequeue::{WorkerPool, WorkerPoolConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "sidequeue")]
#[command(about = "Run the background job pool and register users with welcome emails")]
#[command(version)]
struct Cli {
    /// Users to register on startup, as `username:email`
    #[arg(value_name = "USERNAME:EMAIL", value_parser = parse_registration)]
    users: Vec<Registration>,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", default_value = "text", value_parser = ["text", "json"])]
    log_format: String,
}

#[derive(Debug, Clone)]
struct Registration {
    username: String,
    email: String,
}

fn parse_registration(arg: &str) -> Result<Registration, String> {
    match arg.split_once(':') {
        Some((username, email)) if !username.is_empty() && !email.is_empty() => {
            Ok(Registration {
                username: username.to_string(),
                email: email.to_string(),
            })
        }
        _ => Err(format!("expected username:email, got `{arg}`")),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load from .env before clap reads env-backed flags
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.log_format == "json");

    tracing::info!("sidequeue starting...");

    let config = WorkerPoolConfig::from_env().context("failed to load worker pool config")?;
    let pool = Arc::new(WorkerPool::new(config)?);
    pool.start()?;

    let users = UserService::new(
        InMemoryUserRepository::new(),
        Arc::clone(&pool),
        Arc::new(LogMailer),
    );

    for registration in &cli.users {
        match users
            .create_user(&registration.username, &registration.email)
            .await
        {
            Ok(user) => {
                tracing::info!(user_id = user.id, username = %user.username, "User registered")
            }
            Err(e) => tracing::warn!(
                username = %registration.username,
                error = %e,
                "User registration failed"
            ),
        }
    }

    tracing::info!("Worker pool ready, waiting for shutdown signal...");
    tokio::signal::ctrl_c().await?;

    pool.stop().await;

    let stats = pool.stats();
    tracing::info!(
        stats = %serde_json::to_string(&stats)?,
        "Shutdown complete"
    );
    Ok(())
}

/// `RUST_LOG` picks the levels; `json` switches to JSON lines.
fn init_tracing(json: bool) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sidequeue=debug".into()),
        )
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(|| tracing_subscriber::fmt::layer()))
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_registrations() {
        let cli = Cli::try_parse_from(["sidequeue", "alice:alice@example.com", "bob:bob@example.com"])
            .unwrap();
        assert_eq!(cli.users.len(), 2);
        assert_eq!(cli.users[0].username, "alice");
        assert_eq!(cli.users[1].email, "bob@example.com");
    }

    #[test]
    fn test_cli_rejects_malformed_registration() {
        assert!(Cli::try_parse_from(["sidequeue", "no-separator"]).is_err());
        assert!(Cli::try_parse_from(["sidequeue", ":missing@example.com"]).is_err());
    }

    #[test]
    fn test_cli_log_format_values() {
        let cli = Cli::try_parse_from(["sidequeue", "--log-format", "json"]).unwrap();
        assert_eq!(cli.log_format, "json");
        assert!(Cli::try_parse_from(["sidequeue", "--log-format", "xml"]).is_err());
    }
}
