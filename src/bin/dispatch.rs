//! Reminder dispatch service.
//!
//! ```text
//! trialwatch-dispatch [--config PATH] [serve|once|plan END_DATE [TIMEZONE]]
//! ```
//!
//! `serve` (the default) runs the periodic sweep loop and, when enabled,
//! the cron trigger endpoint until Ctrl-C. `once` runs a single sweep and
//! prints its summary as JSON. `plan` prints the reminder plan for an end
//! date without touching the database.
//!
//! Tracing output goes to stderr so stdout stays machine-readable.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use trialwatch::dispatch::{DispatchLoop, ReminderDispatcher};
use trialwatch::notify::sender_from_config;
use trialwatch::trigger::TriggerServer;
use trialwatch::{SqliteReminderStore, TrialwatchConfig, compute_reminder_plan};

enum Command {
    Serve,
    Once,
    Plan { end_date: String, timezone: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let (config_path, command) = parse_args(std::env::args().skip(1).collect())?;
    let config = load_config(config_path)?;
    config.validate()?;

    match command {
        Command::Serve => serve(config).await,
        Command::Once => once(config).await,
        Command::Plan { end_date, timezone } => plan(&config, &end_date, &timezone),
    }
}

fn parse_args(mut args: Vec<String>) -> anyhow::Result<(Option<PathBuf>, Command)> {
    let mut config_path = None;
    if args.first().map(String::as_str) == Some("--config") {
        if args.len() < 2 {
            anyhow::bail!("--config requires a path");
        }
        config_path = Some(PathBuf::from(args.remove(1)));
        args.remove(0);
    }

    let command = match args.first().map(String::as_str) {
        None | Some("serve") => Command::Serve,
        Some("once") => Command::Once,
        Some("plan") => {
            let end_date = args
                .get(1)
                .cloned()
                .context("plan requires an end date (YYYY-MM-DD)")?;
            let timezone = args.get(2).cloned().unwrap_or_else(|| "UTC".to_owned());
            Command::Plan { end_date, timezone }
        }
        Some("help" | "--help" | "-h") => {
            print_usage();
            std::process::exit(0);
        }
        Some(other) => anyhow::bail!("unknown subcommand `{other}` (use serve|once|plan)"),
    };
    Ok((config_path, command))
}

fn print_usage() {
    println!("trialwatch-dispatch [--config PATH] [serve|once|plan END_DATE [TIMEZONE]]");
}

fn load_config(explicit: Option<PathBuf>) -> anyhow::Result<TrialwatchConfig> {
    if let Some(path) = explicit {
        return TrialwatchConfig::from_file(&path)
            .with_context(|| format!("loading config from {}", path.display()));
    }
    let default_path = TrialwatchConfig::default_config_path();
    if default_path.exists() {
        tracing::info!("using config {}", default_path.display());
        return Ok(TrialwatchConfig::from_file(&default_path)?);
    }
    Ok(TrialwatchConfig::default())
}

fn build_dispatcher(config: &TrialwatchConfig) -> anyhow::Result<Arc<ReminderDispatcher>> {
    let store = SqliteReminderStore::open(&config.storage.database_path).with_context(|| {
        format!(
            "opening reminder store at {}",
            config.storage.database_path.display()
        )
    })?;
    let sender = sender_from_config(&config.delivery)?;
    let dispatcher =
        ReminderDispatcher::new(Arc::new(store), Arc::from(sender)).with_config(&config.dispatch);
    Ok(Arc::new(dispatcher))
}

async fn serve(config: TrialwatchConfig) -> anyhow::Result<()> {
    tracing::info!("trialwatch-dispatch starting");
    let dispatcher = build_dispatcher(&config)?;
    let cancel = CancellationToken::new();

    let loop_handle = if config.dispatch.enabled {
        Some(
            DispatchLoop::new(Arc::clone(&dispatcher), cancel.child_token())
                .with_interval(Duration::from_secs(config.dispatch.interval_secs))
                .spawn(),
        )
    } else {
        tracing::info!("periodic dispatch disabled");
        None
    };

    let trigger = if config.trigger.enabled {
        Some(
            TriggerServer::start(
                Arc::clone(&dispatcher),
                &config.trigger.bind,
                &config.trigger.secret(),
            )
            .await?,
        )
    } else {
        None
    };

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    tracing::info!("shutdown requested");

    cancel.cancel();
    if let Some(handle) = loop_handle {
        handle.await.context("dispatch loop panicked")?;
    }
    if let Some(server) = trigger {
        server.shutdown();
    }

    tracing::info!("trialwatch-dispatch shut down cleanly");
    Ok(())
}

async fn once(config: TrialwatchConfig) -> anyhow::Result<()> {
    let dispatcher = build_dispatcher(&config)?;
    let summary = dispatcher.process_due_reminders(Utc::now()).await.map_err(|e| {
        tracing::error!(error = %e, "dispatch sweep failed");
        anyhow::anyhow!("dispatch sweep failed: {e}")
    })?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn plan(config: &TrialwatchConfig, end_date: &str, timezone: &str) -> anyhow::Result<()> {
    let policy = config.scheduler.policy()?;
    let plan = compute_reminder_plan(
        end_date,
        Utc::now(),
        timezone,
        &policy,
        config.scheduler.safety_margin(),
    )?;
    let out = serde_json::json!({
        "end_instant": plan.end_instant,
        "fallback_zone": plan.zone.is_fallback(),
        "tier": plan.tier,
        "entries": plan.entries,
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}
