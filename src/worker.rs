use chrono::{DateTime, Local};
use colored::Colorize;
use log::{info, warn};
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;

use crate::cli::Cli;
use crate::config::{Config, ProberKind};
use crate::engine::{CheckEngine, RunOptions, RunReport};
use crate::error::Error;
use crate::lock::{self, lock_path};
use crate::notify::DiscordNotifier;
use crate::probe::{HttpProber, Prober, WgetProber};
use crate::record::{Outcome, Reconciled, State};
use crate::store::RecordStore;
use crate::trigger::ShellTrigger;

/// Checks the targets named on the command line (or every known one) once.
///
/// The record store is locked for the whole run, loaded, reconciled and
/// written back. Status lines go to stdout in the order targets were
/// reconciled; diagnostics go through the logger.
///
/// # Errors
///
/// Fails before any probing if the lock is held or corrupt, the store cannot
/// be read, or no targets were given. Fails after the run if the store cannot
/// be written.
pub async fn check_sites(
    cli: &Cli,
    config: &Config,
    token: &CancellationToken,
) -> Result<RunReport, Error> {
    check_sites_with(cli, config, &build_engine(config)?, token).await
}

async fn check_sites_with(
    cli: &Cli,
    config: &Config,
    engine: &CheckEngine,
    token: &CancellationToken,
) -> Result<RunReport, Error> {
    let lock = lock::acquire(&lock_path(&cli.config, &config.check.lock_suffix))?;
    let mut store = RecordStore::load(&cli.config)?;

    let targets = if cli.known {
        store.sections()
    } else if cli.url.is_empty() {
        return Err(Error::NoTargets);
    } else {
        cli.url.clone()
    };

    let options = run_options(cli, config);
    log_setup(config, &options, targets.len());

    let report = engine.run(&targets, &mut store, &options, token).await;

    for result in &report.results {
        println!("{}", status_line(result));
    }
    info!(
        "Checked {} targets, {} changed state",
        report.results.len(),
        report.transitions()
    );

    store.save()?;
    lock.release()?;
    Ok(report)
}

/// Prints every target in the store with its state and last change.
///
/// # Errors
///
/// Fails if the store exists but cannot be read.
pub fn list_sites(cli: &Cli) -> Result<Vec<String>, Error> {
    let store = RecordStore::load(&cli.config)?;
    let now = chrono::Utc::now().timestamp();

    let lines: Vec<String> = store
        .sections()
        .iter()
        .map(|id| {
            let record = store.record(id, now);
            format!(
                "{id} {} since {}",
                colored_state(record.state()),
                format_time(record.last_change)
            )
        })
        .collect();

    for line in &lines {
        println!("{line}");
    }
    Ok(lines)
}

fn run_options(cli: &Cli, config: &Config) -> RunOptions {
    let check = &config.check;
    RunOptions {
        strict: cli.strict,
        timeout: Duration::from_secs(cli.timeout.unwrap_or(check.timeout_secs)),
        tries: cli.tries.unwrap_or(check.tries).max(1),
        max_concurrency: check.max_concurrency,
        poll_interval: Duration::from_millis(check.strict_poll_ms),
        deadline: (check.run_timeout_secs > 0)
            .then(|| Duration::from_secs(check.run_timeout_secs)),
    }
}

fn build_engine(config: &Config) -> Result<CheckEngine, Error> {
    let prober: Arc<dyn Prober> = match config.check.prober {
        ProberKind::Http => Arc::new(HttpProber::new()?),
        ProberKind::Wget => Arc::new(WgetProber::default()),
    };

    let engine = CheckEngine::new(prober, Arc::new(ShellTrigger));
    Ok(match &config.notify.webhook_url {
        Some(url) => engine.with_notifier(Arc::new(DiscordNotifier::new(
            url.clone(),
            config.notify.discord_id,
        ))),
        None => engine,
    })
}

fn log_setup(config: &Config, options: &RunOptions, targets: usize) {
    info!("Checking {targets} targets...");
    info!("Timeout: {} seconds", options.timeout.as_secs());
    info!("Tries: {}", options.tries);
    if options.strict {
        info!("Strict ordering, results are reported by probe duration");
    }
    match (
        config.notify.webhook_url.is_some(),
        config.notify.discord_id.is_some(),
    ) {
        (true, true) => {
            info!("Webhook is set, a notification will be sent on state change");
            info!("Discord ID is set, notifications will be tagged for the user");
        }
        (true, false) => {
            info!("Webhook is set, a notification will be sent on state change");
            warn!("Discord ID is not set, notifications will not tag any user");
        }
        (false, _) => warn!("Webhook is not set, no notifications will be sent"),
    }
}

fn colored_state(state: State) -> String {
    match state {
        State::Up => state.to_string().green().to_string(),
        State::Down => state.to_string().red().to_string(),
    }
}

fn format_time(timestamp: i64) -> String {
    DateTime::from_timestamp(timestamp, 0).map_or_else(
        || timestamp.to_string(),
        |t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string(),
    )
}

fn status_line(result: &Reconciled) -> String {
    let id = &result.record.id;
    let observed = State::from_down(!result.reachable);
    let state = colored_state(observed);
    let ms = result.elapsed.as_millis();

    match result.outcome {
        Outcome::New => format!("{id} {state} (new, {ms} ms)"),
        Outcome::Unchanged => format!("{id} {state} ({ms} ms)"),
        Outcome::Transition => format!("{id} {state} changed ({ms} ms)"),
        Outcome::NotifyFailed => {
            format!("{id} {state} not recorded, notification failed ({ms} ms)")
        }
        Outcome::Abandoned => format!("{id} not checked"),
    }
}
