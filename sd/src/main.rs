//! Smoothd - Rate Smoothing Dispatcher
//!
//! CLI entry point for the intake server and backlog maintenance.

use std::fs;
use std::io::{BufRead, BufReader};
use std::sync::Arc;

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result};
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use smoothd::cli::{Cli, Command, get_log_path};
use smoothd::config::Config;
use smoothd::dispatch::{DelayQueue, DiscardQueue};
use smoothd::downstream::{EmailClient, HttpDownstream, JobRouter};
use smoothd::scheduler::{Clock, JobKind, ManualClock, Scheduler};
use smoothd::server::{self, AppState};
use smoothd::store::{MemoryStateStore, open_store};
use smoothd::worker::{RetryPolicy, WorkerPool};

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    let log_path = get_log_path();
    if let Some(log_dir) = log_path.parent() {
        fs::create_dir_all(log_dir).context("Failed to create log directory")?;
    }

    // Priority: CLI --log-level > config file > INFO
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    let log_file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .context("Failed to open log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load log level from config file early (before full config load)
    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        None => cmd_serve(config, None).await,
        Some(Command::Serve { bind }) => cmd_serve(config, bind).await,
        Some(Command::State) => cmd_state(&config).await,
        Some(Command::Reset) => cmd_reset(&config).await,
        Some(Command::Preview) => cmd_preview(&config).await,
        Some(Command::Simulate {
            count,
            interval_ms,
            drain,
        }) => cmd_simulate(&config, count, interval_ms, drain).await,
        Some(Command::Logs { follow, lines }) => cmd_logs(follow, lines),
    }
}

/// Run the intake server with its delay queue and worker pool
async fn cmd_serve(mut config: Config, bind: Option<String>) -> Result<()> {
    debug!(?bind, "cmd_serve: called");
    if let Some(bind) = bind {
        config.server.bind = bind;
    }
    let addr = config.server.socket_addr()?;

    let store = open_store(&config.store).context("Failed to open state store")?;
    let (queue, released) = DelayQueue::spawn(config.dispatch.queue_capacity);

    let default_credential = config.dispatch.default_credential();
    if default_credential.is_none() {
        warn!(
            env = %config.dispatch.default_credential_env,
            "No default credential set, requests must carry their own"
        );
    }
    let scheduler = Arc::new(
        Scheduler::new(config.scheduler.clone(), store, Arc::new(queue.clone()))?
            .with_default_credential(default_credential),
    );

    let mut routes = JobRouter::new().with_email(Arc::new(EmailClient::from_config(&config.email)?));
    match HttpDownstream::from_config(&config.dispatch)? {
        Some(http) => {
            info!(endpoint = %http.endpoint(), "HTTP dispatch enabled");
            routes = routes.with_http(Arc::new(http));
        }
        None => warn!("No dispatch.endpoint configured, POST /requests is disabled"),
    }

    let email_api_key = config.email.api_key();
    if email_api_key.is_none() {
        warn!(env = %config.email.api_key_env, "No email API key set, POST /trigger-email is disabled");
    }

    let pool = WorkerPool::new(scheduler.clone(), Arc::new(routes.clone()), config.dispatch.max_concurrent)
        .with_retry(RetryPolicy::from_config(&config.dispatch))
        .spawn(released);

    let listener = TcpListener::bind(addr)
        .await
        .context(format!("Failed to bind {}", addr))?;
    println!(
        "{} smoothd listening on {} ({} req/s, queue {})",
        "✓".green(),
        addr.to_string().cyan(),
        config.scheduler.target_rate,
        config.scheduler.queue_name
    );

    let state = AppState {
        scheduler: scheduler.clone(),
        routes,
        email_api_key,
    };
    server::serve(listener, state, shutdown_signal())
        .await
        .context("Server error")?;

    println!("Draining queued requests...");
    queue.close();
    pool.await.context("Worker pool failed")?;

    let stats = scheduler.stats().await;
    info!(?stats, "Stopped");
    println!(
        "{} Stopped ({} scheduled, {} completed)",
        "✓".green(),
        stats.total_scheduled,
        stats.total_completed
    );
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Scheduler over the configured store that never dispatches
fn offline_scheduler(config: &Config) -> Result<Scheduler> {
    let store = open_store(&config.store).context("Failed to open state store")?;
    Ok(Scheduler::new(config.scheduler.clone(), store, Arc::new(DiscardQueue))?)
}

/// Show the shared backlog record
async fn cmd_state(config: &Config) -> Result<()> {
    debug!("cmd_state: called");
    let scheduler = offline_scheduler(config)?;
    let state = scheduler.queue_state().await?;
    let next_delay = scheduler.preview_delay().await?;

    let last = chrono::DateTime::from_timestamp_millis(state.last_scheduled_time as i64)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "-".to_string());

    println!("{}", "Backlog".bold());
    println!("  Queue:            {}", config.scheduler.queue_name);
    println!("  Key:              {}", config.scheduler.state_key);
    println!("  Pending requests: {}", state.pending_requests.to_string().yellow());
    println!("  Last scheduled:   {}", last);
    println!("  Next delay:       {} ms", next_delay);
    Ok(())
}

/// Clear the backlog
async fn cmd_reset(config: &Config) -> Result<()> {
    debug!("cmd_reset: called");
    let scheduler = offline_scheduler(config)?;
    let before = scheduler.queue_state().await?;
    scheduler.reset().await?;
    println!(
        "{} Backlog reset ({} pending cleared)",
        "✓".green(),
        before.pending_requests
    );
    Ok(())
}

/// Show the delay a request arriving now would get
async fn cmd_preview(config: &Config) -> Result<()> {
    debug!("cmd_preview: called");
    let scheduler = offline_scheduler(config)?;
    let delay = scheduler.preview_delay().await?;
    println!("A request arriving now would wait {} ms", delay.to_string().cyan());
    Ok(())
}

/// Print the delay plan for a synthetic burst
async fn cmd_simulate(config: &Config, count: u32, interval_ms: u64, drain: bool) -> Result<()> {
    debug!(count, interval_ms, drain, "cmd_simulate: called");
    let clock = Arc::new(ManualClock::new(0));
    let scheduler = Scheduler::new(
        config.scheduler.clone(),
        Arc::new(MemoryStateStore::new()),
        Arc::new(DiscardQueue),
    )?
    .with_clock(clock.clone())
    .with_default_credential(Some("simulated".to_string()));

    println!(
        "{:>5}  {:>10}  {:>10}  {:>12}  {:>8}",
        "#".bold(),
        "arrival".bold(),
        "delay".bold(),
        "dispatch".bold(),
        "pending".bold()
    );

    let mut outstanding: Vec<(u64, String)> = Vec::new();
    let mut last_dispatch = 0;
    for i in 0..count {
        let now = clock.now_ms();
        if drain {
            let (due, waiting): (Vec<_>, Vec<_>) = outstanding.into_iter().partition(|(at, _)| *at <= now);
            outstanding = waiting;
            for (_, id) in due {
                scheduler.on_completed(&id).await?;
            }
        }

        let request = scheduler.schedule(JobKind::Http, json!({ "n": i }), None).await?;
        let dispatch_at = request.scheduled_at + request.delay;
        last_dispatch = last_dispatch.max(dispatch_at);
        let pending = scheduler.queue_state().await?.pending_requests;

        let delay = format!("{} ms", request.delay);
        let delay = if request.delay > 0 { delay.yellow() } else { delay.normal() };
        println!(
            "{:>5}  {:>7} ms  {:>10}  {:>9} ms  {:>8}",
            i + 1,
            now,
            delay,
            dispatch_at,
            pending
        );

        outstanding.push((dispatch_at, request.id));
        clock.advance(interval_ms);
    }

    let stats = scheduler.stats().await;
    println!();
    println!(
        "{} requests, {} throttled, max delay {} ms, last dispatch at {} ms",
        stats.total_scheduled, stats.total_throttled, stats.max_delay_ms, last_dispatch
    );
    Ok(())
}

/// Show server logs
fn cmd_logs(follow: bool, lines: usize) -> Result<()> {
    debug!(follow, lines, "cmd_logs: called");
    let log_path = get_log_path();

    if !log_path.exists() {
        println!("No log file found at: {}", log_path.display());
        return Ok(());
    }

    if follow {
        println!("Following log file: {} (Ctrl+C to stop)", log_path.display());
        println!();

        let mut child = std::process::Command::new("tail")
            .args(["-f", "-n", &lines.to_string()])
            .arg(&log_path)
            .spawn()
            .context("Failed to run tail -f")?;

        child.wait()?;
    } else {
        let file = fs::File::open(&log_path).context("Failed to open log file")?;
        let reader = BufReader::new(file);
        let all_lines: Vec<String> = reader.lines().map_while(Result::ok).collect();

        let start = all_lines.len().saturating_sub(lines);
        for line in &all_lines[start..] {
            println!("{}", line);
        }
    }

    Ok(())
}
