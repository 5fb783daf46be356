//! Malaysian amateur radio callbook: directory API, realtime presence and
//! license-expiry reminders.

mod config;
mod db;
mod directory;
mod domain;
mod error;
mod notify;
mod realtime;
mod services;
mod types;
mod web;

use chrono::Utc;
use clap::{Args as ClapArgs, Parser, Subcommand};
use config::AppConfig;
use db::Database;
use directory::persist::FilterStore;
use directory::virtualizer::{Virtualizer, row_count, row_items, should_load_more};
use directory::ListingController;
use domain::filters::{ContactFilter, Filters, RecencyWindow};
use domain::license::{LicenseClass, LicenseStatus};
use domain::regions::normalize_state;
use realtime::RealtimeHub;
use services::auth::HostedAuth;
use services::reminder::{self, Dispatchers};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the web API (and the reminder schedule when enabled). Default.
    Serve,
    /// Run one reminder sweep and print the report.
    Remind,
    /// Page through the directory in the terminal.
    Browse(BrowseArgs),
}

#[derive(ClapArgs, Debug)]
struct BrowseArgs {
    #[arg(short, long)]
    search: Option<String>,
    #[arg(long, value_parser = parse_state)]
    state: Option<String>,
    #[arg(long)]
    district: Option<String>,
    #[arg(long, value_parser = parse_with(LicenseClass::parse))]
    class: Option<LicenseClass>,
    #[arg(long, value_parser = parse_with(LicenseStatus::parse))]
    status: Option<LicenseStatus>,
    /// Added within the last 7, 30 or 90 days.
    #[arg(long, value_parser = parse_with(RecencyWindow::from_days))]
    recent: Option<RecencyWindow>,
    /// phone, email, any or none.
    #[arg(long, value_parser = parse_with(ContactFilter::parse))]
    contact: Option<ContactFilter>,
    /// Forget saved filters before browsing.
    #[arg(long)]
    reset: bool,
    /// Terminal viewport width in pixels, for the column layout.
    #[arg(long, default_value_t = 1280.0)]
    width: f64,
    #[arg(long, default_value_t = 960.0)]
    height: f64,
    /// Stop after this many screens.
    #[arg(long, default_value_t = 10)]
    screens: usize,
}

impl BrowseArgs {
    fn has_filters(&self) -> bool {
        self.search.is_some()
            || self.state.is_some()
            || self.district.is_some()
            || self.class.is_some()
            || self.status.is_some()
            || self.recent.is_some()
            || self.contact.is_some()
    }

    fn filters(&self) -> Filters {
        Filters {
            state: self.state.clone(),
            district: self.district.clone(),
            license_class: self.class,
            license_status: self.status,
            recent: self.recent,
            contact: self.contact,
        }
    }
}

/// Height of one printed entry, in the virtualizer's pixel units.
const LINE_HEIGHT: f64 = 20.0;

fn parse_state(input: &str) -> Result<String, String> {
    normalize_state(input)
        .map(ToString::to_string)
        .ok_or_else(|| format!("unknown state: {input}"))
}

fn parse_with<T: 'static>(
    parse: fn(&str) -> Option<T>,
) -> impl Fn(&str) -> Result<T, String> + Clone + Send + Sync + 'static {
    move |input| parse(input).ok_or_else(|| format!("unrecognised value: {input}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config_path = PathBuf::from(&args.config);
    let config = AppConfig::load(&config_path)?;

    let default_level = config.log_level.clone().unwrap_or_else(|| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_level.into()),
        )
        .with_target(false)
        .init();

    info!(config_path = ?config_path, "Loaded config");

    let db_path = config.get_db_path(&config_path);
    let db_path_str = db_path.to_string_lossy().to_string();
    debug!(db_path = db_path_str, "Database path");
    let db = Database::new(&db_path_str).await?;

    let result = match args.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config, db.clone()).await,
        Command::Remind => remind(&config, &db).await,
        Command::Browse(browse_args) => browse(&config, &config_path, db.clone(), &browse_args).await,
    };
    db.close().await;
    result
}

async fn serve(config: AppConfig, db: Database) -> anyhow::Result<()> {
    info!("Starting callbook server");
    let config = Arc::new(config);
    let dispatch = Dispatchers::from_config(&config.reminders)?;
    let auth = HostedAuth::new(&config.auth)?;
    let shutdown = CancellationToken::new();

    let schedule = if config.reminders.schedule_enabled {
        info!(
            interval_seconds = config.reminders.interval_seconds,
            "Reminder schedule enabled"
        );
        Some(reminder::spawn_schedule(
            db.clone(),
            config.clone(),
            dispatch.clone(),
            shutdown.clone(),
        ))
    } else {
        None
    };

    let state = Arc::new(web::WebState {
        config,
        db,
        auth: Arc::new(auth),
        hub: RealtimeHub::new(),
        dispatch,
    });
    let server = tokio::spawn(web::run_server(state, shutdown.clone()));

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
    }
    shutdown.cancel();

    if let Err(e) = server.await {
        error!(error = %e, "Web server task failed");
    }
    if let Some(schedule) = schedule
        && let Err(e) = schedule.await
    {
        error!(error = %e, "Reminder schedule task failed");
    }
    Ok(())
}

async fn remind(config: &AppConfig, db: &Database) -> anyhow::Result<()> {
    let dispatch = Dispatchers::from_config(&config.reminders)?;
    let today = Utc::now().date_naive();
    let report = reminder::run(db, config, &dispatch, today).await?;

    let mut out = std::io::stdout().lock();
    writeln!(out, "Processed {} callsign(s)", report.processed)?;
    for result in &report.results {
        writeln!(
            out,
            "{:<10} {:>3}d  {:<8}  {}",
            result.callsign,
            result.days_until,
            result.channel.as_str(),
            result.status
        )?;
    }
    Ok(())
}

async fn browse(
    config: &AppConfig,
    config_path: &Path,
    db: Database,
    args: &BrowseArgs,
) -> anyhow::Result<()> {
    let store = FilterStore::new(config.get_local_store_path(config_path));
    let controller = ListingController::new(
        Arc::new(db),
        Some(store),
        config.directory.page_size,
        Duration::from_millis(config.directory.load_more_delay_ms),
    );

    let first = if args.reset {
        controller.reset_filters().await
    } else if args.has_filters() {
        let filters = args.filters();
        let search = args.search.clone().unwrap_or_default();
        if search != controller.filter().search {
            controller.set_search(&search).await;
        }
        controller.set_filters(filters).await
    } else {
        controller.fetch(0, true).await
    };
    debug!(?first, "Initial page");

    let mut out = std::io::stdout().lock();
    let mut virtualizer = Virtualizer::new(args.width);
    let mut scroll = 0.0;
    let mut next_row = 0;
    let mut retried = false;

    for _ in 0..args.screens {
        let snapshot = controller.snapshot();
        if let Some(message) = &snapshot.error {
            warn!(%message, "Listing error");
            writeln!(out, "! {message}")?;
            if retried {
                break;
            }
            retried = true;
            controller.dismiss_error();
            controller.retry().await;
            scroll = 0.0;
            next_row = 0;
            continue;
        }

        let items = snapshot.items.len();
        let window = virtualizer.window(items, scroll, args.height);
        if let Some(window) = window {
            debug!(rows = ?window.rows(), items = ?window.item_range(items), "Visible window");
            let columns = window.columns;
            let start = next_row;
            for row in window.rows().filter(|r| *r >= start) {
                let entries = row_items(row, columns, items);
                virtualizer.measure(row, entries.len() as f64 * LINE_HEIGHT);
                for entry in &snapshot.items[entries] {
                    writeln!(
                        out,
                        "{:<10} {:<32} {:<8} {:<14} {}{}",
                        entry.record.callsign,
                        entry.record.name,
                        entry.license_class.label(),
                        entry.record.state.as_deref().unwrap_or("-"),
                        match entry.license.days_until {
                            Some(days) => format!("{days}d"),
                            None => "-".to_string(),
                        },
                        if entry.is_donator { "  *" } else { "" },
                    )?;
                }
                next_row = row + 1;
            }
        }

        let rows = row_count(items, virtualizer.columns());
        if should_load_more(window, rows, snapshot.has_more, controller.is_loading()) {
            controller.load_more().await;
        } else if next_row >= rows && !snapshot.has_more {
            break;
        }
        scroll += args.height;
    }

    let snapshot = controller.snapshot();
    writeln!(
        out,
        "{} loaded, {:.0}px tall{}",
        snapshot.items.len(),
        virtualizer.total_height(snapshot.items.len()),
        if snapshot.has_more { ", more available" } else { "" }
    )?;
    Ok(())
}
