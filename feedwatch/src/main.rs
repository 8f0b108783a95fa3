//! feedwatch: stream feed health monitor.
//!
//! Probes registered stream URLs on a lease-based schedule, scores and ranks
//! duplicate feeds of the same channel, and arbitrates the single preview
//! player slot through a heartbeat lock.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use log::{error, info};

mod database;
mod logging;
mod preview;
mod probe;
mod scheduler;
mod scoring;
mod web;

use preview::PreviewLockManager;
use probe::FfprobeClient;
use scheduler::CheckScheduler;
use web::WebState;

const DEFAULT_LISTEN: &str = "0.0.0.0:8080";
const DEFAULT_DATABASE: &str = "feedwatch.db";
const DEFAULT_CONFIG: &str = "feedwatch.toml";
const DEFAULT_LOG_DIR: &str = "logs";
const DEFAULT_LOG_RETENTION_DAYS: u64 = 7;

/// feedwatch - stream feed health monitor
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address for the JSON API to listen on [default: 0.0.0.0:8080]
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Path to the database file [default: feedwatch.db]
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Configuration file path
    #[arg(short = 'f', long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Path to the ffprobe binary [default: ffprobe]
    #[arg(long)]
    ffprobe: Option<PathBuf>,

    /// Run the periodic check scheduler in this process
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    enable_scheduler: bool,

    /// Run one sweep right after startup
    #[arg(long)]
    sweep_on_start: bool,

    /// Seconds without heartbeat after which the preview lock is stale [default: 30]
    #[arg(long)]
    preview_stale_secs: Option<u64>,

    /// Directory where log files are stored [default: logs]
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Number of days to keep log files [default: 7]
    #[arg(long)]
    log_retention_days: Option<u64>,
}

/// Configuration file format.
#[derive(Debug, serde::Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    server: ServerSection,
    #[serde(default)]
    database: DatabaseSection,
    #[serde(default)]
    logging: LoggingSection,
    #[serde(default)]
    probe: ProbeSection,
    #[serde(default)]
    preview: PreviewSection,
}

#[derive(Debug, serde::Deserialize, Default)]
struct ServerSection {
    listen: Option<String>,
}

#[derive(Debug, serde::Deserialize, Default)]
struct DatabaseSection {
    path: Option<String>,
}

#[derive(Debug, serde::Deserialize, Default)]
struct LoggingSection {
    log_dir: Option<String>,
    retention_days: Option<u64>,
    level: Option<String>,
}

#[derive(Debug, serde::Deserialize, Default)]
struct ProbeSection {
    ffprobe_path: Option<String>,
}

#[derive(Debug, serde::Deserialize, Default)]
struct PreviewSection {
    stale_after_secs: Option<u64>,
    proxy_base: Option<String>,
}

fn load_config(path: &PathBuf) -> Result<ConfigFile, Box<dyn std::error::Error>> {
    let contents = std::fs::read_to_string(path)?;
    let config: ConfigFile = toml::from_str(&contents)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load config file: explicit path > auto-detect > default
    let config_path = args.config.clone().or_else(|| {
        let default_path = PathBuf::from(DEFAULT_CONFIG);
        default_path.exists().then_some(default_path)
    });
    let file_config = match &config_path {
        Some(path) => match load_config(path) {
            Ok(c) => {
                eprintln!("Loaded config from: {}", path.display());
                c
            }
            Err(e) => {
                eprintln!("Failed to load config file: {}", e);
                return Err(e);
            }
        },
        None => ConfigFile::default(),
    };

    // Command line takes precedence over the config file
    let log_dir = args
        .log_dir
        .clone()
        .or_else(|| file_config.logging.log_dir.as_ref().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_DIR));
    let log_retention_days = args
        .log_retention_days
        .or(file_config.logging.retention_days)
        .unwrap_or(DEFAULT_LOG_RETENTION_DAYS);
    logging::init_logging(
        &log_dir,
        log_retention_days,
        args.verbose,
        file_config.logging.level.as_deref(),
    )?;

    let listen_addr: SocketAddr = match args.listen {
        Some(addr) => addr,
        None => file_config
            .server
            .listen
            .as_deref()
            .unwrap_or(DEFAULT_LISTEN)
            .parse()?,
    };
    let db_path = args
        .database
        .clone()
        .or_else(|| file_config.database.path.as_ref().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATABASE));
    let ffprobe_path = args
        .ffprobe
        .clone()
        .or_else(|| file_config.probe.ffprobe_path.as_ref().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("ffprobe"));
    let preview_stale = Duration::from_secs(
        args.preview_stale_secs
            .or(file_config.preview.stale_after_secs)
            .unwrap_or(preview::DEFAULT_STALE_AFTER.as_secs()),
    );
    let proxy_base = file_config
        .preview
        .proxy_base
        .as_deref()
        .unwrap_or(preview::DEFAULT_PROXY_BASE);

    info!("Opening database: {:?}", db_path);
    let db = match database::Database::open(&db_path) {
        Ok(db) => db,
        Err(e) => {
            error!("Failed to open database: {}", e);
            return Err(e.into());
        }
    };
    match db.get_check_settings() {
        Ok(settings) => info!("Loaded check settings from database: {:?}", settings),
        Err(e) => {
            error!("Failed to load check settings: {}", e);
            return Err(e.into());
        }
    }
    let db = Arc::new(tokio::sync::Mutex::new(db));

    info!("feedwatch starting...");
    info!("  Listen address: {}", listen_addr);
    info!("  Database: {:?}", db_path);
    info!("  ffprobe: {:?}", ffprobe_path);

    let prober = Arc::new(FfprobeClient::new(&ffprobe_path));
    let scheduler = Arc::new(CheckScheduler::new(db.clone(), prober));
    let preview = Arc::new(
        PreviewLockManager::new(db.clone())
            .with_stale_after(preview_stale)
            .with_proxy_base(proxy_base),
    );
    info!("  Preview stale after: {}s", preview.stale_after().as_secs());

    if args.enable_scheduler {
        info!("Starting check scheduler");
        let _scheduler_handle = Arc::clone(&scheduler).start();

        if args.sweep_on_start {
            info!("Triggering initial sweep...");
            let scheduler_for_sweep = Arc::clone(&scheduler);
            tokio::spawn(async move {
                if let Err(e) = scheduler_for_sweep.trigger_sweep().await {
                    error!("Initial sweep failed: {}", e);
                }
            });
        }
    } else {
        info!("Check scheduler disabled; manual checks only");
    }

    let web_state = Arc::new(WebState::new(db, Arc::clone(&scheduler), preview));

    tokio::select! {
        result = web::start_web_server(listen_addr, web_state) => {
            if let Err(e) = result {
                error!("API server error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown requested");
        }
    }

    scheduler.stop().await;
    Ok(())
}
