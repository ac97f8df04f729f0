mod clients;
mod config;
mod monitor;
mod serve;
mod signals;

use clap::Parser;
use clients::jellyfin::JellyfinClient;
use clients::qbittorrent::QbittorrentClient;
use config::{DaemonConfig, Endpoints};
use monitor::{Monitor, MonitorSettings};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Pauses qBittorrent while Jellyfin has active playback sessions and
/// resumes it once playback stops.
#[derive(Parser, Debug)]
#[command(name = "quietseed", version, about)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "quietseed.toml")]
    config: PathBuf,

    /// Session count at which torrents are paused (overrides config)
    #[arg(long)]
    threshold: Option<u32>,

    /// Seconds between session polls (overrides config)
    #[arg(long)]
    poll_interval: Option<u64>,

    /// Log pause/resume requests instead of sending them
    #[arg(long)]
    dry_run: bool,

    /// Validate config and print resolved settings, don't serve
    #[arg(long)]
    check: bool,

    /// Debug logging (poll ticks, requests)
    #[arg(short, long)]
    verbose: bool,
}

fn log_filter(verbose: bool) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    let debug = verbose
        || std::env::var("LOG_LEVEL")
            .map(|v| v.eq_ignore_ascii_case("debug"))
            .unwrap_or(false);
    EnvFilter::new(if debug {
        "quietseed=debug,tower_http=debug"
    } else {
        "quietseed=info"
    })
}

fn load_config<F>(cli: &Cli, env: F) -> Result<(DaemonConfig, Endpoints), config::ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = DaemonConfig::load(&cli.config)?;
    config.apply_env(env);

    if let Some(threshold) = cli.threshold {
        config.monitor.threshold = threshold;
    }
    if let Some(secs) = cli.poll_interval {
        config.monitor.poll_interval_secs = secs;
    }
    if cli.dry_run {
        config.torrent.dry_run = true;
    }

    let endpoints = config.validate()?;
    Ok((config, endpoints))
}

fn print_settings(config: &DaemonConfig, endpoints: &Endpoints) {
    println!("quietseed v{}", env!("CARGO_PKG_VERSION"));
    println!("torrent url:   {}", endpoints.torrent_url);
    println!("media url:     {}", endpoints.media_url);
    println!("media api key: <redacted>");
    println!("threshold:     {}", config.monitor.threshold);
    println!("poll interval: {}s", config.monitor.poll_interval_secs);
    println!("dry run:       {}", config.torrent.dry_run);
    println!("listen:        {}:{}", config.serve.bind, config.serve.port);
}

fn build_monitor(
    config: &DaemonConfig,
    endpoints: &Endpoints,
) -> Result<Monitor, clients::ClientError> {
    let torrents = QbittorrentClient::new(
        &endpoints.torrent_url,
        Duration::from_secs(config.torrent.timeout_secs),
        config.torrent.dry_run,
    )?;
    let sessions = JellyfinClient::new(
        &endpoints.media_url,
        &endpoints.media_api_key,
        Duration::from_secs(config.media.timeout_secs),
    )?;

    let settings = MonitorSettings {
        threshold: config.monitor.threshold,
        poll_interval: config.poll_interval(),
    };
    Ok(Monitor::new(Arc::new(sessions), Arc::new(torrents), settings))
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(log_filter(cli.verbose))
        .with_target(false)
        .with_thread_ids(true)
        .init();

    tracing::debug!(?cli, "parsed CLI arguments");

    let (config, endpoints) = match load_config(&cli, |name| std::env::var(name).ok()) {
        Ok(loaded) => loaded,
        Err(e) => {
            tracing::error!("configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };

    if cli.check {
        print_settings(&config, &endpoints);
        return ExitCode::SUCCESS;
    }

    let monitor = match build_monitor(&config, &endpoints) {
        Ok(m) => m,
        Err(e) => {
            tracing::error!("monitor initialization failed: {e}");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!(
        threshold = config.monitor.threshold,
        dry_run = config.torrent.dry_run,
        "quietseed v{} starting",
        env!("CARGO_PKG_VERSION")
    );

    let mut server = tokio::spawn(serve::run(config.serve.clone(), monitor.clone()));
    tracing::info!("waiting for requests");

    let mut code = ExitCode::SUCCESS;
    tokio::select! {
        sig = signals::wait_for_shutdown() => {
            if let Err(e) = sig {
                tracing::error!("failed to install signal handlers: {e}");
                code = ExitCode::FAILURE;
            }
        }
        res = &mut server => {
            // The listener only returns on its own when something broke.
            match res {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!("http server failed: {e}"),
                Err(e) => tracing::error!("http server task failed: {e}"),
            }
            monitor.shutdown().await;
            return ExitCode::FAILURE;
        }
    }

    monitor.shutdown().await;
    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            tracing::error!("http server failed: {e}");
            code = ExitCode::FAILURE;
        }
        Err(e) => {
            tracing::error!("http server task failed: {e}");
            code = ExitCode::FAILURE;
        }
    }

    tracing::info!("exiting");
    code
}
