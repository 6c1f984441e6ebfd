// Stillpoint command line front end
// Lists guided meditations, plays one with live loudness, and maintains the cache

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use stillpoint::assets::{AssetCache, HttpAssetStore};
use stillpoint::audio::DesktopAudioSession;
use stillpoint::haptics::NullHapticEngine;
use stillpoint::session::PlaybackSession;
use stillpoint::settings::{OutputKind, PipelineSettings};
use stillpoint::state::{format_time, PlaybackState};

#[derive(Parser, Debug)]
#[command(name = "stillpoint")]
#[command(about = "Guided meditation player with loudness-driven haptics")]
#[command(version)]
struct Cli {
    /// Directory holding settings.json and the cache index
    #[arg(long, env = "STILLPOINT_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Override the remote store base URL
    #[arg(long, env = "STILLPOINT_STORE_URL")]
    store_url: Option<String>,

    /// Play without an audio device
    #[arg(long)]
    silent: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List available meditations
    List,
    /// Play a meditation by id
    Play {
        id: String,
        /// Start this many seconds in
        #[arg(long)]
        start: Option<f64>,
        /// Disable haptic feedback
        #[arg(long)]
        no_haptics: bool,
    },
    /// Inspect or clean the local cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand, Debug)]
enum CacheAction {
    /// Show downloaded payloads
    List,
    /// Remove one downloaded payload
    Evict { id: String },
    /// Drop stale entries and stray files
    Purge,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stillpoint=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let app_dir = cli
        .data_dir
        .clone()
        .unwrap_or_else(PipelineSettings::default_app_dir);

    let mut settings = PipelineSettings::load(&app_dir)
        .with_context(|| format!("Failed to load settings from {}", app_dir.display()))?;
    if let Some(url) = &cli.store_url {
        settings.store.base_url = url.clone();
    }
    if cli.silent {
        settings.playback.output = OutputKind::Silent;
    }

    let store = HttpAssetStore::new(&settings.store).context("Failed to build store client")?;
    let cache = Arc::new(
        AssetCache::open(Arc::new(store), &settings.cache, &app_dir)
            .context("Failed to open asset cache")?,
    );

    match cli.command {
        Command::List => list(&cache).await,
        Command::Play {
            id,
            start,
            no_haptics,
        } => {
            if no_haptics {
                settings.haptics.enabled = false;
            }
            play(cache, &settings, &id, start).await
        }
        Command::Cache { action } => maintain(&cache, action),
    }
}

async fn list(cache: &AssetCache) -> Result<()> {
    let listing = cache.list_assets().await?;
    if let Some(warning) = &listing.warning {
        println!("(offline: {})", warning);
    }
    for asset in &listing.assets {
        let marker = if asset.is_cached() { "*" } else { " " };
        let title = if asset.title.is_empty() {
            asset.id.as_str()
        } else {
            asset.title.as_str()
        };
        println!(
            "{} {:<24} {:>6}  {}",
            marker,
            asset.id,
            format_time(asset.duration_seconds as f64),
            title
        );
    }
    Ok(())
}

async fn play(
    cache: Arc<AssetCache>,
    settings: &PipelineSettings,
    id: &str,
    start: Option<f64>,
) -> Result<()> {
    let listing = cache.list_assets().await?;
    if let Some(warning) = &listing.warning {
        warn!("{}", warning);
    }
    let Some(asset) = listing.assets.into_iter().find(|a| a.id == id) else {
        bail!("No meditation with id {}", id);
    };

    let session = PlaybackSession::new(
        cache,
        settings,
        Box::new(NullHapticEngine),
        Box::new(DesktopAudioSession::new()),
    );
    let mut snapshots = session.subscribe();

    let duration = session.play(&asset).await?;
    info!("Playing {} ({})", asset.id, format_time(duration));
    if let Some(start) = start {
        if !session.seek(start) {
            warn!("Start position {} is past the end", start);
        }
    }
    println!("[enter] pause/resume  [b] back  [h] haptics  [q] quit");

    let mut input = BufReader::new(tokio::io::stdin()).lines();
    let mut haptics_enabled = settings.haptics.enabled;
    let mut last_second = -1i64;

    loop {
        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                match &snapshot.state {
                    PlaybackState::Completed => {
                        println!("Session complete");
                        break;
                    }
                    PlaybackState::Failed(reason) => {
                        session.teardown();
                        bail!("Playback failed: {}", reason);
                    }
                    PlaybackState::Idle => break,
                    _ => {}
                }
                let second = snapshot.current_time as i64;
                if second != last_second {
                    last_second = second;
                    println!(
                        "{} / {}  loudness {:.2}",
                        format_time(snapshot.current_time),
                        format_time(snapshot.duration),
                        snapshot.loudness
                    );
                }
            }
            line = input.next_line() => {
                match line?.as_deref().map(str::trim) {
                    Some("") => {
                        if session.snapshot().is_playing {
                            session.pause();
                        } else {
                            session.resume();
                        }
                    }
                    Some("b") => {
                        session.skip_back(settings.playback.skip_back_secs);
                    }
                    Some("h") => {
                        haptics_enabled = !haptics_enabled;
                        session.set_haptics_enabled(haptics_enabled);
                    }
                    Some("q") | None => break,
                    Some(other) => println!("Unknown command: {}", other),
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    session.teardown();
    Ok(())
}

fn maintain(cache: &AssetCache, action: CacheAction) -> Result<()> {
    match action {
        CacheAction::List => {
            for entry in cache.cached_entries()? {
                println!(
                    "{:<24} {:<12} {}  {}",
                    entry.asset_id,
                    entry.version_tag,
                    entry.cached_at.format("%Y-%m-%d %H:%M"),
                    entry.local_path.display()
                );
            }
        }
        CacheAction::Evict { id } => {
            if cache.evict(&id)? {
                println!("Evicted {}", id);
            } else {
                println!("{} is not cached", id);
            }
        }
        CacheAction::Purge => {
            let report = cache.purge_orphans()?;
            println!(
                "Removed {} stale entries and {} stray files",
                report.entries_removed, report.files_removed
            );
        }
    }
    Ok(())
}
