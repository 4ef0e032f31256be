mod config;
mod console_rules;
mod custom_maps;
mod event;
mod game_state;
mod gamemodes;
mod log_scanner;
mod logging;
mod map_cache;
mod paths;
mod process_monitor;
mod status;
mod steam;
mod tracker;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::event::TrackerEvent;
use crate::process_monitor::SysinfoTable;
use crate::status::StatusFilePublisher;
use crate::tracker::Tracker;

#[tokio::main]
async fn main() {
    logging::init();

    // ── App data directory ────────────────────────────────────────────────────
    let app_dir = paths::app_data_dir();
    if let Err(e) = std::fs::create_dir_all(&app_dir) {
        tracing::error!("Failed to create app data directory {}: {e}", app_dir.display());
        std::process::exit(1);
    }

    // ── Configuration ─────────────────────────────────────────────────────────
    let config_path = paths::config_file_path();
    let initial_config = config::load_or_default(&config_path).unwrap_or_else(|e| {
        tracing::warn!(target: "config", "Using defaults: {e:#}");
        config::Config::default()
    });
    let poll_secs = Arc::new(AtomicU64::new(initial_config.poll_interval_secs()));

    // ── Tracker ───────────────────────────────────────────────────────────────
    // The blocking HTTP client must be built and dropped outside async context.
    let publisher = StatusFilePublisher::new(paths::status_file_path());
    let mut tracker = tokio::task::block_in_place(|| {
        Tracker::new(
            SysinfoTable::new(),
            publisher,
            initial_config,
            paths::custom_map_cache_path(),
        )
    });

    let (event_tx, mut event_rx) = mpsc::channel::<TrackerEvent>(32);

    // ── Background tasks ──────────────────────────────────────────────────────
    tokio::spawn(config::watch_config(config_path, event_tx.clone()));

    {
        let tx = event_tx.clone();
        let poll_secs = Arc::clone(&poll_secs);
        tokio::spawn(async move {
            loop {
                if tx.send(TrackerEvent::Tick).await.is_err() {
                    break;
                }
                let secs = poll_secs.load(Ordering::Relaxed);
                tokio::time::sleep(Duration::from_secs(secs)).await;
            }
        });
    }

    // Graceful shutdown on Ctrl+C.
    {
        let tx = event_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = tx.send(TrackerEvent::Shutdown).await;
            }
        });
    }

    tracing::info!(
        "Watching for Team Fortress 2, status at {}",
        tracker.publisher().status_path().display()
    );

    // ── Event loop ────────────────────────────────────────────────────────────
    while let Some(evt) = event_rx.recv().await {
        match evt {
            TrackerEvent::Tick => {
                // Process scans, file reads and map lookups all block.
                tokio::task::block_in_place(|| {
                    tracker.tick();
                });
            }

            TrackerEvent::ConfigReloaded(new_config) => {
                tracing::info!(target: "config", "Config reloaded");
                poll_secs.store(new_config.poll_interval_secs(), Ordering::Relaxed);
                tokio::task::block_in_place(|| tracker.apply_config(new_config));
            }

            TrackerEvent::Shutdown => {
                tracing::info!("Shutting down");
                tracker.shutdown();
                break;
            }
        }
    }

    tokio::task::block_in_place(move || drop(tracker));
}
