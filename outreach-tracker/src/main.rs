//! Outreach Tracker - Native Messaging host
//!
//! Launched by the browser when the extension connects. Reads page mirror
//! updates and clicks from stdin, writes acknowledgements to stdout, and
//! records every tracked outreach action in the local event queue.
//!
//! # Usage
//!
//! ```bash
//! outreach-tracker [--config <PATH>]
//! ```

use outreach_store::EventQueue;
use outreach_tracker::reporter::persist_messages;
use outreach_tracker::{bridge, ActionReporter, ClickRouter, Config, Document};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Page URL assumed until the first snapshot arrives
const INITIAL_LOCATION: &str = "about:blank";

fn config_path_from_args() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
    }
    None
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = config_path_from_args().unwrap_or_else(Config::default_config_path);
    let loaded = Config::try_load_from_path(&config_path);
    let config = match &loaded {
        Ok(Some(config)) => config.clone(),
        _ => Config::default(),
    };

    // stdout carries the protocol, so logs go to stderr
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| config.general.log_level.clone()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    info!("Starting Outreach Tracker");
    match loaded {
        Ok(Some(_)) => info!("Loaded configuration from {:?}", config_path),
        Ok(None) => info!("No config file found at {:?}, using defaults", config_path),
        Err(e) => warn!("Ignoring config file {:?}: {}, using defaults", config_path, e),
    }

    if !config.general.enabled {
        info!("Tracking is disabled in configuration, exiting");
        return Ok(());
    }

    let queue_path = config.queue.resolved_path();
    let queue = Arc::new(Mutex::new(EventQueue::open(&queue_path, config.queue.capacity)?));
    info!("Event queue at {:?}", queue_path);

    // Persistence collaborator drains the message sink
    let (sink_tx, sink_rx) = mpsc::channel(config.reporting.sink_capacity.max(1));
    let persistence = tokio::spawn(persist_messages(sink_rx, Arc::clone(&queue)));

    let remote = ActionReporter::remote_from_config(&config.reporting);
    if remote.is_some() {
        info!("Remote reporting enabled");
    }
    let reporter = ActionReporter::new(remote, sink_tx, Arc::clone(&queue));

    let doc = Document::new(INITIAL_LOCATION);
    let router = Arc::new(ClickRouter::install(Arc::clone(&doc), &config, reporter)?);

    // Native messaging is blocking I/O, keep it off the runtime
    let (host_tx, host_rx) = mpsc::channel(256);
    std::thread::spawn(move || {
        bridge::run_native_messaging_loop(std::io::stdin().lock(), std::io::stdout().lock(), host_tx);
    });

    let pump = bridge::pump(host_rx, Arc::clone(&doc), Arc::clone(&router));
    tokio::select! {
        _ = pump => info!("Extension disconnected"),
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!("Failed to listen for Ctrl+C: {}", e);
            }
            info!("Interrupted");
        }
    }

    router.shutdown();
    router.drain().await;

    let status = router.status();
    info!(
        "Tracked {} actions: {} confirmed, {} clicked-only",
        status.tracked, status.confirmed, status.clicked_only
    );

    // Dropping the router releases the last sink sender
    drop(router);
    if let Err(e) = persistence.await {
        warn!("Persistence task failed: {}", e);
    }

    Ok(())
}
