//! mask_tallyd - mask detection counter daemon
//!
//! This daemon:
//! 1. Opens the configured state store (in-memory or SQLite)
//! 2. Runs the detection loop on a worker thread over the configured source
//! 3. Polls the store in the background for the dashboard view
//! 4. Serves the read-only snapshot API
//! 5. Publishes the run summary on exit (source exhausted or Ctrl-C)

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use mask_tally::{
    api::{ApiConfig, ApiServer},
    config::CounterConfig,
    DashboardPoller, DetectionLoop, FileSource, HeadlessSink,
};

#[derive(Parser, Debug)]
#[command(name = "mask_tallyd", about = "Count mask detections from a video feed")]
struct Args {
    /// Config file (JSON, or TOML with a .toml extension)
    #[arg(long, env = "MASK_TALLY_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = CounterConfig::load_from(args.config.as_deref())?;
    let publisher = config.open_publisher()?;
    let registry = config.backend.build_registry()?;
    let backend = registry.select(None)?;
    log::info!(
        "mask_tallyd starting: store={:?} source={} backend={}",
        config.store,
        config.source.path,
        config.backend.name
    );

    let dashboard = DashboardPoller::new(publisher.clone())
        .with_interval(config.poll_interval)
        .with_history_window(config.history_window)
        .spawn()?;

    let api_handle = match &config.api_addr {
        Some(addr) => {
            let api_config = ApiConfig {
                addr: addr.clone(),
                history_window: config.history_window,
            };
            Some(ApiServer::new(api_config, publisher.clone()).spawn()?)
        }
        None => {
            log::info!("snapshot api disabled");
            None
        }
    };

    let quit = Arc::new(AtomicBool::new(false));
    let quit_signal = quit.clone();
    ctrlc::set_handler(move || {
        quit_signal.store(true, Ordering::SeqCst);
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    // Sources and sinks are built on the worker; decoder state stays on one thread.
    let source_config = config.source.clone();
    let worker_publisher = publisher.clone();
    let worker = std::thread::Builder::new()
        .name("detection-loop".to_string())
        .spawn(move || {
            let source = FileSource::new(source_config)?;
            let sink = HeadlessSink::new(quit);
            DetectionLoop::new(
                Box::new(source),
                backend,
                Box::new(sink),
                worker_publisher,
            )
            .run()
        })?;

    log::info!("mask_tallyd running; press Ctrl-C to stop");
    let outcome = worker
        .join()
        .map_err(|_| anyhow!("detection loop thread panicked"));

    let last_view = dashboard.latest();
    let polls = dashboard.polls();
    dashboard.stop()?;
    if let Some(handle) = api_handle {
        handle.stop()?;
    }

    let outcome = outcome??;
    log::info!(
        "stopped ({:?}) after {} frame(s); dashboard last saw {} detection(s) over {} poll(s)",
        outcome.reason,
        outcome.frames,
        last_view.total,
        polls
    );
    println!("{}", serde_json::to_string_pretty(&outcome.summary)?);
    Ok(())
}
