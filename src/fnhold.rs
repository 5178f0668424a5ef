use std::sync::Arc;

use anyhow::{Context, Result};
use fnhold::notify::NotificationLayer;
use fnhold::{
    APP_NAME_PRETTY, ApplyThread, ConfigManager, GestureStateMachine, HidKeySource,
    MAX_ACTIVATION_DELAY_MS, Monitor, RecordingSignal, Scheduler, VERSION,
};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

fn main() -> Result<()> {
    // Load config first, it decides the log level
    let config_manager = ConfigManager::new()?;
    let config = config_manager.load()?;
    // save back the config to create the file if it doesn't exist
    config_manager.save(&config)?;

    // Initialize the logger
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("FNHOLD_LOG")
                .unwrap_or_else(|_| EnvFilter::new(config.log_level())),
        )
        .finish()
        .with(config.notify_on_error().then(NotificationLayer::new))
        .init();

    info!(path = %config_manager.config_path().display(), "loaded config");
    if config.activation_delay_clamped() {
        warn!(
            configured_ms = config.activation_delay_ms,
            max_ms = MAX_ACTIVATION_DELAY_MS,
            "Activation delay too long, using {MAX_ACTIVATION_DELAY_MS}ms"
        );
    }

    // Every gesture transition runs on this thread
    let apply = ApplyThread::spawn().context("Failed to start apply thread")?;
    let scheduler: Arc<dyn Scheduler> = Arc::new(apply.scheduler());

    let (signal_tx, mut signal_rx) = mpsc::unbounded_channel();
    let machine = GestureStateMachine::new(
        scheduler.clone(),
        config.activation_delay(),
        move |recording| {
            signal_tx.send(RecordingSignal::from(recording)).ok();
        },
    );

    let mut monitor = Monitor::new(machine, scheduler, Box::new(HidKeySource::new()));
    if let Err(err) = monitor.start() {
        error!("Cannot monitor the Fn key: {err}");
        return Err(err).context("Failed to start key monitor");
    }

    info!("{APP_NAME_PRETTY} {VERSION} ready, hold Fn to record");

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build runtime")?;

    runtime.block_on(async {
        loop {
            tokio::select! {
                signal = signal_rx.recv() => match signal {
                    Some(signal) => info!(%signal, "Recording {signal}"),
                    None => break,
                },
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutting down");
                    break;
                }
            }
        }
    });

    // Ends a recording still in progress before the apply thread goes away
    monitor.stop();
    drop(monitor);
    drop(apply);

    while let Ok(signal) = signal_rx.try_recv() {
        info!(%signal, "Recording {signal}");
    }

    Ok(())
}
