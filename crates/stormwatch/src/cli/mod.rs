//! CLI commands for stormwatch

pub mod run;
pub mod status;
pub mod subscribers;

pub use run::{BotCommand, RunCommand, WatchCommand};
pub use status::StatusCommand;
pub use subscribers::SubscribersCommand;

use tokio::sync::watch;

/// Set up a shutdown channel triggered by Ctrl+C.
///
/// Returns the sender (kept alive by the caller) and a receiver for the
/// long-running work.
pub fn setup_shutdown() -> anyhow::Result<(watch::Sender<()>, watch::Receiver<()>)> {
    let (tx, rx) = watch::channel(());
    let shutdown_tx = tx.clone();
    ctrlc::set_handler(move || {
        log::info!("Received Ctrl+C, shutting down gracefully...");
        let _ = shutdown_tx.send(());
    })?;
    Ok((tx, rx))
}
