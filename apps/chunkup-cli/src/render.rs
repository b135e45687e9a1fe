//! Terminal rendering of engine events.

use std::io::Write;
use std::time::Duration;

use chunkup_engine::EngineEvent;
use chunkup_transfer::{format_eta, format_size, format_speed};
use tokio::sync::mpsc;
use tracing::debug;

/// `1.00 MB / 2.38 MB (42%)  512.0 KB/s  eta 3s`
pub fn progress_line(
    sent_bytes: u64,
    total_bytes: u64,
    bytes_per_second: f64,
    eta: Option<Duration>,
) -> String {
    let percent = if total_bytes == 0 {
        0.0
    } else {
        sent_bytes as f64 / total_bytes as f64 * 100.0
    };
    let eta = eta.map(format_eta).unwrap_or_else(|| "--".into());
    format!(
        "{} / {} ({percent:.0}%)  {}  eta {eta}",
        format_size(sent_bytes),
        format_size(total_bytes),
        format_speed(bytes_per_second),
    )
}

/// Prints events until the engine is dropped.
pub async fn print_events(mut events: mpsc::Receiver<EngineEvent>) {
    let mut stderr = std::io::stderr();
    while let Some(event) = events.recv().await {
        match event {
            EngineEvent::Progress {
                sent_bytes,
                total_bytes,
                bytes_per_second,
                eta,
            } => {
                let line = progress_line(sent_bytes, total_bytes, bytes_per_second, eta);
                let _ = write!(stderr, "\r{line}    ");
                let _ = stderr.flush();
            }
            EngineEvent::Retrying {
                attempt,
                max_attempts,
                delay,
                error,
            } => {
                eprintln!(
                    "\nretry {attempt}/{max_attempts} in {}s: {error}",
                    delay.as_secs()
                );
            }
            EngineEvent::ChunkSkipped { range } => {
                debug!(range = %range, "already on the server");
            }
            EngineEvent::StateChanged(state) => debug!(state = %state, "engine state"),
            EngineEvent::Failed { error } => eprintln!("\nupload failed: {error}"),
            EngineEvent::SessionInvalidated => {
                eprintln!("\nsession expired, run `chunkup login` again");
            }
            EngineEvent::Completed(_) => eprintln!(),
            EngineEvent::ChunkAcknowledged { .. } | EngineEvent::MetadataUpdated(_) => {}
        }
    }
}
