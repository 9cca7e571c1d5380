//! Transfer progress: instantaneous speed/ETA and throttled status edits.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use tokio::{sync::watch, task::JoinHandle};

use crate::{domain::MessageRef, formatting::escape_html, messaging::port::MessagingClient};

const MIB: f64 = 1024.0 * 1024.0;
const MIN_ELAPSED_SECS: f64 = 0.1;
const BAR_CELLS: usize = 10;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProgressSnapshot {
    pub percent: f64,
    pub done_mb: f64,
    pub total_mb: f64,
    pub speed_mbps: f64,
    /// Zero when the speed is unknown.
    pub eta_minutes: f64,
}

/// Speed is measured between consecutive observations, not averaged.
/// One tracker per transfer.
#[derive(Debug)]
pub struct ProgressTracker {
    previous_done: u64,
    previous_at: Instant,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self {
            previous_done: 0,
            previous_at: Instant::now(),
        }
    }

    pub fn observe(&mut self, done: u64, total: u64) -> ProgressSnapshot {
        self.observe_at(done, total, Instant::now())
    }

    pub fn observe_at(&mut self, done: u64, total: u64, now: Instant) -> ProgressSnapshot {
        let percent = if total == 0 {
            0.0
        } else {
            (done as f64 / total as f64 * 100.0).min(100.0)
        };

        let delta = done.saturating_sub(self.previous_done) as f64;
        let elapsed = now
            .saturating_duration_since(self.previous_at)
            .as_secs_f64()
            .max(MIN_ELAPSED_SECS);
        let bytes_per_sec = delta / elapsed;
        let eta_minutes = if bytes_per_sec > 0.0 {
            total.saturating_sub(done) as f64 / bytes_per_sec / 60.0
        } else {
            0.0
        };

        self.previous_done = done;
        self.previous_at = now;

        ProgressSnapshot {
            percent,
            done_mb: done as f64 / MIB,
            total_mb: total as f64 / MIB,
            speed_mbps: delta * 8.0 / (MIB * elapsed),
            eta_minutes,
        }
    }
}

/// Status message body for a snapshot (Telegram HTML).
pub fn render(title: &str, s: &ProgressSnapshot) -> String {
    let filled = ((s.percent / 10.0) as usize).min(BAR_CELLS);
    let bar = format!("{}{}", "♦".repeat(filled), "◇".repeat(BAR_CELLS - filled));
    format!(
        "╭──────────────────╮\n\
         │ <b>{}</b>\n\
         ├──────────\n\
         │ {bar}\n\n\
         │ <b>Progress:</b> {:.2}%\n\
         │ <b>Done:</b> {:.2} MB / {:.2} MB\n\
         │ <b>Speed:</b> {:.2} Mbps\n\
         │ <b>ETA:</b> {:.2} min\n\
         ╰──────────────────╯",
        escape_html(title),
        s.percent,
        s.done_mb,
        s.total_mb,
        s.speed_mbps,
        s.eta_minutes,
    )
}

/// Edits a status message with progress at most once per interval.
///
/// Byte counts are pushed through a watch channel from the (sync) progress
/// callback; a spawned task renders the latest value. Dropping the reporter
/// stops the task.
pub struct StatusReporter {
    tx: watch::Sender<Option<(u64, u64)>>,
    task: JoinHandle<()>,
}

impl StatusReporter {
    pub fn start(
        client: Arc<dyn MessagingClient>,
        status: MessageRef,
        title: impl Into<String>,
        interval: Duration,
    ) -> Self {
        let title = title.into();
        let (tx, mut rx) = watch::channel(None::<(u64, u64)>);
        let task = tokio::spawn(async move {
            let mut tracker = ProgressTracker::new();
            while rx.changed().await.is_ok() {
                let latest = *rx.borrow_and_update();
                let Some((done, total)) = latest else {
                    continue;
                };
                let snapshot = tracker.observe(done, total);
                if let Err(e) = client.edit_html(status, &render(&title, &snapshot)).await {
                    tracing::debug!(error = %e, "progress edit failed");
                }
                tokio::time::sleep(interval).await;
            }
        });
        Self { tx, task }
    }

    /// Progress callback to hand to a download/upload call.
    pub fn callback(&self) -> impl Fn(u64, u64) + Send + Sync + '_ {
        move |done, total| {
            self.tx.send_replace(Some((done, total)));
        }
    }
}

impl Drop for StatusReporter {
    fn drop(&mut self) {
        self.task.abort();
    }
}
