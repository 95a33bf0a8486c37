//! Progress display for long-running commands

use ferry_engine::types::RunStats;
use ferry_engine::Engine;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

const TICK: Duration = Duration::from_millis(200);

/// Create a spinner for indeterminate operations
pub fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// One-line view of live run counters
pub fn format_counts(stats: &RunStats) -> String {
    let load = |c: &std::sync::atomic::AtomicU64| c.load(Ordering::Relaxed);
    let skipped = load(&stats.skipped_completed) + load(&stats.skipped_failed) + load(&stats.duplicates);
    format!(
        "{} succeeded, {} failed, {} of {} dispatched done, {} skipped",
        load(&stats.succeeded),
        load(&stats.failed),
        stats.finished(),
        load(&stats.dispatched),
        skipped
    )
}

/// Format a duration as `1h 02m 03s`, `2m 03s` or `4.2s`
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    match secs {
        0..=59 => format!("{:.1}s", elapsed.as_secs_f64()),
        60..=3599 => format!("{}m {:02}s", secs / 60, secs % 60),
        _ => format!("{}h {:02}m {:02}s", secs / 3600, (secs % 3600) / 60, secs % 60),
    }
}

/// Spinner refreshed from an engine's counters until finished
pub struct RunProgress {
    bar: ProgressBar,
    ticker: JoinHandle<()>,
}

impl RunProgress {
    pub fn start(engine: Arc<Engine>, message: &str) -> Self {
        let bar = create_spinner(message);
        let ticker = {
            let bar = bar.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(TICK);
                loop {
                    interval.tick().await;
                    bar.set_message(format_counts(&engine.stats()));
                }
            })
        };
        Self { bar, ticker }
    }

    pub fn finish(self) {
        self.ticker.abort();
        self.bar.finish_and_clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(Duration::from_millis(4200)), "4.2s");
        assert_eq!(format_elapsed(Duration::from_secs(123)), "2m 03s");
        assert_eq!(format_elapsed(Duration::from_secs(3723)), "1h 02m 03s");
    }

    #[test]
    fn test_format_counts() {
        let stats = RunStats::new();
        stats.succeeded.store(5, Ordering::Relaxed);
        stats.failed.store(1, Ordering::Relaxed);
        stats.dispatched.store(8, Ordering::Relaxed);
        stats.skipped_completed.store(2, Ordering::Relaxed);
        assert_eq!(
            format_counts(&stats),
            "5 succeeded, 1 failed, 6 of 8 dispatched done, 2 skipped"
        );
    }
}
