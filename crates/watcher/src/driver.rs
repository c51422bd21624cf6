//! The long-running sync worker
//!
//! Validates the two roots, then loops: one pass, reconnect sub-loop when
//! the consecutive-error threshold is hit, sliced inter-pass sleep. Every
//! sleep re-checks the stop flag so cancellation stays prompt.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{info, warn};

use crate::context::Worker;
use crate::engine::run_pass;

/// Sleep slice granularity for stop-flag checks
const SLICE: Duration = Duration::from_millis(50);

/// Run the worker until the stop flag is raised or a root fails validation.
pub(crate) async fn run(w: &mut Worker) {
    if !validate_roots(w).await {
        warn!("root validation failed, worker not starting");
        return;
    }

    let delay = Duration::from_millis(w.config.delay_ms);

    while !w.is_stopped() {
        run_pass(w).await;

        if w.state.err_count >= w.config.max_err_count && !w.is_stopped() {
            reconnect(w).await;
            w.state.err_count = 0;
        }

        sleep_sliced(delay, &w.stop).await;
    }

    info!("sync worker stopped");
}

/// Both roots must stat as directories and survive a list round-trip.
/// A failure is reported with the offending root attached and is terminal.
async fn validate_roots(w: &mut Worker) -> bool {
    let remote_root = w.remote.root().to_string();
    if let Err(err) = w.remote.stat(&remote_root).await {
        w.emit_error(err.with_path(remote_root.as_str())).await;
        return false;
    }
    let dir = w.state.remote_dirs.root().clone();
    if let Err(err) = w.remote.list_dir(&dir).await {
        w.emit_error(err.with_path(remote_root.as_str())).await;
        return false;
    }

    let local_root = w.local.root().to_string();
    if let Err(err) = w.local.stat(&local_root).await {
        w.emit_error(err.with_path(local_root.as_str())).await;
        return false;
    }
    let dir = w.state.local_dirs.root().clone();
    if let Err(err) = w.local.list_dir(&dir).await {
        w.emit_error(err.with_path(local_root.as_str())).await;
        return false;
    }

    true
}

/// Reconnect with additive backoff: the wait starts at `delay_ms`, grows by
/// `delay_ms` per failed attempt, and is capped at the session timeout.
async fn reconnect(w: &mut Worker) {
    let step = Duration::from_millis(w.config.delay_ms);
    let cap = Duration::from_secs(w.config.timeout_sec);
    let mut delay = step;

    info!("error threshold reached, reconnecting");

    while !w.is_stopped() {
        w.remote.disconnect().await;

        let attempt = async {
            w.remote.connect().await?;
            w.remote.authenticate().await
        };
        match attempt.await {
            Ok(()) => {
                info!("reconnected");
                return;
            }
            Err(err) => warn!(error = %err, "reconnect attempt failed"),
        }

        sleep_sliced(delay, &w.stop).await;
        delay = next_backoff(delay, step, cap);
    }
}

/// One additive backoff step, saturating at the cap
fn next_backoff(current: Duration, step: Duration, cap: Duration) -> Duration {
    (current + step).min(cap)
}

/// Sleep `total` in short slices, returning early when the stop flag rises
async fn sleep_sliced(total: Duration, stop: &AtomicBool) {
    let mut remaining = total;
    while !stop.load(Ordering::Acquire) && !remaining.is_zero() {
        let nap = remaining.min(SLICE);
        tokio::time::sleep(nap).await;
        remaining = remaining.saturating_sub(nap);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::time::Instant;

    #[test]
    fn test_backoff_grows_additively_then_caps() {
        let step = Duration::from_millis(200);
        let cap = Duration::from_secs(2);

        let mut delay = step;
        let mut observed = vec![delay];
        for _ in 0..11 {
            delay = next_backoff(delay, step, cap);
            observed.push(delay);
        }

        let expected: Vec<Duration> = [
            200, 400, 600, 800, 1000, 1200, 1400, 1600, 1800, 2000, 2000, 2000,
        ]
        .into_iter()
        .map(Duration::from_millis)
        .collect();
        assert_eq!(observed, expected);
    }

    #[tokio::test]
    async fn test_sleep_sliced_returns_early_on_stop() {
        let stop = AtomicBool::new(true);
        let started = Instant::now();
        sleep_sliced(Duration::from_secs(10), &stop).await;
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_sleep_sliced_sleeps_roughly_the_requested_time() {
        let stop = AtomicBool::new(false);
        let started = Instant::now();
        sleep_sliced(Duration::from_millis(120), &stop).await;
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(120));
        assert!(elapsed < Duration::from_secs(2));
    }
}
