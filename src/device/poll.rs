use std::time::Duration;
use log::{debug, warn};
use tokio::spawn;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::device::constants::{DEFAULT_POLL_INTERVAL, MIN_POLL_INTERVAL};

/// Converts a requested interval into the one actually used: at least 60ms, and the 200ms
/// default when the request is not a finite number or does not fit in a `Duration`.
pub fn clamp_interval(interval_seconds: f64) -> Duration {
    let default = Duration::from_secs_f64(DEFAULT_POLL_INTERVAL);

    if !interval_seconds.is_finite() {
        warn!("Poll interval {} is not finite, using {}s", interval_seconds, DEFAULT_POLL_INTERVAL);
        return default;
    }

    match Duration::try_from_secs_f64(interval_seconds.max(MIN_POLL_INTERVAL)) {
        Ok(period) => period,
        Err(err) => {
            warn!("Poll interval {} is out of range ({}), using {}s", interval_seconds, err, DEFAULT_POLL_INTERVAL);
            default
        },
    }
}

#[derive(Debug)]
struct PollSession {
    started: Instant,
    interval: Duration,
    cancel: CancellationToken,
}

/// A cancellable repeating task. It fires once immediately and then every interval, on its own
/// tokio task.
///
/// Every firing receives the session's token. The callback must check it while holding the
/// same lock that guards `stop`, which is what makes "no fire after stop" hold even when a tick
/// is already running concurrently with `stop`.
#[derive(Debug, Default)]
pub struct PollingTimer {
    session: Option<PollSession>,
}

impl PollingTimer {
    pub fn new() -> Self {
        PollingTimer { session: None }
    }

    /// Must be called from within a tokio runtime.
    pub fn start<F>(&mut self, interval_seconds: f64, mut on_fire: F) -> Duration
    where
        F: FnMut(&CancellationToken) + Send + 'static,
    {
        self.stop();

        let period = clamp_interval(interval_seconds);
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let started = Instant::now();

        spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            'mainloop: loop {
                tokio::select! {
                    biased;
                    _ = task_cancel.cancelled() => {
                        break 'mainloop;
                    },
                    _ = ticker.tick() => {
                        on_fire(&task_cancel);
                    },
                }
            }

            debug!("Poll task stopped");
        });

        self.session = Some(PollSession {
            started,
            interval: period,
            cancel,
        });

        period
    }

    pub fn stop(&mut self) {
        if let Some(session) = self.session.take() {
            session.cancel.cancel();
        }
    }

    pub fn is_running(&self) -> bool {
        self.session.is_some()
    }

    pub fn interval(&self) -> Option<Duration> {
        self.session.as_ref().map(|session| session.interval)
    }

    /// Seconds since `start`, or `None` when not polling.
    pub fn elapsed_seconds(&self) -> Option<f64> {
        self.session.as_ref().map(|session| session.started.elapsed().as_secs_f64())
    }
}

impl Drop for PollingTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::time::advance;

    fn counting_timer(timer: &mut PollingTimer, interval_seconds: f64) -> (Arc<AtomicUsize>, Duration) {
        let count = Arc::new(AtomicUsize::new(0));
        let fired = count.clone();
        let period = timer.start(interval_seconds, move |cancel| {
            if !cancel.is_cancelled() {
                fired.fetch_add(1, Ordering::SeqCst);
            }
        });
        (count, period)
    }

    // lets the spawned poll task observe the (paused) clock
    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn interval_is_clamped() {
        assert_eq!(clamp_interval(0.01), Duration::from_secs_f64(0.06));
        assert_eq!(clamp_interval(0.06), Duration::from_secs_f64(0.06));
        assert_eq!(clamp_interval(0.5), Duration::from_secs_f64(0.5));
        assert_eq!(clamp_interval(-3.0), Duration::from_secs_f64(0.06));
        assert_eq!(clamp_interval(f64::NAN), Duration::from_secs_f64(0.2));
        assert_eq!(clamp_interval(f64::INFINITY), Duration::from_secs_f64(0.2));
        assert_eq!(clamp_interval(1e20), Duration::from_secs_f64(0.2));
        assert_eq!(clamp_interval(1e300), Duration::from_secs_f64(0.2));
        assert_eq!(clamp_interval(3600.0), Duration::from_secs(3600));
    }

    #[tokio::test(start_paused = true)]
    async fn out_of_range_interval_polls_at_default() {
        let mut timer = PollingTimer::new();
        let (count, period) = counting_timer(&mut timer, 1e20);
        assert_eq!(period, Duration::from_millis(200));

        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        advance(Duration::from_millis(200)).await;
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn fires_immediately_then_periodically() {
        let mut timer = PollingTimer::new();
        let (count, period) = counting_timer(&mut timer, 0.2);
        assert_eq!(period, Duration::from_millis(200));

        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        advance(Duration::from_millis(200)).await;
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 2);

        advance(Duration::from_millis(400)).await;
        settle().await;
        assert!(count.load(Ordering::SeqCst) >= 3);
        assert!(timer.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_prevents_further_fires() {
        let mut timer = PollingTimer::new();
        let (count, _) = counting_timer(&mut timer, 0.1);
        settle().await;
        let before = count.load(Ordering::SeqCst);

        timer.stop();
        timer.stop();
        assert!(!timer.is_running());
        assert_eq!(timer.elapsed_seconds(), None);

        advance(Duration::from_secs(2)).await;
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), before);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_replaces_previous_session() {
        let mut timer = PollingTimer::new();
        let (first, _) = counting_timer(&mut timer, 0.1);
        settle().await;

        let (second, period) = counting_timer(&mut timer, 0.01);
        assert_eq!(period, Duration::from_millis(60));
        assert_eq!(timer.interval(), Some(Duration::from_millis(60)));
        settle().await;
        let first_count = first.load(Ordering::SeqCst);

        advance(Duration::from_secs(1)).await;
        settle().await;
        assert_eq!(first.load(Ordering::SeqCst), first_count);
        assert!(second.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn elapsed_time_follows_the_clock() {
        let mut timer = PollingTimer::new();
        assert_eq!(timer.elapsed_seconds(), None);

        let _ = counting_timer(&mut timer, 0.2);
        assert_eq!(timer.elapsed_seconds(), Some(0.0));

        advance(Duration::from_millis(500)).await;
        let elapsed = timer.elapsed_seconds().unwrap();
        assert!((elapsed - 0.5).abs() < 1e-6);
    }
}
