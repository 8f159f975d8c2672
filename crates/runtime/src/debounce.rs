use std::time::Duration;

use tokio::time::Instant;

/// Trailing-edge debouncer.
///
/// The state machine is clock-agnostic: callers pass `now` explicitly, which
/// keeps it deterministic under test. `fired` is the async driver for code
/// that runs on a tokio runtime.
///
/// Guarantees:
/// - Each `trigger` replaces the pending input and restarts the quiet period.
/// - At most one input is released per quiet window, always the latest one.
/// - `cancel` is idempotent.
#[derive(Debug)]
pub struct Debouncer<T> {
    quiet_period: Duration,
    pending: Option<Pending<T>>,
    superseded: u64,
}

#[derive(Debug)]
struct Pending<T> {
    input: T,
    deadline: Instant,
}

impl<T> Debouncer<T> {
    pub fn new(quiet_period: Duration) -> Self {
        Self {
            quiet_period,
            pending: None,
            superseded: 0,
        }
    }

    pub fn quiet_period(&self) -> Duration {
        self.quiet_period
    }

    /// Schedules `input`, superseding any pending one.
    ///
    /// Returns `true` if a pending input was replaced.
    pub fn trigger(&mut self, input: T, now: Instant) -> bool {
        let replaced = self.pending.is_some();
        if replaced {
            self.superseded += 1;
        }
        self.pending = Some(Pending {
            input,
            deadline: now + self.quiet_period,
        });
        replaced
    }

    /// Drops the pending input, if any. Returns `true` if something was pending.
    pub fn cancel(&mut self) -> bool {
        self.pending.take().is_some()
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn pending_input(&self) -> Option<&T> {
        self.pending.as_ref().map(|p| &p.input)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|p| p.deadline)
    }

    /// Number of inputs that were replaced before they could fire.
    pub fn superseded(&self) -> u64 {
        self.superseded
    }

    /// Releases the pending input if its quiet period has elapsed at `now`.
    pub fn take_due(&mut self, now: Instant) -> Option<T> {
        match &self.pending {
            Some(p) if p.deadline <= now => self.pending.take().map(|p| p.input),
            _ => None,
        }
    }

    /// Waits until the pending input fires.
    ///
    /// Never resolves while nothing is pending. Cancel-safe: dropping the
    /// future leaves the pending input in place.
    pub async fn fired(&mut self) -> T {
        loop {
            let Some(deadline) = self.deadline() else {
                return std::future::pending().await;
            };
            tokio::time::sleep_until(deadline).await;
            if let Some(input) = self.take_due(Instant::now()) {
                return input;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::Instant;

    use super::Debouncer;

    const QUIET: Duration = Duration::from_millis(300);

    #[test]
    fn fires_only_after_quiet_period() {
        let t0 = Instant::now();
        let mut d = Debouncer::new(QUIET);
        d.trigger("a", t0);

        assert_eq!(d.take_due(t0 + Duration::from_millis(299)), None);
        assert_eq!(d.take_due(t0 + QUIET), Some("a"));
        assert!(!d.is_pending());
        assert_eq!(d.take_due(t0 + Duration::from_secs(5)), None);
    }

    #[test]
    fn retrigger_restarts_window_and_keeps_latest() {
        let t0 = Instant::now();
        let mut d = Debouncer::new(QUIET);
        assert!(!d.trigger(1, t0));
        assert!(d.trigger(2, t0 + Duration::from_millis(100)));
        assert!(d.trigger(3, t0 + Duration::from_millis(250)));

        // The first deadline has passed, but the window was restarted.
        assert_eq!(d.take_due(t0 + Duration::from_millis(400)), None);
        assert_eq!(d.take_due(t0 + Duration::from_millis(550)), Some(3));
        assert_eq!(d.superseded(), 2);
    }

    #[test]
    fn cancel_is_idempotent() {
        let t0 = Instant::now();
        let mut d = Debouncer::new(QUIET);
        assert!(!d.cancel());
        d.trigger("x", t0);
        assert!(d.cancel());
        assert!(!d.cancel());
        assert_eq!(d.take_due(t0 + QUIET), None);
    }

    #[tokio::test(start_paused = true)]
    async fn fired_waits_for_the_last_trigger() {
        let mut d = Debouncer::new(QUIET);
        let start = Instant::now();
        d.trigger("first", start);
        tokio::time::advance(Duration::from_millis(100)).await;
        d.trigger("second", Instant::now());

        let got = d.fired().await;
        assert_eq!(got, "second");
        assert!(Instant::now() - start >= Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn fired_pends_while_idle() {
        let mut d: Debouncer<u8> = Debouncer::new(QUIET);
        let idle = tokio::time::timeout(Duration::from_secs(10), d.fired()).await;
        assert!(idle.is_err());
    }
}
