//! Retry policy for the media server connection.
//!
//! The server side of the bridge is allowed to be flaky: the server
//! reboots, the network drops, plex.tv has a bad day. Connection setup
//! retries at a fixed interval, forever in production. Tests bound the
//! number of attempts so a broken setup fails instead of spinning.

use std::{num::NonZeroU32, time::Duration};

/// How often connection setup is retried by default.
const RETRY_INTERVAL: Duration = Duration::from_secs(10);

/// A fixed-interval retry schedule.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub struct RetryPolicy {
    interval: Duration,
    max_attempts: Option<NonZeroU32>,
}

impl RetryPolicy {
    /// The production schedule: retry every ten seconds, forever.
    #[must_use]
    pub fn fixed() -> Self {
        Self {
            interval: RETRY_INTERVAL,
            max_attempts: None,
        }
    }

    /// A schedule bounded to `max_attempts` tries in total.
    #[must_use]
    pub fn bounded(interval: Duration, max_attempts: NonZeroU32) -> Self {
        Self {
            interval,
            max_attempts: Some(max_attempts),
        }
    }

    /// The delays to sleep between attempts.
    ///
    /// An unbounded schedule yields delays forever; a schedule bounded to
    /// `n` attempts yields `n - 1` delays. When the iterator is
    /// exhausted, the caller is out of attempts and should give up.
    pub fn delays(&self) -> impl Iterator<Item = Duration> {
        let interval = self.interval;
        let remaining = self.max_attempts.map(|attempts| attempts.get() - 1);

        let mut yielded = 0;
        std::iter::from_fn(move || {
            if remaining.is_some_and(|remaining| yielded >= remaining) {
                return None;
            }
            yielded += 1;
            Some(interval)
        })
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_schedule_never_runs_out() {
        let delays: Vec<_> = RetryPolicy::fixed().delays().take(100).collect();
        assert_eq!(delays.len(), 100);
        assert!(delays.iter().all(|delay| *delay == RETRY_INTERVAL));
    }

    #[test]
    fn bounded_schedule_yields_one_fewer_delay_than_attempts() {
        let policy = RetryPolicy::bounded(Duration::from_millis(5), NonZeroU32::new(3).unwrap());
        let delays: Vec<_> = policy.delays().collect();
        assert_eq!(delays, vec![Duration::from_millis(5); 2]);
    }

    #[test]
    fn single_attempt_has_no_delays() {
        let policy = RetryPolicy::bounded(Duration::from_secs(1), NonZeroU32::new(1).unwrap());
        assert_eq!(policy.delays().count(), 0);
    }
}
