//! Deadline-bounded polling for asynchronous device state convergence.
//!
//! [`wait_until`] re-evaluates a fallible, possibly suspending predicate at a
//! fixed interval until it reports `true` or the timeout elapses. Predicate
//! errors end the wait immediately; they are never treated as "not yet".

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::{Instant, sleep};

/// Errors raised by [`wait_until`].
#[derive(Debug, Error, Eq, PartialEq)]
pub enum PollError<E>
where
    E: std::error::Error + 'static,
{
    /// Raised when the predicate never held within the timeout window.
    #[error("condition not met within {}s after {attempts} attempts", .timeout.as_secs())]
    Timeout {
        /// Configured timeout window.
        timeout: Duration,
        /// Number of predicate evaluations performed.
        attempts: u32,
    },
    /// Raised when evaluating the predicate failed.
    #[error(transparent)]
    Predicate(E),
}

/// Summary of a successful wait.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Polled {
    /// Number of predicate evaluations, including the successful one.
    pub attempts: u32,
    /// Time spent waiting.
    pub elapsed: Duration,
}

/// Interval and timeout pair used for one polling phase.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PollSchedule {
    /// Minimum delay between predicate evaluations.
    pub interval: Duration,
    /// Maximum time to wait for the predicate to hold.
    pub timeout: Duration,
}

impl PollSchedule {
    /// Creates a schedule.
    #[must_use]
    pub const fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }
}

/// Evaluates `predicate` until it returns `Ok(true)`.
///
/// The predicate runs immediately and then no more often than every
/// `schedule.interval`. The final evaluation happens no later than the
/// deadline, so a predicate that holds exactly at the deadline still
/// succeeds.
///
/// # Errors
///
/// Returns [`PollError::Predicate`] as soon as the predicate fails and
/// [`PollError::Timeout`] when it never held before the deadline.
pub async fn wait_until<F, Fut, E>(
    mut predicate: F,
    schedule: PollSchedule,
) -> Result<Polled, PollError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, E>>,
    E: std::error::Error + 'static,
{
    let started = Instant::now();
    let deadline = started + schedule.timeout;
    let mut attempts: u32 = 0;

    while Instant::now() <= deadline {
        attempts = attempts.saturating_add(1);
        if predicate().await.map_err(PollError::Predicate)? {
            return Ok(Polled {
                attempts,
                elapsed: started.elapsed(),
            });
        }
        sleep(schedule.interval).await;
    }

    Err(PollError::Timeout {
        timeout: schedule.timeout,
        attempts,
    })
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use rstest::rstest;

    use super::*;

    #[derive(Debug, Error, Eq, PartialEq)]
    #[error("fleet unavailable")]
    struct Unavailable;

    const SCHEDULE: PollSchedule =
        PollSchedule::new(Duration::from_millis(10), Duration::from_millis(100));

    async fn poll_true_after(polls: u32) -> (Result<Polled, PollError<Unavailable>>, u32) {
        let calls = Cell::new(0_u32);
        let result = wait_until(
            || {
                calls.set(calls.get() + 1);
                let current = calls.get();
                async move { Ok::<_, Unavailable>(current >= polls) }
            },
            SCHEDULE,
        )
        .await;
        (result, calls.get())
    }

    #[rstest]
    #[case(1)]
    #[case(3)]
    #[case(8)]
    #[tokio::test(start_paused = true)]
    async fn resolves_on_the_first_true_evaluation(#[case] polls: u32) {
        let (result, calls) = poll_true_after(polls).await;
        let polled = result.unwrap_or_else(|err| panic!("wait should succeed: {err}"));
        assert_eq!(polled.attempts, polls);
        assert_eq!(calls, polls);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_when_predicate_holds_too_late() {
        let (result, calls) = poll_true_after(50).await;
        let Err(PollError::Timeout { timeout, attempts }) = result else {
            panic!("expected timeout, got {result:?}");
        };
        assert_eq!(timeout, SCHEDULE.timeout);
        assert_eq!(attempts, calls);
        assert!(calls < 50, "predicate evaluated {calls} times");
    }

    #[tokio::test(start_paused = true)]
    async fn waits_at_least_the_interval_between_polls() {
        let (result, _) = poll_true_after(3).await;
        let polled = result.unwrap_or_else(|err| panic!("wait should succeed: {err}"));
        assert!(polled.elapsed >= Duration::from_millis(20));
    }

    #[tokio::test(start_paused = true)]
    async fn predicate_errors_propagate_immediately() {
        let calls = Cell::new(0_u32);
        let result = wait_until(
            || {
                calls.set(calls.get() + 1);
                async { Err::<bool, _>(Unavailable) }
            },
            SCHEDULE,
        )
        .await;

        assert_eq!(result, Err(PollError::Predicate(Unavailable)));
        assert_eq!(calls.get(), 1);
    }
}
