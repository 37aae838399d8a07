//! Delay/retry engine.
//!
//! Failed messages are parked on the `{env}-delay` queue. Its consumer
//! evaluates each envelope against its attempt and time budgets and either
//! drops it, sends it back to its origin queue, or requeues it onto the
//! delay queue to be looked at again shortly. The decision is a pure
//! function of the envelope and the clock so a transport with native
//! delayed delivery could replace the polling loop without touching policy.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::Value;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::QueueError;
use crate::queue::{Envelope, Publisher, QueueDescriptor};

/// Where an envelope goes next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Budget exhausted: acknowledge and discard.
    Dropped(DropReason),
    /// Backoff elapsed: republish to the origin queue.
    Ready,
    /// Backoff still pending: requeue onto the delay queue.
    Waiting,
}

/// Why an envelope was dropped. Logged distinctly so operators can tell
/// "gave up" apart from ordinary failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Total time in flight exceeded `max_time_ms`.
    Expired,
    /// Attempt count exceeded `max_attempts`.
    Exhausted,
}

/// Exponential-style backoff spacing between retries.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub base_ms: u64,
    pub factor: f64,
    pub cap_ms: u64,
}

impl BackoffPolicy {
    pub fn from_config(config: &Config) -> Self {
        BackoffPolicy {
            base_ms: config.backoff_base_ms,
            factor: config.backoff_factor,
            cap_ms: config.backoff_cap_ms,
        }
    }

    /// Backoff step before the given attempt, capped.
    fn step_ms(&self, attempt: u32) -> u64 {
        let raw = self.base_ms as f64 * self.factor.powi(attempt.saturating_sub(1) as i32);
        raw.min(self.cap_ms as f64) as u64
    }

    /// Earliest instant the given attempt may run, measured from first
    /// publish. Cumulative over all prior steps, so it strictly increases
    /// with `attempt` even once individual steps hit the cap.
    pub fn next_eligible(&self, first_seen: DateTime<Utc>, attempt: u32) -> DateTime<Utc> {
        let total_ms: u64 = (1..=attempt).map(|a| self.step_ms(a)).sum();
        first_seen + ChronoDuration::milliseconds(total_ms as i64)
    }
}

/// Decide what to do with an envelope sitting on the delay queue.
///
/// Budgets are evaluated against the post-increment attempt value: the
/// consumer that routed the message here already bumped `attempt`.
pub fn evaluate<P>(envelope: &Envelope<P>, now: DateTime<Utc>, policy: &BackoffPolicy) -> Verdict {
    if envelope.max_time_ms > 0 {
        let in_flight_ms = now
            .signed_duration_since(envelope.first_seen)
            .num_milliseconds()
            .max(0) as u64;
        if in_flight_ms > envelope.max_time_ms {
            return Verdict::Dropped(DropReason::Expired);
        }
    }

    if envelope.max_attempts > 0 && envelope.attempt > envelope.max_attempts {
        return Verdict::Dropped(DropReason::Exhausted);
    }

    if now >= policy.next_eligible(envelope.first_seen, envelope.attempt) {
        Verdict::Ready
    } else {
        Verdict::Waiting
    }
}

/// Handle one delivery from the delay queue.
///
/// Returns `Ok(())` once the envelope has been routed; a publish failure is
/// surfaced so the caller can nack-requeue instead of losing the message.
pub async fn process_delivery(
    descriptor: &QueueDescriptor,
    publisher: &Publisher,
    policy: &BackoffPolicy,
    envelope: &Envelope<Value>,
) -> Result<(), QueueError> {
    match evaluate(envelope, Utc::now(), policy) {
        Verdict::Dropped(reason) => {
            // Terminal: log with enough context for manual replay.
            warn!(
                queue = %envelope.original_queue,
                attempt = envelope.attempt,
                first_seen = %envelope.first_seen,
                reason = ?reason,
                payload = %envelope.message,
                "queue_message_dropped"
            );
            Ok(())
        }
        Verdict::Ready => {
            publisher
                .publish(&envelope.original_queue, &envelope.to_bytes()?)
                .await?;
            info!(
                queue = %envelope.original_queue,
                attempt = envelope.attempt,
                "queue_message_requeued"
            );
            Ok(())
        }
        Verdict::Waiting => {
            publisher
                .publish(&descriptor.consume_queue, &envelope.to_bytes()?)
                .await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn policy() -> BackoffPolicy {
        BackoffPolicy {
            base_ms: 1_000,
            factor: 1.5,
            cap_ms: 60_000,
        }
    }

    fn envelope(attempt: u32, max_attempts: u32, max_time_ms: u64) -> Envelope<Value> {
        Envelope {
            message: json!({"id": 730}),
            original_queue: "test-apps".to_string(),
            attempt,
            first_seen: Utc::now(),
            max_attempts,
            max_time_ms,
        }
    }

    #[test]
    fn test_next_eligible_strictly_increases_with_attempt() {
        let policy = policy();
        let first_seen = Utc::now();
        let mut previous = first_seen;
        // Well past the point where individual steps hit the cap.
        for attempt in 1..=30 {
            let next = policy.next_eligible(first_seen, attempt);
            assert!(next > previous, "attempt {attempt} did not increase");
            previous = next;
        }
    }

    #[test]
    fn test_attempt_budget_exhausted() {
        let max_attempts = 5;
        let mut envelope = envelope(1, max_attempts, 0);
        // Drive N Retry outcomes: each increments attempt before the delay
        // queue evaluates. Within budget the verdict is never Dropped.
        for _ in 0..max_attempts {
            assert_ne!(
                evaluate(&envelope, Utc::now(), &policy()),
                Verdict::Dropped(DropReason::Exhausted)
            );
            envelope.attempt += 1;
        }
        assert_eq!(
            evaluate(&envelope, Utc::now(), &policy()),
            Verdict::Dropped(DropReason::Exhausted)
        );
    }

    #[test]
    fn test_time_budget_trumps_remaining_attempts() {
        let mut envelope = envelope(2, 100, 1_000);
        envelope.first_seen = Utc::now() - ChronoDuration::seconds(10);
        assert_eq!(
            evaluate(&envelope, Utc::now(), &policy()),
            Verdict::Dropped(DropReason::Expired)
        );
    }

    #[test]
    fn test_zero_budgets_mean_unlimited() {
        let mut envelope = envelope(50, 0, 0);
        envelope.first_seen = Utc::now() - ChronoDuration::days(365);
        // Deep attempt count and a year in flight, but both budgets are 0.
        assert_eq!(evaluate(&envelope, Utc::now(), &policy()), Verdict::Ready);
    }

    #[test]
    fn test_waiting_until_backoff_elapses() {
        let envelope = envelope(3, 0, 0);
        let policy = policy();
        let eligible = policy.next_eligible(envelope.first_seen, 3);

        let before = eligible - ChronoDuration::milliseconds(50);
        assert_eq!(evaluate(&envelope, before, &policy), Verdict::Waiting);

        let after = eligible + ChronoDuration::milliseconds(50);
        assert_eq!(evaluate(&envelope, after, &policy), Verdict::Ready);
    }

    #[test]
    fn test_step_is_capped() {
        let policy = BackoffPolicy {
            base_ms: 1_000,
            factor: 10.0,
            cap_ms: 5_000,
        };
        assert_eq!(policy.step_ms(1), 1_000);
        assert_eq!(policy.step_ms(2), 5_000);
        assert_eq!(policy.step_ms(10), 5_000);
    }
}
