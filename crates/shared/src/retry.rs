//! Bounded, strictly sequential retry loop shared by the draft generator and
//! the compliance fix loop.

use anyhow::Result;
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    None,
    Fixed(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub const fn attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::None,
        }
    }

    pub const fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }
}

/// What a single step decided about the state it produced
#[derive(Debug)]
pub enum Verdict<S> {
    Accept(S),
    Retry(S),
}

#[derive(Debug)]
pub struct RetryOutcome<S> {
    pub state: S,
    pub attempts: u32,
    pub converged: bool,
}

/// Run `step` until it accepts or `policy.max_attempts` steps have run.
///
/// Attempts are numbered from 1. The state returned by each step is handed to
/// the next one, so callers thread whatever they need (the best draft so far,
/// the current markdown) without mutating shared buffers. An `Err` from a step
/// ends the loop immediately.
pub async fn retry<S, F, Fut>(policy: RetryPolicy, initial: S, mut step: F) -> Result<RetryOutcome<S>>
where
    F: FnMut(u32, S) -> Fut,
    Fut: Future<Output = Result<Verdict<S>>>,
{
    let mut state = initial;
    let mut attempts = 0;

    while attempts < policy.max_attempts {
        if attempts > 0 {
            if let Backoff::Fixed(delay) = policy.backoff {
                tokio::time::sleep(delay).await;
            }
        }
        attempts += 1;

        match step(attempts, state).await? {
            Verdict::Accept(next) => {
                return Ok(RetryOutcome {
                    state: next,
                    attempts,
                    converged: true,
                })
            }
            Verdict::Retry(next) => state = next,
        }
    }

    Ok(RetryOutcome {
        state,
        attempts,
        converged: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stops_on_first_accept() {
        let outcome = retry(RetryPolicy::attempts(3), 0u32, |_, calls| async move {
            Ok(Verdict::Accept(calls + 1))
        })
        .await
        .unwrap();

        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.state, 1);
        assert!(outcome.converged);
    }

    #[tokio::test]
    async fn test_exhausts_bound_without_accept() {
        let outcome = retry(RetryPolicy::attempts(3), Vec::new(), |attempt, mut seen| async move {
            seen.push(attempt);
            Ok(Verdict::Retry(seen))
        })
        .await
        .unwrap();

        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.state, vec![1, 2, 3]);
        assert!(!outcome.converged);
    }

    #[tokio::test]
    async fn test_accepts_on_later_attempt() {
        let outcome = retry(RetryPolicy::attempts(5), (), |attempt, ()| async move {
            if attempt == 2 {
                Ok(Verdict::Accept(()))
            } else {
                Ok(Verdict::Retry(()))
            }
        })
        .await
        .unwrap();

        assert_eq!(outcome.attempts, 2);
        assert!(outcome.converged);
    }

    #[tokio::test]
    async fn test_step_error_aborts_loop() {
        let result = retry(RetryPolicy::attempts(3), 0u32, |attempt, _| async move {
            if attempt == 2 {
                anyhow::bail!("boom");
            }
            Ok(Verdict::Retry(attempt))
        })
        .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_zero_attempts_returns_initial_state() {
        let outcome = retry(RetryPolicy::attempts(0), 42u32, |_, s| async move {
            Ok(Verdict::Accept(s + 1))
        })
        .await
        .unwrap();

        assert_eq!(outcome.attempts, 0);
        assert_eq!(outcome.state, 42);
        assert!(!outcome.converged);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_backoff_sleeps_between_attempts() {
        let policy = RetryPolicy::attempts(3).with_backoff(Backoff::Fixed(Duration::from_secs(2)));
        let start = tokio::time::Instant::now();

        let outcome = retry(policy, (), |_, ()| async move { Ok(Verdict::Retry(())) })
            .await
            .unwrap();

        assert_eq!(outcome.attempts, 3);
        assert!(start.elapsed() >= Duration::from_secs(4));
    }
}
