//! Retry on ref contention.

use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::config::UpdateConfig;
use crate::error::{Error, Result};

/// Re-runs an action while it fails with a contention error, backing off
/// exponentially. Other errors return immediately.
#[derive(Debug, Clone)]
pub struct RetryHelper {
    max_attempts: u32,
    timeout: Duration,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl RetryHelper {
    #[must_use]
    pub const fn new(config: &UpdateConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            timeout: config.timeout(),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }

    /// Run `action` until it succeeds, fails with a non-contention error, or
    /// the attempt or time budget runs out.
    ///
    /// The action must build its batch from scratch every time so each
    /// attempt sees freshly loaded state.
    ///
    /// # Errors
    /// Returns the action's error, or `RetryExhausted` wrapping the last
    /// contention error.
    pub fn execute<T>(&self, mut action: impl FnMut() -> Result<T>) -> Result<T> {
        let start = Instant::now();
        let mut backoff = self.initial_backoff;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match action() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_contention() => {
                    if attempt >= self.max_attempts.max(1)
                        || start.elapsed() + backoff > self.timeout
                    {
                        return Err(Error::RetryExhausted {
                            attempts: attempt,
                            last: Box::new(e),
                        });
                    }
                    debug!(
                        attempt,
                        backoff_ms = backoff.as_millis(),
                        error = %e,
                        "ref contention, retrying"
                    );
                    thread::sleep(backoff);
                    backoff = (backoff * 2).min(self.max_backoff);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn contention() -> Error {
        revu_git::Error::LockFailure {
            refname: "refs/changes/01/1/meta".into(),
            expected: "a".into(),
            actual: "b".into(),
        }
        .into()
    }

    fn helper(max_attempts: u32) -> RetryHelper {
        RetryHelper::new(&UpdateConfig {
            max_attempts,
            timeout_ms: 10_000,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
        })
    }

    #[test]
    fn test_retries_until_success() {
        let mut calls = 0;
        let value = helper(5)
            .execute(|| {
                calls += 1;
                if calls < 3 { Err(contention()) } else { Ok(calls) }
            })
            .unwrap();
        assert_eq!(value, 3);
    }

    #[test]
    fn test_exhaustion_is_conflict() {
        let mut calls = 0;
        let err = helper(3)
            .execute(|| -> Result<()> {
                calls += 1;
                Err(contention())
            })
            .unwrap_err();
        assert_eq!(calls, 3);
        assert!(matches!(err, Error::RetryExhausted { attempts: 3, .. }));
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn test_other_errors_not_retried() {
        let mut calls = 0;
        let err = helper(5)
            .execute(|| -> Result<()> {
                calls += 1;
                Err(Error::Conflict("change is abandoned".into()))
            })
            .unwrap_err();
        assert_eq!(calls, 1);
        assert!(matches!(err, Error::Conflict(_)));
    }
}
