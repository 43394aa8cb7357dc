//! Message-broker connection establishment.
//!
//! The broker connection is dialed once at startup. Failed dials are retried
//! with a quadratic backoff (`attempt² × unit`) until the attempt counter
//! exceeds [`RetryPolicy::max_retries`], after which startup must abort.
//!
//! ```text
//! attempt  1  2  3  4   5   6
//! dial     x  x  x  x   x   x  -> ConnectError::Exhausted (6 dials)
//! sleep    1  4  9  16  25     (units)
//! ```
//!
//! There is no reconnection once the process is serving: the returned handle
//! is shared read-only for the rest of the process lifetime.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Default number of retries after the first failed dial
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Default backoff time unit
pub const DEFAULT_BACKOFF_UNIT: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum ConnectError {
    /// Every permitted dial failed
    #[error("could not connect to message broker after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: String },
}

/// Bounded retry parameters for the startup dial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_unit: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff_unit: Duration) -> Self {
        Self {
            max_retries,
            backoff_unit,
        }
    }

    /// Sleep before the next dial, given how many dials have failed so far.
    pub fn backoff(&self, failures: u32) -> Duration {
        self.backoff_unit.saturating_mul(failures.saturating_mul(failures))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES, DEFAULT_BACKOFF_UNIT)
    }
}

/// Dial until success or until the retry budget is spent.
///
/// `dial` is called at most `max_retries + 1` times.
pub async fn establish<C, E, F, Fut>(policy: &RetryPolicy, mut dial: F) -> Result<C, ConnectError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<C, E>>,
    E: Display,
{
    let mut failures: u32 = 0;

    loop {
        let error = match dial().await {
            Ok(connection) => {
                info!(attempts = failures + 1, "Connected to message broker");
                return Ok(connection);
            }
            Err(e) => e,
        };

        failures += 1;
        warn!(attempt = failures, error = %error, "Message broker not ready");

        if failures > policy.max_retries {
            return Err(ConnectError::Exhausted {
                attempts: failures,
                last_error: error.to_string(),
            });
        }

        let backoff = policy.backoff(failures);
        info!(backoff_ms = backoff.as_millis() as u64, "Backing off");
        tokio::time::sleep(backoff).await;
    }
}

/// Dial an AMQP broker with [`establish`].
pub async fn connect_amqp(url: &str, policy: &RetryPolicy) -> Result<lapin::Connection, ConnectError> {
    establish(policy, || {
        lapin::Connection::connect(url, lapin::ConnectionProperties::default())
    })
    .await
}
