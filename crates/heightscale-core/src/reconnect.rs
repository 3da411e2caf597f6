//! Reconnecting to the scale with exponential backoff.
//!
//! The scale only advertises while someone stands on it, so a connect
//! usually has to be retried until it wakes up. [`connect_with_backoff`]
//! retries [`ScaleSession::connect`] with growing delays until it succeeds,
//! the attempts run out, or the caller cancels.

use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::session::ScaleSession;
use crate::transport::BleTransport;

/// Options for reconnect attempts.
#[derive(Debug, Clone)]
pub struct ReconnectOptions {
    /// Maximum number of connect attempts (None = unlimited).
    pub max_attempts: Option<u32>,
    /// Delay after the first failed attempt.
    pub initial_delay: Duration,
    /// Maximum delay between attempts.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add up to 25% random jitter to each delay.
    pub use_jitter: bool,
}

impl Default for ReconnectOptions {
    fn default() -> Self {
        Self {
            max_attempts: Some(5),
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(300),
            backoff_multiplier: 2.0,
            use_jitter: true,
        }
    }
}

impl ReconnectOptions {
    /// Create options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create options that retry until cancelled.
    pub fn unlimited() -> Self {
        Self {
            max_attempts: None,
            ..Default::default()
        }
    }

    /// Set maximum number of attempts.
    #[must_use]
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Set the delay after the first failure.
    #[must_use]
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the delay ceiling.
    #[must_use]
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the backoff multiplier.
    #[must_use]
    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enable or disable jitter.
    #[must_use]
    pub fn jitter(mut self, enabled: bool) -> Self {
        self.use_jitter = enabled;
        self
    }

    /// Delay to wait after failed attempt number `attempt` (0-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_secs_f64());

        let delay = if self.use_jitter {
            capped * (1.0 + rand::rng().random::<f64>() * 0.25)
        } else {
            capped
        };
        Duration::from_secs_f64(delay)
    }

    /// Validate the options.
    ///
    /// Checks that:
    /// - `max_attempts`, when set, is > 0
    /// - `backoff_multiplier` is >= 1.0
    /// - `initial_delay` is > 0
    /// - `max_delay` >= `initial_delay`
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == Some(0) {
            return Err(Error::invalid_config("max_attempts must be > 0"));
        }
        if self.backoff_multiplier.is_nan() || self.backoff_multiplier < 1.0 {
            return Err(Error::invalid_config("backoff_multiplier must be >= 1.0"));
        }
        if self.initial_delay.is_zero() {
            return Err(Error::invalid_config("initial_delay must be > 0"));
        }
        if self.max_delay < self.initial_delay {
            return Err(Error::invalid_config("max_delay must be >= initial_delay"));
        }
        Ok(())
    }
}

/// Connect `session`, retrying with backoff.
///
/// Errors that retrying cannot fix (see [`Error::is_retryable`]) end the
/// loop at once. When attempts run out the last error is returned, and a
/// cancelled `cancel` yields [`Error::Cancelled`].
pub async fn connect_with_backoff<T: BleTransport>(
    session: &ScaleSession<T>,
    options: &ReconnectOptions,
    cancel: &CancellationToken,
) -> Result<()> {
    options.validate()?;

    let mut attempt: u32 = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        attempt += 1;

        let result = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            result = session.connect() => result,
        };
        let err = match result {
            Ok(()) => {
                if attempt > 1 {
                    info!(attempt, "Reconnected to scale");
                }
                return Ok(());
            }
            Err(e) => e,
        };

        if !err.is_retryable() {
            return Err(err);
        }
        if options.max_attempts.is_some_and(|max| attempt >= max) {
            warn!(attempt, error = %err, "giving up on scale connection");
            return Err(err);
        }

        let delay = options.delay_for_attempt(attempt - 1);
        info!(attempt, ?delay, error = %err, "Scale not reachable, retrying");
        tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
