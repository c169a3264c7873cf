//! Bounded local retry with linear, capped backoff.
//!
//! A [`RetryPolicy`] is an immutable value: a maximum number of attempts and a
//! delay function mapping the zero-based attempt index to the wait before the
//! next attempt. Policies are shared behind `Arc` by every publish call or
//! subscription that opts into local retry.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::classify::Classify;

type DelayFn = dyn Fn(u32) -> Duration + Send + Sync;

/// Maximum attempts plus a capped delay function.
#[derive(Clone)]
pub struct RetryPolicy {
	attempts: u32,
	cap: Duration,
	delay: Arc<DelayFn>,
}

impl fmt::Debug for RetryPolicy {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("RetryPolicy")
			.field("attempts", &self.attempts)
			.field("cap", &self.cap)
			.field("delay", &"<fn>")
			.finish()
	}
}

impl RetryPolicy {
	/// Base delay used by [`RetryPolicy::default_linear`].
	pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
	/// Delay cap used by [`RetryPolicy::default_linear`].
	pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(10);

	/// Creates a policy from an arbitrary delay function.
	///
	/// `attempts` below 1 is raised to 1. The delay function must be
	/// non-decreasing; its result is clamped to `cap`.
	pub fn new(
		attempts: u32,
		cap: Duration,
		delay: impl Fn(u32) -> Duration + Send + Sync + 'static,
	) -> Self {
		Self {
			attempts: attempts.max(1),
			cap,
			delay: Arc::new(delay),
		}
	}

	/// Linear backoff: attempt `n` waits `base * (n + 1)`, capped at `cap`.
	pub fn linear(base: Duration, cap: Duration, attempts: u32) -> Self {
		Self::new(attempts, cap, move |n| {
			base.saturating_mul(n.saturating_add(1))
		})
	}

	/// Linear backoff with a 1s base and a 10s cap.
	pub fn default_linear(attempts: u32) -> Self {
		Self::linear(
			Self::DEFAULT_BASE_DELAY,
			Self::DEFAULT_MAX_DELAY,
			attempts,
		)
	}

	/// Maximum number of attempts, always at least 1.
	pub fn attempts(&self) -> u32 {
		self.attempts
	}

	/// Upper bound for every delay this policy produces.
	pub fn cap(&self) -> Duration {
		self.cap
	}

	/// Wait between attempt `attempt` and the one after it.
	pub fn delay_for(&self, attempt: u32) -> Duration {
		(self.delay)(attempt).min(self.cap)
	}

	/// Drives `operation` under this policy.
	///
	/// Stops on success, on the first ignorable error, or once all attempts
	/// are used. Only the last error is returned.
	pub async fn run<T, E, Op, Fut>(&self, mut operation: Op) -> Result<T, E>
	where
		E: Classify + fmt::Display,
		Op: FnMut() -> Fut,
		Fut: Future<Output = Result<T, E>>,
	{
		let mut attempt = 0;
		loop {
			match operation().await {
				| Ok(value) => return Ok(value),
				| Err(err) if err.is_ignorable() => {
					debug!(
						attempt,
						error = %err,
						"Ignorable error, retry short-circuited"
					);
					return Err(err);
				}
				| Err(err) if attempt + 1 >= self.attempts => {
					debug!(
						attempts = self.attempts,
						error = %err,
						"Retry attempts exhausted"
					);
					return Err(err);
				}
				| Err(err) => {
					let delay = self.delay_for(attempt);
					debug!(
						attempt,
						delay = ?delay,
						error = %err,
						"Attempt failed, retrying"
					);
					tokio::time::sleep(delay).await;
					attempt += 1;
				}
			}
		}
	}
}
