//! Per-delivery dispatch: handler invocation, classification, ack and log.
//!
//! Every delivery runs in its own task and ends in exactly one of two states:
//!
//! ```text
//! Received -> Processing -> success | ignorable error -> Acknowledged
//! Received -> Processing -> system error              -> Unacknowledged
//! ```
//!
//! An unacknowledged QoS >= 1 message is redelivered by the broker. Tasks are
//! independent: completion order across deliveries is not preserved, and a
//! running task is never cancelled.

use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use chrono::SecondsFormat;
use futures::future::BoxFuture;
use tokio::task::JoinHandle;
use tracing::field::display;
use tracing::{error, info};

use crate::classify::{Classify, HandlerError};
use crate::client::error::TransportError;
use crate::logging::{LogLevel, StreamLogger};
use crate::retry::RetryPolicy;
use crate::transport::{Delivery, Transport};

/// Processes one inbound message.
///
/// Implemented for any `Fn(String, Bytes) -> impl Future<Output =
/// Result<(), HandlerError>>`.
pub trait MessageHandler: Send + Sync + 'static {
	fn handle(
		&self,
		topic: &str,
		payload: &Bytes,
	) -> BoxFuture<'static, Result<(), HandlerError>>;
}

impl<F, Fut> MessageHandler for F
where
	F: Fn(String, Bytes) -> Fut + Send + Sync + 'static,
	Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
	fn handle(
		&self,
		topic: &str,
		payload: &Bytes,
	) -> BoxFuture<'static, Result<(), HandlerError>> {
		Box::pin(self(topic.to_owned(), payload.clone()))
	}
}

pub type SharedHandler = Arc<dyn MessageHandler>;

/// Resolved settings of one subscription.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
	pub log_level: LogLevel,
	pub retry: Option<Arc<RetryPolicy>>,
	pub logger: StreamLogger,
}

/// Terminal state of one delivery.
#[derive(Debug)]
pub enum DispatchOutcome {
	/// Handler succeeded or failed ignorably; ack was sent.
	Acknowledged {
		/// Business error swallowed at classification
		ignored: Option<HandlerError>,
	},
	/// Handler ended with a system error; no ack was sent.
	Unacknowledged { error: HandlerError },
}

impl DispatchOutcome {
	pub fn is_acknowledged(&self) -> bool {
		matches!(self, DispatchOutcome::Acknowledged { .. })
	}
}

/// Runs one delivery on a new task bound to the subscription's logger.
pub fn spawn_dispatch<T: Transport>(
	transport: T,
	delivery: Delivery,
	handler: SharedHandler,
	config: Arc<DispatchConfig>,
) -> JoinHandle<DispatchOutcome> {
	let logger = config.logger.clone();
	tokio::spawn(logger.attach(async move {
		process_delivery(&transport, delivery, handler.as_ref(), &config).await
	}))
}

/// Drives one delivery to its terminal state.
pub async fn process_delivery<T: Transport>(
	transport: &T,
	delivery: Delivery,
	handler: &dyn MessageHandler,
	config: &DispatchConfig,
) -> DispatchOutcome {
	let invoke = || handler.handle(delivery.topic(), delivery.payload());
	let result = match &config.retry {
		| Some(policy) => policy.run(invoke).await,
		| None => invoke().await,
	};

	let (ignored, error) = match result {
		| Ok(()) => (None, None),
		| Err(err) if err.is_ignorable() => (Some(err), None),
		| Err(err) => (None, Some(err)),
	};

	let ack_error = match error {
		| None => transport.ack(&delivery).await.err(),
		| Some(_) => None,
	};

	log_delivery(
		&delivery,
		config.log_level,
		ignored.as_ref(),
		error.as_ref(),
		ack_error.as_ref(),
	);

	match error {
		| Some(error) => DispatchOutcome::Unacknowledged { error },
		| None => DispatchOutcome::Acknowledged { ignored },
	}
}

/// One record per delivery. `ignore_err` and `error` are separate fields:
/// an ignored business error leaves `error` empty.
fn log_delivery(
	delivery: &Delivery,
	log_level: LogLevel,
	ignored: Option<&HandlerError>,
	handler_error: Option<&HandlerError>,
	ack_error: Option<&TransportError>,
) {
	let failed = handler_error.is_some() || ack_error.is_some();
	if !failed && !log_level.logs_success() {
		return;
	}

	let message = String::from_utf8_lossy(delivery.payload());
	let start_time = delivery
		.received_at()
		.to_rfc3339_opts(SecondsFormat::Millis, true);
	let latency_ms = delivery.elapsed().as_millis() as u64;
	let ignore_err = ignored.map(display);
	let error = handler_error.map(display);
	let ack_err = ack_error.map(display);

	if failed {
		error!(
			start_time = %start_time,
			latency_ms,
			topic = delivery.topic(),
			id = delivery.pkid(),
			ignore_err,
			error,
			ack_err,
			"{message}"
		);
	} else {
		info!(
			start_time = %start_time,
			latency_ms,
			topic = delivery.topic(),
			id = delivery.pkid(),
			ignore_err,
			"{message}"
		);
	}
}
