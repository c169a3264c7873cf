//! Per-stream structured loggers.
//!
//! The client logs through three independent streams: connection lifecycle,
//! outbound publishes and inbound dispatch. Each stream is a
//! [`tracing::Dispatch`] handed to the client at construction and applied to
//! the futures that belong to the stream, so every stream keeps its own
//! severity threshold and sink. The global default subscriber is never
//! touched.

use std::future::Future;
use std::str::FromStr;

use arcstr::ArcStr;
use tracing::instrument::{
	Instrument, Instrumented, WithDispatch, WithSubscriber,
};
use tracing::Dispatch;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

use crate::client::error::ConfigurationError;

/// Default name of the lifecycle stream.
pub const CLIENT_STREAM: &str = "mqtt-client";
/// Default name of the publish stream.
pub const PUBLISH_STREAM: &str = "mqtt-pub";
/// Default name of the subscribe stream.
pub const SUBSCRIBE_STREAM: &str = "mqtt-sub";

/// Named logger bound to its own tracing subscriber.
#[derive(Clone, Debug)]
pub struct StreamLogger {
	name: ArcStr,
	dispatch: Dispatch,
}

impl StreamLogger {
	/// Wraps an existing subscriber or dispatch.
	pub fn new(name: impl Into<ArcStr>, dispatch: impl Into<Dispatch>) -> Self {
		Self {
			name: name.into(),
			dispatch: dispatch.into(),
		}
	}

	/// Compact text logger on stdout with a maximum level.
	pub fn stdout(name: impl Into<ArcStr>, level: LevelFilter) -> Self {
		Self::with_writer(name, level, std::io::stdout)
	}

	/// Compact text logger writing to `writer` with a maximum level.
	pub fn with_writer<W>(
		name: impl Into<ArcStr>,
		level: LevelFilter,
		writer: W,
	) -> Self
	where
		W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
	{
		let subscriber = tracing_subscriber::fmt()
			.compact()
			.with_ansi(false)
			.with_target(false)
			.with_max_level(level)
			.with_writer(writer)
			.finish();
		Self::new(name, subscriber)
	}

	/// Stdout logger filtered by `EnvFilter` directives such as
	/// `"info"` or `"warn,mqtt_reliable_client::retry=debug"`.
	pub fn from_directives(
		name: impl Into<ArcStr>,
		directives: &str,
	) -> Result<Self, ConfigurationError> {
		let filter = EnvFilter::try_new(directives).map_err(|err| {
			ConfigurationError::InvalidValue(format!(
				"log filter {directives:?}: {err}"
			))
		})?;
		let subscriber = tracing_subscriber::fmt()
			.compact()
			.with_target(true)
			.with_env_filter(filter)
			.finish();
		Ok(Self::new(name, subscriber))
	}

	/// Logger that drops everything.
	pub fn disabled(name: impl Into<ArcStr>) -> Self {
		Self::new(name, Dispatch::none())
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn dispatch(&self) -> &Dispatch {
		&self.dispatch
	}

	/// Runs `f` with this logger as the default subscriber.
	pub fn in_scope<R>(&self, f: impl FnOnce() -> R) -> R {
		tracing::dispatcher::with_default(&self.dispatch, f)
	}

	/// Binds `future` to this logger for every poll, inside a span naming the
	/// stream.
	pub fn attach<F: Future>(
		&self,
		future: F,
	) -> WithDispatch<Instrumented<F>> {
		let span = self.in_scope(
			|| tracing::info_span!("stream", logger = %self.name),
		);
		future
			.instrument(span)
			.with_subscriber(self.dispatch.clone())
	}
}

/// Verbosity requested for one publish call or subscription.
///
/// Failures are always logged. Successful outcomes are logged only when the
/// level is `Info` or more verbose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum LogLevel {
	Debug,
	#[default]
	Info,
	Warn,
	Error,
}

impl LogLevel {
	/// Whether successful outcomes are logged.
	pub fn logs_success(self) -> bool {
		self <= LogLevel::Info
	}
}

impl FromStr for LogLevel {
	type Err = ConfigurationError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_ascii_lowercase().as_str() {
			| "debug" | "trace" => Ok(LogLevel::Debug),
			| "info" => Ok(LogLevel::Info),
			| "warn" | "warning" => Ok(LogLevel::Warn),
			| "error" => Ok(LogLevel::Error),
			| other => Err(ConfigurationError::InvalidValue(format!(
				"unknown log level {other:?}"
			))),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::test_support::CapturedLogs;

	#[test]
	fn test_log_level_success_threshold() {
		assert!(LogLevel::Debug.logs_success());
		assert!(LogLevel::Info.logs_success());
		assert!(!LogLevel::Warn.logs_success());
		assert!(!LogLevel::Error.logs_success());
		assert_eq!(LogLevel::default(), LogLevel::Info);
	}

	#[test]
	fn test_log_level_parse() {
		assert_eq!("ERROR".parse::<LogLevel>().unwrap(), LogLevel::Error);
		assert_eq!("warning".parse::<LogLevel>().unwrap(), LogLevel::Warn);
		assert!("loud".parse::<LogLevel>().is_err());
	}

	#[test]
	fn test_streams_are_isolated() {
		let pub_logs = CapturedLogs::default();
		let sub_logs = CapturedLogs::default();
		let publish = pub_logs.logger(PUBLISH_STREAM, LevelFilter::INFO);
		let subscribe = sub_logs.logger(SUBSCRIBE_STREAM, LevelFilter::ERROR);

		publish.in_scope(|| tracing::info!("to publish stream"));
		subscribe.in_scope(|| tracing::info!("filtered out"));
		subscribe.in_scope(|| tracing::error!("to subscribe stream"));

		assert!(pub_logs.contents().contains("to publish stream"));
		assert!(!pub_logs.contents().contains("subscribe stream"));
		assert!(!sub_logs.contents().contains("filtered out"));
		assert!(sub_logs.contents().contains("to subscribe stream"));
	}

	#[tokio::test]
	async fn test_attach_routes_future_events() {
		let logs = CapturedLogs::default();
		let logger = logs.logger(CLIENT_STREAM, LevelFilter::DEBUG);

		logger
			.attach(async {
				tokio::task::yield_now().await;
				tracing::debug!(step = 2, "after yield");
			})
			.await;

		let out = logs.contents();
		assert!(out.contains("after yield"));
		assert!(out.contains("logger=mqtt-client"));
	}

	#[test]
	fn test_invalid_directives_rejected() {
		let err = StreamLogger::from_directives(CLIENT_STREAM, "mqtt=loudest")
			.unwrap_err();
		assert!(matches!(err, ConfigurationError::InvalidValue(_)));
	}
}
