use std::sync::Arc;

use bytes::Bytes;
use rumqttc::QoS;
use tokio::time::Instant;
use tracing::{error, info};

use super::error::MqttClientError;
use crate::logging::{LogLevel, StreamLogger};
use crate::message_codec::Payload;
use crate::retry::RetryPolicy;
use crate::transport::Transport;

/// Per-call publish settings.
#[derive(Debug, Clone)]
pub struct PublishOptions {
	/// Defaults to `AtLeastOnce`.
	pub qos: QoS,
	pub retain: bool,
	/// Defaults to `Info`: successful publishes are logged too.
	pub log_level: LogLevel,
	/// Local retry; `None` sends exactly once.
	pub retry: Option<Arc<RetryPolicy>>,
}

impl Default for PublishOptions {
	fn default() -> Self {
		Self {
			qos: QoS::AtLeastOnce,
			retain: false,
			log_level: LogLevel::Info,
			retry: None,
		}
	}
}

impl PublishOptions {
	/// Sets Quality of Service level.
	pub fn with_qos(mut self, qos: QoS) -> Self {
		self.qos = qos;
		self
	}

	/// Sets retain flag.
	pub fn with_retain(mut self, retain: bool) -> Self {
		self.retain = retain;
		self
	}

	pub fn with_log_level(mut self, log_level: LogLevel) -> Self {
		self.log_level = log_level;
		self
	}

	/// Retries failed sends under `policy`.
	pub fn with_retry(mut self, policy: Arc<RetryPolicy>) -> Self {
		self.retry = Some(policy);
		self
	}
}

/// Encodes, sends and logs outbound messages.
///
/// A send completes once the broker acknowledged the publish (see
/// [`Transport::publish`]); with a retry policy it completes after the first
/// success, the first ignorable error, or the last attempt.
#[derive(Debug, Clone)]
pub struct MqttPublisher<T> {
	transport: T,
	logger: StreamLogger,
}

impl<T: Transport> MqttPublisher<T> {
	pub fn new(transport: T, logger: StreamLogger) -> Self {
		Self { transport, logger }
	}

	/// Publishes `payload` to `topic`, logging one record on the publish
	/// stream.
	pub async fn publish(
		&self,
		topic: &str,
		payload: &Payload,
		options: &PublishOptions,
	) -> Result<(), MqttClientError> {
		self.logger
			.attach(self.publish_logged(topic, payload, options))
			.await
	}

	async fn publish_logged(
		&self,
		topic: &str,
		payload: &Payload,
		options: &PublishOptions,
	) -> Result<(), MqttClientError> {
		let started = Instant::now();
		let (body, result) = match encode_for(topic, payload) {
			| Ok(body) => {
				let result = self.send(topic, body.clone(), options).await;
				(body, result)
			}
			| Err(err) => (Bytes::new(), Err(err)),
		};

		let latency_ms = started.elapsed().as_millis() as u64;
		let message = String::from_utf8_lossy(&body);
		match &result {
			| Err(err) => {
				error!(
					topic,
					qos = ?options.qos,
					latency_ms,
					error = %err,
					"{message}"
				)
			}
			| Ok(()) if options.log_level.logs_success() => {
				info!(topic, qos = ?options.qos, latency_ms, "{message}")
			}
			| Ok(()) => {}
		}
		result
	}

	async fn send(
		&self,
		topic: &str,
		body: Bytes,
		options: &PublishOptions,
	) -> Result<(), MqttClientError> {
		let transport = &self.transport;
		let attempt = move || {
			let body = body.clone();
			async move {
				transport
					.publish(topic, options.qos, options.retain, body)
					.await
					.map_err(MqttClientError::from)
			}
		};
		match &options.retry {
			| Some(policy) => policy.run(attempt).await,
			| None => attempt().await,
		}
	}
}

/// Runs before any transport call; structured payloads serialize here.
fn encode_for(
	topic: &str,
	payload: &Payload,
) -> Result<Bytes, MqttClientError> {
	validate_mqtt_topic(topic)?;
	Ok(payload.encode()?)
}

fn validate_mqtt_topic(topic: &str) -> Result<(), MqttClientError> {
	let reason = if topic.is_empty() || topic.len() > 65535 {
		"Topic is empty or too long"
	} else if topic.chars().any(|c| matches!(c, '\0' | '#' | '+')) {
		"Topic contains illegal characters ('#', '+', or null byte)"
	} else {
		return Ok(());
	};
	Err(MqttClientError::Topic {
		topic: topic.to_owned(),
		reason,
	})
}
