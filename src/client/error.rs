use rumqttc::ClientError;

use crate::classify::Classify;
use crate::message_codec::CodecError;
use crate::routing::SubscriptionError;

/// Invalid or incomplete client configuration. Never retryable.
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
	/// A mandatory field was not set
	#[error("{0} must be set")]
	MissingField(&'static str),

	/// A setting has an unusable value
	#[error("invalid configuration value: {0}")]
	InvalidValue(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectionEstablishmentError {
	#[error("Network connection failed: {0}")]
	Network(#[from] rumqttc::ConnectionError),

	#[error("Broker rejected connection: {code:?}")]
	BrokerRejected { code: rumqttc::ConnectReturnCode },

	#[error("Connection establishment timed out after {timeout_millis}ms")]
	Timeout { timeout_millis: u64 },
}

/// Publish, subscribe or ack request rejected by the transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("transport {operation} failed: {reason}")]
pub struct TransportError {
	operation: &'static str,
	reason: String,
}

impl TransportError {
	pub fn new(operation: &'static str, reason: impl Into<String>) -> Self {
		Self {
			operation,
			reason: reason.into(),
		}
	}

	/// Transport operation that failed (`publish`, `subscribe`, ...).
	pub fn operation(&self) -> &'static str {
		self.operation
	}

	pub(crate) fn from_client(
		operation: &'static str,
		err: ClientError,
	) -> Self {
		Self::new(operation, err.to_string())
	}
}

/// Errors that can occur in MQTT client operations
#[derive(Debug, thiserror::Error)]
pub enum MqttClientError {
	/// Client could not be constructed
	#[error("Configuration error: {0}")]
	Configuration(#[from] ConfigurationError),

	/// Initial connection failed
	#[error("Failed to establish connection: {0}")]
	ConnectionEstablishment(#[from] ConnectionEstablishmentError),

	/// Payload could not be converted to bytes
	#[error("Encoding error: {0}")]
	Encoding(#[from] CodecError),

	/// Topic is not publishable
	#[error("Invalid topic {topic:?}: {reason}")]
	Topic { topic: String, reason: &'static str },

	/// Broker-facing request failed
	#[error("Transport error: {0}")]
	Transport(#[from] TransportError),

	/// Subscription management errors
	#[error("Subscription error: {0}")]
	Subscription(#[from] SubscriptionError),
}

impl Classify for MqttClientError {
	/// Only malformed input is ignorable; it fails the same way on every
	/// attempt.
	fn is_ignorable(&self) -> bool {
		matches!(
			self,
			MqttClientError::Encoding(_) | MqttClientError::Topic { .. }
		)
	}
}
