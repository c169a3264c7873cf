//! Two-tier error classification.
//!
//! An *ignorable* error is a business-level rejection: retrying cannot fix it,
//! so retry stops at once and an inbound message is still acknowledged. Every
//! other error is a *system* error: it is retried under a policy and, for
//! inbound messages, leaves the message unacknowledged for redelivery.

use crate::client::error::MqttClientError;
use crate::message_codec::CodecError;

/// Boxed error carried by [`HandlerError`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Decides whether an error is ignorable or must propagate.
pub trait Classify {
	/// `true` for business-level errors that must not be retried.
	fn is_ignorable(&self) -> bool;
}

/// Error returned by message handlers.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
	/// Business rejection: not retried, message acknowledged.
	#[error("business error: {0}")]
	Business(BoxError),
	/// Anything else: retried under policy, message left unacknowledged.
	#[error("system error: {0}")]
	System(BoxError),
}

impl HandlerError {
	/// Wraps `err` as an ignorable business error.
	pub fn business(err: impl Into<BoxError>) -> Self {
		Self::Business(err.into())
	}

	/// Wraps `err` as a system error.
	pub fn system(err: impl Into<BoxError>) -> Self {
		Self::System(err.into())
	}
}

impl Classify for HandlerError {
	fn is_ignorable(&self) -> bool {
		matches!(self, HandlerError::Business(_))
	}
}

/// A payload the handler cannot decode is malformed input, not an outage.
impl From<CodecError> for HandlerError {
	fn from(err: CodecError) -> Self {
		HandlerError::Business(Box::new(err))
	}
}

impl From<MqttClientError> for HandlerError {
	fn from(err: MqttClientError) -> Self {
		if err.is_ignorable() {
			HandlerError::Business(Box::new(err))
		} else {
			HandlerError::System(Box::new(err))
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::client::error::TransportError;
	use crate::message_codec::decode_json;

	#[test]
	fn test_handler_error_classes() {
		assert!(HandlerError::business("invalid amount").is_ignorable());
		assert!(!HandlerError::system("db unavailable").is_ignorable());
	}

	#[test]
	fn test_decode_failure_is_business() {
		let err: HandlerError =
			decode_json::<serde_json::Value>(b"{not json").unwrap_err().into();
		assert!(err.is_ignorable());
	}

	#[test]
	fn test_transport_failure_is_system() {
		let err: HandlerError = MqttClientError::from(TransportError::new(
			"publish",
			"request channel closed",
		))
		.into();
		assert!(!err.is_ignorable());
		assert!(err.to_string().starts_with("system error:"));
	}
}
