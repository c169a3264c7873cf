use thiserror::Error;

use crate::client::error::TransportError;

/// Errors during subscription operations
#[derive(Debug, Error)]
pub enum SubscriptionError {
	/// Router task is gone
	#[error("Communication channel closed")]
	ChannelClosed,
	/// Response from the router was lost
	#[error("Response from router was lost")]
	ResponseLost,
	/// Broker did not accept the subscription
	#[error("Failed to subscribe to {filter:?}: {source}")]
	SubscribeFailed {
		filter: String,
		#[source]
		source: TransportError,
	},
}
