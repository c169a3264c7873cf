//! # MQTT Reliable Client
//!
//! A reliability layer over [`rumqttc`]: inbound messages are acknowledged
//! only after their handler succeeded, publishes and handlers can be retried
//! locally with linear capped backoff, and every publish and delivery emits
//! one structured, latency-annotated log record on an injected logger.
//!
//! ## Features
//!
//! - **Manual acknowledgment**: a handler's system error leaves the message
//!   unacknowledged so the broker redelivers it (QoS >= 1)
//! - **Error classification**: [`HandlerError::Business`] is ignorable and
//!   short-circuits retry; everything else is a system error
//! - **Local retry**: [`RetryPolicy`] with linear backoff capped at a
//!   maximum delay, last-error-only reporting
//! - **Per-stream logging**: lifecycle, publish and subscribe streams are
//!   independent [`StreamLogger`]s; no global subscriber is installed
//! - **Concurrent dispatch**: one task per delivery, so a slow handler never
//!   blocks unrelated messages
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use bytes::Bytes;
//! use mqtt_reliable_client::logging::{PUBLISH_STREAM, SUBSCRIBE_STREAM};
//! use mqtt_reliable_client::prelude::*;
//! use serde::Deserialize;
//! use tracing_subscriber::filter::LevelFilter;
//!
//! #[derive(Deserialize)]
//! struct Order {
//!     amount: u32,
//! }
//!
//! async fn handle_order(
//!     _topic: String,
//!     payload: Bytes,
//! ) -> std::result::Result<(), HandlerError> {
//!     // Malformed orders are acknowledged and logged as ignored
//!     let order: Order = decode_json(&payload)?;
//!     if order.amount == 0 {
//!         return Err(HandlerError::business("empty order"));
//!     }
//!     Ok(())
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = MqttClientConfig::new("localhost:1883", "billing")
//!         .with_credentials("user", "secret")
//!         .with_default_handler(|topic: String, _: Bytes| async move {
//!             tracing::warn!(topic = %topic, "unrouted message");
//!             Ok::<(), HandlerError>(())
//!         })
//!         .with_pub_logger(StreamLogger::stdout(
//!             PUBLISH_STREAM,
//!             LevelFilter::INFO,
//!         ))
//!         .with_sub_logger(StreamLogger::stdout(
//!             SUBSCRIBE_STREAM,
//!             LevelFilter::INFO,
//!         ));
//!     let client = ReliableClient::connect(config).await?;
//!
//!     let retry = Arc::new(RetryPolicy::default_linear(3));
//!     client
//!         .subscribe(
//!             "orders/+",
//!             handle_order,
//!             SubscribeOptions::default().with_retry(Arc::clone(&retry)),
//!         )
//!         .await?;
//!
//!     client
//!         .publish(
//!             "orders/1",
//!             Payload::json(serde_json::json!({ "amount": 5 })),
//!             PublishOptions::default().with_retry(retry),
//!         )
//!         .await?;
//!
//!     client.disconnect().await;
//!     Ok(())
//! }
//! ```

pub mod classify;
pub mod client;
pub mod connection;
pub mod logging;
pub mod message_codec;
pub mod retry;
pub mod routing;
pub mod transport;

#[cfg(test)]
mod test_support;

// === Core Public API ===
pub use classify::{BoxError, Classify, HandlerError};
pub use client::{
	ClientSettings, MqttClientConfig, MqttClientError, MqttPublisher,
	PublishOptions, ReliableClient, SubscribeOptions,
};
pub use connection::MqttConnection;
pub use logging::{LogLevel, StreamLogger};
pub use message_codec::{decode_json, Payload};
pub use retry::RetryPolicy;
pub use routing::{DispatchOutcome, MessageHandler};
pub use transport::{Delivery, MqttTransport, Transport};

// Essential external types
pub use rumqttc::QoS;

/// Result type alias for operations that may fail with MqttClientError
pub type Result<T> = std::result::Result<T, MqttClientError>;

/// Prelude module for convenient imports
///
/// ```rust
/// use mqtt_reliable_client::prelude::*;
/// ```
pub mod prelude {
	//! Essential types for most MQTT applications

	pub use crate::{
		decode_json, HandlerError, LogLevel, MqttClientConfig,
		MqttClientError, Payload, PublishOptions, QoS, ReliableClient, Result,
		RetryPolicy, StreamLogger, SubscribeOptions,
	};
}

/// Error types used throughout the library
///
/// ```rust
/// use mqtt_reliable_client::errors::*;
/// ```
pub mod errors {
	//! All error types used in the library

	pub use crate::classify::HandlerError;
	pub use crate::client::error::{
		ConfigurationError, ConnectionEstablishmentError, MqttClientError,
		TransportError,
	};
	pub use crate::message_codec::CodecError;
	pub use crate::routing::SubscriptionError;
}
