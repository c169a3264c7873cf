//! MQTT client module
//!
//! Composition root: configuration, the reliable client, the publish
//! executor and per-call options.

/// Reliable MQTT client and its event loop
pub mod async_client;
pub mod config;
/// Client error types
pub mod error;
/// Outbound publish executor
pub mod publisher;
/// Subscription options
pub mod subscriber;


// Re-export commonly used types for convenience
pub use async_client::ReliableClient;
pub use config::{ClientSettings, MqttClientConfig};
pub use error::{
	ConfigurationError, ConnectionEstablishmentError, MqttClientError,
	TransportError,
};
pub use publisher::{MqttPublisher, PublishOptions};
pub use subscriber::SubscribeOptions;
