use std::sync::Arc;

use rumqttc::QoS;

use crate::logging::{LogLevel, StreamLogger};
use crate::retry::RetryPolicy;

/// Per-subscription settings.
#[derive(Debug, Clone)]
pub struct SubscribeOptions {
	/// Defaults to `AtLeastOnce`; with `AtMostOnce` nothing is redelivered
	/// after a system error.
	pub qos: QoS,
	pub log_level: LogLevel,
	/// Local handler retry; `None` calls the handler once.
	pub retry: Option<Arc<RetryPolicy>>,
	/// Replaces the client's subscribe logger for this subscription
	pub logger: Option<StreamLogger>,
}

impl Default for SubscribeOptions {
	fn default() -> Self {
		Self {
			qos: QoS::AtLeastOnce,
			log_level: LogLevel::Info,
			retry: None,
			logger: None,
		}
	}
}

impl SubscribeOptions {
	pub fn with_qos(mut self, qos: QoS) -> Self {
		self.qos = qos;
		self
	}

	pub fn with_log_level(mut self, log_level: LogLevel) -> Self {
		self.log_level = log_level;
		self
	}

	pub fn with_retry(mut self, policy: Arc<RetryPolicy>) -> Self {
		self.retry = Some(policy);
		self
	}

	pub fn with_logger(mut self, logger: StreamLogger) -> Self {
		self.logger = Some(logger);
		self
	}
}
