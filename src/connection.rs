//! MQTT connection management module
//!
//! Owns the background tasks of a client and tears them down once.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::logging::StreamLogger;
use crate::routing::RouterController;
use crate::transport::{MqttTransport, Transport};

/// Lifecycle handle of one client: router actor and event loop task.
///
/// Shut down through
/// [`ReliableClient::disconnect`](crate::ReliableClient::disconnect).
pub struct MqttConnection<T: Transport = MqttTransport> {
	transport: T,
	router_controller: Option<RouterController>,
	event_loop_handle: Option<JoinHandle<()>>,
	grace: Duration,
	logger: StreamLogger,
}

impl<T: Transport> MqttConnection<T> {
	/// `event_loop_handle` is `None` when no network loop drives the
	/// transport.
	pub(crate) fn new(
		transport: T,
		router_controller: RouterController,
		event_loop_handle: Option<JoinHandle<()>>,
		grace: Duration,
		logger: StreamLogger,
	) -> Self {
		Self {
			transport,
			router_controller: Some(router_controller),
			event_loop_handle,
			grace,
			logger,
		}
	}

	/// Graceful shutdown:
	/// 1. send the disconnect request
	/// 2. give the event loop the grace period to flush it, then abort it
	/// 3. stop the router
	///
	/// Dispatch tasks already running are not cancelled; their acks fail once
	/// the transport is gone and are logged as such.
	pub async fn shutdown(mut self) {
		let logger = self.logger.clone();
		logger.attach(self.shutdown_steps()).await
	}

	async fn shutdown_steps(&mut self) {
		if let Err(e) = self.transport.disconnect().await {
			warn!(error = %e, "Failed to disconnect MQTT client");
		}

		if let Some(mut handle) = self.event_loop_handle.take() {
			match tokio::time::timeout(self.grace, &mut handle).await {
				| Ok(Ok(())) => {}
				| Ok(Err(e)) => warn!(error = %e, "Event loop task failed"),
				| Err(_) => {
					warn!(
						grace_ms = self.grace.as_millis() as u64,
						"Event loop still running after grace period, aborting"
					);
					handle.abort();
				}
			}
		}

		if let Some(controller) = self.router_controller.take() {
			if let Err(e) = controller.shutdown().await {
				warn!(error = %e, "Failed to shutdown router");
			}
		}
		info!("Disconnected");
	}
}

impl<T: Transport> Drop for MqttConnection<T> {
	fn drop(&mut self) {
		if self.router_controller.is_some() || self.event_loop_handle.is_some()
		{
			self.logger.in_scope(|| {
				error!(
					"MqttConnection dropped without calling disconnect(). \
					 Please call disconnect() and await its completion before \
					 dropping."
				)
			});
		}
	}
}
