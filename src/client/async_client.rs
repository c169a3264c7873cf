use std::sync::Arc;
use std::time::Duration;

use rumqttc::Packet::{self, Disconnect, Publish};
use rumqttc::{AsyncClient, ConnAck, ConnectReturnCode, EventLoop, QoS};
use rumqttc::{Event::Incoming, Event::Outgoing};
use tokio::sync::Mutex;
use tokio::time;
use tracing::{debug, error, info, warn};

use super::config::{ClientParts, MqttClientConfig};
use super::error::{ConnectionEstablishmentError, MqttClientError};
use super::publisher::{MqttPublisher, PublishOptions};
use super::subscriber::SubscribeOptions;
use crate::connection::MqttConnection;
use crate::logging::{LogLevel, StreamLogger};
use crate::message_codec::Payload;
use crate::routing::{
	DispatchConfig, MessageHandler, Route, RouterActor, RouterController,
	RouterHandle, SubscriptionError,
};
use crate::transport::{AckTracker, Delivery, MqttTransport, Transport};

/// MQTT client with manual acknowledgment, local retry and per-call logging.
///
/// Cheap to clone; all clones share one connection, which is closed once by
/// [`disconnect`](Self::disconnect).
pub struct ReliableClient<T: Transport = MqttTransport> {
	transport: T,
	publisher: MqttPublisher<T>,
	router: RouterHandle,
	client_logger: StreamLogger,
	sub_logger: StreamLogger,
	connection: Arc<Mutex<Option<MqttConnection<T>>>>,
}

impl<T: Transport> Clone for ReliableClient<T> {
	fn clone(&self) -> Self {
		Self {
			transport: self.transport.clone(),
			publisher: self.publisher.clone(),
			router: self.router.clone(),
			client_logger: self.client_logger.clone(),
			sub_logger: self.sub_logger.clone(),
			connection: Arc::clone(&self.connection),
		}
	}
}

impl ReliableClient<MqttTransport> {
	/// Validates `config`, connects to the broker and starts the event loop.
	///
	/// Fails without retrying when a mandatory field is missing, when the
	/// broker rejects the connection, or when no ConnAck arrives within
	/// `connection_timeout_millis`.
	pub async fn connect(
		config: MqttClientConfig,
	) -> Result<Self, MqttClientError> {
		let parts = config.into_parts()?;
		let client_logger = parts.client_logger.clone();
		client_logger.attach(Self::connect_with_parts(parts)).await
	}

	async fn connect_with_parts(
		parts: ClientParts,
	) -> Result<Self, MqttClientError> {
		let (host, port) = parts.options.broker_address();
		info!(host = %host, port, "ConnectionAttempt");

		let (client, new_event_loop) = AsyncClient::new(
			parts.options.clone(),
			parts.settings.event_loop_capacity,
		);

		let timeout_millis = parts.settings.connection_timeout_millis;
		let connection_timeout = Duration::from_millis(timeout_millis);
		let connected_event_loop = time::timeout(
			connection_timeout,
			Self::establish_connection(new_event_loop),
		)
		.await
		.map_err(|_| ConnectionEstablishmentError::Timeout { timeout_millis })?
		.map_err(MqttClientError::ConnectionEstablishment)?;
		info!(host = %host, port, "OnConnect");

		let ack_timeout =
			Duration::from_millis(parts.settings.ack_timeout_millis);
		let transport = MqttTransport::new(client, ack_timeout);
		let (controller, router) = spawn_router(&transport, &parts);

		// The event loop ends on a Disconnect packet in either direction
		let event_loop_handle = tokio::spawn(parts.client_logger.attach(run(
			connected_event_loop,
			router.clone(),
			Arc::clone(transport.acks()),
			parts.debug,
		)));
		Ok(Self::assemble(
			transport,
			router,
			controller,
			Some(event_loop_handle),
			parts,
		))
	}

	async fn establish_connection(
		mut event_loop: EventLoop,
	) -> Result<EventLoop, ConnectionEstablishmentError> {
		loop {
			match event_loop.poll().await {
				| Ok(Incoming(Packet::ConnAck(ConnAck { code, .. }))) => {
					if code == ConnectReturnCode::Success {
						debug!("MQTT connection established successfully");
						return Ok(event_loop);
					} else {
						debug!(
							code = ?code,
							"MQTT connection rejected by broker"
						);
						return Err(
							ConnectionEstablishmentError::BrokerRejected {
								code,
							},
						);
					}
				}
				| Ok(notification) => {
					debug!(
						notification = ?notification,
						"Bootstrap phase notification"
					);
				}
				| Err(connection_err) => {
					debug!(
						error = %connection_err,
						"MQTT connection error during bootstrap phase"
					);
					return Err(ConnectionEstablishmentError::Network(
						connection_err,
					));
				}
			}
		}
	}
}

impl<T: Transport> ReliableClient<T> {
	/// Builds a client over an already connected transport.
	///
	/// No event loop is started: inbound messages are fed in with
	/// [`deliver`](Self::deliver). Must be called inside a tokio runtime.
	pub fn with_transport(
		transport: T,
		config: MqttClientConfig,
	) -> Result<Self, MqttClientError> {
		let parts = config.into_parts()?;
		let (controller, router) = spawn_router(&transport, &parts);
		Ok(Self::assemble(transport, router, controller, None, parts))
	}

	fn assemble(
		transport: T,
		router: RouterHandle,
		controller: RouterController,
		event_loop_handle: Option<tokio::task::JoinHandle<()>>,
		parts: ClientParts,
	) -> Self {
		let grace =
			Duration::from_millis(parts.settings.disconnect_grace_millis);
		let connection = MqttConnection::new(
			transport.clone(),
			controller,
			event_loop_handle,
			grace,
			parts.client_logger.clone(),
		);
		Self {
			publisher: MqttPublisher::new(transport.clone(), parts.pub_logger),
			transport,
			router,
			client_logger: parts.client_logger,
			sub_logger: parts.sub_logger,
			connection: Arc::new(Mutex::new(Some(connection))),
		}
	}

	/// Publishes one message and returns the final error, if any.
	///
	/// ```rust,no_run
	/// # use mqtt_reliable_client::prelude::*;
	/// # async fn example(client: ReliableClient) -> Result<()> {
	/// let retry = std::sync::Arc::new(RetryPolicy::default_linear(3));
	/// client
	/// 	.publish(
	/// 		"orders/1",
	/// 		Payload::json(serde_json::json!({ "amount": 5 })),
	/// 		PublishOptions::default().with_retry(retry),
	/// 	)
	/// 	.await?;
	/// # Ok(())
	/// # }
	/// ```
	pub async fn publish(
		&self,
		topic: &str,
		payload: impl Into<Payload>,
		options: PublishOptions,
	) -> Result<(), MqttClientError> {
		self.publisher
			.publish(topic, &payload.into(), &options)
			.await
	}

	/// Routes messages matching `filter` to `handler` and subscribes at the
	/// broker.
	///
	/// Subscribing to a filter again replaces its handler. If the broker
	/// request fails the route is removed and the error returned.
	pub async fn subscribe(
		&self,
		filter: &str,
		handler: impl MessageHandler,
		options: SubscribeOptions,
	) -> Result<(), MqttClientError> {
		if !rumqttc::valid_filter(filter) {
			return Err(MqttClientError::Topic {
				topic: filter.to_owned(),
				reason: "Invalid topic filter",
			});
		}
		let config = DispatchConfig {
			log_level: options.log_level,
			retry: options.retry,
			logger: options.logger.unwrap_or_else(|| self.sub_logger.clone()),
		};
		let route = Route::new(filter, options.qos, Arc::new(handler), config);
		self.router.register(route).await?;

		let subscribed = self.transport.subscribe(filter, options.qos).await;
		if let Err(source) = subscribed {
			if let Err(err) = self.router.remove(filter).await {
				self.client_logger.in_scope(|| {
					warn!(filter, error = %err, "Failed to remove route")
				});
			}
			self.client_logger.in_scope(|| {
				error!(filter, error = %source, "Subscribe failed")
			});
			return Err(SubscriptionError::SubscribeFailed {
				filter: filter.to_owned(),
				source,
			}
			.into());
		}
		self.client_logger.in_scope(|| {
			info!(filter, qos = ?options.qos, "Subscribed")
		});
		Ok(())
	}

	/// Dispatches a delivery through the route table as if it came from the
	/// broker.
	pub async fn deliver(
		&self,
		delivery: Delivery,
	) -> Result<(), MqttClientError> {
		Ok(self.router.dispatch(delivery).await?)
	}

	/// Disconnects and stops background tasks. Later calls are no-ops.
	pub async fn disconnect(&self) {
		let connection = self.connection.lock().await.take();
		match connection {
			| Some(connection) => connection.shutdown().await,
			| None => self
				.client_logger
				.in_scope(|| warn!("Client already disconnected")),
		}
	}

	pub fn publisher(&self) -> &MqttPublisher<T> {
		&self.publisher
	}

	pub fn transport(&self) -> &T {
		&self.transport
	}
}

/// Starts the router with the default route of the config: QoS 1, Info,
/// subscribe logger, no retry.
pub(super) fn spawn_router<T: Transport>(
	transport: &T,
	parts: &ClientParts,
) -> (RouterController, RouterHandle) {
	let default_route = Route::new(
		"#",
		QoS::AtLeastOnce,
		Arc::clone(&parts.default_handler),
		DispatchConfig {
			log_level: LogLevel::Info,
			retry: None,
			logger: parts.sub_logger.clone(),
		},
	);
	RouterActor::spawn(
		transport.clone(),
		default_route,
		parts.settings.command_channel_capacity,
		parts.client_logger.clone(),
	)
}

/// Delay before the next poll after `error_count` consecutive errors:
/// doubling from 100ms, capped at 30s.
pub(super) fn reconnect_delay(error_count: u32) -> Duration {
	const INITIAL_RETRY_DELAY: Duration = Duration::from_millis(100);
	const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

	let exponent = error_count.saturating_sub(1).min(10);
	(INITIAL_RETRY_DELAY * 2_u32.pow(exponent)).min(MAX_RETRY_DELAY)
}

/// Main event loop that forwards publishes to the router, feeds broker acks
/// to `acks` and logs lifecycle events.
///
/// Connection errors never end the loop: it keeps reconnecting with capped
/// backoff. It terminates only when a Disconnect packet is received or sent,
/// after which pending and later requests fail.
pub(super) async fn run(
	mut event_loop: EventLoop,
	router: RouterHandle,
	acks: Arc<AckTracker>,
	debug: bool,
) {
	let _closed = acks.close_on_drop();
	let mut error_count: u32 = 0;

	loop {
		let notification = event_loop.poll().await;
		if let Ok(event) = &notification {
			acks.on_event(event);
		}
		match notification {
			| Ok(Incoming(Packet::ConnAck(ConnAck {
				session_present,
				code: ConnectReturnCode::Success,
			}))) => {
				error_count = 0;
				info!(session_present, "OnConnect");
				if !session_present {
					if let Err(err) = router.resubscribe_all().await {
						error!(error = %err, "Failed to resubscribe to topics");
					}
				}
			}
			| Ok(Incoming(Packet::ConnAck(ConnAck { code, .. }))) => {
				warn!(code = ?code, "Reconnect rejected by broker");
			}
			| Ok(Incoming(Publish(p))) => {
				error_count = 0;
				debug!(
					topic = %p.topic,
					id = p.pkid,
					payload_size = p.payload.len(),
					"Received MQTT message"
				);

				if let Err(err) = router.dispatch(Delivery::from(p)).await {
					error!(error = %err, "Failed to hand message to router");
				}
			}
			| Ok(Incoming(Disconnect)) => {
				info!("Received MQTT Disconnect packet from server");
				break;
			}
			| Ok(Outgoing(rumqttc::Outgoing::Disconnect)) => {
				info!("Sent MQTT Disconnect packet to server");
				break;
			}
			| Ok(notification) => {
				error_count = 0;
				if debug {
					info!(notification = ?notification, "MQTT notification");
				} else {
					debug!(notification = ?notification, "MQTT notification");
				}
			}
			| Err(err) => {
				error_count = error_count.saturating_add(1);
				error!(error_count, error = %err, "ConnectionLost");

				let delay = reconnect_delay(error_count);
				info!(delay = ?delay, error_count, "Reconnecting");
				time::sleep(delay).await;
			}
		}
	}
	info!("MQTT event loop terminated");
}
