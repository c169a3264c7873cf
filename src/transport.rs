//! Seam between the reliability core and the MQTT transport.
//!
//! The core only needs four capabilities from the transport: publish,
//! subscribe, acknowledge a delivered message and disconnect. They are
//! expressed by [`Transport`] and implemented over `rumqttc` by
//! [`MqttTransport`].

mod acks;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use rumqttc::{AsyncClient, Publish, QoS};
use tokio::time::{self, Instant};

pub(crate) use self::acks::AckTracker;
use self::acks::{Confirmation, RequestKind, CONNECTION_CLOSED};
use crate::client::error::TransportError;

/// Capabilities consumed from the MQTT transport.
///
/// Implementations are cheap handles that can be cloned into dispatch tasks.
pub trait Transport: Clone + Send + Sync + 'static {
	/// Publishes one message and resolves once the broker acknowledged it.
	fn publish(
		&self,
		topic: &str,
		qos: QoS,
		retain: bool,
		payload: Bytes,
	) -> impl Future<Output = Result<(), TransportError>> + Send;

	/// Subscribes to a topic filter and resolves once the broker granted it.
	fn subscribe(
		&self,
		filter: &str,
		qos: QoS,
	) -> impl Future<Output = Result<(), TransportError>> + Send;

	/// Acknowledges a delivered message. Called at most once per delivery.
	fn ack(
		&self,
		delivery: &Delivery,
	) -> impl Future<Output = Result<(), TransportError>> + Send;

	/// Sends the disconnect request.
	fn disconnect(
		&self,
	) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// `rumqttc` transport that completes publishes and subscribes on the
/// broker's acknowledgment.
///
/// QoS 1 publishes complete on PubAck, QoS 2 on PubComp and QoS 0 once the
/// packet is written. A subscribe completes on SubAck and fails if the broker
/// refused any filter. Without an acknowledgment within `ack_timeout` the
/// request fails with a retryable [`TransportError`].
#[derive(Debug, Clone)]
pub struct MqttTransport {
	client: AsyncClient,
	acks: Arc<AckTracker>,
	ack_timeout: Duration,
}

impl MqttTransport {
	pub(crate) fn new(client: AsyncClient, ack_timeout: Duration) -> Self {
		Self {
			client,
			acks: Arc::default(),
			ack_timeout,
		}
	}

	/// Tracker fed by the event loop driving `client`.
	pub(crate) fn acks(&self) -> &Arc<AckTracker> {
		&self.acks
	}

	async fn confirmed(
		&self,
		kind: RequestKind,
		confirmation: Confirmation,
	) -> Result<(), TransportError> {
		let operation = kind.operation();
		match time::timeout(self.ack_timeout, confirmation).await {
			| Ok(Ok(result)) => result,
			| Ok(Err(_)) => {
				Err(TransportError::new(operation, CONNECTION_CLOSED))
			}
			| Err(_) => Err(TransportError::new(
				operation,
				format!(
					"no broker acknowledgment within {}ms",
					self.ack_timeout.as_millis()
				),
			)),
		}
	}
}

impl Transport for MqttTransport {
	async fn publish(
		&self,
		topic: &str,
		qos: QoS,
		retain: bool,
		payload: Bytes,
	) -> Result<(), TransportError> {
		let kind = RequestKind::Publish;
		let confirmation = self
			.acks
			.submit(kind, || async {
				self.client
					.publish_bytes(topic, qos, retain, payload)
					.await
					.map_err(|err| TransportError::from_client("publish", err))
			})
			.await?;
		self.confirmed(kind, confirmation).await
	}

	async fn subscribe(
		&self,
		filter: &str,
		qos: QoS,
	) -> Result<(), TransportError> {
		let kind = RequestKind::Subscribe;
		let confirmation = self
			.acks
			.submit(kind, || async {
				self.client
					.subscribe(filter, qos)
					.await
					.map_err(|err| {
						TransportError::from_client("subscribe", err)
					})
			})
			.await?;
		self.confirmed(kind, confirmation).await
	}

	async fn ack(&self, delivery: &Delivery) -> Result<(), TransportError> {
		// rumqttc derives the ack packet from qos and pkid only
		let mut publish =
			Publish::new(delivery.topic(), delivery.qos(), Vec::new());
		publish.pkid = delivery.pkid();
		self.client
			.ack(&publish)
			.await
			.map_err(|err| TransportError::from_client("ack", err))
	}

	async fn disconnect(&self) -> Result<(), TransportError> {
		self.client
			.disconnect()
			.await
			.map_err(|err| TransportError::from_client("disconnect", err))
	}
}

/// One inbound message, owned by its dispatch task.
#[derive(Debug, Clone)]
pub struct Delivery {
	topic: String,
	payload: Bytes,
	qos: QoS,
	pkid: u16,
	received_at: DateTime<Utc>,
	arrived: Instant,
}

impl Delivery {
	/// Stamps a message with the current arrival time.
	pub fn new(
		topic: impl Into<String>,
		payload: impl Into<Bytes>,
		qos: QoS,
		pkid: u16,
	) -> Self {
		Self {
			topic: topic.into(),
			payload: payload.into(),
			qos,
			pkid,
			received_at: Utc::now(),
			arrived: Instant::now(),
		}
	}

	pub fn topic(&self) -> &str {
		&self.topic
	}

	pub fn payload(&self) -> &Bytes {
		&self.payload
	}

	pub fn qos(&self) -> QoS {
		self.qos
	}

	/// Transport-assigned packet identifier (0 for QoS 0).
	pub fn pkid(&self) -> u16 {
		self.pkid
	}

	/// Wall-clock arrival time.
	pub fn received_at(&self) -> DateTime<Utc> {
		self.received_at
	}

	/// Time since arrival.
	pub fn elapsed(&self) -> Duration {
		self.arrived.elapsed()
	}
}

impl From<Publish> for Delivery {
	fn from(publish: Publish) -> Self {
		Delivery::new(publish.topic, publish.payload, publish.qos, publish.pkid)
	}
}

#[cfg(test)]
mod tests {
	use rumqttc::{
		Event, EventLoop, MqttOptions, Outgoing, Packet, SubAck,
		SubscribeReasonCode,
	};

	use super::*;

	/// Transport whose event loop is never polled; acks are fed by hand.
	fn transport(ack_timeout: Duration) -> (MqttTransport, EventLoop) {
		let options = MqttOptions::new("acks-test", "localhost", 1883);
		let (client, event_loop) = AsyncClient::new(options, 10);
		(MqttTransport::new(client, ack_timeout), event_loop)
	}

	#[tokio::test(start_paused = true)]
	async fn test_publish_without_puback_times_out() {
		let (transport, _event_loop) = transport(Duration::from_secs(5));

		let err = transport
			.publish("orders/1", QoS::AtLeastOnce, false, Bytes::from("x"))
			.await
			.unwrap_err();

		assert_eq!(err.operation(), "publish");
		assert!(err.to_string().contains("within 5000ms"), "{err}");
	}

	#[tokio::test(start_paused = true)]
	async fn test_publish_completes_on_puback() {
		let (transport, _event_loop) = transport(Duration::from_secs(5));
		let acks = Arc::clone(transport.acks());
		let broker = async {
			time::sleep(Duration::from_millis(10)).await;
			acks.on_event(&Event::Outgoing(Outgoing::Publish(1)));
			acks.on_event(&Event::Incoming(Packet::PubAck(
				rumqttc::PubAck::new(1),
			)));
		};

		let (result, ()) = tokio::join!(
			transport.publish(
				"orders/1",
				QoS::AtLeastOnce,
				false,
				Bytes::from("x")
			),
			broker
		);
		assert_eq!(result, Ok(()));
	}

	#[tokio::test(start_paused = true)]
	async fn test_subscribe_refused_by_broker() {
		let (transport, _event_loop) = transport(Duration::from_secs(5));
		let acks = Arc::clone(transport.acks());
		let broker = async {
			time::sleep(Duration::from_millis(10)).await;
			acks.on_event(&Event::Outgoing(Outgoing::Subscribe(1)));
			acks.on_event(&Event::Incoming(Packet::SubAck(SubAck::new(
				1,
				vec![SubscribeReasonCode::Failure],
			))));
		};

		let (result, ()) = tokio::join!(
			transport.subscribe("orders/#", QoS::AtLeastOnce),
			broker
		);
		let err = result.unwrap_err();
		assert_eq!(err.operation(), "subscribe");
		assert!(err.to_string().contains("broker rejected the subscription"));
	}

	#[tokio::test]
	async fn test_requests_fail_after_event_loop_ended() {
		let (transport, _event_loop) = transport(Duration::from_secs(5));
		transport.acks().close();

		let err = transport
			.subscribe("orders/#", QoS::AtLeastOnce)
			.await
			.unwrap_err();
		assert!(err.to_string().contains("connection closed"));
	}
}
