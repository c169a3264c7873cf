//! Round trip against a live broker on localhost:1883.
//!
//! Skips with a message when no broker is reachable, so it is safe to run
//! without infrastructure. Credentials come from `MQTT_USERNAME` /
//! `MQTT_PASSWORD` when set.

mod common;

use std::time::Duration;

use bytes::Bytes;
use common::LogSink;
use mqtt_reliable_client::errors::MqttClientError;
use mqtt_reliable_client::logging::{
	CLIENT_STREAM, PUBLISH_STREAM, SUBSCRIBE_STREAM,
};
use mqtt_reliable_client::prelude::*;
use mqtt_reliable_client::ClientSettings;
use tokio::sync::mpsc;

#[tokio::test]
async fn test_publish_subscribe_round_trip() {
	let client_logs = LogSink::default();
	let sub_logs = LogSink::default();
	let username =
		std::env::var("MQTT_USERNAME").unwrap_or_else(|_| "test".to_owned());
	let password =
		std::env::var("MQTT_PASSWORD").unwrap_or_else(|_| "test".to_owned());
	let config = MqttClientConfig::new("localhost:1883", "reliable_integration")
		.with_credentials(username, password)
		.with_clean_session(true)
		.with_default_handler(|_: String, _: Bytes| async {
			Ok::<(), HandlerError>(())
		})
		.with_client_logger(client_logs.logger(CLIENT_STREAM))
		.with_pub_logger(LogSink::default().logger(PUBLISH_STREAM))
		.with_sub_logger(sub_logs.logger(SUBSCRIBE_STREAM))
		.with_settings(ClientSettings {
			connection_timeout_millis: 2_000,
			..ClientSettings::default()
		});

	let client = match ReliableClient::connect(config).await {
		| Ok(client) => client,
		| Err(MqttClientError::ConnectionEstablishment(e)) => {
			println!("⚠️ No broker available, skipping: {e}");
			return;
		}
		| Err(e) => panic!("unexpected error: {e:?}"),
	};

	let (tx, mut rx) = mpsc::unbounded_channel();
	client
		.subscribe(
			"test/reliable/+",
			move |topic: String, payload: Bytes| {
				let _ = tx.send((topic, payload));
				async { Ok::<(), HandlerError>(()) }
			},
			SubscribeOptions::default(),
		)
		.await
		.unwrap();
	// subscribe resolved on the SubAck, so the broker routes the publish

	client
		.publish("test/reliable/1", "ping", PublishOptions::default())
		.await
		.unwrap();

	match tokio::time::timeout(Duration::from_secs(2), rx.recv()).await {
		| Ok(Some((topic, payload))) => {
			assert_eq!(topic, "test/reliable/1");
			assert_eq!(payload.as_ref(), b"ping");
			sub_logs.wait_for(1).await;
		}
		| Ok(None) => panic!("handler channel closed"),
		| Err(_) => println!("⚠️ Receive timeout (broker might be slow)"),
	}

	client.disconnect().await;
	assert!(
		client_logs
			.lines()
			.iter()
			.any(|line| line.contains("OnConnect"))
	);
}
