//! Test doubles shared by unit tests: captured log output and an in-memory
//! transport.

use std::io;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use rumqttc::QoS;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::MakeWriter;

use crate::client::error::TransportError;
use crate::logging::StreamLogger;
use crate::transport::{Delivery, Transport};

/// In-memory log sink usable as a `MakeWriter`.
#[derive(Clone, Default)]
pub(crate) struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
	pub(crate) fn logger(
		&self,
		name: &'static str,
		level: LevelFilter,
	) -> StreamLogger {
		StreamLogger::with_writer(name, level, self.clone())
	}

	pub(crate) fn contents(&self) -> String {
		String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
	}

	pub(crate) fn lines(&self) -> Vec<String> {
		self.contents()
			.lines()
			.filter(|line| !line.trim().is_empty())
			.map(str::to_owned)
			.collect()
	}
}

pub(crate) struct CapturedWriter(Arc<Mutex<Vec<u8>>>);

impl io::Write for CapturedWriter {
	fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
		self.0.lock().unwrap().extend_from_slice(buf);
		Ok(buf.len())
	}

	fn flush(&mut self) -> io::Result<()> {
		Ok(())
	}
}

impl<'a> MakeWriter<'a> for CapturedLogs {
	type Writer = CapturedWriter;

	fn make_writer(&'a self) -> Self::Writer {
		CapturedWriter(Arc::clone(&self.0))
	}
}

#[derive(Default)]
pub(crate) struct MockState {
	pub(crate) published: Vec<(String, QoS, Bytes)>,
	pub(crate) publish_attempts: u32,
	pub(crate) publish_failures: u32,
	pub(crate) subscriptions: Vec<(String, QoS)>,
	pub(crate) fail_subscribe: bool,
	pub(crate) acked: Vec<u16>,
	pub(crate) disconnects: u32,
}

/// Transport that records every request instead of talking to a broker.
#[derive(Clone, Default)]
pub(crate) struct MockTransport {
	state: Arc<Mutex<MockState>>,
}

impl MockTransport {
	/// Fails the next `count` publish requests.
	pub(crate) fn failing_publishes(count: u32) -> Self {
		let transport = Self::default();
		transport.state.lock().unwrap().publish_failures = count;
		transport
	}

	pub(crate) fn failing_subscribes() -> Self {
		let transport = Self::default();
		transport.state.lock().unwrap().fail_subscribe = true;
		transport
	}

	pub(crate) fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
		self.state.lock().unwrap()
	}

	pub(crate) fn acked(&self) -> Vec<u16> {
		self.state().acked.clone()
	}
}

impl Transport for MockTransport {
	async fn publish(
		&self,
		topic: &str,
		qos: QoS,
		_retain: bool,
		payload: Bytes,
	) -> Result<(), TransportError> {
		let mut state = self.state.lock().unwrap();
		state.publish_attempts += 1;
		if state.publish_failures > 0 {
			state.publish_failures -= 1;
			return Err(TransportError::new("publish", "broker unavailable"));
		}
		state.published.push((topic.to_owned(), qos, payload));
		Ok(())
	}

	async fn subscribe(
		&self,
		filter: &str,
		qos: QoS,
	) -> Result<(), TransportError> {
		let mut state = self.state.lock().unwrap();
		if state.fail_subscribe {
			return Err(TransportError::new("subscribe", "not authorized"));
		}
		state.subscriptions.push((filter.to_owned(), qos));
		Ok(())
	}

	async fn ack(&self, delivery: &Delivery) -> Result<(), TransportError> {
		self.state.lock().unwrap().acked.push(delivery.pkid());
		Ok(())
	}

	async fn disconnect(&self) -> Result<(), TransportError> {
		self.state.lock().unwrap().disconnects += 1;
		Ok(())
	}
}
