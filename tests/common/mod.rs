//! Shared helpers for integration tests: an in-memory transport and a log
//! sink that collects formatted records.

#![allow(dead_code)]

use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use mqtt_reliable_client::errors::TransportError;
use mqtt_reliable_client::{Delivery, QoS, StreamLogger, Transport};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::MakeWriter;

#[derive(Default)]
pub struct Recorded {
	pub published: Vec<(String, QoS, Bytes)>,
	pub subscriptions: Vec<String>,
	pub acked: Vec<u16>,
	pub disconnects: u32,
}

/// Transport that accepts every request and records it.
#[derive(Clone, Default)]
pub struct RecordingTransport {
	recorded: Arc<Mutex<Recorded>>,
}

impl RecordingTransport {
	pub fn recorded(&self) -> std::sync::MutexGuard<'_, Recorded> {
		self.recorded.lock().unwrap()
	}
}

impl Transport for RecordingTransport {
	async fn publish(
		&self,
		topic: &str,
		qos: QoS,
		_retain: bool,
		payload: Bytes,
	) -> Result<(), TransportError> {
		self.recorded()
			.published
			.push((topic.to_owned(), qos, payload));
		Ok(())
	}

	async fn subscribe(
		&self,
		filter: &str,
		_qos: QoS,
	) -> Result<(), TransportError> {
		self.recorded().subscriptions.push(filter.to_owned());
		Ok(())
	}

	async fn ack(&self, delivery: &Delivery) -> Result<(), TransportError> {
		self.recorded().acked.push(delivery.pkid());
		Ok(())
	}

	async fn disconnect(&self) -> Result<(), TransportError> {
		self.recorded().disconnects += 1;
		Ok(())
	}
}

/// Collects everything written by the loggers it creates.
#[derive(Clone, Default)]
pub struct LogSink(Arc<Mutex<Vec<u8>>>);

impl LogSink {
	pub fn logger(&self, name: &'static str) -> StreamLogger {
		StreamLogger::with_writer(name, LevelFilter::INFO, self.clone())
	}

	pub fn lines(&self) -> Vec<String> {
		String::from_utf8_lossy(&self.0.lock().unwrap())
			.lines()
			.filter(|line| !line.trim().is_empty())
			.map(str::to_owned)
			.collect()
	}

	/// Waits until at least `count` records were written.
	pub async fn wait_for(&self, count: usize) -> Vec<String> {
		for _ in 0 .. 100 {
			let lines = self.lines();
			if lines.len() >= count {
				return lines;
			}
			tokio::time::sleep(Duration::from_millis(50)).await;
		}
		panic!("expected {count} records, got {:?}", self.lines());
	}
}

pub struct SinkWriter(Arc<Mutex<Vec<u8>>>);

impl io::Write for SinkWriter {
	fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
		self.0.lock().unwrap().extend_from_slice(buf);
		Ok(buf.len())
	}

	fn flush(&mut self) -> io::Result<()> {
		Ok(())
	}
}

impl<'a> MakeWriter<'a> for LogSink {
	type Writer = SinkWriter;

	fn make_writer(&'a self) -> Self::Writer {
		SinkWriter(Arc::clone(&self.0))
	}
}
