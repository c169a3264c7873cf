//! Matches broker acknowledgments to the requests that caused them.
//!
//! `rumqttc` assigns packet ids inside the event loop, so a request only
//! learns its pkid when the loop reports the outgoing packet. Waiters are
//! queued in request order and bound to a pkid on `Outgoing::Publish` /
//! `Outgoing::Subscribe`, which the loop emits in the same order.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rumqttc::{Event, Outgoing, Packet, SubAck, SubscribeReasonCode};
use tokio::sync::oneshot;

use crate::client::error::TransportError;

type Waiter = oneshot::Sender<Result<(), TransportError>>;

/// Resolves once the broker acknowledged the request.
pub(crate) type Confirmation = oneshot::Receiver<Result<(), TransportError>>;

pub(crate) const CONNECTION_CLOSED: &str =
	"connection closed before the broker acknowledged the request";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RequestKind {
	Publish,
	Subscribe,
}

impl RequestKind {
	pub(crate) fn operation(self) -> &'static str {
		match self {
			| RequestKind::Publish => "publish",
			| RequestKind::Subscribe => "subscribe",
		}
	}
}

#[derive(Debug, Default)]
struct Pending {
	closed: bool,
	queued_publishes: VecDeque<Waiter>,
	queued_subscribes: VecDeque<Waiter>,
	publishes: HashMap<u16, Waiter>,
	subscribes: HashMap<u16, Waiter>,
}

impl Pending {
	fn queue(&mut self, kind: RequestKind) -> &mut VecDeque<Waiter> {
		match kind {
			| RequestKind::Publish => &mut self.queued_publishes,
			| RequestKind::Subscribe => &mut self.queued_subscribes,
		}
	}

	fn publish_sent(&mut self, pkid: u16) {
		// Retransmission of a publish that is still waiting for its ack
		if pkid != 0 && self.publishes.contains_key(&pkid) {
			return;
		}
		let Some(waiter) = self.queued_publishes.pop_front() else {
			return;
		};
		if pkid == 0 {
			// QoS 0 has no ack; written is as far as it goes
			let _ = waiter.send(Ok(()));
		} else {
			self.publishes.insert(pkid, waiter);
		}
	}

	fn subscribe_sent(&mut self, pkid: u16) {
		if let Some(waiter) = self.queued_subscribes.pop_front() {
			self.subscribes.insert(pkid, waiter);
		}
	}

	fn publish_acked(&mut self, pkid: u16) {
		if let Some(waiter) = self.publishes.remove(&pkid) {
			let _ = waiter.send(Ok(()));
		}
	}

	fn subscribe_acked(&mut self, ack: &SubAck) {
		let Some(waiter) = self.subscribes.remove(&ack.pkid) else {
			return;
		};
		let rejected = ack
			.return_codes
			.iter()
			.any(|code| matches!(code, SubscribeReasonCode::Failure));
		let result = if rejected {
			Err(TransportError::new(
				"subscribe",
				"broker rejected the subscription",
			))
		} else {
			Ok(())
		};
		let _ = waiter.send(result);
	}
}

/// Pending publish and subscribe requests of one connection.
#[derive(Debug, Default)]
pub(crate) struct AckTracker {
	/// Keeps queue order equal to request channel order
	submit: tokio::sync::Mutex<()>,
	pending: Mutex<Pending>,
}

impl AckTracker {
	fn pending(&self) -> MutexGuard<'_, Pending> {
		self.pending.lock().unwrap_or_else(PoisonError::into_inner)
	}

	/// Queues a waiter, then runs `send`, which must enqueue exactly one
	/// request of `kind` on the client.
	pub(crate) async fn submit<F, Fut>(
		&self,
		kind: RequestKind,
		send: F,
	) -> Result<Confirmation, TransportError>
	where
		F: FnOnce() -> Fut,
		Fut: Future<Output = Result<(), TransportError>>,
	{
		let _order = self.submit.lock().await;
		let (waiter, confirmation) = oneshot::channel();
		{
			let mut pending = self.pending();
			if pending.closed {
				return Err(TransportError::new(
					kind.operation(),
					CONNECTION_CLOSED,
				));
			}
			pending.queue(kind).push_back(waiter);
		}
		if let Err(err) = send().await {
			// Not enqueued, so the event loop never saw it
			self.pending().queue(kind).pop_back();
			return Err(err);
		}
		Ok(confirmation)
	}

	/// Feeds one event-loop notification.
	pub(crate) fn on_event(&self, event: &Event) {
		let mut pending = self.pending();
		match event {
			| Event::Outgoing(Outgoing::Publish(pkid)) => {
				pending.publish_sent(*pkid)
			}
			| Event::Outgoing(Outgoing::Subscribe(pkid)) => {
				pending.subscribe_sent(*pkid)
			}
			| Event::Incoming(Packet::PubAck(ack)) => {
				pending.publish_acked(ack.pkid)
			}
			| Event::Incoming(Packet::PubComp(comp)) => {
				pending.publish_acked(comp.pkid)
			}
			| Event::Incoming(Packet::SubAck(ack)) => {
				pending.subscribe_acked(ack)
			}
			| _ => {}
		}
	}

	/// Fails every pending request and all later submissions.
	pub(crate) fn close(&self) {
		let mut pending = self.pending();
		pending.closed = true;
		pending.queued_publishes.clear();
		pending.queued_subscribes.clear();
		pending.publishes.clear();
		pending.subscribes.clear();
	}

	/// Closes the tracker when the returned guard is dropped, including when
	/// the owning task is aborted.
	pub(crate) fn close_on_drop(self: &Arc<Self>) -> CloseOnDrop {
		CloseOnDrop(Arc::clone(self))
	}
}

pub(crate) struct CloseOnDrop(Arc<AckTracker>);

impl Drop for CloseOnDrop {
	fn drop(&mut self) {
		self.0.close();
	}
}
