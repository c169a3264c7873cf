//! Route table actor.
//!
//! Owns the filter → handler table and turns every delivery into an
//! independent dispatch task. Deliveries whose topic matches no registered
//! filter go to the default route. The table doubles as the list of broker
//! subscriptions to restore after a reconnect without session.

use std::sync::Arc;

use arcstr::ArcStr;
use rumqttc::QoS;
use tokio::sync::mpsc::{channel, Receiver, Sender};
use tokio::sync::oneshot;
use tokio::task::{JoinError, JoinHandle};
use tracing::instrument::WithSubscriber;
use tracing::{debug, error, info, warn};

use super::dispatch::{spawn_dispatch, DispatchConfig, SharedHandler};
use super::error::SubscriptionError;
use crate::logging::StreamLogger;
use crate::transport::{Delivery, Transport};

/// One registered subscription.
#[derive(Clone)]
pub struct Route {
	filter: ArcStr,
	qos: QoS,
	handler: SharedHandler,
	config: Arc<DispatchConfig>,
}

impl Route {
	pub fn new(
		filter: impl Into<ArcStr>,
		qos: QoS,
		handler: SharedHandler,
		config: DispatchConfig,
	) -> Self {
		Self {
			filter: filter.into(),
			qos,
			handler,
			config: Arc::new(config),
		}
	}

	pub fn filter(&self) -> &str {
		&self.filter
	}

	pub fn qos(&self) -> QoS {
		self.qos
	}
}

enum Command {
	Register(Route, oneshot::Sender<()>),
	Remove(ArcStr),
	Dispatch(Delivery),
	Resubscribe,
}

pub struct RouterActor<T> {
	routes: Vec<Route>,
	default_route: Route,
	transport: T,
	command_rx: Receiver<Command>,
	shutdown_rx: oneshot::Receiver<()>,
}

impl<T: Transport> RouterActor<T> {
	pub fn spawn(
		transport: T,
		default_route: Route,
		command_channel_capacity: usize,
		logger: StreamLogger,
	) -> (RouterController, RouterHandle) {
		let (command_tx, command_rx) = channel(command_channel_capacity);
		let (shutdown_tx, shutdown_rx) = oneshot::channel();
		let actor = Self {
			routes: Vec::new(),
			default_route,
			transport,
			command_rx,
			shutdown_rx,
		};
		let join_handle = tokio::spawn(logger.attach(actor.run()));
		(
			RouterController {
				shutdown_tx,
				join_handle,
			},
			RouterHandle { command_tx },
		)
	}

	async fn run(mut self) {
		loop {
			tokio::select! {
				_ = &mut self.shutdown_rx => {
					info!("Router: shutdown signal received");
					break;
				}
				cmd = self.command_rx.recv() => {
					match cmd {
						| Some(Command::Register(route, done)) => {
							self.handle_register(route);
							let _ = done.send(());
						}
						| Some(Command::Remove(filter)) => {
							self.handle_remove(&filter)
						}
						| Some(Command::Dispatch(delivery)) => {
							self.handle_dispatch(delivery)
						}
						| Some(Command::Resubscribe) => {
							self.handle_resubscribe()
						}
						| None => {
							info!("Router: command channel closed, exiting");
							break;
						}
					}
				}
			}
		}
		// In-flight dispatch tasks are detached and run to completion.
		info!("Router: exiting run loop");
	}

	/// Registering a filter twice replaces its handler.
	fn handle_register(&mut self, route: Route) {
		match self.routes.iter_mut().find(|r| r.filter == route.filter) {
			| Some(existing) => {
				debug!(filter = %route.filter, "Replacing route");
				*existing = route;
			}
			| None => {
				debug!(filter = %route.filter, "Adding route");
				self.routes.push(route);
			}
		}
	}

	fn handle_remove(&mut self, filter: &str) {
		self.routes.retain(|r| r.filter.as_str() != filter);
	}

	fn handle_dispatch(&self, delivery: Delivery) {
		let route = self
			.routes
			.iter()
			.find(|r| rumqttc::matches(delivery.topic(), &r.filter))
			.unwrap_or(&self.default_route);
		debug!(
			topic = %delivery.topic(),
			filter = %route.filter,
			id = delivery.pkid(),
			"Dispatching delivery"
		);
		// Detached: the task owns the delivery until ack or drop.
		let _ = spawn_dispatch(
			self.transport.clone(),
			delivery,
			Arc::clone(&route.handler),
			Arc::clone(&route.config),
		);
	}

	/// Re-issues every broker subscription in the background.
	fn handle_resubscribe(&self) {
		let subscriptions: Vec<(ArcStr, QoS)> = self
			.routes
			.iter()
			.map(|r| (r.filter.clone(), r.qos))
			.collect();
		info!(count = subscriptions.len(), "Router: resubscribing");
		let transport = self.transport.clone();
		tokio::spawn(
			async move {
				for (filter, qos) in subscriptions {
					if let Err(err) = transport.subscribe(&filter, qos).await {
						error!(
							filter = %filter,
							error = %err,
							"Resubscribe failed"
						);
					}
				}
			}
			.with_current_subscriber(),
		);
	}
}

pub struct RouterController {
	shutdown_tx: oneshot::Sender<()>,
	join_handle: JoinHandle<()>,
}

impl RouterController {
	pub async fn shutdown(self) -> Result<(), JoinError> {
		let _ = self.shutdown_tx.send(()).inspect_err(|_| {
			warn!("RouterController: Shutdown signal already sent");
		});
		self.join_handle.await.inspect_err(|e| {
			warn!(error = ?e, "RouterController: Actor run failed");
		})
	}
}

#[derive(Clone)]
pub struct RouterHandle {
	command_tx: Sender<Command>,
}

impl RouterHandle {
	/// Adds or replaces a route; resolves once the router applied it.
	pub async fn register(
		&self,
		route: Route,
	) -> Result<(), SubscriptionError> {
		let (tx, rx) = oneshot::channel();
		self.command_tx
			.send(Command::Register(route, tx))
			.await
			.map_err(|_| SubscriptionError::ChannelClosed)?;
		rx.await.map_err(|_| SubscriptionError::ResponseLost)
	}

	pub async fn remove(
		&self,
		filter: impl Into<ArcStr>,
	) -> Result<(), SubscriptionError> {
		self.command_tx
			.send(Command::Remove(filter.into()))
			.await
			.map_err(|_| SubscriptionError::ChannelClosed)
	}

	pub async fn dispatch(
		&self,
		delivery: Delivery,
	) -> Result<(), SubscriptionError> {
		self.command_tx
			.send(Command::Dispatch(delivery))
			.await
			.map_err(|_| SubscriptionError::ChannelClosed)
	}

	/// Restores all registered subscriptions at the broker.
	pub async fn resubscribe_all(&self) -> Result<(), SubscriptionError> {
		self.command_tx
			.send(Command::Resubscribe)
			.await
			.map_err(|_| SubscriptionError::ChannelClosed)
	}
}
