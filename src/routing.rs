//! Inbound message routing and dispatch
//!
//! The router maps topic filters to handlers; the dispatch engine drives each
//! delivery through retry, classification, acknowledgment and logging.

pub mod dispatch;
/// Routing and subscription error types
pub mod error;
pub mod router;


// Re-export commonly used types for convenience
pub use dispatch::{
	DispatchConfig, DispatchOutcome, MessageHandler, SharedHandler,
};
pub use error::SubscriptionError;

pub(crate) use router::{Route, RouterActor, RouterController, RouterHandle};
