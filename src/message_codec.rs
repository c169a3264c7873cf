//! Payload encoding for outbound messages.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Errors converting between application values and transport bytes.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
	/// Structured value could not be serialized
	#[error("failed to encode structured payload: {0}")]
	Encode(#[source] serde_json::Error),
	/// Bytes are not a valid structured value of the requested type
	#[error("failed to decode structured payload: {0}")]
	Decode(#[source] serde_json::Error),
}

/// Application value to be published.
///
/// Variants are encoded in fixed precedence: raw bytes pass through, text is
/// sent as its UTF-8 bytes, anything else is serialized as JSON. Text is
/// never JSON-quoted. Structured values are serialized by [`encode`], so a
/// value that cannot be serialized fails the publish that carries it.
///
/// [`encode`]: Payload::encode
#[derive(Debug, Clone)]
pub enum Payload {
	/// Bytes sent unchanged
	Raw(Bytes),
	/// Text sent as raw UTF-8
	Text(String),
	/// Value serialized to JSON at encode time
	Structured(Structured),
}

type Serializer = dyn Fn() -> serde_json::Result<Vec<u8>> + Send + Sync;

/// A serializable value held until the payload is encoded.
#[derive(Clone)]
pub struct Structured(Arc<Serializer>);

impl fmt::Debug for Structured {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("Structured(..)")
	}
}

impl Payload {
	/// Wraps any serializable value as a structured payload.
	pub fn json<T>(value: T) -> Self
	where
		T: Serialize + Send + Sync + 'static,
	{
		Payload::Structured(Structured(Arc::new(move || {
			serde_json::to_vec(&value)
		})))
	}

	/// Converts the payload to transport bytes.
	pub fn encode(&self) -> Result<Bytes, CodecError> {
		match self {
			| Payload::Raw(bytes) => Ok(bytes.clone()),
			| Payload::Text(text) => {
				Ok(Bytes::copy_from_slice(text.as_bytes()))
			}
			| Payload::Structured(Structured(serialize)) => serialize()
				.map(Bytes::from)
				.map_err(CodecError::Encode),
		}
	}
}

impl From<Bytes> for Payload {
	fn from(bytes: Bytes) -> Self {
		Payload::Raw(bytes)
	}
}

impl From<Vec<u8>> for Payload {
	fn from(bytes: Vec<u8>) -> Self {
		Payload::Raw(Bytes::from(bytes))
	}
}

impl From<&[u8]> for Payload {
	fn from(bytes: &[u8]) -> Self {
		Payload::Raw(Bytes::copy_from_slice(bytes))
	}
}

impl From<String> for Payload {
	fn from(text: String) -> Self {
		Payload::Text(text)
	}
}

impl From<&str> for Payload {
	fn from(text: &str) -> Self {
		Payload::Text(text.to_owned())
	}
}

impl From<serde_json::Value> for Payload {
	fn from(value: serde_json::Value) -> Self {
		Payload::json(value)
	}
}

/// Decodes a JSON payload received by a handler.
pub fn decode_json<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
	serde_json::from_slice(bytes).map_err(CodecError::Decode)
}
