//! Configuration for MQTT client initialization

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rumqttc::MqttOptions;

use super::error::ConfigurationError;
use crate::logging::{
	StreamLogger, CLIENT_STREAM, PUBLISH_STREAM, SUBSCRIBE_STREAM,
};
use crate::routing::{MessageHandler, SharedHandler};

/// Broker port used when the address carries none.
pub const DEFAULT_PORT: u16 = 1883;

/// Client-level performance and behavior settings
#[derive(Debug, Clone)]
pub struct ClientSettings {
	/// Capacity of the event loop channel
	pub event_loop_capacity: usize,
	/// Capacity of the router command channel (must be > 0)
	pub command_channel_capacity: usize,
	/// Time allowed for the first ConnAck
	pub connection_timeout_millis: u64,
	/// Time a publish or subscribe waits for the broker's acknowledgment
	pub ack_timeout_millis: u64,
	/// Zero disables keep alive, otherwise at least one second
	pub keep_alive: Duration,
	/// Time the event loop gets to flush the disconnect before it is aborted
	pub disconnect_grace_millis: u64,
}

impl Default for ClientSettings {
	fn default() -> Self {
		Self {
			event_loop_capacity: 10,
			command_channel_capacity: 100,
			connection_timeout_millis: 10_000,
			ack_timeout_millis: 10_000,
			keep_alive: Duration::from_secs(30),
			disconnect_grace_millis: 250,
		}
	}
}

/// Configuration for MQTT client creation
///
/// Credentials, client id, default handler and the publish and subscribe
/// loggers are mandatory; [`ReliableClient::connect`] refuses a config
/// without them. The lifecycle logger is optional.
///
/// ```rust
/// use mqtt_reliable_client::prelude::*;
/// use mqtt_reliable_client::logging::{PUBLISH_STREAM, SUBSCRIBE_STREAM};
/// use tracing_subscriber::filter::LevelFilter;
///
/// let config = MqttClientConfig::new("localhost:1883", "billing")
/// 	.with_credentials("user", "secret")
/// 	.with_default_handler(|_topic: String, _payload: bytes::Bytes| async {
/// 		Ok::<(), HandlerError>(())
/// 	})
/// 	.with_pub_logger(StreamLogger::stdout(
/// 		PUBLISH_STREAM,
/// 		LevelFilter::INFO,
/// 	))
/// 	.with_sub_logger(StreamLogger::stdout(
/// 		SUBSCRIBE_STREAM,
/// 		LevelFilter::INFO,
/// 	));
/// assert!(config.validate().is_ok());
/// ```
///
/// [`ReliableClient::connect`]: crate::ReliableClient::connect
#[derive(Clone)]
pub struct MqttClientConfig {
	/// Broker address as `host:port` or `host`
	pub addr: String,
	pub client_id: String,
	pub username: String,
	pub password: String,
	pub clean_session: bool,
	/// Logs every transport notification on the client logger
	pub debug: bool,
	/// Receives deliveries that match no subscription
	pub default_handler: Option<SharedHandler>,
	pub client_logger: Option<StreamLogger>,
	pub pub_logger: Option<StreamLogger>,
	pub sub_logger: Option<StreamLogger>,
	pub settings: ClientSettings,
}

/// Validated configuration, ready to build a client from.
pub(crate) struct ClientParts {
	pub(crate) options: MqttOptions,
	pub(crate) debug: bool,
	pub(crate) default_handler: SharedHandler,
	pub(crate) client_logger: StreamLogger,
	pub(crate) pub_logger: StreamLogger,
	pub(crate) sub_logger: StreamLogger,
	pub(crate) settings: ClientSettings,
}

impl MqttClientConfig {
	/// Config with default settings and nothing else set.
	pub fn new(addr: impl Into<String>, client_id: impl Into<String>) -> Self {
		Self {
			addr: addr.into(),
			client_id: client_id.into(),
			username: String::new(),
			password: String::new(),
			clean_session: false,
			debug: false,
			default_handler: None,
			client_logger: None,
			pub_logger: None,
			sub_logger: None,
			settings: ClientSettings::default(),
		}
	}

	/// Reads the configuration from the environment, after loading `.env`
	/// if one exists.
	///
	/// | Variable | Meaning | Default |
	/// |---|---|---|
	/// | `MQTT_ADDR` | broker `host:port` | required |
	/// | `MQTT_CLIENT_ID` | client id | empty |
	/// | `MQTT_USERNAME`, `MQTT_PASSWORD` | credentials | empty |
	/// | `MQTT_CLEAN_SESSION` | `true` / `false` | `false` |
	/// | `MQTT_DEBUG` | `true` / `false` | `false` |
	/// | `MQTT_CLIENT_LOG`, `MQTT_PUB_LOG`, `MQTT_SUB_LOG` | `EnvFilter` directives per stream | `info` |
	///
	/// The default handler cannot come from the environment and must be set
	/// afterwards with [`with_default_handler`](Self::with_default_handler).
	pub fn from_env() -> Result<Self, ConfigurationError> {
		dotenv::dotenv().ok();
		Self::from_lookup(|key| std::env::var(key).ok())
	}

	pub(crate) fn from_lookup(
		lookup: impl Fn(&str) -> Option<String>,
	) -> Result<Self, ConfigurationError> {
		let addr = lookup("MQTT_ADDR")
			.ok_or(ConfigurationError::MissingField("MQTT_ADDR"))?;
		let mut config =
			Self::new(addr, lookup("MQTT_CLIENT_ID").unwrap_or_default());
		config.username = lookup("MQTT_USERNAME").unwrap_or_default();
		config.password = lookup("MQTT_PASSWORD").unwrap_or_default();
		config.clean_session = parse_flag(
			"MQTT_CLEAN_SESSION",
			lookup("MQTT_CLEAN_SESSION").as_deref(),
		)?;
		config.debug =
			parse_flag("MQTT_DEBUG", lookup("MQTT_DEBUG").as_deref())?;

		let directives =
			|key: &str| lookup(key).unwrap_or_else(|| "info".to_owned());
		config.client_logger = Some(StreamLogger::from_directives(
			CLIENT_STREAM,
			&directives("MQTT_CLIENT_LOG"),
		)?);
		config.pub_logger = Some(StreamLogger::from_directives(
			PUBLISH_STREAM,
			&directives("MQTT_PUB_LOG"),
		)?);
		config.sub_logger = Some(StreamLogger::from_directives(
			SUBSCRIBE_STREAM,
			&directives("MQTT_SUB_LOG"),
		)?);
		Ok(config)
	}

	pub fn with_credentials(
		mut self,
		username: impl Into<String>,
		password: impl Into<String>,
	) -> Self {
		self.username = username.into();
		self.password = password.into();
		self
	}

	pub fn with_clean_session(mut self, clean_session: bool) -> Self {
		self.clean_session = clean_session;
		self
	}

	pub fn with_debug(mut self, debug: bool) -> Self {
		self.debug = debug;
		self
	}

	/// Handler for deliveries that match no subscription.
	pub fn with_default_handler(
		mut self,
		handler: impl MessageHandler,
	) -> Self {
		self.default_handler = Some(Arc::new(handler));
		self
	}

	pub fn with_client_logger(mut self, logger: StreamLogger) -> Self {
		self.client_logger = Some(logger);
		self
	}

	pub fn with_pub_logger(mut self, logger: StreamLogger) -> Self {
		self.pub_logger = Some(logger);
		self
	}

	pub fn with_sub_logger(mut self, logger: StreamLogger) -> Self {
		self.sub_logger = Some(logger);
		self
	}

	pub fn with_settings(mut self, settings: ClientSettings) -> Self {
		self.settings = settings;
		self
	}

	/// Checks mandatory fields and settings without consuming the config.
	pub fn validate(&self) -> Result<(), ConfigurationError> {
		let missing = if self.username.is_empty() {
			Some("username")
		} else if self.password.is_empty() {
			Some("password")
		} else if self.client_id.is_empty() {
			Some("client_id")
		} else if self.default_handler.is_none() {
			Some("default_handler")
		} else if self.pub_logger.is_none() {
			Some("pub_logger")
		} else if self.sub_logger.is_none() {
			Some("sub_logger")
		} else {
			None
		};
		if let Some(field) = missing {
			return Err(ConfigurationError::MissingField(field));
		}

		if self.settings.command_channel_capacity == 0 {
			return Err(ConfigurationError::InvalidValue(
				"command_channel_capacity must be greater than 0".to_owned(),
			));
		}
		if self.settings.ack_timeout_millis == 0 {
			return Err(ConfigurationError::InvalidValue(
				"ack_timeout_millis must be greater than 0".to_owned(),
			));
		}
		let keep_alive = self.settings.keep_alive;
		if !keep_alive.is_zero() && keep_alive < Duration::from_secs(1) {
			return Err(ConfigurationError::InvalidValue(format!(
				"keep_alive must be zero or at least 1s, got {keep_alive:?}"
			)));
		}
		parse_addr(&self.addr).map(|_| ())
	}

	/// Transport options: credentials, session flag, keep alive and manual
	/// acknowledgment.
	pub fn to_mqtt_options(&self) -> Result<MqttOptions, ConfigurationError> {
		self.validate()?;
		let (host, port) = parse_addr(&self.addr)?;
		let mut options = MqttOptions::new(&self.client_id, host, port);
		options
			.set_credentials(&self.username, &self.password)
			.set_clean_session(self.clean_session)
			.set_keep_alive(self.settings.keep_alive)
			.set_manual_acks(true);
		Ok(options)
	}

	pub(crate) fn into_parts(self) -> Result<ClientParts, ConfigurationError> {
		let options = self.to_mqtt_options()?;
		let (Some(default_handler), Some(pub_logger), Some(sub_logger)) =
			(self.default_handler, self.pub_logger, self.sub_logger)
		else {
			return Err(ConfigurationError::MissingField("default_handler"));
		};
		Ok(ClientParts {
			options,
			debug: self.debug,
			default_handler,
			client_logger: self
				.client_logger
				.unwrap_or_else(|| StreamLogger::disabled(CLIENT_STREAM)),
			pub_logger,
			sub_logger,
			settings: self.settings,
		})
	}
}

impl fmt::Debug for MqttClientConfig {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("MqttClientConfig")
			.field("addr", &self.addr)
			.field("client_id", &self.client_id)
			.field("username", &self.username)
			.field("password", &"<redacted>")
			.field("clean_session", &self.clean_session)
			.field("debug", &self.debug)
			.field("default_handler", &self.default_handler.is_some())
			.field("client_logger", &self.client_logger)
			.field("pub_logger", &self.pub_logger)
			.field("sub_logger", &self.sub_logger)
			.field("settings", &self.settings)
			.finish()
	}
}

fn parse_addr(addr: &str) -> Result<(&str, u16), ConfigurationError> {
	let invalid =
		|| ConfigurationError::InvalidValue(format!("broker address {addr:?}"));
	let (host, port) = match addr.rsplit_once(':') {
		| Some((host, port)) => {
			(host, port.parse::<u16>().map_err(|_| invalid())?)
		}
		| None => (addr, DEFAULT_PORT),
	};
	if host.is_empty() {
		return Err(invalid());
	}
	Ok((host, port))
}

fn parse_flag(
	key: &'static str,
	value: Option<&str>,
) -> Result<bool, ConfigurationError> {
	match value.map(str::trim) {
		| None | Some("") => Ok(false),
		| Some(v) if v.eq_ignore_ascii_case("true") || v == "1" => Ok(true),
		| Some(v) if v.eq_ignore_ascii_case("false") || v == "0" => Ok(false),
		| Some(v) => Err(ConfigurationError::InvalidValue(format!(
			"{key} must be true or false, got {v:?}"
		))),
	}
}
