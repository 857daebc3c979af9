// SPDX-License-Identifier: Apache-2.0

//! The host's error surface. Every public operation returns one of these
//! tagged variants; plugin-call failures are additionally classified for
//! retry policy in `engine::classify`.

use crate::aggregate::AggregateError;
use std::{path::PathBuf, result::Result as StdResult, time::Duration};

pub type Result<T> = StdResult<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("failed to reserve an ephemeral port")]
	PortReservation(#[source] std::io::Error),

	/// Release of a port that has no live reservation. Reservations are
	/// the unit of ownership and must be released exactly once.
	#[error("no reservation held for port {port}")]
	NoSuchPort { port: u16 },

	#[error("failed to spawn plugin '{plugin}' from '{}'", binary.display())]
	Spawn {
		plugin: String,
		binary: PathBuf,
		#[source]
		source: std::io::Error,
	},

	/// The child never started listening on its assigned port. The
	/// guidance here reshapes the user-visible message; classification
	/// still treats this as a retryable collision-style failure.
	#[error(
		"plugin '{plugin}' did not bind 127.0.0.1:{port} within {timeout:?}; \
		 the plugin may need to honour the --port flag"
	)]
	BindTimeout {
		plugin: String,
		port: u16,
		timeout: Duration,
	},

	/// The child exited before binding its port, most often because the
	/// port was lost to another binder in the hand-off window.
	#[error("plugin '{plugin}' exited before binding port {port}")]
	PluginExited { plugin: String, port: u16 },

	/// A concurrent launch re-reserved the port between our release and
	/// the spawn.
	#[error("port {port} was re-reserved before hand-off to the plugin")]
	PortRaced { port: u16 },

	#[error("failed to establish gRPC channel to plugin '{plugin}'")]
	Connect {
		plugin: String,
		#[source]
		source: tonic::transport::Error,
	},

	#[error("invalid plugin endpoint '{endpoint}'")]
	Endpoint {
		endpoint: String,
		#[source]
		source: tonic::transport::Error,
	},

	#[error("gave up launching plugin '{plugin}' after {attempts} attempts")]
	MaxLaunchAttempts { plugin: String, attempts: usize },

	#[error("plugin '{plugin}' closed its stdio pipes before the proxy started")]
	StdioPipes { plugin: String },

	#[error("call to plugin '{plugin}' failed")]
	Rpc {
		plugin: String,
		#[source]
		source: tonic::Status,
	},

	#[error(
		"plugin '{plugin}' implements cost-source spec '{plugin_spec}', \
		 which is incompatible with this host's spec '{core_spec}'"
	)]
	IncompatiblePlugin {
		plugin: String,
		plugin_spec: String,
		core_spec: String,
	},

	/// A plugin reported a configuration-class failure (missing
	/// credentials, bad endpoint). Never retried; surfaced with cause.
	#[error("plugin '{plugin}' is not usable: {message}")]
	PluginConfiguration { plugin: String, message: String },

	#[error("invalid cost window: end must be after start")]
	InvalidTimeWindow,

	#[error("invalid resource filter '{pattern}'")]
	InvalidResourceFilter {
		pattern: String,
		#[source]
		source: glob::PatternError,
	},

	#[error("invalid tag filter '{raw}': expected key=value")]
	InvalidTagFilter { raw: String },

	#[error(transparent)]
	Aggregate(#[from] AggregateError),

	#[error("failed to read deployment plan '{}'", path.display())]
	PlanRead {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("failed to parse deployment plan '{}'", path.display())]
	PlanParse {
		path: PathBuf,
		#[source]
		source: serde_json::Error,
	},

	#[error("failed to serialize report output")]
	ReportSerialize(#[source] serde_json::Error),

	#[error("failed to initialize logging")]
	Logging(#[source] log::SetLoggerError),

	#[error("failed to build async runtime")]
	Runtime(#[source] std::io::Error),

	#[error("no home directory available; set TALLY_ROOT or pass --root")]
	NoRoot,

	#[error("{context}")]
	Io {
		context: String,
		#[source]
		source: std::io::Error,
	},
}

impl Error {
	/// Helper for wrapping I/O failures with a human-readable context.
	pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
		Error::Io {
			context: context.into(),
			source,
		}
	}
}
