// SPDX-License-Identifier: Apache-2.0

//! Logging setup.
//!
//! The host logs through the `log` facade with an `env_logger` backend.
//! `TALLY_LOG_LEVEL` picks the filter (`debug | info | warn | error`) and
//! `TALLY_LOG_FORMAT` the output shape (`json | text`). All log output
//! goes to stderr; stdout is reserved for reports.

use crate::error::{Error, Result};
use log::LevelFilter;
use std::io::Write as _;

pub const LOG_LEVEL_ENV: &str = "TALLY_LOG_LEVEL";
pub const LOG_FORMAT_ENV: &str = "TALLY_LOG_FORMAT";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
	#[default]
	Text,
	Json,
}

/// Install the process-wide logger from the environment.
pub fn init() -> Result<()> {
	let level = parse_level(std::env::var(LOG_LEVEL_ENV).ok().as_deref());
	let format = parse_format(std::env::var(LOG_FORMAT_ENV).ok().as_deref());
	init_with(level, format)
}

fn init_with(level: LevelFilter, format: LogFormat) -> Result<()> {
	let mut builder = env_logger::Builder::new();
	builder.filter_level(level);

	if format == LogFormat::Json {
		builder.format(|buf, record| {
			let line = serde_json::json!({
				"level": record.level().to_string().to_lowercase(),
				"target": record.target(),
				"message": record.args().to_string(),
			});
			writeln!(buf, "{line}")
		});
	}

	builder.try_init().map_err(Error::Logging)
}

fn parse_level(raw: Option<&str>) -> LevelFilter {
	match raw.map(str::to_ascii_lowercase).as_deref() {
		Some("debug") => LevelFilter::Debug,
		Some("info") => LevelFilter::Info,
		Some("warn") => LevelFilter::Warn,
		Some("error") => LevelFilter::Error,
		Some(other) => {
			eprintln!("tally: unrecognized {LOG_LEVEL_ENV} '{other}', using 'info'");
			LevelFilter::Info
		}
		None => LevelFilter::Info,
	}
}

fn parse_format(raw: Option<&str>) -> LogFormat {
	match raw.map(str::to_ascii_lowercase).as_deref() {
		Some("json") => LogFormat::Json,
		Some("text") | None => LogFormat::Text,
		Some(other) => {
			eprintln!("tally: unrecognized {LOG_FORMAT_ENV} '{other}', using 'text'");
			LogFormat::Text
		}
	}
}
