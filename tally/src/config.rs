// SPDX-License-Identifier: Apache-2.0

//! The process-wide configuration snapshot.
//!
//! Built once in `main` from CLI flags and the environment, then threaded
//! through every component constructor. Nothing here is re-read after
//! startup.

use crate::{
	cli::Args,
	error::{Error, Result},
	plugin::LauncherConfig,
};
use std::{path::PathBuf, time::Duration};

pub const ROOT_ENV: &str = "TALLY_ROOT";
pub const STRICT_COMPAT_ENV: &str = "TALLY_STRICT_COMPATIBILITY";
pub const CI_ENV: &str = "CI";

/// Plugin bind deadline in normal runs.
const BIND_TIMEOUT: Duration = Duration::from_secs(60);

/// Plugin bind deadline when a CI marker is present; shared runners are
/// slow enough to need the headroom.
const BIND_TIMEOUT_CI: Duration = Duration::from_secs(120);

#[derive(Clone, Debug)]
pub struct Config {
	/// Directory holding `plugins/` and `specs/`.
	pub root: PathBuf,

	pub strict_compatibility: bool,

	/// Per-resource worker pool size for the engine.
	pub workers: usize,

	pub launcher: LauncherConfig,
}

impl Config {
	pub fn load(args: &Args) -> Result<Config> {
		let root = match &args.root {
			Some(root) => root.clone(),
			None => match std::env::var_os(ROOT_ENV) {
				Some(root) => PathBuf::from(root),
				None => dirs::home_dir().ok_or(Error::NoRoot)?.join(".tally"),
			},
		};

		let strict_compatibility =
			args.strict || flag_set(std::env::var(STRICT_COMPAT_ENV).ok().as_deref());

		let launcher = LauncherConfig {
			bind_timeout: bind_timeout_for(std::env::var_os(CI_ENV).is_some()),
			quiet: args.quiet,
			..LauncherConfig::default()
		};

		Ok(Config {
			root,
			strict_compatibility,
			workers: args.workers,
			launcher,
		})
	}

	pub fn plugin_root(&self) -> PathBuf {
		self.root.join("plugins")
	}

	pub fn spec_root(&self) -> PathBuf {
		self.root.join("specs")
	}
}

fn flag_set(raw: Option<&str>) -> bool {
	matches!(
		raw.map(str::to_ascii_lowercase).as_deref(),
		Some("true") | Some("1")
	)
}

fn bind_timeout_for(ci: bool) -> Duration {
	if ci {
		BIND_TIMEOUT_CI
	} else {
		BIND_TIMEOUT
	}
}
