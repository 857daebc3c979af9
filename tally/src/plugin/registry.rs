// SPDX-License-Identifier: Apache-2.0

//! Discovery of installed plugin binaries.
//!
//! Plugins live on disk at `<plugin_root>/<name>/<version>/`, each version
//! directory holding one native executable and, optionally, a side-car
//! `manifest.json` describing it. Discovery never fails the whole walk for
//! one bad entry; broken entries are logged and skipped.

use crate::error::Result;
use serde::Deserialize;
use std::{
	fs,
	path::{Path, PathBuf},
};
use walkdir::WalkDir;

/// File name of the optional side-car manifest in a version directory.
const MANIFEST_FILE: &str = "manifest.json";

/// How a plugin expects the host to reach it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginTransport {
	/// Child binds a host-assigned TCP port (`--port=<N>`).
	#[default]
	Port,

	/// Child speaks over stdin/stdout behind a host-side proxy (`--stdio`).
	Stdio,
}

/// One discovered plugin binary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PluginEntry {
	pub name: String,
	pub version: String,
	pub binary_path: PathBuf,

	pub transport: PluginTransport,

	/// Cost-source spec version from the manifest, when one was present.
	pub protocol_version: Option<String>,
}

/// Optional side-car manifest. Every field is optional; a version
/// directory with no manifest at all is still a valid plugin.
#[derive(Debug, Default, Deserialize)]
struct SidecarManifest {
	#[serde(default)]
	name: Option<String>,

	#[serde(default)]
	version: Option<String>,

	#[serde(default)]
	protocol_version: Option<String>,

	#[serde(default)]
	transport: PluginTransport,

	/// Executable name to resolve inside the version directory, for
	/// plugins shipping more than one file.
	#[serde(default)]
	entrypoint: Option<String>,
}

/// Walks the plugin root and enumerates installed plugin binaries.
#[derive(Clone, Debug)]
pub struct PluginRegistry {
	root: PathBuf,
}

impl PluginRegistry {
	pub fn new(root: impl Into<PathBuf>) -> Self {
		PluginRegistry { root: root.into() }
	}

	/// Enumerate every `<name>/<version>` directory under the plugin root
	/// that contains a native executable.
	pub fn enumerate(&self) -> Result<Vec<PluginEntry>> {
		if !self.root.is_dir() {
			log::debug!("plugin root '{}' does not exist", self.root.display());
			return Ok(Vec::new());
		}

		let mut entries = Vec::new();

		let walk = WalkDir::new(&self.root)
			.min_depth(2)
			.max_depth(2)
			.sort_by_file_name();

		for dir_entry in walk {
			let dir_entry = match dir_entry {
				Ok(e) => e,
				Err(e) => {
					log::warn!("skipping unreadable plugin directory: {}", e);
					continue;
				}
			};

			if !dir_entry.file_type().is_dir() {
				continue;
			}

			match self.load_entry(dir_entry.path()) {
				Ok(Some(entry)) => entries.push(entry),
				Ok(None) => {}
				Err(e) => {
					log::warn!(
						"skipping plugin directory '{}': {}",
						dir_entry.path().display(),
						e
					);
				}
			}
		}

		log::debug!(
			"discovered {} plugins under '{}'",
			entries.len(),
			self.root.display()
		);
		Ok(entries)
	}

	/// Build a `PluginEntry` from one `<name>/<version>` directory, or
	/// `None` when the directory holds no executable.
	fn load_entry(&self, version_dir: &Path) -> std::result::Result<Option<PluginEntry>, String> {
		let version = file_name_string(version_dir).ok_or("unreadable version directory name")?;
		let name = version_dir
			.parent()
			.and_then(file_name_string)
			.ok_or("unreadable plugin directory name")?;

		let manifest = self.read_manifest(version_dir)?;

		let binary_path = match &manifest.entrypoint {
			Some(entrypoint) => {
				which::which_in(entrypoint, Some(version_dir.as_os_str()), version_dir)
					.map_err(|e| format!("entrypoint '{}' not found: {}", entrypoint, e))?
			}
			None => match find_executable(version_dir) {
				Some(path) => path,
				None => {
					log::debug!(
						"no executable in plugin directory '{}'",
						version_dir.display()
					);
					return Ok(None);
				}
			},
		};

		Ok(Some(PluginEntry {
			name: manifest.name.unwrap_or(name),
			version: manifest.version.unwrap_or(version),
			binary_path,
			transport: manifest.transport,
			protocol_version: manifest.protocol_version,
		}))
	}

	fn read_manifest(&self, version_dir: &Path) -> std::result::Result<SidecarManifest, String> {
		let path = version_dir.join(MANIFEST_FILE);
		if !path.is_file() {
			return Ok(SidecarManifest::default());
		}

		let raw = fs::read(&path).map_err(|e| format!("failed to read manifest: {}", e))?;
		serde_json::from_slice(&raw).map_err(|e| format!("broken manifest: {}", e))
	}
}

fn file_name_string(path: &Path) -> Option<String> {
	path.file_name()?.to_str().map(str::to_owned)
}

/// Find the first native executable in a directory, in file-name order.
fn find_executable(dir: &Path) -> Option<PathBuf> {
	let mut files: Vec<PathBuf> = fs::read_dir(dir)
		.ok()?
		.filter_map(|entry| entry.ok())
		.map(|entry| entry.path())
		.filter(|path| path.is_file() && is_executable(path))
		.collect();

	files.sort();
	files.into_iter().next()
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
	use std::os::unix::fs::PermissionsExt;

	fs::metadata(path)
		.map(|meta| meta.permissions().mode() & 0o111 != 0)
		.unwrap_or(false)
}

#[cfg(windows)]
fn is_executable(path: &Path) -> bool {
	path.extension()
		.map(|ext| ext.eq_ignore_ascii_case("exe"))
		.unwrap_or(false)
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::fs::File;
	use std::io::Write as _;
	use tempfile::TempDir;

	#[cfg(unix)]
	fn write_executable(dir: &Path, name: &str) -> PathBuf {
		use std::os::unix::fs::PermissionsExt;

		let path = dir.join(name);
		let mut file = File::create(&path).unwrap();
		writeln!(file, "#!/bin/sh\nexit 0").unwrap();

		let mut perms = fs::metadata(&path).unwrap().permissions();
		perms.set_mode(0o755);
		fs::set_permissions(&path, perms).unwrap();

		path
	}

	fn plugin_dir(root: &Path, name: &str, version: &str) -> PathBuf {
		let dir = root.join(name).join(version);
		fs::create_dir_all(&dir).unwrap();
		dir
	}

	#[cfg(unix)]
	#[test]
	fn discovers_executable_plugins() {
		let root = TempDir::new().unwrap();
		let dir = plugin_dir(root.path(), "aws-costs", "1.2.0");
		let binary = write_executable(&dir, "aws-costs");

		let registry = PluginRegistry::new(root.path());
		let entries = registry.enumerate().unwrap();

		assert_eq!(entries.len(), 1);
		assert_eq!(entries[0].name, "aws-costs");
		assert_eq!(entries[0].version, "1.2.0");
		assert_eq!(entries[0].binary_path, binary);
		assert_eq!(entries[0].transport, PluginTransport::Port);
		assert_eq!(entries[0].protocol_version, None);
	}

	#[cfg(unix)]
	#[test]
	fn non_executables_are_ignored() {
		let root = TempDir::new().unwrap();
		let dir = plugin_dir(root.path(), "aws-costs", "1.2.0");
		File::create(dir.join("README.md")).unwrap();

		let registry = PluginRegistry::new(root.path());
		assert!(registry.enumerate().unwrap().is_empty());
	}

	#[cfg(unix)]
	#[test]
	fn manifest_populates_protocol_version() {
		let root = TempDir::new().unwrap();
		let dir = plugin_dir(root.path(), "aws-costs", "1.2.0");
		write_executable(&dir, "aws-costs");
		fs::write(
			dir.join(MANIFEST_FILE),
			r#"{ "protocol_version": "1.0.0" }"#,
		)
		.unwrap();

		let registry = PluginRegistry::new(root.path());
		let entries = registry.enumerate().unwrap();

		assert_eq!(entries[0].protocol_version.as_deref(), Some("1.0.0"));
	}

	#[cfg(unix)]
	#[test_log::test]
	fn broken_manifest_skips_the_entry() {
		let root = TempDir::new().unwrap();
		let dir = plugin_dir(root.path(), "bad", "0.1.0");
		write_executable(&dir, "bad");
		fs::write(dir.join(MANIFEST_FILE), "{ not json").unwrap();

		let good = plugin_dir(root.path(), "good", "0.1.0");
		write_executable(&good, "good");

		let registry = PluginRegistry::new(root.path());
		let entries = registry.enumerate().unwrap();

		assert_eq!(entries.len(), 1);
		assert_eq!(entries[0].name, "good");
	}

	#[cfg(unix)]
	#[test]
	fn manifest_entrypoint_selects_the_binary() {
		let root = TempDir::new().unwrap();
		let dir = plugin_dir(root.path(), "multi", "2.0.0");
		write_executable(&dir, "helper");
		let main = write_executable(&dir, "multi-plugin");
		fs::write(dir.join(MANIFEST_FILE), r#"{ "entrypoint": "multi-plugin" }"#).unwrap();

		let registry = PluginRegistry::new(root.path());
		let entries = registry.enumerate().unwrap();

		assert_eq!(entries.len(), 1);
		assert_eq!(entries[0].binary_path, main);
	}

	#[test]
	fn missing_root_yields_no_entries() {
		let registry = PluginRegistry::new("/nonexistent/tally-plugins");
		assert!(registry.enumerate().unwrap().is_empty());
	}

	#[cfg(unix)]
	#[test]
	fn versions_enumerate_per_name() {
		let root = TempDir::new().unwrap();
		for version in ["1.0.0", "1.1.0"] {
			let dir = plugin_dir(root.path(), "aws-costs", version);
			write_executable(&dir, "aws-costs");
		}

		let registry = PluginRegistry::new(root.path());
		let entries = registry.enumerate().unwrap();

		assert_eq!(entries.len(), 2);
		assert!(entries.iter().all(|e| e.name == "aws-costs"));
	}

	#[cfg(unix)]
	#[test]
	fn manifest_selects_the_stdio_transport() {
		let root = TempDir::new().unwrap();
		let dir = plugin_dir(root.path(), "pipe-costs", "0.1.0");
		write_executable(&dir, "pipe-costs");
		fs::write(dir.join(MANIFEST_FILE), r#"{ "transport": "stdio" }"#).unwrap();

		let registry = PluginRegistry::new(root.path());
		let entries = registry.enumerate().unwrap();

		assert_eq!(entries[0].transport, PluginTransport::Stdio);
	}
}
