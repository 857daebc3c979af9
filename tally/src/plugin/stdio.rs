// SPDX-License-Identifier: Apache-2.0

//! Alternate launcher for plugins that speak the protocol over their
//! standard streams instead of binding a port.
//!
//! The child is spawned with `--stdio` and piped streams; a local listener
//! accepts exactly one connection (the host's own channel) and the proxy
//! copies bytes in both directions between that socket and the child's
//! pipes. The RPC runtime's framing layers over the raw byte stream.

use crate::{
	error::{Error, Result},
	plugin::{
		manager::{ChildGuard, CloseHandle, Launch, LaunchedPlugin, LauncherConfig},
		registry::PluginEntry,
	},
};
use std::{net::SocketAddr, process::Stdio};
use tokio::{
	io::AsyncWriteExt,
	net::TcpListener,
	process::Command,
	task::JoinHandle,
};
use tonic::transport::Endpoint;

/// Launches plugins as pipe-based children behind a local TCP proxy.
#[derive(Clone, Debug)]
pub struct StdioLauncher {
	config: LauncherConfig,
}

/// A running child plus the proxy wiring its pipes to a local socket.
#[derive(Debug)]
struct StdioProxy {
	addr: SocketAddr,
	child: ChildGuard,
	proxy: JoinHandle<()>,
}

impl StdioLauncher {
	pub fn new(config: LauncherConfig) -> Self {
		StdioLauncher { config }
	}

	/// Spawn the child and stand up the byte proxy, without yet opening
	/// the RPC channel.
	async fn spawn_proxy(&self, entry: &PluginEntry) -> Result<StdioProxy> {
		let listener = TcpListener::bind("127.0.0.1:0")
			.await
			.map_err(|e| Error::io("failed to bind stdio proxy listener", e))?;
		let addr = listener
			.local_addr()
			.map_err(|e| Error::io("failed to read stdio proxy address", e))?;

		log::debug!(
			"spawning stdio plugin '{}' from '{}' behind {}",
			entry.name,
			entry.binary_path.display(),
			addr
		);

		let mut command = Command::new(&entry.binary_path);
		command
			.arg("--stdio")
			.args(&self.config.extra_args)
			.stdin(Stdio::piped())
			.stdout(Stdio::piped())
			.stderr(if self.config.quiet {
				Stdio::null()
			} else {
				Stdio::inherit()
			})
			.kill_on_drop(true);

		let mut child = command.spawn().map_err(|source| Error::Spawn {
			plugin: entry.name.clone(),
			binary: entry.binary_path.clone(),
			source,
		})?;

		let mut stdin = child.stdin.take().ok_or_else(|| Error::StdioPipes {
			plugin: entry.name.clone(),
		})?;
		let mut stdout = child.stdout.take().ok_or_else(|| Error::StdioPipes {
			plugin: entry.name.clone(),
		})?;

		let plugin = entry.name.clone();
		let proxy = tokio::spawn(async move {
			// Exactly one inbound connection is served: the host's channel.
			let (socket, peer) = match listener.accept().await {
				Ok(accepted) => accepted,
				Err(e) => {
					log::debug!("stdio proxy for plugin '{}' failed to accept: {}", plugin, e);
					return;
				}
			};
			log::trace!("stdio proxy for plugin '{}' accepted {}", plugin, peer);

			let (mut socket_read, mut socket_write) = socket.into_split();

			let to_child = async {
				let _ = tokio::io::copy(&mut socket_read, &mut stdin).await;
				let _ = stdin.shutdown().await;
			};
			let to_socket = async {
				let _ = tokio::io::copy(&mut stdout, &mut socket_write).await;
				let _ = socket_write.shutdown().await;
			};

			tokio::join!(to_child, to_socket);
			log::debug!("stdio proxy for plugin '{}' finished", plugin);
		});

		Ok(StdioProxy {
			addr,
			child: ChildGuard::new(entry.name.clone(), child),
			proxy,
		})
	}
}

#[tonic::async_trait]
impl Launch for StdioLauncher {
	async fn launch(&self, entry: &PluginEntry) -> Result<LaunchedPlugin> {
		let StdioProxy {
			addr,
			child,
			proxy,
		} = self.spawn_proxy(entry).await?;

		let mut close = StdioCloseHandle {
			child,
			proxy: Some(proxy),
		};

		let url = format!("http://{addr}");
		let endpoint = match Endpoint::from_shared(url.clone()) {
			Ok(endpoint) => endpoint.connect_timeout(self.config.connect_deadline),
			Err(source) => {
				close.close().await;
				return Err(Error::Endpoint {
					endpoint: url,
					source,
				});
			}
		};

		let channel = match endpoint.connect().await {
			Ok(channel) => channel,
			Err(source) => {
				close.close().await;
				return Err(Error::Connect {
					plugin: entry.name.clone(),
					source,
				});
			}
		};

		Ok(LaunchedPlugin {
			channel,
			close: Box::new(close),
		})
	}
}

/// Tears down the proxy task, then the child. Closing twice is a no-op.
struct StdioCloseHandle {
	child: ChildGuard,
	proxy: Option<JoinHandle<()>>,
}

#[tonic::async_trait]
impl CloseHandle for StdioCloseHandle {
	async fn close(&mut self) {
		if let Some(proxy) = self.proxy.take() {
			proxy.abort();
		}
		self.child.shutdown().await;
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::plugin::registry::PluginTransport;
	use std::{fs, path::Path, path::PathBuf};
	use tempfile::TempDir;
	use tokio::{
		io::{AsyncReadExt, AsyncWriteExt},
		net::TcpStream,
	};

	/// A stand-in plugin that ignores `--stdio` and echoes stdin to stdout.
	#[cfg(unix)]
	fn cat_entry(dir: &Path) -> PluginEntry {
		use std::os::unix::fs::PermissionsExt;

		let path = dir.join("echo-plugin");
		fs::write(&path, "#!/bin/sh\nexec cat\n").unwrap();

		let mut perms = fs::metadata(&path).unwrap().permissions();
		perms.set_mode(0o755);
		fs::set_permissions(&path, perms).unwrap();

		PluginEntry {
			name: "echo-plugin".to_owned(),
			version: "0.0.0".to_owned(),
			binary_path: path,
			transport: PluginTransport::Port,
			protocol_version: None,
		}
	}

	fn quiet_config() -> LauncherConfig {
		LauncherConfig {
			quiet: true,
			..LauncherConfig::default()
		}
	}

	#[cfg(unix)]
	#[tokio::test]
	async fn proxy_round_trips_bytes_through_the_child() {
		// The child copies stdin to stdout, so the proxy echoes whatever
		// the socket sends.
		let dir = TempDir::new().unwrap();
		let launcher = StdioLauncher::new(quiet_config());
		let proxy = launcher.spawn_proxy(&cat_entry(dir.path())).await.unwrap();

		let mut socket = TcpStream::connect(proxy.addr).await.unwrap();
		socket.write_all(b"ping\n").await.unwrap();

		let mut buf = [0u8; 5];
		socket.read_exact(&mut buf).await.unwrap();
		assert_eq!(&buf, b"ping\n");

		let mut close = StdioCloseHandle {
			child: proxy.child,
			proxy: Some(proxy.proxy),
		};
		close.close().await;
	}

	#[cfg(unix)]
	#[tokio::test]
	async fn stdio_close_is_idempotent() {
		let dir = TempDir::new().unwrap();
		let launcher = StdioLauncher::new(quiet_config());
		let proxy = launcher.spawn_proxy(&cat_entry(dir.path())).await.unwrap();

		let mut close = StdioCloseHandle {
			child: proxy.child,
			proxy: Some(proxy.proxy),
		};
		close.close().await;
		close.close().await;
	}

	#[cfg(unix)]
	#[tokio::test]
	async fn missing_binary_fails_to_spawn() {
		let launcher = StdioLauncher::new(quiet_config());
		let entry = PluginEntry {
			name: "ghost".to_owned(),
			version: "0.0.0".to_owned(),
			binary_path: PathBuf::from("/nonexistent/tally-stdio-plugin"),
			transport: PluginTransport::Port,
			protocol_version: None,
		};

		let err = launcher.spawn_proxy(&entry).await.unwrap_err();
		assert!(matches!(err, Error::Spawn { .. }));
	}
}
