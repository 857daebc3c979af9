// SPDX-License-Identifier: Apache-2.0

//! Launching plugin processes and connecting to them.
//!
//! Startup hands the child a port on its command line, which leaves a
//! TOCTOU window between releasing our reservation and the child's bind.
//! The launcher retries collision-style failures with exponential backoff
//! and owns the child process until the returned close handle runs.

use crate::{
	error::{Error, Result},
	plugin::{ports::PortAllocator, registry::PluginEntry},
};
use std::{
	net::SocketAddr,
	process::Stdio,
	sync::Arc,
	time::Duration,
};
use tokio::{
	net::TcpStream,
	process::{Child, Command},
	time::Instant,
};
use tonic::transport::{Channel, Endpoint};

/// The one port-related environment variable handed to children. The host
/// never sets a generic `PORT`.
pub const PLUGIN_PORT_ENV: &str = "TALLY_PLUGIN_PORT";

/// Releases whatever a launch acquired: the RPC channel's peer process,
/// proxy tasks, and so on. Closing twice is a no-op.
#[tonic::async_trait]
pub trait CloseHandle: Send {
	async fn close(&mut self);
}

/// A started plugin: an open channel plus the handle that tears it down.
pub struct LaunchedPlugin {
	pub channel: Channel,
	pub close: Box<dyn CloseHandle>,
}

impl std::fmt::Debug for LaunchedPlugin {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("LaunchedPlugin").field("channel", &self.channel).finish_non_exhaustive()
	}
}

/// Anything that can take a discovered plugin binary and produce a live
/// RPC channel to it.
#[tonic::async_trait]
pub trait Launch: Send + Sync {
	async fn launch(&self, entry: &PluginEntry) -> Result<LaunchedPlugin>;
}

/// Tunables for the process launcher.
#[derive(Clone, Debug)]
pub struct LauncherConfig {
	/// Upper bound on spawn attempts per plugin.
	pub max_retries: usize,

	/// Backoff before retry k is `initial_backoff * 2^(k-1)`, clamped.
	pub initial_backoff: Duration,
	pub max_backoff: Duration,

	/// Interval between TCP connect probes while waiting for the child
	/// to bind its port.
	pub poll_interval: Duration,

	/// How long the child gets to bind before it is killed and the
	/// attempt fails.
	pub bind_timeout: Duration,

	/// Aggregate deadline for establishing the gRPC channel once the
	/// child is listening.
	pub connect_deadline: Duration,

	/// Extra command-line arguments appended after `--port=<N>`.
	pub extra_args: Vec<String>,

	/// Discard child stderr instead of passing it through.
	pub quiet: bool,
}

impl Default for LauncherConfig {
	fn default() -> Self {
		LauncherConfig {
			max_retries: 3,
			initial_backoff: Duration::from_millis(100),
			max_backoff: Duration::from_secs(2),
			poll_interval: Duration::from_millis(100),
			bind_timeout: Duration::from_secs(60),
			connect_deadline: Duration::from_secs(10),
			extra_args: Vec::new(),
			quiet: false,
		}
	}
}

/// Spawns plugins as port-listening children and connects to them.
#[derive(Clone, Debug)]
pub struct PluginLauncher {
	ports: Arc<PortAllocator>,
	config: LauncherConfig,
}

impl PluginLauncher {
	pub fn new(ports: Arc<PortAllocator>, config: LauncherConfig) -> Self {
		PluginLauncher { ports, config }
	}

	async fn try_launch(&self, entry: &PluginEntry) -> Result<LaunchedPlugin> {
		let port = self.ports.reserve().await?;

		// The child must be able to bind the port, so the reservation is
		// closed immediately before spawn. This reopens the collision
		// window; the caller's retry loop covers the loss.
		self.ports.release(port).await?;

		// A concurrent launch may have re-reserved the freed port already.
		if self.ports.is_reserved(port).await {
			return Err(Error::PortRaced { port });
		}

		if std::env::var_os("PORT").is_some() {
			log::debug!(
				"inherited PORT variable is ignored; plugins receive {}={}",
				PLUGIN_PORT_ENV,
				port
			);
		}

		log::debug!(
			"spawning plugin '{}' from '{}' on port {}",
			entry.name,
			entry.binary_path.display(),
			port
		);

		let mut command = Command::new(&entry.binary_path);
		command
			.arg(format!("--port={port}"))
			.args(&self.config.extra_args)
			.env(PLUGIN_PORT_ENV, port.to_string())
			.stdout(stderr_stdio())
			.stderr(if self.config.quiet {
				Stdio::null()
			} else {
				Stdio::inherit()
			})
			.stdin(Stdio::null())
			.kill_on_drop(true);

		let child = command.spawn().map_err(|source| Error::Spawn {
			plugin: entry.name.clone(),
			binary: entry.binary_path.clone(),
			source,
		})?;

		let mut child = ChildGuard::new(entry.name.clone(), child);

		self.wait_for_bind(entry, port, &mut child).await?;

		let channel = match self.connect(entry, port).await {
			Ok(channel) => channel,
			Err(e) => {
				child.shutdown().await;
				return Err(e);
			}
		};

		log::debug!("plugin '{}' is up on port {}", entry.name, port);

		Ok(LaunchedPlugin {
			channel,
			close: Box::new(child),
		})
	}

	/// Probe the child's port until it accepts a TCP connection or the
	/// bind deadline passes. On deadline the child is killed and reaped.
	async fn wait_for_bind(
		&self,
		entry: &PluginEntry,
		port: u16,
		child: &mut ChildGuard,
	) -> Result<()> {
		let deadline = Instant::now() + self.config.bind_timeout;
		let addr = SocketAddr::from(([127, 0, 0, 1], port));

		loop {
			if TcpStream::connect(addr).await.is_ok() {
				return Ok(());
			}

			// A child that died without binding will never pass the probe;
			// its exit usually means it lost the port to another binder.
			if let Some(status) = child.try_wait() {
				log::debug!(
					"plugin '{}' exited with {} before binding port {}",
					entry.name,
					status,
					port
				);
				child.shutdown().await;
				return Err(Error::PluginExited {
					plugin: entry.name.clone(),
					port,
				});
			}

			if Instant::now() >= deadline {
				log::warn!(
					"plugin '{}' never bound port {}; check that it honours the --port flag",
					entry.name,
					port
				);
				child.shutdown().await;
				return Err(Error::BindTimeout {
					plugin: entry.name.clone(),
					port,
					timeout: self.config.bind_timeout,
				});
			}

			tokio::time::sleep(self.config.poll_interval).await;
		}
	}

	async fn connect(&self, entry: &PluginEntry, port: u16) -> Result<Channel> {
		let url = format!("http://127.0.0.1:{port}");

		let endpoint = Endpoint::from_shared(url.clone())
			.map_err(|source| Error::Endpoint {
				endpoint: url,
				source,
			})?
			.connect_timeout(self.config.connect_deadline);

		endpoint.connect().await.map_err(|source| Error::Connect {
			plugin: entry.name.clone(),
			source,
		})
	}
}

#[tonic::async_trait]
impl Launch for PluginLauncher {
	async fn launch(&self, entry: &PluginEntry) -> Result<LaunchedPlugin> {
		let mut last_error = None;

		for attempt in 0..self.config.max_retries {
			if attempt > 0 {
				let backoff = backoff_for_attempt(
					attempt,
					self.config.initial_backoff,
					self.config.max_backoff,
				);
				log::debug!(
					"retrying launch of plugin '{}' in {:?} [attempt {}]",
					entry.name,
					backoff,
					attempt + 1
				);
				tokio::time::sleep(backoff).await;
			}

			match self.try_launch(entry).await {
				Ok(launched) => return Ok(launched),
				Err(e) if is_retryable_launch_error(&e) => {
					log::debug!("launch attempt for plugin '{}' failed: {}", entry.name, e);
					last_error = Some(e);
				}
				Err(e) => return Err(e),
			}
		}

		if let Some(e) = last_error {
			log::warn!("giving up on plugin '{}': {}", entry.name, e);
		}

		Err(Error::MaxLaunchAttempts {
			plugin: entry.name.clone(),
			attempts: self.config.max_retries,
		})
	}
}

/// Owns a spawned plugin child. Shutdown kills the process and then reaps
/// it within a bounded drain window so no zombie outlives the host; a
/// still-owned child is also killed on drop as a cancellation backstop.
#[derive(Debug)]
pub struct ChildGuard {
	plugin: String,
	child: Option<Child>,
}

impl ChildGuard {
	/// Post-kill reap window.
	const DRAIN: Duration = Duration::from_secs(5);

	pub fn new(plugin: String, child: Child) -> Self {
		ChildGuard {
			plugin,
			child: Some(child),
		}
	}

	/// Whether the child has already exited on its own.
	pub fn try_wait(&mut self) -> Option<std::process::ExitStatus> {
		self.child.as_mut()?.try_wait().ok().flatten()
	}

	pub async fn shutdown(&mut self) {
		let Some(mut child) = self.child.take() else {
			return;
		};

		// Kill and reap are both attempted even if either fails.
		if let Err(e) = child.start_kill() {
			log::debug!("plugin '{}' was already gone on kill: {}", self.plugin, e);
		}

		match tokio::time::timeout(Self::DRAIN, child.wait()).await {
			Ok(Ok(status)) => {
				log::debug!("plugin '{}' exited with {}", self.plugin, status);
			}
			Ok(Err(e)) => {
				log::warn!("failed to reap plugin '{}': {}", self.plugin, e);
			}
			Err(_) => {
				log::warn!(
					"plugin '{}' did not exit within the {:?} drain window",
					self.plugin,
					Self::DRAIN
				);
			}
		}
	}
}

#[tonic::async_trait]
impl CloseHandle for ChildGuard {
	async fn close(&mut self) {
		self.shutdown().await;
	}
}

/// Child stdout is routed to the host's stderr so plugin chatter never
/// pollutes the host's own stdout report stream.
#[cfg(unix)]
fn stderr_stdio() -> Stdio {
	use std::os::fd::AsFd;

	match std::io::stderr().as_fd().try_clone_to_owned() {
		Ok(fd) => Stdio::from(fd),
		Err(_) => Stdio::inherit(),
	}
}

#[cfg(not(unix))]
fn stderr_stdio() -> Stdio {
	Stdio::inherit()
}

fn backoff_for_attempt(attempt: usize, initial: Duration, max: Duration) -> Duration {
	let factor = 1u32 << (attempt.saturating_sub(1)).min(16);
	initial.saturating_mul(factor).min(max)
}

/// Collision-style failures justify another launch attempt. EADDRINUSE
/// only ever arises at a `bind()`, and the only bind on the launch path
/// happens inside the child, so a lost port surfaces as the child dying
/// before the probe succeeds ([`Error::PluginExited`]), the probe never
/// succeeding ([`Error::BindTimeout`]), or the host's own allocator
/// re-reserving the port during hand-off ([`Error::PortRaced`]). The
/// host's outbound connect never binds, so its errors are terminal.
fn is_retryable_launch_error(error: &Error) -> bool {
	matches!(
		error,
		Error::BindTimeout { .. } | Error::PluginExited { .. } | Error::PortRaced { .. }
	)
}
