// SPDX-License-Identifier: Apache-2.0

mod client;
mod compat;
mod manager;
#[cfg(test)]
pub(crate) mod mock;
mod ports;
mod registry;
mod stdio;
mod trace;

pub use client::{ClientOptions, CostSourceClient, PluginClient};
pub use compat::{check_spec_compatibility, parse_spec_version, Compatibility, CORE_SPEC_VERSION};
pub use manager::{
	ChildGuard, CloseHandle, Launch, LaunchedPlugin, LauncherConfig, PluginLauncher,
	PLUGIN_PORT_ENV,
};
pub use ports::PortAllocator;
pub use registry::{PluginEntry, PluginRegistry, PluginTransport};
pub use stdio::StdioLauncher;
pub use trace::{TraceContext, TraceInterceptor, TRACE_METADATA_KEY};

use crate::error::Result;
use futures::future::join_all;
use std::sync::Arc;

/// Routes each plugin to the launcher its declared transport needs.
pub struct HostLauncher {
	process: PluginLauncher,
	stdio: StdioLauncher,
}

impl HostLauncher {
	pub fn new(ports: Arc<PortAllocator>, config: LauncherConfig) -> Self {
		HostLauncher {
			process: PluginLauncher::new(ports, config.clone()),
			stdio: StdioLauncher::new(config),
		}
	}
}

#[tonic::async_trait]
impl Launch for HostLauncher {
	async fn launch(&self, entry: &PluginEntry) -> Result<LaunchedPlugin> {
		match entry.transport {
			PluginTransport::Port => self.process.launch(entry).await,
			PluginTransport::Stdio => self.stdio.launch(entry).await,
		}
	}
}

/// Launch and connect every discovered plugin concurrently.
///
/// A plugin that fails to launch or negotiate is logged and skipped; the
/// fallback chain makes a partial fleet still useful.
pub async fn start_clients(
	entries: &[PluginEntry],
	launcher: &dyn Launch,
	options: &ClientOptions,
	trace: &TraceContext,
) -> Vec<Arc<PluginClient>> {
	log::info!("starting {} plugins", entries.len());

	let connects = entries
		.iter()
		.map(|entry| PluginClient::connect(launcher, entry, options, trace.clone()));

	let mut clients = Vec::new();
	for (entry, result) in entries.iter().zip(join_all(connects).await) {
		match result {
			Ok(client) => {
				log::debug!("plugin '{}' ready", client.name());
				clients.push(Arc::new(client));
			}
			Err(e) => {
				log::warn!(
					"skipping plugin '{}' version '{}': {}",
					entry.name,
					entry.version,
					e
				);
			}
		}
	}

	clients
}

/// Close every client, draining their children.
pub async fn close_clients(clients: &[Arc<PluginClient>]) {
	for client in clients {
		client.close().await;
	}
}
