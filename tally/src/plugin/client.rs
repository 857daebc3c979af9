// SPDX-License-Identifier: Apache-2.0

//! The host-side wrapper around one running plugin.
//!
//! Construction performs the connect-time negotiation: the name exchange
//! (which doubles as a liveness probe), the optional metadata fetch, and
//! the spec-version compatibility gate. The wrapper then exposes typed
//! versions of the cost-source RPCs and an idempotent close.

use crate::{
	cost::{ActualCostBatch, Support, UnitCost},
	error::{Error, Result},
	plugin::{
		compat::{check_spec_compatibility, Compatibility, CORE_SPEC_VERSION},
		manager::{CloseHandle, Launch, LaunchedPlugin},
		registry::PluginEntry,
		trace::{TraceContext, TraceInterceptor},
	},
};
use chrono::{DateTime, Utc};
use std::{collections::BTreeMap, result::Result as StdResult, time::Duration};
use tally_common::{
	proto::{self, cost_source_service_client::CostSourceServiceClient},
	types::{PluginMetadata, ResourceDescriptor},
};
use tokio::sync::Mutex;
use tonic::{service::interceptor::InterceptedService, transport::Channel, Code, Status};

pub type CostSourceClient =
	CostSourceServiceClient<InterceptedService<Channel, TraceInterceptor>>;

/// Knobs for client construction.
#[derive(Clone, Debug)]
pub struct ClientOptions {
	/// Refuse plugins whose major spec version differs from the host's.
	pub strict_compatibility: bool,

	/// Skip the spec-version gate entirely.
	pub skip_version_check: bool,

	/// Per-call bound on the metadata fetch.
	pub info_timeout: Duration,
}

impl Default for ClientOptions {
	fn default() -> Self {
		ClientOptions {
			strict_compatibility: false,
			skip_version_check: false,
			info_timeout: Duration::from_secs(5),
		}
	}
}

/// A connected cost-source plugin.
pub struct PluginClient {
	name: String,
	metadata: Option<PluginMetadata>,
	grpc: CostSourceClient,
	close: Mutex<Option<Box<dyn CloseHandle>>>,
}

impl std::fmt::Debug for PluginClient {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("PluginClient")
			.field("name", &self.name)
			.field("metadata", &self.metadata)
			.finish_non_exhaustive()
	}
}

impl PluginClient {
	/// Launch `entry` and run the connect-time negotiation.
	pub async fn connect(
		launcher: &dyn Launch,
		entry: &PluginEntry,
		options: &ClientOptions,
		trace: TraceContext,
	) -> Result<PluginClient> {
		let LaunchedPlugin { channel, mut close } = launcher.launch(entry).await?;

		let mut grpc =
			CostSourceServiceClient::with_interceptor(channel, TraceInterceptor::new(trace));

		// The name exchange doubles as the liveness probe; failure here
		// is fatal to the connection.
		let name = match grpc.name(proto::NameRequest {}).await {
			Ok(response) => {
				let advertised = response.into_inner().name;
				if advertised.is_empty() {
					entry.name.clone()
				} else {
					advertised
				}
			}
			Err(source) => {
				close.close().await;
				return Err(Error::Rpc {
					plugin: entry.name.clone(),
					source,
				});
			}
		};

		let metadata = fetch_metadata(&mut grpc, &name, options.info_timeout).await;

		if !options.skip_version_check {
			if let Some(meta) = &metadata {
				if let Err(e) = gate_spec_version(&name, &meta.spec_version, options) {
					close.close().await;
					return Err(e);
				}
			}
		}

		log::debug!("connected to plugin '{}'", name);

		Ok(PluginClient {
			name,
			metadata,
			grpc,
			close: Mutex::new(Some(close)),
		})
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	/// Metadata advertised at connect time; `None` for legacy plugins.
	pub fn metadata(&self) -> Option<&PluginMetadata> {
		self.metadata.as_ref()
	}

	pub async fn supports(&self, resource: &ResourceDescriptor) -> StdResult<Support, Status> {
		let request = proto::SupportsRequest {
			resource: Some(resource.clone().into()),
		};

		let mut grpc = self.grpc.clone();
		match grpc.supports(request).await {
			Ok(response) => {
				let inner = response.into_inner();
				Ok(Support {
					supported: inner.supported,
					reason: none_if_empty(inner.reason),
				})
			}
			Err(status) => {
				log::warn!("Supports call to plugin '{}' failed: {}", self.name, status);
				Err(status)
			}
		}
	}

	pub async fn projected_cost(
		&self,
		resource: &ResourceDescriptor,
	) -> StdResult<UnitCost, Status> {
		let request = proto::GetProjectedCostRequest {
			resource: Some(resource.clone().into()),
		};

		let mut grpc = self.grpc.clone();
		match grpc.get_projected_cost(request).await {
			Ok(response) => {
				let inner = response.into_inner();
				Ok(UnitCost {
					unit_price: inner.unit_price,
					currency: inner.currency,
					cost_per_month: inner.cost_per_month,
					billing_detail: none_if_empty(inner.billing_detail),
				})
			}
			Err(status) => {
				log::warn!(
					"GetProjectedCost call to plugin '{}' failed: {}",
					self.name,
					status
				);
				Err(status)
			}
		}
	}

	pub async fn actual_cost(
		&self,
		resource_id: &str,
		start: DateTime<Utc>,
		end: DateTime<Utc>,
		tags: &BTreeMap<String, String>,
	) -> StdResult<ActualCostBatch, Status> {
		let request = proto::GetActualCostRequest {
			resource_id: resource_id.to_owned(),
			start: start.timestamp(),
			end: end.timestamp(),
			tags: tags.clone().into_iter().collect(),
		};

		let mut grpc = self.grpc.clone();
		match grpc.get_actual_cost(request).await {
			Ok(response) => {
				let inner = response.into_inner();
				Ok(ActualCostBatch {
					currency: inner.currency,
					entries: inner.results.into_iter().map(Into::into).collect(),
				})
			}
			Err(status) => {
				log::warn!(
					"GetActualCost call to plugin '{}' failed: {}",
					self.name,
					status
				);
				Err(status)
			}
		}
	}

	/// Run the launcher's close hook. Safe to call more than once; later
	/// calls on the channel will fail.
	pub async fn close(&self) {
		let mut guard = self.close.lock().await;
		if let Some(mut handle) = guard.take() {
			log::debug!("closing plugin '{}'", self.name);
			handle.close().await;
		}
	}
}

async fn fetch_metadata(
	grpc: &mut CostSourceClient,
	name: &str,
	timeout: Duration,
) -> Option<PluginMetadata> {
	let request = grpc.get_plugin_info(proto::GetPluginInfoRequest {});

	match tokio::time::timeout(timeout, request).await {
		Ok(Ok(response)) => Some(response.into_inner().into()),
		Ok(Err(status)) if status.code() == Code::Unimplemented => {
			log::debug!(
				"plugin '{}' does not implement GetPluginInfo; treating as legacy",
				name
			);
			None
		}
		Ok(Err(status)) => {
			log::warn!("failed to fetch metadata from plugin '{}': {}", name, status);
			None
		}
		Err(_) => {
			log::warn!("metadata request to plugin '{}' timed out", name);
			None
		}
	}
}

fn gate_spec_version(name: &str, spec_version: &str, options: &ClientOptions) -> Result<()> {
	match check_spec_compatibility(CORE_SPEC_VERSION, spec_version) {
		Compatibility::Compatible => Ok(()),
		Compatibility::MajorMismatch { core, plugin } => {
			log::warn!(
				"plugin '{}' implements cost-source spec '{}' but this host speaks '{}'",
				name,
				plugin,
				core
			);
			if options.strict_compatibility {
				Err(Error::IncompatiblePlugin {
					plugin: name.to_owned(),
					plugin_spec: plugin.to_string(),
					core_spec: core.to_string(),
				})
			} else {
				Ok(())
			}
		}
		Compatibility::Invalid { raw } => {
			log::warn!(
				"plugin '{}' advertises unparseable spec version '{}'",
				name,
				raw
			);
			if options.strict_compatibility {
				Err(Error::IncompatiblePlugin {
					plugin: name.to_owned(),
					plugin_spec: raw,
					core_spec: CORE_SPEC_VERSION.to_owned(),
				})
			} else {
				Ok(())
			}
		}
	}
}

fn none_if_empty(s: String) -> Option<String> {
	if s.is_empty() {
		None
	} else {
		Some(s)
	}
}
