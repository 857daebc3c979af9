// SPDX-License-Identifier: Apache-2.0

//! The cost orchestration engine.
//!
//! For each resource the engine walks its fallback chain: every connected
//! plugin in discovery order, then the local spec store, then a
//! placeholder row so output shape is preserved. Per-resource work is
//! dispatched across a bounded worker pool and re-sequenced into input
//! order before any aggregation.

pub mod classify;

use crate::{
	cost::{
		ActualCostResult, GroupBy, ProjectedCostResult, UnitCost, HOURS_PER_MONTH, SOURCE_UNKNOWN,
	},
	engine::classify::{classify, with_retry, ErrorClass},
	error::{Error, Result},
	plugin::PluginClient,
	spec_store::SpecStore,
};
use chrono::{DateTime, Utc};
use futures::{stream, StreamExt};
use serde::Serialize;
use std::{collections::BTreeMap, sync::Arc};
use tally_common::types::ResourceDescriptor;
use tonic::Status;

/// Tunables for the engine.
#[derive(Clone, Debug)]
pub struct EngineConfig {
	/// Size of the per-resource worker pool.
	pub workers: usize,
}

impl Default for EngineConfig {
	fn default() -> Self {
		EngineConfig { workers: 10 }
	}
}

/// Historical cost query: which resources, over what window, grouped how.
#[derive(Clone, Debug)]
pub struct ActualCostRequest {
	/// Glob over resource identifiers; `None` matches everything.
	pub resource_glob: Option<String>,

	/// Half-open `[start, end)` window.
	pub start: DateTime<Utc>,
	pub end: DateTime<Utc>,

	/// Resources must carry every one of these tags to match.
	pub tag_filters: BTreeMap<String, String>,

	pub group_by: GroupBy,
}

/// Projected-cost report: ordered per-resource rows plus group totals.
#[derive(Clone, Debug, Serialize)]
pub struct ProjectedCostReport {
	pub results: Vec<ProjectedCostResult>,
	pub group_by: GroupBy,
	pub groups: BTreeMap<String, f64>,
	pub total: f64,

	/// The single currency shared by every row, when they agree.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub currency: Option<String>,
}

/// Orchestrates plugins and the spec store into cost reports.
pub struct CostEngine {
	clients: Vec<Arc<PluginClient>>,
	specs: Arc<SpecStore>,
	config: EngineConfig,
}

impl CostEngine {
	pub fn new(
		clients: Vec<Arc<PluginClient>>,
		specs: Arc<SpecStore>,
		config: EngineConfig,
	) -> Self {
		CostEngine {
			clients,
			specs,
			config,
		}
	}

	pub fn clients(&self) -> &[Arc<PluginClient>] {
		&self.clients
	}

	/// Price every resource, preserving input order in the output.
	pub async fn projected_costs(
		&self,
		resources: &[ResourceDescriptor],
	) -> Result<Vec<ProjectedCostResult>> {
		let workers = self.config.workers.max(1);

		let mut indexed: Vec<(usize, Result<ProjectedCostResult>)> =
			stream::iter(resources.iter().enumerate())
				.map(|(index, resource)| async move {
					(index, self.projected_one(resource).await)
				})
				.buffer_unordered(workers)
				.collect()
				.await;

		indexed.sort_by_key(|(index, _)| *index);
		indexed.into_iter().map(|(_, result)| result).collect()
	}

	/// Walk one resource down the fallback chain.
	async fn projected_one(&self, resource: &ResourceDescriptor) -> Result<ProjectedCostResult> {
		for client in &self.clients {
			if let Some(meta) = client.metadata() {
				if !meta.serves_provider(resource.provider_or_derived()) {
					continue;
				}
			}

			let support = match with_retry(client.name(), "Supports", || {
				client.supports(resource)
			})
			.await
			{
				Ok(support) => support,
				Err(status) => {
					self.check_configuration(client.name(), &status)?;
					continue;
				}
			};

			if !support.supported {
				log::trace!(
					"plugin '{}' does not support '{}'{}",
					client.name(),
					resource.id,
					support
						.reason
						.map(|r| format!(": {r}"))
						.unwrap_or_default()
				);
				continue;
			}

			match with_retry(client.name(), "GetProjectedCost", || {
				client.projected_cost(resource)
			})
			.await
			{
				Ok(unit) => return Ok(projected_row(resource, unit, client.name())),
				Err(status) => {
					self.check_configuration(client.name(), &status)?;
					continue;
				}
			}
		}

		if let Some(spec) = self.specs.lookup(
			resource.provider_or_derived(),
			&resource.resource_type,
			resource.sku.as_deref(),
			resource.region.as_deref(),
		) {
			return Ok(ProjectedCostResult {
				resource_id: resource.id.clone(),
				provider: resource.provider_or_derived().to_owned(),
				resource_type: resource.resource_type.clone(),
				unit_price: spec.rate_per_unit,
				currency: spec.currency.clone(),
				monthly_cost: spec.monthly_cost(),
				billing_detail: spec.description.clone(),
				source: spec.source_label().to_owned(),
			});
		}

		log::debug!("no pricing source for resource '{}'", resource.id);
		Ok(placeholder_row(resource))
	}

	/// Query historical costs for every matched resource, in input order.
	/// There is no local fallback for history; resources without records
	/// surface as explicit no-data rows.
	pub async fn actual_costs(
		&self,
		resources: &[ResourceDescriptor],
		request: &ActualCostRequest,
	) -> Result<Vec<ActualCostResult>> {
		if request.end <= request.start {
			return Err(Error::InvalidTimeWindow);
		}

		let pattern = match &request.resource_glob {
			Some(raw) => Some(glob::Pattern::new(raw).map_err(|source| {
				Error::InvalidResourceFilter {
					pattern: raw.clone(),
					source,
				}
			})?),
			None => None,
		};

		let matched: Vec<&ResourceDescriptor> = resources
			.iter()
			.filter(|resource| matches_request(resource, pattern.as_ref(), &request.tag_filters))
			.collect();

		log::debug!(
			"querying actual costs for {} of {} resources",
			matched.len(),
			resources.len()
		);

		let workers = self.config.workers.max(1);

		let mut indexed: Vec<(usize, Result<ActualCostResult>)> =
			stream::iter(matched.into_iter().enumerate())
				.map(|(index, resource)| async move {
					(index, self.actual_one(resource, request).await)
				})
				.buffer_unordered(workers)
				.collect()
				.await;

		indexed.sort_by_key(|(index, _)| *index);
		indexed.into_iter().map(|(_, result)| result).collect()
	}

	async fn actual_one(
		&self,
		resource: &ResourceDescriptor,
		request: &ActualCostRequest,
	) -> Result<ActualCostResult> {
		for client in &self.clients {
			if let Some(meta) = client.metadata() {
				if !meta.serves_provider(resource.provider_or_derived()) {
					continue;
				}
			}

			let support = match with_retry(client.name(), "Supports", || {
				client.supports(resource)
			})
			.await
			{
				Ok(support) => support,
				Err(status) => {
					self.check_configuration(client.name(), &status)?;
					continue;
				}
			};

			if !support.supported {
				continue;
			}

			match with_retry(client.name(), "GetActualCost", || {
				client.actual_cost(&resource.id, request.start, request.end, &resource.tags)
			})
			.await
			{
				Ok(batch) if !batch.entries.is_empty() => {
					let mut breakdown = BTreeMap::new();
					for entry in &batch.entries {
						let source = entry.source.as_deref().unwrap_or(SOURCE_UNKNOWN);
						*breakdown.entry(source.to_owned()).or_insert(0.0) += entry.cost;
					}

					return Ok(ActualCostResult {
						resource_id: resource.id.clone(),
						provider: resource.provider_or_derived().to_owned(),
						resource_type: resource.resource_type.clone(),
						total_cost: batch.total(),
						currency: if batch.currency.is_empty() {
							"USD".to_owned()
						} else {
							batch.currency.clone()
						},
						start: request.start,
						end: request.end,
						breakdown,
						group_by: request.group_by,
					});
				}
				Ok(_) => continue,
				Err(status) => {
					self.check_configuration(client.name(), &status)?;
					continue;
				}
			}
		}

		Ok(ActualCostResult::no_data(
			resource.id.clone(),
			resource.provider_or_derived().to_owned(),
			resource.resource_type.clone(),
			request.start,
			request.end,
			request.group_by,
		))
	}

	/// Configuration-class failures abort the whole operation; everything
	/// else lets the fallback chain continue.
	fn check_configuration(&self, plugin: &str, status: &Status) -> Result<()> {
		if classify(status) == ErrorClass::Configuration {
			return Err(Error::PluginConfiguration {
				plugin: plugin.to_owned(),
				message: status.message().to_owned(),
			});
		}
		Ok(())
	}
}

fn matches_request(
	resource: &ResourceDescriptor,
	pattern: Option<&glob::Pattern>,
	tag_filters: &BTreeMap<String, String>,
) -> bool {
	if let Some(pattern) = pattern {
		if !pattern.matches(&resource.id) {
			return false;
		}
	}

	tag_filters
		.iter()
		.all(|(key, value)| resource.tags.get(key) == Some(value))
}

fn projected_row(
	resource: &ResourceDescriptor,
	unit: UnitCost,
	plugin_name: &str,
) -> ProjectedCostResult {
	// Plugins normally report their own monthly figure; derive one from a
	// per-hour unit price only when they left it out.
	let monthly_cost = if unit.cost_per_month != 0.0 {
		unit.cost_per_month
	} else {
		unit.unit_price * HOURS_PER_MONTH
	};

	ProjectedCostResult {
		resource_id: resource.id.clone(),
		provider: resource.provider_or_derived().to_owned(),
		resource_type: resource.resource_type.clone(),
		unit_price: unit.unit_price,
		currency: unit.currency,
		monthly_cost,
		billing_detail: unit.billing_detail,
		source: plugin_name.to_owned(),
	}
}

fn placeholder_row(resource: &ResourceDescriptor) -> ProjectedCostResult {
	ProjectedCostResult {
		resource_id: resource.id.clone(),
		provider: resource.provider_or_derived().to_owned(),
		resource_type: resource.resource_type.clone(),
		unit_price: 0.0,
		currency: "USD".to_owned(),
		monthly_cost: 0.0,
		billing_detail: None,
		source: SOURCE_UNKNOWN.to_owned(),
	}
}

/// Fold ordered rows into group totals and a grand total. The report's
/// total carries a currency only when every row agrees on one.
pub fn summarize_projected(
	results: Vec<ProjectedCostResult>,
	group_by: GroupBy,
) -> ProjectedCostReport {
	let mut groups: BTreeMap<String, f64> = BTreeMap::new();
	let mut total = 0.0;
	let mut currency: Option<String> = None;
	let mut mixed = false;

	for row in &results {
		let key = match group_by {
			GroupBy::Resource => row.resource_id.clone(),
			GroupBy::Type => row.resource_type.clone(),
			GroupBy::Provider => row.provider.clone(),
			// Projected rows have no time axis; date grouping buckets
			// everything under the run's UTC date.
			GroupBy::Daily => Utc::now().format("%Y-%m-%d").to_string(),
			GroupBy::Monthly => Utc::now().format("%Y-%m").to_string(),
		};

		*groups.entry(key).or_insert(0.0) += row.monthly_cost;
		total += row.monthly_cost;

		match &currency {
			None => currency = Some(row.currency.clone()),
			Some(existing) if *existing != row.currency => mixed = true,
			Some(_) => {}
		}
	}

	ProjectedCostReport {
		results,
		group_by,
		groups,
		total,
		currency: if mixed { None } else { currency },
	}
}
