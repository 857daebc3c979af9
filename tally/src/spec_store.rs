// SPDX-License-Identifier: Apache-2.0

//! Local fallback pricing records.
//!
//! When no plugin serves a resource, the engine consults a directory tree
//! of YAML spec files, one pricing record per file. The tree is read once
//! on first lookup and cached for the life of the process.

use crate::cost::{DAYS_PER_MONTH, HOURS_PER_MONTH};
use serde::{Deserialize, Serialize};
use std::{
	path::{Path, PathBuf},
	sync::OnceLock,
};
use walkdir::WalkDir;

/// How a unit rate maps onto billing periods.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingMode {
	PerHour,
	PerGbMonth,
	PerRequest,
	PerDay,
	PerCpuHour,
	Flat,
}

/// One fallback pricing record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PricingSpec {
	pub provider: String,

	/// Provider-qualified resource type the record prices.
	#[serde(rename = "type")]
	pub resource_type: String,

	#[serde(default)]
	pub sku: Option<String>,

	#[serde(default)]
	pub region: Option<String>,

	pub billing_mode: BillingMode,

	pub rate_per_unit: f64,

	pub currency: String,

	#[serde(default)]
	pub description: Option<String>,

	/// Label reported as the price's origin; defaults to the spec file
	/// path when the record does not set one.
	#[serde(default)]
	pub source: Option<String>,
}

impl PricingSpec {
	/// Project the unit rate to a monthly figure by its natural period.
	///
	/// Rates without an hourly or daily period (`per_gb_month`,
	/// `per_request`, `flat`) pass through unchanged; the core has no
	/// usage volume to scale them by.
	pub fn monthly_cost(&self) -> f64 {
		match self.billing_mode {
			BillingMode::PerHour | BillingMode::PerCpuHour => self.rate_per_unit * HOURS_PER_MONTH,
			BillingMode::PerDay => self.rate_per_unit * DAYS_PER_MONTH,
			BillingMode::PerGbMonth | BillingMode::PerRequest | BillingMode::Flat => {
				self.rate_per_unit
			}
		}
	}

	pub fn source_label(&self) -> &str {
		self.source.as_deref().unwrap_or("spec")
	}
}

/// Lazily-loaded store of fallback pricing records.
#[derive(Debug)]
pub struct SpecStore {
	root: PathBuf,
	cache: OnceLock<Vec<PricingSpec>>,
}

impl SpecStore {
	pub fn new(root: impl Into<PathBuf>) -> Self {
		SpecStore {
			root: root.into(),
			cache: OnceLock::new(),
		}
	}

	/// Find the most specific record for a resource. Precedence:
	/// exact `(provider, type, sku, region)`, then `(provider, type, sku)`,
	/// then `(provider, type)`.
	pub fn lookup(
		&self,
		provider: &str,
		resource_type: &str,
		sku: Option<&str>,
		region: Option<&str>,
	) -> Option<&PricingSpec> {
		self.records()
			.iter()
			.filter(|spec| spec.provider == provider && spec.resource_type == resource_type)
			.filter_map(|spec| {
				let sku_rank = match (&spec.sku, sku) {
					(Some(have), Some(want)) if have == want => 2,
					(None, _) => 0,
					_ => return None,
				};
				let region_rank = match (&spec.region, region) {
					(Some(have), Some(want)) if have == want => 1,
					(None, _) => 0,
					_ => return None,
				};
				Some((sku_rank + region_rank, spec))
			})
			.max_by_key(|(rank, _)| *rank)
			.map(|(_, spec)| spec)
	}

	pub fn all(&self) -> &[PricingSpec] {
		self.records()
	}

	pub fn len(&self) -> usize {
		self.records().len()
	}

	pub fn is_empty(&self) -> bool {
		self.records().is_empty()
	}

	fn records(&self) -> &Vec<PricingSpec> {
		self.cache.get_or_init(|| load_specs(&self.root))
	}
}

/// Read every YAML record under `root`. Broken files are logged and
/// skipped; a missing root is an empty store.
fn load_specs(root: &Path) -> Vec<PricingSpec> {
	if !root.is_dir() {
		log::debug!("spec root '{}' does not exist", root.display());
		return Vec::new();
	}

	let mut specs = Vec::new();

	for entry in WalkDir::new(root).sort_by_file_name() {
		let entry = match entry {
			Ok(e) => e,
			Err(e) => {
				log::warn!("skipping unreadable spec entry: {}", e);
				continue;
			}
		};

		let path = entry.path();
		let is_yaml = path
			.extension()
			.map(|ext| ext == "yaml" || ext == "yml")
			.unwrap_or(false);
		if !entry.file_type().is_file() || !is_yaml {
			continue;
		}

		match read_spec(path) {
			Ok(spec) => specs.push(spec),
			Err(e) => log::warn!("skipping spec file '{}': {}", path.display(), e),
		}
	}

	log::debug!("loaded {} pricing specs from '{}'", specs.len(), root.display());
	specs
}

fn read_spec(path: &Path) -> std::result::Result<PricingSpec, String> {
	let raw = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
	let mut spec: PricingSpec = serde_yaml::from_str(&raw).map_err(|e| e.to_string())?;

	if spec.source.is_none() {
		spec.source = Some(path.display().to_string());
	}

	Ok(spec)
}
