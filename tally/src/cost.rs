// SPDX-License-Identifier: Apache-2.0

//! Domain types for cost results: per-resource projections, historical
//! records, and the grouping discriminator shared by the engine, the
//! cross-provider aggregator, and the CLI.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt::Display, str::FromStr};
use tally_common::types::{derive_provider, ActualCostEntry};

/// Fixed month length used when projecting an hourly rate forward.
///
/// 30.4375 days x 24 hours.
pub const HOURS_PER_MONTH: f64 = 730.0;

/// Mean Gregorian month length in days.
pub const DAYS_PER_MONTH: f64 = 30.4375;

/// Source label attached to a placeholder result when neither a plugin nor
/// the local spec store could price a resource.
pub const SOURCE_UNKNOWN: &str = "unknown";

/// How per-resource results are grouped in a report.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupBy {
	#[default]
	Resource,
	Type,
	Provider,
	Daily,
	Monthly,
}

impl FromStr for GroupBy {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_ascii_lowercase().as_str() {
			"resource" => Ok(GroupBy::Resource),
			"type" => Ok(GroupBy::Type),
			"provider" => Ok(GroupBy::Provider),
			// `date` is the projected-report spelling of daily grouping
			"daily" | "date" => Ok(GroupBy::Daily),
			"monthly" => Ok(GroupBy::Monthly),
			other => Err(format!("unrecognized group-by '{other}'")),
		}
	}
}

impl Display for GroupBy {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let name = match self {
			GroupBy::Resource => "resource",
			GroupBy::Type => "type",
			GroupBy::Provider => "provider",
			GroupBy::Daily => "daily",
			GroupBy::Monthly => "monthly",
		};
		write!(f, "{}", name)
	}
}

/// Forward-looking estimate for one resource.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProjectedCostResult {
	pub resource_id: String,
	pub provider: String,
	pub resource_type: String,

	/// Price per billing unit as reported by the pricing source.
	pub unit_price: f64,
	pub currency: String,
	pub monthly_cost: f64,

	#[serde(skip_serializing_if = "Option::is_none")]
	pub billing_detail: Option<String>,

	/// Plugin name, spec-file label, or [`SOURCE_UNKNOWN`].
	pub source: String,
}

/// Historical cost figure for one resource over a half-open window.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ActualCostResult {
	pub resource_id: String,
	pub provider: String,
	pub resource_type: String,
	pub total_cost: f64,
	pub currency: String,
	pub start: DateTime<Utc>,
	pub end: DateTime<Utc>,

	/// Cost-breakdown mapping of source -> amount. Empty on a no-data row.
	pub breakdown: BTreeMap<String, f64>,

	/// How this result was (or will be) grouped in its report.
	pub group_by: GroupBy,
}

impl ActualCostResult {
	/// A "no data" row: the resource matched the query but no plugin had
	/// records for it.
	pub fn no_data(
		resource_id: String,
		provider: String,
		resource_type: String,
		start: DateTime<Utc>,
		end: DateTime<Utc>,
		group_by: GroupBy,
	) -> Self {
		ActualCostResult {
			resource_id,
			provider,
			resource_type,
			total_cost: 0.0,
			currency: "USD".to_owned(),
			start,
			end,
			breakdown: BTreeMap::new(),
			group_by,
		}
	}

	pub fn has_data(&self) -> bool {
		!self.breakdown.is_empty() || self.total_cost != 0.0
	}

	/// The provider tag, derived from the qualified type when empty.
	pub fn provider_or_derived(&self) -> &str {
		if self.provider.is_empty() {
			match derive_provider(&self.resource_type) {
				"" => SOURCE_UNKNOWN,
				provider => provider,
			}
		} else {
			&self.provider
		}
	}
}

/// One bucket of a cross-provider aggregation: a day or month, its total,
/// and the per-provider breakdown summing to that total.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AggregatedBucket {
	/// `YYYY-MM-DD` for daily buckets, `YYYY-MM` for monthly ones.
	pub key: String,
	pub total: f64,
	pub currency: String,
	pub breakdown: BTreeMap<String, f64>,
}

/// A plugin's answer to `Supports`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Support {
	pub supported: bool,
	pub reason: Option<String>,
}

/// A plugin's answer to `GetProjectedCost`.
#[derive(Clone, Debug, PartialEq)]
pub struct UnitCost {
	pub unit_price: f64,
	pub currency: String,
	pub cost_per_month: f64,
	pub billing_detail: Option<String>,
}

/// A plugin's answer to `GetActualCost`: entries plus their shared currency.
#[derive(Clone, Debug, PartialEq)]
pub struct ActualCostBatch {
	pub currency: String,
	pub entries: Vec<ActualCostEntry>,
}

impl ActualCostBatch {
	pub fn total(&self) -> f64 {
		self.entries.iter().map(|e| e.cost).sum()
	}
}
