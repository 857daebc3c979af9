// SPDX-License-Identifier: Apache-2.0

use crate::{error::Error, proto};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Host-facing version of `proto::ResourceDescriptor`.
///
/// Optional fields use `Option` rather than the proto's empty-string
/// convention, and the tag map is ordered so serialized plans are stable.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
	/// Stable identifier within the deployment plan.
	pub id: String,

	/// Cloud provider tag, e.g. `aws`.
	pub provider: String,

	/// Provider-qualified type string, e.g. `aws:ec2/instance:Instance`.
	pub resource_type: String,

	/// SKU or size, e.g. `t3.micro`.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub sku: Option<String>,

	/// Region, e.g. `us-east-1`.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub region: Option<String>,

	/// Free-form resource tags.
	#[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
	pub tags: BTreeMap<String, String>,
}

impl ResourceDescriptor {
	/// The provider tag, falling back to the leading segment of the
	/// qualified type string (`aws:ec2/instance:Instance` -> `aws`).
	pub fn provider_or_derived(&self) -> &str {
		if self.provider.is_empty() {
			derive_provider(&self.resource_type)
		} else {
			&self.provider
		}
	}
}

/// Derive a provider tag from a provider-qualified type string.
pub fn derive_provider(resource_type: &str) -> &str {
	match resource_type.split_once(':') {
		Some((provider, _)) if !provider.is_empty() => provider,
		_ => "",
	}
}

impl From<ResourceDescriptor> for proto::ResourceDescriptor {
	fn from(value: ResourceDescriptor) -> Self {
		proto::ResourceDescriptor {
			id: value.id,
			provider: value.provider,
			resource_type: value.resource_type,
			sku: value.sku.unwrap_or_default(),
			region: value.region.unwrap_or_default(),
			tags: value.tags.into_iter().collect(),
		}
	}
}

impl TryFrom<proto::ResourceDescriptor> for ResourceDescriptor {
	type Error = Error;

	fn try_from(value: proto::ResourceDescriptor) -> Result<Self, Error> {
		if value.id.is_empty() {
			return Err(Error::MissingResourceId);
		}

		if value.resource_type.is_empty() {
			return Err(Error::MissingResourceType { id: value.id });
		}

		let none_if_empty = |s: String| if s.is_empty() { None } else { Some(s) };

		Ok(ResourceDescriptor {
			id: value.id,
			provider: value.provider,
			resource_type: value.resource_type,
			sku: none_if_empty(value.sku),
			region: none_if_empty(value.region),
			tags: value.tags.into_iter().collect(),
		})
	}
}

/// Self-description a plugin advertises at connect time.
///
/// Legacy plugins never advertise one; hosts hold `Option<PluginMetadata>`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PluginMetadata {
	pub name: String,
	pub version: String,
	pub spec_version: String,
	pub providers: Vec<String>,
	pub attributes: HashMap<String, String>,
}

impl PluginMetadata {
	/// Whether the plugin claims to price resources for `provider`.
	pub fn serves_provider(&self, provider: &str) -> bool {
		self.providers.is_empty() || self.providers.iter().any(|p| p == provider)
	}
}

impl From<proto::GetPluginInfoResponse> for PluginMetadata {
	fn from(value: proto::GetPluginInfoResponse) -> Self {
		PluginMetadata {
			name: value.name,
			version: value.version,
			spec_version: value.spec_version,
			providers: value.providers,
			attributes: value.attributes,
		}
	}
}

/// One observed cost record from a plugin's `GetActualCost` response.
#[derive(Clone, Debug, PartialEq)]
pub struct ActualCostEntry {
	/// Unix seconds; zero for a single totalled record.
	pub timestamp: i64,
	pub cost: f64,
	pub usage_amount: f64,
	pub usage_unit: Option<String>,
	/// Originating cost category or billing line.
	pub source: Option<String>,
}

impl From<proto::ActualCostEntry> for ActualCostEntry {
	fn from(value: proto::ActualCostEntry) -> Self {
		let none_if_empty = |s: String| if s.is_empty() { None } else { Some(s) };

		ActualCostEntry {
			timestamp: value.timestamp,
			cost: value.cost,
			usage_amount: value.usage_amount,
			usage_unit: none_if_empty(value.usage_unit),
			source: none_if_empty(value.source),
		}
	}
}

impl From<ActualCostEntry> for proto::ActualCostEntry {
	fn from(value: ActualCostEntry) -> Self {
		proto::ActualCostEntry {
			timestamp: value.timestamp,
			cost: value.cost,
			usage_amount: value.usage_amount,
			usage_unit: value.usage_unit.unwrap_or_default(),
			source: value.source.unwrap_or_default(),
		}
	}
}
