// SPDX-License-Identifier: Apache-2.0

//! Spec-version compatibility between the host and a plugin.
//!
//! The cost-source protocol is versioned semantically: plugins advertising
//! a different major version than the host are incompatible; minor and
//! patch differences are compatible by contract.

use semver::Version;

/// The cost-source spec version this host speaks.
pub const CORE_SPEC_VERSION: &str = tally_common::SPEC_VERSION;

/// Outcome of comparing the host spec version against a plugin's.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Compatibility {
	Compatible,
	MajorMismatch { core: Version, plugin: Version },
	Invalid { raw: String },
}

/// Parse a `MAJOR.MINOR.PATCH` spec version, tolerating an optional `v`
/// prefix and a pre-release suffix.
pub fn parse_spec_version(raw: &str) -> Option<Version> {
	let trimmed = raw.trim();
	let trimmed = trimmed
		.strip_prefix('v')
		.or_else(|| trimmed.strip_prefix('V'))
		.unwrap_or(trimmed);

	Version::parse(trimmed).ok()
}

/// Compare the host's spec version against a plugin's.
pub fn check_spec_compatibility(core: &str, plugin: &str) -> Compatibility {
	let Some(core) = parse_spec_version(core) else {
		return Compatibility::Invalid {
			raw: core.to_owned(),
		};
	};

	let Some(plugin) = parse_spec_version(plugin) else {
		return Compatibility::Invalid {
			raw: plugin.to_owned(),
		};
	};

	if core.major != plugin.major {
		return Compatibility::MajorMismatch { core, plugin };
	}

	Compatibility::Compatible
}
