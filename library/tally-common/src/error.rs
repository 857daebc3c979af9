// SPDX-License-Identifier: Apache-2.0

use std::result::Result as StdResult;

/// An enumeration of errors that can occur when translating between wire
/// messages and host-facing types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
	/// A resource descriptor arrived without a stable identifier.
	#[error("resource descriptor is missing an id")]
	MissingResourceId,

	/// A resource descriptor arrived without a provider-qualified type.
	#[error("resource descriptor '{id}' is missing a resource type")]
	MissingResourceType { id: String },
}

pub type Result<T> = StdResult<T, Error>;
