// SPDX-License-Identifier: Apache-2.0

//! Shared definitions for the tally cost-source protocol: the generated
//! gRPC bindings plus host-facing mirror types and conversions.

pub mod error;
pub mod types;

pub mod proto {
	tonic::include_proto!("costsource.v1");
}

/// The cost-source protocol spec version this crate defines.
///
/// Plugins advertise the spec version they implement via `GetPluginInfo`;
/// hosts compare it against this constant.
pub const SPEC_VERSION: &str = env!("CARGO_PKG_VERSION");
