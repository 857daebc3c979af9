// SPDX-License-Identifier: Apache-2.0

use anyhow::Result;
use pathbuf::pathbuf;

fn main() -> Result<()> {
	// Ensure a protoc binary is available for tonic-build/prost-build to invoke.
	std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);

	// Compile the tally cost-source gRPC protocol spec to an .rs file
	let root = env!("CARGO_MANIFEST_DIR");

	let protos = vec![pathbuf![root, "proto", "costsource", "v1", "costsource.proto"]];
	let includes = vec![pathbuf![root, "proto"]];

	tonic_build::configure().compile_protos(&protos, &includes)?;

	Ok(())
}
