// SPDX-License-Identifier: Apache-2.0

//! Data structures for tally's command-line surface.

use crate::cost::GroupBy;
use chrono::{DateTime, Utc};
use std::path::PathBuf;

/// Discover, launch, and query out-of-process cost-source plugins
#[derive(Debug, clap::Parser)]
#[command(name = "tally", version, about, long_about = None)]
pub struct Args {
	/// path to the tally root (plugins and specs live beneath it)
	#[arg(long, value_name = "DIR", global = true)]
	pub root: Option<PathBuf>,

	/// discard plugin stderr instead of passing it through
	#[arg(short, long, global = true)]
	pub quiet: bool,

	/// refuse plugins whose spec major version differs from the host's
	#[arg(long, global = true)]
	pub strict: bool,

	/// per-resource worker pool size
	#[arg(long, value_name = "N", default_value_t = 10, global = true)]
	pub workers: usize,

	#[command(subcommand)]
	pub command: Commands,
}

#[derive(Debug, clap::Subcommand)]
pub enum Commands {
	/// Project monthly costs for the resources in a deployment plan
	Projected(ProjectedArgs),

	/// Query historical costs for plan resources over a window
	Actual(ActualArgs),

	/// List installed plugins
	Plugins,

	/// List loaded pricing specs
	Specs,
}

#[derive(Debug, clap::Args)]
pub struct ProjectedArgs {
	/// deployment plan: a JSON array of resource descriptors
	#[arg(long, value_name = "FILE")]
	pub plan: PathBuf,

	/// group totals by 'resource', 'type', 'provider', or 'date'
	#[arg(long = "group-by", value_name = "KEY", default_value = "resource")]
	pub group_by: GroupBy,
}

#[derive(Debug, clap::Args)]
pub struct ActualArgs {
	/// deployment plan: a JSON array of resource descriptors
	#[arg(long, value_name = "FILE")]
	pub plan: PathBuf,

	/// window start, RFC 3339 (inclusive)
	#[arg(long, value_name = "TIME")]
	pub from: DateTime<Utc>,

	/// window end, RFC 3339 (exclusive)
	#[arg(long, value_name = "TIME")]
	pub to: DateTime<Utc>,

	/// glob over resource identifiers
	#[arg(long, value_name = "GLOB")]
	pub resource: Option<String>,

	/// tag filter as key=value; repeatable
	#[arg(long = "filter", value_name = "KEY=VALUE")]
	pub filters: Vec<String>,

	/// group results by 'resource', 'type', 'provider', 'daily', or 'monthly'
	#[arg(long = "group-by", value_name = "KEY", default_value = "daily")]
	pub group_by: GroupBy,

	/// aggregate results across providers into time buckets
	#[arg(long)]
	pub aggregate: bool,
}
