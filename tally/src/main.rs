// SPDX-License-Identifier: Apache-2.0

mod aggregate;
mod cli;
mod config;
mod cost;
mod engine;
mod error;
mod logging;
mod plugin;
mod spec_store;

use crate::{
	aggregate::aggregate_actual_costs,
	cli::{ActualArgs, Args, Commands, ProjectedArgs},
	config::Config,
	engine::{summarize_projected, ActualCostRequest, CostEngine, EngineConfig},
	error::{Error, Result},
	plugin::{ClientOptions, HostLauncher, PluginRegistry, PortAllocator, TraceContext},
	spec_store::SpecStore,
};
use clap::Parser as _;
use serde::Serialize;
use std::{collections::BTreeMap, path::Path, process::ExitCode, sync::Arc};
use tally_common::types::ResourceDescriptor;

/// Entry point for tally.
fn main() -> ExitCode {
	dotenv::dotenv().ok();

	let args = Args::parse();

	if let Err(e) = run(args) {
		report_error(&e);
		return ExitCode::FAILURE;
	}

	ExitCode::SUCCESS
}

fn run(args: Args) -> Result<()> {
	logging::init()?;

	let config = Config::load(&args)?;

	let runtime = tokio::runtime::Builder::new_multi_thread()
		.enable_all()
		.build()
		.map_err(Error::Runtime)?;

	runtime.block_on(dispatch(args, config))
}

async fn dispatch(args: Args, config: Config) -> Result<()> {
	match args.command {
		Commands::Projected(cmd) => cmd_projected(cmd, &config).await,
		Commands::Actual(cmd) => cmd_actual(cmd, &config).await,
		Commands::Plugins => cmd_plugins(&config),
		Commands::Specs => cmd_specs(&config),
	}
}

async fn cmd_projected(cmd: ProjectedArgs, config: &Config) -> Result<()> {
	let resources = load_plan(&cmd.plan)?;
	let host = start_host(config).await?;

	// Always drain the plugin fleet, even when pricing failed.
	let results = host.engine.projected_costs(&resources).await;
	host.shutdown().await;

	let report = summarize_projected(results?, cmd.group_by);
	print_json(&report)
}

async fn cmd_actual(cmd: ActualArgs, config: &Config) -> Result<()> {
	let resources = load_plan(&cmd.plan)?;

	let request = ActualCostRequest {
		resource_glob: cmd.resource.clone(),
		start: cmd.from,
		end: cmd.to,
		tag_filters: parse_tag_filters(&cmd.filters)?,
		group_by: cmd.group_by,
	};

	let host = start_host(config).await?;

	let results = host.engine.actual_costs(&resources, &request).await;
	host.shutdown().await;
	let results = results?;

	let missing = results.iter().filter(|row| !row.has_data()).count();
	if missing > 0 {
		log::info!("{} resources had no cost data for the window", missing);
	}

	if cmd.aggregate {
		let buckets = aggregate_actual_costs(&results, cmd.group_by)?;
		print_json(&buckets)
	} else {
		print_json(&results)
	}
}

#[derive(Serialize)]
struct PluginListing<'a> {
	name: &'a str,
	version: &'a str,
	binary: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	protocol_version: Option<&'a str>,
}

fn cmd_plugins(config: &Config) -> Result<()> {
	let registry = PluginRegistry::new(config.plugin_root());
	let entries = registry.enumerate()?;

	let listing: Vec<PluginListing> = entries
		.iter()
		.map(|entry| PluginListing {
			name: &entry.name,
			version: &entry.version,
			binary: entry.binary_path.display().to_string(),
			protocol_version: entry.protocol_version.as_deref(),
		})
		.collect();

	print_json(&listing)
}

fn cmd_specs(config: &Config) -> Result<()> {
	let store = SpecStore::new(config.spec_root());

	if store.is_empty() {
		log::warn!(
			"no pricing specs found under '{}'",
			config.spec_root().display()
		);
	} else {
		log::debug!("loaded {} pricing specs", store.len());
	}

	print_json(&store.all())
}

/// The assembled engine plus the port allocator backing its launchers.
struct Host {
	engine: CostEngine,
	ports: Arc<PortAllocator>,
}

impl Host {
	async fn shutdown(&self) {
		plugin::close_clients(self.engine.clients()).await;
		self.ports.release_all().await;
	}
}

/// Discover, launch, and connect the plugin fleet, then assemble the
/// engine around it.
async fn start_host(config: &Config) -> Result<Host> {
	let trace = TraceContext::generate();

	let registry = PluginRegistry::new(config.plugin_root());
	let entries = registry.enumerate()?;

	let ports = Arc::new(PortAllocator::new());
	let launcher = HostLauncher::new(Arc::clone(&ports), config.launcher.clone());
	let options = ClientOptions {
		strict_compatibility: config.strict_compatibility,
		..ClientOptions::default()
	};

	let clients = plugin::start_clients(&entries, &launcher, &options, &trace).await;

	let engine = CostEngine::new(
		clients,
		Arc::new(SpecStore::new(config.spec_root())),
		EngineConfig {
			workers: config.workers,
		},
	);

	Ok(Host { engine, ports })
}

fn load_plan(path: &Path) -> Result<Vec<ResourceDescriptor>> {
	let raw = std::fs::read(path).map_err(|source| Error::PlanRead {
		path: path.to_owned(),
		source,
	})?;

	serde_json::from_slice(&raw).map_err(|source| Error::PlanParse {
		path: path.to_owned(),
		source,
	})
}

fn parse_tag_filters(raw: &[String]) -> Result<BTreeMap<String, String>> {
	let mut filters = BTreeMap::new();

	for item in raw {
		match item.split_once('=') {
			Some((key, value)) if !key.is_empty() => {
				filters.insert(key.to_owned(), value.to_owned());
			}
			_ => {
				return Err(Error::InvalidTagFilter { raw: item.clone() });
			}
		}
	}

	Ok(filters)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
	let rendered = serde_json::to_string_pretty(value).map_err(Error::ReportSerialize)?;
	println!("{rendered}");
	Ok(())
}

fn report_error(error: &Error) {
	eprintln!("tally: error: {error}");

	let mut source = std::error::Error::source(error);
	while let Some(cause) = source {
		eprintln!("tally: caused by: {cause}");
		source = cause.source();
	}
}
