// SPDX-License-Identifier: Apache-2.0

//! Test doubles for the cost-source protocol: an in-process gRPC server
//! with scriptable behavior, served over a real loopback socket, plus a
//! stub launcher that hands the engine a channel to it.

use crate::{
	error::{Error, Result},
	plugin::{
		manager::{CloseHandle, Launch, LaunchedPlugin},
		registry::PluginEntry,
	},
};
use std::{
	collections::{HashMap, VecDeque},
	net::SocketAddr,
	sync::Mutex,
	time::Duration,
};
use tally_common::proto::{
	self,
	cost_source_service_server::{CostSourceService, CostSourceServiceServer},
};
use tokio::{net::TcpListener, task::JoinHandle};
use tokio_stream::wrappers::TcpListenerStream;
use tonic::{transport::Endpoint, transport::Server, Code, Request, Response, Status};

/// One price the mock will quote, keyed by a resource-type prefix.
struct MockPrice {
	type_prefix: String,
	unit_price: f64,
	currency: String,
}

/// A scriptable cost-source plugin.
pub(crate) struct MockCostSource {
	name: String,
	fail_name: bool,
	spec_version: Option<String>,
	prices: Vec<MockPrice>,
	/// Statuses emitted by `GetProjectedCost` before it starts succeeding.
	projected_failures: Mutex<VecDeque<Code>>,
	/// When set, `GetProjectedCost` always fails with this status.
	always_fail_projected: Option<Code>,
	fail_supports: Option<Code>,
	actual: Option<(String, Vec<proto::ActualCostEntry>)>,
	/// Artificial per-resource delays for scrambling completion order.
	delays_ms: HashMap<String, u64>,
}

impl MockCostSource {
	pub fn new(name: &str) -> Self {
		MockCostSource {
			name: name.to_owned(),
			fail_name: false,
			spec_version: None,
			prices: Vec::new(),
			projected_failures: Mutex::new(VecDeque::new()),
			always_fail_projected: None,
			fail_supports: None,
			actual: None,
			delays_ms: HashMap::new(),
		}
	}

	pub fn with_name_failure(mut self) -> Self {
		self.fail_name = true;
		self
	}

	pub fn with_spec_version(mut self, version: &str) -> Self {
		self.spec_version = Some(version.to_owned());
		self
	}

	pub fn with_unit_price(mut self, type_prefix: &str, unit_price: f64, currency: &str) -> Self {
		self.prices.push(MockPrice {
			type_prefix: type_prefix.to_owned(),
			unit_price,
			currency: currency.to_owned(),
		});
		self
	}

	pub fn with_projected_failures(self, codes: impl IntoIterator<Item = Code>) -> Self {
		self.projected_failures
			.lock()
			.unwrap()
			.extend(codes);
		self
	}

	pub fn with_always_failing_projected(mut self, code: Code) -> Self {
		self.always_fail_projected = Some(code);
		self
	}

	pub fn with_supports_failure(mut self, code: Code) -> Self {
		self.fail_supports = Some(code);
		self
	}

	pub fn with_actual(mut self, currency: &str, entries: Vec<proto::ActualCostEntry>) -> Self {
		self.actual = Some((currency.to_owned(), entries));
		self
	}

	pub fn with_delay_for(mut self, resource_id: &str, millis: u64) -> Self {
		self.delays_ms.insert(resource_id.to_owned(), millis);
		self
	}

	fn price_for(&self, resource_type: &str) -> Option<&MockPrice> {
		self.prices
			.iter()
			.find(|price| resource_type.starts_with(&price.type_prefix))
	}
}

#[tonic::async_trait]
impl CostSourceService for MockCostSource {
	async fn name(
		&self,
		_request: Request<proto::NameRequest>,
	) -> std::result::Result<Response<proto::NameResponse>, Status> {
		if self.fail_name {
			return Err(Status::internal("name exchange refused"));
		}

		Ok(Response::new(proto::NameResponse {
			name: self.name.clone(),
		}))
	}

	async fn supports(
		&self,
		request: Request<proto::SupportsRequest>,
	) -> std::result::Result<Response<proto::SupportsResponse>, Status> {
		if let Some(code) = self.fail_supports {
			return Err(Status::new(code, "supports check failed"));
		}

		let resource = request
			.into_inner()
			.resource
			.ok_or_else(|| Status::invalid_argument("missing resource"))?;

		let supported = self.price_for(&resource.resource_type).is_some();
		Ok(Response::new(proto::SupportsResponse {
			supported,
			reason: if supported {
				String::new()
			} else {
				format!("no price table for '{}'", resource.resource_type)
			},
		}))
	}

	async fn get_projected_cost(
		&self,
		request: Request<proto::GetProjectedCostRequest>,
	) -> std::result::Result<Response<proto::GetProjectedCostResponse>, Status> {
		let resource = request
			.into_inner()
			.resource
			.ok_or_else(|| Status::invalid_argument("missing resource"))?;

		if let Some(millis) = self.delays_ms.get(&resource.id) {
			tokio::time::sleep(Duration::from_millis(*millis)).await;
		}

		if let Some(code) = self.always_fail_projected {
			return Err(Status::new(code, "projection unavailable"));
		}

		if let Some(code) = self.projected_failures.lock().unwrap().pop_front() {
			return Err(Status::new(code, "transient projection failure"));
		}

		let price = self
			.price_for(&resource.resource_type)
			.ok_or_else(|| Status::not_found("resource not priced"))?;

		Ok(Response::new(proto::GetProjectedCostResponse {
			unit_price: price.unit_price,
			currency: price.currency.clone(),
			cost_per_month: price.unit_price * crate::cost::HOURS_PER_MONTH,
			billing_detail: String::new(),
		}))
	}

	async fn get_actual_cost(
		&self,
		_request: Request<proto::GetActualCostRequest>,
	) -> std::result::Result<Response<proto::GetActualCostResponse>, Status> {
		match &self.actual {
			Some((currency, entries)) => Ok(Response::new(proto::GetActualCostResponse {
				results: entries.clone(),
				currency: currency.clone(),
			})),
			None => Ok(Response::new(proto::GetActualCostResponse {
				results: Vec::new(),
				currency: String::new(),
			})),
		}
	}

	async fn get_plugin_info(
		&self,
		_request: Request<proto::GetPluginInfoRequest>,
	) -> std::result::Result<Response<proto::GetPluginInfoResponse>, Status> {
		match &self.spec_version {
			Some(spec_version) => Ok(Response::new(proto::GetPluginInfoResponse {
				name: self.name.clone(),
				version: "0.0.0".to_owned(),
				spec_version: spec_version.clone(),
				providers: self
					.prices
					.iter()
					.map(|p| p.type_prefix.trim_end_matches(':').to_owned())
					.collect(),
				attributes: HashMap::new(),
			})),
			None => Err(Status::unimplemented("GetPluginInfo not implemented")),
		}
	}
}

/// Serves a mock over loopback and hands out a channel to it instead of
/// spawning a child process.
pub(crate) struct StubLauncher {
	addr: SocketAddr,
	server: Mutex<Option<JoinHandle<()>>>,
}

impl StubLauncher {
	pub async fn serve(mock: MockCostSource) -> Self {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();

		let service = CostSourceServiceServer::new(mock);
		let handle = tokio::spawn(async move {
			let _ = Server::builder()
				.add_service(service)
				.serve_with_incoming(TcpListenerStream::new(listener))
				.await;
		});

		StubLauncher {
			addr,
			server: Mutex::new(Some(handle)),
		}
	}
}

#[tonic::async_trait]
impl Launch for StubLauncher {
	async fn launch(&self, entry: &PluginEntry) -> Result<LaunchedPlugin> {
		let channel = Endpoint::from_shared(format!("http://{}", self.addr))
			.unwrap()
			.connect()
			.await
			.map_err(|source| Error::Connect {
				plugin: entry.name.clone(),
				source,
			})?;

		let server = self.server.lock().unwrap().take();
		Ok(LaunchedPlugin {
			channel,
			close: Box::new(StubCloseHandle { server }),
		})
	}
}

struct StubCloseHandle {
	server: Option<JoinHandle<()>>,
}

#[tonic::async_trait]
impl CloseHandle for StubCloseHandle {
	async fn close(&mut self) {
		if let Some(server) = self.server.take() {
			server.abort();
		}
	}
}
