// SPDX-License-Identifier: Apache-2.0

//! Trace propagation into plugin calls.
//!
//! The host stamps every run with a trace identifier and attaches it as
//! metadata on each outbound RPC, so plugin logs can be correlated with
//! host logs. The identifier travels in an explicit `TraceContext` handed
//! to client construction, never in ambient task state.

use std::sync::Arc;
use tonic::{metadata::MetadataValue, service::Interceptor, Request, Status};

/// Metadata key carrying the trace identifier on outbound plugin calls.
pub const TRACE_METADATA_KEY: &str = "tally-trace-id";

/// The trace identifier for one host run, if any.
#[derive(Clone, Debug, Default)]
pub struct TraceContext {
	id: Option<Arc<str>>,
}

impl TraceContext {
	/// A context with a fresh random identifier.
	pub fn generate() -> Self {
		let id = format!("{:032x}", rand::random::<u128>());
		TraceContext {
			id: Some(Arc::from(id.as_str())),
		}
	}

	pub fn id(&self) -> Option<&str> {
		self.id.as_deref()
	}
}

/// Unary-call interceptor attaching the trace identifier, when present,
/// to every outgoing request.
#[derive(Clone, Debug)]
pub struct TraceInterceptor {
	trace: TraceContext,
}

impl TraceInterceptor {
	pub fn new(trace: TraceContext) -> Self {
		TraceInterceptor { trace }
	}
}

impl Interceptor for TraceInterceptor {
	fn call(&mut self, mut request: Request<()>) -> Result<Request<()>, Status> {
		if let Some(id) = self.trace.id() {
			log::debug!("outbound plugin call [trace_id='{}']", id);

			match MetadataValue::try_from(id) {
				Ok(value) => {
					request.metadata_mut().insert(TRACE_METADATA_KEY, value);
				}
				Err(_) => {
					log::warn!("trace id '{}' is not valid metadata, not attached", id);
				}
			}
		} else {
			log::debug!("outbound plugin call [trace_id=none]");
		}

		Ok(request)
	}
}
