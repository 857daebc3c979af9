// SPDX-License-Identifier: Apache-2.0

//! Classification of plugin-call failures and the retry ladder applied to
//! transient ones.
//!
//! Every plugin response maps to one of three kinds: transient failures
//! are retried against the same plugin, permanent failures advance the
//! fallback chain, and configuration failures surface to the caller.

use std::{future::Future, result::Result as StdResult, time::Duration};
use tonic::{Code, Status};

/// The three failure kinds the engine distinguishes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
	/// Worth retrying against the same plugin: timeouts, unavailability,
	/// rate limiting, connection resets.
	Transient,

	/// Not worth retrying: unknown resources, invalid input, unsupported
	/// regions, permission or data problems.
	Permanent,

	/// The plugin cannot work at all until the operator intervenes:
	/// missing credentials, bad endpoints, not configured.
	Configuration,
}

/// Waits between retries of a transient failure.
pub const RETRY_WAITS: [Duration; 3] = [
	Duration::from_millis(100),
	Duration::from_millis(200),
	Duration::from_millis(400),
];

/// Map a plugin status to its failure kind.
pub fn classify(status: &Status) -> ErrorClass {
	match status.code() {
		Code::Unavailable | Code::DeadlineExceeded | Code::ResourceExhausted | Code::Aborted => {
			ErrorClass::Transient
		}
		Code::Unauthenticated => ErrorClass::Configuration,
		// Plugins wrapping upstream APIs often surface failures as bare
		// Unknown/Internal statuses; fall back to the message text.
		Code::Unknown | Code::Internal => classify_message(status.message()),
		_ => ErrorClass::Permanent,
	}
}

fn classify_message(message: &str) -> ErrorClass {
	const TRANSIENT: &[&str] = &[
		"timeout",
		"timed out",
		"unavailable",
		"rate limit",
		"too many requests",
		"connection reset",
	];

	const CONFIGURATION: &[&str] = &[
		"credential",
		"api key",
		"unauthorized",
		"not configured",
		"invalid endpoint",
	];

	let lower = message.to_ascii_lowercase();

	if TRANSIENT.iter().any(|s| lower.contains(s)) {
		ErrorClass::Transient
	} else if CONFIGURATION.iter().any(|s| lower.contains(s)) {
		ErrorClass::Configuration
	} else {
		ErrorClass::Permanent
	}
}

/// Run a plugin call, retrying transient failures up to three times with
/// the fixed 100/200/400 ms ladder. Non-transient failures return
/// immediately.
pub async fn with_retry<T, F, Fut>(
	plugin: &str,
	operation: &str,
	mut call: F,
) -> StdResult<T, Status>
where
	F: FnMut() -> Fut,
	Fut: Future<Output = StdResult<T, Status>>,
{
	let mut waits = RETRY_WAITS.iter();

	loop {
		match call().await {
			Ok(value) => return Ok(value),
			Err(status) => {
				if classify(&status) != ErrorClass::Transient {
					return Err(status);
				}

				match waits.next() {
					Some(wait) => {
						log::debug!(
							"retrying {} on plugin '{}' in {:?}: {}",
							operation,
							plugin,
							wait,
							status
						);
						tokio::time::sleep(*wait).await;
					}
					None => {
						log::debug!(
							"plugin '{}' still failing {} after {} retries",
							plugin,
							operation,
							RETRY_WAITS.len()
						);
						return Err(status);
					}
				}
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicUsize, Ordering};

	#[test]
	fn codes_map_to_kinds() {
		assert_eq!(
			classify(&Status::unavailable("service down")),
			ErrorClass::Transient
		);
		assert_eq!(
			classify(&Status::deadline_exceeded("slow")),
			ErrorClass::Transient
		);
		assert_eq!(
			classify(&Status::resource_exhausted("rate limited")),
			ErrorClass::Transient
		);
		assert_eq!(
			classify(&Status::not_found("no such resource")),
			ErrorClass::Permanent
		);
		assert_eq!(
			classify(&Status::invalid_argument("bad resource")),
			ErrorClass::Permanent
		);
		assert_eq!(
			classify(&Status::permission_denied("forbidden")),
			ErrorClass::Permanent
		);
		assert_eq!(
			classify(&Status::unauthenticated("no credentials")),
			ErrorClass::Configuration
		);
	}

	#[test]
	fn opaque_statuses_classify_by_message() {
		assert_eq!(
			classify(&Status::unknown("upstream request timed out")),
			ErrorClass::Transient
		);
		assert_eq!(
			classify(&Status::internal("connection reset by peer")),
			ErrorClass::Transient
		);
		assert_eq!(
			classify(&Status::unknown("missing credential file")),
			ErrorClass::Configuration
		);
		assert_eq!(
			classify(&Status::unknown("data corruption detected")),
			ErrorClass::Permanent
		);
	}

	#[tokio::test]
	async fn transient_failures_retry_until_success() {
		let attempts = AtomicUsize::new(0);

		let result = with_retry("mock", "GetProjectedCost", || {
			let n = attempts.fetch_add(1, Ordering::SeqCst);
			async move {
				if n < 2 {
					Err(Status::unavailable("blip"))
				} else {
					Ok(42)
				}
			}
		})
		.await;

		assert_eq!(result.unwrap(), 42);
		assert_eq!(attempts.load(Ordering::SeqCst), 3);
	}

	#[tokio::test]
	async fn retries_stop_after_the_ladder() {
		let attempts = AtomicUsize::new(0);

		let result: Result<(), Status> = with_retry("mock", "GetProjectedCost", || {
			attempts.fetch_add(1, Ordering::SeqCst);
			async { Err(Status::unavailable("still down")) }
		})
		.await;

		assert!(result.is_err());
		// One initial call plus one retry per ladder step.
		assert_eq!(attempts.load(Ordering::SeqCst), 1 + RETRY_WAITS.len());
	}

	#[tokio::test]
	async fn permanent_failures_never_retry() {
		let attempts = AtomicUsize::new(0);

		let result: Result<(), Status> = with_retry("mock", "GetProjectedCost", || {
			attempts.fetch_add(1, Ordering::SeqCst);
			async { Err(Status::not_found("gone")) }
		})
		.await;

		assert!(result.is_err());
		assert_eq!(attempts.load(Ordering::SeqCst), 1);
	}
}
