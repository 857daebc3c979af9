// SPDX-License-Identifier: Apache-2.0

//! Cross-provider aggregation of historical cost results into time
//! buckets.
//!
//! Inputs are validated fail-fast (emptiness, currency agreement, window
//! sanity, grouping kind), each total is normalized to a per-period rate,
//! and the rate is attributed to every daily or monthly bucket the
//! result's `[start, end)` window covers. Invariant violations always
//! surface; rows are never silently dropped or converted.

use crate::cost::{ActualCostResult, AggregatedBucket, GroupBy, DAYS_PER_MONTH};
use chrono::{DateTime, Datelike, Duration, Utc};
use std::collections::BTreeMap;

#[derive(Debug, thiserror::Error)]
pub enum AggregateError {
	#[error("no cost results to aggregate")]
	EmptyResults,

	#[error("mixed currencies in cost results: '{first}' and '{second}'")]
	MixedCurrencies { first: String, second: String },

	#[error("invalid date range for resource '{resource_id}': end must be after start")]
	InvalidDateRange { resource_id: String },

	#[error("invalid group-by '{0}': cross-provider aggregation is time-bucketed (daily or monthly)")]
	InvalidGroupBy(GroupBy),
}

#[derive(Clone, Copy, Debug)]
enum TimeGrouping {
	Daily,
	Monthly,
}

/// Aggregate per-resource historical results into sorted, currency-tagged
/// provider buckets.
pub fn aggregate_actual_costs(
	results: &[ActualCostResult],
	group_by: GroupBy,
) -> Result<Vec<AggregatedBucket>, AggregateError> {
	// Fail-fast validation, in a fixed order.
	if results.is_empty() {
		return Err(AggregateError::EmptyResults);
	}

	let currency = &results[0].currency;
	for result in results {
		if result.currency != *currency {
			return Err(AggregateError::MixedCurrencies {
				first: currency.clone(),
				second: result.currency.clone(),
			});
		}
	}

	for result in results {
		if result.end <= result.start {
			return Err(AggregateError::InvalidDateRange {
				resource_id: result.resource_id.clone(),
			});
		}
	}

	let grouping = match group_by {
		GroupBy::Daily => TimeGrouping::Daily,
		GroupBy::Monthly => TimeGrouping::Monthly,
		other => return Err(AggregateError::InvalidGroupBy(other)),
	};

	let mut buckets: BTreeMap<String, BTreeMap<String, f64>> = BTreeMap::new();

	for result in results {
		let days = fractional_days(result.start, result.end);

		// Normalize the total to a per-period rate; windows shorter than
		// one day carry their total undivided.
		let rate = match grouping {
			TimeGrouping::Daily => {
				if days >= 1.0 {
					result.total_cost / days
				} else {
					result.total_cost
				}
			}
			TimeGrouping::Monthly => result.total_cost * DAYS_PER_MONTH / days,
		};

		// Every covered bucket receives the same per-period rate.
		let provider = result.provider_or_derived().to_owned();
		for key in bucket_keys(result.start, result.end, grouping) {
			let breakdown = buckets.entry(key).or_default();
			*breakdown.entry(provider.clone()).or_insert(0.0) += rate;
		}
	}

	// BTreeMap iteration yields ascending keys, and both key formats sort
	// chronologically as strings.
	Ok(buckets
		.into_iter()
		.map(|(key, breakdown)| AggregatedBucket {
			key,
			total: breakdown.values().sum(),
			currency: currency.clone(),
			breakdown,
		})
		.collect())
}

fn fractional_days(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
	(end - start).num_seconds() as f64 / 86_400.0
}

/// The daily or monthly bucket keys overlapped by `[start, end)`.
fn bucket_keys(start: DateTime<Utc>, end: DateTime<Utc>, grouping: TimeGrouping) -> Vec<String> {
	// The window end is exclusive; a window ending at midnight does not
	// touch that day's bucket.
	let last = (end - Duration::seconds(1)).date_naive();

	let mut keys = Vec::new();

	match grouping {
		TimeGrouping::Daily => {
			let mut day = start.date_naive();
			while day <= last {
				keys.push(day.format("%Y-%m-%d").to_string());
				let Some(next) = day.succ_opt() else { break };
				day = next;
			}
		}
		TimeGrouping::Monthly => {
			let mut year = start.year();
			let mut month = start.month();

			while (year, month) <= (last.year(), last.month()) {
				keys.push(format!("{year:04}-{month:02}"));
				if month == 12 {
					year += 1;
					month = 1;
				} else {
					month += 1;
				}
			}
		}
	}

	keys
}
