use std::cmp::Ordering;

use crate::models::Transaction;
use crate::upstream::UpstreamOutcome;

use super::AggregateResult;

const DEFAULT_FAILURE_STATUS: u16 = 500;

/// Combine both upstream outcomes into the value handed to every caller.
///
/// Any success yields a `Ready` body; it is only cacheable when both sides
/// succeeded. Two failures collapse into one representative status.
pub fn merge(outcome_a: UpstreamOutcome, outcome_b: UpstreamOutcome) -> AggregateResult {
    let cacheable = outcome_a.is_success() && outcome_b.is_success();

    let transactions: Vec<Transaction> = match (outcome_a, outcome_b) {
        (UpstreamOutcome::Failure(a), UpstreamOutcome::Failure(b)) => {
            return AggregateResult::Failed {
                status: representative_status(a.status(), b.status()),
            };
        }
        (a, b) => into_transactions(a).chain(into_transactions(b)).collect(),
    };

    let ordered = sort_newest_first(transactions);

    match serde_json::to_vec(&ordered) {
        Ok(body) => AggregateResult::Ready { body, cacheable },
        Err(err) => {
            tracing::error!(error = %err, "Failed to serialize merged transactions");
            AggregateResult::Failed {
                status: DEFAULT_FAILURE_STATUS,
            }
        }
    }
}

/// Pick the status reported when both upstreams failed.
///
/// Overload wins so callers can back off: 529, then 503, then whichever
/// status showed up first, then 500.
pub fn representative_status(a: Option<u16>, b: Option<u16>) -> u16 {
    let statuses = [a, b];

    [529, 503]
        .into_iter()
        .find(|preferred| statuses.contains(&Some(*preferred)))
        .or_else(|| statuses.into_iter().flatten().next())
        .unwrap_or(DEFAULT_FAILURE_STATUS)
}

/// Stable sort, newest first; records without a parseable timestamp go last.
pub fn sort_newest_first(transactions: Vec<Transaction>) -> Vec<Transaction> {
    let mut keyed: Vec<_> = transactions
        .into_iter()
        .map(|txn| (txn.timestamp_utc(), txn))
        .collect();

    keyed.sort_by(|(left, _), (right, _)| match (left, right) {
        (Some(l), Some(r)) => r.cmp(l),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });

    keyed.into_iter().map(|(_, txn)| txn).collect()
}

fn into_transactions(outcome: UpstreamOutcome) -> impl Iterator<Item = Transaction> {
    match outcome {
        UpstreamOutcome::Success(transactions) => transactions.into_iter(),
        UpstreamOutcome::Failure(_) => Vec::new().into_iter(),
    }
}
