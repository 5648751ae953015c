// ============================================================================
// Aggregation Module
// ============================================================================
//
// Structure:
// - merger     - combines two upstream outcomes into one AggregateResult
// - aggregator - fans out to both upstreams and joins before merging
// - cache      - single-flight coordinator and result cache per account
//
// ============================================================================

mod aggregator;
mod cache;
mod merger;

pub use aggregator::Aggregator;
pub use cache::AggregationCache;
pub use merger::merge;

/// The value produced once per computation and shared by every caller that
/// was coalesced onto it.
#[derive(Debug, Clone, PartialEq)]
pub enum AggregateResult {
    /// JSON array of transactions, newest first.
    Ready { body: Vec<u8>, cacheable: bool },
    /// Both upstreams failed.
    Failed { status: u16 },
}

impl AggregateResult {
    pub fn is_cacheable(&self) -> bool {
        matches!(self, AggregateResult::Ready { cacheable: true, .. })
    }

    /// HTTP status the front door should answer with.
    pub fn status(&self) -> u16 {
        match self {
            AggregateResult::Ready { .. } => 200,
            AggregateResult::Failed { status } => *status,
        }
    }
}
