//! Crawl counters
//!
//! Recorded through the `metrics` facade; nothing is exported unless the
//! embedding process installs a recorder.

use metrics::counter;

use autocorns_core::RecordKind;

pub const OUTCOME_SUCCESS: &str = "success";
pub const OUTCOME_FAILURE: &str = "failure";
pub const OUTCOME_SKIPPED: &str = "skipped";

pub fn record_chunk(outcome: &str, size: usize) {
    counter!("autocorns_chunks_total", "outcome" => outcome.to_string()).increment(1);
    counter!("autocorns_chunk_items_total", "outcome" => outcome.to_string()).increment(size as u64);
}

pub fn record_item(kind: RecordKind, outcome: &str) {
    counter!("autocorns_items_total", "kind" => kind.to_string(), "outcome" => outcome.to_string())
        .increment(1);
}
