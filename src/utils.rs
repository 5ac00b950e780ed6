// src/utils.rs
// Utility functions for the hypervisor queue

/// Current unix time in seconds, with sub-second precision.
///
/// Queue leases and creation marks use this clock; `0.0` is reserved for
/// "not claimed".
pub fn now_ts() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Creates a vector of (start_block, end_block) tuples for a given range and chunk size.
/// Used by the operation feed to keep `eth_getLogs` ranges within provider limits.
pub fn create_block_chunks(from_block: u64, to_block: u64, chunk_size: u64) -> Vec<(u64, u64)> {
    let chunk_size = chunk_size.max(1);
    let mut chunks = Vec::new();
    let mut current_from = from_block;
    while current_from <= to_block {
        let current_to = std::cmp::min(current_from + chunk_size - 1, to_block);
        chunks.push((current_from, current_to));
        current_from = current_to + 1;
    }
    chunks
}
