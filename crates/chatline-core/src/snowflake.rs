use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Id epoch: 2023-01-01T00:00:00Z. Ids sort by creation time because the
/// timestamp occupies the high bits.
const CHATLINE_EPOCH: u64 = 1_672_531_200_000;

const NODE_BITS: u64 = 10;
const SEQUENCE_BITS: u64 = 12;

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Mint a time-ordered id: 42 bits of milliseconds since the epoch, then
/// the node id, then a wrapping per-process sequence.
pub fn generate(node_id: u16) -> i64 {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
        .saturating_sub(CHATLINE_EPOCH);
    let node = (node_id as u64) & ((1 << NODE_BITS) - 1);
    let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed) & ((1 << SEQUENCE_BITS) - 1);
    ((elapsed << (NODE_BITS + SEQUENCE_BITS)) | (node << SEQUENCE_BITS) | seq) as i64
}

/// Unix timestamp (ms) recovered from an id's high bits.
pub fn timestamp_millis(id: i64) -> u64 {
    ((id as u64) >> (NODE_BITS + SEQUENCE_BITS)) + CHATLINE_EPOCH
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_ordered_within_a_burst() {
        let a = generate(1);
        let b = generate(1);
        assert_ne!(a, b);
        assert!(timestamp_millis(b) >= timestamp_millis(a));
    }

    #[test]
    fn node_id_is_masked_into_its_field() {
        let id = generate(0x3FF) as u64;
        assert_eq!((id >> SEQUENCE_BITS) & 0x3FF, 0x3FF);
    }
}
