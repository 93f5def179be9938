//! Rendezvous (highest-random-weight) shard ordering.
//!
//! Every `(address, shard)` pair gets a deterministic score; sorting shards
//! by descending score yields a permutation that depends only on the address
//! for a fixed shard set, and moves a minimal share of addresses when the
//! set changes.

use sha2::{Digest, Sha256};
use uuid::Uuid;
use vaultio_core::Address;

/// Weighted rendezvous score of a shard for an address.
#[must_use]
pub fn score(addr: &Address, shard_id: &Uuid, weight: f64) -> f64 {
    let mut hasher = Sha256::new();
    hasher.update(addr.to_bytes());
    hasher.update(shard_id.as_bytes());
    let digest = hasher.finalize();

    let raw = u64::from_le_bytes(digest[..8].try_into().unwrap());
    // map into the open interval (0, 1) so the logarithm stays finite
    let unit = (raw as f64 + 1.0) / (u64::MAX as f64 + 2.0);

    -weight.max(f64::MIN_POSITIVE) / unit.ln()
}

/// Sort `(shard id, weight)` pairs into the address's rendezvous order.
pub fn sort_for<T>(addr: &Address, items: &mut [T], id_weight: impl Fn(&T) -> (Uuid, f64)) {
    items.sort_by(|a, b| {
        let (id_a, w_a) = id_weight(a);
        let (id_b, w_b) = id_weight(b);
        let s_a = score(addr, &id_a, w_a);
        let s_b = score(addr, &id_b, w_b);
        s_b.partial_cmp(&s_a).unwrap_or(std::cmp::Ordering::Equal)
    });
}
