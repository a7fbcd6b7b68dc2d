//! Computes how large a segment must be before any of it exists, from a
//! fetched key list (job segments) or an inbound fence buffer (modex
//! segments).

use gds_shmem_core::{ArenaHashTable, HashTableContract, HashTableHandle, JobSegmentHeader, ModexSegmentHeader};

use crate::blob::{DefaultWireCodec, WireCodec};
use crate::kv::Kv;

/// Empirical safety margin applied on top of every raw size estimate. Must
/// be applied -- see the source's `PMIX_GDS_SHMEM_FLUFF_FACTOR`.
pub const FLUFF_FACTOR: f64 = 2.5;

/// Conservative per-entry overhead estimate used only for pre-sizing; the
/// `packed_size`/`buffer_size` terms separately account for actual payload
/// bytes.
const KEY_VALUE_PAIR_SIZE: usize = 32;

pub struct SizingEstimator;

/// Result of a sizing pass: what capacity to build the hash table at, and
/// how big to make the segment.
#[derive(Debug, Clone, Copy)]
pub struct SizeEstimate {
  pub ht_capacity: usize,
  pub packed_size: usize,
  pub segment_size: usize,
}

impl SizingEstimator {
  /// Sizes a job segment for `keys`. `multiplier` is the operator tunable
  /// (`Config::segment_size_multiplier`) applied on top of [`FLUFF_FACTOR`].
  pub fn estimate_job(keys: &[Kv], multiplier: f64) -> SizeEstimate {
    let entry_count: usize = keys.iter().map(|kv| kv.value.entry_count()).sum();
    let ht_capacity = ArenaHashTable::capacity_for(entry_count);
    let packed_size = DefaultWireCodec::pack(keys).len();
    let h = ArenaHashTable::per_entry_storage(ht_capacity);
    let raw = size_of::<JobSegmentHeader>()
      + size_of::<HashTableHandle>()
      + h
      + ht_capacity * KEY_VALUE_PAIR_SIZE
      + packed_size;
    SizeEstimate {
      ht_capacity,
      packed_size,
      segment_size: fluffed(raw, multiplier),
    }
  }

  /// Sizes a modex segment for `buffer_size` bytes of remote payload from
  /// `n_peers` peers. The `256 * n_peers` capacity heuristic is preserved
  /// verbatim from the source and documented there as provisional.
  pub fn estimate_modex(buffer_size: usize, n_peers: usize, multiplier: f64) -> SizeEstimate {
    let n_peers = n_peers.max(1);
    let ht_capacity = 256 * n_peers; // heuristic, see original gds_shmem.c TODO(skg)
    let h = ArenaHashTable::per_entry_storage(ht_capacity);
    let raw = size_of::<ModexSegmentHeader>() + size_of::<HashTableHandle>() + h + buffer_size * n_peers;
    SizeEstimate {
      ht_capacity,
      packed_size: buffer_size,
      segment_size: fluffed(raw, multiplier),
    }
  }
}

fn size_of<T>() -> usize {
  std::mem::size_of::<T>()
}

fn fluffed(raw: usize, multiplier: f64) -> usize {
  ((raw as f64) * FLUFF_FACTOR * multiplier).ceil() as usize
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::kv::KvValue;

  #[test]
  fn job_estimate_grows_with_key_count() {
    let few = vec![Kv::new("k1", KvValue::Str("v1".into()))];
    let many: Vec<Kv> = (0..50).map(|i| Kv::new(format!("k{i}"), KvValue::Str("v".repeat(16)))).collect();
    let small = SizingEstimator::estimate_job(&few, 1.0);
    let large = SizingEstimator::estimate_job(&many, 1.0);
    assert!(large.segment_size > small.segment_size);
    assert!(large.ht_capacity >= small.ht_capacity);
  }

  #[test]
  fn job_estimate_ht_capacity_matches_contract() {
    let procs = vec![Kv::new(
      "procs",
      KvValue::ProcData(vec![
        Kv::new("rank", KvValue::U64(0)),
        Kv::new("rank", KvValue::U64(1)),
        Kv::new("rank", KvValue::U64(2)),
        Kv::new("rank", KvValue::U64(3)),
      ]),
    )];
    let estimate = SizingEstimator::estimate_job(&procs, 1.0);
    assert_eq!(estimate.ht_capacity, ArenaHashTable::capacity_for(4));
  }

  #[test]
  fn modex_capacity_heuristic_is_256_per_peer() {
    let estimate = SizingEstimator::estimate_modex(4096, 4, 1.0);
    assert_eq!(estimate.ht_capacity, 1024);
  }

  #[test]
  fn multiplier_increases_segment_size() {
    let keys = vec![Kv::new("k1", KvValue::Str("v1".into()))];
    let base = SizingEstimator::estimate_job(&keys, 1.0);
    let doubled = SizingEstimator::estimate_job(&keys, 2.0);
    assert!(doubled.segment_size > base.segment_size);
  }
}
