//! Arena-backed hash table used for `local_hashtab` (job segments) and
//! `hashtab` (modex segments).
//!
//! [`HashTableContract`] is split out from [`ArenaHashTable`] so a sizing
//! pass can ask "how big would this table be" before any segment exists to
//! hold it -- see `gds_shmem::sizing`.

use std::mem::size_of;

use crate::error::{Error, Result};
use crate::header::HashTableHandle;
use crate::tma::Tma;

#[repr(C)]
#[derive(Clone, Copy)]
struct Bucket {
  occupied: u64,
  key_addr: u64,
  key_len: u64,
  value_addr: u64,
  value_len: u64,
}

/// Capacity and storage-size facts a hash table implementation must publish
/// so a segment can be sized before the table is built.
pub trait HashTableContract {
  /// Capacity this implementation would actually allocate for a table
  /// expected to hold `entries` keys. The caller must use this value, not
  /// `entries` itself, when sizing the segment.
  fn capacity_for(entries: usize) -> usize;
  /// Bytes consumed by the bucket array alone for a table of `capacity`.
  fn skeleton_bytes(capacity: usize) -> usize;
  /// Fixed per-entry overhead (beyond key/value payload bytes) for a table
  /// of `capacity`.
  fn per_entry_storage(capacity: usize) -> usize;
}

/// Open-addressing hash table with linear probing, built once at a fixed
/// capacity inside a segment's arena. There is no resize and no removal.
pub struct ArenaHashTable;

impl ArenaHashTable {
  /// Allocates the bucket array for `capacity` slots and points `handle` at
  /// it. Must be called exactly once per table.
  pub fn init(tma: &Tma, handle: &mut HashTableHandle, capacity: usize) -> Result<()> {
    let addr = tma.calloc(capacity, size_of::<Bucket>())?;
    handle.base = addr as u64;
    handle.capacity = capacity as u64;
    handle.len = 0;
    Ok(())
  }

  /// Inserts `key` -> `value`, overwriting any existing value for `key`.
  pub fn insert(tma: &Tma, handle: &mut HashTableHandle, key: &[u8], value: &[u8]) -> Result<()> {
    if handle.capacity == 0 {
      return Err(Error::Unsupported("hash table was never initialized"));
    }
    let capacity = handle.capacity as usize;
    let start = (fnv1a(key) as usize) % capacity;
    for step in 0..capacity {
      let slot = (start + step) % capacity;
      let bucket_ptr = (handle.base as usize + slot * size_of::<Bucket>()) as *mut Bucket;
      // Safety: `slot < capacity` and `init` allocated exactly `capacity`
      // contiguous buckets starting at `handle.base`.
      let bucket = unsafe { &mut *bucket_ptr };
      if bucket.occupied == 0 {
        let key_addr = tma.memdup(key)?;
        let value_addr = tma.memdup(value)?;
        bucket.occupied = 1;
        bucket.key_addr = key_addr as u64;
        bucket.key_len = key.len() as u64;
        bucket.value_addr = value_addr as u64;
        bucket.value_len = value.len() as u64;
        handle.len += 1;
        return Ok(());
      }
      if bucket_key(bucket) == key {
        let value_addr = tma.memdup(value)?;
        bucket.value_addr = value_addr as u64;
        bucket.value_len = value.len() as u64;
        return Ok(());
      }
    }
    Err(Error::ResourceExhaustion { requested: capacity })
  }

  /// Looks up `key`, returning a borrowed slice into the segment if present.
  pub fn get(handle: &HashTableHandle, key: &[u8]) -> Option<&'static [u8]> {
    if handle.capacity == 0 {
      return None;
    }
    let capacity = handle.capacity as usize;
    let start = (fnv1a(key) as usize) % capacity;
    for step in 0..capacity {
      let slot = (start + step) % capacity;
      let bucket_ptr = (handle.base as usize + slot * size_of::<Bucket>()) as *const Bucket;
      // Safety: same as `insert`.
      let bucket = unsafe { &*bucket_ptr };
      if bucket.occupied == 0 {
        return None;
      }
      if bucket_key(bucket) == key {
        return Some(bucket_value(bucket));
      }
    }
    None
  }
}

impl HashTableContract for ArenaHashTable {
  fn capacity_for(entries: usize) -> usize {
    let min_capacity = ((entries.max(1)) as f64 / 0.7).ceil() as usize;
    min_capacity.next_power_of_two().max(8)
  }

  fn skeleton_bytes(capacity: usize) -> usize {
    capacity * size_of::<Bucket>()
  }

  fn per_entry_storage(capacity: usize) -> usize {
    Self::skeleton_bytes(capacity)
  }
}

fn fnv1a(data: &[u8]) -> u64 {
  let mut hash: u64 = 0xcbf29ce484222325;
  for &b in data {
    hash ^= b as u64;
    hash = hash.wrapping_mul(0x100000001b3);
  }
  hash
}

fn bucket_key(bucket: &Bucket) -> &'static [u8] {
  // Safety: populated only by `insert`, which always writes `key_len` valid
  // bytes at `key_addr` before setting `occupied`.
  unsafe { std::slice::from_raw_parts(bucket.key_addr as *const u8, bucket.key_len as usize) }
}

fn bucket_value(bucket: &Bucket) -> &'static [u8] {
  // Safety: see `bucket_key`.
  unsafe { std::slice::from_raw_parts(bucket.value_addr as *const u8, bucket.value_len as usize) }
}
