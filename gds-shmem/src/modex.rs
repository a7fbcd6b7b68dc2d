//! Server-side fence handler: lazily creates the modex segment on first
//! inbound post-fence payload for a namespace, then reuses it for every
//! subsequent fence.

use gds_shmem_core::{ArenaHashTable, ModexSegmentHeader, Role, Segment, Tma};

use crate::blob::{pack_value, DefaultWireCodec, WireCodec};
use crate::error::Result;
use crate::kv::Kv;
use crate::registry::Registry;
use crate::sizing::SizingEstimator;

pub struct ModexStore;

impl ModexStore {
  /// Stores `remote_keys` (one fence's worth of post-synchronization data)
  /// for `nsid`, creating the modex segment on the first call and reusing
  /// it on every later one.
  pub fn store_fence_data(registry: &mut Registry, nsid: &str, n_peers: usize, remote_keys: &[Kv]) -> Result<()> {
    if !registry.tracker_mut(nsid).flags(Role::Modex).attached {
      Self::create_segment(registry, nsid, n_peers, remote_keys)?;
    }

    let tracker = registry.tracker(nsid).expect("tracker created above or pre-existing");
    let segment = tracker.segment(Role::Modex).expect("modex segment attached by create_segment");
    let base_address = segment.base_address;
    let limit = base_address + segment.size;

    // Safety: this process created the modex segment (checked above via
    // `flags(Role::Modex).attached`, latched only by `create_segment`) and
    // is therefore the sole writer.
    let header = unsafe { ModexSegmentHeader::at_mut(base_address) };
    let cursor_ptr: *mut u64 = &mut header.prefix.arena_cursor;
    // Safety: `cursor_ptr` is the live arena cursor of a segment this
    // process mapped at `base_address..limit`.
    let tma = unsafe { Tma::new(cursor_ptr, limit) };
    for kv in remote_keys {
      let value = pack_value(&kv.value);
      ArenaHashTable::insert(&tma, &mut header.hashtab, kv.key.as_bytes(), &value)?;
    }
    log::trace!("namespace '{nsid}': stored {} remote keys into modex segment", remote_keys.len());
    Ok(())
  }

  fn create_segment(registry: &mut Registry, nsid: &str, n_peers: usize, remote_keys: &[Kv]) -> Result<()> {
    let multiplier = registry.config.segment_size_multiplier;
    let packed_size = DefaultWireCodec::pack(remote_keys).len();
    let estimate = SizingEstimator::estimate_modex(packed_size, n_peers, multiplier);
    let pid = std::process::id();
    let path = gds_shmem_core::segment::backing_path(registry.basedir(), &registry.host, nsid, Role::Modex, pid)?;

    log::debug!(
      "namespace '{nsid}': creating modex segment size={} ht_capacity={} (n_peers={n_peers})",
      estimate.segment_size,
      estimate.ht_capacity
    );
    let segment = Segment::create(path, estimate.segment_size, Role::Modex)?;
    let base_address = segment.base_address;
    let size = segment.size;

    let tracker = registry.tracker_mut(nsid);
    tracker.install_created(Role::Modex, segment);

    // Safety: `segment` was just created by this process.
    let (header, tma) = unsafe { ModexSegmentHeader::init(base_address, size) };
    ArenaHashTable::init(&tma, &mut header.hashtab, estimate.ht_capacity)?;
    tracker.mark_ready(Role::Modex);
    log::debug!("namespace '{nsid}': modex segment ready at 0x{base_address:x}");
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::Config;
  use crate::kv::KvValue;

  // Each test gets its own basedir: backing-file naming only disambiguates
  // on (host, nsid, role, pid), and `cargo test` runs these concurrently in
  // one process, so a shared `/tmp` plus a reused namespace id would race.
  fn isolated_registry() -> (tempfile::TempDir, Registry) {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::builder().base_dir_override(Some(dir.path().to_path_buf())).build();
    let registry = Registry::new(config, "host0");
    (dir, registry)
  }

  #[test]
  fn first_fence_creates_segment_with_256_per_peer_capacity() {
    let (_dir, mut registry) = isolated_registry();
    let keys = vec![
      Kv::new("p0", KvValue::Str("v0".into())),
      Kv::new("p1", KvValue::Str("v1".into())),
      Kv::new("p2", KvValue::Str("v2".into())),
      Kv::new("p3", KvValue::Str("v3".into())),
    ];
    ModexStore::store_fence_data(&mut registry, "nsA", 4, &keys).unwrap();

    let tracker = registry.tracker("nsA").unwrap();
    assert!(tracker.is_ready(Role::Modex));
    let segment = tracker.segment(Role::Modex).unwrap();
    let header = unsafe { ModexSegmentHeader::at(segment.base_address) };
    assert_eq!(header.hashtab.capacity, 1024);
    assert_eq!(header.hashtab.len, 4);
  }

  #[test]
  fn second_fence_reuses_the_same_segment() {
    let (_dir, mut registry) = isolated_registry();
    let first = vec![Kv::new("p0", KvValue::Str("v0".into()))];
    ModexStore::store_fence_data(&mut registry, "nsA", 2, &first).unwrap();
    let base_first = registry.tracker("nsA").unwrap().segment(Role::Modex).unwrap().base_address;

    let second = vec![Kv::new("p1", KvValue::Str("v1".into()))];
    ModexStore::store_fence_data(&mut registry, "nsA", 2, &second).unwrap();
    let base_second = registry.tracker("nsA").unwrap().segment(Role::Modex).unwrap().base_address;

    assert_eq!(base_first, base_second);
    let segment = registry.tracker("nsA").unwrap().segment(Role::Modex).unwrap();
    let header = unsafe { ModexSegmentHeader::at(segment.base_address) };
    assert_eq!(header.hashtab.len, 2);
  }
}
