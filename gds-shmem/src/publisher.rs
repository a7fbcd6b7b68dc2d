//! Server-side registration: fetch a namespace's job keys, size and create
//! the job segment, populate its arena-backed containers, and pack the
//! connection-info blob a local peer attaches from.

use gds_shmem_core::{ArenaHashTable, ArenaList, JobSegmentHeader, Role, Segment, Tma};

use crate::blob::{
  pack_connection_info, pack_value, ConnectionInfo, DefaultWireCodec, WireCodec, KEY_APP_INFO_ARRAY,
  KEY_NODE_INFO_ARRAY, KEY_SEG_BLOB, KEY_SESSION_INFO_ARRAY,
};
use crate::collaborators::KeyFetcher;
use crate::error::Result;
use crate::kv::{Kv, KvValue};
use crate::registry::Registry;
use crate::sizing::SizingEstimator;

pub struct Publisher;

impl Publisher {
  /// Registers a newly connected local peer for `nsid`. Returns the reply
  /// buffer to hand back to that peer -- either a byte-identical cached
  /// blob from an earlier registration, or a freshly built one.
  pub fn register_local_peer(
    registry: &mut Registry,
    nsid: &str,
    fetcher: &dyn KeyFetcher,
    n_local_procs: usize,
  ) -> Result<Vec<u8>> {
    if let Some(cached) = registry.use_cached_blob(nsid) {
      log::debug!("namespace '{nsid}': serving cached connection blob");
      return Ok(cached);
    }

    let keys = fetcher.fetch_job_keys(nsid)?;
    let reply = Self::publish(registry, nsid, &keys)?;
    registry.cache_blob(nsid, reply.clone(), n_local_procs);
    Ok(reply)
  }

  fn publish(registry: &mut Registry, nsid: &str, keys: &[Kv]) -> Result<Vec<u8>> {
    let multiplier = registry.config.segment_size_multiplier;
    let estimate = SizingEstimator::estimate_job(keys, multiplier);
    let pid = std::process::id();
    let path = gds_shmem_core::segment::backing_path(registry.basedir(), &registry.host, nsid, Role::Job, pid)?;

    log::debug!(
      "namespace '{nsid}': creating job segment size={} ht_capacity={} packed_size={}",
      estimate.segment_size,
      estimate.ht_capacity,
      estimate.packed_size
    );
    let segment = match Segment::create(path, estimate.segment_size, Role::Job) {
      Ok(segment) => segment,
      Err(e) => {
        log::error!("namespace '{nsid}': failed to create job segment: {e}");
        return Err(e.into());
      }
    };
    let base_address = segment.base_address;
    let size = segment.size;
    let seg_path = segment.backing_path.clone();

    let tracker = registry.tracker_mut(nsid);
    tracker.install_created(Role::Job, segment);

    // Safety: `segment` was just created by this process and nothing else
    // maps this range yet.
    let (header, tma) = unsafe { JobSegmentHeader::init(base_address, size) };
    if let Err(e) = ArenaHashTable::init(&tma, &mut header.local_hashtab, estimate.ht_capacity) {
      log::error!("namespace '{nsid}': failed to initialize job hash table: {e}");
      return Err(e.into());
    }
    if let Err(e) = store_job_data(&tma, header, keys) {
      log::error!("namespace '{nsid}': failed to populate job segment: {e}");
      return Err(e);
    }
    tracker.mark_ready(Role::Job);
    log::debug!("namespace '{nsid}': job segment ready at 0x{base_address:x}");

    let info = ConnectionInfo { nspace_id: nsid.to_string(), role: Role::Job, seg_path, seg_size: size, seg_addr: base_address };
    Ok(build_reply(&info, keys))
  }
}

/// Walks the fetched key list, storing plain keys into `local_hashtab` and
/// structured values into their dedicated lists. `ProcData` arrays flatten
/// one hash-table entry per element, matching
/// [`KvValue::entry_count`](crate::kv::KvValue::entry_count).
fn store_job_data(tma: &Tma, header: &mut JobSegmentHeader, keys: &[Kv]) -> Result<()> {
  for kv in keys {
    match &kv.value {
      KvValue::SessionInfo(entries) => {
        let payload = DefaultWireCodec::pack(entries);
        ArenaList::push_front(tma, &mut header.session_ref, &payload)?;
      }
      KvValue::NodeInfo(entries) => {
        let payload = DefaultWireCodec::pack(entries);
        ArenaList::push_front(tma, &mut header.nodeinfo_list, &payload)?;
      }
      KvValue::AppInfo(entries) => {
        let payload = DefaultWireCodec::pack(entries);
        ArenaList::push_front(tma, &mut header.appinfo_list, &payload)?;
      }
      KvValue::ProcData(entries) => {
        for (i, entry) in entries.iter().enumerate() {
          let hash_key = format!("{}.{i}", kv.key);
          let value = pack_value(&entry.value);
          ArenaHashTable::insert(tma, &mut header.local_hashtab, hash_key.as_bytes(), &value)?;
        }
      }
      _ => {
        let value = pack_value(&kv.value);
        ArenaHashTable::insert(tma, &mut header.local_hashtab, kv.key.as_bytes(), &value)?;
      }
    }
  }
  Ok(())
}

/// Builds the outer reply buffer: one `SEG_BLOB` entry for the job segment,
/// plus the structured info-array markers a client silently skips.
fn build_reply(info: &ConnectionInfo, keys: &[Kv]) -> Vec<u8> {
  let mut outer = vec![Kv::new(KEY_SEG_BLOB, KvValue::Bytes(pack_connection_info(info)))];
  if keys.iter().any(|kv| matches!(kv.value, KvValue::SessionInfo(_))) {
    outer.push(Kv::new(KEY_SESSION_INFO_ARRAY, KvValue::U64(1)));
  }
  if keys.iter().any(|kv| matches!(kv.value, KvValue::NodeInfo(_))) {
    outer.push(Kv::new(KEY_NODE_INFO_ARRAY, KvValue::U64(1)));
  }
  if keys.iter().any(|kv| matches!(kv.value, KvValue::AppInfo(_))) {
    outer.push(Kv::new(KEY_APP_INFO_ARRAY, KvValue::U64(1)));
  }
  DefaultWireCodec::pack(&outer)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::Config;

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
  fn publish_creates_ready_job_segment_with_connection_blob() {
    let (_dir, mut registry) = isolated_registry();
    let keys = vec![Kv::new("k1", KvValue::Str("v1".into())), Kv::new("k2", KvValue::U64(42))];
    let reply = Publisher::publish(&mut registry, "nsA", &keys).unwrap();
    assert!(!reply.is_empty());

    let tracker = registry.tracker("nsA").unwrap();
    assert!(tracker.is_ready(Role::Job));
    assert!(tracker.flags(Role::Job).release);
  }

  #[test]
  fn empty_proc_data_array_contributes_no_hash_table_entries() {
    let (_dir, mut registry) = isolated_registry();
    let keys = vec![Kv::new("procs", KvValue::ProcData(Vec::new())), Kv::new("k1", KvValue::Str("v1".into()))];
    Publisher::publish(&mut registry, "nsC", &keys).unwrap();

    let tracker = registry.tracker("nsC").unwrap();
    let segment = tracker.segment(Role::Job).unwrap();
    // Safety: this process created and still owns the job segment.
    let header = unsafe { JobSegmentHeader::at(segment.base_address) };
    assert_eq!(header.local_hashtab.len, 1, "an empty proc-data array must not contribute a fallback entry");
  }

  #[test]
  fn reply_carries_info_array_markers_only_when_present() {
    let (_dir, mut registry) = isolated_registry();
    let keys = vec![Kv::new("session", KvValue::SessionInfo(vec![Kv::new("x", KvValue::U64(1))]))];
    let reply = Publisher::publish(&mut registry, "nsB", &keys).unwrap();

    let mut pos = 0;
    let mut saw_session_marker = false;
    while let Some(kv) = DefaultWireCodec::unpack_next(&reply, &mut pos).unwrap() {
      if kv.key == KEY_SESSION_INFO_ARRAY {
        saw_session_marker = true;
      }
    }
    assert!(saw_session_marker);
  }
}
