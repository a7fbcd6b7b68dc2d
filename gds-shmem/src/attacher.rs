//! Client-side attach: parse an inbound reply buffer, map each advertised
//! segment at the address the server chose, and expose read accessors over
//! the now-shared header.

use gds_shmem_core::{ArenaHashTable, JobSegmentHeader, ModexSegmentHeader, Role, Segment};

use crate::blob::{unpack_connection_info, ConnectionInfo, DefaultWireCodec, WireCodec, KEY_APP_INFO_ARRAY, KEY_NODE_INFO_ARRAY, KEY_SEG_BLOB, KEY_SESSION_INFO_ARRAY};
use crate::error::{Error, Result};
use crate::registry::Registry;

pub struct Attacher;

impl Attacher {
  /// Processes a reply buffer from the server, attaching every advertised
  /// segment this process has not already attached. Unpacking terminates
  /// successfully at end-of-buffer; any unrecognized key is a hard
  /// [`Error::ProtocolViolation`].
  pub fn attach_reply(registry: &mut Registry, reply: &[u8]) -> Result<()> {
    let mut pos = 0usize;
    while let Some(kv) = DefaultWireCodec::unpack_next(reply, &mut pos)? {
      match kv.key.as_str() {
        KEY_SEG_BLOB => {
          let crate::kv::KvValue::Bytes(sub) = kv.value else {
            return Err(Error::ProtocolViolation("SEG_BLOB did not carry a byte buffer".into()));
          };
          let info = unpack_connection_info(&sub)?;
          Self::attach_segment(registry, &info)?;
        }
        KEY_SESSION_INFO_ARRAY | KEY_NODE_INFO_ARRAY | KEY_APP_INFO_ARRAY => {
          // Server has already stored these into the segment; nothing to do.
        }
        other => return Err(Error::ProtocolViolation(format!("unrecognized reply key '{other}'"))),
      }
    }
    Ok(())
  }

  fn attach_segment(registry: &mut Registry, info: &ConnectionInfo) -> Result<()> {
    let tracker = registry.tracker_mut(&info.nspace_id);
    if tracker.flags(info.role).attached {
      log::debug!("namespace '{}': {} segment already attached, skipping", info.nspace_id, info.role);
      return Ok(());
    }

    let segment = Segment::attach(info.seg_path.clone(), info.seg_size, info.seg_addr, info.role)?;
    log::debug!(
      "namespace '{}': attached {} segment at 0x{:x}",
      info.nspace_id,
      info.role,
      segment.base_address
    );
    if let Err(e) = segment.protect_read_only() {
      log::warn!("namespace '{}': failed to mprotect {} segment read-only: {e}", info.nspace_id, info.role);
    }
    tracker.install_attached(info.role, segment);
    tracker.mark_ready(info.role);
    Ok(())
  }

  /// Looks up `key` in the job segment's `local_hashtab`, if attached and
  /// ready.
  ///
  /// # Safety
  ///
  /// The returned slice borrows directly from the mapped segment; it is
  /// valid only as long as `tracker`'s job segment stays attached.
  pub unsafe fn read_job_key(tracker: &gds_shmem_core::JobTracker, key: &str) -> Option<&'static [u8]> {
    if !tracker.is_ready(Role::Job) {
      return None;
    }
    let segment = tracker.segment(Role::Job)?;
    let header = JobSegmentHeader::at(segment.base_address);
    ArenaHashTable::get(&header.local_hashtab, key.as_bytes())
  }

  /// Looks up `key` in the modex segment's `hashtab`, if attached and ready.
  ///
  /// # Safety
  ///
  /// Same contract as [`Attacher::read_job_key`].
  pub unsafe fn read_modex_key(tracker: &gds_shmem_core::JobTracker, key: &str) -> Option<&'static [u8]> {
    if !tracker.is_ready(Role::Modex) {
      return None;
    }
    let segment = tracker.segment(Role::Modex)?;
    let header = ModexSegmentHeader::at(segment.base_address);
    ArenaHashTable::get(&header.hashtab, key.as_bytes())
  }
}
