//! Exercises the segment lifecycle and the two invariants that matter most
//! for cross-process attach: a second mapping at the creator's exact
//! address succeeds once the creator's own mapping is out of the way, and a
//! mapping at an address some other live VMA still occupies fails hard
//! rather than silently relocating.

use gds_shmem_core::{Error, Role, Segment};

#[test]
fn attach_at_creators_address_sees_identical_bytes() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("seg-a");

  let mut created = Segment::create(path.clone(), 4096, Role::Job).unwrap();
  let base = created.base_address;
  let size = created.size;

  // Safety: writing within our own freshly created mapping.
  unsafe { std::ptr::write(base as *mut u64, 0xdead_beef_u64) };

  // `MAP_FIXED`/`MAP_FIXED_NOREPLACE` fail whenever the requested range
  // overlaps any live VMA in the calling process, regardless of which file
  // backs it -- so attaching at `base` in this same process only succeeds
  // once `created`'s own mapping is torn down, as it would be by the time a
  // genuinely separate process received this address and file path.
  created.unmap_in_place().unwrap();

  let attached = Segment::attach(path.clone(), size, base, Role::Job).unwrap();
  assert_eq!(attached.base_address, base);
  // Safety: `attached` maps the same file at the same address; the byte
  // the creator wrote is visible through this second mapping.
  let seen = unsafe { std::ptr::read(attached.base_address as *const u64) };
  assert_eq!(seen, 0xdead_beef_u64);

  attached.detach().unwrap();
  created.destroy().unwrap();
  assert!(!path.exists());
}

#[test]
fn attach_at_an_occupied_address_is_a_hard_failure() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("seg-b");
  let created = Segment::create(path.clone(), 4096, Role::Job).unwrap();

  // Occupy the address a second segment would naturally land at by
  // creating one more segment first, then try to attach a fresh file
  // squarely on top of the first one's live mapping.
  let occupied_addr = created.base_address;
  let other_path = dir.path().join("seg-c");
  std::fs::write(&other_path, vec![0u8; 4096]).unwrap();

  let result = Segment::attach(other_path.clone(), 4096, occupied_addr, Role::Job);
  assert!(matches!(result, Err(Error::AddressMismatch { .. })));
  assert!(other_path.exists(), "a failed attach must not touch the backing file");

  created.destroy().unwrap();
}
