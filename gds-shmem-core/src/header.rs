//! The fixed prefix written at offset 0 of every segment, plus the
//! role-dependent containers that follow it. These types are `#[repr(C)]`
//! because their layout is the wire format: every process that attaches a
//! segment reads these fields directly out of the mapping.

use std::mem::size_of;
use std::ptr;

use crate::tma::{align8, Tma, TmaFnTable};

/// Which of the two segments a `JobTracker` is looking at.
///
/// `Invalid` is never produced by this crate's own iteration -- we always
/// walk `[Role::Job, Role::Modex]` directly -- but is kept as a documented
/// variant because the `SMSEGID` connection-blob field is wire-compatible
/// with a three-value role enumeration.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
  Job = 0,
  Modex = 1,
  Invalid = 2,
}

impl Role {
  pub fn label(self) -> &'static str {
    match self {
      Role::Job => "job",
      Role::Modex => "modex",
      Role::Invalid => "invalid",
    }
  }
}

impl std::fmt::Display for Role {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.label())
  }
}

/// A handle to an arena-backed singly linked list: the absolute address of
/// the head node, or 0 if empty.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ListHandle {
  pub head: u64,
  pub len: u64,
}

impl ListHandle {
  pub const EMPTY: Self = Self { head: 0, len: 0 };
}

/// A handle to an arena-backed hash table skeleton.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct HashTableHandle {
  pub base: u64,
  pub capacity: u64,
  pub len: u64,
}

impl HashTableHandle {
  pub const EMPTY: Self = Self { base: 0, capacity: 0, len: 0 };
}

/// Fields common to both header shapes: the arena cursor and the (inert)
/// allocation function table.
#[repr(C)]
pub struct HeaderPrefix {
  pub arena_cursor: u64,
  pub arena_functions: TmaFnTable,
}

/// Header laid down at the base of a `Role::Job` segment.
#[repr(C)]
pub struct JobSegmentHeader {
  pub prefix: HeaderPrefix,
  pub session_ref: ListHandle,
  pub jobinfo_list: ListHandle,
  pub nodeinfo_list: ListHandle,
  pub appinfo_list: ListHandle,
  pub local_hashtab: HashTableHandle,
}

impl JobSegmentHeader {
  /// Zeroes `size` bytes at `base_address`, writes the initial header, and
  /// returns a `Tma` over the remaining free space.
  ///
  /// # Safety
  ///
  /// `base_address..base_address + size` must be a mapped, exclusively
  /// owned region at least `size_of::<Self>()` bytes long.
  pub unsafe fn init(base_address: usize, size: usize) -> (&'static mut Self, Tma) {
    let header_ptr = base_address as *mut Self;
    ptr::write_bytes(header_ptr as *mut u8, 0, size_of::<Self>());
    let header = &mut *header_ptr;
    header.prefix.arena_cursor = align8(base_address + size_of::<Self>()) as u64;
    header.prefix.arena_functions = TmaFnTable::installed();
    header.session_ref = ListHandle::EMPTY;
    header.jobinfo_list = ListHandle::EMPTY;
    header.nodeinfo_list = ListHandle::EMPTY;
    header.appinfo_list = ListHandle::EMPTY;
    header.local_hashtab = HashTableHandle::EMPTY;
    let cursor_ptr: *mut u64 = &mut header.prefix.arena_cursor;
    let tma = Tma::new(cursor_ptr, base_address + size);
    (header, tma)
  }

  /// Borrows an already-initialized header out of a mapped segment.
  ///
  /// # Safety
  ///
  /// `base_address` must point at a `JobSegmentHeader` previously written by
  /// [`JobSegmentHeader::init`] in some process, now mapped at this address
  /// in the caller's process for at least the lifetime of the returned
  /// reference.
  pub unsafe fn at(base_address: usize) -> &'static Self {
    &*(base_address as *const Self)
  }

  /// Borrows an already-initialized header mutably, for the creator to
  /// continue appending after the initial populate pass.
  ///
  /// # Safety
  ///
  /// Same contract as [`JobSegmentHeader::at`], plus: only the process that
  /// created this segment may call this -- clients must treat their mapping
  /// as read-only and use [`JobSegmentHeader::at`] instead.
  pub unsafe fn at_mut(base_address: usize) -> &'static mut Self {
    &mut *(base_address as *mut Self)
  }
}

/// Header laid down at the base of a `Role::Modex` segment.
#[repr(C)]
pub struct ModexSegmentHeader {
  pub prefix: HeaderPrefix,
  pub hashtab: HashTableHandle,
}

impl ModexSegmentHeader {
  /// # Safety
  ///
  /// Same contract as [`JobSegmentHeader::init`].
  pub unsafe fn init(base_address: usize, size: usize) -> (&'static mut Self, Tma) {
    let header_ptr = base_address as *mut Self;
    ptr::write_bytes(header_ptr as *mut u8, 0, size_of::<Self>());
    let header = &mut *header_ptr;
    header.prefix.arena_cursor = align8(base_address + size_of::<Self>()) as u64;
    header.prefix.arena_functions = TmaFnTable::installed();
    header.hashtab = HashTableHandle::EMPTY;
    let cursor_ptr: *mut u64 = &mut header.prefix.arena_cursor;
    let tma = Tma::new(cursor_ptr, base_address + size);
    (header, tma)
  }

  /// # Safety
  ///
  /// Same contract as [`JobSegmentHeader::at`].
  pub unsafe fn at(base_address: usize) -> &'static Self {
    &*(base_address as *const Self)
  }

  /// # Safety
  ///
  /// Same contract as [`JobSegmentHeader::at_mut`]. The modex segment's
  /// creator uses this to keep inserting on each subsequent fence.
  pub unsafe fn at_mut(base_address: usize) -> &'static mut Self {
    &mut *(base_address as *mut Self)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn backing(bytes: usize) -> (Vec<u8>, usize) {
    let buf = vec![0u8; bytes];
    let addr = buf.as_ptr() as usize;
    (buf, addr)
  }

  #[test]
  fn job_header_arena_cursor_is_aligned_past_header() {
    let (_buf, addr) = backing(8192);
    let (header, _tma) = unsafe { JobSegmentHeader::init(addr, 8192) };
    assert_eq!(header.prefix.arena_cursor as usize, align8(addr + size_of::<JobSegmentHeader>()));
    assert!(header.prefix.arena_cursor as usize % 8 == 0);
  }

  #[test]
  fn modex_header_containers_start_empty() {
    let (_buf, addr) = backing(4096);
    let (header, _tma) = unsafe { ModexSegmentHeader::init(addr, 4096) };
    assert_eq!(header.hashtab.base, 0);
    assert_eq!(header.hashtab.len, 0);
  }

  #[test]
  fn role_label_round_trips() {
    assert_eq!(Role::Job.label(), "job");
    assert_eq!(Role::Modex.label(), "modex");
    assert_eq!(Role::Invalid.label(), "invalid");
  }
}
