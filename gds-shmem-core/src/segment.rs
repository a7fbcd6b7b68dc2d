//! A file-backed shared-memory segment: the creator maps it at a freshly
//! discovered virtual address, attaching processes map the same file at the
//! address the creator chose.

use std::ffi::c_void;
use std::fs::{self, File, OpenOptions};
use std::num::NonZeroUsize;
use std::os::fd::AsFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;

use nix::sys::mman::{self, MapFlags, ProtFlags};
use nix::unistd::{self, SysconfVar};

use crate::error::{Error, Result};
use crate::header::Role;
use crate::vmem;

/// Prefix every backing file carries, so the stale-segment sweep can
/// recognize ours among whatever else lives in the basedir.
pub const FILE_PREFIX: &str = "gds-shmem";

/// Portable fallback when `PATH_MAX` cannot be queried from the platform.
pub const PATH_MAX_FALLBACK: usize = 4096;

/// Page size of the running system, falling back to 4 KiB if `sysconf`
/// cannot answer.
pub fn page_size() -> usize {
  unistd::sysconf(SysconfVar::PAGE_SIZE).ok().flatten().unwrap_or(4096) as usize
}

/// Rounds `size` up to the next multiple of [`page_size`].
pub fn round_up_to_page(size: usize) -> usize {
  let page = page_size();
  (size + page - 1) / page * page
}

/// Builds `<basedir>/gds-shmem-<host>-<nsid>-<role>-<pid>`, bounded to
/// [`PATH_MAX_FALLBACK`] bytes.
pub fn backing_path(basedir: &Path, host: &str, nsid: &str, role: Role, pid: u32) -> Result<PathBuf> {
  let path = basedir.join(format!("{FILE_PREFIX}-{host}-{nsid}-{role}-{pid}"));
  if path.as_os_str().len() > PATH_MAX_FALLBACK {
    return Err(Error::IoFailure(std::io::Error::new(
      std::io::ErrorKind::InvalidInput,
      "backing path exceeds PATH_MAX",
    )));
  }
  Ok(path)
}

/// A mapped shared-memory segment.
pub struct Segment {
  pub backing_path: PathBuf,
  pub size: usize,
  pub base_address: usize,
  pub role: Role,
  owns_release: bool,
  mapped: bool,
}

impl Segment {
  /// Creates and truncates the backing file to `requested_size` (rounded up
  /// to a page), finds a free virtual hole of that size, and maps it there.
  /// The returned `Segment` owns the RELEASE responsibility.
  pub fn create(backing_path: PathBuf, requested_size: usize, role: Role) -> Result<Self> {
    let size = round_up_to_page(requested_size);
    let base_address = vmem::find_free_hole(size)?;

    let file = OpenOptions::new()
      .read(true)
      .write(true)
      .create(true)
      .truncate(true)
      .mode(0o600)
      .open(&backing_path)?;
    file.set_len(size as u64)?;

    let actual = map_fixed(&file, base_address, size)?;
    if actual != base_address {
      return Err(Error::AddressMismatch {
        requested: base_address,
        actual: Some(actual),
      });
    }

    log::debug!("created {role} segment at 0x{actual:x}, size={size}, path={backing_path:?}");
    Ok(Self {
      backing_path,
      size,
      base_address: actual,
      role,
      owns_release: true,
      mapped: true,
    })
  }

  /// Maps the already-existing backing file at `requested_addr`. Fails with
  /// `Error::AddressMismatch` if the kernel cannot honor that exact address.
  pub fn attach(backing_path: PathBuf, size: usize, requested_addr: usize, role: Role) -> Result<Self> {
    let file = OpenOptions::new().read(true).write(true).open(&backing_path)?;
    let actual = map_fixed(&file, requested_addr, size)?;
    if actual != requested_addr {
      return Err(Error::AddressMismatch {
        requested: requested_addr,
        actual: Some(actual),
      });
    }
    log::debug!("attached {role} segment at 0x{actual:x}, size={size}, path={backing_path:?}");
    Ok(Self {
      backing_path,
      size,
      base_address: actual,
      role,
      owns_release: false,
      mapped: true,
    })
  }

  /// Restricts the mapping to read-only. Used by attaching (client)
  /// processes once header pointers have been installed.
  pub fn protect_read_only(&self) -> Result<()> {
    let addr = NonNull::new(self.base_address as *mut c_void).expect("base_address is never null");
    // Safety: `addr..addr+size` is this segment's own live mapping.
    unsafe { mman::mprotect(addr, self.size, ProtFlags::PROT_READ) }?;
    Ok(())
  }

  /// Unmaps the segment without touching the backing file.
  pub fn detach(mut self) -> Result<()> {
    self.unmap()
  }

  /// Unmaps the segment and, if this process holds the RELEASE
  /// responsibility, unlinks the backing file.
  pub fn destroy(mut self) -> Result<()> {
    self.unmap()?;
    if self.owns_release {
      fs::remove_file(&self.backing_path)?;
    }
    Ok(())
  }

  /// Unmaps this segment in place without consuming it, leaving the
  /// backing file untouched and this value's RELEASE responsibility intact.
  /// Used to hand a just-created segment's address off to a genuinely
  /// separate attaching process while normal teardown (`detach`/`destroy`,
  /// or `Drop`) still happens later through this same value.
  pub fn unmap_in_place(&mut self) -> Result<()> {
    self.unmap()
  }

  fn unmap(&mut self) -> Result<()> {
    if !self.mapped {
      return Ok(());
    }
    let addr = NonNull::new(self.base_address as *mut c_void).expect("base_address is never null");
    // Safety: `self.mapped` guarantees this is still our own live mapping.
    unsafe { mman::munmap(addr, self.size) }?;
    self.mapped = false;
    Ok(())
  }
}

impl Drop for Segment {
  fn drop(&mut self) {
    if let Err(e) = self.unmap() {
      log::warn!("failed to unmap {} segment at 0x{:x}: {e}", self.role, self.base_address);
    }
  }
}

fn map_fixed(file: &File, addr: usize, size: usize) -> Result<usize> {
  let addr_hint = NonZeroUsize::new(addr);
  let len = NonZeroUsize::new(size).expect("segment size is always greater than zero");
  let prot = ProtFlags::PROT_READ | ProtFlags::PROT_WRITE;
  let fd = file.as_fd();

  let noreplace = unsafe {
    mman::mmap(addr_hint, len, prot, MapFlags::MAP_SHARED | MapFlags::MAP_FIXED_NOREPLACE, fd, 0)
  };
  let mapped = match noreplace {
    Ok(ptr) => ptr,
    Err(nix::Error::EINVAL) => {
      log::debug!("MAP_FIXED_NOREPLACE unsupported by this kernel, falling back to MAP_FIXED");
      unsafe { mman::mmap(addr_hint, len, prot, MapFlags::MAP_SHARED | MapFlags::MAP_FIXED, fd, 0) }
        .map_err(|_| Error::AddressMismatch { requested: addr, actual: None })?
    }
    Err(_) => return Err(Error::AddressMismatch { requested: addr, actual: None }),
  };

  let actual = mapped.as_ptr() as usize;
  if actual != addr {
    // Safety: `mapped` is the pointer `mmap` just returned, covering `size`
    // bytes; we are discarding a mapping the kernel placed somewhere we
    // cannot use.
    let _ = unsafe { mman::munmap(mapped, size) };
  }
  Ok(actual)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn round_up_to_page_is_idempotent_on_page_multiples() {
    let page = page_size();
    assert_eq!(round_up_to_page(page), page);
    assert_eq!(round_up_to_page(page + 1), page * 2);
    assert_eq!(round_up_to_page(1), page);
  }

  #[test]
  fn backing_path_follows_naming_convention() {
    let path = backing_path(Path::new("/tmp"), "myhost", "ns0", Role::Job, 1234).unwrap();
    assert_eq!(path, PathBuf::from("/tmp/gds-shmem-myhost-ns0-job-1234"));
  }

  #[test]
  fn backing_path_rejects_absurdly_long_inputs() {
    let huge_nsid = "n".repeat(PATH_MAX_FALLBACK);
    let result = backing_path(Path::new("/tmp"), "h", &huge_nsid, Role::Modex, 1);
    assert!(matches!(result, Err(Error::IoFailure(_))));
  }

  #[test]
  fn create_attach_destroy_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("segment-test");
    let mut created = Segment::create(path.clone(), 1, Role::Job).unwrap();
    let base = created.base_address;
    let size = created.size;
    let role = created.role;

    // A fixed mapping at `base` fails while `created` still holds it live in
    // this process (see `segment_lifecycle.rs`), so free the address first,
    // as if `created` had handed its segment off to a separate process.
    created.unmap_in_place().unwrap();

    let attached = Segment::attach(path.clone(), size, base, role).unwrap();
    attached.detach().unwrap();

    created.destroy().unwrap();
    assert!(!path.exists());
  }
}
