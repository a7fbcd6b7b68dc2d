//! `Registry`: the process-wide, explicitly-owned collection of job
//! trackers and sessions. Replaces the source's global component state --
//! constructed once at module init, torn down once at finalize, never a
//! `static`.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use nix::sys::signal::kill;
use nix::unistd::Pid;

use gds_shmem_core::segment::FILE_PREFIX;
use gds_shmem_core::{JobTracker, Role};

use crate::config::Config;
use crate::error::Result;

/// A previously packed connection blob retained so a second (and later)
/// local peer for the same namespace gets a byte-identical reply without
/// the Publisher redoing any work.
struct NamespaceCache {
  blob: Vec<u8>,
  delivered: usize,
  n_local_procs: usize,
}

pub struct Registry {
  pub config: Config,
  pub host: String,
  basedir: PathBuf,
  trackers: HashMap<String, JobTracker>,
  caches: HashMap<String, NamespaceCache>,
  /// Session records whose storage lives inside the segments owned by
  /// `trackers`. Cleared, never traversed, on shutdown -- see
  /// `Registry::shutdown`.
  sessions: Vec<usize>,
}

impl Registry {
  pub fn new(config: Config, host: impl Into<String>) -> Self {
    let basedir = resolve_basedir(&config);
    if config.sweep_stale_segments_on_init {
      sweep_stale_segments(&basedir);
    }
    Self {
      config,
      host: host.into(),
      basedir,
      trackers: HashMap::new(),
      caches: HashMap::new(),
      sessions: Vec::new(),
    }
  }

  /// Returns and advances the cached blob for `nsid`, if one is retained.
  /// Releases the cache once the configured number of local peers have
  /// been delivered it.
  pub fn use_cached_blob(&mut self, nsid: &str) -> Option<Vec<u8>> {
    let cache = self.caches.get_mut(nsid)?;
    let blob = cache.blob.clone();
    cache.delivered += 1;
    if cache.delivered >= cache.n_local_procs {
      self.caches.remove(nsid);
    }
    Some(blob)
  }

  /// Retains `blob` for reuse by up to `n_local_procs - 1` further local
  /// peers. A no-op if `n_local_procs <= 1`, since there is no one left to
  /// reuse it.
  pub fn cache_blob(&mut self, nsid: &str, blob: Vec<u8>, n_local_procs: usize) {
    if n_local_procs <= 1 {
      return;
    }
    self.caches.insert(nsid.to_string(), NamespaceCache { blob, delivered: 1, n_local_procs });
  }

  pub fn basedir(&self) -> &Path {
    &self.basedir
  }

  /// Returns the tracker for `nsid`, creating an empty one if this is the
  /// first time this namespace is seen.
  pub fn tracker_mut(&mut self, nsid: &str) -> &mut JobTracker {
    self.trackers.entry(nsid.to_string()).or_insert_with(|| JobTracker::new(nsid))
  }

  pub fn tracker(&self, nsid: &str) -> Option<&JobTracker> {
    self.trackers.get(nsid)
  }

  /// Removes the tracker for `nsid`; its `Drop` tears down both segments.
  pub fn delete_namespace(&mut self, nsid: &str) {
    self.trackers.remove(nsid);
    self.caches.remove(nsid);
  }

  /// Unmaps (without destroying) `nsid`'s `role` segment, simulating this
  /// process handing a just-published segment off to a genuinely separate
  /// attaching process. Needed by tests: Linux `mmap(2)` rejects a fixed
  /// mapping onto any range a live VMA in the *calling* process already
  /// occupies, regardless of which file backs it, so a same-process
  /// "client" attach at this process's own live address would always fail.
  #[cfg(any(test, feature = "test-support"))]
  pub fn detach_for_handoff(&mut self, nsid: &str, role: Role) -> Result<()> {
    let tracker = self.trackers.get_mut(nsid).expect("tracker must exist for handoff");
    tracker.detach_mapping(role)?;
    Ok(())
  }

  /// Destroys every tracker, then clears the sessions list without
  /// iterating it -- its contents point into segments that no longer exist.
  pub fn shutdown(&mut self) {
    self.trackers.clear();
    self.sessions.clear();
  }
}

fn resolve_basedir(config: &Config) -> PathBuf {
  if let Some(dir) = &config.base_dir_override {
    return dir.clone();
  }
  match std::env::var("TMPDIR") {
    Ok(tmpdir) if !tmpdir.is_empty() => PathBuf::from(tmpdir),
    _ => PathBuf::from("/tmp"),
  }
}

/// Best-effort scan of `basedir` for our own backing files whose embedded
/// pid is no longer alive. Failures are logged and otherwise ignored.
fn sweep_stale_segments(basedir: &Path) {
  let entries = match fs::read_dir(basedir) {
    Ok(entries) => entries,
    Err(e) => {
      log::warn!("stale segment sweep: could not scan {basedir:?}: {e}");
      return;
    }
  };
  for entry in entries.flatten() {
    let name = entry.file_name();
    let name = name.to_string_lossy();
    if !name.starts_with(FILE_PREFIX) {
      continue;
    }
    let Some(pid_str) = name.rsplit('-').next() else {
      continue;
    };
    let Ok(pid) = pid_str.parse::<i32>() else {
      continue;
    };
    if kill(Pid::from_raw(pid), None).is_ok() {
      continue;
    }
    match fs::remove_file(entry.path()) {
      Ok(()) => log::info!("stale segment sweep: removed {:?} (dead pid {pid})", entry.path()),
      Err(e) => log::warn!("stale segment sweep: failed to remove {:?}: {e}", entry.path()),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn tracker_mut_creates_then_reuses_the_same_tracker() {
    let mut registry = Registry::new(Config::default(), "host0");
    registry.tracker_mut("nsA");
    assert!(registry.tracker("nsA").is_some());
    assert!(registry.tracker("nsB").is_none());
  }

  #[test]
  fn shutdown_clears_all_trackers() {
    let mut registry = Registry::new(Config::default(), "host0");
    registry.tracker_mut("nsA");
    registry.shutdown();
    assert!(registry.tracker("nsA").is_none());
  }

  #[test]
  fn stale_sweep_removes_dead_pid_but_keeps_live_pid() {
    let dir = tempfile::tempdir().unwrap();
    let dead_pid_path = dir.path().join(format!("{FILE_PREFIX}-h-ns0-job-999999"));
    let live_pid_path = dir.path().join(format!("{FILE_PREFIX}-h-ns0-modex-{}", std::process::id()));
    fs::write(&dead_pid_path, b"").unwrap();
    fs::write(&live_pid_path, b"").unwrap();

    let config = Config::builder()
      .base_dir_override(Some(dir.path().to_path_buf()))
      .sweep_stale_segments_on_init(true)
      .build();
    let _registry = Registry::new(config, "h");

    assert!(!dead_pid_path.exists());
    assert!(live_pid_path.exists());
  }
}
