//! Module glue: priority negotiation and the namespace lifecycle entry
//! points a host runtime calls into. Wraps a [`Registry`] plus the
//! Publisher/Attacher/ModexStore free functions behind one handle so a host
//! only needs to keep track of a single object per process.

use crate::attacher::Attacher;
use crate::collaborators::KeyFetcher;
use crate::config::{Config, DEFAULT_PRIORITY, HIGH_PRIORITY};
use crate::error::Result;
use crate::kv::Kv;
use crate::modex::ModexStore;
use crate::publisher::Publisher;
use crate::registry::Registry;

/// This module's own name, as presented to the host runtime's component
/// selection machinery.
pub const MODULE_NAME: &str = "shmem";

/// Per-process handle: one `Registry`, reused across every namespace this
/// process touches. Not thread-safe -- see `SPEC_FULL.md` §5.
pub struct GdsShmemComponent {
  pub registry: Registry,
}

impl GdsShmemComponent {
  pub fn new(config: Config, host: impl Into<String>) -> Self {
    Self { registry: Registry::new(config, host) }
  }

  /// Priority this module offers for the current selection round. Returns
  /// 0 unconditionally when `Config::disabled`; returns [`HIGH_PRIORITY`]
  /// when explicitly named in `desired`; returns 0 when `desired` is
  /// non-empty and does not name this module; otherwise returns
  /// [`DEFAULT_PRIORITY`].
  pub fn assign_module(&self, desired: &[String]) -> i32 {
    if self.registry.config.disabled {
      return 0;
    }
    if desired.iter().any(|name| name == MODULE_NAME) {
      return HIGH_PRIORITY;
    }
    if !desired.is_empty() {
      return 0;
    }
    DEFAULT_PRIORITY
  }

  /// Registers a newly connected local peer for `nsid`, publishing (or
  /// reusing a cached) connection-info blob.
  pub fn register_local_peer(&mut self, nsid: &str, fetcher: &dyn KeyFetcher, n_local_procs: usize) -> Result<Vec<u8>> {
    Publisher::register_local_peer(&mut self.registry, nsid, fetcher, n_local_procs)
  }

  /// Client-side: attaches every segment advertised in `reply`.
  pub fn attach_reply(&mut self, reply: &[u8]) -> Result<()> {
    Attacher::attach_reply(&mut self.registry, reply)
  }

  /// Stores one fence's worth of remote keys for `nsid`, lazily creating
  /// the modex segment on the first call.
  pub fn store_modex(&mut self, nsid: &str, n_peers: usize, remote_keys: &[Kv]) -> Result<()> {
    ModexStore::store_fence_data(&mut self.registry, nsid, n_peers, remote_keys)
  }

  /// Removes the tracker for `nsid`; its `Drop` tears down both segments.
  pub fn delete_namespace(&mut self, nsid: &str) {
    self.registry.delete_namespace(nsid);
  }

  /// Destroys every tracker this process holds.
  pub fn shutdown(&mut self) {
    self.registry.shutdown();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::collaborators::StaticKeyFetcher;
  use crate::kv::KvValue;

  #[test]
  fn named_module_gets_high_priority() {
    let component = GdsShmemComponent::new(Config::default(), "host0");
    assert_eq!(component.assign_module(&["shmem".to_string()]), HIGH_PRIORITY);
  }

  #[test]
  fn other_module_named_gets_zero() {
    let component = GdsShmemComponent::new(Config::default(), "host0");
    assert_eq!(component.assign_module(&["ds12".to_string()]), 0);
  }

  #[test]
  fn no_preference_gets_default_priority() {
    let component = GdsShmemComponent::new(Config::default(), "host0");
    assert_eq!(component.assign_module(&[]), DEFAULT_PRIORITY);
  }

  #[test]
  fn disabled_always_returns_zero() {
    let config = Config::builder().disabled(true).build();
    let component = GdsShmemComponent::new(config, "host0");
    assert_eq!(component.assign_module(&["shmem".to_string()]), 0);
    assert_eq!(component.assign_module(&[]), 0);
  }

  #[test]
  fn delete_namespace_tears_down_registered_segments() {
    // Own basedir: this test is the only one in this module that touches the
    // filesystem/vmem (via `register_local_peer`), but `cargo test` still
    // runs it concurrently with everything else, so it must not share
    // `/tmp` with another test's segment creation.
    let dir = tempfile::tempdir().unwrap();
    let config = Config::builder().base_dir_override(Some(dir.path().to_path_buf())).build();
    let mut component = GdsShmemComponent::new(config, "host0");
    let fetcher = StaticKeyFetcher::new(vec![Kv::new("k1", KvValue::Str("v1".into()))]);
    component.register_local_peer("nsA", &fetcher, 1).unwrap();
    assert!(component.registry.tracker("nsA").is_some());

    component.delete_namespace("nsA");
    assert!(component.registry.tracker("nsA").is_none());
  }
}
