//! Operator tunables. Loaded from `GDS_SHMEM_*` environment variables --
//! there is no external config crate collaborator for this standalone
//! component, so environment variables are the ambient configuration
//! mechanism, matching how the teacher crate's builder types (`ArenaOptions`,
//! `MmapOptions`) are constructed programmatically and layered with defaults.

use std::env;
use std::path::PathBuf;

/// Priority returned when this module is explicitly requested.
pub const HIGH_PRIORITY: i32 = 100;
/// Priority returned when the caller expressed no preference.
pub const DEFAULT_PRIORITY: i32 = 50;

#[derive(Debug, Clone)]
pub struct Config {
  /// Multiplies every estimated segment size, on top of the fixed 2.5x
  /// fluff factor.
  pub segment_size_multiplier: f64,
  /// Runtime analogue of the source's compile-time `PMIX_GDS_SHMEM_DISABLE`.
  pub disabled: bool,
  /// Overrides the basedir priority chain in `gds_shmem_core::segment`.
  pub base_dir_override: Option<PathBuf>,
  /// Whether `Registry::new` sweeps stale backing files on startup.
  pub sweep_stale_segments_on_init: bool,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      segment_size_multiplier: 1.0,
      disabled: false,
      base_dir_override: None,
      sweep_stale_segments_on_init: true,
    }
  }
}

impl Config {
  pub fn builder() -> ConfigBuilder {
    ConfigBuilder::default()
  }

  /// Starts from defaults and applies any `GDS_SHMEM_*` overrides present
  /// in the environment. Unparseable values are logged and ignored.
  pub fn from_env() -> Self {
    let mut builder = Self::builder();
    if let Ok(value) = env::var("GDS_SHMEM_SEGMENT_SIZE_MULTIPLIER") {
      match value.parse() {
        Ok(parsed) => builder = builder.segment_size_multiplier(parsed),
        Err(_) => log::warn!("ignoring invalid GDS_SHMEM_SEGMENT_SIZE_MULTIPLIER value '{value}'"),
      }
    }
    if let Ok(value) = env::var("GDS_SHMEM_DISABLED") {
      builder = builder.disabled(parse_bool(&value));
    }
    if let Ok(value) = env::var("GDS_SHMEM_BASE_DIR") {
      builder = builder.base_dir_override(Some(PathBuf::from(value)));
    }
    if let Ok(value) = env::var("GDS_SHMEM_SWEEP_STALE_SEGMENTS_ON_INIT") {
      builder = builder.sweep_stale_segments_on_init(parse_bool(&value));
    }
    builder.build()
  }
}

fn parse_bool(value: &str) -> bool {
  matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
  inner: Config,
}

impl ConfigBuilder {
  pub fn segment_size_multiplier(mut self, value: f64) -> Self {
    self.inner.segment_size_multiplier = value;
    self
  }

  pub fn disabled(mut self, value: bool) -> Self {
    self.inner.disabled = value;
    self
  }

  pub fn base_dir_override(mut self, value: Option<PathBuf>) -> Self {
    self.inner.base_dir_override = value;
    self
  }

  pub fn sweep_stale_segments_on_init(mut self, value: bool) -> Self {
    self.inner.sweep_stale_segments_on_init = value;
    self
  }

  pub fn build(self) -> Config {
    self.inner
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_match_spec() {
    let config = Config::default();
    assert_eq!(config.segment_size_multiplier, 1.0);
    assert!(!config.disabled);
    assert!(config.base_dir_override.is_none());
    assert!(config.sweep_stale_segments_on_init);
  }

  #[test]
  fn builder_overrides_defaults() {
    let config = Config::builder().disabled(true).segment_size_multiplier(2.0).build();
    assert!(config.disabled);
    assert_eq!(config.segment_size_multiplier, 2.0);
  }

  #[test]
  fn parse_bool_accepts_common_truthy_spellings() {
    for v in ["1", "true", "TRUE", "yes", "on"] {
      assert!(parse_bool(v), "expected '{v}' to parse truthy");
    }
    for v in ["0", "false", "no", "off", "garbage"] {
      assert!(!parse_bool(v), "expected '{v}' to parse falsy");
    }
  }
}
