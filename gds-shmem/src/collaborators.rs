//! Narrow traits modeling the out-of-scope collaborators this crate does
//! not own: the host's local key store and, elsewhere, its RPC framing.
//! A host application supplies its own implementation; this crate only
//! needs enough of a contract to drive `Publisher`.

use crate::error::Result;
use crate::kv::Kv;

/// Fetches every job-level key for a namespace. Interface-only -- a host
/// RPC layer owns the real local key store.
pub trait KeyFetcher {
  fn fetch_job_keys(&self, nspace_id: &str) -> Result<Vec<Kv>>;
}

/// A fixed-response `KeyFetcher`, for exercising `Publisher` without a real
/// host runtime. Gated behind `test-support` since integration tests link
/// this crate without `cfg(test)`.
#[cfg(any(test, feature = "test-support"))]
pub struct StaticKeyFetcher {
  pub keys: Vec<Kv>,
}

#[cfg(any(test, feature = "test-support"))]
impl StaticKeyFetcher {
  pub fn new(keys: Vec<Kv>) -> Self {
    Self { keys }
  }
}

#[cfg(any(test, feature = "test-support"))]
impl KeyFetcher for StaticKeyFetcher {
  fn fetch_job_keys(&self, _nspace_id: &str) -> Result<Vec<Kv>> {
    Ok(self.keys.clone())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::kv::KvValue;

  #[test]
  fn static_fetcher_returns_fixed_keys_regardless_of_namespace() {
    let fetcher = StaticKeyFetcher::new(vec![Kv::new("k1", KvValue::Str("v1".into()))]);
    assert_eq!(fetcher.fetch_job_keys("nsA").unwrap(), fetcher.fetch_job_keys("nsB").unwrap());
  }
}
