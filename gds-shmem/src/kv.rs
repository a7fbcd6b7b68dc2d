//! The generic key/value type the RPC layer carries. Concrete enough to
//! drive every store/fetch path this crate implements, but not meant to be
//! a general-purpose value type for a full PMIx-style bfrops layer -- a host
//! with richer needs implements its own and only borrows [`WireCodec`](crate::blob::WireCodec).

/// One key/value pair as seen by the Publisher/Attacher/ModexStore.
#[derive(Debug, Clone, PartialEq)]
pub struct Kv {
  pub key: String,
  pub value: KvValue,
}

impl Kv {
  pub fn new(key: impl Into<String>, value: KvValue) -> Self {
    Self { key: key.into(), value }
  }
}

/// The value half of a [`Kv`].
///
/// `ProcData` models `PMIX_PROC_DATA` arrays: each element counts as one
/// entry toward hash-table sizing, unlike every other variant here which
/// counts as exactly one.
#[derive(Debug, Clone, PartialEq)]
pub enum KvValue {
  Str(String),
  U64(u64),
  Bytes(Vec<u8>),
  ProcData(Vec<Kv>),
  SessionInfo(Vec<Kv>),
  NodeInfo(Vec<Kv>),
  AppInfo(Vec<Kv>),
}

impl KvValue {
  /// Number of hash-table entries this value contributes when stored.
  /// Only `ProcData` arrays expand per-element; everything else is one key.
  pub fn entry_count(&self) -> usize {
    match self {
      KvValue::ProcData(entries) => entries.len(),
      _ => 1,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn plain_values_count_as_one_entry() {
    assert_eq!(KvValue::Str("x".into()).entry_count(), 1);
    assert_eq!(KvValue::U64(7).entry_count(), 1);
  }

  #[test]
  fn proc_data_counts_per_element() {
    let procs = vec![
      Kv::new("rank", KvValue::U64(0)),
      Kv::new("rank", KvValue::U64(1)),
      Kv::new("rank", KvValue::U64(2)),
    ];
    assert_eq!(KvValue::ProcData(procs).entry_count(), 3);
  }

  #[test]
  fn empty_proc_data_counts_as_zero_entries() {
    assert_eq!(KvValue::ProcData(Vec::new()).entry_count(), 0);
  }
}
