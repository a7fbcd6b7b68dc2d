//! Pack/unpack codec for generic `Kv` entries and the five-field
//! connection-info blob built on top of it.
//!
//! The wire format is a flat tag-length-value encoding: Section markers are
//! avoided in favor of a trailing "read past end of buffer" convention,
//! which both the `Kv` stream and the connection-info blob rely on for
//! termination.

use std::path::PathBuf;

use gds_shmem_core::Role;

use crate::error::{Error, Result};
use crate::kv::{Kv, KvValue};

const TAG_STR: u8 = 0;
const TAG_U64: u8 = 1;
const TAG_BYTES: u8 = 2;
const TAG_PROC_DATA: u8 = 3;
const TAG_SESSION_INFO: u8 = 4;
const TAG_NODE_INFO: u8 = 5;
const TAG_APP_INFO: u8 = 6;

pub const KEY_NSPACEID: &str = "PMIX_GDS_SHMEM_NSPACEID";
pub const KEY_SMSEGID: &str = "PMIX_GDS_SHMEM_SMSEGID";
pub const KEY_SEG_PATH: &str = "PMIX_GDS_SHMEM_SEG_PATH";
pub const KEY_SEG_SIZE: &str = "PMIX_GDS_SHMEM_SEG_SIZE";
pub const KEY_SEG_ADDR: &str = "PMIX_GDS_SHMEM_SEG_ADDR";

/// Outer reply-buffer key carrying one packed [`ConnectionInfo`] per
/// `READY_FOR_USE` role.
pub const KEY_SEG_BLOB: &str = "PMIX_GDS_SHMEM_SEG_BLOB";
/// Outer reply-buffer keys the Attacher recognizes and silently skips -- the
/// server has already stored the corresponding arrays into the segment.
pub const KEY_SESSION_INFO_ARRAY: &str = "SESSION_INFO_ARRAY";
pub const KEY_NODE_INFO_ARRAY: &str = "NODE_INFO_ARRAY";
pub const KEY_APP_INFO_ARRAY: &str = "APP_INFO_ARRAY";

/// Pack/unpack contract for `Kv` streams. Split out as a trait so a host
/// with a richer bfrops-style codec can substitute its own.
pub trait WireCodec {
  fn pack(kvs: &[Kv]) -> Vec<u8>;
  fn unpack_next(buf: &[u8], pos: &mut usize) -> Result<Option<Kv>>;
}

/// The concrete codec used throughout this crate.
pub struct DefaultWireCodec;

impl WireCodec for DefaultWireCodec {
  fn pack(kvs: &[Kv]) -> Vec<u8> {
    let mut buf = Vec::new();
    for kv in kvs {
      encode_entry(&mut buf, kv);
    }
    buf
  }

  fn unpack_next(buf: &[u8], pos: &mut usize) -> Result<Option<Kv>> {
    if *pos >= buf.len() {
      return Ok(None);
    }
    decode_entry(buf, pos).map(Some)
  }
}

fn encode_entry(buf: &mut Vec<u8>, kv: &Kv) {
  let key_bytes = kv.key.as_bytes();
  buf.extend_from_slice(&(key_bytes.len() as u32).to_le_bytes());
  buf.extend_from_slice(key_bytes);
  encode_value(buf, &kv.value);
}

fn encode_value(buf: &mut Vec<u8>, value: &KvValue) {
  match value {
    KvValue::Str(s) => {
      buf.push(TAG_STR);
      let bytes = s.as_bytes();
      buf.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
      buf.extend_from_slice(bytes);
    }
    KvValue::U64(n) => {
      buf.push(TAG_U64);
      buf.extend_from_slice(&n.to_le_bytes());
    }
    KvValue::Bytes(bytes) => {
      buf.push(TAG_BYTES);
      buf.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
      buf.extend_from_slice(bytes);
    }
    KvValue::ProcData(entries) => encode_nested(buf, TAG_PROC_DATA, entries),
    KvValue::SessionInfo(entries) => encode_nested(buf, TAG_SESSION_INFO, entries),
    KvValue::NodeInfo(entries) => encode_nested(buf, TAG_NODE_INFO, entries),
    KvValue::AppInfo(entries) => encode_nested(buf, TAG_APP_INFO, entries),
  }
}

/// Encodes a single value with the same tagging `encode_value` uses, for
/// callers (the Publisher's container stores, the ModexStore) that need to
/// persist one `KvValue` as an arena-backed payload without a surrounding
/// key.
pub fn pack_value(value: &KvValue) -> Vec<u8> {
  let mut buf = Vec::new();
  encode_value(&mut buf, value);
  buf
}

fn encode_nested(buf: &mut Vec<u8>, tag: u8, entries: &[Kv]) {
  buf.push(tag);
  buf.extend_from_slice(&(entries.len() as u32).to_le_bytes());
  for entry in entries {
    encode_entry(buf, entry);
  }
}

fn take(buf: &[u8], pos: &mut usize, len: usize) -> Result<&[u8]> {
  let end = pos.checked_add(len).filter(|&e| e <= buf.len());
  match end {
    Some(end) => {
      let slice = &buf[*pos..end];
      *pos = end;
      Ok(slice)
    }
    None => Err(Error::ProtocolViolation("buffer truncated mid-entry".into())),
  }
}

fn take_u32(buf: &[u8], pos: &mut usize) -> Result<u32> {
  let bytes = take(buf, pos, 4)?;
  Ok(u32::from_le_bytes(bytes.try_into().expect("take(4) returns exactly 4 bytes")))
}

fn decode_entry(buf: &[u8], pos: &mut usize) -> Result<Kv> {
  let key_len = take_u32(buf, pos)? as usize;
  let key_bytes = take(buf, pos, key_len)?;
  let key = String::from_utf8(key_bytes.to_vec())
    .map_err(|_| Error::ProtocolViolation("key is not valid utf-8".into()))?;
  let value = decode_value(buf, pos)?;
  Ok(Kv::new(key, value))
}

fn decode_value(buf: &[u8], pos: &mut usize) -> Result<KvValue> {
  let tag = *take(buf, pos, 1)?.first().expect("take(1) returns exactly 1 byte");
  match tag {
    TAG_STR => {
      let len = take_u32(buf, pos)? as usize;
      let bytes = take(buf, pos, len)?;
      let s = String::from_utf8(bytes.to_vec())
        .map_err(|_| Error::ProtocolViolation("string value is not valid utf-8".into()))?;
      Ok(KvValue::Str(s))
    }
    TAG_U64 => {
      let bytes = take(buf, pos, 8)?;
      Ok(KvValue::U64(u64::from_le_bytes(bytes.try_into().expect("take(8) returns exactly 8 bytes"))))
    }
    TAG_BYTES => {
      let len = take_u32(buf, pos)? as usize;
      Ok(KvValue::Bytes(take(buf, pos, len)?.to_vec()))
    }
    TAG_PROC_DATA => Ok(KvValue::ProcData(decode_nested(buf, pos)?)),
    TAG_SESSION_INFO => Ok(KvValue::SessionInfo(decode_nested(buf, pos)?)),
    TAG_NODE_INFO => Ok(KvValue::NodeInfo(decode_nested(buf, pos)?)),
    TAG_APP_INFO => Ok(KvValue::AppInfo(decode_nested(buf, pos)?)),
    other => Err(Error::ProtocolViolation(format!("unknown value tag {other}"))),
  }
}

fn decode_nested(buf: &[u8], pos: &mut usize) -> Result<Vec<Kv>> {
  let count = take_u32(buf, pos)? as usize;
  let mut entries = Vec::with_capacity(count);
  for _ in 0..count {
    entries.push(decode_entry(buf, pos)?);
  }
  Ok(entries)
}

/// The five fields exchanged to let a client attach a segment at the
/// server's chosen address.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionInfo {
  pub nspace_id: String,
  pub role: Role,
  pub seg_path: PathBuf,
  pub seg_size: usize,
  pub seg_addr: usize,
}

/// Packs a [`ConnectionInfo`] as five string-valued `Kv` entries.
pub fn pack_connection_info(info: &ConnectionInfo) -> Vec<u8> {
  let kvs = vec![
    Kv::new(KEY_NSPACEID, KvValue::Str(info.nspace_id.clone())),
    Kv::new(KEY_SMSEGID, KvValue::Str((role_to_index(info.role)).to_string())),
    Kv::new(KEY_SEG_PATH, KvValue::Str(info.seg_path.to_string_lossy().into_owned())),
    Kv::new(KEY_SEG_SIZE, KvValue::Str(format!("{:x}", info.seg_size))),
    Kv::new(KEY_SEG_ADDR, KvValue::Str(format!("{:x}", info.seg_addr))),
  ];
  DefaultWireCodec::pack(&kvs)
}

/// Unpacks a [`ConnectionInfo`], requiring exactly the five recognized
/// keys. Any other key, or a missing field at end-of-buffer, is a hard
/// `Error::ProtocolViolation`.
pub fn unpack_connection_info(buf: &[u8]) -> Result<ConnectionInfo> {
  let mut pos = 0usize;
  let mut nspace_id = None;
  let mut role = None;
  let mut seg_path = None;
  let mut seg_size = None;
  let mut seg_addr = None;

  while let Some(kv) = DefaultWireCodec::unpack_next(buf, &mut pos)? {
    let KvValue::Str(value) = kv.value else {
      return Err(Error::ProtocolViolation(format!("key '{}' did not carry a string value", kv.key)));
    };
    match kv.key.as_str() {
      KEY_NSPACEID => nspace_id = Some(value),
      KEY_SMSEGID => role = Some(index_to_role(&value)?),
      KEY_SEG_PATH => seg_path = Some(PathBuf::from(value)),
      KEY_SEG_SIZE => {
        seg_size = Some(usize::from_str_radix(&value, 16).map_err(|_| {
          Error::ProtocolViolation(format!("seg_size '{value}' is not valid hex"))
        })?)
      }
      KEY_SEG_ADDR => {
        seg_addr = Some(usize::from_str_radix(&value, 16).map_err(|_| {
          Error::ProtocolViolation(format!("seg_addr '{value}' is not valid hex"))
        })?)
      }
      other => return Err(Error::ProtocolViolation(format!("unrecognized connection-info key '{other}'"))),
    }
  }

  Ok(ConnectionInfo {
    nspace_id: nspace_id.ok_or_else(|| Error::ProtocolViolation("missing nspace id".into()))?,
    role: role.ok_or_else(|| Error::ProtocolViolation("missing role".into()))?,
    seg_path: seg_path.ok_or_else(|| Error::ProtocolViolation("missing segment path".into()))?,
    seg_size: seg_size.ok_or_else(|| Error::ProtocolViolation("missing segment size".into()))?,
    seg_addr: seg_addr.ok_or_else(|| Error::ProtocolViolation("missing segment address".into()))?,
  })
}

fn role_to_index(role: Role) -> u8 {
  match role {
    Role::Job => 0,
    Role::Modex => 1,
    Role::Invalid => 2,
  }
}

fn index_to_role(value: &str) -> Result<Role> {
  match value {
    "0" => Ok(Role::Job),
    "1" => Ok(Role::Modex),
    "2" => Ok(Role::Invalid),
    other => Err(Error::ProtocolViolation(format!("invalid role id '{other}'"))),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn kv_stream_round_trips() {
    let kvs = vec![
      Kv::new("k1", KvValue::Str("v1".into())),
      Kv::new("k2", KvValue::U64(42)),
      Kv::new(
        "procs",
        KvValue::ProcData(vec![Kv::new("rank", KvValue::U64(0)), Kv::new("rank", KvValue::U64(1))]),
      ),
    ];
    let packed = DefaultWireCodec::pack(&kvs);
    let mut pos = 0;
    let mut decoded = Vec::new();
    while let Some(kv) = DefaultWireCodec::unpack_next(&packed, &mut pos).unwrap() {
      decoded.push(kv);
    }
    assert_eq!(decoded, kvs);
  }

  #[test]
  fn connection_info_round_trips() {
    let info = ConnectionInfo {
      nspace_id: "nsA".into(),
      role: Role::Job,
      seg_path: PathBuf::from("/tmp/gds-shmem-host-nsA-job-123"),
      seg_size: 0x4000,
      seg_addr: 0x7f0000000000,
    };
    let packed = pack_connection_info(&info);
    let unpacked = unpack_connection_info(&packed).unwrap();
    assert_eq!(info, unpacked);
  }

  #[test]
  fn unknown_key_is_protocol_violation() {
    let kvs = vec![Kv::new("FOO", KvValue::Str("bar".into()))];
    let packed = DefaultWireCodec::pack(&kvs);
    assert!(matches!(unpack_connection_info(&packed), Err(Error::ProtocolViolation(_))));
  }

  #[test]
  fn missing_field_is_protocol_violation() {
    let kvs = vec![Kv::new(KEY_NSPACEID, KvValue::Str("nsA".into()))];
    let packed = DefaultWireCodec::pack(&kvs);
    assert!(matches!(unpack_connection_info(&packed), Err(Error::ProtocolViolation(_))));
  }
}
