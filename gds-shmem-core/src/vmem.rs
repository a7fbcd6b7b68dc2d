//! Finds a free virtual-address range for a segment's fixed mapping by
//! parsing `/proc/self/maps`, the same approach used elsewhere in the
//! example corpus for locating holes in a process's address space.

use std::fs;

use crate::error::{Error, Result};

/// Below this address lies the null page and typical low-memory reservations;
/// we never propose a base address under it.
const CANONICAL_LOW: u64 = 0x0001_0000_0000;
/// Just under the x86-64 canonical/non-canonical boundary, leaving headroom
/// below the kernel's own half of the address space.
const CANONICAL_HIGH: u64 = 0x0000_7fff_ffff_f000;

/// Returns the start address of the largest unmapped range in this
/// process's address space that is at least `min_bytes` long.
pub fn find_free_hole(min_bytes: usize) -> Result<usize> {
  let maps = fs::read_to_string("/proc/self/maps")?;
  let mut ranges: Vec<(u64, u64)> = Vec::new();
  for line in maps.lines() {
    let range_field = match line.split_whitespace().next() {
      Some(f) => f,
      None => continue,
    };
    let Some((start_s, end_s)) = range_field.split_once('-') else {
      continue;
    };
    let (Ok(start), Ok(end)) = (u64::from_str_radix(start_s, 16), u64::from_str_radix(end_s, 16))
    else {
      continue;
    };
    ranges.push((start, end));
  }
  ranges.sort_unstable();

  let min_bytes = min_bytes as u64;
  let mut best: Option<(u64, u64)> = None;
  let mut prev_end = CANONICAL_LOW;
  for (start, end) in ranges {
    if start > prev_end {
      let gap = start - prev_end;
      if gap >= min_bytes && best.map_or(true, |(_, best_gap)| gap > best_gap) {
        best = Some((prev_end, gap));
      }
    }
    prev_end = prev_end.max(end);
  }
  if CANONICAL_HIGH > prev_end {
    let gap = CANONICAL_HIGH - prev_end;
    if gap >= min_bytes && best.map_or(true, |(_, best_gap)| gap > best_gap) {
      best = Some((prev_end, gap));
    }
  }

  best
    .map(|(start, _)| start as usize)
    .ok_or(Error::ResourceExhaustion { requested: min_bytes as usize })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn finds_a_hole_for_a_small_request() {
    let addr = find_free_hole(4096).expect("this process always has some free space");
    assert!(addr as u64 >= CANONICAL_LOW);
  }

  #[test]
  fn rejects_an_impossibly_large_request() {
    let result = find_free_hole(usize::MAX / 2);
    assert!(matches!(result, Err(Error::ResourceExhaustion { .. })));
  }
}
