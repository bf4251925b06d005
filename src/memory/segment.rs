//! Tracks which guest address ranges have been decoded into a
//! [`DecodedSegment`](crate::decoder::DecodedSegment), and re-decodes a range when the
//! underlying bytes change under it (self-modifying code, spec.md §4.2 Open Question: this
//! core takes the conservative, always-correct approach and re-decodes on any write to an
//! executable page rather than trying to detect which writes actually touch code).

use crate::decoder::{DecodedSegment, SegmentId};
use rangemap::RangeMap;
use std::collections::HashMap;

/// Owns every [`DecodedSegment`] built so far and the address-range index used to find the
/// segment (if any) containing a given PC.
#[derive(Default)]
pub struct SegmentRegistry {
    segments: HashMap<SegmentId, DecodedSegment>,
    ranges: RangeMap<u64, SegmentId>,
    next_id: u32,
}

impl SegmentRegistry {
    pub fn new() -> Self {
        SegmentRegistry {
            segments: HashMap::new(),
            ranges: RangeMap::new(),
            next_id: 0,
        }
    }

    /// Decodes `bytes` as the executable contents of `[begin, begin + bytes.len())` and
    /// registers the result, replacing any existing segment that overlaps the range.
    pub fn insert(
        &mut self,
        begin: u64,
        bytes: &[u8],
        compressed_enabled: bool,
    ) -> Result<SegmentId, crate::Error> {
        let end = begin + bytes.len() as u64;
        self.invalidate_range(begin, end);

        let id = SegmentId(self.next_id);
        self.next_id += 1;
        let segment = DecodedSegment::decode(id, begin, bytes, compressed_enabled)?;
        log::trace!("decoded segment {:?} at {:#x}..{:#x} ({} bytes)", id, begin, end, bytes.len());
        self.ranges.insert(begin..end, id);
        self.segments.insert(id, segment);
        Ok(id)
    }

    /// Removes every segment overlapping `[begin, end)`. Called both when re-decoding a
    /// changed range and when the memory subsystem frees or unmaps the underlying pages.
    pub fn invalidate_range(&mut self, begin: u64, end: u64) {
        let stale: Vec<SegmentId> = self
            .ranges
            .overlapping(begin..end)
            .map(|(_, id)| *id)
            .collect();
        self.ranges.remove(begin..end);
        for id in stale {
            self.segments.remove(&id);
        }
    }

    /// Looks up the segment containing `addr`, if any has been decoded.
    pub fn segment_containing(&self, addr: u64) -> Option<&DecodedSegment> {
        let id = self.ranges.get(&addr)?;
        self.segments.get(id)
    }

    /// Looks up a segment by id.
    pub fn get(&self, id: SegmentId) -> Option<&DecodedSegment> {
        self.segments.get(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_lookup_by_address() {
        let mut reg = SegmentRegistry::new();
        let bytes = 0x0000_0013u32.to_le_bytes().to_vec(); // addi x0, x0, 0
        let id = reg.insert(0x1000, &bytes, false).unwrap();
        assert!(reg.segment_containing(0x1000).is_some());
        assert_eq!(reg.get(id).unwrap().begin, 0x1000);
    }

    #[test]
    fn reinsert_invalidates_overlapping_segment() {
        let mut reg = SegmentRegistry::new();
        let bytes = 0x0000_0013u32.to_le_bytes().to_vec();
        reg.insert(0x1000, &bytes, false).unwrap();
        reg.insert(0x1000, &bytes, false).unwrap();
        assert!(reg.segment_containing(0x1000).is_some());
    }
}
