use opmd_types::{volume, Extent, Offset};

/// Rank (or subfile index) that produced a chunk; `0` means unknown.
pub type SourceId = u32;

/// A contiguous rectangular sub-region of a dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkInfo {
    pub offset: Offset,
    pub extent: Extent,
}

impl ChunkInfo {
    pub fn new(offset: impl Into<Offset>, extent: impl Into<Extent>) -> Self {
        Self {
            offset: offset.into(),
            extent: extent.into(),
        }
    }

    pub fn rank(&self) -> usize {
        self.offset.len()
    }

    pub fn volume(&self) -> u64 {
        volume(&self.extent)
    }
}

/// A [`ChunkInfo`] plus the id of whoever produced (or, after assignment,
/// should consume) it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenChunkInfo {
    pub chunk: ChunkInfo,
    pub source_id: SourceId,
}

impl WrittenChunkInfo {
    pub fn new(offset: impl Into<Offset>, extent: impl Into<Extent>, source_id: SourceId) -> Self {
        Self {
            chunk: ChunkInfo::new(offset, extent),
            source_id,
        }
    }
}

impl From<ChunkInfo> for WrittenChunkInfo {
    fn from(chunk: ChunkInfo) -> Self {
        Self { chunk, source_id: 0 }
    }
}

/// The pieces of one logical dataset that physically exist.
///
/// Invariant: chunks of one table do not overlap.
pub type ChunkTable = Vec<WrittenChunkInfo>;

/// Clip `chunk` to `within`, axis by axis.
///
/// Returns `None` when any axis clips to zero extent: a partially covered
/// chunk shrinks, a disjoint chunk drops.
pub fn intersection(chunk: &ChunkInfo, within: &ChunkInfo) -> Option<ChunkInfo> {
    debug_assert_eq!(chunk.rank(), within.rank());

    let mut offset = chunk.offset.clone();
    let mut extent = chunk.extent.clone();
    for i in 0..offset.len() {
        if offset[i] < within.offset[i] {
            let delta = within.offset[i] - offset[i];
            offset[i] = within.offset[i];
            extent[i] = extent[i].saturating_sub(delta);
        }
        let end = offset[i] + extent[i];
        let within_end = within.offset[i] + within.extent[i];
        if end > within_end {
            let delta = end - within_end;
            extent[i] = extent[i].saturating_sub(delta);
        }
        if extent[i] == 0 {
            return None;
        }
    }
    Some(ChunkInfo { offset, extent })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(offset: &[u64], extent: &[u64]) -> ChunkInfo {
        ChunkInfo::new(Offset::from_slice(offset), Extent::from_slice(extent))
    }

    #[test]
    fn clipping() {
        let within = chunk(&[2, 0], &[4, 10]);

        // fully inside
        assert_eq!(
            intersection(&chunk(&[3, 1], &[2, 2]), &within),
            Some(chunk(&[3, 1], &[2, 2]))
        );
        // clipped on the low side of axis 0
        assert_eq!(
            intersection(&chunk(&[0, 0], &[4, 2]), &within),
            Some(chunk(&[2, 0], &[2, 2]))
        );
        // clipped on the high side of axis 0
        assert_eq!(
            intersection(&chunk(&[5, 0], &[4, 2]), &within),
            Some(chunk(&[5, 0], &[1, 2]))
        );
        // disjoint in axis 0 drops entirely, regardless of axis 1
        assert_eq!(intersection(&chunk(&[6, 0], &[4, 2]), &within), None);
        assert_eq!(intersection(&chunk(&[0, 0], &[2, 10]), &within), None);
    }
}
