use smallvec::SmallVec;

use crate::{Error, Result};

/// Shape of an n-dimensional dataset or chunk, one entry per dimension.
///
/// Inline capacity of 7 covers the openPMD unit-dimension septuple and every
/// realistic mesh rank without a heap allocation.
pub type Extent = SmallVec<[u64; 7]>;

/// Start of a chunk within a dataset, one entry per dimension.
pub type Offset = SmallVec<[u64; 7]>;

/// Maximum dataset rank any backend is required to support.
pub const MAX_RANK: usize = 32;

/// Number of elements covered by an extent.
pub fn volume(extent: &[u64]) -> u64 {
    extent.iter().product()
}

/// Verify that `offset + extent` selects a region inside `total`.
///
/// All three must share the dataset's rank.
pub fn bounds_check(offset: &[u64], extent: &[u64], total: &[u64]) -> Result<()> {
    if offset.len() != total.len() || extent.len() != total.len() {
        return Err(Error::usage(format!(
            "rank mismatch: dataset has rank {}, request has offset rank {} and extent rank {}",
            total.len(),
            offset.len(),
            extent.len()
        )));
    }
    for (dim, ((&o, &e), &t)) in offset.iter().zip(extent).zip(total).enumerate() {
        if o.checked_add(e).map_or(true, |end| end > t) {
            return Err(Error::usage(format!(
                "out-of-bounds access in dimension {dim}: offset {o} + extent {e} exceeds dataset extent {t}"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_of_empty_extent_is_one() {
        // A rank-0 dataset holds exactly one element.
        assert_eq!(volume(&[]), 1);
        assert_eq!(volume(&[4, 3]), 12);
        assert_eq!(volume(&[4, 0]), 0);
    }

    #[test]
    fn bounds() {
        assert!(bounds_check(&[0], &[4], &[4]).is_ok());
        assert!(bounds_check(&[1], &[4], &[4]).is_err());
        assert!(bounds_check(&[0, 0], &[4], &[4]).is_err());
        // overflow must not wrap
        assert!(bounds_check(&[u64::MAX], &[2], &[4]).is_err());
    }
}
