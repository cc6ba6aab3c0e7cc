use super::types::{SubUnit, WorkUnit};

use std::ops::Range;

/// Splits `size` values into contiguous ranges of `threshold` values.
///
/// Yields `ceil(size / threshold)` ranges; only the last one may be shorter.
/// Returns nothing when `size <= threshold` (or `threshold == 0`): such units
/// are combined directly and never partitioned.
pub fn partition(size: usize, threshold: usize) -> Vec<Range<usize>> {
    if threshold == 0 || size <= threshold {
        return Vec::new();
    }

    let count = size.div_ceil(threshold);
    (0..count)
        .map(|i| {
            let offset = i * threshold;
            offset..(offset + threshold).min(size)
        })
        .collect()
}

/// Cuts `unit` into sub-units along `partition`. Each sub-unit keeps the
/// parent's threshold.
pub fn split(unit: &WorkUnit) -> Vec<SubUnit> {
    partition(unit.values.len(), unit.threshold as usize)
        .into_iter()
        .map(|range| SubUnit {
            offset: range.start,
            unit: WorkUnit::new(unit.values[range].to_vec(), unit.threshold),
        })
        .collect()
}
