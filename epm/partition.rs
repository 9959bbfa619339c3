//! Balanced partitioning of an index space into contiguous ranges.
//!
//! Used both to batch per-feature regressions across workers and to carve samples
//! into cross-validation folds.

use std::ops::Range;

/// Size of every part except the last when `n` items are split into `parts` parts.
///
/// The base share is `n / parts`. Any remainder is spread across the first
/// `parts - 1` parts, and the final part absorbs whatever is left.
pub fn fold_step_size(n: usize, parts: usize) -> usize {
    if parts == 0 {
        return n;
    }
    let mut step = n / parts;
    let remainder = n % parts;
    if remainder > 0 && parts > 1 {
        step += remainder / (parts - 1);
    }
    step
}

/// Splits `0..n` into at most `parts` contiguous, non-empty ranges.
///
/// The first `parts - 1` ranges hold [`fold_step_size`] items each (clamped to at
/// least one), and the last range holds the rest. Empty trailing ranges are dropped.
pub fn balanced_ranges(n: usize, parts: usize) -> Vec<Range<usize>> {
    if n == 0 {
        return Vec::new();
    }
    let parts = parts.max(1);
    let step = fold_step_size(n, parts).max(1);

    let mut ranges = Vec::with_capacity(parts);
    let mut start = 0usize;
    for part in 0..parts {
        if start >= n {
            break;
        }
        let end = if part + 1 == parts {
            n
        } else {
            (start + step).min(n)
        };
        ranges.push(start..end);
        start = end;
    }
    ranges
}
