//! Utility functions and types used throughout pagestep.
//!
//! This module provides:
//! - Constants for page arithmetic ([`PAGE_SIZE`], [`PAGE_MASK`], etc.)
//! - Progress reporting utilities ([`NamedProgress`])
//! - [`median`] for summarizing timing samples

mod constants;
mod named_progress;

pub use self::constants::*;
pub use self::named_progress::NamedProgress;

use itertools::Itertools;

/// Returns the median of `samples`, or `None` if there are none.
///
/// For an even number of samples the upper median is returned, matching
/// `sorted[len / 2]`.
///
/// # Examples
///
/// ```
/// use pagestep_core::util::median;
///
/// assert_eq!(median(&[5, 1, 3]), Some(3));
/// assert_eq!(median(&[4, 1, 3, 2]), Some(3));
/// assert_eq!(median::<u64>(&[]), None);
/// ```
pub fn median<T: Ord + Copy>(samples: &[T]) -> Option<T> {
    if samples.is_empty() {
        return None;
    }
    let sorted = samples.iter().copied().sorted().collect_vec();
    Some(sorted[sorted.len() / 2])
}
