// distance.rs - Allelic profile dissimilarity

use crate::error::{NomenError, Result};
use rayon::prelude::*;

/// Distance reported when two profiles share no called locus.
pub const NO_OVERLAP_DISTANCE: f64 = 100.0;

/// Percentage of differing alleles over the loci called in both profiles.
///
/// A `0` allele means "no call" and the locus is ignored. Profiles with no
/// locus in common are maximally dissimilar.
pub fn distance(p1: &[i32], p2: &[i32]) -> f64 {
    debug_assert_eq!(p1.len(), p2.len());

    let mut n_common = 0usize;
    let mut n_same = 0usize;
    for (&a, &b) in p1.iter().zip(p2.iter()) {
        if a != 0 && b != 0 {
            n_common += 1;
            if a == b {
                n_same += 1;
            }
        }
    }

    if n_common == 0 {
        return NO_OVERLAP_DISTANCE;
    }
    100.0 * (n_common - n_same) as f64 / n_common as f64
}

/// Like [`distance`] but rejects profiles of different length.
pub fn checked_distance(p1: &[i32], p2: &[i32]) -> Result<f64> {
    if p1.len() != p2.len() {
        return Err(NomenError::ProfileLength {
            expected: p1.len(),
            actual: p2.len(),
        });
    }
    Ok(distance(p1, p2))
}

/// Distances from `query` to each profile of `others`, in input order.
pub fn distances_to<P>(query: &[i32], others: &[P]) -> Vec<f64>
where
    P: AsRef<[i32]> + Sync,
{
    others
        .par_iter()
        .map(|other| distance(query, other.as_ref()))
        .collect()
}

/// Fraction of called loci, rounded to two decimals.
pub fn presence_ratio(profile: &[i32]) -> f64 {
    if profile.is_empty() {
        return 0.0;
    }
    let present = profile.iter().filter(|&&a| a != 0).count();
    let ratio = present as f64 / profile.len() as f64;
    (ratio * 100.0).round() / 100.0
}
