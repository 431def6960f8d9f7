//! Multidirectional broadcast rules for binary operators.

use crate::{Error, Result};

/// Compute the broadcast output shape from two input shapes.
///
/// Dimensions align from the trailing axis and are compatible if they are
/// equal, if either is 1, or if one side has no corresponding axis.
///
/// # Example
///
/// ```text
/// broadcast_shape(&[8, 1, 6], &[7, 1, 5, 6]) -> [7, 8, 5, 6]
/// broadcast_shape(&[2, 3, 4], &[3, 4])       -> [2, 3, 4]
/// broadcast_shape(&[3, 4], &[4, 5])          -> error
/// ```
pub fn broadcast_shape(a: &[usize], b: &[usize]) -> Result<Vec<usize>> {
    let max_rank = a.len().max(b.len());
    let mut result = Vec::with_capacity(max_rank);

    for i in 0..max_rank {
        let da = if i < max_rank - a.len() {
            1
        } else {
            a[i - (max_rank - a.len())]
        };
        let db = if i < max_rank - b.len() {
            1
        } else {
            b[i - (max_rank - b.len())]
        };

        if da == db {
            result.push(da);
        } else if da == 1 {
            result.push(db);
        } else if db == 1 {
            result.push(da);
        } else {
            return Err(Error::Shape(format!(
                "cannot broadcast shapes {:?} and {:?} at dimension {i}",
                a, b
            )));
        }
    }

    Ok(result)
}

/// Pad a shape with leading 1s to the given rank (trailing-axis alignment).
pub fn align_rank(shape: &[usize], rank: usize) -> Vec<usize> {
    let mut aligned = vec![1usize; rank.saturating_sub(shape.len())];
    aligned.extend_from_slice(shape);
    aligned
}
