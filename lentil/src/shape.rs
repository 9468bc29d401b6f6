//! Shape inference shared by the distributions.
//!
//! Batch and event shapes are worked out once, when a distribution is
//! built, and every later `log_prob` call checks its argument against them
//! with the helpers below.

use crate::error::{PplError, Result};

/// Numpy-style broadcast of two shapes.
pub fn broadcast_shapes(op: &'static str, lhs: &[usize], rhs: &[usize]) -> Result<Vec<usize>> {
    let rank = lhs.len().max(rhs.len());
    let mut out = vec![1; rank];
    for (i, o) in out.iter_mut().enumerate() {
        let l = dim_from_right(lhs, rank - 1 - i);
        let r = dim_from_right(rhs, rank - 1 - i);
        *o = match (l, r) {
            (a, b) if a == b => a,
            (1, b) => b,
            (a, 1) => a,
            _ => return Err(PplError::shape_mismatch(op, lhs, rhs)),
        };
    }
    Ok(out)
}

fn dim_from_right(dims: &[usize], offset: usize) -> usize {
    if offset < dims.len() {
        dims[dims.len() - 1 - offset]
    } else {
        1
    }
}

/// Split `value` dims into (leading, trailing) where the trailing part must
/// equal `event`.
pub fn split_event<'a>(
    op: &'static str,
    value: &'a [usize],
    event: &[usize],
) -> Result<&'a [usize]> {
    if value.len() < event.len() || &value[value.len() - event.len()..] != event {
        return Err(PplError::shape_mismatch(op, value, event));
    }
    Ok(&value[..value.len() - event.len()])
}

/// Leading dims of `value` broadcast against `batch`, after checking the
/// trailing event dims.
pub fn value_batch_shape(
    op: &'static str,
    value: &[usize],
    batch: &[usize],
    event: &[usize],
) -> Result<Vec<usize>> {
    let leading = split_event(op, value, event)?;
    broadcast_shapes(op, leading, batch)
}

pub fn numel(dims: &[usize]) -> usize {
    dims.iter().product()
}

/// `a ++ b`
pub fn concat(a: &[usize], b: &[usize]) -> Vec<usize> {
    a.iter().chain(b.iter()).copied().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast() -> Result<()> {
        assert_eq!(broadcast_shapes("t", &[3, 1], &[4])?, vec![3, 4]);
        assert_eq!(broadcast_shapes("t", &[], &[2, 2])?, vec![2, 2]);
        assert!(broadcast_shapes("t", &[3], &[4]).is_err());
        Ok(())
    }

    #[test]
    fn test_event_split() -> Result<()> {
        assert_eq!(value_batch_shape("t", &[3, 2, 5], &[2], &[5])?, vec![3, 2]);
        assert!(value_batch_shape("t", &[3, 2, 4], &[2], &[5]).is_err());
        Ok(())
    }
}
