//! Shape-broadcasting engine.
//!
//! Shapes are drawn left to right while tracking the broadcast of the ones
//! chosen so far. Every shape but the last is free to broadcast on any axis;
//! the last one is forced to full size on each axis the running broadcast
//! has not reached yet, and to a rank large enough to cover them. The
//! broadcast of the whole set is therefore exactly the target.

use std::collections::BTreeMap;

use fhs_ndarray::{Shape, broadcast_shape, pad_to_rank, trailing_axes};
use fhs_random::{Draw, permutation};

use crate::error::StrategyError;

/// Draws `n` shapes whose joint broadcast is exactly `target`.
///
/// `n == 1` only reproduces `target`, so it is rejected as
/// [`StrategyError::DegenerateBroadcast`] unless `allow_degenerate` is set
/// (callers whose `n` is itself drawn). `n == 0` is always rejected.
pub fn broadcasting_shapes(
    draw: &mut dyn Draw,
    target: &[usize],
    n: usize,
    allow_degenerate: bool,
) -> Result<Vec<Shape>, StrategyError> {
    if n == 0 || (n == 1 && !allow_degenerate) {
        return Err(StrategyError::DegenerateBroadcast { n });
    }
    let mut current: Shape = Vec::new();
    let mut result = Vec::with_capacity(n);
    for idx in 0..n {
        let is_last = idx + 1 == n;
        let (next_rank, force_full) =
            rank_and_fullsize_required(draw, target, &current, is_last)?;
        let mut next = trailing_axes(target, next_rank)?.to_vec();
        for (side, force) in next.iter_mut().zip(force_full) {
            if !force && draw.boolean() {
                *side = 1;
            }
        }
        current = broadcast_shape(&current, &next)?;
        result.push(next);
    }
    Ok(result)
}

/// Rank of the next shape and, per axis of it, whether the axis must take
/// the target's full size.
fn rank_and_fullsize_required(
    draw: &mut dyn Draw,
    target: &[usize],
    current: &[usize],
    is_last: bool,
) -> Result<(usize, Vec<bool>), StrategyError> {
    let target_rank = target.len();
    if !is_last {
        let next_rank = draw.sizes(0, target_rank)?;
        return Ok((next_rank, vec![false; next_rank]));
    }

    let mismatched: Vec<bool> = pad_to_rank(current, target_rank)
        .iter()
        .zip(target)
        .map(|(have, want)| have != want)
        .collect();
    let mut min_rank = target_rank;
    if current.len() == target_rank {
        // Already full rank: only the leading matched axes may be dropped.
        min_rank -= mismatched
            .iter()
            .position(|&m| m)
            .unwrap_or(target_rank);
    }
    let next_rank = draw.sizes(min_rank, target_rank)?;
    Ok((next_rank, mismatched[target_rank - next_rank..].to_vec()))
}

/// One batch shape per name, jointly broadcasting to `target`.
///
/// Names are permuted before the shapes are zipped on, so no name is
/// positionally tied to the low-rank early shapes. A single name gets
/// `target` itself; no names give an empty map.
pub fn broadcasting_named_shapes(
    draw: &mut dyn Draw,
    target: &[usize],
    names: &[String],
) -> Result<BTreeMap<String, Shape>, StrategyError> {
    if names.is_empty() {
        return Ok(BTreeMap::new());
    }
    let shuffled = permutation(draw, names)?;
    let shapes = broadcasting_shapes(draw, target, names.len(), true)?;
    Ok(shuffled.into_iter().zip(shapes).collect())
}

/// A shape that broadcasts with `shape` without growing past it.
pub fn broadcast_compatible_shape(
    draw: &mut dyn Draw,
    shape: &[usize],
) -> Result<Shape, StrategyError> {
    let mut pair = broadcasting_shapes(draw, shape, 2, false)?;
    Ok(pair.swap_remove(0))
}

#[cfg(test)]
mod tests {
    use super::{broadcast_compatible_shape, broadcasting_named_shapes, broadcasting_shapes};
    use crate::error::StrategyError;
    use fhs_ndarray::{broadcast_shape, broadcast_shapes};
    use fhs_random::DeterministicRng;

    #[test]
    fn pair_broadcasts_to_target() {
        let mut rng = DeterministicRng::new(11);
        for _ in 0..100 {
            let shapes = broadcasting_shapes(&mut rng, &[4, 3, 2], 2, false).expect("pair");
            assert_eq!(shapes.len(), 2);
            assert_eq!(broadcast_shapes(&shapes).expect("compatible"), vec![4, 3, 2]);
        }
    }

    #[test]
    fn degenerate_counts_are_rejected_unless_allowed() {
        let mut rng = DeterministicRng::new(0);
        assert_eq!(
            broadcasting_shapes(&mut rng, &[2, 2], 1, false),
            Err(StrategyError::DegenerateBroadcast { n: 1 })
        );
        assert_eq!(
            broadcasting_shapes(&mut rng, &[2, 2], 0, true),
            Err(StrategyError::DegenerateBroadcast { n: 0 })
        );
        for _ in 0..20 {
            let single = broadcasting_shapes(&mut rng, &[1, 5, 2], 1, true).expect("allowed");
            assert_eq!(single, vec![vec![1, 5, 2]]);
        }
    }

    #[test]
    fn last_shape_repairs_every_mismatch() {
        // Many shapes against a target with unit and zero sides.
        let target = [3, 1, 0, 4];
        let mut rng = DeterministicRng::new(99);
        for n in 2..8 {
            let shapes = broadcasting_shapes(&mut rng, &target, n, false).expect("shapes");
            assert!(shapes.iter().all(|s| s.len() <= target.len()));
            assert_eq!(broadcast_shapes(&shapes).expect("compatible"), target.to_vec());
        }
    }

    #[test]
    fn scalar_target_yields_scalars() {
        let mut rng = DeterministicRng::new(4);
        let shapes = broadcasting_shapes(&mut rng, &[], 4, false).expect("scalars");
        assert!(shapes.iter().all(Vec::is_empty));
    }

    #[test]
    fn named_shapes_cover_every_name() {
        let mut rng = DeterministicRng::new(7);
        let names = vec!["loc".to_string(), "scale".to_string(), "df".to_string()];
        let named = broadcasting_named_shapes(&mut rng, &[5, 2], &names).expect("named");
        assert_eq!(named.len(), 3);
        assert!(names.iter().all(|name| named.contains_key(name)));
        let shapes: Vec<_> = named.values().cloned().collect();
        assert_eq!(broadcast_shapes(&shapes).expect("compatible"), vec![5, 2]);

        let one = broadcasting_named_shapes(&mut rng, &[5, 2], &names[..1]).expect("one");
        assert_eq!(one.get("loc"), Some(&vec![5, 2]));
        assert!(
            broadcasting_named_shapes(&mut rng, &[5, 2], &[])
                .expect("none")
                .is_empty()
        );
    }

    #[test]
    fn compatible_shape_never_grows_target() {
        let mut rng = DeterministicRng::new(13);
        for _ in 0..50 {
            let shape = broadcast_compatible_shape(&mut rng, &[6, 1, 3]).expect("shape");
            assert_eq!(broadcast_shape(&shape, &[6, 1, 3]), Ok(vec![6, 1, 3]));
        }
    }
}
