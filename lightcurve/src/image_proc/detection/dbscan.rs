//! Density-based clustering of candidate pixels on the image grid.
//!
//! Points are integer pixel positions, so neighborhoods are looked up through
//! a dense index grid instead of a spatial tree. Cluster assignment follows
//! the classic DBSCAN expansion: core points are visited in input order, each
//! unvisited core point seeds a new cluster, and a border point belongs to the
//! first cluster that reaches it.

use ndarray::Array2;

const UNVISITED: usize = usize::MAX;

/// Grid offsets within Euclidean distance `eps`, the center included.
fn neighborhood_offsets(eps: f64) -> Vec<(isize, isize)> {
    let reach = eps.floor().max(0.0) as isize;
    let eps_sq = eps * eps;
    let mut offsets = Vec::new();
    for dr in -reach..=reach {
        for dc in -reach..=reach {
            if ((dr * dr + dc * dc) as f64) <= eps_sq {
                offsets.push((dr, dc));
            }
        }
    }
    offsets
}

/// Cluster `points` (distinct `(row, col)` inside `shape`).
///
/// A point is a core point when at least `min_samples` points, itself
/// included, lie within `eps`. Returns one entry per input point: the cluster
/// index (numbered in discovery order from 0) or `None` for noise.
pub fn dbscan_grid(
    points: &[(usize, usize)],
    shape: (usize, usize),
    eps: f64,
    min_samples: usize,
) -> Vec<Option<usize>> {
    let (rows, cols) = shape;
    let mut index = Array2::from_elem(shape, UNVISITED);
    for (i, &(r, c)) in points.iter().enumerate() {
        index[[r, c]] = i;
    }

    let offsets = neighborhood_offsets(eps);
    let neighbors: Vec<Vec<usize>> = points
        .iter()
        .map(|&(r, c)| {
            offsets
                .iter()
                .filter_map(|&(dr, dc)| {
                    let rr = r as isize + dr;
                    let cc = c as isize + dc;
                    if rr < 0 || cc < 0 || rr as usize >= rows || cc as usize >= cols {
                        return None;
                    }
                    let j = index[[rr as usize, cc as usize]];
                    (j != UNVISITED).then_some(j)
                })
                .collect()
        })
        .collect();
    let is_core: Vec<bool> = neighbors.iter().map(|n| n.len() >= min_samples).collect();

    let mut labels: Vec<Option<usize>> = vec![None; points.len()];
    let mut n_clusters = 0;
    let mut stack = Vec::new();

    for seed in 0..points.len() {
        if labels[seed].is_some() || !is_core[seed] {
            continue;
        }
        stack.push(seed);
        while let Some(i) = stack.pop() {
            if labels[i].is_some() {
                continue;
            }
            labels[i] = Some(n_clusters);
            if is_core[i] {
                stack.extend(neighbors[i].iter().copied().filter(|&j| labels[j].is_none()));
            }
        }
        n_clusters += 1;
    }

    labels
}
