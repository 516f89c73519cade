//! Splitting of blended blobs.
//!
//! Two stars closer than the clustering radius end up in one density cluster.
//! The cluster mask is split by a marker-based watershed on its Euclidean
//! distance transform: every regional maximum of the distance map seeds one
//! region, and regions grow outward in order of decreasing distance until
//! they meet.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};

use ndarray::{Array2, ArrayView2};
use photo_math::distance_transform_edt;

static NEIGHBORS_8: [(isize, isize); 8] = [
    (-1, -1),
    (-1, 0),
    (-1, 1),
    (0, -1),
    (0, 1),
    (1, -1),
    (1, 0),
    (1, 1),
];

fn neighbors(
    (r, c): (usize, usize),
    (rows, cols): (usize, usize),
) -> impl Iterator<Item = (usize, usize)> {
    NEIGHBORS_8.iter().filter_map(move |&(dr, dc)| {
        let rr = r as isize + dr;
        let cc = c as isize + dc;
        (rr >= 0 && cc >= 0 && (rr as usize) < rows && (cc as usize) < cols)
            .then_some((rr as usize, cc as usize))
    })
}

/// Queue entry of the flood: highest distance first, then first pushed.
struct FloodEntry {
    dist: f64,
    age: u64,
    pixel: (usize, usize),
}

impl PartialEq for FloodEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for FloodEntry {}

impl PartialOrd for FloodEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FloodEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.dist
            .total_cmp(&other.dist)
            .then_with(|| other.age.cmp(&self.age))
    }
}

/// Label every regional maximum plateau of `dist` inside `mask`.
///
/// A plateau is an 8-connected set of equal-valued foreground pixels; it is a
/// regional maximum when no pixel bordering it is higher. Markers are
/// numbered from 1 in row-major order of each plateau's first pixel.
/// Returns the marker image and the marker count.
fn regional_maxima(mask: &ArrayView2<bool>, dist: &Array2<f64>) -> (Array2<usize>, usize) {
    let shape = mask.dim();
    let mut markers = Array2::zeros(shape);
    let mut visited = Array2::from_elem(shape, false);
    let mut count = 0;
    let mut queue = VecDeque::new();
    let mut plateau = Vec::new();

    for ((r, c), &inside) in mask.indexed_iter() {
        if !inside || visited[[r, c]] {
            continue;
        }
        let level = dist[[r, c]];
        let mut is_maximum = true;
        plateau.clear();
        visited[[r, c]] = true;
        queue.push_back((r, c));

        while let Some(p) = queue.pop_front() {
            plateau.push(p);
            for q in neighbors(p, shape) {
                if !mask[q] {
                    continue;
                }
                let d = dist[q];
                if d > level {
                    is_maximum = false;
                } else if d == level && !visited[q] {
                    visited[q] = true;
                    queue.push_back(q);
                }
            }
        }

        if is_maximum {
            count += 1;
            for &p in &plateau {
                markers[p] = count;
            }
        }
    }

    (markers, count)
}

/// Split a blob mask into watershed regions.
///
/// Returns a label image of the mask's shape: 0 outside the mask, regions
/// numbered from 1. Blobs with fewer than `min_split_pixels` pixels, or with
/// a single distance maximum, come back as one region.
pub fn split_blob(mask: &ArrayView2<bool>, min_split_pixels: usize) -> Array2<usize> {
    let whole = || mask.mapv(usize::from);

    let size = mask.iter().filter(|&&m| m).count();
    if size < min_split_pixels {
        return whole();
    }

    let dist = distance_transform_edt(mask);
    let (mut labels, markers) = regional_maxima(mask, &dist);
    if markers < 2 {
        return whole();
    }

    let shape = mask.dim();
    let mut heap = BinaryHeap::new();
    let mut age = 0u64;
    for ((r, c), &label) in labels.indexed_iter() {
        if label != 0 {
            heap.push(FloodEntry {
                dist: dist[[r, c]],
                age,
                pixel: (r, c),
            });
            age += 1;
        }
    }

    while let Some(FloodEntry { pixel, .. }) = heap.pop() {
        let label = labels[pixel];
        for q in neighbors(pixel, shape) {
            if mask[q] && labels[q] == 0 {
                labels[q] = label;
                heap.push(FloodEntry {
                    dist: dist[q],
                    age,
                    pixel: q,
                });
                age += 1;
            }
        }
    }

    labels
}

#[cfg(test)]
mod tests {
    use super::*;

    fn disc_mask(shape: (usize, usize), centers: &[(f64, f64)], radius: f64) -> Array2<bool> {
        Array2::from_shape_fn(shape, |(r, c)| {
            centers.iter().any(|&(cr, cc)| {
                let dr = r as f64 - cr;
                let dc = c as f64 - cc;
                dr * dr + dc * dc <= radius * radius
            })
        })
    }

    fn region_count(labels: &Array2<usize>) -> usize {
        labels.iter().copied().max().unwrap_or(0)
    }

    #[test]
    fn test_single_disc_stays_whole() {
        let mask = disc_mask((15, 15), &[(7.0, 7.0)], 5.0);
        let labels = split_blob(&mask.view(), 8);
        assert_eq!(region_count(&labels), 1);
        for (m, l) in mask.iter().zip(labels.iter()) {
            assert_eq!(*m, *l == 1);
        }
    }

    #[test]
    fn test_two_touching_discs_split() {
        let mask = disc_mask((13, 25), &[(6.0, 6.0), (6.0, 17.0)], 5.0);
        let labels = split_blob(&mask.view(), 8);
        assert_eq!(region_count(&labels), 2);

        assert_ne!(labels[[6, 6]], labels[[6, 17]]);
        assert_ne!(labels[[6, 6]], 0);
        assert!(mask.iter().zip(labels.iter()).all(|(&m, &l)| m == (l != 0)));
    }

    #[test]
    fn test_small_blob_never_split() {
        // Two separated pairs: two maxima, but only 4 pixels
        let mut mask = Array2::from_elem((3, 6), false);
        mask[[1, 0]] = true;
        mask[[1, 1]] = true;
        mask[[1, 4]] = true;
        mask[[1, 5]] = true;
        let labels = split_blob(&mask.view(), 8);
        assert_eq!(region_count(&labels), 1);
    }

    #[test]
    fn test_plateau_is_one_marker() {
        // A 3-pixel-tall bar: the middle row minus its end pixels is one flat maximum
        let mask = Array2::from_elem((3, 10), true);
        let dist = distance_transform_edt(&mask.view());
        let (markers, count) = regional_maxima(&mask.view(), &dist);
        assert_eq!(count, 1);
        assert!((1..9).all(|c| markers[[1, c]] == 1));
        assert_eq!(markers[[1, 0]], 0);
        assert!(markers.row(0).iter().all(|&m| m == 0));
    }

    #[test]
    fn test_flood_order_prefers_higher_distance() {
        let a = FloodEntry {
            dist: 2.0,
            age: 5,
            pixel: (0, 0),
        };
        let b = FloodEntry {
            dist: 1.0,
            age: 0,
            pixel: (0, 1),
        };
        let c = FloodEntry {
            dist: 2.0,
            age: 1,
            pixel: (0, 2),
        };
        let mut heap = BinaryHeap::from(vec![a, b, c]);
        assert_eq!(heap.pop().unwrap().pixel, (0, 2));
        assert_eq!(heap.pop().unwrap().pixel, (0, 0));
        assert_eq!(heap.pop().unwrap().pixel, (0, 1));
    }
}
