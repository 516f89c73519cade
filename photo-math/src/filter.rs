//! Neighborhood filters on 2D grids.

use ndarray::{s, Array2, ArrayView2};

/// Squared-distance stand-in for "no background seen yet".
const FAR: f64 = 1e20;

/// Map an out-of-range index back into `0..n` the way a half-sample
/// symmetric ("reflect") boundary does for a 3-wide window.
#[inline]
fn reflect(i: isize, n: usize) -> usize {
    if i < 0 {
        0
    } else if i as usize >= n {
        n - 1
    } else {
        i as usize
    }
}

/// 3×3 median filter with reflected borders.
///
/// Each output cell is the median of the nine cells around it; cells beyond
/// the edge mirror their nearest in-bounds neighbor, so edges are not pulled
/// toward zero.
pub fn median_filter_3x3(grid: &ArrayView2<f64>) -> Array2<f64> {
    let (rows, cols) = grid.dim();
    let mut out = Array2::<f64>::zeros((rows, cols));
    let mut window = [0.0f64; 9];

    for r in 0..rows {
        for c in 0..cols {
            let mut k = 0;
            for dr in -1isize..=1 {
                for dc in -1isize..=1 {
                    let rr = reflect(r as isize + dr, rows);
                    let cc = reflect(c as isize + dc, cols);
                    window[k] = grid[[rr, cc]];
                    k += 1;
                }
            }
            window.sort_by(f64::total_cmp);
            out[[r, c]] = window[4];
        }
    }
    out
}

/// One-dimensional squared Euclidean distance transform of a sampled
/// function (Felzenszwalb & Huttenlocher lower envelope of parabolas).
fn edt_1d(f: &[f64], out: &mut [f64], v: &mut [usize], z: &mut [f64]) {
    let n = f.len();
    if n == 0 {
        return;
    }
    let mut k = 0usize;
    v[0] = 0;
    z[0] = f64::NEG_INFINITY;
    z[1] = f64::INFINITY;

    let intersect = |q: usize, p: usize| {
        ((f[q] + (q * q) as f64) - (f[p] + (p * p) as f64)) / (2.0 * (q as f64 - p as f64))
    };

    for q in 1..n {
        // z[0] is -inf, so this always stops at k = 0
        let mut s = intersect(q, v[k]);
        while s <= z[k] {
            k -= 1;
            s = intersect(q, v[k]);
        }
        k += 1;
        v[k] = q;
        z[k] = s;
        z[k + 1] = f64::INFINITY;
    }

    k = 0;
    for (q, slot) in out.iter_mut().enumerate() {
        while z[k + 1] < q as f64 {
            k += 1;
        }
        let p = v[k];
        let d = q as f64 - p as f64;
        *slot = d * d + f[p];
    }
}

/// Exact Euclidean distance from every foreground cell to the nearest
/// background cell.
///
/// `true` marks foreground. Everything outside the array counts as
/// background, so a foreground cell on the border is at distance 1.
/// Background cells are 0.
pub fn distance_transform_edt(mask: &ArrayView2<bool>) -> Array2<f64> {
    let (rows, cols) = mask.dim();
    if rows == 0 || cols == 0 {
        return Array2::zeros((rows, cols));
    }

    // One cell of background padding on every side
    let (pr, pc) = (rows + 2, cols + 2);
    let mut sq = Array2::<f64>::zeros((pr, pc));
    for ((r, c), &fg) in mask.indexed_iter() {
        if fg {
            sq[[r + 1, c + 1]] = FAR;
        }
    }

    let longest = pr.max(pc);
    let mut f = vec![0.0; longest];
    let mut d = vec![0.0; longest];
    let mut v = vec![0usize; longest];
    let mut z = vec![0.0; longest + 1];

    // Columns first, then rows
    for c in 0..pc {
        for r in 0..pr {
            f[r] = sq[[r, c]];
        }
        edt_1d(&f[..pr], &mut d[..pr], &mut v, &mut z);
        for r in 0..pr {
            sq[[r, c]] = d[r];
        }
    }
    for r in 0..pr {
        for c in 0..pc {
            f[c] = sq[[r, c]];
        }
        edt_1d(&f[..pc], &mut d[..pc], &mut v, &mut z);
        for c in 0..pc {
            sq[[r, c]] = d[c];
        }
    }

    sq.slice(s![1..rows + 1, 1..cols + 1]).mapv(f64::sqrt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_median_filter_removes_spike() {
        let mut grid = Array2::from_elem((5, 5), 10.0);
        grid[[2, 2]] = 1000.0;
        let filtered = median_filter_3x3(&grid.view());
        assert_eq!(filtered[[2, 2]], 10.0);
        assert!(filtered.iter().all(|&v| v == 10.0));
    }

    #[test]
    fn test_median_filter_reflects_edges() {
        // Corner window with reflect: rows {0,0,1} x cols {0,0,1}
        let grid = array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 9.0]];
        let filtered = median_filter_3x3(&grid.view());
        // Window values: 1,1,2,1,1,2,4,4,5 -> sorted median 2
        assert_eq!(filtered[[0, 0]], 2.0);
        assert_eq!(filtered[[1, 1]], 5.0);
        // 5,6,6,8,9,9,8,9,9 -> median 8
        assert_eq!(filtered[[2, 2]], 8.0);
    }

    #[test]
    fn test_median_filter_single_cell() {
        let grid = array![[3.5]];
        assert_eq!(median_filter_3x3(&grid.view())[[0, 0]], 3.5);
    }

    #[test]
    fn test_edt_single_pixel() {
        let mask = array![[false, false, false], [false, true, false], [false, false, false]];
        let dist = distance_transform_edt(&mask.view());
        assert_eq!(dist[[1, 1]], 1.0);
        assert_eq!(dist[[0, 0]], 0.0);
    }

    #[test]
    fn test_edt_full_mask_uses_outside_as_background() {
        let mask = Array2::from_elem((5, 5), true);
        let dist = distance_transform_edt(&mask.view());
        assert_eq!(dist[[0, 0]], 1.0);
        assert_eq!(dist[[0, 2]], 1.0);
        assert_eq!(dist[[1, 1]], 2.0);
        assert_eq!(dist[[2, 2]], 3.0);
    }

    #[test]
    fn test_edt_diagonal_distance() {
        // Single background hole in the middle; the padded border is
        // further away than the hole for every probe below
        let mut mask = Array2::from_elem((9, 9), true);
        mask[[4, 4]] = false;
        let dist = distance_transform_edt(&mask.view());
        assert_eq!(dist[[4, 5]], 1.0);
        assert_relative_eq!(dist[[5, 5]], 2f64.sqrt(), epsilon = 1e-12);
        assert_relative_eq!(dist[[6, 6]], 8f64.sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn test_edt_brute_force_agreement() {
        let mask = array![
            [true, true, false, true],
            [true, true, true, true],
            [false, true, true, true],
            [true, true, true, false],
        ];
        let dist = distance_transform_edt(&mask.view());
        let (rows, cols) = mask.dim();

        for r in 0..rows {
            for c in 0..cols {
                if !mask[[r, c]] {
                    assert_eq!(dist[[r, c]], 0.0);
                    continue;
                }
                let mut best = f64::INFINITY;
                for br in -1..=rows as isize {
                    for bc in -1..=cols as isize {
                        let inside =
                            br >= 0 && bc >= 0 && (br as usize) < rows && (bc as usize) < cols;
                        if inside && mask[[br as usize, bc as usize]] {
                            continue;
                        }
                        let d = ((br - r as isize).pow(2) + (bc - c as isize).pow(2)) as f64;
                        best = best.min(d.sqrt());
                    }
                }
                assert_relative_eq!(dist[[r, c]], best, epsilon = 1e-12);
            }
        }
    }
}
