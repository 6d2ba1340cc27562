use log::debug;
use ndarray::{Array2, Array3, Axis};
use rayon::prelude::*;

/// Shrink then grow the cloud mask: erosion with `r_shrink` removes small
/// noise regions, dilation with `r_grow` pads the surviving regions to
/// cover mixed boundary pixels. `None` passes the mask through unchanged;
/// a zero radius skips that stage.
pub fn mask_cleanup(mask: &Array2<bool>, radii: Option<(usize, usize)>) -> Array2<bool> {
    let Some((r_shrink, r_grow)) = radii else {
        return mask.clone();
    };

    debug!("Mask cleanup: shrink={}, grow={}", r_shrink, r_grow);

    let mut out = mask.clone();
    if r_shrink > 0 {
        out = erode(&out, r_shrink);
    }
    if r_grow > 0 {
        out = dilate(&out, r_grow);
    }
    out
}

/// Apply `mask_cleanup` to each time slice independently. No cross-time
/// smoothing.
pub fn mask_cleanup_stack(mask: &Array3<bool>, radii: Option<(usize, usize)>) -> Array3<bool> {
    if radii.is_none() {
        return mask.clone();
    }

    let mut out = mask.clone();
    for t in 0..mask.dim().0 {
        let cleaned = mask_cleanup(&mask.index_axis(Axis(0), t).to_owned(), radii);
        out.index_axis_mut(Axis(0), t).assign(&cleaned);
    }
    out
}

fn erode(mask: &Array2<bool>, radius: usize) -> Array2<bool> {
    morph_window(mask, radius, |window_all, _| window_all)
}

fn dilate(mask: &Array2<bool>, radius: usize) -> Array2<bool> {
    morph_window(mask, radius, |_, window_any| window_any)
}

/// Square-window morphology pass; the window is clamped at array edges.
fn morph_window(
    mask: &Array2<bool>,
    radius: usize,
    select: fn(bool, bool) -> bool,
) -> Array2<bool> {
    let (nrows, ncols) = mask.dim();

    // Process rows in parallel
    let rows: Vec<Vec<bool>> = (0..nrows)
        .into_par_iter()
        .map(|row| {
            (0..ncols)
                .map(|col| {
                    let row_min = row.saturating_sub(radius);
                    let row_max = (row + radius + 1).min(nrows);
                    let col_min = col.saturating_sub(radius);
                    let col_max = (col + radius + 1).min(ncols);

                    let mut all = true;
                    let mut any = false;
                    for r in row_min..row_max {
                        for c in col_min..col_max {
                            let v = mask[[r, c]];
                            all &= v;
                            any |= v;
                        }
                    }
                    select(all, any)
                })
                .collect()
        })
        .collect();

    let flat: Vec<bool> = rows.into_iter().flatten().collect();
    Array2::from_shape_vec((nrows, ncols), flat).expect("Shape mismatch")
}
