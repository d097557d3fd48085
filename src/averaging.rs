//! Horizontal averaging of 3D fields into vertical profiles.

use log::trace;
use ndarray::{Array1, Array2, Axis};
use ndarray_stats::SummaryStatisticsExt;
use rayon::prelude::*;

use crate::error::Result;
use crate::field::{Field, Profile};
use crate::grid::{Dim3, Grid, Loc3};

/// Area of the horizontal footprint of every node of `location`.
pub(crate) fn horizontal_weights(grid: &Grid, location: Loc3) -> Array2<f64> {
    let dx = grid.spacings(Dim3::X, location[0]);
    let dy = grid.spacings(Dim3::Y, location[1]);
    let mut weights = Array2::zeros((dx.len(), dy.len()));
    for ((i, j), w) in weights.indexed_iter_mut() {
        *w = dx[i] * dy[j];
    }
    weights
}

/// Area-weighted mean of `field` over both horizontal axes.
///
/// The result keeps the field's vertical location. On a grid with uniform
/// horizontal spacing this is the plain arithmetic mean per level. Levels are
/// reduced in parallel; within a level the summation order is fixed, so
/// repeated calls give identical results.
pub fn average_horizontal(field: &Field) -> Result<Profile> {
    let grid = field.grid();
    let location = field.location();
    let weights = horizontal_weights(grid, location);
    let weights_view = weights.view();
    let data = field.data();

    let levels: Vec<f64> = (0..data.len_of(Axis(2)))
        .into_par_iter()
        .map(|k| {
            let level = data.index_axis(Axis(2), k);
            level.weighted_mean(&weights_view)
        })
        .collect::<std::result::Result<_, _>>()?;

    trace!(
        "averaged {:?} field over {}x{} horizontal nodes",
        location,
        weights.nrows(),
        weights.ncols()
    );
    Ok(Profile::from_parts(
        grid.clone(),
        location[2],
        Array1::from(levels),
    ))
}
