//! Interpolation between staggered locations.
//!
//! Every move is one axis at a time and interpolates linearly between the two
//! nodes straddling the output node, weighted by distance, so stretched axes
//! are handled exactly for linear profiles. The pair of input indices comes
//! from a table keyed by (source location, target location, topology).
//! Periodic axes wrap; bounded axes repeat the adjacent interior node outside
//! the domain (zero gradient), so a boundary face takes the value of its only
//! neighbouring center.

use std::borrow::Cow;

use ndarray::{Array3, ArrayView1, ArrayView3, ArrayViewMut1, Axis, Zip};

use crate::field::Field;
use crate::grid::{Dim3, Grid, Loc3, Location, Topology};

/// Input nodes `(lo, hi)` straddling output node `i`.
///
/// `n_cells` is the cell count along the axis. For a bounded center-to-face
/// move at the domain edges both indices coincide.
#[inline]
pub(crate) fn straddle(
    from: Location,
    to: Location,
    topology: Topology,
    n_cells: usize,
    i: usize,
) -> (usize, usize) {
    match (from, to, topology) {
        (Location::Face, Location::Center, Topology::Periodic) => (i, (i + 1) % n_cells),
        (Location::Face, Location::Center, Topology::Bounded) => (i, i + 1),
        (Location::Center, Location::Face, Topology::Periodic) => ((i + n_cells - 1) % n_cells, i),
        (Location::Center, Location::Face, Topology::Bounded) => {
            (i.saturating_sub(1).min(n_cells - 1), i.min(n_cells - 1))
        }
        _ => (i, i),
    }
}

/// Applies `kernel(input_lane, output_index)` along `dim`, one lane per
/// (other-axis) column, lanes processed in parallel.
pub(crate) fn map_lanes<K>(
    input: ArrayView3<f64>,
    dim: Dim3,
    out_len: usize,
    kernel: K,
) -> Array3<f64>
where
    K: Fn(ArrayView1<f64>, usize) -> f64 + Sync,
{
    let mut shape = input.raw_dim();
    shape[dim.index()] = out_len;
    let mut output = Array3::zeros(shape);
    Zip::from(output.lanes_mut(Axis(dim.index())))
        .and(input.lanes(Axis(dim.index())))
        .par_for_each(|mut out: ArrayViewMut1<f64>, lane: ArrayView1<f64>| {
            for (i, o) in out.iter_mut().enumerate() {
                *o = kernel(lane, i);
            }
        });
    output
}

/// Moves `data` from `from` to `to` along a single axis.
pub(crate) fn interpolate_axis(
    grid: &Grid,
    data: ArrayView3<f64>,
    dim: Dim3,
    from: Location,
    to: Location,
) -> Array3<f64> {
    if from == to {
        return data.to_owned();
    }
    let topology = grid.topology(dim);
    let n = grid.size(dim);
    let extent = grid.extent(dim);
    let sources = grid.nodes(dim, from);
    let targets = grid.nodes(dim, to);
    // Distances across a periodic seam come out negative.
    let unwrap = move |d: f64| if d < 0.0 { d + extent } else { d };
    map_lanes(data, dim, grid.node_count(dim, to), move |lane, i| {
        let (lo, hi) = straddle(from, to, topology, n, i);
        if lo == hi {
            return lane[lo];
        }
        let below = unwrap(targets[i] - sources[lo]);
        let above = unwrap(sources[hi] - targets[i]);
        lane[lo] + below / (below + above) * (lane[hi] - lane[lo])
    })
}

/// Values of `field` at `target`, borrowed when no interpolation is needed.
pub(crate) fn values_at(field: &Field, target: Loc3) -> Cow<'_, Array3<f64>> {
    let source = field.location();
    if source == target {
        return Cow::Borrowed(field.data());
    }
    let grid = field.grid();
    let mut current: Option<Array3<f64>> = None;
    for dim in Dim3::ALL {
        let d = dim.index();
        if source[d] == target[d] {
            continue;
        }
        let next = match &current {
            Some(values) => interpolate_axis(grid, values.view(), dim, source[d], target[d]),
            None => interpolate_axis(grid, field.view(), dim, source[d], target[d]),
        };
        current = Some(next);
    }
    match current {
        Some(values) => Cow::Owned(values),
        None => Cow::Borrowed(field.data()),
    }
}

/// Evaluates `field` at `target`, interpolating along every axis where the
/// locations differ.
pub fn at(target: Loc3, field: &Field) -> Field {
    let data = values_at(field, target).into_owned();
    Field::from_parts(field.grid().clone(), target, data)
}
