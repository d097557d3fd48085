//! Finite differences across one staggering step.
//!
//! A derivative taken along an axis moves the result to the other location on
//! that axis: faces difference into centers and centers into faces. The
//! divisor is the spacing between the two nodes being differenced. Across a
//! bounded boundary face the zero-gradient halo gives a zero derivative.

use ndarray::Array1;

use crate::field::{Field, Profile};
use crate::grid::{Dim3, Grid};
use crate::interpolation::{map_lanes, straddle};

fn differentiate(field: &Field, dim: Dim3) -> Field {
    let grid: &Grid = field.grid();
    let mut location = field.location();
    let from = location[dim.index()];
    let to = from.flip();
    location[dim.index()] = to;

    let topology = grid.topology(dim);
    let n = grid.size(dim);
    let spacing = grid.spacings(dim, to).to_owned();
    let data = map_lanes(field.view(), dim, grid.node_count(dim, to), |lane, i| {
        let (lo, hi) = straddle(from, to, topology, n, i);
        (lane[hi] - lane[lo]) / spacing[i]
    });
    Field::from_parts(field.grid().clone(), location, data)
}

/// ∂/∂x of a 3D field.
pub fn d_dx_field(field: &Field) -> Field {
    differentiate(field, Dim3::X)
}

/// ∂/∂y of a 3D field.
pub fn d_dy_field(field: &Field) -> Field {
    differentiate(field, Dim3::Y)
}

/// ∂/∂z of a 3D field, column by column.
pub fn d_dz_field(field: &Field) -> Field {
    differentiate(field, Dim3::Z)
}

/// ∂/∂z of a vertical profile.
///
/// Averaging commutes with this operator whenever the horizontal weights do
/// not vary with height, so `d_dz(average(f)) == average(d_dz_field(f))` up to
/// rounding.
pub fn d_dz(profile: &Profile) -> Profile {
    let grid = profile.grid();
    let from = profile.location();
    let to = from.flip();
    let topology = grid.topology(Dim3::Z);
    let n = grid.size(Dim3::Z);
    let spacing = grid.spacings(Dim3::Z, to);
    let values = profile.data();

    let data: Array1<f64> = (0..grid.node_count(Dim3::Z, to))
        .map(|k| {
            let (lo, hi) = straddle(from, to, topology, n, k);
            (values[hi] - values[lo]) / spacing[k]
        })
        .collect();
    Profile::from_parts(grid.clone(), to, data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::averaging::average_horizontal;
    use crate::grid::{Architecture, Location, Topology, CCC, CCF, FCC};
    use ndarray::array;
    use std::sync::Arc;

    fn grid() -> Arc<Grid> {
        Grid::doubly_periodic([4, 3, 5], [4.0, 3.0, 2.5])
            .unwrap()
            .into_shared()
    }

    #[test]
    fn test_profile_face_to_center() {
        let g = grid();
        let p = Profile::from_fn(g, Location::Face, |z| 3.0 * z * z);
        let dp = d_dz(&p);
        assert_eq!(dp.location(), Location::Center);
        assert_eq!(dp.len(), 5);
        // Centered difference of z² is exact at the midpoint.
        for k in 0..5 {
            let zc = 0.25 + 0.5 * k as f64;
            assert!((dp.value_at(k) - 6.0 * zc).abs() < 1e-12);
        }
    }

    #[test]
    fn test_profile_center_to_face_has_zero_boundary_derivative() {
        let g = grid();
        let p = Profile::from_fn(g, Location::Center, |z| z);
        let dp = d_dz(&p);
        assert_eq!(dp.location(), Location::Face);
        assert_eq!(dp.len(), 6);
        assert_eq!(dp.value_at(0), 0.0);
        assert_eq!(dp.value_at(5), 0.0);
        for k in 1..5 {
            assert!((dp.value_at(k) - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_stretched_vertical_spacing() {
        let faces = [array![0.0, 1.0], array![0.0, 1.0], array![0.0, 1.0, 3.0, 7.0]];
        let g = Arc::new(
            Grid::new(
                Architecture::Cpu,
                [Topology::Periodic, Topology::Periodic, Topology::Bounded],
                faces,
            )
            .unwrap(),
        );
        let p = Profile::from_fn(g.clone(), Location::Face, |z| 2.0 * z);
        let dp = d_dz(&p);
        assert!(dp.data().iter().all(|&v| (v - 2.0).abs() < 1e-12));

        let c = Profile::from_fn(g, Location::Center, |z| z);
        let dc = d_dz(&c);
        assert!((dc.value_at(1) - 1.0).abs() < 1e-12);
        assert!((dc.value_at(2) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_periodic_horizontal_derivative_wraps() {
        let g = grid();
        let u = Field::from_fn(g, FCC, |x, _, _| (std::f64::consts::TAU * x / 4.0).sin());
        let dudx = d_dx_field(&u);
        assert_eq!(dudx.location(), CCC);
        // The wrapped difference across the seam closes the sine exactly.
        let total: f64 = dudx.data().iter().sum();
        assert!(total.abs() < 1e-12);
    }

    #[test]
    fn test_field_derivative_commutes_with_averaging() {
        let g = grid();
        let flux = Field::from_fn(g, CCF, |x, y, z| {
            (x * 1.3).sin() * (y * 0.7).cos() * z * z + 0.5 * z
        });
        let averaged_derivative = average_horizontal(&d_dz_field(&flux)).unwrap();
        let derivative_of_average = d_dz(&average_horizontal(&flux).unwrap());
        assert_eq!(averaged_derivative.location(), Location::Center);
        for k in 0..averaged_derivative.len() {
            let a = averaged_derivative.value_at(k);
            let b = derivative_of_average.value_at(k);
            assert!(
                (a - b).abs() <= 1e-10 * b.abs().max(1.0),
                "level {k}: {a} vs {b}"
            );
        }
    }
}
