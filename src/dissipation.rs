//! Viscous dissipation of resolved kinetic energy.
//!
//! ϵ = 2 νₑ ΣᵢⱼΣᵢⱼ, where Σ is the resolved strain-rate tensor and νₑ the
//! eddy viscosity diagnosed by the turbulence closure. Diagonal components
//! live at cell centers; each off-diagonal component lives on the edge where
//! its two derivatives meet, and its square is interpolated to centers.

use ndarray::{Array3, Zip};

use crate::algebra::add;
use crate::differencing::{d_dx_field, d_dy_field, d_dz_field};
use crate::error::Result;
use crate::field::Field;
use crate::grid::{ensure_same_grid, CCC, CCF, CFC, CFF, FCC, FCF, FFC};
use crate::interpolation::values_at;

/// Source of the dissipation field averaged into the budget.
///
/// Implementations return a field at (Center, Center, Center) on the same
/// grid as the velocities.
pub trait DissipationEstimator {
    fn dissipation(&self, u: &Field, v: &Field, w: &Field, eddy_viscosity: &Field)
        -> Result<Field>;
}

/// Dissipation from the resolved strain rate and an eddy viscosity.
#[derive(Debug, Clone, Copy, Default)]
pub struct StrainRateDissipation;

/// Half the sum of two cross derivatives, squared, then moved to centers.
fn off_diagonal_squared(a: &Field, b: &Field) -> Result<Array3<f64>> {
    let sum = add(a, b)?;
    let strain = sum.data().mapv(|s| 0.25 * s * s);
    let at_edges = Field::from_parts(sum.grid().clone(), sum.location(), strain);
    Ok(values_at(&at_edges, CCC).into_owned())
}

impl DissipationEstimator for StrainRateDissipation {
    fn dissipation(
        &self,
        u: &Field,
        v: &Field,
        w: &Field,
        eddy_viscosity: &Field,
    ) -> Result<Field> {
        let grid = u.grid();
        ensure_same_grid("v", grid, v.grid())?;
        ensure_same_grid("w", grid, w.grid())?;
        ensure_same_grid("eddy viscosity", grid, eddy_viscosity.grid())?;
        u.expect_location("u", FCC)?;
        v.expect_location("v", CFC)?;
        w.expect_location("w", CCF)?;
        eddy_viscosity.expect_location("eddy viscosity", CCC)?;

        let s11 = d_dx_field(u);
        let s22 = d_dy_field(v);
        let s33 = d_dz_field(w);

        let dudy = d_dy_field(u);
        let dvdx = d_dx_field(v);
        debug_assert_eq!((dudy.location(), dvdx.location()), (FFC, FFC));
        let s12_sq = off_diagonal_squared(&dudy, &dvdx)?;

        let dudz = d_dz_field(u);
        let dwdx = d_dx_field(w);
        debug_assert_eq!((dudz.location(), dwdx.location()), (FCF, FCF));
        let s13_sq = off_diagonal_squared(&dudz, &dwdx)?;

        let dvdz = d_dz_field(v);
        let dwdy = d_dy_field(w);
        debug_assert_eq!((dvdz.location(), dwdy.location()), (CFF, CFF));
        let s23_sq = off_diagonal_squared(&dvdz, &dwdy)?;

        let mut epsilon = Array3::zeros(grid.shape(CCC));
        Zip::from(&mut epsilon)
            .and(eddy_viscosity.data())
            .and(s11.data())
            .and(s22.data())
            .and(s33.data())
            .and(&s12_sq)
            .par_for_each(|eps, &nu, &a, &b, &c, &d| {
                *eps = 2.0 * nu * (a * a + b * b + c * c + 2.0 * d);
            });
        Zip::from(&mut epsilon)
            .and(eddy_viscosity.data())
            .and(&s13_sq)
            .and(&s23_sq)
            .par_for_each(|eps, &nu, &e, &f| *eps += 4.0 * nu * (e + f));

        Ok(Field::from_parts(grid.clone(), CCC, epsilon))
    }
}
