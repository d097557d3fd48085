//! Pointwise arithmetic between fields at possibly different locations.
//!
//! Operands are moved to a common location with [`crate::interpolation`]
//! before the pointwise operation. When two operands disagree on an axis the
//! result sits on faces, the finer node set on a bounded axis.

use ndarray::{Array3, Axis, Zip};

use crate::error::{Result, TkeError};
use crate::field::{Field, Profile};
use crate::grid::{ensure_same_grid, Loc3, Location};
use crate::interpolation::values_at;

/// Location at which a binary operation between `a` and `b` is evaluated.
pub fn common_location(a: Loc3, b: Loc3) -> Loc3 {
    [0, 1, 2].map(|d| {
        if a[d] == b[d] {
            a[d]
        } else {
            Location::Face
        }
    })
}

fn combine_at<F>(target: Loc3, a: &Field, b: &Field, op: F) -> Result<Field>
where
    F: Fn(f64, f64) -> f64 + Sync + Send,
{
    ensure_same_grid("second operand", a.grid(), b.grid())?;
    let av = values_at(a, target);
    let bv = values_at(b, target);
    let data: Array3<f64> = Zip::from(&*av)
        .and(&*bv)
        .par_map_collect(|&x, &y| op(x, y));
    Ok(Field::from_parts(a.grid().clone(), target, data))
}

/// Pointwise product at the common location of `a` and `b`.
pub fn multiply(a: &Field, b: &Field) -> Result<Field> {
    multiply_at(common_location(a.location(), b.location()), a, b)
}

/// Pointwise product evaluated at an explicit location.
pub fn multiply_at(target: Loc3, a: &Field, b: &Field) -> Result<Field> {
    combine_at(target, a, b, |x, y| x * y)
}

/// Writes the product of `a` and `b`, evaluated at `dest`'s location, into
/// `dest`. Nothing is written when the grids disagree.
pub fn multiply_into(dest: &mut Field, a: &Field, b: &Field) -> Result<()> {
    ensure_same_grid("destination", a.grid(), dest.grid())?;
    ensure_same_grid("second operand", a.grid(), b.grid())?;
    let target = dest.location();
    let av = values_at(a, target);
    let bv = values_at(b, target);
    Zip::from(dest.data_mut())
        .and(&*av)
        .and(&*bv)
        .par_for_each(|d, &x, &y| *d = x * y);
    Ok(())
}

pub fn add(a: &Field, b: &Field) -> Result<Field> {
    combine_at(common_location(a.location(), b.location()), a, b, |x, y| x + y)
}

pub fn subtract(a: &Field, b: &Field) -> Result<Field> {
    combine_at(common_location(a.location(), b.location()), a, b, |x, y| x - y)
}

pub fn scale(field: &Field, factor: f64) -> Field {
    let data = field.data().mapv(|v| v * factor);
    Field::from_parts(field.grid().clone(), field.location(), data)
}

/// Pointwise square at the field's own location.
pub fn square(field: &Field) -> Field {
    let data = field.data().mapv(|v| v * v);
    Field::from_parts(field.grid().clone(), field.location(), data)
}

fn check_profile(field: &Field, profile: &Profile) -> Result<()> {
    ensure_same_grid("profile", field.grid(), profile.grid())?;
    let z_loc = field.location()[2];
    if profile.location() != z_loc {
        return Err(TkeError::location_mismatch(
            "profile",
            z_loc,
            profile.location(),
        ));
    }
    Ok(())
}

/// Fluctuation of `field` about a horizontal-mean `profile`.
///
/// The profile must share the field's vertical location.
pub fn subtract_profile(field: &Field, profile: &Profile) -> Result<Field> {
    check_profile(field, profile)?;
    let mut data = field.data().to_owned();
    for (mut level, &mean) in data.axis_iter_mut(Axis(2)).zip(profile.data().iter()) {
        level.mapv_inplace(|v| v - mean);
    }
    Ok(Field::from_parts(field.grid().clone(), field.location(), data))
}

/// Product of `field` with a profile broadcast over the horizontal.
pub fn multiply_profile(field: &Field, profile: &Profile) -> Result<Field> {
    check_profile(field, profile)?;
    let mut data = field.data().to_owned();
    for (mut level, &factor) in data.axis_iter_mut(Axis(2)).zip(profile.data().iter()) {
        level.mapv_inplace(|v| v * factor);
    }
    Ok(Field::from_parts(field.grid().clone(), field.location(), data))
}
