//! Location-tagged 3D fields and 1D vertical profiles.

use std::sync::Arc;

use ndarray::{Array1, Array3, ArrayView1, ArrayView3, ArrayViewMut3, Zip};

use crate::error::{Result, TkeError};
use crate::grid::{Dim3, Grid, Loc3, Location};

/// Values sampled at one staggered location of a grid.
#[derive(Debug, Clone)]
pub struct Field {
    grid: Arc<Grid>,
    location: Loc3,
    data: Array3<f64>,
}

impl Field {
    /// Wraps `data`, checking its shape against the grid and location.
    pub fn new(grid: Arc<Grid>, location: Loc3, data: Array3<f64>) -> Result<Self> {
        let (nx, ny, nz) = grid.shape(location);
        if data.dim() != (nx, ny, nz) {
            return Err(TkeError::ShapeMismatch {
                expected: vec![nx, ny, nz],
                actual: data.shape().to_vec(),
            });
        }
        Ok(Self {
            grid,
            location,
            data,
        })
    }

    /// Shape is trusted; callers derive `data` from the same grid and location.
    pub(crate) fn from_parts(grid: Arc<Grid>, location: Loc3, data: Array3<f64>) -> Self {
        debug_assert_eq!(data.dim(), grid.shape(location));
        Self {
            grid,
            location,
            data,
        }
    }

    pub fn zeros(grid: Arc<Grid>, location: Loc3) -> Self {
        let data = Array3::zeros(grid.shape(location));
        Self {
            grid,
            location,
            data,
        }
    }

    /// Samples `f(x, y, z)` at every node of `location`.
    pub fn from_fn<F>(grid: Arc<Grid>, location: Loc3, f: F) -> Self
    where
        F: Fn(f64, f64, f64) -> f64 + Sync,
    {
        let xs = grid.nodes(Dim3::X, location[0]).to_owned();
        let ys = grid.nodes(Dim3::Y, location[1]).to_owned();
        let zs = grid.nodes(Dim3::Z, location[2]).to_owned();
        let mut data = Array3::zeros(grid.shape(location));
        Zip::indexed(&mut data).par_for_each(|(i, j, k), v| *v = f(xs[i], ys[j], zs[k]));
        Self {
            grid,
            location,
            data,
        }
    }

    pub fn grid(&self) -> &Arc<Grid> {
        &self.grid
    }

    pub fn location(&self) -> Loc3 {
        self.location
    }

    pub fn data(&self) -> &Array3<f64> {
        &self.data
    }

    pub fn view(&self) -> ArrayView3<'_, f64> {
        self.data.view()
    }

    /// Mutable access to the values; the shape stays fixed.
    pub fn data_mut(&mut self) -> ArrayViewMut3<'_, f64> {
        self.data.view_mut()
    }

    pub fn into_data(self) -> Array3<f64> {
        self.data
    }

    #[inline]
    pub fn value_at(&self, index: [usize; 3]) -> f64 {
        self.data[index]
    }

    pub(crate) fn expect_location(&self, what: &str, expected: Loc3) -> Result<()> {
        if self.location == expected {
            Ok(())
        } else {
            Err(TkeError::location_mismatch(
                what,
                format!("{:?}", expected),
                format!("{:?}", self.location),
            ))
        }
    }
}

/// Vertical profile: one value per vertical node, constant in the horizontal.
#[derive(Debug, Clone)]
pub struct Profile {
    grid: Arc<Grid>,
    location: Location,
    data: Array1<f64>,
}

impl Profile {
    pub fn new(grid: Arc<Grid>, location: Location, data: Array1<f64>) -> Result<Self> {
        let n = grid.node_count(Dim3::Z, location);
        if data.len() != n {
            return Err(TkeError::ShapeMismatch {
                expected: vec![n],
                actual: vec![data.len()],
            });
        }
        Ok(Self {
            grid,
            location,
            data,
        })
    }

    pub(crate) fn from_parts(grid: Arc<Grid>, location: Location, data: Array1<f64>) -> Self {
        debug_assert_eq!(data.len(), grid.node_count(Dim3::Z, location));
        Self {
            grid,
            location,
            data,
        }
    }

    pub fn zeros(grid: Arc<Grid>, location: Location) -> Self {
        let data = Array1::zeros(grid.node_count(Dim3::Z, location));
        Self {
            grid,
            location,
            data,
        }
    }

    /// Samples `f(z)` at every vertical node of `location`.
    pub fn from_fn<F>(grid: Arc<Grid>, location: Location, f: F) -> Self
    where
        F: Fn(f64) -> f64,
    {
        let data = grid.nodes(Dim3::Z, location).mapv(f);
        Self {
            grid,
            location,
            data,
        }
    }

    pub fn grid(&self) -> &Arc<Grid> {
        &self.grid
    }

    pub fn location(&self) -> Location {
        self.location
    }

    pub fn data(&self) -> &Array1<f64> {
        &self.data
    }

    pub fn view(&self) -> ArrayView1<'_, f64> {
        self.data.view()
    }

    pub fn into_data(self) -> Array1<f64> {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn value_at(&self, k: usize) -> f64 {
        self.data[k]
    }

    pub fn to_vec(&self) -> Vec<f64> {
        self.data.to_vec()
    }
}
