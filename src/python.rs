use std::sync::Arc;

use numpy::{IntoPyArray, PyReadonlyArray3};
use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::PyDict;

use crate::budget::{self, TkeBudgetConfig, TkeInputs};
use crate::error::TkeError;
use crate::field::Field;
use crate::grid::{Architecture, Dim3, Grid, Loc3, Topology, CCC, CCF, CFC, FCC};

impl From<TkeError> for PyErr {
    fn from(err: TkeError) -> Self {
        match err {
            TkeError::UnsupportedExecutionTarget(_) => PyRuntimeError::new_err(err.to_string()),
            _ => PyValueError::new_err(err.to_string()),
        }
    }
}

/// Regular staggered grid, bounded in z.
///
/// Faces run from 0 to the extent on every axis. Horizontal axes are periodic
/// unless disabled; `gpu=True` tags the grid for an accelerator, which the
/// budget rejects.
#[pyclass(name = "Grid")]
#[derive(Clone)]
pub struct PyGrid {
    inner: Arc<Grid>,
}

#[pymethods]
impl PyGrid {
    #[new]
    #[pyo3(signature = (size, extent, periodic_x=true, periodic_y=true, gpu=false))]
    pub fn new(
        size: (usize, usize, usize),
        extent: (f64, f64, f64),
        periodic_x: bool,
        periodic_y: bool,
        gpu: bool,
    ) -> PyResult<Self> {
        let horizontal = |periodic: bool| {
            if periodic {
                Topology::Periodic
            } else {
                Topology::Bounded
            }
        };
        let topology = [
            horizontal(periodic_x),
            horizontal(periodic_y),
            Topology::Bounded,
        ];
        let architecture = if gpu {
            Architecture::Gpu
        } else {
            Architecture::Cpu
        };
        let grid = Grid::regular(
            [size.0, size.1, size.2],
            [extent.0, extent.1, extent.2],
            topology,
        )?
        .with_architecture(architecture);
        Ok(Self {
            inner: grid.into_shared(),
        })
    }

    #[getter]
    pub fn size(&self) -> (usize, usize, usize) {
        let [nx, ny, nz] = self.inner.sizes();
        (nx, ny, nz)
    }

    #[getter]
    pub fn extent(&self) -> (f64, f64, f64) {
        (
            self.inner.extent(Dim3::X),
            self.inner.extent(Dim3::Y),
            self.inner.extent(Dim3::Z),
        )
    }

    /// Expected array shape for each variable, keyed by name.
    pub fn shapes<'py>(&self, py: Python<'py>) -> PyResult<Bound<'py, PyDict>> {
        let shapes = PyDict::new(py);
        for (name, location) in [("u", FCC), ("v", CFC), ("w", CCF), ("center", CCC)] {
            shapes.set_item(name, self.inner.shape(location))?;
        }
        Ok(shapes)
    }

    fn __repr__(&self) -> String {
        let [nx, ny, nz] = self.inner.sizes();
        format!(
            "Grid(size=({nx}, {ny}, {nz}), architecture={:?})",
            self.inner.architecture()
        )
    }
}

fn field(grid: &Arc<Grid>, location: Loc3, array: &PyReadonlyArray3<'_, f64>) -> PyResult<Field> {
    Ok(Field::new(grid.clone(), location, array.as_array().to_owned())?)
}

/// Horizontally averaged TKE budget of one snapshot.
///
/// Parameters:
/// - u, v, w: velocities at their staggered locations (see `Grid.shapes`)
/// - p: kinematic pressure at cell centers
/// - b: buoyancy at cell centers
/// - nu: eddy viscosity at cell centers
///
/// Returns a dict of 1D arrays keyed by term name. Flux profiles have one
/// more entry than the others (vertical faces).
#[pyfunction]
#[pyo3(signature = (grid, u, v, w, p, b, nu, include_flux_divergences=false))]
#[allow(clippy::too_many_arguments)]
pub fn compute_tke_budget<'py>(
    py: Python<'py>,
    grid: &PyGrid,
    u: PyReadonlyArray3<'py, f64>,
    v: PyReadonlyArray3<'py, f64>,
    w: PyReadonlyArray3<'py, f64>,
    p: PyReadonlyArray3<'py, f64>,
    b: PyReadonlyArray3<'py, f64>,
    nu: PyReadonlyArray3<'py, f64>,
    include_flux_divergences: bool,
) -> PyResult<Bound<'py, PyDict>> {
    let g = &grid.inner;
    let u = field(g, FCC, &u)?;
    let v = field(g, CFC, &v)?;
    let w = field(g, CCF, &w)?;
    let p = field(g, CCC, &p)?;
    let b = field(g, CCC, &b)?;
    let nu = field(g, CCC, &nu)?;

    let inputs = TkeInputs::new(&u, &v, &w, &p, &b, &nu);
    let config = TkeBudgetConfig::default().with_flux_divergences(include_flux_divergences);
    let result = budget::compute_tke_budget(&inputs, config)?;

    let profiles = PyDict::new(py);
    for (term, profile) in result {
        profiles.set_item(term.name(), profile.into_data().into_pyarray(py))?;
    }
    Ok(profiles)
}
