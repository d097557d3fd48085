//! Turbulent kinetic energy budget diagnostics on staggered grids.
//!
//! Velocities, pressure, buoyancy and eddy viscosity sampled on an
//! Arakawa C-grid are reduced to horizontally averaged vertical profiles of
//! every term in the TKE equation. The numerics live in plain Rust; the
//! `python` feature adds a PyO3 extension module on top.

#[cfg(feature = "python")]
use pyo3::prelude::*;

pub mod algebra;
pub mod averaging;
pub mod budget;
pub mod differencing;
pub mod dissipation;
pub mod error;
pub mod field;
pub mod grid;
pub mod interpolation;
pub mod model;
#[cfg(feature = "python")]
mod python;

pub use budget::{
    compute_tke_budget, compute_tke_budget_from_model, compute_tke_budget_with, BudgetResult,
    BudgetTerm, TkeBudgetConfig, TkeInputs,
};
pub use dissipation::{DissipationEstimator, StrainRateDissipation};
pub use error::{Result, TkeError};
pub use field::{Field, Profile};
pub use grid::{Architecture, Grid, Loc3, Location, Topology};
pub use model::{BuoyancyModel, Component, DerivedInputs, ModelSnapshot, SimulationModel};

#[cfg(feature = "python")]
#[pymodule]
fn tke_budgets(py_module: &Bound<'_, PyModule>) -> PyResult<()> {
    register_budget_module(py_module)?;

    // Horizontal reductions only run on the CPU.
    py_module.add("GPU_SUPPORTED", false)?;

    py_module.add(
        "__doc__",
        "Turbulent kinetic energy budget diagnostics implemented in Rust.",
    )?;

    Ok(())
}

#[cfg(feature = "python")]
fn register_budget_module(py_module: &Bound<'_, PyModule>) -> PyResult<()> {
    let submodule = PyModule::new(py_module.py(), "budget")?;
    submodule.add("__doc__", "Horizontally averaged TKE budget terms.")?;
    submodule.add_class::<python::PyGrid>()?;
    submodule.add_function(wrap_pyfunction!(python::compute_tke_budget, &submodule)?)?;
    py_module.add_submodule(&submodule)?;
    Ok(())
}
