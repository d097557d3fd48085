//! Default derivation of budget inputs from a model object.
//!
//! A model that stores its prognostic state can hand the budget everything it
//! needs: pressure is the sum of its hydrostatic and non-hydrostatic parts and
//! buoyancy comes either from a tracer or from a linear equation of state
//! applied to temperature and salinity.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::Arc;

use log::debug;
use ndarray::Zip;

use crate::algebra::add;
use crate::budget::TkeInputs;
use crate::error::{Result, TkeError};
use crate::field::Field;
use crate::grid::{ensure_same_grid, Grid, Loc3, CCC, CCF, CFC, FCC};

/// Velocity component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Component {
    U,
    V,
    W,
}

impl Component {
    pub const ALL: [Component; 3] = [Component::U, Component::V, Component::W];

    pub fn name(self) -> &'static str {
        match self {
            Component::U => "u",
            Component::V => "v",
            Component::W => "w",
        }
    }

    /// Staggered location the component lives at.
    pub fn location(self) -> Loc3 {
        match self {
            Component::U => FCC,
            Component::V => CFC,
            Component::W => CCF,
        }
    }
}

/// How a model turns its tracers into buoyancy.
#[derive(Debug, Clone, PartialEq)]
pub enum BuoyancyModel {
    /// Buoyancy is carried directly as the named tracer.
    Tracer { name: String },
    /// b = g (α T − β S) from tracers `T` and `S`.
    LinearEquationOfState {
        gravitational_acceleration: f64,
        thermal_expansion: f64,
        haline_contraction: f64,
    },
}

impl BuoyancyModel {
    pub const TEMPERATURE: &'static str = "T";
    pub const SALINITY: &'static str = "S";

    pub fn tracer(name: impl Into<String>) -> Self {
        BuoyancyModel::Tracer { name: name.into() }
    }

    /// Linear equation of state with typical seawater coefficients.
    pub fn seawater() -> Self {
        BuoyancyModel::LinearEquationOfState {
            gravitational_acceleration: 9.80665,
            thermal_expansion: 1.67e-4,
            haline_contraction: 7.80e-4,
        }
    }

    /// Buoyancy at cell centers for `model`'s current tracers.
    pub fn buoyancy<'a, M>(&self, model: &'a M) -> Result<Cow<'a, Field>>
    where
        M: SimulationModel + ?Sized,
    {
        match self {
            BuoyancyModel::Tracer { name } => Ok(Cow::Borrowed(tracer(model, name)?)),
            BuoyancyModel::LinearEquationOfState {
                gravitational_acceleration: g,
                thermal_expansion: alpha,
                haline_contraction: beta,
            } => {
                let temperature = tracer(model, Self::TEMPERATURE)?;
                let salinity = tracer(model, Self::SALINITY)?;
                salinity.expect_location("salinity", temperature.location())?;
                ensure_same_grid("salinity", temperature.grid(), salinity.grid())?;
                debug!("buoyancy from linear equation of state (g={g}, α={alpha}, β={beta})");
                let data = Zip::from(temperature.data())
                    .and(salinity.data())
                    .par_map_collect(|&t, &s| g * (alpha * t - beta * s));
                Ok(Cow::Owned(Field::from_parts(
                    temperature.grid().clone(),
                    temperature.location(),
                    data,
                )))
            }
        }
    }
}

fn tracer<'a, M>(model: &'a M, name: &str) -> Result<&'a Field>
where
    M: SimulationModel + ?Sized,
{
    model
        .tracer(name)
        .ok_or_else(|| TkeError::MissingInput(format!("tracer {name}")))
}

/// Read access to the state of a running or stored simulation.
pub trait SimulationModel {
    fn grid(&self) -> &Arc<Grid>;

    fn velocity(&self, component: Component) -> Option<&Field>;

    fn hydrostatic_pressure(&self) -> Option<&Field> {
        None
    }

    fn nonhydrostatic_pressure(&self) -> Option<&Field>;

    fn tracer(&self, name: &str) -> Option<&Field>;

    /// Already diagnosed buoyancy; takes precedence over [`Self::buoyancy_model`].
    fn buoyancy(&self) -> Option<&Field> {
        None
    }

    fn buoyancy_model(&self) -> Option<&BuoyancyModel>;

    fn eddy_viscosity(&self) -> Option<&Field>;
}

/// Budget inputs gathered from a model; derived fields are owned here.
#[derive(Debug, Clone)]
pub struct DerivedInputs<'a> {
    pub u: &'a Field,
    pub v: &'a Field,
    pub w: &'a Field,
    pub pressure: Cow<'a, Field>,
    pub buoyancy: Cow<'a, Field>,
    pub eddy_viscosity: &'a Field,
}

impl DerivedInputs<'_> {
    pub fn as_inputs(&self) -> TkeInputs<'_> {
        TkeInputs::new(
            self.u,
            self.v,
            self.w,
            &self.pressure,
            &self.buoyancy,
            self.eddy_viscosity,
        )
    }
}

fn velocity<M>(model: &M, component: Component) -> Result<&Field>
where
    M: SimulationModel + ?Sized,
{
    model
        .velocity(component)
        .ok_or_else(|| TkeError::MissingInput(component.name().to_string()))
}

/// p = p_hydrostatic + p_nonhydrostatic, with either part optional.
fn total_pressure<M>(model: &M) -> Result<Cow<'_, Field>>
where
    M: SimulationModel + ?Sized,
{
    match (model.hydrostatic_pressure(), model.nonhydrostatic_pressure()) {
        (Some(hydrostatic), Some(nonhydrostatic)) => {
            hydrostatic.expect_location("hydrostatic pressure", CCC)?;
            nonhydrostatic.expect_location("non-hydrostatic pressure", CCC)?;
            Ok(Cow::Owned(add(hydrostatic, nonhydrostatic)?))
        }
        (Some(pressure), None) | (None, Some(pressure)) => Ok(Cow::Borrowed(pressure)),
        (None, None) => Err(TkeError::MissingInput("pressure".to_string())),
    }
}

/// Gathers budget inputs from `model`, deriving pressure and buoyancy.
pub fn derive_inputs<M>(model: &M) -> Result<DerivedInputs<'_>>
where
    M: SimulationModel + ?Sized,
{
    let u = velocity(model, Component::U)?;
    let v = velocity(model, Component::V)?;
    let w = velocity(model, Component::W)?;
    let pressure = total_pressure(model)?;
    let buoyancy = match (model.buoyancy(), model.buoyancy_model()) {
        (Some(b), _) => Cow::Borrowed(b),
        (None, Some(buoyancy_model)) => buoyancy_model.buoyancy(model)?,
        (None, None) => return Err(TkeError::MissingInput("buoyancy".to_string())),
    };
    let eddy_viscosity = model
        .eddy_viscosity()
        .ok_or_else(|| TkeError::MissingInput("eddy viscosity".to_string()))?;

    ensure_same_grid("u", model.grid(), u.grid())?;
    Ok(DerivedInputs {
        u,
        v,
        w,
        pressure,
        buoyancy,
        eddy_viscosity,
    })
}

/// In-memory model state.
#[derive(Debug, Clone)]
pub struct ModelSnapshot {
    grid: Arc<Grid>,
    velocities: [Option<Field>; 3],
    hydrostatic_pressure: Option<Field>,
    nonhydrostatic_pressure: Option<Field>,
    tracers: BTreeMap<String, Field>,
    buoyancy: Option<Field>,
    buoyancy_model: Option<BuoyancyModel>,
    eddy_viscosity: Option<Field>,
}

impl ModelSnapshot {
    pub fn new(grid: Arc<Grid>) -> Self {
        Self {
            grid,
            velocities: [None, None, None],
            hydrostatic_pressure: None,
            nonhydrostatic_pressure: None,
            tracers: BTreeMap::new(),
            buoyancy: None,
            buoyancy_model: None,
            eddy_viscosity: None,
        }
    }

    pub fn with_velocities(mut self, u: Field, v: Field, w: Field) -> Self {
        self.velocities = [Some(u), Some(v), Some(w)];
        self
    }

    pub fn with_hydrostatic_pressure(mut self, pressure: Field) -> Self {
        self.hydrostatic_pressure = Some(pressure);
        self
    }

    pub fn with_nonhydrostatic_pressure(mut self, pressure: Field) -> Self {
        self.nonhydrostatic_pressure = Some(pressure);
        self
    }

    pub fn with_tracer(mut self, name: impl Into<String>, field: Field) -> Self {
        self.tracers.insert(name.into(), field);
        self
    }

    pub fn with_buoyancy(mut self, buoyancy: Field) -> Self {
        self.buoyancy = Some(buoyancy);
        self
    }

    pub fn with_buoyancy_model(mut self, buoyancy_model: BuoyancyModel) -> Self {
        self.buoyancy_model = Some(buoyancy_model);
        self
    }

    pub fn with_eddy_viscosity(mut self, eddy_viscosity: Field) -> Self {
        self.eddy_viscosity = Some(eddy_viscosity);
        self
    }

    /// Uniform viscosity, e.g. the molecular value for a closure-free run.
    pub fn with_constant_viscosity(self, nu: f64) -> Self {
        let field = Field::from_fn(self.grid.clone(), CCC, move |_, _, _| nu);
        self.with_eddy_viscosity(field)
    }
}

impl SimulationModel for ModelSnapshot {
    fn grid(&self) -> &Arc<Grid> {
        &self.grid
    }

    fn velocity(&self, component: Component) -> Option<&Field> {
        let index = match component {
            Component::U => 0,
            Component::V => 1,
            Component::W => 2,
        };
        self.velocities[index].as_ref()
    }

    fn hydrostatic_pressure(&self) -> Option<&Field> {
        self.hydrostatic_pressure.as_ref()
    }

    fn nonhydrostatic_pressure(&self) -> Option<&Field> {
        self.nonhydrostatic_pressure.as_ref()
    }

    fn tracer(&self, name: &str) -> Option<&Field> {
        self.tracers.get(name)
    }

    fn buoyancy(&self) -> Option<&Field> {
        self.buoyancy.as_ref()
    }

    fn buoyancy_model(&self) -> Option<&BuoyancyModel> {
        self.buoyancy_model.as_ref()
    }

    fn eddy_viscosity(&self) -> Option<&Field> {
        self.eddy_viscosity.as_ref()
    }
}
