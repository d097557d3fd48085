//! Turbulent kinetic energy budget assembled from one model snapshot.
//!
//! Orchestrates: fluctuations → TKE → shear production → dissipation →
//! advective / pressure / buoyancy fluxes → horizontal averages → optional
//! flux divergences. Every term is returned as a vertical profile.
//!
//! Fluctuations are taken about horizontal means: u′ = u − U, v′ = v − V and
//! w′ = w − W. The flux correlations multiply w′ with the raw scalar; since
//! ⟨w′⟩ vanishes on every level this is exactly the covariance ⟨w′φ′⟩.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use log::{debug, trace, warn};
use ndarray::Zip;

use crate::algebra::{multiply_at, multiply_into, multiply_profile, square, subtract_profile};
use crate::averaging::average_horizontal;
use crate::differencing::{d_dz, d_dz_field};
use crate::dissipation::{DissipationEstimator, StrainRateDissipation};
use crate::error::{Result, TkeError};
use crate::field::{Field, Profile};
use crate::grid::{
    ensure_same_grid, Architecture, Grid, Loc3, Location, CCC, CCF, CFC, CFF, FCC, FCF,
};
use crate::interpolation::values_at;
use crate::model::{derive_inputs, DerivedInputs, SimulationModel};

// ── Output keys ────────────────────────────────────────────────────────────

/// Named term of the budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BudgetTerm {
    TurbulentKineticEnergy,
    ShearProduction,
    AdvectiveFlux,
    PressureFlux,
    Dissipation,
    BuoyancyFlux,
    AdvectiveFluxDivergence,
    PressureFluxDivergence,
}

impl BudgetTerm {
    pub const ALL: [BudgetTerm; 8] = [
        BudgetTerm::TurbulentKineticEnergy,
        BudgetTerm::ShearProduction,
        BudgetTerm::AdvectiveFlux,
        BudgetTerm::PressureFlux,
        BudgetTerm::Dissipation,
        BudgetTerm::BuoyancyFlux,
        BudgetTerm::AdvectiveFluxDivergence,
        BudgetTerm::PressureFluxDivergence,
    ];

    pub fn name(self) -> &'static str {
        match self {
            BudgetTerm::TurbulentKineticEnergy => "turbulent_kinetic_energy",
            BudgetTerm::ShearProduction => "tke_shear_production",
            BudgetTerm::AdvectiveFlux => "tke_advective_flux",
            BudgetTerm::PressureFlux => "tke_pressure_flux",
            BudgetTerm::Dissipation => "tke_dissipation",
            BudgetTerm::BuoyancyFlux => "tke_buoyancy_flux",
            BudgetTerm::AdvectiveFluxDivergence => "tke_advective_flux_divergence",
            BudgetTerm::PressureFluxDivergence => "tke_pressure_flux_divergence",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|term| term.name() == name)
    }

    /// Vertical location of the term's profile.
    pub fn location(self) -> Location {
        match self {
            BudgetTerm::AdvectiveFlux | BudgetTerm::PressureFlux => Location::Face,
            _ => Location::Center,
        }
    }

    /// Only present when flux divergences are requested.
    pub fn is_divergence(self) -> bool {
        matches!(
            self,
            BudgetTerm::AdvectiveFluxDivergence | BudgetTerm::PressureFluxDivergence
        )
    }
}

impl fmt::Display for BudgetTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Profiles keyed by budget term. Ownership passes entirely to the caller.
#[derive(Debug, Clone, Default)]
pub struct BudgetResult {
    profiles: BTreeMap<BudgetTerm, Profile>,
}

impl BudgetResult {
    fn insert(&mut self, term: BudgetTerm, profile: Profile) {
        debug_assert_eq!(profile.location(), term.location());
        trace!("{} ready ({} levels)", term, profile.len());
        self.profiles.insert(term, profile);
    }

    pub fn get(&self, term: BudgetTerm) -> Option<&Profile> {
        self.profiles.get(&term)
    }

    pub fn get_by_name(&self, name: &str) -> Option<&Profile> {
        BudgetTerm::from_name(name).and_then(|term| self.get(term))
    }

    pub fn contains(&self, term: BudgetTerm) -> bool {
        self.profiles.contains_key(&term)
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    pub fn terms(&self) -> impl Iterator<Item = BudgetTerm> + '_ {
        self.profiles.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (BudgetTerm, &Profile)> {
        self.profiles.iter().map(|(term, profile)| (*term, profile))
    }
}

impl IntoIterator for BudgetResult {
    type Item = (BudgetTerm, Profile);
    type IntoIter = std::collections::btree_map::IntoIter<BudgetTerm, Profile>;

    fn into_iter(self) -> Self::IntoIter {
        self.profiles.into_iter()
    }
}

// ── Inputs and configuration ───────────────────────────────────────────────

/// Instantaneous model fields. Every entry is required; a `None` surfaces as
/// [`TkeError::MissingInput`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TkeInputs<'a> {
    /// x velocity at (Face, Center, Center).
    pub u: Option<&'a Field>,
    /// y velocity at (Center, Face, Center).
    pub v: Option<&'a Field>,
    /// z velocity at (Center, Center, Face).
    pub w: Option<&'a Field>,
    /// Kinematic pressure at cell centers.
    pub pressure: Option<&'a Field>,
    /// Buoyancy at cell centers.
    pub buoyancy: Option<&'a Field>,
    /// Eddy viscosity at cell centers.
    pub eddy_viscosity: Option<&'a Field>,
}

impl<'a> TkeInputs<'a> {
    pub fn new(
        u: &'a Field,
        v: &'a Field,
        w: &'a Field,
        pressure: &'a Field,
        buoyancy: &'a Field,
        eddy_viscosity: &'a Field,
    ) -> Self {
        Self {
            u: Some(u),
            v: Some(v),
            w: Some(w),
            pressure: Some(pressure),
            buoyancy: Some(buoyancy),
            eddy_viscosity: Some(eddy_viscosity),
        }
    }
}

/// Options for one budget evaluation.
///
/// Horizontal means of `u` and `v` are computed from the velocities unless
/// supplied. Scratch buffers, when given, are borrowed exclusively for the
/// call and overwritten; the face buffer must sit at (Center, Center, Face)
/// and the center buffer at (Center, Center, Center), both on the inputs'
/// grid. Without them the intermediates are allocated per call.
#[derive(Debug, Default)]
pub struct TkeBudgetConfig<'a> {
    pub include_flux_divergences: bool,
    pub mean_u: Option<&'a Profile>,
    pub mean_v: Option<&'a Profile>,
    pub scratch_face: Option<&'a mut Field>,
    pub scratch_center: Option<&'a mut Field>,
}

impl<'a> TkeBudgetConfig<'a> {
    pub fn with_flux_divergences(mut self, include: bool) -> Self {
        self.include_flux_divergences = include;
        self
    }

    pub fn with_mean_velocities(mut self, mean_u: &'a Profile, mean_v: &'a Profile) -> Self {
        self.mean_u = Some(mean_u);
        self.mean_v = Some(mean_v);
        self
    }

    pub fn with_scratch_face(mut self, buffer: &'a mut Field) -> Self {
        self.scratch_face = Some(buffer);
        self
    }

    pub fn with_scratch_center(mut self, buffer: &'a mut Field) -> Self {
        self.scratch_center = Some(buffer);
        self
    }
}

// ── Validation ─────────────────────────────────────────────────────────────

fn require<'a>(field: Option<&'a Field>, name: &str) -> Result<&'a Field> {
    field.ok_or_else(|| TkeError::MissingInput(name.to_string()))
}

fn check_mean(grid: &Arc<Grid>, name: &str, mean: Option<&Profile>) -> Result<()> {
    if let Some(profile) = mean {
        ensure_same_grid(name, grid, profile.grid())?;
        if profile.location() != Location::Center {
            return Err(TkeError::location_mismatch(
                name,
                Location::Center,
                profile.location(),
            ));
        }
    }
    Ok(())
}

fn check_scratch(
    grid: &Arc<Grid>,
    name: &str,
    buffer: Option<&Field>,
    expected: Loc3,
) -> Result<()> {
    if let Some(buffer) = buffer {
        ensure_same_grid(name, grid, buffer.grid())?;
        buffer.expect_location(name, expected)?;
    }
    Ok(())
}

fn mean_or_average<'a>(
    supplied: Option<&'a Profile>,
    field: &Field,
) -> Result<Cow<'a, Profile>> {
    match supplied {
        Some(profile) => Ok(Cow::Borrowed(profile)),
        None => Ok(Cow::Owned(average_horizontal(field)?)),
    }
}

// ── Pointwise terms ────────────────────────────────────────────────────────

/// e = ½(u′² + v′² + w′²) at cell centers, written into `dest`.
///
/// Each square is formed at its component's own location and then
/// interpolated, so `e` is non-negative wherever the inputs are finite.
fn kinetic_energy_into(dest: &mut Field, u: &Field, v: &Field, w: &Field) {
    let uu = square(u);
    let vv = square(v);
    let ww = square(w);
    let uu = values_at(&uu, CCC);
    let vv = values_at(&vv, CCC);
    let ww = values_at(&ww, CCC);
    Zip::from(dest.data_mut())
        .and(&*uu)
        .and(&*vv)
        .and(&*ww)
        .par_for_each(|e, &a, &b, &c| *e = 0.5 * (a + b + c));
}

/// −u′w′ ∂U/∂z − v′w′ ∂V/∂z at cell centers, written into `dest`.
///
/// The momentum fluxes are formed on the edges where ∂U/∂z and ∂V/∂z live,
/// (Face, Center, Face) and (Center, Face, Face), and moved to centers last.
fn shear_production_into(
    dest: &mut Field,
    u: &Field,
    v: &Field,
    w: &Field,
    mean_u: &Profile,
    mean_v: &Profile,
) -> Result<()> {
    let dudz = d_dz(mean_u);
    let dvdz = d_dz(mean_v);

    let uw = multiply_at(FCF, u, w)?;
    let uw_shear = multiply_profile(&uw, &dudz)?;
    let vw = multiply_at(CFF, v, w)?;
    let vw_shear = multiply_profile(&vw, &dvdz)?;

    let x_part = values_at(&uw_shear, CCC);
    let y_part = values_at(&vw_shear, CCC);
    Zip::from(dest.data_mut())
        .and(&*x_part)
        .and(&*y_part)
        .par_for_each(|sp, &a, &b| *sp = -(a + b));
    Ok(())
}

// ── Budget assembler ───────────────────────────────────────────────────────

/// Computes the TKE budget profiles with the strain-rate dissipation
/// estimator.
///
/// Returns six profiles, or eight when `config.include_flux_divergences` is
/// set. Fails before touching any scratch buffer when inputs are missing, live
/// on different grids, sit at the wrong locations or target the GPU.
pub fn compute_tke_budget(
    inputs: &TkeInputs<'_>,
    config: TkeBudgetConfig<'_>,
) -> Result<BudgetResult> {
    compute_tke_budget_with(&StrainRateDissipation, inputs, config)
}

/// Same as [`compute_tke_budget`] with a caller-supplied dissipation estimator.
pub fn compute_tke_budget_with<E>(
    estimator: &E,
    inputs: &TkeInputs<'_>,
    config: TkeBudgetConfig<'_>,
) -> Result<BudgetResult>
where
    E: DissipationEstimator + ?Sized,
{
    let u = require(inputs.u, "u")?;
    let v = require(inputs.v, "v")?;
    let w = require(inputs.w, "w")?;
    let p = require(inputs.pressure, "pressure")?;
    let b = require(inputs.buoyancy, "buoyancy")?;
    let nu = require(inputs.eddy_viscosity, "eddy viscosity")?;

    let grid = u.grid().clone();
    if grid.architecture() != Architecture::Cpu {
        return Err(TkeError::UnsupportedExecutionTarget(grid.architecture()));
    }
    for (name, field) in [
        ("v", v),
        ("w", w),
        ("pressure", p),
        ("buoyancy", b),
        ("eddy viscosity", nu),
    ] {
        ensure_same_grid(name, &grid, field.grid())?;
    }
    u.expect_location("u", FCC)?;
    v.expect_location("v", CFC)?;
    w.expect_location("w", CCF)?;
    p.expect_location("pressure", CCC)?;
    b.expect_location("buoyancy", CCC)?;
    nu.expect_location("eddy viscosity", CCC)?;

    let TkeBudgetConfig {
        include_flux_divergences,
        mean_u,
        mean_v,
        scratch_face,
        scratch_center,
    } = config;
    check_mean(&grid, "mean u", mean_u)?;
    check_mean(&grid, "mean v", mean_v)?;
    check_scratch(&grid, "face scratch buffer", scratch_face.as_deref(), CCF)?;
    check_scratch(&grid, "center scratch buffer", scratch_center.as_deref(), CCC)?;

    debug!(
        "TKE budget on {:?} grid: divergences={}, supplied means={}, scratch buffers={}",
        grid.sizes(),
        include_flux_divergences,
        mean_u.is_some() && mean_v.is_some(),
        scratch_face.is_some() || scratch_center.is_some(),
    );
    if !grid.is_horizontally_periodic() {
        warn!("bounded horizontal axis: boundary faces are weighted with the adjacent cell width");
    }

    let mut face_storage = None;
    let face = match scratch_face {
        Some(buffer) => buffer,
        None => face_storage.insert(Field::zeros(grid.clone(), CCF)),
    };
    let mut center_storage = None;
    let center = match scratch_center {
        Some(buffer) => buffer,
        None => center_storage.insert(Field::zeros(grid.clone(), CCC)),
    };

    let mean_u = mean_or_average(mean_u, u)?;
    let mean_v = mean_or_average(mean_v, v)?;
    let mean_w = average_horizontal(w)?;

    let u_prime = subtract_profile(u, &mean_u)?;
    let v_prime = subtract_profile(v, &mean_v)?;
    let w_prime = subtract_profile(w, &mean_w)?;

    let mut result = BudgetResult::default();

    // e stays in the center buffer until the advective flux has used it.
    kinetic_energy_into(center, &u_prime, &v_prime, &w_prime);
    result.insert(BudgetTerm::TurbulentKineticEnergy, average_horizontal(center)?);

    multiply_into(face, &w_prime, center)?;
    result.insert(BudgetTerm::AdvectiveFlux, average_horizontal(face)?);
    if include_flux_divergences {
        result.insert(
            BudgetTerm::AdvectiveFluxDivergence,
            average_horizontal(&d_dz_field(face))?,
        );
    }

    multiply_into(face, &w_prime, p)?;
    result.insert(BudgetTerm::PressureFlux, average_horizontal(face)?);
    if include_flux_divergences {
        result.insert(
            BudgetTerm::PressureFluxDivergence,
            average_horizontal(&d_dz_field(face))?,
        );
    }

    shear_production_into(center, &u_prime, &v_prime, &w_prime, &mean_u, &mean_v)?;
    result.insert(BudgetTerm::ShearProduction, average_horizontal(center)?);

    // w′b is formed on the w faces and moved to centers afterwards.
    multiply_into(face, &w_prime, b)?;
    center.data_mut().assign(&values_at(face, CCC));
    result.insert(BudgetTerm::BuoyancyFlux, average_horizontal(center)?);

    let epsilon = estimator.dissipation(u, v, w, nu)?;
    ensure_same_grid("dissipation", &grid, epsilon.grid())?;
    epsilon.expect_location("dissipation", CCC)?;
    result.insert(BudgetTerm::Dissipation, average_horizontal(&epsilon)?);

    Ok(result)
}

impl<'a> TkeInputs<'a> {
    /// Inputs gathered from `model`, deriving pressure and buoyancy where
    /// the model does not store them directly.
    pub fn from_model<M>(model: &'a M) -> Result<DerivedInputs<'a>>
    where
        M: SimulationModel + ?Sized,
    {
        derive_inputs(model)
    }
}

/// Budget for a model object, deriving pressure, buoyancy and the other
/// inputs the model can provide.
pub fn compute_tke_budget_from_model<M>(
    model: &M,
    config: TkeBudgetConfig<'_>,
) -> Result<BudgetResult>
where
    M: SimulationModel + ?Sized,
{
    let derived = TkeInputs::from_model(model)?;
    compute_tke_budget(&derived.as_inputs(), config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Topology;
    use ndarray::array;
    use std::f64::consts::TAU;

    const N: usize = 16;

    fn grid() -> Arc<Grid> {
        Grid::doubly_periodic([N, 4, 5], [TAU, 1.0, 1.0])
            .unwrap()
            .into_shared()
    }

    struct State {
        u: Field,
        v: Field,
        w: Field,
        p: Field,
        b: Field,
        nu: Field,
    }

    impl State {
        fn zeros(g: &Arc<Grid>) -> Self {
            Self {
                u: Field::zeros(g.clone(), FCC),
                v: Field::zeros(g.clone(), CFC),
                w: Field::zeros(g.clone(), CCF),
                p: Field::zeros(g.clone(), CCC),
                b: Field::zeros(g.clone(), CCC),
                nu: Field::zeros(g.clone(), CCC),
            }
        }

        fn inputs(&self) -> TkeInputs<'_> {
            TkeInputs::new(&self.u, &self.v, &self.w, &self.p, &self.b, &self.nu)
        }
    }

    /// Deterministic pseudo-random values in [-1, 1).
    fn noise(seed: u64) -> impl Fn(f64, f64, f64) -> f64 + Sync {
        move |x, y, z| {
            let h = (x * 12.9898 + y * 78.233 + z * 37.719 + seed as f64).sin() * 43758.5453;
            2.0 * (h - h.floor()) - 1.0
        }
    }

    fn turbulent_state(g: &Arc<Grid>) -> State {
        State {
            u: Field::from_fn(g.clone(), FCC, noise(1)),
            v: Field::from_fn(g.clone(), CFC, noise(2)),
            w: Field::from_fn(g.clone(), CCF, noise(3)),
            p: Field::from_fn(g.clone(), CCC, noise(4)),
            b: Field::from_fn(g.clone(), CCC, noise(5)),
            nu: Field::from_fn(g.clone(), CCC, |_, _, _| 1e-3),
        }
    }

    fn max_abs(profile: &Profile) -> f64 {
        profile.data().iter().fold(0.0_f64, |m, v| m.max(v.abs()))
    }

    #[test]
    fn test_key_sets() {
        let g = grid();
        let state = turbulent_state(&g);
        let plain = compute_tke_budget(&state.inputs(), TkeBudgetConfig::default()).unwrap();
        assert_eq!(plain.len(), 6);
        assert!(plain.terms().all(|t| !t.is_divergence()));

        let full = compute_tke_budget(
            &state.inputs(),
            TkeBudgetConfig::default().with_flux_divergences(true),
        )
        .unwrap();
        assert_eq!(full.len(), 8);
        assert!(full.get_by_name("tke_advective_flux_divergence").is_some());
        assert!(full.get_by_name("tke_pressure_flux_divergence").is_some());
        for (term, profile) in full.iter() {
            assert_eq!(profile.location(), term.location(), "{term}");
        }
    }

    #[test]
    fn test_horizontally_uniform_state_has_no_budget() {
        let g = grid();
        let state = State {
            u: Field::from_fn(g.clone(), FCC, |_, _, z| 0.5 + z),
            v: Field::from_fn(g.clone(), CFC, |_, _, z| -2.0 * z),
            w: Field::from_fn(g.clone(), CCF, |_, _, _| 0.25),
            p: Field::from_fn(g.clone(), CCC, |_, _, z| 3.0 * z),
            b: Field::from_fn(g.clone(), CCC, |_, _, z| 9.81 * z),
            nu: Field::zeros(g.clone(), CCC),
        };
        let result = compute_tke_budget(
            &state.inputs(),
            TkeBudgetConfig::default().with_flux_divergences(true),
        )
        .unwrap();
        for (term, profile) in result.iter() {
            assert!(max_abs(profile) < 1e-12, "{term} = {:?}", profile.to_vec());
        }
    }

    #[test]
    fn test_kinetic_energy_is_non_negative() {
        let g = grid();
        let state = turbulent_state(&g);
        let result = compute_tke_budget(&state.inputs(), TkeBudgetConfig::default()).unwrap();
        let tke = result.get(BudgetTerm::TurbulentKineticEnergy).unwrap();
        assert!(tke.data().iter().all(|&e| e >= 0.0));
        assert!(tke.data().iter().any(|&e| e > 0.0));
    }

    #[test]
    fn test_repeated_calls_are_identical() {
        let g = grid();
        let state = turbulent_state(&g);
        let config = || TkeBudgetConfig::default().with_flux_divergences(true);
        let first = compute_tke_budget(&state.inputs(), config()).unwrap();
        let second = compute_tke_budget(&state.inputs(), config()).unwrap();
        for term in BudgetTerm::ALL {
            assert_eq!(
                first.get(term).unwrap().to_vec(),
                second.get(term).unwrap().to_vec(),
                "{term}"
            );
        }
    }

    fn assert_divergences_commute(g: &Arc<Grid>) {
        let state = turbulent_state(g);
        let result = compute_tke_budget(
            &state.inputs(),
            TkeBudgetConfig::default().with_flux_divergences(true),
        )
        .unwrap();
        for (flux, divergence) in [
            (BudgetTerm::AdvectiveFlux, BudgetTerm::AdvectiveFluxDivergence),
            (BudgetTerm::PressureFlux, BudgetTerm::PressureFluxDivergence),
        ] {
            let from_profile = d_dz(result.get(flux).unwrap());
            let averaged = result.get(divergence).unwrap();
            assert_eq!(averaged.len(), from_profile.len());
            for k in 0..averaged.len() {
                let a = averaged.value_at(k);
                let b = from_profile.value_at(k);
                assert!(
                    (a - b).abs() <= 1e-10 * b.abs().max(1.0),
                    "{divergence} level {k}: {a} vs {b}"
                );
            }
        }
    }

    #[test]
    fn test_divergence_matches_derivative_of_averaged_flux() {
        assert_divergences_commute(&grid());
    }

    #[test]
    fn test_divergence_ordering_on_stretched_horizontal_grid() {
        let faces = [
            array![0.0, 0.5, 1.5, 1.8, 3.0, 4.0],
            array![0.0, 1.0, 1.2, 2.5],
            array![0.0, 0.3, 1.0, 1.2, 2.0],
        ];
        let g = Arc::new(
            Grid::new(
                Architecture::Cpu,
                [Topology::Periodic, Topology::Periodic, Topology::Bounded],
                faces,
            )
            .unwrap(),
        );
        assert_divergences_commute(&g);

        let bounded = Arc::new(
            Grid::new(
                Architecture::Cpu,
                [Topology::Bounded, Topology::Periodic, Topology::Bounded],
                [
                    array![0.0, 0.2, 1.0, 1.5, 3.5],
                    array![0.0, 2.0, 2.5],
                    array![0.0, 1.0, 1.5, 3.0],
                ],
            )
            .unwrap(),
        );
        assert_divergences_commute(&bounded);
    }

    fn assert_profile(result: &BudgetResult, term: BudgetTerm, expected: &[f64]) {
        let profile = result.get(term).unwrap();
        assert_eq!(profile.len(), expected.len(), "{term}");
        for (k, (&got, &want)) in profile.data().iter().zip(expected).enumerate() {
            assert!((got - want).abs() < 1e-12, "{term} level {k}: {got} vs {want}");
        }
    }

    /// u = z + A cos x, w = A cos x, b = B cos x (1 + z), p = P cos x (1 + z)
    /// on eight columns of a four-level box with unit vertical spacing.
    #[test]
    fn test_shear_pressure_and_buoyancy_fluxes_match_hand_values() {
        let (a, b_amp, p_amp) = (0.5, 2.0, 3.0);
        let g = Grid::doubly_periodic([8, 1, 4], [TAU, 1.0, 4.0])
            .unwrap()
            .into_shared();
        let mut state = State::zeros(&g);
        state.u = Field::from_fn(g.clone(), FCC, |x, _, z| z + a * x.cos());
        state.w = Field::from_fn(g.clone(), CCF, |x, _, _| a * x.cos());
        state.b = Field::from_fn(g.clone(), CCC, |x, _, z| b_amp * x.cos() * (1.0 + z));
        state.p = Field::from_fn(g.clone(), CCC, |x, _, z| p_amp * x.cos() * (1.0 + z));
        let result = compute_tke_budget(&state.inputs(), TkeBudgetConfig::default()).unwrap();

        // w′ moved to the u faces is A cos x cos(dx/2); ⟨cos² x⟩ = 1/2 and
        // ∂U/∂z is 1 inside and 0 on the walls, halved on the edge levels.
        let dx = TAU / 8.0;
        let interior = -0.5 * a * a * (0.5 * dx).cos();
        assert_profile(
            &result,
            BudgetTerm::ShearProduction,
            &[0.5 * interior, interior, interior, 0.5 * interior],
        );
        let shear = result.get(BudgetTerm::ShearProduction).unwrap();
        assert!(shear.data().iter().all(|&sp| sp < 0.0));

        // On w faces (1 + z) is 1.5 and 4.5 at the walls, 1 + z inside.
        let half_ap = 0.5 * a * p_amp;
        assert_profile(
            &result,
            BudgetTerm::PressureFlux,
            &[1.5, 2.0, 3.0, 4.0, 4.5].map(|f| half_ap * f),
        );

        // Face values averaged back to centers.
        let half_ab = 0.5 * a * b_amp;
        assert_profile(
            &result,
            BudgetTerm::BuoyancyFlux,
            &[1.75, 2.5, 3.5, 4.25].map(|f| half_ab * f),
        );
    }

    #[test]
    fn test_single_column_linear_shear() {
        let g = Grid::doubly_periodic([1, 1, 6], [1.0, 1.0, 3.0])
            .unwrap()
            .into_shared();
        let mut state = State::zeros(&g);
        state.u = Field::from_fn(g.clone(), FCC, |_, _, z| z);
        let result = compute_tke_budget(&state.inputs(), TkeBudgetConfig::default()).unwrap();
        for term in [
            BudgetTerm::ShearProduction,
            BudgetTerm::TurbulentKineticEnergy,
            BudgetTerm::Dissipation,
        ] {
            assert!(max_abs(result.get(term).unwrap()) < 1e-12, "{term}");
        }
    }

    /// ½⟨w′³⟩ computed directly from the sampled w′.
    fn expected_advective_flux(w: impl Fn(f64) -> f64) -> f64 {
        let dx = TAU / N as f64;
        let sum: f64 = (0..N)
            .map(|i| {
                let x = (i as f64 + 0.5) * dx;
                0.5 * w(x).powi(3)
            })
            .sum();
        sum / N as f64
    }

    #[test]
    fn test_sinusoidal_vertical_velocity_advective_flux() {
        let g = grid();
        let amplitude = 0.5;
        for (w_of_x, analytic) in [
            (
                Box::new(move |x: f64| amplitude * x.sin()) as Box<dyn Fn(f64) -> f64 + Sync>,
                0.0,
            ),
            (
                Box::new(move |x: f64| amplitude * (x.sin() + (2.0 * x).cos())),
                -0.375 * amplitude.powi(3),
            ),
        ] {
            let mut state = State::zeros(&g);
            state.w = Field::from_fn(g.clone(), CCF, |x, _, _| w_of_x(x));
            let result = compute_tke_budget(
                &state.inputs(),
                TkeBudgetConfig::default().with_flux_divergences(true),
            )
            .unwrap();

            let expected = expected_advective_flux(&w_of_x);
            assert!((expected - analytic).abs() < 1e-12);
            let flux = result.get(BudgetTerm::AdvectiveFlux).unwrap();
            assert_eq!(flux.len(), 6);
            for &value in flux.data() {
                assert!((value - expected).abs() < 1e-12, "{value} vs {expected}");
            }
            let tke = result.get(BudgetTerm::TurbulentKineticEnergy).unwrap();
            assert!(tke.data().iter().all(|&e| e > 0.0));
            let divergence = result.get(BudgetTerm::AdvectiveFluxDivergence).unwrap();
            assert!(max_abs(divergence) < 1e-12);
            assert!(max_abs(result.get(BudgetTerm::PressureFlux).unwrap()) < 1e-15);
        }
    }

    #[test]
    fn test_scratch_buffers_reproduce_allocating_path() {
        let g = grid();
        let state = turbulent_state(&g);
        let reference = compute_tke_budget(
            &state.inputs(),
            TkeBudgetConfig::default().with_flux_divergences(true),
        )
        .unwrap();

        let mut face = Field::from_fn(g.clone(), CCF, |_, _, _| f64::NAN);
        let mut center = Field::from_fn(g.clone(), CCC, |_, _, _| 7.0);
        let mean_u = average_horizontal(&state.u).unwrap();
        let mean_v = average_horizontal(&state.v).unwrap();
        let with_scratch = compute_tke_budget(
            &state.inputs(),
            TkeBudgetConfig::default()
                .with_flux_divergences(true)
                .with_mean_velocities(&mean_u, &mean_v)
                .with_scratch_face(&mut face)
                .with_scratch_center(&mut center),
        )
        .unwrap();
        for term in BudgetTerm::ALL {
            assert_eq!(
                reference.get(term).unwrap().to_vec(),
                with_scratch.get(term).unwrap().to_vec(),
                "{term}"
            );
        }
        assert!(face.data().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_supplied_means_are_used() {
        let g = grid();
        let mut state = State::zeros(&g);
        state.u = Field::from_fn(g.clone(), FCC, |_, _, _| 1.0);
        let zero = Profile::zeros(g.clone(), Location::Center);
        let result = compute_tke_budget(
            &state.inputs(),
            TkeBudgetConfig::default().with_mean_velocities(&zero, &zero),
        )
        .unwrap();
        // u′ = 1 everywhere about a zero mean.
        let tke = result.get(BudgetTerm::TurbulentKineticEnergy).unwrap();
        assert!(tke.data().iter().all(|&e| (e - 0.5).abs() < 1e-12));
    }

    #[test]
    fn test_missing_input() {
        let g = grid();
        let state = State::zeros(&g);
        let mut inputs = state.inputs();
        inputs.pressure = None;
        let err = compute_tke_budget(&inputs, TkeBudgetConfig::default()).unwrap_err();
        assert_eq!(err, TkeError::MissingInput("pressure".to_string()));
    }

    #[test]
    fn test_grid_mismatch() {
        let g = grid();
        let mut state = State::zeros(&g);
        let other = Grid::doubly_periodic([N, 4, 6], [TAU, 1.0, 1.0])
            .unwrap()
            .into_shared();
        state.b = Field::zeros(other.clone(), CCC);
        let err = compute_tke_budget(&state.inputs(), TkeBudgetConfig::default()).unwrap_err();
        assert!(matches!(err, TkeError::GridMismatch { .. }));

        let state = State::zeros(&g);
        let mut foreign_scratch = Field::zeros(other, CCF);
        let err = compute_tke_budget(
            &state.inputs(),
            TkeBudgetConfig::default().with_scratch_face(&mut foreign_scratch),
        )
        .unwrap_err();
        assert!(matches!(err, TkeError::GridMismatch { .. }));
    }

    #[test]
    fn test_scratch_location_is_checked_before_writing() {
        let g = grid();
        let state = State::zeros(&g);
        let mut wrong = Field::from_fn(g.clone(), CCC, |_, _, _| 3.0);
        let err = compute_tke_budget(
            &state.inputs(),
            TkeBudgetConfig::default().with_scratch_face(&mut wrong),
        )
        .unwrap_err();
        assert!(matches!(err, TkeError::LocationMismatch { .. }));
        assert!(wrong.data().iter().all(|&v| v == 3.0));
    }

    #[test]
    fn test_gpu_grid_is_rejected() {
        let g = Arc::new(
            Grid::doubly_periodic([4, 4, 4], [1.0, 1.0, 1.0])
                .unwrap()
                .with_architecture(Architecture::Gpu),
        );
        let state = State::zeros(&g);
        let err = compute_tke_budget(&state.inputs(), TkeBudgetConfig::default()).unwrap_err();
        assert_eq!(err, TkeError::UnsupportedExecutionTarget(Architecture::Gpu));
    }

    #[test]
    fn test_term_names_round_trip() {
        for term in BudgetTerm::ALL {
            assert_eq!(BudgetTerm::from_name(term.name()), Some(term));
        }
        assert_eq!(BudgetTerm::from_name("tke"), None);
    }
}
