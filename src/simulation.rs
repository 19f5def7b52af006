use crate::conjugate_gradient::{solve_conjugate_gradient, CgError, CgParams, ZeroResidualPolicy};
use crate::reaction::{reverse_reaction, RateLaw, Reaction, ReactionParseError, StochCoeff};
use crate::state::{SpeciesOptions, State};
use crate::Real;
use nalgebra_sparse::CscMatrix;
use rayon::prelude::*;
use thiserror::Error;

/// Error type returned by [`Simulation`] operations.
#[derive(Error, Debug)]
pub enum SimulationError {
    /// Diffusion was iterated before both FEM matrices were loaded.
    #[error("the damping and stiffness matrices must be loaded before iterating diffusion")]
    MatricesNotLoaded,
    /// A loaded matrix does not match the state discretization.
    #[error("matrix is {rows}x{cols} but the state has {expected} mesh nodes")]
    MatrixDimensionMismatch {
        /// Expected dimension (the state size).
        expected: usize,
        /// Row count of the offending matrix.
        rows: usize,
        /// Column count of the offending matrix.
        cols: usize,
    },
    /// A reaction references a species that was never added.
    #[error("unknown species `{0}`")]
    UnknownSpecies(String),
    /// The conjugate-gradient solve failed for one species.
    #[error("diffusion solve failed for species `{species}`: {source}")]
    Diffusion {
        /// Species whose solve failed.
        species: String,
        /// The underlying solver error.
        source: CgError,
    },
    /// A reaction descriptor could not be parsed.
    #[error(transparent)]
    Parse(#[from] ReactionParseError),
}

/// A reaction-diffusion simulation on a fixed FEM discretization.
///
/// The simulation advances with a first-order operator split: an explicit
/// reaction step ([`Simulation::iterate_reaction`]) followed by an implicit
/// diffusion step ([`Simulation::iterate_diffusion`]). Diffusion solves
/// `(damp + dt·stiff) u' = damp·u` per species with the conjugate-gradient
/// solver, so the loaded damping matrix must be SPD and the stiffness matrix
/// positive semi-definite, as a Galerkin mass/stiffness pair is.
pub struct Simulation {
    /// Spatial concentrations of every simulated species.
    pub state: State,
    reactions: Vec<Reaction>,
    damp_mat: Option<CscMatrix<Real>>,
    stiff_mat: Option<CscMatrix<Real>>,
    // Cached `damp + dt·stiff`, valid while `dt == last_used_dt`.
    diffusion_matrix: Option<CscMatrix<Real>>,
    last_used_dt: Real,
    /// Relative tolerance handed to the conjugate-gradient solver.
    pub epsilon: Real,
    /// First-order sink applied to every species during the reaction step.
    pub drain: Real,
}

impl Simulation {
    /// Creates a simulation with `vector_size` mesh nodes and no species.
    pub fn new(vector_size: usize) -> Self {
        Self::from_state(State::new(vector_size))
    }

    /// Creates a simulation around an existing state.
    pub fn from_state(state: State) -> Self {
        Self {
            state,
            reactions: vec![],
            damp_mat: None,
            stiff_mat: None,
            diffusion_matrix: None,
            last_used_dt: 0.0,
            epsilon: 1e-3,
            drain: 0.0,
        }
    }

    /// Registers a diffusive species initialized to zero.
    pub fn add_species(&mut self, name: &str) {
        self.state.add_species(name, SpeciesOptions::default());
    }

    /// Registers a species with explicit options.
    pub fn add_species_with_options(&mut self, name: &str, options: SpeciesOptions) {
        self.state.add_species(name, options);
    }

    /// Copies `values` into the concentration vector of `name`.
    pub fn set_species(&mut self, name: &str, values: &[Real]) -> Result<(), SimulationError> {
        if self.state.set_species(name, values) {
            Ok(())
        } else {
            Err(SimulationError::UnknownSpecies(name.to_owned()))
        }
    }

    /// The concentration vector of `name`, if registered.
    pub fn get_species(&self, name: &str) -> Option<&na::DVector<Real>> {
        self.state.get_species(name)
    }

    /// Adds a mass-action reaction from a descriptor like `"A + 2B -> C"`.
    pub fn add_reaction(&mut self, descriptor: &str, k: Real) -> Result<(), SimulationError> {
        self.reactions.push(Reaction::mass_action(descriptor, k)?);
        Ok(())
    }

    /// Adds a pair of mass-action reactions, one per direction.
    pub fn add_reversible_reaction(
        &mut self,
        descriptor: &str,
        forward: Real,
        backward: Real,
    ) -> Result<(), SimulationError> {
        self.add_reaction(descriptor, forward)?;
        self.add_reaction(&reverse_reaction(descriptor)?, backward)
    }

    /// Adds a Michaelis–Menten reaction from a descriptor like `"S -> P"`.
    pub fn add_mm_reaction(
        &mut self,
        descriptor: &str,
        vmax: Real,
        km: Real,
    ) -> Result<(), SimulationError> {
        self.reactions
            .push(Reaction::michaelis_menten(descriptor, vmax, km)?);
        Ok(())
    }

    /// Adds an already-built reaction.
    pub fn push_reaction(&mut self, reaction: Reaction) {
        self.reactions.push(reaction);
    }

    /// The registered reactions, in insertion order.
    pub fn reactions(&self) -> &[Reaction] {
        &self.reactions
    }

    /// Loads the FEM damping (mass) matrix.
    pub fn load_dampness_matrix(&mut self, matrix: CscMatrix<Real>) -> Result<(), SimulationError> {
        self.check_dimension(&matrix)?;
        self.damp_mat = Some(matrix);
        self.diffusion_matrix = None;
        Ok(())
    }

    /// Loads the FEM stiffness matrix.
    pub fn load_stiffness_matrix(&mut self, matrix: CscMatrix<Real>) -> Result<(), SimulationError> {
        self.check_dimension(&matrix)?;
        self.stiff_mat = Some(matrix);
        self.diffusion_matrix = None;
        Ok(())
    }

    /// The damping matrix, once loaded.
    pub fn damping_matrix(&self) -> Option<&CscMatrix<Real>> {
        self.damp_mat.as_ref()
    }

    /// The stiffness matrix, once loaded.
    pub fn stiffness_matrix(&self) -> Option<&CscMatrix<Real>> {
        self.stiff_mat.as_ref()
    }

    /// The cached implicit-Euler operator `damp + dt·stiff` from the last
    /// diffusion step, if any.
    pub fn diffusion_matrix(&self) -> Option<&CscMatrix<Real>> {
        self.diffusion_matrix.as_ref()
    }

    fn check_dimension(&self, matrix: &CscMatrix<Real>) -> Result<(), SimulationError> {
        let n = self.state.size();
        if matrix.nrows() != n || matrix.ncols() != n {
            return Err(SimulationError::MatrixDimensionMismatch {
                expected: n,
                rows: matrix.nrows(),
                cols: matrix.ncols(),
            });
        }
        Ok(())
    }

    /// Advances every reaction channel by an explicit Euler step of length
    /// `dt`, then applies the `drain` sink.
    ///
    /// Concentrations may overshoot below zero for large `dt · rate`
    /// products; see [`Simulation::prune`].
    pub fn iterate_reaction(&mut self, dt: Real) -> Result<(), SimulationError> {
        let Self {
            state,
            reactions,
            drain,
            ..
        } = self;
        let n = state.size();

        for reaction in reactions.iter() {
            let reagents = resolve(state, &reaction.reagents)?;
            let products = resolve(state, &reaction.products)?;

            let rate: Vec<Real> = match reaction.rate {
                RateLaw::MassAction(k) => {
                    let concentrations = &state.concentrations;
                    (0..n)
                        .into_par_iter()
                        .map(|i| {
                            k * reagents
                                .iter()
                                .map(|&(s, w)| concentrations[s][i].powi(w))
                                .product::<Real>()
                        })
                        .collect()
                }
                RateLaw::MichaelisMenten { vmax, km } => {
                    assert_eq!(
                        reagents.len(),
                        1,
                        "Michaelis-Menten reactions have exactly one substrate."
                    );
                    let substrate = &state.concentrations[reagents[0].0];
                    substrate
                        .as_slice()
                        .par_iter()
                        .map(|&s| vmax * s / (km + s))
                        .collect()
                }
            };

            for &(sid, w) in &reagents {
                let scale = dt * w as Real;
                state.concentrations[sid]
                    .as_mut_slice()
                    .par_iter_mut()
                    .zip(&rate)
                    .for_each(|(u, &r)| *u -= scale * r);
            }
            for &(sid, w) in &products {
                let scale = dt * w as Real;
                state.concentrations[sid]
                    .as_mut_slice()
                    .par_iter_mut()
                    .zip(&rate)
                    .for_each(|(u, &r)| *u += scale * r);
            }
        }

        if *drain != 0.0 {
            let decay = dt * *drain;
            for u in state.concentrations.iter_mut() {
                u.as_mut_slice()
                    .par_iter_mut()
                    .for_each(|v| *v -= decay * *v);
            }
        }

        Ok(())
    }

    /// Advances diffusion by an implicit Euler step of length `dt`.
    ///
    /// Every species with [`SpeciesOptions::diffusion`] set is updated by
    /// solving `(damp + dt·stiff) u' = damp·u`, warm-started at the current
    /// concentration. The implicit operator is rebuilt only when `dt`
    /// changes. An already-equilibrated species (zero residual) is left
    /// untouched rather than reported as an error.
    ///
    /// # Errors
    ///
    /// [`SimulationError::MatricesNotLoaded`] before both matrices are
    /// loaded, and [`SimulationError::Diffusion`] when the solver breaks
    /// down (typically a non-SPD matrix pair).
    pub fn iterate_diffusion(&mut self, dt: Real) -> Result<(), SimulationError> {
        if self.diffusion_matrix.is_none() || self.last_used_dt != dt {
            let damp = self.damp_mat.as_ref().ok_or(SimulationError::MatricesNotLoaded)?;
            let stiff = self
                .stiff_mat
                .as_ref()
                .ok_or(SimulationError::MatricesNotLoaded)?;
            self.diffusion_matrix = Some(damp + &(stiff * dt));
            self.last_used_dt = dt;
        }

        let Self {
            state,
            damp_mat,
            diffusion_matrix,
            epsilon,
            ..
        } = self;
        let damp = damp_mat.as_ref().ok_or(SimulationError::MatricesNotLoaded)?;
        let diffusion = diffusion_matrix
            .as_ref()
            .ok_or(SimulationError::MatricesNotLoaded)?;
        let params = CgParams::default()
            .with_epsilon(*epsilon)
            .with_zero_residual(ZeroResidualPolicy::AcceptAsConverged);

        for (name, u, options) in state.iter_mut() {
            if !options.diffusion {
                continue;
            }

            let rhs = damp * &*u;
            let mut next = u.clone();
            solve_conjugate_gradient(diffusion, &rhs, &mut next, &params).map_err(|source| {
                SimulationError::Diffusion {
                    species: name.to_owned(),
                    source,
                }
            })?;
            *u = next;
        }

        Ok(())
    }

    /// Clamps every concentration entry below `floor` up to `floor`.
    ///
    /// Cleans up the negative overshoot an explicit reaction step can leave
    /// behind.
    pub fn prune(&mut self, floor: Real) {
        for u in self.state.concentrations.iter_mut() {
            for v in u.iter_mut() {
                if *v < floor {
                    *v = floor;
                }
            }
        }
    }

    /// Zeroes every concentration entry strictly below `threshold`.
    pub fn prune_under(&mut self, threshold: Real) {
        for u in self.state.concentrations.iter_mut() {
            for v in u.iter_mut() {
                if *v < threshold {
                    *v = 0.0;
                }
            }
        }
    }

    /// Prints the first `count` entries of every species to standard output.
    pub fn print(&self, count: usize) {
        self.state.print(count);
    }
}

fn resolve(state: &State, coeffs: &[StochCoeff]) -> Result<Vec<(usize, i32)>, SimulationError> {
    coeffs
        .iter()
        .map(|(name, w)| {
            state
                .species_index(name)
                .map(|i| (i, *w))
                .ok_or_else(|| SimulationError::UnknownSpecies(name.clone()))
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra_sparse::CooMatrix;

    // 1D linear elements with natural boundary conditions; the stiffness
    // matrix has zero row sums, so constants are in its null space.
    fn fem_matrices_1d(n: usize, h: Real) -> (CscMatrix<Real>, CscMatrix<Real>) {
        let mut damping = CooMatrix::new(n, n);
        let mut stiffness = CooMatrix::new(n, n);
        for i in 0..n {
            let boundary = i == 0 || i == n - 1;
            damping.push(i, i, if boundary { h / 3.0 } else { 2.0 * h / 3.0 });
            stiffness.push(i, i, if boundary { 1.0 / h } else { 2.0 / h });
            if i + 1 < n {
                damping.push(i, i + 1, h / 6.0);
                damping.push(i + 1, i, h / 6.0);
                stiffness.push(i, i + 1, -1.0 / h);
                stiffness.push(i + 1, i, -1.0 / h);
            }
        }
        (CscMatrix::from(&damping), CscMatrix::from(&stiffness))
    }

    fn diffusive_simulation(n: usize) -> (Simulation, CscMatrix<Real>) {
        let (damping, stiffness) = fem_matrices_1d(n, 1.0 / (n as Real - 1.0));
        let mut sim = Simulation::new(n);
        sim.epsilon = 1e-8;
        sim.load_dampness_matrix(damping.clone()).unwrap();
        sim.load_stiffness_matrix(stiffness).unwrap();
        (sim, damping)
    }

    #[test]
    fn mass_action_transfers_between_species() {
        let mut sim = Simulation::new(3);
        sim.add_species("u");
        sim.add_species("v");
        sim.set_species("u", &[1.0, 2.0, 0.5]).unwrap();
        sim.add_reaction("u -> v", 0.5).unwrap();

        sim.iterate_reaction(0.1).unwrap();

        let u = sim.get_species("u").unwrap();
        let v = sim.get_species("v").unwrap();
        assert_relative_eq!(u[0], 1.0 - 0.1 * 0.5 * 1.0, epsilon = 1e-12);
        assert_relative_eq!(v[1], 0.1 * 0.5 * 2.0, epsilon = 1e-12);
        // u -> v conserves the total amount.
        for i in 0..3 {
            assert_relative_eq!(u[i] + v[i], [1.0, 2.0, 0.5][i], epsilon = 1e-12);
        }
    }

    #[test]
    fn stoichiometric_weights_scale_the_update() {
        let mut sim = Simulation::new(1);
        sim.add_species("a");
        sim.add_species("b");
        sim.set_species("a", &[2.0]).unwrap();
        // rate = k · a², consuming 2a per event.
        sim.add_reaction("2a -> b", 0.25).unwrap();

        sim.iterate_reaction(0.1).unwrap();

        let rate = 0.25 * 2.0f64.powi(2);
        assert_relative_eq!(sim.get_species("a").unwrap()[0], 2.0 - 0.1 * 2.0 * rate);
        assert_relative_eq!(sim.get_species("b").unwrap()[0], 0.1 * rate);
    }

    #[test]
    fn michaelis_menten_saturates() {
        let mut sim = Simulation::new(2);
        sim.add_species("s");
        sim.add_species("p");
        // One starved cell, one saturated cell.
        sim.set_species("s", &[0.001, 100.0]).unwrap();
        sim.add_mm_reaction("s -> p", 2.0, 0.1).unwrap();

        sim.iterate_reaction(0.01).unwrap();

        let p = sim.get_species("p").unwrap();
        let starved = 0.01 * 2.0 * 0.001 / (0.1 + 0.001);
        let saturated = 0.01 * 2.0 * 100.0 / (0.1 + 100.0);
        assert_relative_eq!(p[0], starved, epsilon = 1e-12);
        assert_relative_eq!(p[1], saturated, epsilon = 1e-12);
        // Near saturation the rate approaches vmax.
        assert!(p[1] > 0.99 * 0.01 * 2.0);
    }

    #[test]
    fn drain_decays_everything() {
        let mut sim = Simulation::new(2);
        sim.add_species("u");
        sim.set_species("u", &[1.0, 4.0]).unwrap();
        sim.drain = 0.5;

        sim.iterate_reaction(0.1).unwrap();

        let u = sim.get_species("u").unwrap();
        assert_relative_eq!(u[0], 1.0 * (1.0 - 0.05), epsilon = 1e-12);
        assert_relative_eq!(u[1], 4.0 * (1.0 - 0.05), epsilon = 1e-12);
    }

    #[test]
    fn unknown_species_in_reaction_is_reported() {
        let mut sim = Simulation::new(2);
        sim.add_species("u");
        sim.add_reaction("u -> ghost", 1.0).unwrap();

        let err = sim.iterate_reaction(0.1).unwrap_err();
        assert!(matches!(err, SimulationError::UnknownSpecies(name) if name == "ghost"));
    }

    #[test]
    fn diffusion_requires_loaded_matrices() {
        let mut sim = Simulation::new(4);
        sim.add_species("u");
        let err = sim.iterate_diffusion(0.1).unwrap_err();
        assert!(matches!(err, SimulationError::MatricesNotLoaded));
    }

    #[test]
    fn loading_rejects_mismatched_matrices() {
        let (damping, _) = fem_matrices_1d(5, 0.25);
        let mut sim = Simulation::new(4);
        let err = sim.load_dampness_matrix(damping).unwrap_err();
        assert!(matches!(
            err,
            SimulationError::MatrixDimensionMismatch { expected: 4, .. }
        ));
    }

    #[test]
    fn uniform_concentration_is_a_diffusion_fixed_point() {
        let (mut sim, _) = diffusive_simulation(16);
        sim.add_species("u");
        sim.set_species("u", &[0.5; 16]).unwrap();

        sim.iterate_diffusion(0.01).unwrap();

        let u = sim.get_species("u").unwrap();
        for &v in u.iter() {
            assert_relative_eq!(v, 0.5, epsilon = 1e-9);
        }
    }

    #[test]
    fn diffusion_spreads_a_spike_and_conserves_mass() {
        let n = 32;
        let (mut sim, damping) = diffusive_simulation(n);
        sim.add_species("u");
        let mut spike = vec![0.0; n];
        spike[n / 2] = 1.0;
        sim.set_species("u", &spike).unwrap();

        let mass_before = (&damping * sim.get_species("u").unwrap()).sum();
        sim.iterate_diffusion(0.05).unwrap();
        let u = sim.get_species("u").unwrap();
        let mass_after = (&damping * u).sum();

        assert!(u[n / 2] < 1.0);
        assert!(u[n / 2 - 1] > 0.0);
        assert!(u[n / 2 + 1] > 0.0);
        assert_relative_eq!(mass_after, mass_before, max_relative = 1e-4);
    }

    #[test]
    fn immobile_species_skip_diffusion() {
        let n = 8;
        let (mut sim, _) = diffusive_simulation(n);
        sim.add_species_with_options("bound", SpeciesOptions { diffusion: false });
        let mut profile = vec![0.0; n];
        profile[0] = 1.0;
        sim.set_species("bound", &profile).unwrap();

        sim.iterate_diffusion(0.05).unwrap();

        let bound = sim.get_species("bound").unwrap();
        assert_relative_eq!(bound[0], 1.0);
        assert_relative_eq!(bound[1], 0.0);
    }

    #[test]
    fn reversible_reaction_registers_both_directions() {
        let mut sim = Simulation::new(1);
        sim.add_species("a");
        sim.add_species("b");
        sim.add_reversible_reaction("a -> b", 1.0, 0.5).unwrap();

        assert_eq!(sim.reactions().len(), 2);
        assert_eq!(sim.reactions()[1].to_string(), "b -> a");
    }

    #[test]
    fn prune_clamps_overshoot() {
        let mut sim = Simulation::new(3);
        sim.add_species("u");
        sim.set_species("u", &[-0.25, 0.5, 1.0]).unwrap();

        sim.prune(0.0);
        let u = sim.get_species("u").unwrap();
        assert_eq!(u[0], 0.0);
        assert_eq!(u[1], 0.5);

        sim.prune_under(0.6);
        let u = sim.get_species("u").unwrap();
        assert_eq!(u[1], 0.0);
        assert_eq!(u[2], 1.0);
    }
}
