/*!
Reaction-diffusion simulation on finite-element meshes.

The heart of the crate is [`solve_conjugate_gradient`], a plain
Hestenes–Stiefel conjugate-gradient solver for the symmetric
positive-definite systems a FEM discretization produces. On top of it,
[`Simulation`] advances named species concentrations through explicit
reaction kinetics and implicit-Euler diffusion steps.
*/

#![warn(missing_docs)]

/// Floating-point type used by this library.
pub type Real = f64;

extern crate nalgebra as na;

pub use self::conjugate_gradient::{
    solve_conjugate_gradient, CgError, CgParams, CgStats, ZeroResidualPolicy,
};
pub use self::operator::LinearOperator;
pub use self::reaction::{
    parse_reaction, reverse_reaction, RateLaw, Reaction, ReactionParseError, StochCoeff,
};
pub use self::simulation::{Simulation, SimulationError};
pub use self::state::{SpeciesOptions, State};

mod conjugate_gradient;
mod operator;
mod reaction;
mod simulation;
mod state;
