use crate::operator::LinearOperator;
use crate::Real;
use log::{trace, warn};
use na::DVector;
use thiserror::Error;

/// Error type returned by [`solve_conjugate_gradient`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CgError {
    /// The operator, right-hand side and initial guess disagree on dimension.
    #[error("incompatible dimensions: operator is {matrix}x{matrix}, rhs has length {rhs}, guess has length {guess}")]
    DimensionMismatch {
        /// Row count of the operator.
        matrix: usize,
        /// Length of the right-hand side.
        rhs: usize,
        /// Length of the initial guess.
        guess: usize,
    },
    /// The initial residual energy is not strictly positive.
    ///
    /// Either `b == M·x` exactly (see [`ZeroResidualPolicy`]) or the inputs
    /// are inconsistent (e.g. `M` is not symmetric positive-definite).
    #[error("initial residual energy {energy:.6e} is not strictly positive")]
    DegenerateInput {
        /// The offending residual energy.
        energy: Real,
    },
    /// The residual energy stopped being strictly positive mid-iteration
    /// while the solution was still above the convergence threshold.
    ///
    /// This signals loss of positive-definiteness in floating-point
    /// arithmetic or an operator that was never SPD to begin with.
    #[error("residual energy became {energy:.6e} at iteration {iteration}")]
    NumericalBreakdown {
        /// Iteration at which the positivity check failed.
        iteration: usize,
        /// The offending residual energy.
        energy: Real,
    },
}

/// What to do when the initial guess already solves the system exactly.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
#[cfg_attr(
    feature = "serde-serialize",
    derive(serde::Serialize, serde::Deserialize)
)]
pub enum ZeroResidualPolicy {
    /// Treat a zero initial residual as [`CgError::DegenerateInput`].
    ///
    /// A zero residual usually means the caller fed the solver a guess that
    /// was already the answer, which is more often a bug than a success.
    #[default]
    Reject,
    /// Treat a zero initial residual as convergence in zero iterations.
    AcceptAsConverged,
}

/// Parameters of the conjugate-gradient solver.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(
    feature = "serde-serialize",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct CgParams {
    /// Relative convergence tolerance on the residual energy.
    ///
    /// The loop runs while `r·r >= epsilon² · (r₀·p₀)`.
    pub epsilon: Real,
    /// Hard cap on the number of iterations.
    pub max_iterations: usize,
    /// Policy for a zero initial residual.
    pub zero_residual: ZeroResidualPolicy,
}

impl Default for CgParams {
    fn default() -> Self {
        Self {
            epsilon: 1e-1,
            max_iterations: 10_000,
            zero_residual: ZeroResidualPolicy::Reject,
        }
    }
}

impl CgParams {
    /// Sets the relative convergence tolerance.
    #[must_use]
    pub fn with_epsilon(mut self, epsilon: Real) -> Self {
        self.epsilon = epsilon;
        self
    }

    /// Sets the iteration cap.
    #[must_use]
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Sets the policy for a zero initial residual.
    #[must_use]
    pub fn with_zero_residual(mut self, policy: ZeroResidualPolicy) -> Self {
        self.zero_residual = policy;
        self
    }
}

/// Outcome of a conjugate-gradient solve.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(
    feature = "serde-serialize",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct CgStats {
    /// Number of iterations performed.
    pub iterations: usize,
    /// Final residual energy `r·r`.
    pub residual_energy: Real,
    /// Whether the residual energy dropped below `epsilon² · diff0`.
    ///
    /// When `false`, the iteration cap was exhausted and `x` holds the best
    /// approximation obtained so far.
    pub converged: bool,
}

/// Approximately solves `M·x = b` for a symmetric positive-definite operator
/// `M`, refining the initial guess `x` in place.
///
/// This is the plain Hestenes–Stiefel recurrence: no preconditioning, no
/// restarts. Convergence is declared when the residual energy drops below
/// `epsilon²` times its initial value; the iteration cap makes the loop
/// terminate on ill-conditioned input, in which case a warning is logged and
/// `x` still holds the best approximation found.
///
/// # Errors
///
/// - [`CgError::DimensionMismatch`] if `m`, `b` and `x` disagree on size.
/// - [`CgError::DegenerateInput`] if the initial residual energy is not
///   strictly positive (configurable through
///   [`CgParams::with_zero_residual`]).
/// - [`CgError::NumericalBreakdown`] if the residual energy stops being
///   strictly positive mid-iteration, which happens when `m` is not SPD.
pub fn solve_conjugate_gradient<M: LinearOperator>(
    m: &M,
    b: &DVector<Real>,
    x: &mut DVector<Real>,
    params: &CgParams,
) -> Result<CgStats, CgError> {
    if b.len() != m.nrows() || x.len() != b.len() {
        return Err(CgError::DimensionMismatch {
            matrix: m.nrows(),
            rhs: b.len(),
            guess: x.len(),
        });
    }

    let mut r = b - m.apply(&*x);
    let mut p = r.clone();

    // `p` starts as a copy of `r`, so `r·p` is the residual energy here. The
    // loop below measures `r·r` instead; the two agree only because of this
    // initialization, so changing `p₀` requires changing the loop as well.
    // `r·p` can come out as a tiny negative through rounding, hence the
    // magnitude.
    let mut diff = r.dot(&p).abs();
    let diff0 = diff;

    if !(diff > 0.0) {
        return match params.zero_residual {
            ZeroResidualPolicy::AcceptAsConverged if diff == 0.0 => Ok(CgStats {
                iterations: 0,
                residual_energy: 0.0,
                converged: true,
            }),
            _ => Err(CgError::DegenerateInput { energy: diff }),
        };
    }

    let threshold = params.epsilon * params.epsilon * diff0;
    let mut niter = 0;

    while diff >= threshold && niter < params.max_iterations {
        let q = m.apply(&p); // TODO: avoid the allocation.
        let alpha = diff / q.dot(&p);

        x.axpy(alpha, &p, 1.0);
        r.axpy(-alpha, &q, 1.0);

        let diffnew = r.dot(&r);
        let beta = diffnew / diff;
        diff = diffnew;

        p.axpy(1.0, &r, beta);

        // `r·r` is non-negative by construction, so a failed positivity check
        // is either an exactly-zero residual (convergence, caught by the loop
        // condition) or a NaN from a non-positive curvature `q·p`.
        if !(diff > 0.0) && !(diff < threshold) {
            return Err(CgError::NumericalBreakdown {
                iteration: niter,
                energy: diff,
            });
        }

        niter += 1;
    }

    let converged = diff < threshold;
    if !converged {
        warn!("conjugate gradient did not converge after {niter} iterations (residual energy {diff:.3e})");
    }
    trace!("conjugate gradient: {niter} iterations, residual energy {diff:.3e}");

    Ok(CgStats {
        iterations: niter,
        residual_energy: diff,
        converged,
    })
}
