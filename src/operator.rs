use crate::Real;
use na::{DMatrix, DVector};
use nalgebra_sparse::{CscMatrix, CsrMatrix};

/// A square linear operator that can be applied to a dense vector.
///
/// This is the only capability the conjugate-gradient solver needs from its
/// coefficient matrix; the storage format stays with the caller.
pub trait LinearOperator {
    /// Row (and column) count of the operator.
    fn nrows(&self) -> usize;

    /// Computes `self · v`.
    fn apply(&self, v: &DVector<Real>) -> DVector<Real>;
}

impl LinearOperator for CscMatrix<Real> {
    fn nrows(&self) -> usize {
        self.nrows()
    }

    fn apply(&self, v: &DVector<Real>) -> DVector<Real> {
        self * v
    }
}

impl LinearOperator for CsrMatrix<Real> {
    fn nrows(&self) -> usize {
        self.nrows()
    }

    fn apply(&self, v: &DVector<Real>) -> DVector<Real> {
        self * v
    }
}

impl LinearOperator for DMatrix<Real> {
    fn nrows(&self) -> usize {
        self.nrows()
    }

    fn apply(&self, v: &DVector<Real>) -> DVector<Real> {
        self * v
    }
}
