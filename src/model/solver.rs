//! The fitting capability required by the grid runner.

use crate::error::Result;
use nalgebra::DMatrix;

/// Coefficients returned by a successful fit.
#[derive(Debug, Clone, PartialEq)]
pub struct SolverFit {
    /// One coefficient per design-matrix column.
    pub coefficients: Vec<f64>,
    /// Fitted intercept.
    pub intercept: f64,
    /// Iterations used.
    pub iterations: usize,
}

/// A sparse group-regularized linear model fitter.
///
/// Implementations must be `Sync`: one solver is shared by every worker of
/// a grid sweep and each call only reads its inputs.
pub trait SparseSolver: Send + Sync {
    /// Fit the model.
    ///
    /// # Arguments
    /// * `x` - Design matrix (rows x columns)
    /// * `y` - Response per row
    /// * `groups` - Group index of every column
    /// * `lambda1` - Site-level (L1) sparsity weight
    /// * `lambda2` - Group-level sparsity weight
    /// * `group_weights` - Penalty multiplier per group
    ///
    /// # Errors
    /// [`crate::error::EslError::DidNotConverge`] when the fit fails.
    fn fit(
        &self,
        x: &DMatrix<f64>,
        y: &[f64],
        groups: &[usize],
        lambda1: f64,
        lambda2: f64,
        group_weights: &[f64],
    ) -> Result<SolverFit>;
}
