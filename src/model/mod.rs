//! Sparse group-regularized models fitted on response matrices.

pub mod penalty;
pub mod sgl;
pub mod solver;

pub use penalty::GroupPenaltyType;
pub use sgl::{SglConfig, SparseGroupLasso};
pub use solver::{SolverFit, SparseSolver};
