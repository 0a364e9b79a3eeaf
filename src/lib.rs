//! Multimatrix Evolutionary Sparse Learning Library
//!
//! This library detects signatures of molecular convergence in
//! multiple-sequence alignments by fitting sparse group lasso models that
//! separate a convergent group of species from matched controls.
//!
//! # Overview
//!
//! The library is organized into composable modules:
//!
//! - **data**: Alignments, species groups, response matrices and results
//! - **cancel**: Gap (deletion) cancellation per species combination
//! - **model**: Sparse group lasso solver and group penalty schemes
//! - **grid**: Hyperparameter grids and the parallel grid runner
//! - **aggregate**: Gene ranking and species prediction aggregation
//! - **null**: Response-flip and pair-randomized null models
//! - **pipeline**: Configuration, combination sources and the run loop
//!
//! # Example
//!
//! ```no_run
//! use esl_multimatrix::prelude::*;
//!
//! let alignments = AlignmentSet::from_dir("alignments", None).unwrap();
//! let source = SpeciesGroupsSource::from_file("species_groups.txt", 16).unwrap();
//!
//! let inputs = MultimatrixInputs {
//!     alignments,
//!     source: Box::new(source),
//!     prediction_alignments: None,
//!     phenotypes: None,
//! };
//! let output = Multimatrix::new(AnalysisConfig::default())
//!     .run(&inputs)
//!     .unwrap();
//! output.write("results", "esl", 0, true).unwrap();
//! ```

pub mod aggregate;
pub mod cancel;
pub mod data;
pub mod error;
pub mod grid;
pub mod model;
pub mod null;
pub mod pipeline;

/// Convenient re-exports for common usage.
pub mod prelude {
    pub use crate::aggregate::{rank_genes, top_gene_count, Aggregator};
    pub use crate::cancel::{
        cancel_alignment, cancel_combination, CancelOutcome, CancelPolicy, CleanedAlignment,
        CleanedAlignmentSet,
    };
    pub use crate::data::{
        Alignment, AlignmentSet, CombinationIdentity, FitStatus, GeneRankRecord, Label,
        ModelResult, Phenotypes, ResponseMatrix, SpeciesCombination, SpeciesGroups,
        SpeciesPrediction, StatusRecord,
    };
    pub use crate::error::{EslError, Result};
    pub use crate::grid::{fit_point, run_grid, CancelToken, GridConfig, GridPoint};
    pub use crate::model::{GroupPenaltyType, SglConfig, SolverFit, SparseGroupLasso, SparseSolver};
    pub use crate::null::{pair_randomized, response_flip_variants, FlipVariant};
    pub use crate::pipeline::{
        AnalysisConfig, CleanedAlignments, Multimatrix, MultimatrixInputs, MultimatrixOutput,
        NullMode, ResponseDirSource, ResponseMatrixSource, SpeciesGroupsSource,
    };
}
