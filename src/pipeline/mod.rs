//! Multimatrix pipeline: configuration, combination sources, the runner
//! and checkpointing.

mod checkpoint;
mod config;
mod runner;
mod source;

pub use checkpoint::{CheckpointState, Checkpointer};
pub use config::{AnalysisConfig, NullMode};
pub use runner::{
    combination_alignment_dir, write_cancelled_alignments, CleanedAlignments, Multimatrix,
    MultimatrixInputs, MultimatrixOutput,
};
pub use source::{ResponseDirSource, ResponseMatrixSource, SpeciesGroupsSource};
