//! Data structures for multimatrix convergence analysis.

pub mod alignment;
mod phenotype;
mod response_matrix;
mod result;
pub mod species_groups;

pub use alignment::{read_gene_list, Alignment, AlignmentSet, GAP};
pub use phenotype::Phenotypes;
pub use response_matrix::{ColumnInfo, GeneInfo, ResponseMatrix};
pub use result::{
    FeatureWeight, FitStatus, GeneRankRecord, GeneScore, ModelKey, ModelResult, SiteScore,
    SpeciesPrediction, SpeciesScore, StatusRecord,
};
pub use species_groups::{
    read_response_file, CombinationIdentity, Combinations, Label, SpeciesCombination,
    SpeciesGroups,
};
