//! Error types for the esl-multimatrix library.

use thiserror::Error;

/// Main error type for the library.
#[derive(Error, Debug)]
pub enum EslError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Malformed alignment '{gene}': {reason}")]
    MalformedAlignment { gene: String, reason: String },

    #[error(
        "Inconsistent sequence length in alignment '{gene}': '{species}' has length {actual}, expected {expected}"
    )]
    UnequalSequenceLength {
        gene: String,
        species: String,
        expected: usize,
        actual: usize,
    },

    #[error("Species '{species}' is missing from alignment '{gene}'")]
    MissingSpecies { gene: String, species: String },

    #[error("Species groups error: {0}")]
    SpeciesGroups(String),

    #[error("Species not found in any alignment: {0}")]
    UnknownSpecies(String),

    #[error("Phenotype file error on line {line}: {reason}")]
    Phenotype { line: usize, reason: String },

    #[error("Empty data: {0}")]
    EmptyData(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Solver did not converge: {0}")]
    DidNotConverge(String),

    #[error("Aggregation invariant violated: {0}")]
    Invariant(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Pipeline error: {0}")]
    Pipeline(String),

    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, EslError>;
