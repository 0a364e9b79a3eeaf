//! Analysis configuration.

use crate::cancel::CancelPolicy;
use crate::error::{EslError, Result};
use crate::grid::GridConfig;
use crate::model::SglConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Which null models, if any, replace the real-data fits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NullMode {
    /// Fit the real responses.
    #[default]
    None,
    /// Fit every balanced response flip of each combination.
    ResponseFlip,
    /// Fit pair-randomized alignments with the real responses.
    PairRandomized,
}

/// Every knob that affects analysis results.
///
/// Two runs with equal configurations over the same inputs produce the same
/// results; checkpoints are only resumed under an equal configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Gap cancellation policy.
    pub cancel: CancelPolicy,
    /// Hyperparameter grid.
    pub grid: GridConfig,
    /// Default solver settings.
    pub solver: SglConfig,
    /// Fraction of a model's genes counted as top genes.
    pub top_rank_frac: f64,
    /// Minimum selected genes for a model's predictions to be reported.
    pub min_genes: usize,
    /// Null model family.
    pub null_mode: NullMode,
    /// Pair-randomized variants per combination.
    pub num_randomized_alignments: usize,
    /// Seed for pair randomization.
    pub seed: u64,
    /// Combinations with more species than this get symbolic names.
    pub symbolic_name_threshold: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            cancel: CancelPolicy::default(),
            grid: GridConfig::default(),
            solver: SglConfig::default(),
            top_rank_frac: 0.01,
            min_genes: 0,
            null_mode: NullMode::None,
            num_randomized_alignments: 10,
            seed: 42,
            symbolic_name_threshold: 16,
        }
    }
}

impl AnalysisConfig {
    /// A small, fast configuration for testing.
    pub fn quick() -> Self {
        Self {
            grid: GridConfig::quick(),
            solver: SglConfig {
                max_iterations: 2_000,
                tolerance: 1e-5,
            },
            top_rank_frac: 0.1,
            num_randomized_alignments: 2,
            ..Default::default()
        }
    }

    /// Load from YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(EslError::from)
    }

    /// Save to YAML string.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(EslError::from)
    }

    /// Load from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_yaml(&std::fs::read_to_string(path)?)
    }

    /// Set the null model family.
    pub fn with_null_mode(mut self, mode: NullMode) -> Self {
        self.null_mode = mode;
        self
    }

    /// Set the grid.
    pub fn with_grid(mut self, grid: GridConfig) -> Self {
        self.grid = grid;
        self
    }

    /// Set the cancellation policy.
    pub fn with_cancel_policy(mut self, policy: CancelPolicy) -> Self {
        self.cancel = policy;
        self
    }

    /// Set the top gene fraction.
    pub fn with_top_rank_frac(mut self, frac: f64) -> Self {
        self.top_rank_frac = frac;
        self
    }

    /// Check parameter ranges.
    pub fn validate(&self) -> Result<()> {
        self.grid.validate()?;
        if !(0.0..=1.0).contains(&self.top_rank_frac) {
            return Err(EslError::InvalidParameter(format!(
                "top_rank_frac must be in [0, 1], got {}",
                self.top_rank_frac
            )));
        }
        if self.null_mode == NullMode::PairRandomized && self.num_randomized_alignments == 0 {
            return Err(EslError::InvalidParameter(
                "num_randomized_alignments must be at least 1".to_string(),
            ));
        }
        if self.solver.max_iterations == 0 || self.solver.tolerance <= 0.0 {
            return Err(EslError::InvalidParameter(format!(
                "solver needs max_iterations >= 1 and a positive tolerance, got {} and {}",
                self.solver.max_iterations, self.solver.tolerance
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::GroupPenaltyType;

    #[test]
    fn test_defaults() {
        let config = AnalysisConfig::default();
        assert_eq!(config.cancel.min_pairs, 2);
        assert_eq!(config.top_rank_frac, 0.01);
        assert_eq!(config.num_randomized_alignments, 10);
        assert_eq!(config.grid.group_penalty_type, GroupPenaltyType::Median);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_yaml_roundtrip_and_partial_yaml() {
        let config = AnalysisConfig::quick().with_null_mode(NullMode::ResponseFlip);
        let parsed = AnalysisConfig::from_yaml(&config.to_yaml().unwrap()).unwrap();
        assert_eq!(parsed, config);

        let partial = AnalysisConfig::from_yaml(
            "top_rank_frac: 0.05\nnull_mode: pair_randomized\ngrid:\n  group_penalty_type: use_default_gp\n",
        )
        .unwrap();
        assert_eq!(partial.top_rank_frac, 0.05);
        assert_eq!(partial.null_mode, NullMode::PairRandomized);
        assert_eq!(partial.grid.group_penalty_type, GroupPenaltyType::Std);
        assert_eq!(partial.cancel, CancelPolicy::default());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(AnalysisConfig::default().with_top_rank_frac(1.5).validate().is_err());
        let config = AnalysisConfig {
            num_randomized_alignments: 0,
            ..AnalysisConfig::default().with_null_mode(NullMode::PairRandomized)
        };
        assert!(config.validate().is_err());
    }
}
