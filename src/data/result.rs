//! Result types for multimatrix model fitting and aggregation.

use crate::data::alignment::AlignmentSet;
use crate::data::species_groups::Label;
use crate::grid::GridPoint;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Identifies one fitted model: a combination (or null variant) and a grid point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelKey {
    /// Combination or null-variant name.
    pub combination: String,
    /// Hyperparameters of the fit.
    pub point: GridPoint,
}

impl fmt::Display for ModelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (lambda1={}, lambda2={}, penalty_term={})",
            self.combination,
            self.point.lambda1,
            self.point.lambda2,
            self.point.penalty_label()
        )
    }
}

/// Outcome of a single fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FitStatus {
    /// The solver converged.
    Converged {
        /// Iterations used.
        iterations: usize,
    },
    /// The solver failed; the model is excluded from aggregation.
    Failed {
        /// Failure reason reported by the solver.
        reason: String,
    },
    /// The run was cancelled before this grid point was fitted.
    Cancelled,
}

impl FitStatus {
    /// True if the model can be aggregated.
    pub fn is_converged(&self) -> bool {
        matches!(self, Self::Converged { .. })
    }

    /// Short status name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Converged { .. } => "converged",
            Self::Failed { .. } => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// A nonzero model weight on one encoded (site, residue) feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureWeight {
    /// Gene name.
    pub gene: String,
    /// 1-based position in the source alignment.
    pub position: usize,
    /// Encoded residue.
    pub residue: char,
    /// Coefficient.
    pub weight: f64,
}

/// Group Sparsity Score for one gene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneScore {
    /// Gene name.
    pub gene: String,
    /// Sum of absolute coefficients over the gene's columns.
    pub gss: f64,
}

/// Position Sparsity Score for one site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteScore {
    /// Gene name.
    pub gene: String,
    /// 1-based position in the source alignment.
    pub position: usize,
    /// Sum of absolute coefficients over the site's columns.
    pub pss: f64,
}

/// Sequence Prediction Score for one species.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeciesScore {
    /// Species identifier.
    pub species: String,
    /// Signed model output.
    pub sps: f64,
    /// True if the species was a training row.
    pub training: bool,
}

/// Everything retained from one fitted model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelResult {
    /// Which model this is.
    pub key: ModelKey,
    /// Fit outcome.
    pub status: FitStatus,
    /// Fitted intercept.
    pub intercept: f64,
    /// Root mean squared error of the fit on training species.
    pub input_rmse: f64,
    /// Nonzero feature weights.
    pub weights: Vec<FeatureWeight>,
    /// Genes with nonzero GSS, in gene order.
    pub gene_scores: Vec<GeneScore>,
    /// Sites with nonzero PSS, in column order.
    pub site_scores: Vec<SiteScore>,
    /// Scores for training and prediction-only species.
    pub species_scores: Vec<SpeciesScore>,
    /// Number of genes in the response matrix the model was fitted on.
    pub n_genes_total: usize,
}

impl ModelResult {
    /// A result carrying only a non-converged status.
    pub fn unfitted(key: ModelKey, status: FitStatus, n_genes_total: usize) -> Self {
        Self {
            key,
            status,
            intercept: 0.0,
            input_rmse: f64::NAN,
            weights: Vec::new(),
            gene_scores: Vec::new(),
            site_scores: Vec::new(),
            species_scores: Vec::new(),
            n_genes_total,
        }
    }

    /// Number of genes with nonzero GSS.
    pub fn n_genes_selected(&self) -> usize {
        self.gene_scores.len()
    }

    /// Score every species of an alignment set with this model:
    /// intercept plus the weights of features present in the sequence.
    pub fn predict_alignments(&self, alignments: &AlignmentSet) -> HashMap<String, f64> {
        let mut scores: HashMap<String, f64> = alignments
            .all_species()
            .into_iter()
            .map(|s| (s, self.intercept))
            .collect();
        for w in &self.weights {
            let Some(aln) = alignments.get(&w.gene) else {
                continue;
            };
            for species in aln.species() {
                let hit = aln
                    .sequence(species)
                    .and_then(|seq| seq.get(w.position - 1))
                    .map(|&b| b as char == w.residue)
                    .unwrap_or(false);
                if hit {
                    if let Some(s) = scores.get_mut(species) {
                        *s += w.weight;
                    }
                }
            }
        }
        scores
    }
}

/// Aggregated ranking statistics for one gene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneRankRecord {
    /// Gene name.
    pub gene: String,
    /// Combinations in which the gene had nonzero GSS in some model.
    pub num_combos_ranked: usize,
    /// Combinations in which the gene was a top gene in some model.
    pub num_combos_ranked_top: usize,
    /// Maximum GSS observed.
    pub highest_ever_gss: f64,
    /// Best (lowest) rank observed; `None` if never ranked.
    pub best_ever_rank: Option<usize>,
    /// Maximum PSS per 1-based position, for selected-site output.
    pub selected_sites: Vec<(usize, f64)>,
}

/// One species score from one model, as written to the predictions output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeciesPrediction {
    /// Combination or null-variant name.
    pub combination: String,
    /// Hyperparameters of the model.
    pub point: GridPoint,
    /// Genes with nonzero GSS in the model.
    pub num_genes: usize,
    /// Input RMSE of the model.
    pub input_rmse: f64,
    /// Species identifier.
    pub species: String,
    /// Sequence Prediction Score.
    pub sps: f64,
    /// True phenotype label, if a phenotype file was supplied.
    pub true_phenotype: Option<Label>,
}

/// A recorded non-converged (or cancelled) model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    /// Which model.
    pub key: ModelKey,
    /// Its status.
    pub status: FitStatus,
}
