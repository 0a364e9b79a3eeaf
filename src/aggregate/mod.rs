//! Ranking and aggregation of model results.
//!
//! [`Aggregator`] is the single reducer for a run. Grid workers produce
//! immutable [`ModelResult`]s; the aggregator folds them in one at a time.
//! Within a combination it tracks, per gene, whether the gene was ranked or
//! a top gene in any model, its best rank and its highest GSS. When the
//! combination ends, those per-combination facts are merged into the run
//! totals, so `num_combos_ranked` counts combinations, not models.
//!
//! Two aggregators built over disjoint sets of combinations can be combined
//! with [`Aggregator::merge`]; every statistic is a sum, max or min.

mod output;

pub use output::{
    write_gene_ranks, write_model_status, write_selected_sites, write_species_predictions,
};

use crate::data::{GeneRankRecord, ModelResult, Phenotypes, SpeciesPrediction, StatusRecord};
use crate::error::{EslError, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Number of top genes for a model with `n_genes` genes.
///
/// `ceil(top_rank_frac * n_genes)`, never less than 1, so a fraction of 0
/// keeps exactly the single highest-ranked gene.
pub fn top_gene_count(top_rank_frac: f64, n_genes: usize) -> usize {
    ((top_rank_frac * n_genes as f64).ceil() as usize).max(1)
}

/// Rank the genes of one model: descending GSS, ties by gene name.
///
/// Only genes with GSS > 0 are ranked. Returns `(gene, gss, rank)` with
/// 1-based ranks.
pub fn rank_genes(result: &ModelResult) -> Vec<(&str, f64, usize)> {
    let mut scored: Vec<(&str, f64)> = result
        .gene_scores
        .iter()
        .filter(|g| g.gss > 0.0)
        .map(|g| (g.gene.as_str(), g.gss))
        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    scored
        .into_iter()
        .enumerate()
        .map(|(i, (gene, gss))| (gene, gss, i + 1))
        .collect()
}

/// Running statistics for one gene.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct GeneAccumulator {
    num_combos_ranked: usize,
    num_combos_ranked_top: usize,
    highest_ever_gss: f64,
    best_ever_rank: Option<usize>,
    /// Max PSS per 1-based position.
    sites: BTreeMap<usize, f64>,
}

impl GeneAccumulator {
    fn merge(&mut self, other: &GeneAccumulator) {
        self.num_combos_ranked += other.num_combos_ranked;
        self.num_combos_ranked_top += other.num_combos_ranked_top;
        self.highest_ever_gss = self.highest_ever_gss.max(other.highest_ever_gss);
        self.best_ever_rank = min_rank(self.best_ever_rank, other.best_ever_rank);
        for (&pos, &pss) in &other.sites {
            let entry = self.sites.entry(pos).or_insert(0.0);
            *entry = entry.max(pss);
        }
    }
}

/// What a gene did within the combination currently being folded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct ComboGeneState {
    top: bool,
    best_rank: Option<usize>,
    max_gss: f64,
    sites: BTreeMap<usize, f64>,
}

fn min_rank(a: Option<usize>, b: Option<usize>) -> Option<usize> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.min(y)),
        (x, None) => x,
        (None, y) => y,
    }
}

/// Reducer over every model result of a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Aggregator {
    top_rank_frac: f64,
    genes: BTreeMap<String, GeneAccumulator>,
    current_combination: Option<String>,
    current: BTreeMap<String, ComboGeneState>,
    predictions: Vec<SpeciesPrediction>,
    status_log: Vec<StatusRecord>,
    n_models: usize,
    n_combinations: usize,
    #[serde(skip)]
    phenotypes: Option<Phenotypes>,
}

impl Aggregator {
    /// Create a reducer that reports every gene in `genes`, ranked or not.
    pub fn new<I>(genes: I, top_rank_frac: f64) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        if !(0.0..=1.0).contains(&top_rank_frac) {
            return Err(EslError::InvalidParameter(format!(
                "top_rank_frac must be in [0, 1], got {}",
                top_rank_frac
            )));
        }
        Ok(Self {
            top_rank_frac,
            genes: genes
                .into_iter()
                .map(|g| (g, GeneAccumulator::default()))
                .collect(),
            ..Default::default()
        })
    }

    /// Attach true phenotype labels to species predictions.
    pub fn with_phenotypes(mut self, phenotypes: Option<Phenotypes>) -> Self {
        self.phenotypes = phenotypes;
        self
    }

    /// Fold in one model result.
    ///
    /// Non-converged results go to the status log only. A result for a new
    /// combination closes the previous one first.
    pub fn consume(&mut self, result: &ModelResult) -> Result<()> {
        if self.current_combination.as_deref() != Some(result.key.combination.as_str()) {
            self.finish_combination();
            self.current_combination = Some(result.key.combination.clone());
        }

        if !result.status.is_converged() {
            self.status_log.push(StatusRecord {
                key: result.key.clone(),
                status: result.status.clone(),
            });
            return Ok(());
        }
        self.n_models += 1;

        let ranked = rank_genes(result);
        let n_top = top_gene_count(self.top_rank_frac, result.n_genes_total);
        for &(gene, gss, rank) in &ranked {
            if !self.genes.contains_key(gene) {
                return Err(EslError::Invariant(format!(
                    "model {} ranks unknown gene '{}'",
                    result.key, gene
                )));
            }
            let state = self.current.entry(gene.to_string()).or_default();
            state.best_rank = min_rank(state.best_rank, Some(rank));
            state.max_gss = state.max_gss.max(gss);
            state.top |= rank <= n_top;
        }
        for site in &result.site_scores {
            let Some(state) = self.current.get_mut(&site.gene) else {
                return Err(EslError::Invariant(format!(
                    "model {} scores site {} of unranked gene '{}'",
                    result.key, site.position, site.gene
                )));
            };
            let entry = state.sites.entry(site.position).or_insert(0.0);
            *entry = entry.max(site.pss);
        }

        let num_genes = ranked.len();
        for s in &result.species_scores {
            self.predictions.push(SpeciesPrediction {
                combination: result.key.combination.clone(),
                point: result.key.point,
                num_genes,
                input_rmse: result.input_rmse,
                species: s.species.clone(),
                sps: s.sps,
                true_phenotype: self.phenotypes.as_ref().and_then(|p| p.get(&s.species)),
            });
        }
        Ok(())
    }

    /// Fold in a batch of results in order.
    pub fn consume_all<'a, I>(&mut self, results: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a ModelResult>,
    {
        for r in results {
            self.consume(r)?;
        }
        Ok(())
    }

    /// Close the combination currently being folded and merge its
    /// per-gene facts into the run totals. Idempotent.
    pub fn finish_combination(&mut self) {
        let Some(name) = self.current_combination.take() else {
            return;
        };
        let current = std::mem::take(&mut self.current);
        debug!("{}: {} genes ranked", name, current.len());
        for (gene, state) in current {
            let acc = self.genes.entry(gene).or_default();
            acc.merge(&GeneAccumulator {
                num_combos_ranked: 1,
                num_combos_ranked_top: usize::from(state.top),
                highest_ever_gss: state.max_gss,
                best_ever_rank: state.best_rank,
                sites: state.sites,
            });
        }
        self.n_combinations += 1;
    }

    /// Combine with a reducer that folded a disjoint set of combinations.
    ///
    /// Both sides' open combinations are finished first. Predictions and status
    /// records of `other` are appended after this reducer's.
    pub fn merge(&mut self, mut other: Aggregator) {
        self.finish_combination();
        other.finish_combination();
        for (gene, acc) in &other.genes {
            self.genes.entry(gene.clone()).or_default().merge(acc);
        }
        self.predictions.append(&mut other.predictions);
        self.status_log.append(&mut other.status_log);
        self.n_models += other.n_models;
        self.n_combinations += other.n_combinations;
    }

    /// Gene rank records: best rank ascending (never-ranked last), ties by
    /// highest GSS descending, then by name.
    pub fn gene_ranks(&self) -> Vec<GeneRankRecord> {
        let mut records: Vec<GeneRankRecord> = self
            .genes
            .iter()
            .map(|(gene, acc)| GeneRankRecord {
                gene: gene.clone(),
                num_combos_ranked: acc.num_combos_ranked,
                num_combos_ranked_top: acc.num_combos_ranked_top,
                highest_ever_gss: acc.highest_ever_gss,
                best_ever_rank: acc.best_ever_rank,
                selected_sites: acc.sites.iter().map(|(&p, &s)| (p, s)).collect(),
            })
            .collect();
        records.sort_by(|a, b| {
            let by_rank = match (a.best_ever_rank, b.best_ever_rank) {
                (Some(x), Some(y)) => x.cmp(&y),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            };
            by_rank
                .then_with(|| b.highest_ever_gss.total_cmp(&a.highest_ever_gss))
                .then_with(|| a.gene.cmp(&b.gene))
        });
        records
    }

    /// Species predictions in the order models were folded.
    pub fn predictions(&self) -> &[SpeciesPrediction] {
        &self.predictions
    }

    /// Predictions from models that selected at least `min_genes` genes.
    pub fn predictions_with_min_genes(&self, min_genes: usize) -> Vec<&SpeciesPrediction> {
        self.predictions
            .iter()
            .filter(|p| p.num_genes >= min_genes)
            .collect()
    }

    /// Every non-converged or cancelled model.
    pub fn status_log(&self) -> &[StatusRecord] {
        &self.status_log
    }

    /// Number of converged models folded in.
    pub fn n_models(&self) -> usize {
        self.n_models
    }

    /// Number of finished combinations.
    pub fn n_combinations(&self) -> usize {
        self.n_combinations
    }

    /// Fraction of genes counted as top genes per model.
    pub fn top_rank_frac(&self) -> f64 {
        self.top_rank_frac
    }
}
