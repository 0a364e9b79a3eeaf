//! The multimatrix pipeline: cancel, build, fit and aggregate every combination.

use crate::aggregate::{
    write_gene_ranks, write_model_status, write_selected_sites, write_species_predictions,
    Aggregator,
};
use crate::cancel::{cancel_combination, CancelPolicy, CleanedAlignmentSet};
use crate::data::{AlignmentSet, ModelResult, Phenotypes, ResponseMatrix, SpeciesCombination};
use crate::error::{EslError, Result};
use crate::grid::{run_grid, CancelToken, GridPoint};
use crate::model::{SparseGroupLasso, SparseSolver};
use crate::null::{pair_randomized, pair_randomized_name, response_flip_variants};
use crate::pipeline::checkpoint::{CheckpointState, Checkpointer};
use crate::pipeline::config::{AnalysisConfig, NullMode};
use crate::pipeline::source::ResponseMatrixSource;
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

/// Inputs of one multimatrix run.
pub struct MultimatrixInputs {
    /// Alignment store.
    pub alignments: AlignmentSet,
    /// Source of labelled combinations.
    pub source: Box<dyn ResponseMatrixSource>,
    /// Alignments of species scored but not used for training.
    pub prediction_alignments: Option<AlignmentSet>,
    /// True phenotypes attached to species predictions.
    pub phenotypes: Option<Phenotypes>,
}

/// Where gap-cancelled alignments are read from or written to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanedAlignments {
    /// Cancel in memory only.
    InMemory,
    /// Cancel and write each combination to `<dir>/<combo>-alignments`.
    Write(PathBuf),
    /// Reuse alignments previously written under `<dir>/<combo>-alignments`.
    Reuse(PathBuf),
}

/// Sub-directory holding a combination's cleaned alignments.
pub fn combination_alignment_dir(root: &Path, combo: &SpeciesCombination) -> PathBuf {
    root.join(format!("{}-alignments", combo.name()))
}

/// Final results of a run.
#[derive(Debug, Clone)]
pub struct MultimatrixOutput {
    /// Reducer holding gene ranks, predictions and the status log.
    pub aggregator: Aggregator,
    /// Fully cancelled gene count per combination.
    pub fully_cancelled: Vec<(String, usize)>,
    /// True if the run stopped early on a cancellation request.
    pub cancelled: bool,
}

impl MultimatrixOutput {
    /// Write the output tables into `dir`, named `<base>_*.csv`.
    ///
    /// Only predictions of models with at least `min_genes` selected genes
    /// are written.
    pub fn write<P: AsRef<Path>>(
        &self,
        dir: P,
        base_name: &str,
        min_genes: usize,
        show_selected_sites: bool,
    ) -> Result<Vec<PathBuf>> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let mut written = Vec::new();
        let path_for = |suffix: &str| dir.join(format!("{}_{}.csv", base_name, suffix));

        let path = path_for("species_predictions");
        write_species_predictions(
            BufWriter::new(File::create(&path)?),
            self.aggregator.predictions_with_min_genes(min_genes),
        )?;
        written.push(path);

        let ranks = self.aggregator.gene_ranks();
        let path = path_for("gene_ranks");
        write_gene_ranks(BufWriter::new(File::create(&path)?), &ranks)?;
        written.push(path);

        if show_selected_sites {
            let path = path_for("selected_sites");
            write_selected_sites(BufWriter::new(File::create(&path)?), &ranks)?;
            written.push(path);
        }

        let path = path_for("model_status");
        write_model_status(BufWriter::new(File::create(&path)?), self.aggregator.status_log())?;
        written.push(path);

        info!("Wrote {} output files to {:?}", written.len(), dir);
        Ok(written)
    }
}

/// Multimatrix pipeline runner.
pub struct Multimatrix {
    config: AnalysisConfig,
    solver: Box<dyn SparseSolver>,
    cancel: CancelToken,
    cleaned: CleanedAlignments,
    checkpoint: Option<Checkpointer>,
    force_from_beginning: bool,
}

impl Multimatrix {
    /// Create a runner using the default sparse group lasso solver.
    pub fn new(config: AnalysisConfig) -> Self {
        let solver = Box::new(SparseGroupLasso::new(config.solver.clone()));
        Self {
            config,
            solver,
            cancel: CancelToken::new(),
            cleaned: CleanedAlignments::InMemory,
            checkpoint: None,
            force_from_beginning: false,
        }
    }

    /// Use a different solver.
    pub fn with_solver(mut self, solver: Box<dyn SparseSolver>) -> Self {
        self.solver = solver;
        self
    }

    /// Use an externally controlled cancellation token.
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Choose where cleaned alignments come from.
    pub fn with_cleaned_alignments(mut self, cleaned: CleanedAlignments) -> Self {
        self.cleaned = cleaned;
        self
    }

    /// Checkpoint after every combination under `<output_dir>/checkpoint`.
    pub fn with_checkpoint<P: AsRef<Path>>(mut self, output_dir: P, force_from_beginning: bool) -> Self {
        self.checkpoint = Some(Checkpointer::new(output_dir));
        self.force_from_beginning = force_from_beginning;
        self
    }

    /// The analysis configuration.
    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Token that stops the run between grid points.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Check every input before any fitting begins.
    fn validate(&self, inputs: &MultimatrixInputs) -> Result<Vec<GridPoint>> {
        self.config.validate()?;
        let points = self.config.grid.points()?;
        inputs.source.validate(&inputs.alignments)?;
        if inputs.source.n_combinations() == 0 {
            return Err(EslError::EmptyData(format!(
                "{} yields no combinations",
                inputs.source.describe()
            )));
        }
        if self.config.null_mode == NullMode::ResponseFlip {
            if let Some(combo) = inputs.source.combinations().find(|c| c.n_pairs() % 2 != 0) {
                return Err(EslError::InvalidParameter(format!(
                    "response-flip nulls need an even number of contrast pairs; {} has {}",
                    combo.name(),
                    combo.n_pairs()
                )));
            }
        }
        if let CleanedAlignments::Reuse(root) = &self.cleaned {
            for combo in inputs.source.combinations() {
                let dir = combination_alignment_dir(root, &combo);
                if !dir.is_dir() {
                    return Err(EslError::InvalidParameter(format!(
                        "no existing cleaned alignments for {} at {:?}",
                        combo.name(),
                        dir
                    )));
                }
            }
        }
        Ok(points)
    }

    /// Cleaned alignments of one combination. `Write` mode only writes them
    /// when `persist` is set.
    fn cleaned_alignments(
        &self,
        alignments: &AlignmentSet,
        combo: &SpeciesCombination,
        persist: bool,
    ) -> Result<CleanedAlignmentSet> {
        match &self.cleaned {
            CleanedAlignments::InMemory => cancel_combination(alignments, combo, &self.config.cancel),
            CleanedAlignments::Write(root) => {
                let cleaned = cancel_combination(alignments, combo, &self.config.cancel)?;
                if persist {
                    cleaned.to_dir(combination_alignment_dir(root, combo))?;
                }
                Ok(cleaned)
            }
            CleanedAlignments::Reuse(root) => {
                CleanedAlignmentSet::from_dir(combination_alignment_dir(root, combo), combo)
            }
        }
    }

    /// Cancel and build every combination once so that data errors surface
    /// before the first fit. Writes cleaned alignments in `Write` mode.
    ///
    /// Returns the fully cancelled gene count per combination.
    fn prepare(
        &self,
        inputs: &MultimatrixInputs,
        combos: &[SpeciesCombination],
    ) -> Result<Vec<usize>> {
        let prediction = inputs.prediction_alignments.as_ref();
        let mut n_full = Vec::with_capacity(combos.len());
        for combo in combos {
            let cleaned = self.cleaned_alignments(&inputs.alignments, combo, true)?;
            ResponseMatrix::build(&cleaned, combo, prediction)?;
            n_full.push(cleaned.n_fully_cancelled());
        }
        debug!("Checked {} combinations before fitting", combos.len());
        Ok(n_full)
    }

    /// Fit one matrix over the grid and fold the results.
    fn fit_and_fold(
        &self,
        matrix: &ResponseMatrix,
        points: &[GridPoint],
        aggregator: &mut Aggregator,
        runs: &mut Vec<ModelResult>,
    ) -> Result<()> {
        let results = run_grid(
            matrix,
            points,
            self.solver.as_ref(),
            self.config.grid.group_penalty_type,
            &self.cancel,
        )?;
        aggregator.consume_all(&results)?;
        aggregator.finish_combination();
        runs.extend(results);
        Ok(())
    }

    /// Run the whole analysis.
    ///
    /// Input errors, including per-combination cancellation and matrix
    /// errors, abort before the first fit. Per-model fit failures are
    /// recorded in the output's status log. On cancellation, results up to
    /// the last completed grid point are returned.
    pub fn run(&self, inputs: &MultimatrixInputs) -> Result<MultimatrixOutput> {
        let points = self.validate(inputs)?;
        info!(
            "Multimatrix run over {} with {} alignments and {} grid points per matrix",
            inputs.source.describe(),
            inputs.alignments.len(),
            points.len()
        );

        let resumed = match &self.checkpoint {
            Some(cp) => cp.resume(&self.config, self.force_from_beginning)?,
            None => None,
        };
        let (mut aggregator, mut fully_cancelled, start) = match resumed {
            Some(state) => (
                state.aggregator.with_phenotypes(inputs.phenotypes.clone()),
                state.fully_cancelled,
                state.last_combination + 1,
            ),
            None => (
                Aggregator::new(inputs.alignments.gene_names(), self.config.top_rank_frac)?
                    .with_phenotypes(inputs.phenotypes.clone()),
                Vec::new(),
                0,
            ),
        };

        let prediction = inputs.prediction_alignments.as_ref();
        let combos: Vec<SpeciesCombination> = inputs.source.combinations().skip(start).collect();
        let n_full = self.prepare(inputs, &combos)?;

        for (combo, n_full) in combos.into_iter().zip(n_full) {
            if self.cancel.is_cancelled() {
                break;
            }
            let cleaned = self.cleaned_alignments(&inputs.alignments, &combo, false)?;
            fully_cancelled.push((combo.name(), n_full));
            let matrix = ResponseMatrix::build(&cleaned, &combo, prediction)?;
            let mut runs = Vec::new();

            match self.config.null_mode {
                NullMode::None => {
                    self.fit_and_fold(&matrix, &points, &mut aggregator, &mut runs)?;
                }
                NullMode::ResponseFlip => {
                    for variant in response_flip_variants(&combo)? {
                        let flipped = matrix.with_responses(&variant.name, variant.responses())?;
                        self.fit_and_fold(&flipped, &points, &mut aggregator, &mut runs)?;
                    }
                }
                NullMode::PairRandomized => {
                    let seed = self.config.seed.wrapping_add(combo.index() as u64);
                    let mut rng = StdRng::seed_from_u64(seed);
                    for i in 0..self.config.num_randomized_alignments {
                        let name = pair_randomized_name(&combo, i);
                        let randomized = pair_randomized(&cleaned, &combo, &name, &mut rng)?;
                        let built = ResponseMatrix::build(&randomized, &combo, prediction)?
                            .with_responses(&name, combo.responses())?;
                        self.fit_and_fold(&built, &points, &mut aggregator, &mut runs)?;
                    }
                }
            }

            let n_failed = runs.iter().filter(|r| !r.status.is_converged()).count();
            if n_failed > 0 {
                warn!("{}: {} of {} models not converged", combo.name(), n_failed, runs.len());
            }
            info!(
                "Combination {} ({}): {} models, {} variable columns over {} genes",
                combo.index(),
                combo.name(),
                runs.len() - n_failed,
                matrix.n_columns(),
                matrix.n_genes()
            );

            if self.cancel.is_cancelled() {
                break;
            }
            if let Some(cp) = &self.checkpoint {
                let state = CheckpointState {
                    last_combination: combo.index(),
                    aggregator: aggregator.clone(),
                    fully_cancelled: fully_cancelled.clone(),
                };
                cp.save(&self.config, &state, &runs)?;
            }
        }

        aggregator.finish_combination();
        let cancelled = self.cancel.is_cancelled();
        if cancelled {
            warn!(
                "Run cancelled; reporting {} models from {} combinations",
                aggregator.n_models(),
                aggregator.n_combinations()
            );
        } else {
            info!(
                "Aggregated {} models from {} combinations",
                aggregator.n_models(),
                aggregator.n_combinations()
            );
        }
        Ok(MultimatrixOutput {
            aggregator,
            fully_cancelled,
            cancelled,
        })
    }
}

/// Cancel gaps for every combination of a source and write the cleaned
/// alignments to `<root>/<combo>-alignments`.
///
/// Returns the fully cancelled gene count per combination.
pub fn write_cancelled_alignments<P: AsRef<Path>>(
    alignments: &AlignmentSet,
    source: &dyn ResponseMatrixSource,
    policy: &CancelPolicy,
    root: P,
) -> Result<Vec<(String, usize)>> {
    source.validate(alignments)?;
    let root = root.as_ref();
    let mut counts = Vec::with_capacity(source.n_combinations());
    for combo in source.combinations() {
        let cleaned = cancel_combination(alignments, &combo, policy)?;
        cleaned.to_dir(combination_alignment_dir(root, &combo))?;
        counts.push((combo.name(), cleaned.n_fully_cancelled()));
    }
    Ok(counts)
}
