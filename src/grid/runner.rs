//! Fitting one response matrix across every grid point.

use crate::data::{
    FeatureWeight, FitStatus, GeneScore, ModelKey, ModelResult, ResponseMatrix, SiteScore,
    SpeciesScore,
};
use crate::error::{EslError, Result};
use crate::grid::GridPoint;
use crate::model::{GroupPenaltyType, SparseSolver};
use log::{debug, warn};
use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared flag for stopping a sweep between grid points.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// A token that has not been cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Points already being fitted finish normally.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// True once [`CancelToken::cancel`] has been called on any clone.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Fit every grid point of one response matrix in parallel.
///
/// Results are returned in grid order. A fit that fails is kept with a
/// [`FitStatus::Failed`] status; a point reached after cancellation is
/// kept as [`FitStatus::Cancelled`] without being fitted.
///
/// # Errors
/// Only [`EslError::Invariant`] aborts the sweep: it means the solver
/// output does not match the matrix's column mapping.
pub fn run_grid(
    matrix: &ResponseMatrix,
    points: &[GridPoint],
    solver: &dyn SparseSolver,
    penalty: GroupPenaltyType,
    cancel: &CancelToken,
) -> Result<Vec<ModelResult>> {
    points
        .par_iter()
        .map(|&point| {
            let key = ModelKey {
                combination: matrix.combination().to_string(),
                point,
            };
            if cancel.is_cancelled() {
                return Ok(ModelResult::unfitted(key, FitStatus::Cancelled, matrix.n_genes()));
            }
            match fit_point(matrix, point, solver, penalty) {
                Ok(result) => Ok(result),
                Err(e @ EslError::Invariant(_)) => Err(e),
                Err(e) => {
                    warn!("{}: {}", key, e);
                    let status = FitStatus::Failed {
                        reason: e.to_string(),
                    };
                    Ok(ModelResult::unfitted(key, status, matrix.n_genes()))
                }
            }
        })
        .collect()
}

/// Fit one grid point and derive its gene, site and species scores.
pub fn fit_point(
    matrix: &ResponseMatrix,
    point: GridPoint,
    solver: &dyn SparseSolver,
    penalty: GroupPenaltyType,
) -> Result<ModelResult> {
    let group_weights = penalty.group_weights(&matrix.gene_site_counts(), point.penalty)?;
    let groups = matrix.column_groups();
    let fit = solver.fit(
        matrix.x(),
        matrix.responses(),
        &groups,
        point.lambda1,
        point.lambda2,
        &group_weights,
    )?;

    if fit.coefficients.len() != matrix.n_columns() {
        return Err(EslError::Invariant(format!(
            "solver returned {} coefficients for {} columns of {}",
            fit.coefficients.len(),
            matrix.n_columns(),
            matrix.combination()
        )));
    }
    let beta = DVector::from_column_slice(&fit.coefficients);

    let mut weights = Vec::new();
    for (j, &w) in fit.coefficients.iter().enumerate() {
        if w != 0.0 {
            let (gene, position) = matrix.site_of(j)?;
            weights.push(FeatureWeight {
                gene: gene.to_string(),
                position,
                residue: matrix.columns()[j].residue as char,
                weight: w,
            });
        }
    }

    let gene_scores: Vec<GeneScore> = matrix
        .genes()
        .iter()
        .filter_map(|g| {
            let gss: f64 = fit.coefficients[g.columns.clone()].iter().map(|c| c.abs()).sum();
            (gss > 0.0).then(|| GeneScore {
                gene: g.name.clone(),
                gss,
            })
        })
        .collect();

    let mut site_scores: Vec<SiteScore> = Vec::new();
    let mut last: Option<(usize, usize)> = None;
    for (j, col) in matrix.columns().iter().enumerate() {
        let magnitude = fit.coefficients[j].abs();
        if last == Some((col.gene, col.site)) {
            if let Some(s) = site_scores.last_mut() {
                s.pss += magnitude;
            }
        } else {
            let (gene, position) = matrix.site_of(j)?;
            site_scores.push(SiteScore {
                gene: gene.to_string(),
                position,
                pss: magnitude,
            });
            last = Some((col.gene, col.site));
        }
    }
    site_scores.retain(|s| s.pss > 0.0);

    let train_sps = scores(matrix.x(), &beta, fit.intercept);
    let sse: f64 = train_sps
        .iter()
        .zip(matrix.responses())
        .map(|(p, y)| (y - p).powi(2))
        .sum();
    let input_rmse = (sse / train_sps.len() as f64).sqrt();

    let mut species_scores: Vec<SpeciesScore> = matrix
        .species()
        .iter()
        .zip(&train_sps)
        .map(|(s, &sps)| SpeciesScore {
            species: s.clone(),
            sps,
            training: true,
        })
        .collect();
    let pred_sps = scores(matrix.prediction_x(), &beta, fit.intercept);
    species_scores.extend(matrix.prediction_species().iter().zip(pred_sps).map(|(s, sps)| {
        SpeciesScore {
            species: s.clone(),
            sps,
            training: false,
        }
    }));

    debug!(
        "{} lambda1={} lambda2={} penalty_term={}: {} genes, rmse {:.4}, {} iterations",
        matrix.combination(),
        point.lambda1,
        point.lambda2,
        point.penalty_label(),
        gene_scores.len(),
        input_rmse,
        fit.iterations
    );

    Ok(ModelResult {
        key: ModelKey {
            combination: matrix.combination().to_string(),
            point,
        },
        status: FitStatus::Converged {
            iterations: fit.iterations,
        },
        intercept: fit.intercept,
        input_rmse,
        weights,
        gene_scores,
        site_scores,
        species_scores,
        n_genes_total: matrix.n_genes(),
    })
}

fn scores(x: &DMatrix<f64>, beta: &DVector<f64>, intercept: f64) -> Vec<f64> {
    if x.nrows() == 0 {
        return Vec::new();
    }
    (x * beta).iter().map(|v| v + intercept).collect()
}
