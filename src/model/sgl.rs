//! Sparse group lasso fitted by accelerated proximal gradient descent (FISTA).
//!
//! Minimises
//!
//! ```text
//! 1/(2n) ||y - b - X beta||^2 + l1 * lmax * sum_j |beta_j| + l2 * lmax * sum_g w_g ||beta_g||_2
//! ```
//!
//! where `lmax = max_j |X_j' (y - mean(y))| / n` on centered columns, so the
//! user-facing lambdas are fractions of the smallest penalty that zeroes
//! every coefficient. The intercept `b` is unpenalised.

use crate::error::{EslError, Result};
use crate::model::solver::{SolverFit, SparseSolver};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// Configuration for the sparse group lasso solver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SglConfig {
    /// Maximum proximal-gradient iterations.
    pub max_iterations: usize,
    /// Relative tolerance on the largest coefficient change.
    pub tolerance: f64,
}

impl Default for SglConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10_000,
            tolerance: 1e-6,
        }
    }
}

/// Default [`SparseSolver`] implementation.
#[derive(Debug, Clone, Default)]
pub struct SparseGroupLasso {
    config: SglConfig,
}

impl SparseGroupLasso {
    /// Create a solver with the given configuration.
    pub fn new(config: SglConfig) -> Self {
        Self { config }
    }

    /// Solver configuration.
    pub fn config(&self) -> &SglConfig {
        &self.config
    }
}

fn soft_threshold(v: f64, t: f64) -> f64 {
    if v > t {
        v - t
    } else if v < -t {
        v + t
    } else {
        0.0
    }
}

impl SparseSolver for SparseGroupLasso {
    fn fit(
        &self,
        x: &DMatrix<f64>,
        y: &[f64],
        groups: &[usize],
        lambda1: f64,
        lambda2: f64,
        group_weights: &[f64],
    ) -> Result<SolverFit> {
        let (n, p) = x.shape();
        if y.len() != n {
            return Err(EslError::InvalidParameter(format!(
                "response length {} does not match {} rows",
                y.len(),
                n
            )));
        }
        if groups.len() != p {
            return Err(EslError::InvalidParameter(format!(
                "{} group tags for {} columns",
                groups.len(),
                p
            )));
        }
        if let Some(&g) = groups.iter().find(|&&g| g >= group_weights.len()) {
            return Err(EslError::InvalidParameter(format!(
                "group {} has no penalty weight ({} weights)",
                g,
                group_weights.len()
            )));
        }
        if lambda1 < 0.0 || lambda2 < 0.0 {
            return Err(EslError::InvalidParameter(
                "lambdas must be non-negative".to_string(),
            ));
        }
        if n == 0 {
            return Err(EslError::EmptyData("design matrix has no rows".to_string()));
        }

        let nf = n as f64;
        let y_mean = y.iter().sum::<f64>() / nf;
        let col_means: Vec<f64> = (0..p).map(|j| x.column(j).sum() / nf).collect();
        let xc = DMatrix::from_fn(n, p, |i, j| x[(i, j)] - col_means[j]);
        let yc = DVector::from_iterator(n, y.iter().map(|v| v - y_mean));

        let xty = xc.transpose() * &yc;
        let lambda_max = xty.amax() / nf;
        if p == 0 || lambda_max <= f64::EPSILON {
            return Ok(SolverFit {
                coefficients: vec![0.0; p],
                intercept: y_mean,
                iterations: 0,
            });
        }

        // Lipschitz constant of the smooth part: largest eigenvalue of Xc Xc' / n
        let gram = &xc * xc.transpose();
        let lipschitz = gram.symmetric_eigen().eigenvalues.max() / nf;
        if !lipschitz.is_finite() || lipschitz <= 0.0 {
            return Err(EslError::DidNotConverge(format!(
                "degenerate step size (Lipschitz constant {})",
                lipschitz
            )));
        }
        let step = 1.0 / lipschitz;
        let l1 = lambda1 * lambda_max * step;
        let l2 = lambda2 * lambda_max * step;

        let n_groups = group_weights.len();
        let mut members: Vec<Vec<usize>> = vec![Vec::new(); n_groups];
        for (j, &g) in groups.iter().enumerate() {
            members[g].push(j);
        }

        let mut beta = DVector::<f64>::zeros(p);
        let mut momentum = beta.clone();
        let mut t_k = 1.0f64;

        for iter in 1..=self.config.max_iterations {
            let residual = &yc - &xc * &momentum;
            let grad = -(xc.transpose() * residual) / nf;
            let mut next = &momentum - grad * step;

            for v in next.iter_mut() {
                *v = soft_threshold(*v, l1);
            }
            for (g, cols) in members.iter().enumerate() {
                if cols.is_empty() {
                    continue;
                }
                let norm = cols.iter().map(|&j| next[j] * next[j]).sum::<f64>().sqrt();
                let scale = if norm > 0.0 {
                    (1.0 - l2 * group_weights[g] / norm).max(0.0)
                } else {
                    0.0
                };
                for &j in cols {
                    next[j] *= scale;
                }
            }

            if next.iter().any(|v| !v.is_finite()) {
                return Err(EslError::DidNotConverge(format!(
                    "non-finite coefficient at iteration {}",
                    iter
                )));
            }

            let change = (&next - &beta).amax();
            let scale = beta.amax().max(1.0);

            let t_next = (1.0 + (1.0 + 4.0 * t_k * t_k).sqrt()) / 2.0;
            momentum = &next + (&next - &beta) * ((t_k - 1.0) / t_next);
            t_k = t_next;
            beta = next;

            if change <= self.config.tolerance * scale {
                let intercept = y_mean
                    - beta
                        .iter()
                        .zip(&col_means)
                        .map(|(b, m)| b * m)
                        .sum::<f64>();
                return Ok(SolverFit {
                    coefficients: beta.iter().copied().collect(),
                    intercept,
                    iterations: iter,
                });
            }
        }

        Err(EslError::DidNotConverge(format!(
            "no convergence within {} iterations",
            self.config.max_iterations
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn toy() -> (DMatrix<f64>, Vec<f64>, Vec<usize>) {
        // Column 0 tracks the response perfectly; columns 1-2 are noise.
        let x = DMatrix::from_row_slice(
            6,
            3,
            &[
                1.0, 0.0, 1.0, //
                0.0, 1.0, 1.0, //
                1.0, 1.0, 0.0, //
                0.0, 0.0, 0.0, //
                1.0, 0.0, 0.0, //
                0.0, 1.0, 1.0, //
            ],
        );
        let y = vec![1.0, -1.0, 1.0, -1.0, 1.0, -1.0];
        (x, y, vec![0, 1, 1])
    }

    #[test]
    fn test_large_lambda_zeroes_everything() {
        let (x, y, groups) = toy();
        let fit = SparseGroupLasso::default()
            .fit(&x, &y, &groups, 1.0, 0.0, &[1.0, 1.0])
            .unwrap();
        assert!(fit.coefficients.iter().all(|&c| c == 0.0));
        assert_relative_eq!(fit.intercept, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_small_lambda_selects_signal_column() {
        let (x, y, groups) = toy();
        let fit = SparseGroupLasso::default()
            .fit(&x, &y, &groups, 0.1, 0.1, &[1.0, 1.0])
            .unwrap();
        assert!(fit.coefficients[0] > 0.5);
        assert!(fit.coefficients[0].abs() > fit.coefficients[1].abs());
        assert!(fit.coefficients[0].abs() > fit.coefficients[2].abs());
    }

    #[test]
    fn test_group_penalty_removes_noise_group() {
        let (x, y, groups) = toy();
        let fit = SparseGroupLasso::default()
            .fit(&x, &y, &groups, 0.05, 0.5, &[0.1, 10.0])
            .unwrap();
        assert_eq!(fit.coefficients[1], 0.0);
        assert_eq!(fit.coefficients[2], 0.0);
        assert!(fit.coefficients[0] > 0.0);
    }

    #[test]
    fn test_iteration_limit_reports_non_convergence() {
        let (x, y, groups) = toy();
        let solver = SparseGroupLasso::new(SglConfig {
            max_iterations: 1,
            tolerance: 0.0,
        });
        let err = solver.fit(&x, &y, &groups, 0.01, 0.01, &[1.0, 1.0]).unwrap_err();
        assert!(matches!(err, EslError::DidNotConverge(_)));
    }

    #[test]
    fn test_dimension_checks() {
        let (x, y, _) = toy();
        let solver = SparseGroupLasso::default();
        assert!(solver.fit(&x, &y[..3], &[0, 1, 1], 0.1, 0.1, &[1.0, 1.0]).is_err());
        assert!(solver.fit(&x, &y, &[0, 1], 0.1, 0.1, &[1.0, 1.0]).is_err());
        assert!(solver.fit(&x, &y, &[0, 1, 2], 0.1, 0.1, &[1.0, 1.0]).is_err());
    }
}
