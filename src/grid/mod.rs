//! Hyperparameter grids and the sparse model grid runner.
//!
//! A grid point is a `(lambda1, lambda2, penalty constant)` triple. Lambda
//! values come from either a linear-step range or a log-spaced range per
//! lambda, combined as a Cartesian product; the penalty constant sweeps
//! independently unless the group penalty type is `std`.

mod runner;

pub use runner::{fit_point, run_grid, CancelToken};

use crate::error::{EslError, Result};
use crate::model::GroupPenaltyType;
use serde::{Deserialize, Serialize};

/// Slack when deciding whether a stepped range reaches its end point.
const RANGE_EPS: f64 = 1e-9;

/// One point of the hyperparameter grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridPoint {
    /// Site-level sparsity weight.
    pub lambda1: f64,
    /// Group-level sparsity weight.
    pub lambda2: f64,
    /// Group penalty constant; `None` when the solver-native penalty is used.
    pub penalty: Option<f64>,
}

impl GridPoint {
    /// Create a grid point.
    pub fn new(lambda1: f64, lambda2: f64, penalty: Option<f64>) -> Self {
        Self {
            lambda1,
            lambda2,
            penalty,
        }
    }

    /// Penalty constant as written to output tables (`NA` when absent).
    pub fn penalty_label(&self) -> String {
        match self.penalty {
            Some(p) => p.to_string(),
            None => "NA".to_string(),
        }
    }
}

/// Grid construction parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    pub initial_lambda1: f64,
    pub final_lambda1: f64,
    pub initial_lambda2: f64,
    pub final_lambda2: f64,
    /// Linear step for lambda1.
    pub lambda_step: f64,
    /// Linear step for lambda2.
    pub lambda2_step: f64,
    /// Use log-spaced lambdas instead of linear steps.
    pub use_logspace: bool,
    /// Number of log-spaced values per lambda.
    pub num_log_points: usize,
    /// Group penalty scheme.
    pub group_penalty_type: GroupPenaltyType,
    pub initial_gp_value: f64,
    pub final_gp_value: f64,
    pub gp_step: f64,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            initial_lambda1: 0.01,
            final_lambda1: 0.99,
            initial_lambda2: 0.01,
            final_lambda2: 0.99,
            lambda_step: 0.1,
            lambda2_step: 0.1,
            use_logspace: false,
            num_log_points: 20,
            group_penalty_type: GroupPenaltyType::Median,
            initial_gp_value: 1.0,
            final_gp_value: 6.0,
            gp_step: 1.0,
        }
    }
}

impl GridConfig {
    /// A small grid for fast testing: 2 x 2 lambdas, one penalty constant.
    pub fn quick() -> Self {
        Self {
            initial_lambda1: 0.1,
            final_lambda1: 0.3,
            initial_lambda2: 0.1,
            final_lambda2: 0.3,
            lambda_step: 0.2,
            lambda2_step: 0.2,
            initial_gp_value: 1.0,
            final_gp_value: 1.0,
            ..Default::default()
        }
    }

    /// Set the lambda1 range.
    pub fn with_lambda1(mut self, initial: f64, final_value: f64) -> Self {
        self.initial_lambda1 = initial;
        self.final_lambda1 = final_value;
        self
    }

    /// Set the lambda2 range.
    pub fn with_lambda2(mut self, initial: f64, final_value: f64) -> Self {
        self.initial_lambda2 = initial;
        self.final_lambda2 = final_value;
        self
    }

    /// Set the group penalty scheme.
    pub fn with_penalty_type(mut self, penalty: GroupPenaltyType) -> Self {
        self.group_penalty_type = penalty;
        self
    }

    /// Check ranges and steps.
    pub fn validate(&self) -> Result<()> {
        for (name, lo, hi) in [
            ("lambda1", self.initial_lambda1, self.final_lambda1),
            ("lambda2", self.initial_lambda2, self.final_lambda2),
        ] {
            if !(lo.is_finite() && hi.is_finite()) || lo < 0.0 || lo > hi {
                return Err(EslError::InvalidParameter(format!(
                    "{} range [{}, {}] must be non-negative and ascending",
                    name, lo, hi
                )));
            }
            if self.use_logspace && lo <= 0.0 {
                return Err(EslError::InvalidParameter(format!(
                    "log-spaced {} range must start above 0, got {}",
                    name, lo
                )));
            }
        }
        if self.use_logspace {
            if self.num_log_points == 0 {
                return Err(EslError::InvalidParameter(
                    "num_log_points must be at least 1".to_string(),
                ));
            }
        } else if self.lambda_step <= 0.0 || self.lambda2_step <= 0.0 {
            return Err(EslError::InvalidParameter(format!(
                "lambda steps must be positive, got {} and {}",
                self.lambda_step, self.lambda2_step
            )));
        }
        if self.group_penalty_type.sweeps_constant() {
            if self.gp_step <= 0.0 {
                return Err(EslError::InvalidParameter(format!(
                    "gp_step must be positive, got {}",
                    self.gp_step
                )));
            }
            if self.initial_gp_value < 0.0 || self.initial_gp_value > self.final_gp_value {
                return Err(EslError::InvalidParameter(format!(
                    "group penalty range [{}, {}] must be non-negative and ascending",
                    self.initial_gp_value, self.final_gp_value
                )));
            }
        }
        Ok(())
    }

    /// Lambda1 values of the grid.
    pub fn lambda1_values(&self) -> Vec<f64> {
        if self.use_logspace {
            log_range(self.initial_lambda1, self.final_lambda1, self.num_log_points)
        } else {
            step_range(self.initial_lambda1, self.final_lambda1, self.lambda_step)
        }
    }

    /// Lambda2 values of the grid.
    pub fn lambda2_values(&self) -> Vec<f64> {
        if self.use_logspace {
            log_range(self.initial_lambda2, self.final_lambda2, self.num_log_points)
        } else {
            step_range(self.initial_lambda2, self.final_lambda2, self.lambda2_step)
        }
    }

    /// Penalty constants of the grid; `[None]` for `std`.
    pub fn penalty_values(&self) -> Vec<Option<f64>> {
        if self.group_penalty_type.sweeps_constant() {
            step_range(self.initial_gp_value, self.final_gp_value, self.gp_step)
                .into_iter()
                .map(Some)
                .collect()
        } else {
            vec![None]
        }
    }

    /// Every grid point, penalty constant outermost and lambda2 fastest.
    pub fn points(&self) -> Result<Vec<GridPoint>> {
        self.validate()?;
        let l1 = self.lambda1_values();
        let l2 = self.lambda2_values();
        let mut grid = Vec::with_capacity(l1.len() * l2.len());
        for penalty in self.penalty_values() {
            for &lambda1 in &l1 {
                for &lambda2 in &l2 {
                    grid.push(GridPoint::new(lambda1, lambda2, penalty));
                }
            }
        }
        Ok(grid)
    }
}

/// `start, start + step, ...` up to and including `end`.
fn step_range(start: f64, end: f64, step: f64) -> Vec<f64> {
    let n = ((end - start) / step + RANGE_EPS).floor() as usize + 1;
    (0..n).map(|i| round_grid(start + i as f64 * step)).collect()
}

/// `n` values log-spaced between `start` and `end` inclusive.
fn log_range(start: f64, end: f64, n: usize) -> Vec<f64> {
    if n == 1 {
        return vec![start];
    }
    let (a, b) = (start.ln(), end.ln());
    (0..n)
        .map(|i| (a + (b - a) * i as f64 / (n - 1) as f64).exp())
        .collect()
}

/// Strip accumulated floating-point noise so labels print cleanly.
fn round_grid(v: f64) -> f64 {
    (v * 1e10).round() / 1e10
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_default_linear_grid() {
        let config = GridConfig::default();
        let l1 = config.lambda1_values();
        assert_eq!(l1.len(), 10);
        assert_eq!(l1[0], 0.01);
        assert_eq!(l1[9], 0.91);
        // 10 x 10 lambdas, 6 penalty constants
        assert_eq!(config.points().unwrap().len(), 600);
    }

    #[test]
    fn test_std_skips_penalty_sweep() {
        let config = GridConfig::quick().with_penalty_type(GroupPenaltyType::Std);
        let points = config.points().unwrap();
        assert_eq!(points.len(), 4);
        assert!(points.iter().all(|p| p.penalty.is_none()));
        assert_eq!(points[0].penalty_label(), "NA");
    }

    #[test]
    fn test_logspace() {
        let config = GridConfig {
            use_logspace: true,
            num_log_points: 3,
            initial_lambda1: 0.01,
            final_lambda1: 1.0,
            ..GridConfig::quick()
        };
        let l1 = config.lambda1_values();
        assert_eq!(l1.len(), 3);
        assert_relative_eq!(l1[0], 0.01, epsilon = 1e-12);
        assert_relative_eq!(l1[1], 0.1, epsilon = 1e-12);
        assert_relative_eq!(l1[2], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_point_order() {
        let points = GridConfig::quick().points().unwrap();
        let pairs: Vec<(f64, f64)> = points.iter().map(|p| (p.lambda1, p.lambda2)).collect();
        assert_eq!(pairs, vec![(0.1, 0.1), (0.1, 0.3), (0.3, 0.1), (0.3, 0.3)]);
        assert_eq!(points[0].penalty, Some(1.0));
    }

    #[test]
    fn test_invalid_ranges() {
        assert!(GridConfig::default().with_lambda1(0.5, 0.1).points().is_err());
        let log_zero = GridConfig {
            use_logspace: true,
            ..GridConfig::default().with_lambda2(0.0, 0.5)
        };
        assert!(log_zero.points().is_err());
        let bad_step = GridConfig {
            gp_step: 0.0,
            ..GridConfig::default()
        };
        assert!(bad_step.points().is_err());
    }
}
