//! Per-gene group penalty schemes.
//!
//! The group penalty multiplies `lambda2` for each gene. It is a function of
//! the gene's retained site count `s` and, for every scheme but `std`, the
//! grid's current penalty constant `c`.

use crate::error::{EslError, Result};
use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, Median};
use std::fmt;
use std::str::FromStr;

/// How per-gene group penalties are computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupPenaltyType {
    /// `c * sqrt(s / median(s))`, median taken over genes with retained sites.
    #[default]
    Median,
    /// `c * sqrt(s)`.
    Sqrt,
    /// `s + c`.
    Linear,
    /// Solver-native `sqrt(s)`; the constant sweep is skipped.
    #[serde(alias = "use_default_gp", alias = "standard")]
    Std,
}

impl GroupPenaltyType {
    /// Canonical name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Median => "median",
            Self::Sqrt => "sqrt",
            Self::Linear => "linear",
            Self::Std => "std",
        }
    }

    /// True if grid points carry a penalty constant for this scheme.
    pub fn sweeps_constant(&self) -> bool {
        !matches!(self, Self::Std)
    }

    /// Compute one penalty weight per gene.
    ///
    /// # Arguments
    /// * `site_counts` - Retained site count per gene, in group order
    /// * `constant` - Penalty constant of the grid point; ignored by `std`
    ///
    /// Genes with no retained sites get weight 0; they own no columns.
    pub fn group_weights(&self, site_counts: &[usize], constant: Option<f64>) -> Result<Vec<f64>> {
        let c = match (self, constant) {
            (Self::Std, _) => 0.0,
            (_, Some(c)) if c.is_finite() && c >= 0.0 => c,
            (_, Some(c)) => {
                return Err(EslError::InvalidParameter(format!(
                    "group penalty constant must be finite and non-negative, got {}",
                    c
                )))
            }
            (_, None) => {
                return Err(EslError::InvalidParameter(format!(
                    "group penalty type '{}' needs a penalty constant",
                    self.name()
                )))
            }
        };

        let scale = match self {
            Self::Median => {
                let nonzero: Vec<f64> = site_counts
                    .iter()
                    .filter(|&&s| s > 0)
                    .map(|&s| s as f64)
                    .collect();
                if nonzero.is_empty() {
                    1.0
                } else {
                    Data::new(nonzero).median()
                }
            }
            _ => 1.0,
        };

        Ok(site_counts
            .iter()
            .map(|&s| {
                if s == 0 {
                    return 0.0;
                }
                let s = s as f64;
                match self {
                    Self::Median => c * (s / scale).sqrt(),
                    Self::Sqrt => c * s.sqrt(),
                    Self::Linear => s + c,
                    Self::Std => s.sqrt(),
                }
            })
            .collect())
    }
}

impl fmt::Display for GroupPenaltyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for GroupPenaltyType {
    type Err = EslError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "median" => Ok(Self::Median),
            "sqrt" => Ok(Self::Sqrt),
            "linear" => Ok(Self::Linear),
            "std" | "standard" | "use_default_gp" => Ok(Self::Std),
            other => Err(EslError::InvalidParameter(format!(
                "unknown group penalty type '{}' (expected median, sqrt, linear or std)",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_median_scales_by_shared_factor() {
        let w = GroupPenaltyType::Median
            .group_weights(&[4, 16, 0, 9], Some(2.0))
            .unwrap();
        // median of {4, 9, 16} is 9
        assert_relative_eq!(w[0], 2.0 * (4.0f64 / 9.0).sqrt());
        assert_relative_eq!(w[1], 2.0 * (16.0f64 / 9.0).sqrt());
        assert_eq!(w[2], 0.0);
        assert_relative_eq!(w[3], 2.0);
    }

    #[test]
    fn test_sqrt_linear_std() {
        let counts = [4, 9];
        assert_eq!(
            GroupPenaltyType::Sqrt.group_weights(&counts, Some(3.0)).unwrap(),
            vec![6.0, 9.0]
        );
        assert_eq!(
            GroupPenaltyType::Linear.group_weights(&counts, Some(1.0)).unwrap(),
            vec![5.0, 10.0]
        );
        assert_eq!(
            GroupPenaltyType::Std.group_weights(&counts, None).unwrap(),
            vec![2.0, 3.0]
        );
    }

    #[test]
    fn test_missing_constant_is_rejected() {
        assert!(GroupPenaltyType::Sqrt.group_weights(&[1], None).is_err());
        assert!(GroupPenaltyType::Linear.group_weights(&[1], Some(-1.0)).is_err());
    }

    #[test]
    fn test_parse_aliases() {
        assert_eq!("use_default_gp".parse::<GroupPenaltyType>().unwrap(), GroupPenaltyType::Std);
        assert_eq!("Median".parse::<GroupPenaltyType>().unwrap(), GroupPenaltyType::Median);
        assert!("cubic".parse::<GroupPenaltyType>().is_err());
        assert!(!GroupPenaltyType::Std.sweeps_constant());
    }
}
