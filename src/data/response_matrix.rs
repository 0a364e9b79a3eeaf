//! Response matrix construction from cleaned alignments.
//!
//! Rows are the species of a combination with their +1 / -1 responses.
//! Columns are one-of-k encodings of the residues observed at each variable
//! retained site: a column is 1.0 where the species carries that residue and
//! 0.0 otherwise. Gaps and masked residues are zero in every column, so they
//! contribute nothing to fitting or scoring.

use crate::cancel::CleanedAlignmentSet;
use crate::data::alignment::{is_gap, AlignmentSet};
use crate::data::species_groups::SpeciesCombination;
use crate::error::{EslError, Result};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::ops::Range;

/// Metadata for one design-matrix column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    /// Index of the owning gene in [`ResponseMatrix::genes`].
    pub gene: usize,
    /// 0-based site index within the cleaned alignment.
    pub site: usize,
    /// 1-based site position in the source alignment.
    pub position: usize,
    /// Residue this column encodes.
    pub residue: u8,
}

/// Metadata for one gene (group).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneInfo {
    /// Gene name.
    pub name: String,
    /// Number of retained sites after cancellation.
    pub n_sites: usize,
    /// Column range owned by this gene (may be empty).
    pub columns: Range<usize>,
}

/// Numeric design matrix with responses and group tags for one combination.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseMatrix {
    combination: String,
    species: Vec<String>,
    responses: Vec<f64>,
    x: DMatrix<f64>,
    columns: Vec<ColumnInfo>,
    genes: Vec<GeneInfo>,
    prediction_species: Vec<String>,
    prediction_x: DMatrix<f64>,
}

impl ResponseMatrix {
    /// Build the response matrix for a combination from its cleaned alignments.
    ///
    /// When `prediction` alignments are given, every species in them that
    /// is not part of the combination is encoded as a prediction-only row,
    /// reading residues at the source positions of each column.
    ///
    /// # Errors
    /// [`EslError::EmptyData`] if no retained site is variable.
    pub fn build(
        cleaned: &CleanedAlignmentSet,
        combo: &SpeciesCombination,
        prediction: Option<&AlignmentSet>,
    ) -> Result<Self> {
        let n_rows = combo.len();
        let mut columns: Vec<ColumnInfo> = Vec::new();
        let mut genes: Vec<GeneInfo> = Vec::with_capacity(cleaned.len());

        for (gene_idx, ca) in cleaned.alignments.iter().enumerate() {
            let aln = &ca.alignment;
            if ca.is_retained() && aln.n_species() != n_rows {
                return Err(EslError::Invariant(format!(
                    "cleaned alignment '{}' has {} rows but combination {} has {} species",
                    aln.gene(),
                    aln.n_species(),
                    combo.name(),
                    n_rows
                )));
            }
            let start = columns.len();
            if ca.is_retained() {
                for site in 0..aln.len() {
                    let residues: BTreeSet<u8> = (0..n_rows)
                        .map(|r| aln.row(r)[site])
                        .filter(|&b| !is_gap(b))
                        .collect();
                    if residues.len() < 2 {
                        continue;
                    }
                    let position = ca.source_sites[site] + 1;
                    columns.extend(residues.into_iter().map(|residue| ColumnInfo {
                        gene: gene_idx,
                        site,
                        position,
                        residue,
                    }));
                }
            }
            genes.push(GeneInfo {
                name: aln.gene().to_string(),
                n_sites: if ca.is_retained() { aln.len() } else { 0 },
                columns: start..columns.len(),
            });
        }

        if columns.is_empty() {
            return Err(EslError::EmptyData(format!(
                "combination {} has no variable sites after cancellation",
                combo.name()
            )));
        }

        let x = DMatrix::from_fn(n_rows, columns.len(), |r, j| {
            let col = &columns[j];
            let aln = &cleaned.alignments[col.gene].alignment;
            if aln.row(r)[col.site] == col.residue {
                1.0
            } else {
                0.0
            }
        });

        let (prediction_species, prediction_x) = match prediction {
            Some(pred) => encode_prediction_rows(pred, combo, &columns, &genes),
            None => (Vec::new(), DMatrix::zeros(0, columns.len())),
        };

        Ok(Self {
            combination: combo.name(),
            species: combo.species().to_vec(),
            responses: combo.responses(),
            x,
            columns,
            genes,
            prediction_species,
            prediction_x,
        })
    }

    /// Copy of this matrix with a different response vector but identical columns.
    pub fn with_responses(&self, combination: &str, responses: Vec<f64>) -> Result<Self> {
        if responses.len() != self.species.len() {
            return Err(EslError::InvalidParameter(format!(
                "expected {} responses, got {}",
                self.species.len(),
                responses.len()
            )));
        }
        Ok(Self {
            combination: combination.to_string(),
            responses,
            ..self.clone()
        })
    }

    /// Name of the combination (or null variant) this matrix belongs to.
    #[inline]
    pub fn combination(&self) -> &str {
        &self.combination
    }

    /// Training species in row order.
    #[inline]
    pub fn species(&self) -> &[String] {
        &self.species
    }

    /// Response values in row order.
    #[inline]
    pub fn responses(&self) -> &[f64] {
        &self.responses
    }

    /// Training design matrix (species x columns).
    #[inline]
    pub fn x(&self) -> &DMatrix<f64> {
        &self.x
    }

    /// Prediction-only species.
    #[inline]
    pub fn prediction_species(&self) -> &[String] {
        &self.prediction_species
    }

    /// Design matrix rows for prediction-only species.
    #[inline]
    pub fn prediction_x(&self) -> &DMatrix<f64> {
        &self.prediction_x
    }

    /// Column metadata.
    #[inline]
    pub fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }

    /// Gene metadata in group order.
    #[inline]
    pub fn genes(&self) -> &[GeneInfo] {
        &self.genes
    }

    /// Number of columns.
    #[inline]
    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }

    /// Number of genes, including fully cancelled placeholders.
    #[inline]
    pub fn n_genes(&self) -> usize {
        self.genes.len()
    }

    /// Group (gene index) of every column.
    pub fn column_groups(&self) -> Vec<usize> {
        self.columns.iter().map(|c| c.gene).collect()
    }

    /// Retained site count of every gene.
    pub fn gene_site_counts(&self) -> Vec<usize> {
        self.genes.iter().map(|g| g.n_sites).collect()
    }

    /// Decode a column index into `(gene name, 1-based position)`.
    ///
    /// # Errors
    /// [`EslError::Invariant`] if the column is outside the mapping.
    pub fn site_of(&self, column: usize) -> Result<(&str, usize)> {
        let col = self.columns.get(column).ok_or_else(|| {
            EslError::Invariant(format!(
                "column {} outside the {} known columns of {}",
                column,
                self.columns.len(),
                self.combination
            ))
        })?;
        Ok((self.genes[col.gene].name.as_str(), col.position))
    }
}

fn encode_prediction_rows(
    pred: &AlignmentSet,
    combo: &SpeciesCombination,
    columns: &[ColumnInfo],
    genes: &[GeneInfo],
) -> (Vec<String>, DMatrix<f64>) {
    let training: HashSet<&String> = combo.species().iter().collect();
    let species: Vec<String> = pred
        .all_species()
        .into_iter()
        .filter(|s| !training.contains(s))
        .collect();

    let gene_alignments: Vec<_> = genes.iter().map(|g| pred.get(&g.name)).collect();
    let x = DMatrix::from_fn(species.len(), columns.len(), |r, j| {
        let col = &columns[j];
        let residue = gene_alignments[col.gene]
            .and_then(|aln| aln.sequence(&species[r]))
            .and_then(|seq| seq.get(col.position - 1).copied());
        match residue {
            Some(b) if b == col.residue => 1.0,
            _ => 0.0,
        }
    });
    (species, x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::{cancel_combination, CancelPolicy};
    use crate::data::alignment::Alignment;
    use crate::data::species_groups::SpeciesGroups;

    fn aln(gene: &str, rows: &[(&str, &str)]) -> Alignment {
        Alignment::new(
            gene,
            rows.iter()
                .map(|(s, q)| (s.to_string(), q.as_bytes().to_vec()))
                .collect(),
        )
        .unwrap()
    }

    fn fixture() -> (AlignmentSet, SpeciesCombination) {
        let set = AlignmentSet::new(vec![
            aln("g1", &[("a", "MKV"), ("b", "MRV"), ("c", "MKI"), ("d", "MRI")]),
            aln("g2", &[("a", "AA"), ("b", "AA"), ("c", "AA"), ("d", "AA")]),
            aln("g3", &[("a", "-W"), ("b", "DW"), ("c", "EW"), ("d", "DF")]),
        ]);
        let groups = SpeciesGroups::parse("a\nb\nc\nd\n").unwrap();
        let combo = groups.combinations(8).next().unwrap();
        (set, combo)
    }

    #[test]
    fn test_columns_and_groups() {
        let (set, combo) = fixture();
        let policy = CancelPolicy {
            min_pairs: 1,
            ..Default::default()
        };
        let cleaned = cancel_combination(&set, &combo, &policy).unwrap();
        let m = ResponseMatrix::build(&cleaned, &combo, None).unwrap();

        assert_eq!(m.responses(), &[1.0, -1.0, 1.0, -1.0]);
        assert_eq!(m.n_genes(), 3);
        // g1: site 2 (K/R) and site 3 (V/I) -> 4 columns; g2 invariant -> none
        assert_eq!(m.genes()[0].columns, 0..4);
        assert!(m.genes()[1].columns.is_empty());
        assert_eq!(m.genes()[1].n_sites, 2);
        assert_eq!(m.site_of(0).unwrap(), ("g1", 2));
        assert_eq!(m.columns()[0].residue, b'K');

        // Species 'a' has K at g1 position 2
        assert_eq!(m.x()[(0, 0)], 1.0);
        assert_eq!(m.x()[(0, 1)], 0.0);

        // Every column belongs to exactly one gene
        let groups = m.column_groups();
        for (g, info) in m.genes().iter().enumerate() {
            for j in info.columns.clone() {
                assert_eq!(groups[j], g);
            }
        }
        assert!(matches!(m.site_of(99), Err(EslError::Invariant(_))));
    }

    #[test]
    fn test_gap_encodes_as_zero() {
        let (set, combo) = fixture();
        let policy = CancelPolicy {
            min_pairs: 1,
            ..Default::default()
        };
        let cleaned = cancel_combination(&set, &combo, &policy).unwrap();
        let m = ResponseMatrix::build(&cleaned, &combo, None).unwrap();
        let g3 = &m.genes()[2];
        // site 1 of g3 has a gap for 'a': row sums to zero across that site's columns
        let site_cols: Vec<usize> = g3
            .columns
            .clone()
            .filter(|&j| m.columns()[j].position == 1)
            .collect();
        assert!(!site_cols.is_empty());
        let total: f64 = site_cols.iter().map(|&j| m.x()[(0, j)]).sum();
        assert_eq!(total, 0.0);
    }

    #[test]
    fn test_build_is_deterministic() {
        let (set, combo) = fixture();
        let policy = CancelPolicy {
            min_pairs: 1,
            ..Default::default()
        };
        let cleaned = cancel_combination(&set, &combo, &policy).unwrap();
        let m1 = ResponseMatrix::build(&cleaned, &combo, Some(&set)).unwrap();
        let m2 = ResponseMatrix::build(&cleaned, &combo, Some(&set)).unwrap();
        assert_eq!(m1, m2);
        assert_eq!(m1.x().as_slice(), m2.x().as_slice());
    }

    #[test]
    fn test_prediction_rows() {
        let (set, combo) = fixture();
        let pred = AlignmentSet::new(vec![aln("g1", &[("a", "MKV"), ("e", "MRV")])]);
        let policy = CancelPolicy {
            min_pairs: 1,
            ..Default::default()
        };
        let cleaned = cancel_combination(&set, &combo, &policy).unwrap();
        let m = ResponseMatrix::build(&cleaned, &combo, Some(&pred)).unwrap();
        assert_eq!(m.prediction_species(), &["e"]);
        // 'e' has R at position 2 and V at position 3
        let row: Vec<f64> = (0..4).map(|j| m.prediction_x()[(0, j)]).collect();
        assert_eq!(row, vec![0.0, 1.0, 0.0, 1.0]);
    }

    #[test]
    fn test_with_responses_keeps_columns() {
        let (set, combo) = fixture();
        let policy = CancelPolicy {
            min_pairs: 1,
            ..Default::default()
        };
        let cleaned = cancel_combination(&set, &combo, &policy).unwrap();
        let m = ResponseMatrix::build(&cleaned, &combo, None).unwrap();
        let flipped = m
            .with_responses("null_0", vec![-1.0, 1.0, 1.0, -1.0])
            .unwrap();
        assert_eq!(flipped.columns(), m.columns());
        assert_eq!(flipped.combination(), "null_0");
        assert!(m.with_responses("x", vec![1.0]).is_err());
    }
}
