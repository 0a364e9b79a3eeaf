//! Null model generation.
//!
//! Two null families calibrate real results:
//!
//! - **Response flip**: for a combination of `2k` contrast pairs, every way
//!   of choosing `k` pairs whose convergent/control labels are swapped.
//!   Each variant leaves exactly `k` pairs with the convergent member
//!   labelled +1 and `k` with it labelled -1.
//! - **Pair randomized**: the labels stay fixed, and at every variable site
//!   each pair's two residues are swapped on an independent coin flip.

use crate::cancel::{CleanedAlignment, CleanedAlignmentSet};
use crate::data::alignment::is_gap;
use crate::data::{Label, SpeciesCombination};
use crate::error::{EslError, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Relabelling of a combination's species for one response-flip null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlipVariant {
    /// Variant name, `<combination>_flip_<i>`.
    pub name: String,
    /// Indices of the pairs whose labels were swapped.
    pub flipped_pairs: Vec<usize>,
    /// Labels in combination row order.
    pub labels: Vec<Label>,
}

impl FlipVariant {
    /// Numeric responses in combination row order.
    pub fn responses(&self) -> Vec<f64> {
        self.labels.iter().map(Label::value).collect()
    }
}

/// All `k`-element subsets of `0..n` in lexicographic order.
fn subsets(n: usize, k: usize) -> Vec<Vec<usize>> {
    let mut out = Vec::new();
    let mut current: Vec<usize> = (0..k).collect();
    if k > n {
        return out;
    }
    loop {
        out.push(current.clone());
        // rightmost position that can still advance
        let Some(i) = (0..k).rev().find(|&i| current[i] < n - k + i) else {
            return out;
        };
        current[i] += 1;
        for j in i + 1..k {
            current[j] = current[j - 1] + 1;
        }
    }
}

/// Every balanced response flip of a combination.
///
/// # Errors
/// [`EslError::InvalidParameter`] if the combination has an odd number of
/// contrast pairs.
pub fn response_flip_variants(combo: &SpeciesCombination) -> Result<Vec<FlipVariant>> {
    let n_pairs = combo.n_pairs();
    if n_pairs % 2 != 0 {
        return Err(EslError::InvalidParameter(format!(
            "response-flip nulls need an even number of contrast pairs; {} has {}",
            combo.name(),
            n_pairs
        )));
    }
    let name = combo.name();
    Ok(subsets(n_pairs, n_pairs / 2)
        .into_iter()
        .enumerate()
        .map(|(i, flipped)| {
            let mut labels = combo.labels().to_vec();
            for &k in &flipped {
                let (a, b) = combo.pair(k);
                labels[a] = labels[a].flipped();
                labels[b] = labels[b].flipped();
            }
            FlipVariant {
                name: format!("{}_flip_{}", name, i),
                flipped_pairs: flipped,
                labels,
            }
        })
        .collect())
}

/// Name of the `i`-th pair-randomized null of a combination.
pub fn pair_randomized_name(combo: &SpeciesCombination, i: usize) -> String {
    format!("{}_pair_randomized_{}", combo.name(), i)
}

/// Randomize a combination's cleaned alignments within contrast pairs.
///
/// At every site with at least two distinct non-gap residues among the
/// combination species, each pair's residues are swapped with probability 1/2.
/// Placeholders are returned unchanged.
pub fn pair_randomized<R: Rng + ?Sized>(
    cleaned: &CleanedAlignmentSet,
    combo: &SpeciesCombination,
    name: &str,
    rng: &mut R,
) -> Result<CleanedAlignmentSet> {
    let mut alignments = Vec::with_capacity(cleaned.len());
    for ca in &cleaned.alignments {
        if !ca.is_retained() {
            alignments.push(ca.clone());
            continue;
        }
        let aln = &ca.alignment;
        if aln.n_species() != combo.len() {
            return Err(EslError::Invariant(format!(
                "cleaned alignment '{}' has {} rows for {} combination species",
                aln.gene(),
                aln.n_species(),
                combo.len()
            )));
        }
        let mut rows: Vec<Vec<u8>> = (0..aln.n_species()).map(|r| aln.row(r).to_vec()).collect();
        for site in 0..aln.len() {
            let distinct: BTreeSet<u8> = rows
                .iter()
                .map(|r| r[site])
                .filter(|&b| !is_gap(b))
                .collect();
            if distinct.len() < 2 {
                continue;
            }
            for k in 0..combo.n_pairs() {
                if rng.random_bool(0.5) {
                    let (a, b) = combo.pair(k);
                    let tmp = rows[a][site];
                    rows[a][site] = rows[b][site];
                    rows[b][site] = tmp;
                }
            }
        }
        alignments.push(CleanedAlignment {
            alignment: aln.with_sequences(rows)?,
            source_sites: ca.source_sites.clone(),
            source_len: ca.source_len,
            outcome: ca.outcome,
        });
    }
    Ok(CleanedAlignmentSet {
        combination: name.to_string(),
        alignments,
        omitted: cleaned.omitted.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::{cancel_combination, CancelPolicy};
    use crate::data::{Alignment, AlignmentSet, SpeciesGroups};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn combo(n_lines: usize) -> SpeciesCombination {
        let text: String = (0..n_lines).map(|i| format!("s{}\n", i)).collect();
        SpeciesGroups::parse(&text)
            .unwrap()
            .combinations(100)
            .next()
            .unwrap()
    }

    #[test]
    fn test_subsets() {
        assert_eq!(subsets(4, 2).len(), 6);
        assert_eq!(subsets(4, 2)[0], vec![0, 1]);
        assert_eq!(subsets(4, 2)[5], vec![2, 3]);
        assert_eq!(subsets(2, 0), vec![Vec::<usize>::new()]);
    }

    #[test]
    fn test_flips_are_balanced() {
        // 4 pairs -> C(4, 2) = 6 variants
        let c = combo(8);
        let variants = response_flip_variants(&c).unwrap();
        assert_eq!(variants.len(), 6);
        for v in &variants {
            let positive_convergent = (0..c.n_pairs())
                .filter(|&k| v.labels[c.pair(k).0] == Label::Convergent)
                .count();
            assert_eq!(positive_convergent, 2);
            // every pair keeps one +1 and one -1
            for k in 0..c.n_pairs() {
                let (a, b) = c.pair(k);
                assert_ne!(v.labels[a], v.labels[b]);
            }
            assert_eq!(v.responses().iter().sum::<f64>(), 0.0);
        }
        let names: BTreeSet<&str> = variants.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names.len(), 6);
    }

    #[test]
    fn test_odd_pair_count_rejected() {
        assert!(response_flip_variants(&combo(6)).is_err());
    }

    #[test]
    fn test_pair_randomization_swaps_within_pairs_only() {
        let c = combo(4);
        let set = AlignmentSet::new(vec![Alignment::new(
            "g1",
            vec![
                ("s0".into(), b"MKVAAAAAAA".to_vec()),
                ("s1".into(), b"MRLCCCCCCC".to_vec()),
                ("s2".into(), b"MKIDDDDDDD".to_vec()),
                ("s3".into(), b"MRFEEEEEEE".to_vec()),
            ],
        )
        .unwrap()]);
        let cleaned = cancel_combination(&set, &c, &CancelPolicy::default()).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        let randomized = pair_randomized(&cleaned, &c, "null_0", &mut rng).unwrap();
        assert_eq!(randomized.combination, "null_0");

        let before = &cleaned.alignments[0].alignment;
        let after = &randomized.alignments[0].alignment;
        let mut swapped = 0;
        for site in 0..before.len() {
            // the invariant first column never moves
            if site == 0 {
                assert_eq!(after.row(0)[0], b'M');
            }
            for k in 0..c.n_pairs() {
                let (a, b) = c.pair(k);
                let pair_before: BTreeSet<u8> = [before.row(a)[site], before.row(b)[site]].into();
                let pair_after: BTreeSet<u8> = [after.row(a)[site], after.row(b)[site]].into();
                assert_eq!(pair_before, pair_after);
                if after.row(a)[site] != before.row(a)[site] {
                    swapped += 1;
                }
            }
        }
        // 9 variable sites x 2 pairs: some but not all swapped
        assert!(swapped > 0 && swapped < 18);
    }

    #[test]
    fn test_pair_randomization_is_seeded() {
        let c = combo(4);
        let set = AlignmentSet::new(vec![Alignment::new(
            "g1",
            vec![
                ("s0".into(), b"KKKKKKKK".to_vec()),
                ("s1".into(), b"RRRRRRRR".to_vec()),
                ("s2".into(), b"KKKKKKKK".to_vec()),
                ("s3".into(), b"RRRRRRRR".to_vec()),
            ],
        )
        .unwrap()]);
        let cleaned = cancel_combination(&set, &c, &CancelPolicy::default()).unwrap();
        let a = pair_randomized(&cleaned, &c, "n", &mut StdRng::seed_from_u64(1)).unwrap();
        let b = pair_randomized(&cleaned, &c, "n", &mut StdRng::seed_from_u64(1)).unwrap();
        assert_eq!(a.alignments[0].alignment, b.alignments[0].alignment);
    }
}
