//! Gap (deletion) cancellation for species combinations.
//!
//! For every alignment and species combination, sites that violate the gap
//! tolerance policy are removed, and gapped contrast pairs can optionally be
//! masked instead. Genes whose every site is removed are either kept as empty
//! placeholders or omitted entirely.
//!
//! # Algorithm
//!
//! For each site, a contrast pair is "gapped" if either member has a gap.
//!
//! 1. `cancel_only_partner = false`: if fewer than `min_pairs` pairs are
//!    ungapped, the whole site is removed.
//! 2. `cancel_only_partner = true`: if fewer than `min_pairs` pairs are
//!    ungapped the site is removed; otherwise both members of every gapped
//!    pair are masked at that site.
//! 3. Surviving sites may additionally be removed by the outgroup-mismatch
//!    and tri-allelic rules.

use crate::data::alignment::{is_gap, Alignment, AlignmentSet, GAP};
use crate::data::species_groups::SpeciesCombination;
use crate::error::{EslError, Result};
use log::{debug, info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Gap tolerance policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CancelPolicy {
    /// Mask only the gapped pair at a site instead of removing the site.
    pub cancel_only_partner: bool,
    /// Minimum number of ungapped pairs a site needs to survive.
    pub min_pairs: usize,
    /// Omit fully cancelled genes instead of keeping empty placeholders.
    pub nix_full_deletions: bool,
    /// Remove sites where a control species differs from this outgroup.
    pub outgroup_species: Option<String>,
    /// Remove sites with exactly 3 distinct residues (4-species combinations only).
    pub cancel_tri_allelic: bool,
    /// Pad combination species missing from an alignment with gaps
    /// instead of reporting a data error.
    pub pad_missing_species: bool,
}

impl Default for CancelPolicy {
    fn default() -> Self {
        Self {
            cancel_only_partner: false,
            min_pairs: 2,
            nix_full_deletions: false,
            outgroup_species: None,
            cancel_tri_allelic: false,
            pad_missing_species: false,
        }
    }
}

/// What happened to one gene under cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancelOutcome {
    /// At least one site survived.
    Retained {
        /// Sites removed entirely.
        sites_removed: usize,
        /// Residues masked by partner cancellation.
        residues_masked: usize,
    },
    /// Every site was removed; kept as an empty placeholder.
    Placeholder,
    /// Every site was removed and the gene was dropped.
    Omitted,
}

/// A gene alignment after cancellation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanedAlignment {
    /// Rows are the combination species, in combination order.
    pub alignment: Alignment,
    /// 0-based position in the source alignment of each retained site.
    pub source_sites: Vec<usize>,
    /// Number of sites in the source alignment.
    pub source_len: usize,
    /// Outcome for this gene.
    pub outcome: CancelOutcome,
}

impl CleanedAlignment {
    /// Recover a cleaned alignment from its source-width form.
    ///
    /// Sites that are gaps in every row are the cancelled ones; the rest map
    /// back onto their source positions.
    pub fn from_source_width(alignment: Alignment) -> Self {
        let source_len = alignment.len();
        let keep: Vec<bool> = (0..source_len)
            .map(|site| (0..alignment.n_species()).any(|r| !is_gap(alignment.row(r)[site])))
            .collect();
        let source_sites: Vec<usize> = keep
            .iter()
            .enumerate()
            .filter(|(_, &k)| k)
            .map(|(i, _)| i)
            .collect();
        if source_sites.is_empty() {
            return Self {
                alignment: Alignment::placeholder(alignment.gene(), alignment.species()),
                source_sites,
                source_len,
                outcome: CancelOutcome::Placeholder,
            };
        }
        let sites_removed = source_len - source_sites.len();
        Self {
            alignment: alignment.retain_sites(&keep),
            source_sites,
            source_len,
            outcome: CancelOutcome::Retained {
                sites_removed,
                residues_masked: 0,
            },
        }
    }

    /// The alignment at source width, with every cancelled site written as
    /// gaps, so positions survive a write and re-read.
    pub fn to_source_width(&self) -> Result<Alignment> {
        let rows = (0..self.alignment.n_species())
            .map(|r| {
                let mut full = vec![GAP; self.source_len];
                for (&b, &site) in self.alignment.row(r).iter().zip(&self.source_sites) {
                    full[site] = b;
                }
                (self.alignment.species()[r].clone(), full)
            })
            .collect();
        Alignment::new(self.alignment.gene(), rows)
    }

    /// Gene name.
    pub fn gene(&self) -> &str {
        self.alignment.gene()
    }

    /// True if this gene has sites to model.
    pub fn is_retained(&self) -> bool {
        matches!(self.outcome, CancelOutcome::Retained { .. })
    }
}

/// Cancel gaps in one alignment for one combination.
///
/// # Errors
/// [`EslError::MissingSpecies`] if a combination species is not in the
/// alignment and the policy does not pad missing species.
pub fn cancel_alignment(
    aln: &Alignment,
    combo: &SpeciesCombination,
    policy: &CancelPolicy,
) -> Result<CleanedAlignment> {
    let (selected, padded) = aln.select_species(combo.species());
    if !policy.pad_missing_species {
        if let Some(pos) = padded.iter().position(|&p| p) {
            return Err(EslError::MissingSpecies {
                gene: aln.gene().to_string(),
                species: combo.species()[pos].clone(),
            });
        }
    }

    let outgroup = policy
        .outgroup_species
        .as_deref()
        .and_then(|sp| aln.sequence(sp));
    let control_rows: Vec<usize> = (0..combo.n_pairs()).map(|k| combo.pair(k).1).collect();

    let n_pairs = combo.n_pairs();
    let n_sites = selected.len();
    let mut rows: Vec<Vec<u8>> = (0..selected.n_species())
        .map(|i| selected.row(i).to_vec())
        .collect();
    let mut keep = vec![true; n_sites];
    let mut residues_masked = 0usize;

    for site in 0..n_sites {
        let gapped: Vec<usize> = (0..n_pairs)
            .filter(|&k| {
                let (a, b) = combo.pair(k);
                is_gap(rows[a][site]) || is_gap(rows[b][site])
            })
            .collect();
        let ungapped = n_pairs - gapped.len();

        if ungapped < policy.min_pairs {
            keep[site] = false;
            continue;
        }

        if policy.cancel_only_partner {
            for &k in &gapped {
                let (a, b) = combo.pair(k);
                for row in [a, b] {
                    if !is_gap(rows[row][site]) {
                        residues_masked += 1;
                    }
                    rows[row][site] = GAP;
                }
            }
        }

        // an all-gap site counts as removed
        if rows.iter().all(|r| is_gap(r[site])) {
            keep[site] = false;
            continue;
        }

        if gapped.is_empty() {
            if let Some(out) = outgroup {
                let reference = out[site];
                if !is_gap(reference) && control_rows.iter().any(|&r| rows[r][site] != reference) {
                    keep[site] = false;
                    continue;
                }
            }
        }

        if policy.cancel_tri_allelic && combo.len() == 4 {
            // a gap counts as one of the values
            let distinct: HashSet<u8> = rows
                .iter()
                .map(|r| if is_gap(r[site]) { GAP } else { r[site] })
                .collect();
            if distinct.len() == 3 {
                keep[site] = false;
            }
        }
    }

    let masked = selected.with_sequences(rows)?;
    let cleaned = masked.retain_sites(&keep);
    let source_sites: Vec<usize> = keep
        .iter()
        .enumerate()
        .filter(|(_, &k)| k)
        .map(|(i, _)| i)
        .collect();
    let sites_removed = n_sites - source_sites.len();

    if cleaned.is_empty() || cleaned.is_all_gaps() {
        let outcome = if policy.nix_full_deletions {
            CancelOutcome::Omitted
        } else {
            CancelOutcome::Placeholder
        };
        debug!("Gene {} fully cancelled for {}", aln.gene(), combo.name());
        return Ok(CleanedAlignment {
            alignment: Alignment::placeholder(aln.gene(), combo.species()),
            source_sites: Vec::new(),
            source_len: n_sites,
            outcome,
        });
    }

    Ok(CleanedAlignment {
        alignment: cleaned,
        source_sites,
        source_len: n_sites,
        outcome: CancelOutcome::Retained {
            sites_removed,
            residues_masked,
        },
    })
}

/// The cleaned alignments of one combination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanedAlignmentSet {
    /// Name of the combination these alignments belong to.
    pub combination: String,
    /// Kept genes (retained and placeholders), in gene order.
    pub alignments: Vec<CleanedAlignment>,
    /// Genes dropped under `nix_full_deletions`.
    pub omitted: Vec<String>,
}

impl CleanedAlignmentSet {
    /// Number of genes whose every site was removed.
    pub fn n_fully_cancelled(&self) -> usize {
        self.omitted.len()
            + self
                .alignments
                .iter()
                .filter(|a| a.outcome == CancelOutcome::Placeholder)
                .count()
    }

    /// Genes with at least one modelled site.
    pub fn retained(&self) -> impl Iterator<Item = &CleanedAlignment> {
        self.alignments.iter().filter(|a| a.is_retained())
    }

    /// Number of genes kept in the set (retained and placeholders).
    pub fn len(&self) -> usize {
        self.alignments.len()
    }

    /// True if no genes were kept.
    pub fn is_empty(&self) -> bool {
        self.alignments.is_empty()
    }

    /// Write the kept alignments as `<dir>/<gene>.fas` at source width.
    pub fn to_dir<P: AsRef<Path>>(&self, dir: P) -> Result<()> {
        let full = self
            .alignments
            .iter()
            .map(CleanedAlignment::to_source_width)
            .collect::<Result<Vec<_>>>()?;
        AlignmentSet::new(full).to_dir(dir)
    }

    /// Reuse previously written cleaned alignments for a combination.
    ///
    /// Rows are reordered to the combination's species order.
    ///
    /// # Errors
    /// [`EslError::MissingSpecies`] if a file lacks a combination species,
    /// or [`EslError::EmptyData`] if no gene keeps a single site.
    pub fn from_dir<P: AsRef<Path>>(dir: P, combo: &SpeciesCombination) -> Result<Self> {
        let set = AlignmentSet::from_dir(dir, None)?;
        let mut alignments = Vec::with_capacity(set.len());
        for aln in set.iter() {
            let (ordered, padded) = aln.select_species(combo.species());
            if let Some(pos) = padded.iter().position(|&p| p) {
                return Err(EslError::MissingSpecies {
                    gene: aln.gene().to_string(),
                    species: combo.species()[pos].clone(),
                });
            }
            alignments.push(CleanedAlignment::from_source_width(ordered));
        }
        let result = Self {
            combination: combo.name(),
            alignments,
            omitted: Vec::new(),
        };
        result.ensure_retained(combo)?;
        Ok(result)
    }

    fn ensure_retained(&self, combo: &SpeciesCombination) -> Result<()> {
        if self.retained().next().is_none() {
            return Err(EslError::EmptyData(format!(
                "for species combination {} ({}) every alignment is entirely gaps after cancellation; \
                 species may be missing from most alignments or min_pairs is never met",
                combo.name(),
                combo.species().join(" ")
            )));
        }
        Ok(())
    }
}

/// Cancel every alignment of the store for one combination.
///
/// # Errors
/// Any per-alignment data error, or [`EslError::EmptyData`] if no gene
/// keeps a single site for this combination.
pub fn cancel_combination(
    alignments: &AlignmentSet,
    combo: &SpeciesCombination,
    policy: &CancelPolicy,
) -> Result<CleanedAlignmentSet> {
    let cleaned: Vec<CleanedAlignment> = alignments
        .alignments()
        .par_iter()
        .map(|aln| cancel_alignment(aln, combo, policy))
        .collect::<Result<_>>()?;

    let mut kept = Vec::with_capacity(cleaned.len());
    let mut omitted = Vec::new();
    for c in cleaned {
        if c.outcome == CancelOutcome::Omitted {
            omitted.push(c.gene().to_string());
        } else {
            kept.push(c);
        }
    }

    let result = CleanedAlignmentSet {
        combination: combo.name(),
        alignments: kept,
        omitted,
    };

    result.ensure_retained(combo)?;

    let n_full = result.n_fully_cancelled();
    if n_full > 0 {
        warn!("{}: {} genes fully cancelled", combo.name(), n_full);
    }
    info!(
        "{}: {} of {} genes retained after gap cancellation",
        combo.name(),
        result.retained().count(),
        alignments.len()
    );

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::species_groups::{CombinationIdentity, SpeciesCombination};

    fn combo(species: &[&str]) -> SpeciesCombination {
        SpeciesCombination::new(
            0,
            CombinationIdentity::SymbolicName(0),
            species.iter().map(|s| s.to_string()).collect(),
        )
        .unwrap()
    }

    fn aln(gene: &str, rows: &[(&str, &str)]) -> Alignment {
        Alignment::new(
            gene,
            rows.iter()
                .map(|(s, q)| (s.to_string(), q.as_bytes().to_vec()))
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_no_gaps_all_sites_retained() {
        let a = aln("g", &[("A", "MKV"), ("C", "MRV")]);
        let policy = CancelPolicy {
            min_pairs: 1,
            ..Default::default()
        };
        let c = cancel_alignment(&a, &combo(&["A", "C"]), &policy).unwrap();
        assert_eq!(c.alignment.len(), 3);
        assert_eq!(c.source_sites, vec![0, 1, 2]);
        assert!(c.is_retained());
    }

    #[test]
    fn test_min_pairs_zero_never_removes_ungapped_site() {
        let a = aln("g", &[("a", "A-CD"), ("b", "AACD"), ("c", "--CD"), ("d", "AAC-")]);
        let policy = CancelPolicy {
            min_pairs: 0,
            ..Default::default()
        };
        let c = cancel_alignment(&a, &combo(&["a", "b", "c", "d"]), &policy).unwrap();
        // min_pairs = 0 removes nothing at all
        assert_eq!(c.source_sites, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_site_removed_below_min_pairs() {
        // site 1: pair (a,b) gapped, pair (c,d) gapped -> 0 ungapped
        // site 3: pair (c,d) gapped -> 1 ungapped
        let a = aln("g", &[("a", "A-CD"), ("b", "AACD"), ("c", "A-CD"), ("d", "AAC-")]);
        let policy = CancelPolicy {
            min_pairs: 2,
            ..Default::default()
        };
        let c = cancel_alignment(&a, &combo(&["a", "b", "c", "d"]), &policy).unwrap();
        assert_eq!(c.source_sites, vec![0, 2]);
        assert_eq!(
            c.outcome,
            CancelOutcome::Retained {
                sites_removed: 2,
                residues_masked: 0
            }
        );
    }

    #[test]
    fn test_cancel_only_partner_masks_pair() {
        let a = aln("g", &[("a", "AC"), ("b", "AC"), ("c", "-C"), ("d", "KC")]);
        let policy = CancelPolicy {
            cancel_only_partner: true,
            min_pairs: 1,
            ..Default::default()
        };
        let c = cancel_alignment(&a, &combo(&["a", "b", "c", "d"]), &policy).unwrap();
        assert_eq!(c.alignment.len(), 2);
        assert_eq!(c.alignment.row(2), b"-C");
        // Partner 'd' is masked at site 0
        assert_eq!(c.alignment.row(3), b"-C");
        assert_eq!(
            c.outcome,
            CancelOutcome::Retained {
                sites_removed: 0,
                residues_masked: 1
            }
        );
    }

    #[test]
    fn test_cancel_only_partner_removes_site_below_min_pairs() {
        let a = aln("g", &[("a", "AC"), ("b", "-C"), ("c", "-C"), ("d", "KC")]);
        let policy = CancelPolicy {
            cancel_only_partner: true,
            min_pairs: 1,
            ..Default::default()
        };
        let c = cancel_alignment(&a, &combo(&["a", "b", "c", "d"]), &policy).unwrap();
        assert_eq!(c.source_sites, vec![1]);
    }

    #[test]
    fn test_fully_cancelled_placeholder_and_omit() {
        let a = aln("g", &[("a", "A-"), ("b", "-A")]);
        let keep = CancelPolicy {
            min_pairs: 1,
            ..Default::default()
        };
        let c = cancel_alignment(&a, &combo(&["a", "b"]), &keep).unwrap();
        assert_eq!(c.outcome, CancelOutcome::Placeholder);
        assert_eq!(c.alignment.len(), 0);
        assert_eq!(c.alignment.n_species(), 2);

        let nix = CancelPolicy {
            min_pairs: 1,
            nix_full_deletions: true,
            ..Default::default()
        };
        let c = cancel_alignment(&a, &combo(&["a", "b"]), &nix).unwrap();
        assert_eq!(c.outcome, CancelOutcome::Omitted);
    }

    #[test]
    fn test_missing_species_is_error_unless_padded() {
        let a = aln("g", &[("a", "AC")]);
        let err = cancel_alignment(&a, &combo(&["a", "z"]), &CancelPolicy::default()).unwrap_err();
        assert!(matches!(err, EslError::MissingSpecies { .. }));

        let pad = CancelPolicy {
            min_pairs: 1,
            pad_missing_species: true,
            ..Default::default()
        };
        let c = cancel_alignment(&a, &combo(&["a", "z"]), &pad).unwrap();
        assert_eq!(c.outcome, CancelOutcome::Placeholder);
    }

    #[test]
    fn test_outgroup_mismatch_removes_site() {
        let a = aln("g", &[("a", "AK"), ("b", "AR"), ("out", "AK")]);
        let policy = CancelPolicy {
            min_pairs: 1,
            outgroup_species: Some("out".into()),
            ..Default::default()
        };
        let c = cancel_alignment(&a, &combo(&["a", "b"]), &policy).unwrap();
        assert_eq!(c.source_sites, vec![0]);
    }

    #[test]
    fn test_tri_allelic_site_removed() {
        let a = aln("g", &[("a", "AK"), ("b", "CK"), ("c", "DK"), ("d", "AR")]);
        let policy = CancelPolicy {
            min_pairs: 1,
            cancel_tri_allelic: true,
            ..Default::default()
        };
        let c = cancel_alignment(&a, &combo(&["a", "b", "c", "d"]), &policy).unwrap();
        assert_eq!(c.source_sites, vec![1]);
    }

    #[test]
    fn test_tri_allelic_counts_masked_gaps() {
        // site 0: pair (c,d) is masked, leaving A, C and a gap
        let a = aln("g", &[("a", "AK"), ("b", "CK"), ("c", "-K"), ("d", "AR")]);
        let policy = CancelPolicy {
            min_pairs: 1,
            cancel_only_partner: true,
            cancel_tri_allelic: true,
            ..Default::default()
        };
        let c = cancel_alignment(&a, &combo(&["a", "b", "c", "d"]), &policy).unwrap();
        assert_eq!(c.source_sites, vec![1]);
    }

    #[test]
    fn test_cancel_combination_all_gaps_is_fatal() {
        let set = AlignmentSet::new(vec![aln("g1", &[("a", "-A"), ("b", "A-")])]);
        let policy = CancelPolicy {
            min_pairs: 1,
            ..Default::default()
        };
        assert!(matches!(
            cancel_combination(&set, &combo(&["a", "b"]), &policy),
            Err(EslError::EmptyData(_))
        ));
    }

    #[test]
    fn test_cancel_combination_counts_and_reuse() {
        let set = AlignmentSet::new(vec![
            aln("g1", &[("a", "MA"), ("b", "MK")]),
            aln("g2", &[("a", "-A"), ("b", "A-")]),
        ]);
        let policy = CancelPolicy {
            min_pairs: 1,
            ..Default::default()
        };
        let c = combo(&["a", "b"]);
        let cleaned = cancel_combination(&set, &c, &policy).unwrap();
        assert_eq!(cleaned.len(), 2);
        assert_eq!(cleaned.n_fully_cancelled(), 1);
        assert_eq!(cleaned.retained().count(), 1);

        let dir = tempfile::TempDir::new().unwrap();
        cleaned.to_dir(dir.path()).unwrap();
        let reused = CleanedAlignmentSet::from_dir(dir.path(), &c).unwrap();
        assert_eq!(reused.retained().count(), 1);
        assert_eq!(reused.alignments[0].alignment, cleaned.alignments[0].alignment);
    }

    #[test]
    fn test_reuse_keeps_source_positions() {
        let set = AlignmentSet::new(vec![
            aln("g1", &[("a", "-MKV"), ("b", "MMRV"), ("c", "MMKI"), ("d", "MMRI")]),
            aln("g2", &[("a", "M-"), ("b", "-M"), ("c", "MM"), ("d", "MM")]),
        ]);
        let c = combo(&["a", "b", "c", "d"]);
        let cleaned = cancel_combination(&set, &c, &CancelPolicy::default()).unwrap();
        assert_eq!(cleaned.alignments[0].source_sites, vec![1, 2, 3]);
        assert_eq!(cleaned.alignments[1].outcome, CancelOutcome::Placeholder);

        let dir = tempfile::TempDir::new().unwrap();
        cleaned.to_dir(dir.path()).unwrap();
        let written = Alignment::from_fasta(dir.path().join("g1.fas")).unwrap();
        assert_eq!(written.len(), 4);
        assert_eq!(written.row(0), b"-MKV");
        assert_eq!(written.row(1), b"-MRV");

        let reused = CleanedAlignmentSet::from_dir(dir.path(), &c).unwrap();
        assert_eq!(reused.alignments[0].source_sites, vec![1, 2, 3]);
        assert_eq!(reused.alignments[0].source_len, 4);
        assert_eq!(reused.alignments[0].alignment, cleaned.alignments[0].alignment);
        assert_eq!(reused.alignments[1].outcome, CancelOutcome::Placeholder);
        assert_eq!(reused.n_fully_cancelled(), cleaned.n_fully_cancelled());
    }
}
