//! Per-gene multiple-sequence alignments and the alignment store.

use crate::error::{EslError, Result};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// The gap character. Cancelled (masked) residues are also written as gaps.
pub const GAP: u8 = b'-';

/// File extensions recognised as alignment files.
pub const ALIGNMENT_EXTENSIONS: [&str; 3] = ["fas", "fasta", "fa"];

/// Returns true if the byte is a gap/missing residue.
#[inline]
pub fn is_gap(residue: u8) -> bool {
    residue == GAP
}

/// A single gene (component) alignment.
///
/// Rows are species in file order; every sequence has the same length.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alignment {
    gene: String,
    species: Vec<String>,
    sequences: Vec<Vec<u8>>,
    length: usize,
}

impl Alignment {
    /// Create an alignment from `(species, sequence)` records.
    ///
    /// Fails if two records share a species or if the sequences differ in length.
    pub fn new(gene: &str, records: Vec<(String, Vec<u8>)>) -> Result<Self> {
        let length = records.first().map(|(_, s)| s.len()).unwrap_or(0);
        let mut seen = HashSet::new();
        let mut species = Vec::with_capacity(records.len());
        let mut sequences = Vec::with_capacity(records.len());

        for (id, seq) in records {
            if !seen.insert(id.clone()) {
                return Err(EslError::MalformedAlignment {
                    gene: gene.to_string(),
                    reason: format!("duplicate species '{}'", id),
                });
            }
            if seq.len() != length {
                return Err(EslError::UnequalSequenceLength {
                    gene: gene.to_string(),
                    species: id,
                    expected: length,
                    actual: seq.len(),
                });
            }
            species.push(id);
            sequences.push(seq);
        }

        Ok(Self {
            gene: gene.to_string(),
            species,
            sequences,
            length,
        })
    }

    /// An alignment with no sites, used as a placeholder for fully cancelled genes.
    pub fn placeholder(gene: &str, species: &[String]) -> Self {
        Self {
            gene: gene.to_string(),
            species: species.to_vec(),
            sequences: vec![Vec::new(); species.len()],
            length: 0,
        }
    }

    /// Read an alignment from a FASTA file. The gene name is the file stem.
    ///
    /// Both 2-line and wrapped FASTA are accepted. Residues are upper-cased.
    pub fn from_fasta<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let gene = gene_name_from_path(path);
        let reader = BufReader::new(File::open(path)?);

        let mut records: Vec<(String, Vec<u8>)> = Vec::new();
        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(header) = line.strip_prefix('>') {
                let id = header.split_whitespace().next().unwrap_or("").to_string();
                if id.is_empty() {
                    return Err(EslError::MalformedAlignment {
                        gene,
                        reason: format!("empty record identifier on line {}", line_no + 1),
                    });
                }
                records.push((id, Vec::new()));
            } else {
                match records.last_mut() {
                    Some((_, seq)) => {
                        seq.extend(line.bytes().map(|b| b.to_ascii_uppercase()));
                    }
                    None => {
                        return Err(EslError::MalformedAlignment {
                            gene,
                            reason: format!(
                                "sequence data before first header on line {}",
                                line_no + 1
                            ),
                        });
                    }
                }
            }
        }

        if records.is_empty() {
            return Err(EslError::EmptyData(format!(
                "alignment file {:?} has no records",
                path
            )));
        }

        Self::new(&gene, records)
    }

    /// Write the alignment as 2-line FASTA.
    pub fn to_fasta<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        for (id, seq) in self.species.iter().zip(&self.sequences) {
            writeln!(writer, ">{}", id)?;
            writer.write_all(seq)?;
            writeln!(writer)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Gene (component) name.
    #[inline]
    pub fn gene(&self) -> &str {
        &self.gene
    }

    /// Number of sites (columns).
    #[inline]
    pub fn len(&self) -> usize {
        self.length
    }

    /// True if the alignment has no sites.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Number of species (rows).
    #[inline]
    pub fn n_species(&self) -> usize {
        self.species.len()
    }

    /// Species identifiers in row order.
    #[inline]
    pub fn species(&self) -> &[String] {
        &self.species
    }

    /// Row index of a species.
    pub fn species_index(&self, species: &str) -> Option<usize> {
        self.species.iter().position(|s| s == species)
    }

    /// Sequence for a species, if present.
    pub fn sequence(&self, species: &str) -> Option<&[u8]> {
        self.species_index(species).map(|i| self.sequences[i].as_slice())
    }

    /// Sequence by row index.
    #[inline]
    pub fn row(&self, index: usize) -> &[u8] {
        &self.sequences[index]
    }

    /// Per-site gap mask for a species (`true` = gap).
    pub fn gap_mask(&self, species: &str) -> Option<Vec<bool>> {
        self.sequence(species)
            .map(|seq| seq.iter().map(|&b| is_gap(b)).collect())
    }

    /// True if every residue of every row is a gap.
    pub fn is_all_gaps(&self) -> bool {
        self.sequences.iter().all(|s| s.iter().all(|&b| is_gap(b)))
    }

    /// Build a new alignment containing only the given species rows, in order.
    ///
    /// Species absent from this alignment are padded with all-gap sequences.
    /// Returns the sub-alignment and, per requested species, whether it was padded.
    pub fn select_species(&self, species: &[String]) -> (Alignment, Vec<bool>) {
        let mut padded = Vec::with_capacity(species.len());
        let sequences = species
            .iter()
            .map(|sp| match self.sequence(sp) {
                Some(seq) => {
                    padded.push(false);
                    seq.to_vec()
                }
                None => {
                    padded.push(true);
                    vec![GAP; self.length]
                }
            })
            .collect();
        (
            Alignment {
                gene: self.gene.clone(),
                species: species.to_vec(),
                sequences,
                length: self.length,
            },
            padded,
        )
    }

    /// Keep only the sites flagged `true`, in order.
    pub fn retain_sites(&self, keep: &[bool]) -> Alignment {
        let sequences: Vec<Vec<u8>> = self
            .sequences
            .iter()
            .map(|seq| {
                seq.iter()
                    .zip(keep)
                    .filter(|(_, &k)| k)
                    .map(|(&b, _)| b)
                    .collect()
            })
            .collect();
        let length = keep.iter().filter(|&&k| k).count();
        Alignment {
            gene: self.gene.clone(),
            species: self.species.clone(),
            sequences,
            length,
        }
    }

    /// Replace the sequences; lengths must be unchanged.
    pub(crate) fn with_sequences(&self, sequences: Vec<Vec<u8>>) -> Result<Alignment> {
        let records = self.species.iter().cloned().zip(sequences).collect();
        Alignment::new(&self.gene, records)
    }
}

/// Gene name for an alignment file path (its file stem).
pub fn gene_name_from_path(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// True if the path has a recognised alignment extension.
pub fn is_alignment_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| ALIGNMENT_EXTENSIONS.contains(&e))
        .unwrap_or(false)
}

/// An ordered collection of gene alignments.
///
/// Alignments are kept sorted by gene name so that column ordering in
/// downstream matrices is deterministic.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlignmentSet {
    alignments: Vec<Alignment>,
}

impl AlignmentSet {
    /// Create a set from alignments; sorts by gene name.
    pub fn new(mut alignments: Vec<Alignment>) -> Self {
        alignments.sort_by(|a, b| a.gene.cmp(&b.gene));
        Self { alignments }
    }

    /// Load every alignment file from a directory.
    ///
    /// Empty or unparseable files are skipped with a warning. Unequal sequence
    /// lengths are fatal. When `limited_genes` is given, only files whose name
    /// appears in it are loaded.
    pub fn from_dir<P: AsRef<Path>>(dir: P, limited_genes: Option<&HashSet<String>>) -> Result<Self> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(EslError::InvalidParameter(format!(
                "alignment directory {:?} does not exist or is not a directory",
                dir
            )));
        }

        let mut paths: Vec<_> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && is_alignment_file(p))
            .collect();
        paths.sort();

        let mut alignments = Vec::with_capacity(paths.len());
        for path in paths {
            if let Some(limit) = limited_genes {
                let file_name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                if !limit.contains(&file_name) && !limit.contains(&gene_name_from_path(&path)) {
                    continue;
                }
            }
            match Alignment::from_fasta(&path) {
                Ok(aln) => alignments.push(aln),
                Err(e @ EslError::UnequalSequenceLength { .. }) => return Err(e),
                Err(e) => warn!("Skipping alignment file {:?}: {}", path, e),
            }
        }

        if alignments.is_empty() {
            return Err(EslError::EmptyData(format!(
                "no alignment files found in {:?}",
                dir
            )));
        }
        debug!("Loaded {} alignments from {:?}", alignments.len(), dir);

        Ok(Self::new(alignments))
    }

    /// Write every alignment to `<dir>/<gene>.fas`, creating the directory.
    pub fn to_dir<P: AsRef<Path>>(&self, dir: P) -> Result<()> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        for aln in &self.alignments {
            aln.to_fasta(dir.join(format!("{}.fas", aln.gene)))?;
        }
        Ok(())
    }

    /// Number of alignments.
    #[inline]
    pub fn len(&self) -> usize {
        self.alignments.len()
    }

    /// True if the set has no alignments.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.alignments.is_empty()
    }

    /// Iterate over alignments in gene order.
    pub fn iter(&self) -> impl Iterator<Item = &Alignment> {
        self.alignments.iter()
    }

    /// Alignments as a slice.
    pub fn alignments(&self) -> &[Alignment] {
        &self.alignments
    }

    /// Look up an alignment by gene name.
    pub fn get(&self, gene: &str) -> Option<&Alignment> {
        self.alignments
            .binary_search_by(|a| a.gene.as_str().cmp(gene))
            .ok()
            .map(|i| &self.alignments[i])
    }

    /// Gene names in order.
    pub fn gene_names(&self) -> Vec<String> {
        self.alignments.iter().map(|a| a.gene.clone()).collect()
    }

    /// Every species appearing in at least one alignment.
    pub fn all_species(&self) -> BTreeSet<String> {
        self.alignments
            .iter()
            .flat_map(|a| a.species.iter().cloned())
            .collect()
    }

    /// Fail with [`EslError::UnknownSpecies`] if any species is in no alignment.
    pub fn check_species<'a, I>(&self, species: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let known = self.all_species();
        let missing: BTreeSet<&String> = species.into_iter().filter(|s| !known.contains(*s)).collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(EslError::UnknownSpecies(
                missing.into_iter().cloned().collect::<Vec<_>>().join(", "),
            ))
        }
    }
}

/// Read a limited-genes list: one file or gene name per line.
pub fn read_gene_list<P: AsRef<Path>>(path: P) -> Result<HashSet<String>> {
    let reader = BufReader::new(File::open(path)?);
    let mut genes = HashSet::new();
    for line in reader.lines() {
        let line = line?;
        let name = line.trim();
        if !name.is_empty() {
            genes.insert(name.to_string());
        }
    }
    Ok(genes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, content: &str) {
        std::fs::write(dir.join(name), content).unwrap();
    }

    #[test]
    fn test_parse_two_line_and_wrapped() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "geneA.fas", ">sp1\nACDE\n>sp2 desc\nAC\n-E\n");
        let aln = Alignment::from_fasta(dir.path().join("geneA.fas")).unwrap();

        assert_eq!(aln.gene(), "geneA");
        assert_eq!(aln.len(), 4);
        assert_eq!(aln.species(), &["sp1".to_string(), "sp2".to_string()]);
        assert_eq!(aln.sequence("sp2").unwrap(), b"AC-E");
        assert_eq!(aln.gap_mask("sp2").unwrap(), vec![false, false, true, false]);
    }

    #[test]
    fn test_unequal_lengths_rejected() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "bad.fas", ">a\nACD\n>b\nAC\n");
        let err = Alignment::from_fasta(dir.path().join("bad.fas")).unwrap_err();
        assert!(matches!(err, EslError::UnequalSequenceLength { .. }));

        // Also fatal when loading a directory
        assert!(AlignmentSet::from_dir(dir.path(), None).is_err());
    }

    #[test]
    fn test_from_dir_skips_empty_and_non_alignment_files() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "b.fas", ">a\nAC\n>b\nAD\n");
        write(dir.path(), "a.fas", ">a\nMM\n>c\nMK\n");
        write(dir.path(), "empty.fas", "");
        write(dir.path(), "notes.txt", "hello");

        let set = AlignmentSet::from_dir(dir.path(), None).unwrap();
        assert_eq!(set.gene_names(), vec!["a", "b"]);
        assert!(set.get("b").is_some());
        assert!(set.check_species(&["a".to_string(), "c".to_string()]).is_ok());
        assert!(matches!(
            set.check_species(&["zzz".to_string()]),
            Err(EslError::UnknownSpecies(_))
        ));
    }

    #[test]
    fn test_limited_genes() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a.fas", ">x\nAC\n");
        write(dir.path(), "b.fas", ">x\nAD\n");
        let limit: HashSet<String> = ["b.fas".to_string()].into_iter().collect();
        let set = AlignmentSet::from_dir(dir.path(), Some(&limit)).unwrap();
        assert_eq!(set.gene_names(), vec!["b"]);
    }

    #[test]
    fn test_select_species_pads_missing() {
        let aln = Alignment::new(
            "g",
            vec![("a".into(), b"AC".to_vec()), ("b".into(), b"AD".to_vec())],
        )
        .unwrap();
        let (sub, padded) = aln.select_species(&["b".to_string(), "z".to_string()]);
        assert_eq!(sub.row(0), b"AD");
        assert_eq!(sub.row(1), b"--");
        assert_eq!(padded, vec![false, true]);
    }

    #[test]
    fn test_round_trip_directory() {
        let dir = TempDir::new().unwrap();
        let aln = Alignment::new("g1", vec![("a".into(), b"A-C".to_vec())]).unwrap();
        AlignmentSet::new(vec![aln.clone()]).to_dir(dir.path()).unwrap();
        let back = AlignmentSet::from_dir(dir.path(), None).unwrap();
        assert_eq!(back.get("g1").unwrap(), &aln);
    }
}
