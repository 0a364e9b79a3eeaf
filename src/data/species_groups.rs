//! Species group definitions and their expansion into concrete combinations.
//!
//! A species groups file has one line per group of interchangeable species.
//! Lines alternate convergent / control, so lines `2k` and `2k + 1` (0-based)
//! form the k-th contrast pair. Every combination picks exactly one species
//! per line; the set of combinations is the Cartesian product over lines.

use crate::error::{EslError, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Response label of a species within a combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Label {
    /// Convergent phenotype (+1).
    Convergent,
    /// Control phenotype (-1).
    Control,
}

impl Label {
    /// Label for a 0-based line/row position: even = convergent, odd = control.
    #[inline]
    pub fn for_position(index: usize) -> Self {
        if index % 2 == 0 {
            Self::Convergent
        } else {
            Self::Control
        }
    }

    /// Numeric response value.
    #[inline]
    pub fn value(&self) -> f64 {
        match self {
            Self::Convergent => 1.0,
            Self::Control => -1.0,
        }
    }

    /// Parse `1` / `-1`.
    pub fn from_value(value: &str) -> Option<Self> {
        match value.trim() {
            "1" | "+1" | "1.0" => Some(Self::Convergent),
            "-1" | "-1.0" => Some(Self::Control),
            _ => None,
        }
    }

    /// The opposite label.
    #[inline]
    pub fn flipped(&self) -> Self {
        match self {
            Self::Convergent => Self::Control,
            Self::Control => Self::Convergent,
        }
    }
}

/// How a combination is identified in output and on disk.
///
/// Chosen once at expansion time: combinations with many species get a short
/// symbolic name so identifiers stay bounded in length.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CombinationIdentity {
    /// Named by its species, joined with `-`.
    ExplicitList(Vec<String>),
    /// Named `combo_<index>`.
    SymbolicName(usize),
}

impl CombinationIdentity {
    /// Display name.
    pub fn name(&self) -> String {
        match self {
            Self::ExplicitList(species) => species.join("-"),
            Self::SymbolicName(index) => format!("combo_{}", index),
        }
    }
}

/// One concrete species combination: exactly one species per group line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeciesCombination {
    index: usize,
    identity: CombinationIdentity,
    species: Vec<String>,
    labels: Vec<Label>,
}

impl SpeciesCombination {
    /// Create a combination from species in pair order (convergent, control, ...).
    pub fn new(index: usize, identity: CombinationIdentity, species: Vec<String>) -> Result<Self> {
        if species.is_empty() || species.len() % 2 != 0 {
            return Err(EslError::SpeciesGroups(format!(
                "a combination needs an even, non-zero number of species; got {}",
                species.len()
            )));
        }
        let labels = (0..species.len()).map(Label::for_position).collect();
        Ok(Self {
            index,
            identity,
            species,
            labels,
        })
    }

    /// Create a combination with explicit labels (used by response files and null models).
    pub fn with_labels(
        index: usize,
        identity: CombinationIdentity,
        species: Vec<String>,
        labels: Vec<Label>,
    ) -> Result<Self> {
        if species.len() != labels.len() {
            return Err(EslError::SpeciesGroups(format!(
                "{} species but {} labels",
                species.len(),
                labels.len()
            )));
        }
        if species.is_empty() || species.len() % 2 != 0 {
            return Err(EslError::SpeciesGroups(format!(
                "a combination needs an even, non-zero number of species; got {}",
                species.len()
            )));
        }
        Ok(Self {
            index,
            identity,
            species,
            labels,
        })
    }

    /// Position of this combination in expansion order (0-based).
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Identity used for naming.
    #[inline]
    pub fn identity(&self) -> &CombinationIdentity {
        &self.identity
    }

    /// Name used in output rows and directory names.
    pub fn name(&self) -> String {
        self.identity.name()
    }

    /// Species in row order.
    #[inline]
    pub fn species(&self) -> &[String] {
        &self.species
    }

    /// Labels in row order.
    #[inline]
    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    /// Number of species.
    #[inline]
    pub fn len(&self) -> usize {
        self.species.len()
    }

    /// Always false for a valid combination.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.species.is_empty()
    }

    /// Number of contrast pairs.
    #[inline]
    pub fn n_pairs(&self) -> usize {
        self.species.len() / 2
    }

    /// Row indices of the k-th contrast pair.
    #[inline]
    pub fn pair(&self, k: usize) -> (usize, usize) {
        (2 * k, 2 * k + 1)
    }

    /// Response vector (+1 / -1) in row order.
    pub fn responses(&self) -> Vec<f64> {
        self.labels.iter().map(Label::value).collect()
    }

    /// Species labeled as control.
    pub fn controls(&self) -> impl Iterator<Item = &String> {
        self.species
            .iter()
            .zip(&self.labels)
            .filter(|(_, l)| **l == Label::Control)
            .map(|(s, _)| s)
    }
}

/// A validated species groups definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Vec<String>>", into = "Vec<Vec<String>>")]
pub struct SpeciesGroups {
    lines: Vec<Vec<String>>,
}

impl TryFrom<Vec<Vec<String>>> for SpeciesGroups {
    type Error = EslError;

    fn try_from(lines: Vec<Vec<String>>) -> Result<Self> {
        Self::new(lines)
    }
}

impl From<SpeciesGroups> for Vec<Vec<String>> {
    fn from(groups: SpeciesGroups) -> Self {
        groups.lines
    }
}

impl SpeciesGroups {
    /// Build from group lines; requires an even number of non-empty lines.
    pub fn new(lines: Vec<Vec<String>>) -> Result<Self> {
        if lines.is_empty() {
            return Err(EslError::SpeciesGroups("species groups are empty".to_string()));
        }
        if lines.len() % 2 != 0 {
            return Err(EslError::SpeciesGroups(format!(
                "species groups must have an even number of lines for pairwise comparisons; found {}",
                lines.len()
            )));
        }
        for (i, line) in lines.iter().enumerate() {
            if line.is_empty() || line.iter().any(|s| s.is_empty()) {
                return Err(EslError::SpeciesGroups(format!(
                    "line {} has an empty species name (check for extra or trailing commas)",
                    i + 1
                )));
            }
        }
        if lines
            .iter()
            .try_fold(1usize, |acc, l| acc.checked_mul(l.len()))
            .is_none()
        {
            return Err(EslError::InvalidParameter(format!(
                "{} group lines expand to more combinations than can be enumerated",
                lines.len()
            )));
        }
        Ok(Self { lines })
    }

    /// Parse comma-separated species, one group per line. Blank lines are ignored.
    pub fn parse(text: &str) -> Result<Self> {
        let lines = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(|l| l.split(',').map(|s| s.trim().to_string()).collect())
            .collect();
        Self::new(lines)
    }

    /// Read a species groups file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Group lines.
    #[inline]
    pub fn lines(&self) -> &[Vec<String>] {
        &self.lines
    }

    /// Number of contrast pairs per combination.
    #[inline]
    pub fn n_pairs(&self) -> usize {
        self.lines.len() / 2
    }

    /// Number of combinations (product of line sizes).
    ///
    /// Construction rejects groups whose product overflows.
    pub fn n_combinations(&self) -> usize {
        self.lines.iter().map(Vec::len).product()
    }

    /// Every species named in any group line.
    pub fn all_species(&self) -> impl Iterator<Item = &String> {
        self.lines.iter().flatten()
    }

    /// Lazily expand into combinations, in deterministic product order
    /// (the last line varies fastest).
    ///
    /// Combinations of more than `explicit_name_limit` species are given a
    /// [`CombinationIdentity::SymbolicName`]; smaller ones are named by
    /// their species, unless there is more than one combination, in which
    /// case symbolic names keep directory names unique and short.
    pub fn combinations(&self, explicit_name_limit: usize) -> Combinations<'_> {
        let total = self.n_combinations();
        let symbolic = total > 1 || self.lines.len() > explicit_name_limit;
        Combinations {
            groups: self,
            next: 0,
            total,
            symbolic,
        }
    }
}

/// Lazy iterator over the combinations of a [`SpeciesGroups`].
#[derive(Debug, Clone)]
pub struct Combinations<'a> {
    groups: &'a SpeciesGroups,
    next: usize,
    total: usize,
    symbolic: bool,
}

impl<'a> Combinations<'a> {
    fn decode(&self, mut index: usize) -> Vec<String> {
        let lines = &self.groups.lines;
        let mut picks = vec![0usize; lines.len()];
        for (slot, line) in picks.iter_mut().zip(lines).rev() {
            *slot = index % line.len();
            index /= line.len();
        }
        picks
            .iter()
            .zip(lines)
            .map(|(&p, line)| line[p].clone())
            .collect()
    }
}

impl<'a> Iterator for Combinations<'a> {
    type Item = SpeciesCombination;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.total {
            return None;
        }
        let index = self.next;
        self.next += 1;
        let species = self.decode(index);
        let identity = if self.symbolic {
            CombinationIdentity::SymbolicName(index)
        } else {
            CombinationIdentity::ExplicitList(species.clone())
        };
        let labels = (0..species.len()).map(Label::for_position).collect();
        Some(SpeciesCombination {
            index,
            identity,
            species,
            labels,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.total - self.next;
        (remaining, Some(remaining))
    }
}

impl<'a> ExactSizeIterator for Combinations<'a> {}

/// Read a response file: one `species label` pair per line (tab, comma or
/// space separated). Labels must alternate 1, -1, 1, -1, ...
pub fn read_response_file<P: AsRef<Path>>(path: P, index: usize) -> Result<SpeciesCombination> {
    let path = path.as_ref();
    let reader = BufReader::new(File::open(path)?);
    let mut species = Vec::new();
    let mut labels = Vec::new();

    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut fields = line
            .split(|c: char| c == '\t' || c == ',' || c.is_whitespace())
            .filter(|f| !f.is_empty());
        let (name, value) = match (fields.next(), fields.next()) {
            (Some(n), Some(v)) => (n, v),
            _ => {
                return Err(EslError::SpeciesGroups(format!(
                    "{:?} line {}: expected 'species label'",
                    path,
                    line_no + 1
                )))
            }
        };
        let label = Label::from_value(value).ok_or_else(|| {
            EslError::SpeciesGroups(format!(
                "{:?} line {}: label must be 1 or -1, got '{}'",
                path,
                line_no + 1,
                value
            ))
        })?;
        if label != Label::for_position(species.len()) {
            return Err(EslError::SpeciesGroups(format!(
                "{:?} line {}: response values must alternate 1, -1, 1, -1",
                path,
                line_no + 1
            )));
        }
        species.push(name.to_string());
        labels.push(label);
    }

    SpeciesCombination::with_labels(index, CombinationIdentity::SymbolicName(index), species, labels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_parse_rejects_odd_line_count() {
        let err = SpeciesGroups::parse("a,b\nc\nd\n").unwrap_err();
        assert!(matches!(err, EslError::SpeciesGroups(_)));
    }

    #[test]
    fn test_parse_rejects_trailing_comma() {
        assert!(SpeciesGroups::parse("a,\nc\n").is_err());
        assert!(SpeciesGroups::parse("").is_err());
    }

    #[test]
    fn test_product_count_and_unique_names() {
        let groups = SpeciesGroups::parse("a1,a2\nb1,b2,b3\nc1\nd1,d2\n").unwrap();
        assert_eq!(groups.n_combinations(), 12);

        let combos: Vec<_> = groups.combinations(8).collect();
        assert_eq!(combos.len(), 12);
        let names: HashSet<String> = combos.iter().map(|c| c.name()).collect();
        assert_eq!(names.len(), 12);

        // Deterministic product order, last line fastest
        assert_eq!(combos[0].species(), &["a1", "b1", "c1", "d1"]);
        assert_eq!(combos[1].species(), &["a1", "b1", "c1", "d2"]);
        assert_eq!(combos[11].species(), &["a2", "b3", "c1", "d2"]);
        assert_eq!(combos[3].name(), "combo_3");

        // Re-expansion is identical
        let again: Vec<_> = groups.combinations(8).collect();
        assert_eq!(combos, again);
    }

    #[test]
    fn test_single_combination_is_explicit() {
        // Two lines of one species each: exactly one combination A(+1) / C(-1)
        let groups = SpeciesGroups::new(vec![vec!["A".into()], vec!["C".into()]]).unwrap();
        let combos: Vec<_> = groups.combinations(8).collect();
        assert_eq!(combos.len(), 1);
        assert_eq!(combos[0].species(), &["A", "C"]);
        assert_eq!(combos[0].responses(), vec![1.0, -1.0]);
        assert_eq!(
            combos[0].identity(),
            &CombinationIdentity::ExplicitList(vec!["A".into(), "C".into()])
        );
        assert_eq!(combos[0].name(), "A-C");
    }

    #[test]
    fn test_large_combination_gets_symbolic_name() {
        let lines: Vec<Vec<String>> = (0..10).map(|i| vec![format!("sp{}", i)]).collect();
        let groups = SpeciesGroups::new(lines).unwrap();
        let combo = groups.combinations(4).next().unwrap();
        assert_eq!(combo.identity(), &CombinationIdentity::SymbolicName(0));
        assert_eq!(combo.n_pairs(), 5);
    }

    #[test]
    fn test_combination_count_overflow_rejected() {
        let lines: Vec<Vec<String>> = (0..64)
            .map(|i| vec![format!("a{}", i), format!("b{}", i)])
            .collect();
        assert!(matches!(
            SpeciesGroups::new(lines),
            Err(EslError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_read_response_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("combo_0.txt");
        std::fs::write(&path, "sp1\t1\nsp2\t-1\nsp3 1\nsp4,-1\n").unwrap();
        let combo = read_response_file(&path, 0).unwrap();
        assert_eq!(combo.species(), &["sp1", "sp2", "sp3", "sp4"]);
        assert_eq!(combo.controls().cloned().collect::<Vec<_>>(), vec!["sp2", "sp4"]);

        std::fs::write(&path, "sp1\t1\nsp2\t1\n").unwrap();
        assert!(read_response_file(&path, 0).is_err());
    }
}
