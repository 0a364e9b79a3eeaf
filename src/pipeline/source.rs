//! Where a run's species combinations come from.
//!
//! A [`ResponseMatrixSource`] supplies the labelled species combinations
//! whose response matrices are built from the alignment store. The source
//! is chosen by configuration: expand a species groups file, or read a
//! directory of previously written response files.

use crate::data::alignment::AlignmentSet;
use crate::data::{read_response_file, SpeciesCombination, SpeciesGroups};
use crate::error::{EslError, Result};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Supplier of labelled species combinations.
pub trait ResponseMatrixSource: Send + Sync {
    /// Short description for log messages.
    fn describe(&self) -> String;

    /// Number of combinations.
    fn n_combinations(&self) -> usize;

    /// Combinations in deterministic order.
    fn combinations(&self) -> Box<dyn Iterator<Item = SpeciesCombination> + '_>;

    /// Every species any combination can use.
    fn species(&self) -> BTreeSet<String>;

    /// Check that every species exists somewhere in the alignment store.
    fn validate(&self, alignments: &AlignmentSet) -> Result<()> {
        alignments.check_species(self.species().iter())
    }
}

/// Combinations expanded from a species groups file.
#[derive(Debug, Clone)]
pub struct SpeciesGroupsSource {
    groups: SpeciesGroups,
    explicit_name_limit: usize,
}

impl SpeciesGroupsSource {
    /// Combinations of `groups`; those with more than `explicit_name_limit`
    /// species get symbolic names.
    pub fn new(groups: SpeciesGroups, explicit_name_limit: usize) -> Self {
        Self {
            groups,
            explicit_name_limit,
        }
    }

    /// Read a species groups file.
    pub fn from_file<P: AsRef<Path>>(path: P, explicit_name_limit: usize) -> Result<Self> {
        Ok(Self::new(SpeciesGroups::from_file(path)?, explicit_name_limit))
    }

    /// The underlying species groups.
    pub fn groups(&self) -> &SpeciesGroups {
        &self.groups
    }
}

impl ResponseMatrixSource for SpeciesGroupsSource {
    fn describe(&self) -> String {
        format!(
            "species groups ({} lines, {} combinations)",
            self.groups.lines().len(),
            self.groups.n_combinations()
        )
    }

    fn n_combinations(&self) -> usize {
        self.groups.n_combinations()
    }

    fn combinations(&self) -> Box<dyn Iterator<Item = SpeciesCombination> + '_> {
        Box::new(self.groups.combinations(self.explicit_name_limit))
    }

    fn species(&self) -> BTreeSet<String> {
        self.groups.all_species().cloned().collect()
    }
}

/// Combinations read from a directory of response files, in file name order.
#[derive(Debug, Clone)]
pub struct ResponseDirSource {
    dir: PathBuf,
    combinations: Vec<SpeciesCombination>,
}

impl ResponseDirSource {
    /// Read every `.txt` response file in `dir`.
    ///
    /// # Errors
    /// [`EslError::EmptyData`] if the directory holds no response files.
    pub fn from_dir<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && p.extension().and_then(|e| e.to_str()) == Some("txt"))
            .collect();
        paths.sort();
        if paths.is_empty() {
            return Err(EslError::EmptyData(format!(
                "no response files (*.txt) in {:?}",
                dir
            )));
        }
        let combinations = paths
            .iter()
            .enumerate()
            .map(|(i, p)| read_response_file(p, i))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            dir: dir.to_path_buf(),
            combinations,
        })
    }

    /// Write one response file per combination as `<dir>/<name>.txt`.
    pub fn write_response_files<P: AsRef<Path>>(
        dir: P,
        combinations: &[SpeciesCombination],
    ) -> Result<()> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        for combo in combinations {
            let body: String = combo
                .species()
                .iter()
                .zip(combo.labels())
                .map(|(s, l)| format!("{}\t{}\n", s, l.value()))
                .collect();
            fs::write(dir.join(format!("{}.txt", combo.name())), body)?;
        }
        Ok(())
    }
}

impl ResponseMatrixSource for ResponseDirSource {
    fn describe(&self) -> String {
        format!(
            "response directory {:?} ({} combinations)",
            self.dir,
            self.combinations.len()
        )
    }

    fn n_combinations(&self) -> usize {
        self.combinations.len()
    }

    fn combinations(&self) -> Box<dyn Iterator<Item = SpeciesCombination> + '_> {
        Box::new(self.combinations.iter().cloned())
    }

    fn species(&self) -> BTreeSet<String> {
        self.combinations
            .iter()
            .flat_map(|c| c.species().iter().cloned())
            .collect()
    }
}
