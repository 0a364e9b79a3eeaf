//! Optional true phenotype labels for scored species.

use crate::data::species_groups::Label;
use crate::error::{EslError, Result};
use std::collections::HashMap;
use std::path::Path;

/// Species to phenotype label map, read from `species,label` lines.
#[derive(Debug, Clone, Default)]
pub struct Phenotypes {
    labels: HashMap<String, Label>,
}

impl Phenotypes {
    /// Parse `species,label` lines with label 1 or -1. Blank lines are ignored.
    pub fn parse(text: &str) -> Result<Self> {
        let mut labels = HashMap::new();
        for (i, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let (species, value) = line.split_once(',').ok_or_else(|| EslError::Phenotype {
                line: i + 1,
                reason: format!("expected 'species,label', got '{}'", line),
            })?;
            let label = Label::from_value(value).ok_or_else(|| EslError::Phenotype {
                line: i + 1,
                reason: format!("label must be 1 or -1, got '{}'", value.trim()),
            })?;
            labels.insert(species.trim().to_string(), label);
        }
        Ok(Self { labels })
    }

    /// Read a phenotype file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Label for a species, if known.
    pub fn get(&self, species: &str) -> Option<Label> {
        self.labels.get(species).copied()
    }

    /// Number of species with a label.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// True if no labels were read.
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}
