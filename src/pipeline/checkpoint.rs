//! Per-combination checkpoints for long multimatrix runs.
//!
//! Files under `<output_dir>/checkpoint`:
//!
//! - `command.json`: the [`AnalysisConfig`] of the run that created it
//! - `meta.txt`: index of the last completed combination
//! - `state.json`: the serialized [`Aggregator`] and cancellation counts
//! - `runs.jsonl`: one audit line per converged model
//!
//! A later run resumes only when its configuration equals the stored one.

use crate::aggregate::Aggregator;
use crate::data::ModelResult;
use crate::error::{EslError, Result};
use crate::pipeline::config::AnalysisConfig;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Everything needed to continue a run after its last completed combination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointState {
    /// Index of the last completed combination.
    pub last_combination: usize,
    /// Reducer state.
    pub aggregator: Aggregator,
    /// Fully cancelled gene count per completed combination.
    pub fully_cancelled: Vec<(String, usize)>,
}

#[derive(Serialize)]
struct RunAudit<'a> {
    combo: usize,
    name: &'a str,
    lambda1: f64,
    lambda2: f64,
    penalty_term: Option<f64>,
    input_rmse: f64,
}

/// Checkpoint directory manager.
#[derive(Debug, Clone)]
pub struct Checkpointer {
    dir: PathBuf,
}

impl Checkpointer {
    /// Manage checkpoints under `<output_dir>/checkpoint`.
    pub fn new<P: AsRef<Path>>(output_dir: P) -> Self {
        Self {
            dir: output_dir.as_ref().join("checkpoint"),
        }
    }

    /// The checkpoint directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn command_file(&self) -> PathBuf {
        self.dir.join("command.json")
    }

    fn meta_file(&self) -> PathBuf {
        self.dir.join("meta.txt")
    }

    fn state_file(&self) -> PathBuf {
        self.dir.join("state.json")
    }

    fn runs_file(&self) -> PathBuf {
        self.dir.join("runs.jsonl")
    }

    /// True if a completed combination has been recorded.
    pub fn has_checkpoint(&self) -> bool {
        self.meta_file().exists()
    }

    /// Index of the last completed combination, if any.
    pub fn last_combination(&self) -> Result<Option<usize>> {
        if !self.has_checkpoint() {
            return Ok(None);
        }
        let text = fs::read_to_string(self.meta_file())?;
        text.trim().parse().map(Some).map_err(|_| {
            EslError::Checkpoint(format!("unreadable combination index '{}'", text.trim()))
        })
    }

    /// Delete the checkpoint directory.
    pub fn clear(&self) -> Result<()> {
        if self.dir.exists() {
            fs::remove_dir_all(&self.dir)?;
        }
        Ok(())
    }

    /// Load the state to resume from.
    ///
    /// Returns `Ok(None)` when there is nothing to resume, or when
    /// `force_from_beginning` is set, in which case the old checkpoint is
    /// deleted.
    ///
    /// # Errors
    /// [`EslError::Checkpoint`] if a checkpoint exists for a different
    /// configuration and `force_from_beginning` is not set.
    pub fn resume(
        &self,
        config: &AnalysisConfig,
        force_from_beginning: bool,
    ) -> Result<Option<CheckpointState>> {
        if force_from_beginning {
            if self.dir.exists() {
                warn!("Discarding checkpoint in {:?}", self.dir);
            }
            self.clear()?;
            return Ok(None);
        }
        if !self.has_checkpoint() {
            return Ok(None);
        }
        let stored: AnalysisConfig =
            serde_json::from_str(&fs::read_to_string(self.command_file())?)?;
        if &stored != config {
            return Err(EslError::Checkpoint(format!(
                "checkpoint in {:?} was written with a different configuration; \
                 rerun with the same settings or force a start from the beginning",
                self.dir
            )));
        }
        let state: CheckpointState = serde_json::from_str(&fs::read_to_string(self.state_file())?)?;
        info!(
            "Resuming after combination {} ({} models aggregated)",
            state.last_combination,
            state.aggregator.n_models()
        );
        Ok(Some(state))
    }

    /// Persist the state after a completed combination and append audit
    /// records for its converged models.
    pub fn save(
        &self,
        config: &AnalysisConfig,
        state: &CheckpointState,
        runs: &[ModelResult],
    ) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        if !self.command_file().exists() {
            write_atomic(&self.command_file(), &serde_json::to_vec_pretty(config)?)?;
        }
        self.append_runs(state.last_combination, runs)?;
        write_atomic(&self.state_file(), &serde_json::to_vec(state)?)?;
        write_atomic(&self.meta_file(), state.last_combination.to_string().as_bytes())?;
        Ok(())
    }

    fn append_runs(&self, combo: usize, runs: &[ModelResult]) -> Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.runs_file())?;
        let mut writer = BufWriter::new(file);
        for run in runs.iter().filter(|r| r.status.is_converged()) {
            let audit = RunAudit {
                combo,
                name: &run.key.combination,
                lambda1: run.key.point.lambda1,
                lambda2: run.key.point.lambda2,
                penalty_term: run.key.point.penalty,
                input_rmse: run.input_rmse,
            };
            serde_json::to_writer(&mut writer, &audit)?;
            writeln!(writer)?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Write to a temporary sibling, then rename over the target.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}
