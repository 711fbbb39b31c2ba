// ============================================================
// Layer 6 — Checkpoint Manager
// ============================================================
// Saves and restores QaNet weights with Burn's CompactRecorder.
// Two independent retention policies share one root directory:
//
//   <dir>/
//     hyperparams.json          ← everything needed to rebuild the model
//     debug/
//       model.mpk.gz            ← overwritten on every debug save
//       checkpoint.json         ← { "saved": [step] }
//     epoch/
//       model_epoch_3.mpk.gz    ← rolling window of the newest
//       model_epoch_4.mpk.gz      `keep_epochs` epoch records
//       checkpoint.json         ← { "saved": [3, 4] }
//
// The index file is the source of truth for "latest"; a record
// file without an index entry is never restored. Restoring from a
// mode with an empty index fails with CheckpointError::NotFound.

use std::{
    fs,
    path::PathBuf,
};

use anyhow::{Context, Result};
use burn::{
    prelude::*,
    record::{CompactRecorder, Recorder},
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::domain::{error::CheckpointError, options::SaveMode};
use crate::ml::model::QaNet;

const INDEX_FILE: &str = "checkpoint.json";
const HYPERPARAMS_FILE: &str = "hyperparams.json";

/// Saved steps (debug) or epochs (epoch), oldest first.
#[derive(Debug, Default, Serialize, Deserialize)]
struct CheckpointIndex {
    saved: Vec<usize>,
}

pub struct CheckpointManager {
    dir:         PathBuf,
    keep_epochs: usize,
}

impl CheckpointManager {
    /// Creates `<dir>/debug` and `<dir>/epoch` if they don't exist.
    /// `keep_epochs` is clamped to at least one record.
    pub fn new(dir: impl Into<PathBuf>, keep_epochs: usize) -> Result<Self> {
        let manager = Self { dir: dir.into(), keep_epochs: keep_epochs.max(1) };
        for mode in [SaveMode::Debug, SaveMode::Epoch] {
            let path = manager.mode_dir(mode);
            fs::create_dir_all(&path)
                .with_context(|| format!("Cannot create checkpoint directory '{}'", path.display()))?;
        }
        Ok(manager)
    }

    pub fn mode_dir(&self, mode: SaveMode) -> PathBuf {
        self.dir.join(mode.as_tag())
    }

    /// Record path without extension; the recorder appends its own.
    fn record_path(&self, mode: SaveMode, n: usize) -> PathBuf {
        match mode {
            SaveMode::Debug => self.mode_dir(mode).join("model"),
            SaveMode::Epoch => self.mode_dir(mode).join(format!("model_epoch_{n}")),
        }
    }

    fn read_index(&self, mode: SaveMode) -> Result<CheckpointIndex> {
        let path = self.mode_dir(mode).join(INDEX_FILE);
        if !path.exists() {
            return Ok(CheckpointIndex::default());
        }
        let json = fs::read_to_string(&path)
            .with_context(|| format!("Cannot read '{}'", path.display()))?;
        serde_json::from_str(&json).with_context(|| format!("Malformed checkpoint index '{}'", path.display()))
    }

    fn write_index(&self, mode: SaveMode, index: &CheckpointIndex) -> Result<()> {
        let path = self.mode_dir(mode).join(INDEX_FILE);
        fs::write(&path, serde_json::to_string(index)?)
            .with_context(|| format!("Cannot write '{}'", path.display()))
    }

    /// Steps (debug) or epochs (epoch) currently on disk, oldest first.
    pub fn saved(&self, mode: SaveMode) -> Result<Vec<usize>> {
        Ok(self.read_index(mode)?.saved)
    }

    pub fn latest(&self, mode: SaveMode) -> Result<Option<usize>> {
        Ok(self.read_index(mode)?.saved.last().copied())
    }

    /// Save `model` under `mode`, tagged with step `n` (debug) or
    /// epoch `n` (epoch), then apply the mode's retention policy.
    pub fn save<B: Backend>(&self, model: &QaNet<B>, mode: SaveMode, n: usize) -> Result<()> {
        let path = self.record_path(mode, n);
        CompactRecorder::new()
            .record(model.clone().into_record(), path.clone())
            .with_context(|| format!("Failed to save checkpoint to '{}'", path.display()))?;

        let mut index = self.read_index(mode)?;
        match mode {
            SaveMode::Debug => index.saved = vec![n],
            SaveMode::Epoch => {
                index.saved.retain(|&e| e != n);
                index.saved.push(n);
                while index.saved.len() > self.keep_epochs {
                    let stale = index.saved.remove(0);
                    self.remove_record(mode, stale)?;
                }
            }
        }
        self.write_index(mode, &index)?;

        tracing::debug!("Saved {} checkpoint {} to '{}'", mode, n, path.display());
        Ok(())
    }

    /// Delete every file belonging to one record, whatever extension
    /// the recorder gave it.
    fn remove_record(&self, mode: SaveMode, n: usize) -> Result<()> {
        let stem = self.record_path(mode, n);
        let Some(prefix) = stem.file_name().map(|s| format!("{}.", s.to_string_lossy())) else {
            return Ok(());
        };
        for entry in fs::read_dir(self.mode_dir(mode))? {
            let entry = entry?;
            if entry.file_name().to_string_lossy().starts_with(&prefix) {
                fs::remove_file(entry.path())
                    .with_context(|| format!("Cannot remove stale checkpoint '{}'", entry.path().display()))?;
                tracing::debug!("Removed stale {} checkpoint {}", mode, n);
            }
        }
        Ok(())
    }

    /// Load the latest `mode` checkpoint into `model`.
    pub fn restore<B: Backend>(&self, model: QaNet<B>, mode: SaveMode, device: &B::Device) -> Result<QaNet<B>> {
        let Some(n) = self.latest(mode)? else {
            return Err(CheckpointError::NotFound { mode: mode.to_string(), dir: self.mode_dir(mode) }.into());
        };
        let path = self.record_path(mode, n);
        tracing::info!("Restoring {} checkpoint {} from '{}'", mode, n, path.display());

        let record = CompactRecorder::new()
            .load(path.clone(), device)
            .with_context(|| format!("Cannot load checkpoint '{}'", path.display()))?;
        Ok(model.load_record(record))
    }

    /// Must be written before training so inference can rebuild the
    /// exact architecture.
    pub fn save_hyperparams<P: Serialize>(&self, params: &P) -> Result<()> {
        let path = self.dir.join(HYPERPARAMS_FILE);
        fs::write(&path, serde_json::to_string_pretty(params)?)
            .with_context(|| format!("Cannot write hyper-parameters to '{}'", path.display()))?;
        tracing::debug!("Saved hyper-parameters to '{}'", path.display());
        Ok(())
    }

    pub fn load_hyperparams<P: DeserializeOwned>(&self) -> Result<P> {
        let path = self.dir.join(HYPERPARAMS_FILE);
        let json = fs::read_to_string(&path).with_context(|| {
            format!("Cannot read '{}'. Has 'train' been run on this directory?", path.display())
        })?;
        serde_json::from_str(&json).with_context(|| format!("Malformed hyper-parameters in '{}'", path.display()))
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::model::tiny_config;
    use burn::backend::NdArray;

    type B = NdArray;

    fn manager(keep: usize) -> (tempfile::TempDir, CheckpointManager) {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path().join("ckpt"), keep).unwrap();
        (dir, manager)
    }

    #[test]
    fn test_epoch_mode_keeps_a_rolling_window() {
        let (_dir, manager) = manager(2);
        let model = tiny_config(16).init::<B>(&Default::default()).unwrap();
        for epoch in 1..=4 {
            manager.save(&model, SaveMode::Epoch, epoch).unwrap();
        }
        assert_eq!(manager.saved(SaveMode::Epoch).unwrap(), vec![3, 4]);

        let files: Vec<String> = fs::read_dir(manager.mode_dir(SaveMode::Epoch))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with("model_epoch_"))
            .collect();
        assert_eq!(files.len(), 2);
        assert!(files.iter().all(|f| f.starts_with("model_epoch_3.") || f.starts_with("model_epoch_4.")));
    }

    #[test]
    fn test_debug_mode_overwrites_single_record() {
        let (_dir, manager) = manager(5);
        let model = tiny_config(16).init::<B>(&Default::default()).unwrap();
        manager.save(&model, SaveMode::Debug, 100).unwrap();
        manager.save(&model, SaveMode::Debug, 200).unwrap();
        assert_eq!(manager.saved(SaveMode::Debug).unwrap(), vec![200]);
        assert_eq!(manager.latest(SaveMode::Epoch).unwrap(), None);
    }

    #[test]
    fn test_restore_without_checkpoint_is_not_found() {
        let (_dir, manager) = manager(1);
        let device = Default::default();
        let model = tiny_config(16).init::<B>(&device).unwrap();

        let err = manager.restore(model, SaveMode::Debug, &device).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CheckpointError>(),
            Some(CheckpointError::NotFound { .. })
        ));
    }

    #[test]
    fn test_restore_round_trips_weights() {
        let (_dir, manager) = manager(1);
        let device = Default::default();
        let saved = tiny_config(16).init::<B>(&device).unwrap();
        manager.save(&saved, SaveMode::Epoch, 1).unwrap();

        let fresh = tiny_config(16).init::<B>(&device).unwrap();
        let table = |model: &QaNet<B>| model.word_table().unwrap().into_data().to_vec::<f32>().unwrap();
        let saved_table = table(&saved);
        assert_ne!(table(&fresh), saved_table);

        let restored = manager.restore(fresh, SaveMode::Epoch, &device).unwrap();
        assert_eq!(table(&restored), saved_table);
        assert_eq!(restored.num_params(), saved.num_params());
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Settings {
        hidden: usize,
        kind:   String,
    }

    #[test]
    fn test_hyperparams_round_trip() {
        let (_dir, manager) = manager(1);
        let params = Settings { hidden: 96, kind: "trilinear".into() };
        manager.save_hyperparams(&params).unwrap();
        assert_eq!(manager.load_hyperparams::<Settings>().unwrap(), params);
    }

    #[test]
    fn test_missing_hyperparams_point_at_train() {
        let (_dir, manager) = manager(1);
        let err = manager.load_hyperparams::<Settings>().unwrap_err();
        assert!(err.to_string().contains("Has 'train' been run"));
    }
}
