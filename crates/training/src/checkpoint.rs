use std::{
    collections::HashMap,
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
};

use candle_core::Tensor;
use model::RegressionModel;
use serde::{Deserialize, Serialize};

use crate::TrainingError;

/// One trainable tensor flattened for durable storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterSnapshot {
    pub name: String,
    pub shape: Vec<usize>,
    pub values: Vec<f32>,
}

/// The persisted unit: the epoch a snapshot was captured at plus every
/// named parameter of the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub epoch: usize,
    pub parameters: Vec<ParameterSnapshot>,
}

impl CheckpointRecord {
    pub fn from_model(
        epoch: usize,
        model: &dyn RegressionModel,
    ) -> Result<Self, TrainingError> {
        let named = model.named_parameters();
        if named.is_empty() {
            return Err(TrainingError::runtime(
                "model contains no parameters to checkpoint",
            ));
        }

        let mut parameters = Vec::with_capacity(named.len());
        for (name, var) in named {
            let tensor = var.as_tensor();
            let shape = tensor.dims().to_vec();
            let values = flatten_to_vec(tensor)?;
            parameters.push(ParameterSnapshot {
                name,
                shape,
                values,
            });
        }

        Ok(Self { epoch, parameters })
    }

    /// Writes every stored tensor back into the model's parameters.
    /// A parameter missing from either side means the record belongs to
    /// a different network and is rejected as corrupt.
    pub fn apply_to_model(&self, model: &dyn RegressionModel) -> Result<(), TrainingError> {
        let mut by_name: HashMap<&str, &ParameterSnapshot> = self
            .parameters
            .iter()
            .map(|snapshot| (snapshot.name.as_str(), snapshot))
            .collect();

        for (name, var) in model.named_parameters() {
            let snapshot = by_name.remove(name.as_str()).ok_or_else(|| {
                TrainingError::corrupt(format!("checkpoint missing parameter '{}'", name))
            })?;

            let tensor = var.as_tensor();
            if tensor.dims() != snapshot.shape.as_slice() {
                return Err(TrainingError::corrupt(format!(
                    "shape mismatch for parameter '{}': model {:?}, checkpoint {:?}",
                    name,
                    tensor.dims(),
                    snapshot.shape
                )));
            }

            let restored = Tensor::from_vec(
                snapshot.values.clone(),
                snapshot.shape.as_slice(),
                tensor.device(),
            )
            .map_err(|err| TrainingError::runtime(err.to_string()))?;
            var.set(&restored)
                .map_err(|err| TrainingError::runtime(err.to_string()))?;
        }

        if !by_name.is_empty() {
            let extra = by_name.keys().copied().collect::<Vec<_>>().join(", ");
            return Err(TrainingError::corrupt(format!(
                "checkpoint contains unknown parameters: {}",
                extra
            )));
        }

        Ok(())
    }

    fn validate(&self) -> Result<(), TrainingError> {
        for snapshot in &self.parameters {
            let expected: usize = snapshot.shape.iter().product();
            if snapshot.values.len() != expected {
                return Err(TrainingError::corrupt(format!(
                    "parameter '{}' holds {} values but its shape {:?} requires {}",
                    snapshot.name,
                    snapshot.values.len(),
                    snapshot.shape,
                    expected
                )));
            }
        }
        Ok(())
    }
}

/// Location of the single retained "best" record for a model variant.
pub fn best_checkpoint_path(save_dir: &Path, tag: &str) -> PathBuf {
    save_dir.join(format!("{}best_checkpoint.json", tag))
}

/// Serializes the record to `path`, overwriting any previous file.
/// The write goes through a sibling temp file and a rename so a crash
/// mid-write never leaves a partial checkpoint behind.
pub fn save(record: &CheckpointRecord, path: &Path) -> Result<(), TrainingError> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|err| {
        TrainingError::runtime(format!(
            "failed to create checkpoint directory {}: {}",
            parent.display(),
            err
        ))
    })?;

    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| {
            TrainingError::runtime(format!(
                "checkpoint path has no valid file name: {}",
                path.display()
            ))
        })?;
    let tmp_path = parent.join(format!(".{}.tmp", file_name));

    let mut file = File::create(&tmp_path).map_err(|err| {
        TrainingError::runtime(format!("failed to create {}: {}", tmp_path.display(), err))
    })?;
    let data = serde_json::to_vec(record)
        .map_err(|err| TrainingError::runtime(format!("failed to serialize checkpoint: {}", err)))?;
    file.write_all(&data).map_err(|err| {
        TrainingError::runtime(format!("failed to write {}: {}", tmp_path.display(), err))
    })?;
    file.sync_all().map_err(|err| {
        TrainingError::runtime(format!("failed to flush {}: {}", tmp_path.display(), err))
    })?;
    drop(file);

    fs::rename(&tmp_path, path).map_err(|err| {
        TrainingError::runtime(format!(
            "failed to move checkpoint into place at {}: {}",
            path.display(),
            err
        ))
    })
}

/// Reads a record back. A missing file and an undecodable file are
/// distinct failures so the caller can treat only the former as benign.
pub fn load(path: &Path) -> Result<CheckpointRecord, TrainingError> {
    if !path.exists() {
        return Err(TrainingError::CheckpointNotFound(path.to_path_buf()));
    }

    let file = File::open(path).map_err(|err| {
        TrainingError::runtime(format!("failed to open {}: {}", path.display(), err))
    })?;
    let record: CheckpointRecord = serde_json::from_reader(file)
        .map_err(|err| TrainingError::corrupt(format!("{}: {}", path.display(), err)))?;
    record.validate()?;
    Ok(record)
}

fn flatten_to_vec(tensor: &Tensor) -> Result<Vec<f32>, TrainingError> {
    tensor
        .flatten_all()
        .and_then(|flat| flat.to_vec1::<f32>())
        .map_err(|err| TrainingError::runtime(err.to_string()))
}
