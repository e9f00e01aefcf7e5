pub mod checkpoint;
pub mod config;
pub mod data;
pub mod logging;
pub mod loss;
pub mod metrics;
pub mod optimizer;
pub mod scheduler;
pub mod trainer;

pub use checkpoint::{best_checkpoint_path, CheckpointRecord, ParameterSnapshot};
pub use config::{TrainingConfig, TrainingError};
pub use data::{Batch, BatchSource, FileListDataset, FileListLoader, PrefetchLoader};
pub use logging::Logger;
pub use loss::{LossMetrics, LossOutput, RegressionLoss};
pub use metrics::AverageMeter;
pub use optimizer::{Algorithm, TrainerOptimizer};
pub use scheduler::StepDecay;
pub use trainer::{evaluate, select_device, train_one_epoch, BestTracker, Trainer};
