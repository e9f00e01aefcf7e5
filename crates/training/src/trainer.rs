use std::{sync::Arc, time::Instant};

use candle_core::Device;
use model::{build_model, ModelConfig, RegressionModel, Variant};

use crate::{
    checkpoint::{self, best_checkpoint_path, CheckpointRecord},
    config::TrainingConfig,
    data::{place_batch, BatchSource, FileListDataset, FileListLoader, ImageSpec, PrefetchLoader},
    logging::Logger,
    loss::RegressionLoss,
    metrics::AverageMeter,
    optimizer::{Algorithm, TrainerOptimizer},
    scheduler::StepDecay,
    TrainingError,
};

/// Picks the compute device. Requesting CUDA on a host without it is a
/// fatal configuration problem, never a silent CPU fallback.
pub fn select_device(cuda: bool) -> Result<Device, TrainingError> {
    if cuda {
        Device::new_cuda(0)
            .map_err(|err| TrainingError::device(format!("cuda device unavailable: {}", err)))
    } else {
        Ok(Device::Cpu)
    }
}

/// Runs one full optimization pass over the source.
///
/// Each step's gradients come from that batch's backward pass alone;
/// the optimizer consumes them as it updates, so no gradient can carry
/// over into a later step. Returns the running average training loss.
#[allow(clippy::too_many_arguments)]
pub fn train_one_epoch(
    source: &mut dyn BatchSource,
    model: &dyn RegressionModel,
    loss: RegressionLoss,
    optimizer: &mut TrainerOptimizer,
    device: &Device,
    epoch: usize,
    total_batches: usize,
    print_every: usize,
    logger: &Logger,
) -> Result<f64, TrainingError> {
    model.set_training(true);

    let mut batch_time = AverageMeter::new();
    let mut data_time = AverageMeter::new();
    let mut losses = AverageMeter::new();

    let print_every = print_every.max(1);
    let mut batch_idx = 0usize;
    let mut fetch_start = Instant::now();

    while let Some(batch) = source.next_batch()? {
        data_time.update(fetch_start.elapsed().as_secs_f64(), 1.0);
        let step_start = Instant::now();

        let (inputs, targets) = place_batch(&batch, device)?;
        let predictions = model.forward(&inputs).map_err(to_runtime_error)?;
        let output = loss.compute(&predictions, &targets)?;
        let batch_loss = output.metrics.average_loss as f64;

        let mut grads = output.loss.backward().map_err(to_runtime_error)?;
        if !batch_loss.is_finite() {
            optimizer.zero_grad(&mut grads);
            return Err(TrainingError::NonFiniteLoss {
                epoch,
                batch: batch_idx,
            });
        }
        optimizer.step(&mut grads)?;

        losses.update(batch_loss, batch.size as f64);
        batch_time.update(step_start.elapsed().as_secs_f64(), 1.0);

        if batch_idx % print_every == 0 {
            logger.log_progress(
                epoch,
                batch_idx,
                total_batches,
                &batch_time,
                &data_time,
                &losses,
            );
        }

        batch_idx += 1;
        fetch_start = Instant::now();
    }

    Ok(losses.avg)
}

/// Computes the average loss over the source without touching any
/// parameter. The model's training flag is restored on the way out so
/// a mid-training validation pass leaves dropout behavior intact.
pub fn evaluate(
    source: &mut dyn BatchSource,
    model: &dyn RegressionModel,
    loss: RegressionLoss,
    device: &Device,
) -> Result<f64, TrainingError> {
    let was_training = model.is_training();
    model.set_training(false);
    let result = evaluate_inner(source, model, loss, device);
    model.set_training(was_training);
    result
}

fn evaluate_inner(
    source: &mut dyn BatchSource,
    model: &dyn RegressionModel,
    loss: RegressionLoss,
    device: &Device,
) -> Result<f64, TrainingError> {
    let mut losses = AverageMeter::new();
    let mut batches = 0usize;

    while let Some(batch) = source.next_batch()? {
        let (inputs, targets) = place_batch(&batch, device)?;
        let predictions = model.forward(&inputs).map_err(to_runtime_error)?;
        let output = loss.compute(&predictions, &targets)?;
        losses.update(output.metrics.average_loss as f64, batch.size as f64);
        batches += 1;
    }

    if batches == 0 {
        return Err(TrainingError::runtime(
            "evaluation source yielded no batches",
        ));
    }

    Ok(losses.avg)
}

/// Tracks the best validation loss seen so far. Starts from an
/// infinite sentinel so the first observed value always counts as an
/// improvement; only strict improvement counts afterwards.
#[derive(Debug, Clone, Copy)]
pub struct BestTracker {
    best: f64,
}

impl Default for BestTracker {
    fn default() -> Self {
        Self { best: f64::INFINITY }
    }
}

impl BestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when `loss` strictly improves on the best seen,
    /// recording it as the new best.
    pub fn observe(&mut self, loss: f64) -> bool {
        if loss < self.best {
            self.best = loss;
            true
        } else {
            false
        }
    }

    pub fn best(&self) -> f64 {
        self.best
    }
}

/// End-to-end run driver: builds the model, optimizer, loaders, and
/// logger from a validated config, optionally restores a checkpoint,
/// then alternates training and validation epochs, keeping only the
/// best checkpoint on disk.
pub struct Trainer {
    config: TrainingConfig,
    variant: Variant,
    device: Device,
    model: Box<dyn RegressionModel>,
    loss: RegressionLoss,
    optimizer: TrainerOptimizer,
    schedule: Option<StepDecay>,
    logger: Logger,
    train_set: Arc<FileListDataset>,
    val_set: Arc<FileListDataset>,
    image_spec: ImageSpec,
    start_epoch: usize,
    best: BestTracker,
}

impl Trainer {
    pub fn new(config: TrainingConfig) -> Result<Self, TrainingError> {
        config.validate()?;
        config.ensure_prerequisites()?;

        let device = select_device(config.runtime.cuda)?;
        let variant = config.variant()?;

        let model = build_model(ModelConfig {
            variant,
            in_channels: config.model.in_channels,
            image_height: config.model.image_height,
            image_width: config.model.image_width,
            target_dim: config.model.target_dim,
            device: device.clone(),
        })
        .map_err(|err| TrainingError::initialization(format!("failed to build model: {}", err)))?;

        let train_set = Arc::new(FileListDataset::from_manifest(
            &config.data.root,
            &config.data.train_list,
            config.model.target_dim,
        )?);
        let val_set = Arc::new(FileListDataset::from_manifest(
            &config.data.root,
            &config.data.val_list,
            config.model.target_dim,
        )?);

        let optimizer =
            TrainerOptimizer::new(model.named_parameters(), Algorithm::from(&config.optimizer))?;
        let loss = RegressionLoss::from(config.runtime.loss);
        let schedule = config
            .runtime
            .lr_decay
            .as_ref()
            .map(|decay| StepDecay::new(config.optimizer.learning_rate, decay));
        let logger = Logger::create(&config.runtime.log_file)?;

        let image_spec = ImageSpec {
            channels: config.model.in_channels,
            height: config.model.image_height,
            width: config.model.image_width,
        };

        let mut trainer = Self {
            start_epoch: config.runtime.start_epoch,
            config,
            variant,
            device,
            model,
            loss,
            optimizer,
            schedule,
            logger,
            train_set,
            val_set,
            image_spec,
            best: BestTracker::new(),
        };
        trainer.maybe_resume()?;
        Ok(trainer)
    }

    /// Restores model weights from `runtime.resume` when configured.
    /// A missing file only warns; an undecodable one aborts the run.
    fn maybe_resume(&mut self) -> Result<(), TrainingError> {
        let Some(path) = self.config.runtime.resume.clone() else {
            return Ok(());
        };

        match checkpoint::load(&path) {
            Ok(record) => {
                record.apply_to_model(self.model.as_ref())?;
                self.start_epoch = record.epoch;
                self.logger.log_event(&format!(
                    "resumed from checkpoint {} (epoch {})",
                    path.display(),
                    record.epoch
                ));
                Ok(())
            }
            Err(TrainingError::CheckpointNotFound(missing)) => {
                self.logger.log_warning(&format!(
                    "no checkpoint found at {}, starting from epoch {}",
                    missing.display(),
                    self.start_epoch
                ));
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    pub fn start_epoch(&self) -> usize {
        self.start_epoch
    }

    pub fn best_loss(&self) -> f64 {
        self.best.best()
    }

    pub fn checkpoint_path(&self) -> std::path::PathBuf {
        best_checkpoint_path(&self.config.runtime.save_dir, self.variant.tag())
    }

    pub fn run(&mut self) -> Result<(), TrainingError> {
        self.run_with_shutdown(|| false)
    }

    /// Runs the epoch loop, checking `should_stop` between epochs so an
    /// interrupt finishes the epoch in flight instead of corrupting it.
    pub fn run_with_shutdown<F>(&mut self, should_stop: F) -> Result<(), TrainingError>
    where
        F: Fn() -> bool,
    {
        let baseline = self.validate_pass()?;
        self.logger
            .log_event(&format!("baseline validation loss {:.6}", baseline));
        self.logger.append_loss(baseline)?;

        for epoch in self.start_epoch..self.config.runtime.epochs {
            if should_stop() {
                self.logger
                    .log_event(&format!("shutdown requested, stopping before epoch {}", epoch));
                break;
            }

            if let Some(schedule) = &self.schedule {
                let lr = schedule.lr_for_epoch(epoch);
                self.optimizer.set_learning_rate(lr);
                self.logger
                    .log_event(&format!("epoch {} learning rate {:.6e}", epoch, lr));
            }

            let epoch_seed = self.config.runtime.seed.wrapping_add(epoch as u64);
            let loader = FileListLoader::new(
                self.train_set.clone(),
                self.image_spec,
                self.config.data.batch_size,
                Some(epoch_seed),
            )?;
            let mut source = PrefetchLoader::spawn(loader, self.config.data.workers.max(1));
            let total_batches = self
                .train_set
                .batches_per_epoch(self.config.data.batch_size);

            train_one_epoch(
                &mut source,
                self.model.as_ref(),
                self.loss,
                &mut self.optimizer,
                &self.device,
                epoch,
                total_batches,
                self.config.runtime.print_every,
                &self.logger,
            )?;

            let val_loss = self.validate_pass()?;
            self.logger.log_validation(epoch, val_loss)?;

            if self.best.observe(val_loss) {
                let record = CheckpointRecord::from_model(epoch + 1, self.model.as_ref())?;
                let path = self.checkpoint_path();
                checkpoint::save(&record, &path)?;
                self.logger.log_event(&format!(
                    "new best validation loss {:.6}, checkpoint saved to {}",
                    val_loss,
                    path.display()
                ));
            }
        }

        Ok(())
    }

    fn validate_pass(&self) -> Result<f64, TrainingError> {
        let loader = FileListLoader::new(
            self.val_set.clone(),
            self.image_spec,
            self.config.data.batch_size,
            None,
        )?;
        // prefetch preserves order, so the average stays deterministic
        let mut source = PrefetchLoader::spawn(loader, self.config.data.workers.max(1));
        evaluate(&mut source, self.model.as_ref(), self.loss, &self.device)
    }
}

fn to_runtime_error(err: candle_core::Error) -> TrainingError {
    TrainingError::runtime(err.to_string())
}
