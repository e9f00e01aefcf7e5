use anyhow::Result;
use candle_core::{Device, Tensor};
use model::{build_model, ModelConfig, RegressionModel, Variant};
use training::{
    evaluate,
    optimizer::{AdamConfig, Algorithm},
    train_one_epoch, Batch, BatchSource, Logger, PrefetchLoader, RegressionLoss, TrainerOptimizer,
    TrainingError,
};

/// Replays a fixed set of in-memory batches, one pass per rewind.
struct ReplaySource {
    batches: Vec<Batch>,
    cursor: usize,
}

impl ReplaySource {
    fn new(batches: Vec<Batch>) -> Self {
        Self { batches, cursor: 0 }
    }

    fn rewind(&mut self) {
        self.cursor = 0;
    }
}

impl BatchSource for ReplaySource {
    fn next_batch(&mut self) -> Result<Option<Batch>, TrainingError> {
        let Some(batch) = self.batches.get(self.cursor) else {
            return Ok(None);
        };
        self.cursor += 1;
        Ok(Some(Batch {
            inputs: batch.inputs.clone(),
            targets: batch.targets.clone(),
            size: batch.size,
        }))
    }
}

fn test_model() -> Result<Box<dyn RegressionModel>> {
    Ok(build_model(ModelConfig {
        variant: Variant::Drop0,
        in_channels: 1,
        image_height: 8,
        image_width: 8,
        target_dim: 1,
        device: Device::Cpu,
    })?)
}

fn constant_target_batch(samples: usize, target: f32) -> Result<Batch> {
    let pixels: Vec<f32> = (0..samples * 64)
        .map(|i| (i * 31 % 97) as f32 / 97.0)
        .collect();
    let inputs = Tensor::from_vec(pixels, (samples, 1, 8, 8), &Device::Cpu)?;
    let targets = Tensor::from_vec(vec![target; samples], (samples, 1), &Device::Cpu)?;
    Ok(Batch {
        inputs,
        targets,
        size: samples,
    })
}

fn adam(lr: f64) -> Algorithm {
    Algorithm::Adam(AdamConfig {
        learning_rate: lr,
        beta1: 0.9,
        beta2: 0.999,
        epsilon: 1e-8,
        weight_decay: 0.0,
    })
}

fn snapshot_parameters(model: &dyn RegressionModel) -> Result<Vec<Vec<f32>>> {
    model
        .named_parameters()
        .into_iter()
        .map(|(_, var)| Ok(var.as_tensor().flatten_all()?.to_vec1::<f32>()?))
        .collect()
}

#[test]
fn training_reduces_loss_on_learnable_regression() -> Result<()> {
    let model = test_model()?;
    let mut optimizer = TrainerOptimizer::new(model.named_parameters(), adam(0.01))?;
    let loss = RegressionLoss::L1;
    let device = Device::Cpu;

    let dir = tempfile::tempdir()?;
    let logger = Logger::create(&dir.path().join("loss.txt"))?;

    let mut source = ReplaySource::new(vec![constant_target_batch(8, 0.5)?]);

    let before = evaluate(&mut source, model.as_ref(), loss, &device)?;

    for epoch in 0..30 {
        source.rewind();
        train_one_epoch(
            &mut source,
            model.as_ref(),
            loss,
            &mut optimizer,
            &device,
            epoch,
            1,
            100,
            &logger,
        )?;
    }

    source.rewind();
    let after = evaluate(&mut source, model.as_ref(), loss, &device)?;

    assert!(
        after < before,
        "loss did not improve: before {} after {}",
        before,
        after
    );

    Ok(())
}

#[test]
fn evaluation_is_idempotent_and_leaves_parameters_untouched() -> Result<()> {
    let model = test_model()?;
    let loss = RegressionLoss::L1;
    let device = Device::Cpu;

    let mut source = ReplaySource::new(vec![
        constant_target_batch(4, 0.2)?,
        constant_target_batch(4, 0.8)?,
    ]);

    let params_before = snapshot_parameters(model.as_ref())?;
    let first = evaluate(&mut source, model.as_ref(), loss, &device)?;
    source.rewind();
    let second = evaluate(&mut source, model.as_ref(), loss, &device)?;
    let params_after = snapshot_parameters(model.as_ref())?;

    assert_eq!(first, second);
    assert_eq!(params_before, params_after);

    Ok(())
}

#[test]
fn evaluation_through_prefetch_matches_direct() -> Result<()> {
    let model = test_model()?;
    let loss = RegressionLoss::L1;
    let device = Device::Cpu;

    let batches = || -> Result<Vec<Batch>> {
        Ok(vec![
            constant_target_batch(4, 0.2)?,
            constant_target_batch(4, 0.8)?,
            constant_target_batch(2, 0.5)?,
        ])
    };

    let mut direct = ReplaySource::new(batches()?);
    let expected = evaluate(&mut direct, model.as_ref(), loss, &device)?;

    let mut prefetched = PrefetchLoader::spawn(ReplaySource::new(batches()?), 2);
    let observed = evaluate(&mut prefetched, model.as_ref(), loss, &device)?;

    assert_eq!(expected, observed);
    Ok(())
}

#[test]
fn evaluation_restores_training_mode() -> Result<()> {
    let model = test_model()?;
    model.set_training(true);

    let mut source = ReplaySource::new(vec![constant_target_batch(2, 0.5)?]);
    evaluate(&mut source, model.as_ref(), RegressionLoss::L1, &Device::Cpu)?;

    assert!(model.is_training());
    Ok(())
}

#[test]
fn empty_evaluation_source_is_an_error() -> Result<()> {
    let model = test_model()?;
    let mut source = ReplaySource::new(vec![]);

    let result = evaluate(&mut source, model.as_ref(), RegressionLoss::L1, &Device::Cpu);
    assert!(matches!(result, Err(TrainingError::Runtime(_))));
    Ok(())
}

#[test]
fn non_finite_loss_aborts_the_epoch() -> Result<()> {
    let model = test_model()?;
    let mut optimizer = TrainerOptimizer::new(model.named_parameters(), adam(0.001))?;
    let device = Device::Cpu;

    let dir = tempfile::tempdir()?;
    let logger = Logger::create(&dir.path().join("loss.txt"))?;

    let mut source = ReplaySource::new(vec![constant_target_batch(2, f32::NAN)?]);

    let result = train_one_epoch(
        &mut source,
        model.as_ref(),
        RegressionLoss::L1,
        &mut optimizer,
        &device,
        3,
        1,
        100,
        &logger,
    );

    assert!(matches!(
        result,
        Err(TrainingError::NonFiniteLoss { epoch: 3, batch: 0 })
    ));
    Ok(())
}
