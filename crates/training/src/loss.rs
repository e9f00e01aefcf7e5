use candle_core::Tensor;

use crate::{config::LossKind, TrainingError};

/// Scalar regression criterion over `(batch, target_dim)` tensors.
/// L1 is the training default; MSE is kept as the documented alternative.
#[derive(Debug, Clone, Copy)]
pub enum RegressionLoss {
    L1,
    Mse,
}

impl From<LossKind> for RegressionLoss {
    fn from(kind: LossKind) -> Self {
        match kind {
            LossKind::L1 => RegressionLoss::L1,
            LossKind::Mse => RegressionLoss::Mse,
        }
    }
}

impl RegressionLoss {
    pub fn compute(&self, output: &Tensor, target: &Tensor) -> Result<LossOutput, TrainingError> {
        if output.dims() != target.dims() {
            return Err(TrainingError::runtime(format!(
                "loss expects matching shapes, got output {:?} and target {:?}",
                output.dims(),
                target.dims()
            )));
        }

        let samples = output
            .dims()
            .first()
            .copied()
            .filter(|&batch| batch > 0)
            .ok_or_else(|| {
                TrainingError::runtime("loss requires a non-empty leading batch dimension")
            })?;

        let residual = output.sub(target).map_err(to_runtime_error)?;
        let loss = match self {
            RegressionLoss::L1 => residual
                .abs()
                .map_err(to_runtime_error)?
                .mean_all()
                .map_err(to_runtime_error)?,
            RegressionLoss::Mse => residual
                .sqr()
                .map_err(to_runtime_error)?
                .mean_all()
                .map_err(to_runtime_error)?,
        };

        let average_loss = loss.to_vec0::<f32>().map_err(to_runtime_error)?;

        Ok(LossOutput {
            loss,
            metrics: LossMetrics {
                average_loss,
                samples,
            },
        })
    }
}

#[derive(Debug, Clone)]
pub struct LossOutput {
    /// Scalar tensor kept in the autograd graph for the backward pass.
    pub loss: Tensor,
    pub metrics: LossMetrics,
}

#[derive(Debug, Clone, Copy)]
pub struct LossMetrics {
    pub average_loss: f32,
    pub samples: usize,
}

fn to_runtime_error(err: candle_core::Error) -> TrainingError {
    TrainingError::runtime(err.to_string())
}
