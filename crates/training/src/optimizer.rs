use candle_core::{backprop::GradStore, DType, Tensor, Var};

use crate::{config, TrainingError};

const EPS: f64 = 1e-12;

/// Resolved update rule with its hyperparameters.
#[derive(Debug, Clone, Copy)]
pub enum Algorithm {
    Adam(AdamConfig),
    AdamW(AdamConfig),
    Sgd(SgdConfig),
}

#[derive(Debug, Clone, Copy)]
pub struct AdamConfig {
    pub learning_rate: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub epsilon: f64,
    pub weight_decay: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct SgdConfig {
    pub learning_rate: f64,
    pub momentum: f64,
    pub weight_decay: f64,
}

impl From<&config::OptimizerConfig> for Algorithm {
    fn from(value: &config::OptimizerConfig) -> Self {
        match value.algorithm {
            config::OptimizerType::Adam => Algorithm::Adam(AdamConfig {
                learning_rate: value.learning_rate,
                beta1: value.beta1,
                beta2: value.beta2,
                epsilon: value.epsilon,
                weight_decay: value.weight_decay,
            }),
            config::OptimizerType::AdamW => Algorithm::AdamW(AdamConfig {
                learning_rate: value.learning_rate,
                beta1: value.beta1,
                beta2: value.beta2,
                epsilon: value.epsilon,
                weight_decay: value.weight_decay,
            }),
            config::OptimizerType::Sgd => Algorithm::Sgd(SgdConfig {
                learning_rate: value.learning_rate,
                momentum: value.momentum,
                weight_decay: value.weight_decay,
            }),
        }
    }
}

/// In-place parameter updater over the model's named variables.
///
/// Gradients are pulled out of the `GradStore` produced by
/// `loss.backward()`; parameters whose gradient is absent (for example
/// frozen layers) are skipped for that step.
#[derive(Debug)]
pub struct TrainerOptimizer {
    algorithm: Algorithm,
    params: Vec<ParameterSlot>,
    step: usize,
}

#[derive(Debug)]
struct ParameterSlot {
    param: Var,
    first_moment: Tensor,
    second_moment: Tensor,
}

impl TrainerOptimizer {
    pub fn new(
        named_parameters: Vec<(String, Var)>,
        algorithm: Algorithm,
    ) -> Result<Self, TrainingError> {
        if named_parameters.is_empty() {
            return Err(TrainingError::initialization(
                "optimizer requires at least one parameter",
            ));
        }

        let mut params = Vec::with_capacity(named_parameters.len());
        for (name, var) in named_parameters {
            let tensor = var.as_tensor();
            if !tensor.dtype().is_float() {
                return Err(TrainingError::initialization(format!(
                    "optimizer received non-floating parameter '{}'",
                    name
                )));
            }
            let device = tensor.device();
            let shape = tensor.dims().to_vec();

            let first_moment =
                Tensor::zeros(shape.as_slice(), DType::F32, device).map_err(to_runtime_error)?;
            let second_moment =
                Tensor::zeros(shape.as_slice(), DType::F32, device).map_err(to_runtime_error)?;

            params.push(ParameterSlot {
                param: var,
                first_moment,
                second_moment,
            });
        }

        Ok(Self {
            algorithm,
            params,
            step: 0,
        })
    }

    pub fn learning_rate(&self) -> f64 {
        match self.algorithm {
            Algorithm::Adam(cfg) | Algorithm::AdamW(cfg) => cfg.learning_rate,
            Algorithm::Sgd(cfg) => cfg.learning_rate,
        }
    }

    pub fn set_learning_rate(&mut self, lr: f64) {
        match &mut self.algorithm {
            Algorithm::Adam(cfg) | Algorithm::AdamW(cfg) => cfg.learning_rate = lr,
            Algorithm::Sgd(cfg) => cfg.learning_rate = lr,
        }
    }

    /// Drops any gradients still tracked for this optimizer's
    /// parameters. Called before each backward pass so stale gradients
    /// from a previous step can never leak into the next update.
    pub fn zero_grad(&self, grads: &mut GradStore) {
        for slot in &self.params {
            let _ = grads.remove(slot.param.as_tensor());
        }
    }

    pub fn step(&mut self, grads: &mut GradStore) -> Result<(), TrainingError> {
        let mut processed = Vec::new();
        for (idx, slot) in self.params.iter().enumerate() {
            let tensor = slot.param.as_tensor();
            let grad = match grads.remove(tensor) {
                Some(grad) => grad,
                None => continue,
            };
            let grad = grad.to_dtype(DType::F32).map_err(to_runtime_error)?;
            processed.push((idx, grad));
        }

        if processed.is_empty() {
            return Ok(());
        }

        self.step += 1;
        match self.algorithm {
            Algorithm::Adam(cfg) => self.step_adam(cfg, processed, false),
            Algorithm::AdamW(cfg) => self.step_adam(cfg, processed, true),
            Algorithm::Sgd(cfg) => self.step_sgd(cfg, processed),
        }
    }

    fn step_adam(
        &mut self,
        cfg: AdamConfig,
        processed: Vec<(usize, Tensor)>,
        decoupled_decay: bool,
    ) -> Result<(), TrainingError> {
        let bias_correction1 = 1.0 - cfg.beta1.powi(self.step as i32);
        let bias_correction2 = 1.0 - cfg.beta2.powi(self.step as i32);
        let scale_m = if bias_correction1.abs() < EPS {
            1.0
        } else {
            1.0 / bias_correction1
        };
        let scale_v = if bias_correction2.abs() < EPS {
            1.0
        } else {
            1.0 / bias_correction2
        };

        for (index, grad) in processed {
            let slot = &mut self.params[index];
            let current = slot.param.as_tensor().clone();

            // Classic Adam folds weight decay into the gradient as an
            // L2 term; AdamW decays the weights directly instead.
            let grad = if !decoupled_decay && cfg.weight_decay != 0.0 {
                let decay = current
                    .affine(cfg.weight_decay, 0.0)
                    .map_err(to_runtime_error)?;
                grad.add(&decay).map_err(to_runtime_error)?
            } else {
                grad
            };

            let prev_m = slot
                .first_moment
                .affine(cfg.beta1, 0.0)
                .map_err(to_runtime_error)?;
            let grad_term = grad
                .affine(1.0 - cfg.beta1, 0.0)
                .map_err(to_runtime_error)?;
            let new_m = prev_m.add(&grad_term).map_err(to_runtime_error)?;

            let grad_sq = grad.sqr().map_err(to_runtime_error)?;
            let prev_v = slot
                .second_moment
                .affine(cfg.beta2, 0.0)
                .map_err(to_runtime_error)?;
            let grad_sq_term = grad_sq
                .affine(1.0 - cfg.beta2, 0.0)
                .map_err(to_runtime_error)?;
            let new_v = prev_v.add(&grad_sq_term).map_err(to_runtime_error)?;

            let m_hat = new_m.affine(scale_m, 0.0).map_err(to_runtime_error)?;
            let v_hat = new_v.affine(scale_v, 0.0).map_err(to_runtime_error)?;
            let denom = v_hat
                .sqrt()
                .map_err(to_runtime_error)?
                .affine(1.0, cfg.epsilon)
                .map_err(to_runtime_error)?;
            let update = m_hat
                .div(&denom)
                .map_err(to_runtime_error)?
                .affine(cfg.learning_rate, 0.0)
                .map_err(to_runtime_error)?;

            let base = if decoupled_decay && cfg.weight_decay != 0.0 {
                current
                    .affine(1.0 - cfg.learning_rate * cfg.weight_decay, 0.0)
                    .map_err(to_runtime_error)?
            } else {
                current
            };

            let next = base.sub(&update).map_err(to_runtime_error)?;
            slot.param.set(&next).map_err(to_runtime_error)?;

            slot.first_moment = new_m;
            slot.second_moment = new_v;
        }

        Ok(())
    }

    fn step_sgd(
        &mut self,
        cfg: SgdConfig,
        processed: Vec<(usize, Tensor)>,
    ) -> Result<(), TrainingError> {
        for (index, grad) in processed {
            let slot = &mut self.params[index];
            let current = slot.param.as_tensor().clone();

            let grad = if cfg.weight_decay != 0.0 {
                let decay = current
                    .affine(cfg.weight_decay, 0.0)
                    .map_err(to_runtime_error)?;
                grad.add(&decay).map_err(to_runtime_error)?
            } else {
                grad
            };

            let velocity = if cfg.momentum != 0.0 {
                let carried = slot
                    .first_moment
                    .affine(cfg.momentum, 0.0)
                    .map_err(to_runtime_error)?;
                carried.add(&grad).map_err(to_runtime_error)?
            } else {
                grad
            };

            let update = velocity
                .affine(cfg.learning_rate, 0.0)
                .map_err(to_runtime_error)?;
            let next = current.sub(&update).map_err(to_runtime_error)?;
            slot.param.set(&next).map_err(to_runtime_error)?;

            slot.first_moment = velocity;
        }

        Ok(())
    }
}

fn to_runtime_error(err: candle_core::Error) -> TrainingError {
    TrainingError::runtime(err.to_string())
}
