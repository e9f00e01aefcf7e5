use crate::config::LrDecayConfig;

/// Step decay schedule: the learning rate is multiplied by `scale`
/// once every `step_epochs` epochs. Only active when the runtime
/// config opts in; otherwise the optimizer keeps its base rate.
#[derive(Debug, Clone, Copy)]
pub struct StepDecay {
    base_lr: f64,
    scale: f64,
    step_epochs: usize,
}

impl StepDecay {
    pub fn new(base_lr: f64, decay: &LrDecayConfig) -> Self {
        Self {
            base_lr,
            scale: decay.scale,
            step_epochs: decay.step_epochs.max(1),
        }
    }

    pub fn lr_for_epoch(&self, epoch: usize) -> f64 {
        let stages = (epoch / self.step_epochs) as i32;
        self.base_lr * self.scale.powi(stages)
    }
}
