use std::sync::atomic::{AtomicBool, Ordering};

use candle_core::{DType, Error, Result, Tensor, Var};
use candle_nn::{conv2d, linear, Conv2d, Conv2dConfig, Dropout, Linear, Module, VarBuilder, VarMap};

use crate::config::ModelConfig;

/// Capability surface the training loop consumes. Every network variant
/// exposes the same forward/parameters/mode-flag interface so the loop
/// stays agnostic to which one was constructed.
pub trait RegressionModel: Send {
    fn config(&self) -> &ModelConfig;

    /// Produces predictions shaped `(batch, target_dim)` for image input
    /// shaped `(batch, channels, height, width)`.
    fn forward(&self, images: &Tensor) -> Result<Tensor>;

    /// All trainable parameters, sorted by name for deterministic
    /// checkpoint layout.
    fn named_parameters(&self) -> Vec<(String, Var)>;

    fn set_training(&self, training: bool);
    fn is_training(&self) -> bool;
}

/// Three conv/pool stages feeding two fully-connected layers, with the
/// variant's dropout probability applied before each linear layer.
pub struct LightCnn {
    config: ModelConfig,
    conv1: Conv2d,
    conv2: Conv2d,
    conv3: Conv2d,
    fc1: Linear,
    fc2: Linear,
    dropout: Option<Dropout>,
    training: AtomicBool,
    varmap: VarMap,
}

const STAGE1_CHANNELS: usize = 32;
const STAGE2_CHANNELS: usize = 64;
const STAGE3_CHANNELS: usize = 128;
const HIDDEN_FEATURES: usize = 256;

impl LightCnn {
    pub fn new(config: ModelConfig) -> Result<Self> {
        config.validate()?;

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &config.device);
        let conv_cfg = Conv2dConfig {
            padding: 1,
            ..Default::default()
        };

        let conv1 = conv2d(
            config.in_channels,
            STAGE1_CHANNELS,
            3,
            conv_cfg,
            vb.pp("conv1"),
        )?;
        let conv2 = conv2d(STAGE1_CHANNELS, STAGE2_CHANNELS, 3, conv_cfg, vb.pp("conv2"))?;
        let conv3 = conv2d(STAGE2_CHANNELS, STAGE3_CHANNELS, 3, conv_cfg, vb.pp("conv3"))?;

        let flat_features = STAGE3_CHANNELS * (config.image_height / 8) * (config.image_width / 8);
        let fc1 = linear(flat_features, HIDDEN_FEATURES, vb.pp("fc1"))?;
        let fc2 = linear(HIDDEN_FEATURES, config.target_dim, vb.pp("fc2"))?;

        let dropout_p = config.variant.dropout_p();
        let dropout = if dropout_p > 0.0 {
            Some(Dropout::new(dropout_p))
        } else {
            None
        };

        Ok(Self {
            config,
            conv1,
            conv2,
            conv3,
            fc1,
            fc2,
            dropout,
            training: AtomicBool::new(true),
            varmap,
        })
    }

    fn apply_dropout(&self, hidden: &Tensor) -> Result<Tensor> {
        match &self.dropout {
            Some(dropout) => dropout.forward(hidden, self.is_training()),
            None => Ok(hidden.clone()),
        }
    }
}

impl RegressionModel for LightCnn {
    fn config(&self) -> &ModelConfig {
        &self.config
    }

    fn forward(&self, images: &Tensor) -> Result<Tensor> {
        let dims = images.dims();
        if dims.len() != 4 {
            return Err(Error::Msg(format!(
                "expected image input [batch, channels, height, width], got {:?}",
                dims
            )));
        }
        if dims[1] != self.config.in_channels
            || dims[2] != self.config.image_height
            || dims[3] != self.config.image_width
        {
            return Err(Error::Msg(format!(
                "input shape {:?} does not match configured {}x{}x{}",
                dims, self.config.in_channels, self.config.image_height, self.config.image_width
            )));
        }

        let mut hidden = self.conv1.forward(images)?.relu()?.max_pool2d(2)?;
        hidden = self.conv2.forward(&hidden)?.relu()?.max_pool2d(2)?;
        hidden = self.conv3.forward(&hidden)?.relu()?.max_pool2d(2)?;

        let flat = hidden.flatten_from(1)?;
        let flat = self.apply_dropout(&flat)?;
        let hidden = self.fc1.forward(&flat)?.relu()?;
        let hidden = self.apply_dropout(&hidden)?;
        self.fc2.forward(&hidden)
    }

    fn named_parameters(&self) -> Vec<(String, Var)> {
        let data = self.varmap.data().lock().unwrap();
        let mut params: Vec<(String, Var)> = data
            .iter()
            .map(|(name, var)| (name.clone(), var.clone()))
            .collect();
        params.sort_by(|a, b| a.0.cmp(&b.0));
        params
    }

    fn set_training(&self, training: bool) {
        self.training.store(training, Ordering::Relaxed);
    }

    fn is_training(&self) -> bool {
        self.training.load(Ordering::Relaxed)
    }
}

/// Builds the variant selected by `config`. All variants share the
/// `RegressionModel` surface; callers never branch on the concrete type.
pub fn build_model(config: ModelConfig) -> Result<Box<dyn RegressionModel>> {
    Ok(Box::new(LightCnn::new(config)?))
}
