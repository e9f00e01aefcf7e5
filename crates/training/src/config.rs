use model::Variant;
use serde::{Deserialize, Serialize};
use std::{
    fmt, fs,
    path::{Path, PathBuf},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub model: ModelSection,
    pub data: DataConfig,
    #[serde(default)]
    pub optimizer: OptimizerConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

impl TrainingConfig {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, TrainingError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let mut config: TrainingConfig = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&contents)?,
            Some("toml") | Some("tml") | None => toml::from_str(&contents)?,
            Some(other) => {
                return Err(TrainingError::ConfigFormat(format!(
                    "unsupported configuration extension '{}'",
                    other
                )));
            }
        };

        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        config.apply_base_path(base_dir);
        config.validate()?;

        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, TrainingError> {
        Self::from_path(path)
    }

    /// Structural checks only; file existence is deferred to
    /// [`TrainingConfig::ensure_prerequisites`] so configs can be built
    /// before their artifacts.
    pub fn validate(&self) -> Result<(), TrainingError> {
        let mut errors = Vec::new();

        if Variant::parse(&self.model.variant).is_none() {
            errors.push(format!(
                "model.variant '{}' is not a known network variant",
                self.model.variant
            ));
        }

        if self.model.in_channels != 1 && self.model.in_channels != 3 {
            errors.push("model.in_channels must be 1 (grayscale) or 3 (rgb)".to_string());
        }

        if self.model.target_dim == 0 {
            errors.push("model.target_dim must be greater than 0".to_string());
        }

        if self.model.image_height == 0
            || self.model.image_width == 0
            || self.model.image_height % 8 != 0
            || self.model.image_width % 8 != 0
        {
            errors.push("model image dimensions must be non-zero multiples of 8".to_string());
        }

        if self.data.train_list.as_os_str().is_empty() {
            errors.push("data.train_list must not be empty".to_string());
        }

        if self.data.val_list.as_os_str().is_empty() {
            errors.push("data.val_list must not be empty".to_string());
        }

        if self.data.batch_size == 0 {
            errors.push("data.batch_size must be greater than 0".to_string());
        }

        if self.optimizer.learning_rate <= 0.0 {
            errors.push("optimizer.learning_rate must be greater than 0".to_string());
        }

        if self.optimizer.weight_decay < 0.0 {
            errors.push("optimizer.weight_decay must be >= 0".to_string());
        }

        if !(0.0..1.0).contains(&self.optimizer.momentum) {
            errors.push("optimizer.momentum must be in [0, 1)".to_string());
        }

        if !(0.0 < self.optimizer.beta1 && self.optimizer.beta1 < 1.0) {
            errors.push("optimizer.beta1 must be in (0, 1)".to_string());
        }

        if !(0.0 < self.optimizer.beta2 && self.optimizer.beta2 < 1.0) {
            errors.push("optimizer.beta2 must be in (0, 1)".to_string());
        }

        if self.runtime.epochs == 0 {
            errors.push("runtime.epochs must be greater than 0".to_string());
        }

        if self.runtime.start_epoch >= self.runtime.epochs {
            errors.push("runtime.start_epoch must be below runtime.epochs".to_string());
        }

        if self.runtime.print_every == 0 {
            errors.push("runtime.print_every must be greater than 0".to_string());
        }

        if self.runtime.save_dir.as_os_str().is_empty() {
            errors.push("runtime.save_dir must not be empty".to_string());
        }

        if let Some(decay) = &self.runtime.lr_decay {
            if !(0.0 < decay.scale && decay.scale < 1.0) {
                errors.push("runtime.lr_decay.scale must be in (0, 1)".to_string());
            }
            if decay.step_epochs == 0 {
                errors.push("runtime.lr_decay.step_epochs must be greater than 0".to_string());
            }
        }

        if !errors.is_empty() {
            return Err(TrainingError::validation(errors));
        }

        Ok(())
    }

    /// Verifies the artifacts the run depends on before any training
    /// starts; a missing path here is fatal configuration.
    pub fn ensure_prerequisites(&self) -> Result<(), TrainingError> {
        let mut missing = Vec::new();

        if !self.data.root.is_dir() {
            missing.push(format!("data.root ({})", self.data.root.display()));
        }
        if !self.data.train_list.is_file() {
            missing.push(format!(
                "data.train_list ({})",
                self.data.train_list.display()
            ));
        }
        if !self.data.val_list.is_file() {
            missing.push(format!("data.val_list ({})", self.data.val_list.display()));
        }

        if !missing.is_empty() {
            return Err(TrainingError::initialization(format!(
                "missing required artifacts: {}",
                missing.join(", ")
            )));
        }

        Ok(())
    }

    pub fn variant(&self) -> Result<Variant, TrainingError> {
        Variant::parse(&self.model.variant).ok_or_else(|| {
            TrainingError::validation(vec![format!(
                "model.variant '{}' is not a known network variant",
                self.model.variant
            )])
        })
    }

    fn apply_base_path(&mut self, base: &Path) {
        self.data.apply_base_path(base);
        self.runtime.apply_base_path(base);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSection {
    #[serde(default = "default_variant")]
    pub variant: String,
    #[serde(default = "default_in_channels")]
    pub in_channels: usize,
    #[serde(default = "default_image_side")]
    pub image_height: usize,
    #[serde(default = "default_image_side")]
    pub image_width: usize,
    #[serde(default = "default_target_dim")]
    pub target_dim: usize,
}

impl Default for ModelSection {
    fn default() -> Self {
        Self {
            variant: default_variant(),
            in_channels: default_in_channels(),
            image_height: default_image_side(),
            image_width: default_image_side(),
            target_dim: default_target_dim(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    pub root: PathBuf,
    pub train_list: PathBuf,
    pub val_list: PathBuf,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Number of batches the loader decodes ahead of the consumer.
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl DataConfig {
    pub fn new(root: PathBuf, train_list: PathBuf, val_list: PathBuf) -> Self {
        Self {
            root,
            train_list,
            val_list,
            batch_size: default_batch_size(),
            workers: default_workers(),
        }
    }

    fn apply_base_path(&mut self, base: &Path) {
        absolutize_in_place(&mut self.root, base);
        absolutize_in_place(&mut self.train_list, base);
        absolutize_in_place(&mut self.val_list, base);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerConfig {
    #[serde(default)]
    pub algorithm: OptimizerType,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    #[serde(default = "default_momentum")]
    pub momentum: f64,
    #[serde(default = "default_weight_decay")]
    pub weight_decay: f64,
    #[serde(default = "default_beta1")]
    pub beta1: f64,
    #[serde(default = "default_beta2")]
    pub beta2: f64,
    #[serde(default = "default_adam_eps")]
    pub epsilon: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            algorithm: OptimizerType::default(),
            learning_rate: default_learning_rate(),
            momentum: default_momentum(),
            weight_decay: default_weight_decay(),
            beta1: default_beta1(),
            beta2: default_beta2(),
            epsilon: default_adam_eps(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerType {
    Adam,
    AdamW,
    Sgd,
}

impl Default for OptimizerType {
    fn default() -> Self {
        Self::Adam
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossKind {
    L1,
    Mse,
}

impl Default for LossKind {
    fn default() -> Self {
        Self::L1
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub cuda: bool,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_epochs")]
    pub epochs: usize,
    #[serde(default)]
    pub start_epoch: usize,
    #[serde(default = "default_print_every")]
    pub print_every: usize,
    #[serde(default)]
    pub loss: LossKind,
    #[serde(default = "default_save_dir")]
    pub save_dir: PathBuf,
    #[serde(default = "default_log_file")]
    pub log_file: PathBuf,
    #[serde(default)]
    pub resume: Option<PathBuf>,
    /// Epoch-based step decay; absent means the learning rate is held
    /// constant for the whole run.
    #[serde(default)]
    pub lr_decay: Option<LrDecayConfig>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            cuda: false,
            seed: default_seed(),
            epochs: default_epochs(),
            start_epoch: 0,
            print_every: default_print_every(),
            loss: LossKind::default(),
            save_dir: default_save_dir(),
            log_file: default_log_file(),
            resume: None,
            lr_decay: None,
        }
    }
}

impl RuntimeConfig {
    fn apply_base_path(&mut self, base: &Path) {
        absolutize_in_place(&mut self.save_dir, base);
        absolutize_in_place(&mut self.log_file, base);
        if let Some(resume) = self.resume.as_mut() {
            absolutize_in_place(resume, base);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LrDecayConfig {
    pub scale: f64,
    pub step_epochs: usize,
}

fn absolutize_in_place(path: &mut PathBuf, base: &Path) {
    if path.is_relative() {
        *path = base.join(&*path);
    }
}

fn default_variant() -> String {
    "drop1".to_string()
}

fn default_in_channels() -> usize {
    3
}

fn default_image_side() -> usize {
    64
}

fn default_target_dim() -> usize {
    1
}

fn default_batch_size() -> usize {
    64
}

fn default_workers() -> usize {
    4
}

fn default_learning_rate() -> f64 {
    1e-3
}

fn default_momentum() -> f64 {
    0.9
}

fn default_weight_decay() -> f64 {
    1e-4
}

fn default_beta1() -> f64 {
    0.9
}

fn default_beta2() -> f64 {
    0.999
}

fn default_adam_eps() -> f64 {
    1e-8
}

fn default_seed() -> u64 {
    42
}

fn default_epochs() -> usize {
    400
}

fn default_print_every() -> usize {
    10
}

fn default_save_dir() -> PathBuf {
    PathBuf::from("./model")
}

fn default_log_file() -> PathBuf {
    PathBuf::from("./validation_loss.txt")
}

#[derive(Debug)]
pub enum TrainingError {
    Io(std::io::Error),
    ConfigFormat(String),
    Validation(Vec<String>),
    Initialization(String),
    Device(String),
    CheckpointNotFound(PathBuf),
    CheckpointCorrupt(String),
    NonFiniteLoss { epoch: usize, batch: usize },
    Runtime(String),
}

impl TrainingError {
    pub fn initialization(message: impl Into<String>) -> Self {
        Self::Initialization(message.into())
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime(message.into())
    }

    pub fn validation(messages: Vec<String>) -> Self {
        Self::Validation(messages)
    }

    pub fn device(message: impl Into<String>) -> Self {
        Self::Device(message.into())
    }

    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::CheckpointCorrupt(message.into())
    }
}

impl fmt::Display for TrainingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrainingError::Io(err) => write!(f, "i/o failure: {}", err),
            TrainingError::ConfigFormat(err) => write!(f, "failed to parse config: {}", err),
            TrainingError::Validation(messages) => {
                write!(f, "invalid configuration: {}", messages.join("; "))
            }
            TrainingError::Initialization(msg) => {
                write!(f, "trainer initialization failed: {}", msg)
            }
            TrainingError::Device(msg) => write!(f, "device unavailable: {}", msg),
            TrainingError::CheckpointNotFound(path) => {
                write!(f, "no checkpoint found at '{}'", path.display())
            }
            TrainingError::CheckpointCorrupt(msg) => {
                write!(f, "checkpoint could not be decoded: {}", msg)
            }
            TrainingError::NonFiniteLoss { epoch, batch } => write!(
                f,
                "loss became non-finite at epoch {} batch {}; aborting before the checkpoint is corrupted",
                epoch, batch
            ),
            TrainingError::Runtime(msg) => write!(f, "training failed: {}", msg),
        }
    }
}

impl std::error::Error for TrainingError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TrainingError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for TrainingError {
    fn from(value: std::io::Error) -> Self {
        TrainingError::Io(value)
    }
}

impl From<toml::de::Error> for TrainingError {
    fn from(value: toml::de::Error) -> Self {
        TrainingError::ConfigFormat(value.to_string())
    }
}

impl From<serde_json::Error> for TrainingError {
    fn from(value: serde_json::Error) -> Self {
        TrainingError::ConfigFormat(value.to_string())
    }
}
