use candle_core::{Device, Error, Result};

/// Dropout presets for the light CNN family. The digit encodes the drop
/// probability in tenths; `Drop0` disables dropout entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    Drop0,
    Drop1,
    Drop4,
    Drop6,
    Drop8,
}

impl Variant {
    pub fn dropout_p(&self) -> f32 {
        match self {
            Variant::Drop0 => 0.0,
            Variant::Drop1 => 0.1,
            Variant::Drop4 => 0.4,
            Variant::Drop6 => 0.6,
            Variant::Drop8 => 0.8,
        }
    }

    /// Short identifier used to name checkpoint files.
    pub fn tag(&self) -> &'static str {
        match self {
            Variant::Drop0 => "drop0",
            Variant::Drop1 => "drop1",
            Variant::Drop4 => "drop4",
            Variant::Drop6 => "drop6",
            Variant::Drop8 => "drop8",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "drop0" => Some(Variant::Drop0),
            "drop1" => Some(Variant::Drop1),
            "drop4" => Some(Variant::Drop4),
            "drop6" => Some(Variant::Drop6),
            "drop8" => Some(Variant::Drop8),
            _ => None,
        }
    }
}

/// High-level configuration for assembling a light CNN regressor.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub variant: Variant,
    pub in_channels: usize,
    pub image_height: usize,
    pub image_width: usize,
    pub target_dim: usize,
    pub device: Device,
}

impl ModelConfig {
    /// Validate structural invariants before any layer is allocated.
    pub fn validate(&self) -> Result<()> {
        if self.in_channels == 0 {
            return Err(Error::Msg("in_channels must be greater than zero".into()));
        }
        if self.target_dim == 0 {
            return Err(Error::Msg("target_dim must be greater than zero".into()));
        }
        // Three pooling stages each halve the spatial extent.
        if self.image_height % 8 != 0 || self.image_width % 8 != 0 {
            return Err(Error::Msg(format!(
                "image dimensions must be divisible by 8 (got {}x{})",
                self.image_height, self.image_width
            )));
        }
        if self.image_height == 0 || self.image_width == 0 {
            return Err(Error::Msg("image dimensions must be non-zero".into()));
        }
        Ok(())
    }
}
