//! # Backbone Factory
//!
//! Builds the [`MobileNetV2`] feature backbone from pipeline-level settings.

use crate::models::mobilenet_v2::init::WeightInitOptions;
use crate::models::mobilenet_v2::mobilenet_io::CheckpointLayout;
use crate::models::mobilenet_v2::mobilenet_model::{MobileNetV2, MobileNetV2Config};
use burn::config::Config;
use burn::prelude::Backend;

/// Pipeline-level backbone settings.
#[derive(Config, Debug)]
pub struct BackboneConfig {
    /// Disable gradient tracking for the backbone.
    #[config(default = false)]
    pub frozen_mobilenet: bool,

    /// Number of feature maps; must be 4.
    #[config(default = 4)]
    pub backbone_feature_num: usize,

    /// Re-initialize (and optionally load) weights when training.
    #[config(default = true)]
    pub init_weights: bool,

    /// Load the pretrained checkpoint during weight initialization.
    #[config(default = true)]
    pub use_pretrained: bool,

    /// Path to the pretrained checkpoint.
    #[config(default = "None")]
    pub backbone_pretrained_path: Option<String>,

    /// Key layout of the pretrained checkpoint.
    #[config(default = "CheckpointLayout::Legacy")]
    pub checkpoint_layout: CheckpointLayout,

    /// Channel width multiplier.
    #[config(default = 1.0)]
    pub width_mult: f64,
}

impl Default for BackboneConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl BackboneConfig {
    /// The model config.
    pub fn to_mobilenet_config(&self) -> MobileNetV2Config {
        MobileNetV2Config::new()
            .with_width_mult(self.width_mult)
            .with_feature_num(self.backbone_feature_num)
            .with_frozen(self.frozen_mobilenet)
    }

    /// The weight initialization options.
    pub fn weight_init_options(&self) -> WeightInitOptions {
        WeightInitOptions::new()
            .with_use_pretrained(self.use_pretrained)
            .with_pretrained(self.backbone_pretrained_path.clone())
            .with_layout(self.checkpoint_layout)
    }
}

/// Build the backbone.
///
/// Weights are (re-)initialized, and the pretrained checkpoint loaded,
/// only when ``is_train && config.init_weights``.
///
/// # Errors
///
/// If the config is invalid, or weight initialization fails.
pub fn build_backbone<B: Backend>(
    config: &BackboneConfig,
    is_train: bool,
    device: &B::Device,
) -> anyhow::Result<MobileNetV2<B>> {
    let model_config = config.to_mobilenet_config();
    model_config.try_validate().map_err(anyhow::Error::msg)?;

    let model: MobileNetV2<B> = model_config.init(device);
    if is_train && config.init_weights {
        model.init_weights(&config.weight_init_options())
    } else {
        Ok(model)
    }
}
