//! # Weight Initialization
//!
//! Every conv is redrawn from ``Normal(0, sqrt(2 / (k * k * out_channels)))``
//! with zero bias; every norm is reset to ``gamma = 1, beta = 0``.
//! Optionally, a ``torch`` checkpoint is then loaded over the top.

use crate::models::mobilenet_v2::mobilenet_io::CheckpointLayout;
use crate::models::mobilenet_v2::mobilenet_model::MobileNetV2;
use anyhow::bail;
use burn::config::Config;
use burn::prelude::Backend;
use std::path::PathBuf;

/// Options for [`MobileNetV2::init_weights`].
#[derive(Config, Debug)]
pub struct WeightInitOptions {
    /// Load a pretrained checkpoint after re-initialization.
    #[config(default = true)]
    pub use_pretrained: bool,

    /// Path to the pretrained checkpoint.
    #[config(default = "None")]
    pub pretrained: Option<String>,

    /// Key layout of the pretrained checkpoint.
    #[config(default = "CheckpointLayout::Legacy")]
    pub layout: CheckpointLayout,
}

impl Default for WeightInitOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> MobileNetV2<B> {
    /// Redraw every conv and reset every norm.
    ///
    /// The model's frozen state is preserved.
    pub fn reset_parameters(self) -> Self {
        Self {
            stem: self.stem.reset_parameters(),
            blocks: self
                .blocks
                .into_iter()
                .map(|block| block.reset_parameters())
                .collect(),
            ..self
        }
        .refreeze()
    }

    /// Re-initialize the weights, and optionally load a pretrained checkpoint.
    ///
    /// # Errors
    ///
    /// If `use_pretrained` is set and the checkpoint does not exist,
    /// or the checkpoint cannot be loaded onto this model.
    pub fn init_weights(
        self,
        options: &WeightInitOptions,
    ) -> anyhow::Result<Self> {
        let model = self.reset_parameters();

        if !options.use_pretrained {
            tracing::info!("=> no mobilenet_v2 imagenet pretrained model; using initialized weights");
            return Ok(model);
        }

        let path = PathBuf::from(options.pretrained.clone().unwrap_or_default());
        if !path.exists() {
            bail!("{} does not exist", path.display());
        }
        tracing::info!(
            "==> NOTE: loading mobilenet_v2 pretrained model {}",
            path.display()
        );

        model.load_pytorch_weights(path, options.layout)
    }
}
