//! # `MobileNetV2` Feature Model
//!
//! Layer indexing follows the classic ``features`` list:
//! ``features[0]`` is the stride-2 stem, ``features[i]`` for ``i >= 1``
//! is ``blocks[i - 1]``.
//!
//! The four feature maps are tapped after ``features[3]``, ``features[6]``,
//! ``features[13]`` and ``features[16]``; blocks deeper than the last tap
//! are never built.

use crate::compat::activation_wrapper::ActivationConfig;
use crate::layers::blocks::Conv2dBlockMeta;
use crate::layers::blocks::cna::CNA2d;
use crate::layers::blocks::init::conv_3x3_bn;
use crate::models::mobilenet_v2::inverted_residual::{
    InvertedResidual, InvertedResidualConfig, InvertedResidualMeta,
};
use crate::models::mobilenet_v2::settings::{
    InvertedResidualSetting, MOBILENET_V2_SETTINGS, expand_settings, scale_channels,
};
use bimm_contracts::{ShapeContract, run_every_nth, shape_contract};
use burn::config::Config;
use burn::module::Module;
use burn::prelude::{Backend, Tensor};

/// Number of feature maps produced.
pub const MOBILENET_V2_FEATURE_NUM: usize = 4;

/// ``features[]`` indices of the stride 4, 8, 16, 32 taps.
pub const MOBILENET_V2_FEATURE_TAPS: [usize; MOBILENET_V2_FEATURE_NUM] = [3, 6, 13, 16];

/// Expected output strides of the taps.
pub const MOBILENET_V2_FEATURE_STRIDES: [usize; MOBILENET_V2_FEATURE_NUM] = [4, 8, 16, 32];

/// Width of the (unbuilt) classifier head conv.
pub const MOBILENET_V2_LAST_CHANNEL: usize = 1280;

/// Stride of the stem conv.
pub const MOBILENET_V2_STEM_STRIDE: usize = 2;

/// [`MobileNetV2`] Config.
#[derive(Config, Debug)]
pub struct MobileNetV2Config {
    /// Input image channels.
    #[config(default = 3)]
    pub in_channels: usize,

    /// Channel width multiplier.
    #[config(default = 1.0)]
    pub width_mult: f64,

    /// Stem output channels, before width scaling.
    #[config(default = 32)]
    pub stem_channels: usize,

    /// The ``(t, c, n, s)`` stage table.
    #[config(default = "MOBILENET_V2_SETTINGS.to_vec()")]
    pub settings: Vec<InvertedResidualSetting>,

    /// Number of feature maps; must be 4.
    #[config(default = 4)]
    pub feature_num: usize,

    /// ``features[]`` indices to tap.
    #[config(default = "MOBILENET_V2_FEATURE_TAPS")]
    pub feature_taps: [usize; MOBILENET_V2_FEATURE_NUM],

    /// Disable gradient tracking for every parameter.
    #[config(default = false)]
    pub frozen: bool,

    /// Activation for the stem, expansion and depthwise convs.
    #[config(default = "ActivationConfig::Relu6")]
    pub act: ActivationConfig,
}

impl Default for MobileNetV2Config {
    fn default() -> Self {
        Self::new()
    }
}

impl MobileNetV2Config {
    /// Stem output channels, after width scaling.
    pub fn stem_out_channels(&self) -> usize {
        scale_channels(self.stem_channels, self.width_mult)
    }

    /// Width of the classifier head conv.
    ///
    /// Only scaled up, never down. Not part of the feature model.
    pub fn last_channel(&self) -> usize {
        if self.width_mult > 1.0 {
            scale_channels(MOBILENET_V2_LAST_CHANNEL, self.width_mult)
        } else {
            MOBILENET_V2_LAST_CHANNEL
        }
    }

    /// Every block config in the stage table.
    pub fn block_configs(&self) -> Vec<InvertedResidualConfig> {
        expand_settings(
            self.stem_out_channels(),
            &self.settings,
            self.width_mult,
            &self.act,
        )
    }

    /// The block configs which are built; those up to the deepest tap.
    pub fn feature_block_configs(&self) -> Vec<InvertedResidualConfig> {
        let mut blocks = self.block_configs();
        blocks.truncate(self.feature_taps[MOBILENET_V2_FEATURE_NUM - 1]);
        blocks
    }

    /// Channels of each tapped feature map.
    ///
    /// # Panics
    ///
    /// If a tap is out of range.
    pub fn feature_channels(&self) -> [usize; MOBILENET_V2_FEATURE_NUM] {
        let blocks = self.block_configs();
        self.feature_taps.map(|tap| blocks[tap - 1].out_channels())
    }

    /// Cumulative stride at each tapped feature map.
    ///
    /// # Panics
    ///
    /// If a tap is out of range.
    pub fn feature_strides(&self) -> [usize; MOBILENET_V2_FEATURE_NUM] {
        let strides = layer_strides(
            self.block_configs()
                .iter()
                .map(InvertedResidualMeta::stride),
        );
        self.feature_taps.map(|tap| strides[tap])
    }

    /// Check the config.
    pub fn try_validate(&self) -> Result<(), String> {
        if self.feature_num != MOBILENET_V2_FEATURE_NUM {
            return Err(format!(
                "feature_num must be {}: {}",
                MOBILENET_V2_FEATURE_NUM, self.feature_num
            ));
        }
        if !(self.width_mult.is_finite() && self.width_mult > 0.0) {
            return Err(format!("width_mult must be positive: {}", self.width_mult));
        }
        if self.in_channels == 0 {
            return Err("in_channels must be positive".to_string());
        }
        if self.stem_out_channels() == 0 {
            return Err(format!(
                "stem has no channels at width_mult {}",
                self.width_mult
            ));
        }

        let blocks = self.block_configs();
        for (idx, block) in blocks.iter().enumerate() {
            block
                .try_validate()
                .map_err(|err| format!("features[{}]: {}", idx + 1, err))?;
        }

        let taps = &self.feature_taps;
        if taps[0] == 0 || taps.windows(2).any(|w| w[0] >= w[1]) {
            return Err(format!(
                "feature_taps must be strictly increasing block indices: {:?}",
                taps
            ));
        }
        if taps[MOBILENET_V2_FEATURE_NUM - 1] > blocks.len() {
            return Err(format!(
                "feature_taps {:?} exceed the {} available layers",
                taps,
                blocks.len() + 1
            ));
        }

        let strides = self.feature_strides();
        if strides != MOBILENET_V2_FEATURE_STRIDES {
            return Err(format!(
                "feature_taps {:?} have strides {:?}, expected {:?}",
                taps, strides, MOBILENET_V2_FEATURE_STRIDES
            ));
        }

        Ok(())
    }

    /// Check the config, panicking on error.
    pub fn expect_valid(&self) {
        if let Err(err) = self.try_validate() {
            panic!("{}", err);
        }
    }

    /// Initialize a [`MobileNetV2`].
    ///
    /// # Panics
    ///
    /// If the config is invalid.
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> MobileNetV2<B> {
        self.expect_valid();

        let blocks = self.feature_block_configs();
        tracing::debug!(
            width_mult = self.width_mult,
            blocks = blocks.len(),
            taps = ?self.feature_taps,
            "building MobileNetV2"
        );

        let model = MobileNetV2 {
            stem: conv_3x3_bn(
                self.in_channels,
                self.stem_out_channels(),
                MOBILENET_V2_STEM_STRIDE,
                self.act.clone(),
            )
            .init(device),
            blocks: blocks.into_iter().map(|b| b.init(device)).collect(),
            feature_taps: self.feature_taps,
            frozen: false,
        };

        if self.frozen { model.freeze() } else { model }
    }
}

/// Cumulative stride at each ``features[]`` index, given the block strides.
fn layer_strides<I>(block_strides: I) -> Vec<usize>
where
    I: IntoIterator<Item = usize>,
{
    let mut strides = vec![MOBILENET_V2_STEM_STRIDE];
    for stride in block_strides {
        let last = strides[strides.len() - 1];
        strides.push(last * stride);
    }
    strides
}

/// The four feature maps of a [`MobileNetV2`] forward pass.
#[derive(Debug, Clone)]
pub struct MobileNetV2Features<B: Backend> {
    /// ``[batch, c4, ceil(h / 4), ceil(w / 4)]``
    pub stride_4: Tensor<B, 4>,

    /// ``[batch, c8, ceil(h / 8), ceil(w / 8)]``
    pub stride_8: Tensor<B, 4>,

    /// ``[batch, c16, ceil(h / 16), ceil(w / 16)]``
    pub stride_16: Tensor<B, 4>,

    /// ``[batch, c32, ceil(h / 32), ceil(w / 32)]``
    pub stride_32: Tensor<B, 4>,
}

impl<B: Backend> From<[Tensor<B, 4>; MOBILENET_V2_FEATURE_NUM]> for MobileNetV2Features<B> {
    fn from(features: [Tensor<B, 4>; MOBILENET_V2_FEATURE_NUM]) -> Self {
        let [stride_4, stride_8, stride_16, stride_32] = features;
        Self {
            stride_4,
            stride_8,
            stride_16,
            stride_32,
        }
    }
}

impl<B: Backend> MobileNetV2Features<B> {
    /// The features, finest first.
    pub fn into_array(self) -> [Tensor<B, 4>; MOBILENET_V2_FEATURE_NUM] {
        [self.stride_4, self.stride_8, self.stride_16, self.stride_32]
    }

    /// The feature dims, finest first.
    pub fn dims(&self) -> [[usize; 4]; MOBILENET_V2_FEATURE_NUM] {
        [
            self.stride_4.dims(),
            self.stride_8.dims(),
            self.stride_16.dims(),
            self.stride_32.dims(),
        ]
    }
}

/// `MobileNetV2` feature backbone.
#[derive(Module, Debug)]
pub struct MobileNetV2<B: Backend> {
    /// ``features[0]``: stride-2 ``3x3 conv + BN + act``.
    pub stem: CNA2d<B>,

    /// ``features[1..]``.
    pub blocks: Vec<InvertedResidual<B>>,

    /// ``features[]`` indices to tap.
    pub feature_taps: [usize; MOBILENET_V2_FEATURE_NUM],

    /// Whether gradients are disabled.
    pub frozen: bool,
}

impl<B: Backend> MobileNetV2<B> {
    /// Input image channels.
    pub fn in_channels(&self) -> usize {
        self.stem.in_channels()
    }

    /// Number of built ``features[]`` layers, including the stem.
    pub fn num_layers(&self) -> usize {
        self.blocks.len() + 1
    }

    /// Is gradient tracking disabled?
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Disable gradient tracking for every parameter.
    pub fn freeze(self) -> Self {
        Self {
            frozen: true,
            ..self
        }
        .no_grad()
    }

    /// Re-apply [`Self::freeze`] if the model is marked frozen.
    ///
    /// Used after parameters have been replaced.
    pub fn refreeze(self) -> Self {
        if self.frozen { self.freeze() } else { self }
    }

    /// Channels of each tapped feature map.
    pub fn feature_channels(&self) -> [usize; MOBILENET_V2_FEATURE_NUM] {
        self.feature_taps
            .map(|tap| self.blocks[tap - 1].out_channels())
    }

    /// Cumulative stride at each tapped feature map.
    pub fn feature_strides(&self) -> [usize; MOBILENET_V2_FEATURE_NUM] {
        let strides = layer_strides(self.blocks.iter().map(InvertedResidualMeta::stride));
        self.feature_taps.map(|tap| strides[tap])
    }

    /// Spatial resolution of each tapped feature map.
    ///
    /// # Arguments
    ///
    /// - `input_resolution`: ``[height, width]`` of the input image.
    ///
    /// # Returns
    ///
    /// ``[[height, width]; 4]``, finest first.
    pub fn feature_resolutions(
        &self,
        input_resolution: [usize; 2],
    ) -> [[usize; 2]; MOBILENET_V2_FEATURE_NUM] {
        let mut resolutions = vec![self.stem.output_resolution(input_resolution)];
        for block in &self.blocks {
            let last = resolutions[resolutions.len() - 1];
            resolutions.push(block.output_resolution(last));
        }
        self.feature_taps.map(|tap| resolutions[tap])
    }

    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, height, width]``.
    ///
    /// # Returns
    ///
    /// The stride 4, 8, 16 and 32 feature maps.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> MobileNetV2Features<B> {
        static INPUT_CONTRACT: ShapeContract =
            shape_contract!["batch", "in_channels", "height", "width"];
        let [batch, height, width] = INPUT_CONTRACT.unpack_shape(
            &input,
            &["batch", "height", "width"],
            &[("in_channels", self.in_channels())],
        );

        let mut x = self.stem.forward(input);
        let mut layer = 1;
        let features = self.feature_taps.map(|tap| {
            for block in &self.blocks[layer - 1..tap] {
                x = block.forward(x.clone());
            }
            layer = tap + 1;
            x.clone()
        });

        run_every_nth!({
            static FEATURE_CONTRACT: ShapeContract =
                shape_contract!["batch", "channels", "height", "width"];
            let channels = self.feature_channels();
            let resolutions = self.feature_resolutions([height, width]);
            for (idx, feature) in features.iter().enumerate() {
                FEATURE_CONTRACT.assert_shape(
                    feature,
                    &[
                        ("batch", batch),
                        ("channels", channels[idx]),
                        ("height", resolutions[idx][0]),
                        ("width", resolutions[idx][1]),
                    ],
                );
            }
        });

        features.into()
    }
}
