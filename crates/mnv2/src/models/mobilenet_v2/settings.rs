//! # Stage Settings
//!
//! `MobileNetV2` is described by a table of ``(t, c, n, s)`` rows:
//! expansion ratio, output channels, repeat count, first-block stride.

use crate::compat::activation_wrapper::ActivationConfig;
use crate::models::mobilenet_v2::inverted_residual::InvertedResidualConfig;
use burn::config::Config;

/// One ``(t, c, n, s)`` row of the stage table.
#[derive(Config, Debug, PartialEq, Eq)]
pub struct InvertedResidualSetting {
    /// ``t``: hidden channel expansion ratio.
    pub expand_ratio: usize,

    /// ``c``: output channels, before width scaling.
    pub channels: usize,

    /// ``n``: number of blocks in the stage.
    pub repeats: usize,

    /// ``s``: stride of the first block in the stage.
    pub stride: usize,
}

/// The standard `MobileNetV2` stage table.
pub const MOBILENET_V2_SETTINGS: [InvertedResidualSetting; 7] = [
    InvertedResidualSetting {
        expand_ratio: 1,
        channels: 16,
        repeats: 1,
        stride: 1,
    },
    InvertedResidualSetting {
        expand_ratio: 6,
        channels: 24,
        repeats: 2,
        stride: 2,
    },
    InvertedResidualSetting {
        expand_ratio: 6,
        channels: 32,
        repeats: 3,
        stride: 2,
    },
    InvertedResidualSetting {
        expand_ratio: 6,
        channels: 64,
        repeats: 4,
        stride: 2,
    },
    InvertedResidualSetting {
        expand_ratio: 6,
        channels: 96,
        repeats: 3,
        stride: 1,
    },
    InvertedResidualSetting {
        expand_ratio: 6,
        channels: 160,
        repeats: 3,
        stride: 2,
    },
    InvertedResidualSetting {
        expand_ratio: 6,
        channels: 320,
        repeats: 1,
        stride: 1,
    },
];

/// Scale a channel count by a width multiplier, truncating.
///
/// ``int(channels * width_mult)``
pub fn scale_channels(
    channels: usize,
    width_mult: f64,
) -> usize {
    (channels as f64 * width_mult) as usize
}

impl InvertedResidualSetting {
    /// Output channels of this stage after width scaling.
    pub fn output_channels(
        &self,
        width_mult: f64,
    ) -> usize {
        scale_channels(self.channels, width_mult)
    }

    /// Expand the row into its block configs.
    ///
    /// The first block takes `in_channels` and the row stride;
    /// the rest are stride 1 and channel-preserving.
    pub fn block_configs(
        &self,
        in_channels: usize,
        width_mult: f64,
        act: &ActivationConfig,
    ) -> Vec<InvertedResidualConfig> {
        let out_channels = self.output_channels(width_mult);
        (0..self.repeats)
            .map(|idx| {
                let (in_channels, stride) = if idx == 0 {
                    (in_channels, self.stride)
                } else {
                    (out_channels, 1)
                };
                InvertedResidualConfig::new(in_channels, out_channels)
                    .with_stride(stride)
                    .with_expand_ratio(self.expand_ratio)
                    .with_act(act.clone())
            })
            .collect()
    }
}

/// Expand a stage table into a flat list of block configs.
///
/// # Arguments
///
/// - `in_channels`: channels entering the first stage (the stem width).
/// - `settings`: the stage table.
/// - `width_mult`: channel width multiplier.
/// - `act`: activation for the expansion and depthwise convs.
pub fn expand_settings(
    in_channels: usize,
    settings: &[InvertedResidualSetting],
    width_mult: f64,
    act: &ActivationConfig,
) -> Vec<InvertedResidualConfig> {
    let mut in_channels = in_channels;
    let mut blocks = Vec::new();
    for setting in settings {
        blocks.extend(setting.block_configs(in_channels, width_mult, act));
        in_channels = setting.output_channels(width_mult);
    }
    blocks
}
