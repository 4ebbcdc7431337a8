//! # `ConvNorm2d` Module
//!
//! A [`ConvNorm2d`] module is a [`Conv2d`] layer followed by a [`BatchNorm`] layer,
//! with no activation. Inverted residual blocks end in one of these
//! (the "linear bottleneck").

use crate::layers::blocks::init::{reset_batch_norm, reset_conv2d};
use crate::layers::blocks::{Conv2dBlockMeta, delegate_conv_meta};
use bimm_contracts::{ShapeContract, run_every_nth, shape_contract};
use burn::config::Config;
use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig};
use burn::prelude::{Backend, Tensor};

/// [`ConvNorm2d`] Config.
///
/// Implements [`Conv2dBlockMeta`].
#[derive(Config, Debug)]
pub struct ConvNorm2dConfig {
    /// The [`Conv2d`] config.
    pub conv: Conv2dConfig,
}

impl Conv2dBlockMeta for ConvNorm2dConfig {
    delegate_conv_meta!(Conv2dConfig);
}

impl From<Conv2dConfig> for ConvNorm2dConfig {
    fn from(conv: Conv2dConfig) -> Self {
        Self { conv }
    }
}

impl ConvNorm2dConfig {
    /// Initialize a [`ConvNorm2d`].
    ///
    /// The norm layer is sized to the conv output channels.
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> ConvNorm2d<B> {
        ConvNorm2d {
            norm: BatchNormConfig::new(self.out_channels()).init(device),
            conv: self.conv.init(device),
        }
    }
}

/// [`Conv2d`] and [`BatchNorm`] layer.
///
/// Implements [`Conv2dBlockMeta`].
#[derive(Module, Debug)]
pub struct ConvNorm2d<B: Backend> {
    /// Internal Conv2d layer.
    pub conv: Conv2d<B>,

    /// Internal Norm Layer.
    pub norm: BatchNorm<B, 2>,
}

impl<B: Backend> Conv2dBlockMeta for ConvNorm2d<B> {
    delegate_conv_meta!(Conv2d<B>);
}

impl<B: Backend> ConvNorm2d<B> {
    /// Redraw the conv weights and reset the norm affine parameters.
    pub fn reset_parameters(self) -> Self {
        Self {
            conv: reset_conv2d(self.conv),
            norm: reset_batch_norm(self.norm),
        }
    }

    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, in_height, in_width]``.
    ///
    /// # Returns
    ///
    /// ``[batch, out_channels, out_height, out_width]``
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        static INPUT_CONTRACT: ShapeContract =
            shape_contract!["batch", "in_channels", "in_height", "in_width"];
        let [batch, in_height, in_width] = INPUT_CONTRACT.unpack_shape(
            &input,
            &["batch", "in_height", "in_width"],
            &[("in_channels", self.in_channels())],
        );
        let [out_height, out_width] = self.output_resolution([in_height, in_width]);

        let x = self.conv.forward(input);
        let x = self.norm.forward(x);

        run_every_nth!({
            static OUTPUT_CONTRACT: ShapeContract =
                shape_contract!["batch", "out_channels", "out_height", "out_width"];
            OUTPUT_CONTRACT.assert_shape(
                &x,
                &[
                    ("batch", batch),
                    ("out_channels", self.out_channels()),
                    ("out_height", out_height),
                    ("out_width", out_width),
                ],
            );
        });

        x
    }
}
