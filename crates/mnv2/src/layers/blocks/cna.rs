//! # `CNA2d` - conv/norm/activation block.
//!
//! A [`CNA2d`] module is:
//! * a [`Conv2d`] layer,
//! * a [`BatchNorm`] layer,
//! * an [`Activation`] layer.
//!
//! With support for hooking the forward method,
//! to run code between the norm and activation layers.

use crate::compat::activation_wrapper::{Activation, ActivationConfig};
use crate::layers::blocks::init::{reset_batch_norm, reset_conv2d};
use crate::layers::blocks::{Conv2dBlockMeta, delegate_conv_meta};
use bimm_contracts::{ShapeContract, run_every_nth, shape_contract};
use burn::config::Config;
use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig};
use burn::prelude::{Backend, Tensor};

/// [`CNA2d`] Config.
///
/// Implements [`Conv2dBlockMeta`].
#[derive(Config, Debug)]
pub struct CNA2dConfig {
    /// The [`Conv2d`] config.
    pub conv: Conv2dConfig,

    /// The [`Activation`] config.
    #[config(default = "ActivationConfig::Relu6")]
    pub act: ActivationConfig,
}

impl Conv2dBlockMeta for CNA2dConfig {
    delegate_conv_meta!(Conv2dConfig);
}

impl From<Conv2dConfig> for CNA2dConfig {
    fn from(conv: Conv2dConfig) -> Self {
        Self::new(conv)
    }
}

impl CNA2dConfig {
    /// Initialize a [`CNA2d`].
    ///
    /// The norm layer is sized to the conv output channels.
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> CNA2d<B> {
        CNA2d {
            norm: BatchNormConfig::new(self.out_channels()).init(device),
            act: self.act.init(device),
            conv: self.conv.init(device),
        }
    }
}

/// Sequenced conv/norm/activation block.
///
/// Implements [`Conv2dBlockMeta`].
#[derive(Module, Debug)]
pub struct CNA2d<B: Backend> {
    /// Internal Conv2d layer.
    pub conv: Conv2d<B>,

    /// Internal Norm Layer.
    pub norm: BatchNorm<B, 2>,

    /// Activation layer.
    pub act: Activation<B>,
}

impl<B: Backend> Conv2dBlockMeta for CNA2d<B> {
    delegate_conv_meta!(Conv2d<B>);
}

impl<B: Backend> CNA2d<B> {
    /// Redraw the conv weights and reset the norm affine parameters.
    pub fn reset_parameters(self) -> Self {
        Self {
            conv: reset_conv2d(self.conv),
            norm: reset_batch_norm(self.norm),
            act: self.act,
        }
    }

    /// Forward Pass.
    ///
    /// ```rust,ignore
    /// let x = self.conv.forward(input);
    /// let x = self.norm.forward(x);
    /// let x = self.act.forward(x);
    /// return x
    /// ```
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
        self.hook_forward(input, |x| x)
    }

    /// Hooked Forward Pass.
    ///
    /// Applies the hook after normalization but before activation.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, in_height, in_width]``.
    /// - `hook`: shape-preserving map.
    ///
    /// # Returns
    ///
    /// ``[batch, out_channels, out_height, out_width]``
    pub fn hook_forward<F>(
        &self,
        input: Tensor<B, 4>,
        hook: F,
    ) -> Tensor<B, 4>
    where
        F: FnOnce(Tensor<B, 4>) -> Tensor<B, 4>,
    {
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
        let x = hook(x);
        let x = self.act.forward(x);

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
