//! # Block Config Builders and Parameter Initialization
//!
//! Every convolution built here is bias-free and drawn from
//! ``Normal(0, sqrt(2 / (kernel_h * kernel_w * out_channels)))``;
//! every norm layer starts at ``gamma = 1, beta = 0``.
//!
//! Note that the fan is ``kernel area * out_channels`` regardless of groups,
//! so depthwise convs are *not* drawn with `burn`'s fan-out Kaiming rule.

use crate::compat::activation_wrapper::ActivationConfig;
use crate::layers::blocks::cna::CNA2dConfig;
use crate::layers::blocks::conv_norm::ConvNorm2dConfig;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{BatchNorm, Initializer, PaddingConfig2d};
use burn::prelude::Backend;

/// The conv weight initializer for a given kernel and output width.
///
/// ```text
/// n = kernel_h * kernel_w * out_channels
/// w ~ Normal(0, sqrt(2 / n))
/// ```
pub fn conv_normal_initializer(
    kernel_size: [usize; 2],
    out_channels: usize,
) -> Initializer {
    let n = kernel_size[0] * kernel_size[1] * out_channels;
    Initializer::Normal {
        mean: 0.0,
        std: (2.0 / n as f64).sqrt(),
    }
}

/// A square, bias-free, "same"-padded [`Conv2dConfig`].
///
/// # Arguments
///
/// - `channels`: ``[in_channels, out_channels]``.
/// - `kernel_size`: the (odd) kernel size.
/// - `stride`: the stride.
/// - `groups`: the number of groups.
pub fn conv2d_config(
    channels: [usize; 2],
    kernel_size: usize,
    stride: usize,
    groups: usize,
) -> Conv2dConfig {
    let padding = kernel_size / 2;
    Conv2dConfig::new(channels, [kernel_size, kernel_size])
        .with_stride([stride, stride])
        .with_padding(PaddingConfig2d::Explicit(padding, padding))
        .with_groups(groups)
        .with_bias(false)
        .with_initializer(conv_normal_initializer(
            [kernel_size, kernel_size],
            channels[1],
        ))
}

/// ``3x3 conv (pad 1) + BN + act``.
pub fn conv_3x3_bn(
    in_channels: usize,
    out_channels: usize,
    stride: usize,
    act: ActivationConfig,
) -> CNA2dConfig {
    CNA2dConfig::new(conv2d_config([in_channels, out_channels], 3, stride, 1)).with_act(act)
}

/// ``1x1 conv + BN + act``.
pub fn conv_1x1_bn(
    in_channels: usize,
    out_channels: usize,
    act: ActivationConfig,
) -> CNA2dConfig {
    CNA2dConfig::new(conv2d_config([in_channels, out_channels], 1, 1, 1)).with_act(act)
}

/// ``3x3 depthwise conv (pad 1, groups = channels) + BN + act``.
pub fn depthwise_3x3_bn(
    channels: usize,
    stride: usize,
    act: ActivationConfig,
) -> CNA2dConfig {
    CNA2dConfig::new(conv2d_config([channels, channels], 3, stride, channels)).with_act(act)
}

/// ``1x1 conv + BN``; no activation.
pub fn linear_1x1_bn(
    in_channels: usize,
    out_channels: usize,
) -> ConvNorm2dConfig {
    conv2d_config([in_channels, out_channels], 1, 1, 1).into()
}

/// Redraw a [`Conv2d`]'s parameters.
///
/// The weight is drawn from [`conv_normal_initializer`], the bias (if any) is zeroed.
/// Redrawn parameters track gradients.
pub fn reset_conv2d<B: Backend>(mut conv: Conv2d<B>) -> Conv2d<B> {
    let device = conv.weight.device();
    let [out_channels, _, kernel_h, kernel_w] = conv.weight.dims();

    conv.weight = conv_normal_initializer([kernel_h, kernel_w], out_channels)
        .init(conv.weight.shape(), &device);
    conv.bias = conv
        .bias
        .map(|bias| Initializer::Zeros.init(bias.shape(), &device));
    conv
}

/// Reset a [`BatchNorm`]'s affine parameters to ``gamma = 1, beta = 0``.
///
/// Running statistics are left alone.
pub fn reset_batch_norm<B: Backend>(mut norm: BatchNorm<B, 2>) -> BatchNorm<B, 2> {
    let device = norm.gamma.device();

    norm.gamma = Initializer::Ones.init(norm.gamma.shape(), &device);
    norm.beta = Initializer::Zeros.init(norm.beta.shape(), &device);
    norm
}
