//! # Convolution Blocks
//!
//! * [`conv_norm`] - ``Conv2d + BatchNorm2d``, the linear projection block.
//! * [`cna`] - ``Conv2d + BatchNorm2d + Activation``.
//! * [`init`] - config builders and parameter (re-)initialization.
//!
//! Both block types share the [`Conv2dBlockMeta`] API.

use crate::compat::conv_shape::expect_conv_output_shape;
use burn::nn::PaddingConfig2d;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::prelude::Backend;

pub mod cna;
pub mod conv_norm;
pub mod init;

/// Resolve a [`PaddingConfig2d`] to explicit per-side padding.
pub fn explicit_padding(
    padding: &PaddingConfig2d,
    kernel_size: [usize; 2],
) -> [usize; 2] {
    match padding {
        PaddingConfig2d::Valid => [0, 0],
        PaddingConfig2d::Same => [(kernel_size[0] - 1) / 2, (kernel_size[1] - 1) / 2],
        PaddingConfig2d::Explicit(height, width) => [*height, *width],
    }
}

/// Common meta API for conv-led blocks; and their configs.
pub trait Conv2dBlockMeta {
    /// Number of input channels.
    fn in_channels(&self) -> usize;

    /// Number of output channels.
    fn out_channels(&self) -> usize;

    /// Number of groups.
    fn groups(&self) -> usize;

    /// Kernel size.
    fn kernel_size(&self) -> [usize; 2];

    /// Get the stride.
    fn stride(&self) -> [usize; 2];

    /// Explicit padding.
    fn padding(&self) -> [usize; 2];

    /// Dilation.
    fn dilation(&self) -> [usize; 2];

    /// Is this a depthwise convolution?
    fn is_depthwise(&self) -> bool {
        self.groups() > 1 && self.groups() == self.in_channels()
    }

    /// Get the output resolution for a given input resolution.
    ///
    /// # Arguments
    ///
    /// - `input_resolution`: ``[in_height, in_width]``.
    ///
    /// # Returns
    ///
    /// ``[out_height, out_width]``
    ///
    /// # Panics
    ///
    /// If the convolution has no legal output for the input.
    fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2] {
        expect_conv_output_shape(
            input_resolution,
            self.kernel_size(),
            self.stride(),
            self.padding(),
            self.dilation(),
        )
    }
}

impl Conv2dBlockMeta for Conv2dConfig {
    fn in_channels(&self) -> usize {
        self.channels[0]
    }

    fn out_channels(&self) -> usize {
        self.channels[1]
    }

    fn groups(&self) -> usize {
        self.groups
    }

    fn kernel_size(&self) -> [usize; 2] {
        self.kernel_size
    }

    fn stride(&self) -> [usize; 2] {
        self.stride
    }

    fn padding(&self) -> [usize; 2] {
        explicit_padding(&self.padding, self.kernel_size)
    }

    fn dilation(&self) -> [usize; 2] {
        self.dilation
    }
}

impl<B: Backend> Conv2dBlockMeta for Conv2d<B> {
    fn in_channels(&self) -> usize {
        self.weight.dims()[1] * self.groups
    }

    fn out_channels(&self) -> usize {
        self.weight.dims()[0]
    }

    fn groups(&self) -> usize {
        self.groups
    }

    fn kernel_size(&self) -> [usize; 2] {
        self.kernel_size
    }

    fn stride(&self) -> [usize; 2] {
        self.stride
    }

    fn padding(&self) -> [usize; 2] {
        explicit_padding(&self.padding.0, self.kernel_size)
    }

    fn dilation(&self) -> [usize; 2] {
        self.dilation
    }
}

/// Implement [`Conv2dBlockMeta`] by delegating to a `conv` field.
macro_rules! delegate_conv_meta {
    ($target:ty) => {
        fn in_channels(&self) -> usize {
            <$target as $crate::layers::blocks::Conv2dBlockMeta>::in_channels(&self.conv)
        }

        fn out_channels(&self) -> usize {
            <$target as $crate::layers::blocks::Conv2dBlockMeta>::out_channels(&self.conv)
        }

        fn groups(&self) -> usize {
            <$target as $crate::layers::blocks::Conv2dBlockMeta>::groups(&self.conv)
        }

        fn kernel_size(&self) -> [usize; 2] {
            <$target as $crate::layers::blocks::Conv2dBlockMeta>::kernel_size(&self.conv)
        }

        fn stride(&self) -> [usize; 2] {
            <$target as $crate::layers::blocks::Conv2dBlockMeta>::stride(&self.conv)
        }

        fn padding(&self) -> [usize; 2] {
            <$target as $crate::layers::blocks::Conv2dBlockMeta>::padding(&self.conv)
        }

        fn dilation(&self) -> [usize; 2] {
            <$target as $crate::layers::blocks::Conv2dBlockMeta>::dilation(&self.conv)
        }
    };
}
pub(crate) use delegate_conv_meta;
