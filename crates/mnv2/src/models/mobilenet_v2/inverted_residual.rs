//! # Inverted Residual Block
//!
//! The `MobileNetV2` building block:
//!
//! ```text
//! x -> [1x1 expand + BN + act] -> 3x3 depthwise + BN + act -> 1x1 project + BN -> (+ x)
//! ```
//!
//! The expansion conv is omitted when ``expand_ratio == 1``;
//! the identity shortcut is used only when ``stride == 1`` and the
//! block preserves channel count.

use crate::compat::activation_wrapper::ActivationConfig;
use crate::layers::blocks::Conv2dBlockMeta;
use crate::layers::blocks::cna::CNA2d;
use crate::layers::blocks::conv_norm::ConvNorm2d;
use crate::layers::blocks::init::{conv_1x1_bn, depthwise_3x3_bn, linear_1x1_bn};
use bimm_contracts::{ShapeContract, run_every_nth, shape_contract};
use burn::config::Config;
use burn::module::Module;
use burn::prelude::{Backend, Tensor};

/// Common meta API for [`InvertedResidual`] and [`InvertedResidualConfig`].
pub trait InvertedResidualMeta {
    /// Number of input channels.
    fn in_channels(&self) -> usize;

    /// Number of output channels.
    fn out_channels(&self) -> usize;

    /// Stride of the depthwise conv.
    fn stride(&self) -> usize;

    /// Hidden channel expansion ratio.
    fn expand_ratio(&self) -> usize;

    /// Number of hidden (depthwise) channels.
    fn hidden_channels(&self) -> usize {
        self.in_channels() * self.expand_ratio()
    }

    /// Does the block have a 1x1 expansion conv?
    fn has_expansion(&self) -> bool {
        self.expand_ratio() != 1
    }

    /// Does the block add an identity shortcut?
    fn use_residual(&self) -> bool {
        self.stride() == 1 && self.in_channels() == self.out_channels()
    }

    /// Get the output resolution for a given input resolution.
    ///
    /// Each spatial dim becomes ``ceil(dim / stride)``.
    fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2] {
        let stride = self.stride();
        input_resolution.map(|dim| dim.div_ceil(stride))
    }
}

/// [`InvertedResidual`] Config.
#[derive(Config, Debug)]
pub struct InvertedResidualConfig {
    /// Input channels.
    pub in_channels: usize,

    /// Output channels.
    pub out_channels: usize,

    /// Depthwise stride; 1 or 2.
    #[config(default = 1)]
    pub stride: usize,

    /// Hidden channel expansion ratio.
    #[config(default = 1)]
    pub expand_ratio: usize,

    /// Activation for the expansion and depthwise convs.
    #[config(default = "ActivationConfig::Relu6")]
    pub act: ActivationConfig,
}

impl InvertedResidualMeta for InvertedResidualConfig {
    fn in_channels(&self) -> usize {
        self.in_channels
    }

    fn out_channels(&self) -> usize {
        self.out_channels
    }

    fn stride(&self) -> usize {
        self.stride
    }

    fn expand_ratio(&self) -> usize {
        self.expand_ratio
    }
}

impl InvertedResidualConfig {
    /// Check the config.
    pub fn try_validate(&self) -> Result<(), String> {
        if self.in_channels == 0 || self.out_channels == 0 {
            return Err(format!(
                "channels must be positive: in_channels={}, out_channels={}",
                self.in_channels, self.out_channels
            ));
        }
        if !matches!(self.stride, 1 | 2) {
            return Err(format!("stride must be 1 or 2: {}", self.stride));
        }
        if self.expand_ratio == 0 {
            return Err("expand_ratio must be positive".to_string());
        }
        Ok(())
    }

    /// Check the config, panicking on error.
    pub fn expect_valid(&self) {
        if let Err(err) = self.try_validate() {
            panic!("{}", err);
        }
    }

    /// Initialize an [`InvertedResidual`].
    ///
    /// # Panics
    ///
    /// If the config is invalid.
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> InvertedResidual<B> {
        self.expect_valid();

        let hidden = self.hidden_channels();
        let expand = if self.has_expansion() {
            Some(conv_1x1_bn(self.in_channels, hidden, self.act.clone()).init(device))
        } else {
            None
        };

        InvertedResidual {
            expand,
            depthwise: depthwise_3x3_bn(hidden, self.stride, self.act.clone()).init(device),
            project: linear_1x1_bn(hidden, self.out_channels).init(device),
        }
    }
}

/// Inverted residual (linear bottleneck) block.
///
/// Implements [`InvertedResidualMeta`].
#[derive(Module, Debug)]
pub struct InvertedResidual<B: Backend> {
    /// Optional 1x1 expansion to the hidden width.
    pub expand: Option<CNA2d<B>>,

    /// 3x3 depthwise conv at the hidden width.
    pub depthwise: CNA2d<B>,

    /// Linear 1x1 projection to the output width.
    pub project: ConvNorm2d<B>,
}

impl<B: Backend> InvertedResidualMeta for InvertedResidual<B> {
    fn in_channels(&self) -> usize {
        match &self.expand {
            Some(expand) => expand.in_channels(),
            None => self.depthwise.in_channels(),
        }
    }

    fn out_channels(&self) -> usize {
        self.project.out_channels()
    }

    fn stride(&self) -> usize {
        self.depthwise.stride()[0]
    }

    fn expand_ratio(&self) -> usize {
        self.depthwise.out_channels() / self.in_channels()
    }

    fn hidden_channels(&self) -> usize {
        self.depthwise.out_channels()
    }

    fn has_expansion(&self) -> bool {
        self.expand.is_some()
    }

    fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2] {
        self.depthwise.output_resolution(input_resolution)
    }
}

impl<B: Backend> InvertedResidual<B> {
    /// Rebuild the config this block would have been built from.
    pub fn to_config(&self) -> InvertedResidualConfig {
        InvertedResidualConfig::new(self.in_channels(), self.out_channels())
            .with_stride(self.stride())
            .with_expand_ratio(self.expand_ratio())
            .with_act(self.depthwise.act.to_config())
    }

    /// Redraw every conv and reset every norm.
    pub fn reset_parameters(self) -> Self {
        Self {
            expand: self.expand.map(|expand| expand.reset_parameters()),
            depthwise: self.depthwise.reset_parameters(),
            project: self.project.reset_parameters(),
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

        let identity = self.use_residual().then(|| input.clone());

        let x = match &self.expand {
            Some(expand) => expand.forward(input),
            None => input,
        };
        let x = self.depthwise.forward(x);
        let x = self.project.forward(x);

        let x = match identity {
            Some(identity) => x + identity,
            None => x,
        };

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

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    type B = NdArray<f32>;

    #[test]
    fn test_config_meta() {
        let config = InvertedResidualConfig::new(16, 24)
            .with_stride(2)
            .with_expand_ratio(6);
        assert_eq!(config.hidden_channels(), 96);
        assert!(config.has_expansion());
        assert!(!config.use_residual());
        assert_eq!(config.output_resolution([15, 16]), [8, 8]);

        let config = InvertedResidualConfig::new(32, 32).with_expand_ratio(6);
        assert!(config.use_residual());

        let config = InvertedResidualConfig::new(32, 16);
        assert_eq!(config.hidden_channels(), 32);
        assert!(!config.has_expansion());
        assert!(!config.use_residual());
    }

    #[test]
    fn test_try_validate() {
        assert!(InvertedResidualConfig::new(4, 4).try_validate().is_ok());
        assert!(
            InvertedResidualConfig::new(4, 4)
                .with_stride(3)
                .try_validate()
                .is_err()
        );
        assert!(
            InvertedResidualConfig::new(0, 4)
                .try_validate()
                .is_err()
        );
        assert!(
            InvertedResidualConfig::new(4, 4)
                .with_expand_ratio(0)
                .try_validate()
                .is_err()
        );
    }

    #[test]
    #[should_panic(expected = "stride must be 1 or 2")]
    fn test_init_rejects_bad_stride() {
        let device = Default::default();
        let _block: InvertedResidual<B> = InvertedResidualConfig::new(4, 4)
            .with_stride(4)
            .init(&device);
    }

    #[test]
    fn test_expansion_block_layout() {
        let device = Default::default();
        let config = InvertedResidualConfig::new(16, 24)
            .with_stride(2)
            .with_expand_ratio(6);
        let block: InvertedResidual<B> = config.clone().init(&device);

        let expand = block.expand.as_ref().expect("expansion conv");
        assert_eq!(expand.conv.weight.dims(), [96, 16, 1, 1]);
        assert_eq!(block.depthwise.conv.weight.dims(), [96, 1, 3, 3]);
        assert_eq!(block.depthwise.stride(), [2, 2]);
        assert_eq!(block.project.conv.weight.dims(), [24, 96, 1, 1]);

        assert_eq!(block.in_channels(), 16);
        assert_eq!(block.hidden_channels(), 96);
        assert_eq!(block.expand_ratio(), 6);
        assert_eq!(block.stride(), 2);

        let round_trip = block.to_config();
        assert_eq!(round_trip.in_channels, config.in_channels);
        assert_eq!(round_trip.out_channels, config.out_channels);
        assert_eq!(round_trip.stride, config.stride);
        assert_eq!(round_trip.expand_ratio, config.expand_ratio);
    }

    #[test]
    fn test_no_expansion_block_layout() {
        let device = Default::default();
        let block: InvertedResidual<B> = InvertedResidualConfig::new(32, 16).init(&device);

        assert!(block.expand.is_none());
        assert_eq!(block.depthwise.conv.weight.dims(), [32, 1, 3, 3]);
        assert_eq!(block.project.conv.weight.dims(), [16, 32, 1, 1]);
        assert_eq!(block.expand_ratio(), 1);
        assert!(!block.use_residual());
    }

    #[test]
    fn test_forward_strided() {
        let device = Default::default();
        let block: InvertedResidual<B> = InvertedResidualConfig::new(4, 8)
            .with_stride(2)
            .with_expand_ratio(6)
            .init(&device);

        let input = Tensor::random([2, 4, 9, 10], Distribution::Default, &device);
        let output = block.forward(input.clone());
        static CONTRACT: ShapeContract =
            shape_contract!["batch", "out_channels", "out_height", "out_width"];
        CONTRACT.assert_shape(
            &output,
            &[
                ("batch", 2),
                ("out_channels", 8),
                ("out_height", 5),
                ("out_width", 5)
            ],
        );

        let expected = {
            let x = block.expand.as_ref().unwrap().forward(input);
            let x = block.depthwise.forward(x);
            block.project.forward(x)
        };
        output.to_data().assert_eq(&expected.to_data(), true);
    }

    #[test]
    fn test_forward_residual() {
        let device = Default::default();
        let block: InvertedResidual<B> = InvertedResidualConfig::new(8, 8)
            .with_expand_ratio(6)
            .init(&device);
        assert!(block.use_residual());

        let input = Tensor::random([2, 8, 6, 7], Distribution::Default, &device);
        let output = block.forward(input.clone());
        assert_eq!(output.dims(), [2, 8, 6, 7]);

        let expected = {
            let x = block.expand.as_ref().unwrap().forward(input.clone());
            let x = block.depthwise.forward(x);
            block.project.forward(x) + input
        };
        let err = (output - expected).abs().max().into_scalar();
        assert!(err < 1e-5, "max abs error: {err}");
    }

    #[test]
    fn test_reset_parameters() {
        let device = Default::default();
        let block: InvertedResidual<B> = InvertedResidualConfig::new(4, 4)
            .with_expand_ratio(2)
            .init(&device);

        let block = block.reset_parameters();
        assert!(block.expand.is_some());
        assert_eq!(block.hidden_channels(), 8);
        block
            .project
            .norm
            .gamma
            .val()
            .to_data()
            .assert_eq(&Tensor::<B, 1>::ones([4], &device).to_data(), true);
    }
}
