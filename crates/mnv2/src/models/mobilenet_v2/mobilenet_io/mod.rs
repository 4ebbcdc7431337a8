//! # `MobileNetV2` ``torch`` Checkpoint Loading
//!
//! Two state-dict layouts are understood; they differ only in how the
//! ``conv`` sequence of each inverted residual block is nested.
//!
//! | layer                  | [`CheckpointLayout::Legacy`] | [`CheckpointLayout::Torchvision`] |
//! |------------------------|------------------------------|-----------------------------------|
//! | stem conv / bn         | ``features.0.{0,1}``         | ``features.0.{0,1}``              |
//! | expand conv / bn       | ``conv.{0,1}``               | ``conv.0.{0,1}``                  |
//! | depthwise conv / bn    | ``conv.{3,4}`` or ``{0,1}``  | ``conv.1.{0,1}`` or ``0.{0,1}``   |
//! | project conv / bn      | ``conv.{6,7}`` or ``{3,4}``  | ``conv.{2,3}`` or ``{1,2}``       |
//!
//! (The second form is for blocks without an expansion conv.)
//!
//! Loading is non-strict: keys for layers the feature model does not build
//! (the final blocks, the head conv, the classifier) are ignored.

pub mod pytorch_stubs;

use crate::models::mobilenet_v2::inverted_residual::InvertedResidualMeta;
use crate::models::mobilenet_v2::mobilenet_model::MobileNetV2;
use burn::module::Module;
use burn::prelude::Backend;
use burn::record::{FullPrecisionSettings, Recorder};
use burn_import::pytorch::{LoadArgs, PyTorchFileRecorder};
use pytorch_stubs::{MobileNetV2StubRecord, block_key};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// State-dict key layout of a ``torch`` `MobileNetV2` checkpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckpointLayout {
    /// Flat ``nn.Sequential`` blocks; ``features.N.conv.{0,1,3,4,6,7}``.
    #[default]
    Legacy,

    /// ``torchvision.models.mobilenet_v2``; ``features.N.conv.{0.0,0.1,1.0,1.1,2,3}``.
    Torchvision,
}

impl CheckpointLayout {
    /// ``(source, target)`` pairs for one block's conv sequence.
    fn block_pairs(
        &self,
        has_expansion: bool,
    ) -> &'static [(&'static str, &'static str)] {
        match (self, has_expansion) {
            (CheckpointLayout::Legacy, true) => &[
                ("0", "expand.conv"),
                ("1", "expand.norm"),
                ("3", "depthwise.conv"),
                ("4", "depthwise.norm"),
                ("6", "project.conv"),
                ("7", "project.norm"),
            ],
            (CheckpointLayout::Legacy, false) => &[
                ("0", "depthwise.conv"),
                ("1", "depthwise.norm"),
                ("3", "project.conv"),
                ("4", "project.norm"),
            ],
            (CheckpointLayout::Torchvision, true) => &[
                (r"0\.0", "expand.conv"),
                (r"0\.1", "expand.norm"),
                (r"1\.0", "depthwise.conv"),
                (r"1\.1", "depthwise.norm"),
                ("2", "project.conv"),
                ("3", "project.norm"),
            ],
            (CheckpointLayout::Torchvision, false) => &[
                (r"0\.0", "depthwise.conv"),
                (r"0\.1", "depthwise.norm"),
                ("1", "project.conv"),
                ("2", "project.norm"),
            ],
        }
    }

    /// Build the ``(regex, replacement)`` key remaps for a model.
    ///
    /// # Arguments
    ///
    /// - `block_expansions`: for each built block, whether it has an expansion conv.
    ///
    /// # Returns
    ///
    /// Remaps from checkpoint keys to [`MobileNetV2StubRecord`] keys.
    pub fn key_remaps(
        &self,
        block_expansions: &[bool],
    ) -> Vec<(String, String)> {
        let mut remaps = vec![
            (r"^features\.0\.0\.".to_string(), "stem.conv.".to_string()),
            (r"^features\.0\.1\.".to_string(), "stem.norm.".to_string()),
        ];
        for (idx, has_expansion) in block_expansions.iter().enumerate() {
            let feature = idx + 1;
            for (source, target) in self.block_pairs(*has_expansion) {
                remaps.push((
                    format!(r"^features\.{feature}\.conv\.{source}\."),
                    format!("blocks.{}.{target}.", block_key(feature)),
                ));
            }
        }
        remaps
    }
}

impl<B: Backend> MobileNetV2<B> {
    /// Load weights from a ``torch`` checkpoint onto this model.
    ///
    /// The model's frozen state is preserved.
    ///
    /// # Arguments
    ///
    /// - `path`: the ``.pth`` file.
    /// - `layout`: the checkpoint's key layout.
    #[tracing::instrument(skip(self))]
    pub fn load_pytorch_weights(
        self,
        path: PathBuf,
        layout: CheckpointLayout,
    ) -> anyhow::Result<Self> {
        let device = &self.devices()[0];
        let expansions: Vec<bool> = self.blocks.iter().map(|b| b.has_expansion()).collect();
        let record = load_mobilenet_stub_record::<B>(path, &layout.key_remaps(&expansions), device)?;

        Ok(record.copy_weights(self)?.refreeze())
    }
}

/// Load a [`MobileNetV2StubRecord`] from a ``torch`` checkpoint.
///
/// # Arguments
///
/// - `path`: the ``.pth`` file.
/// - `remaps`: ``(regex, replacement)`` key remaps; see [`CheckpointLayout::key_remaps`].
/// - `device`: the device to load onto.
pub fn load_mobilenet_stub_record<B: Backend>(
    path: PathBuf,
    remaps: &[(String, String)],
    device: &B::Device,
) -> anyhow::Result<MobileNetV2StubRecord<B>> {
    let load_args = remaps
        .iter()
        .fold(LoadArgs::new(path), |args, (pattern, replacement)| {
            args.with_key_remap(pattern, replacement)
        });

    let record = PyTorchFileRecorder::<FullPrecisionSettings>::new().load(load_args, device)?;

    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::mobilenet_v2::mobilenet_model::MobileNetV2Config;
    use burn::backend::{Autodiff, NdArray};
    use burn::prelude::Tensor;
    use burn::tensor::Distribution;
    use hamcrest::prelude::*;

    type B = NdArray<f32>;

    /// Width-0.25 state dicts written by ``test_data/make_checkpoints.py``.
    ///
    /// Every float tensor is filled with its 1-based position in the state dict.
    fn checkpoint_path(name: &str) -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("test_data")
            .join(name)
    }

    fn assert_filled<B: Backend, const D: usize>(
        tensor: Tensor<B, D>,
        value: f32,
    ) {
        let values = tensor.into_data().to_vec::<f32>().unwrap();
        assert!(!values.is_empty());
        assert!(
            values.iter().all(|v| *v == value),
            "expected all {value}, got {:?}",
            &values[..values.len().min(4)]
        );
    }

    fn assert_has_remaps(
        remaps: &[(String, String)],
        expected: &[(&str, &str)],
    ) {
        for (pattern, replacement) in expected {
            let pair = (pattern.to_string(), replacement.to_string());
            assert!(remaps.contains(&pair), "missing {pair:?} in {remaps:?}");
        }
    }

    #[test]
    fn test_stem_remaps() {
        for layout in [CheckpointLayout::Legacy, CheckpointLayout::Torchvision] {
            let remaps = layout.key_remaps(&[]);
            assert_eq!(
                remaps,
                vec![
                    (r"^features\.0\.0\.".to_string(), "stem.conv.".to_string()),
                    (r"^features\.0\.1\.".to_string(), "stem.norm.".to_string()),
                ]
            );
        }
    }

    #[test]
    fn test_legacy_remaps() {
        let remaps = CheckpointLayout::Legacy.key_remaps(&[false, true]);
        assert_eq!(remaps.len(), 2 + 4 + 6);

        assert_has_remaps(
            &remaps,
            &[
                (r"^features\.1\.conv\.0\.", "blocks.features_1.depthwise.conv."),
                (r"^features\.1\.conv\.4\.", "blocks.features_1.project.norm."),
                (r"^features\.2\.conv\.0\.", "blocks.features_2.expand.conv."),
                (r"^features\.2\.conv\.7\.", "blocks.features_2.project.norm."),
            ],
        );
    }

    #[test]
    fn test_torchvision_remaps() {
        let remaps = CheckpointLayout::Torchvision.key_remaps(&[false, true]);
        assert_eq!(remaps.len(), 2 + 4 + 6);

        assert_has_remaps(
            &remaps,
            &[
                (r"^features\.1\.conv\.0\.1\.", "blocks.features_1.depthwise.norm."),
                (r"^features\.1\.conv\.1\.", "blocks.features_1.project.conv."),
                (r"^features\.2\.conv\.1\.0\.", "blocks.features_2.depthwise.conv."),
                (r"^features\.2\.conv\.3\.", "blocks.features_2.project.norm."),
            ],
        );
    }

    #[test]
    fn test_layout_config_round_trip() {
        let json = serde_json::to_string(&CheckpointLayout::Torchvision).unwrap();
        let layout: CheckpointLayout = serde_json::from_str(&json).unwrap();
        assert_that!(layout, is(equal_to(CheckpointLayout::Torchvision)));
    }

    #[test]
    fn test_load_pytorch_weights() {
        let device = Default::default();

        for (layout, file) in [
            (CheckpointLayout::Legacy, "mobilenet_v2_025_legacy.pth"),
            (CheckpointLayout::Torchvision, "mobilenet_v2_025_torchvision.pth"),
        ] {
            let model: MobileNetV2<B> = MobileNetV2Config::new()
                .with_width_mult(0.25)
                .init(&device)
                .load_pytorch_weights(checkpoint_path(file), layout)
                .unwrap();
            assert_eq!(model.blocks.len(), 16);

            assert_filled(model.stem.conv.weight.val(), 1.0);
            assert_filled(model.stem.norm.gamma.val(), 2.0);
            assert_filled(model.stem.norm.beta.val(), 3.0);
            assert_filled(model.stem.norm.running_mean.value(), 4.0);
            assert_filled(model.stem.norm.running_var.value(), 5.0);

            assert!(model.blocks[0].expand.is_none());
            assert_filled(model.blocks[0].depthwise.conv.weight.val(), 7.0);
            assert_filled(model.blocks[0].depthwise.norm.gamma.val(), 8.0);
            assert_filled(model.blocks[0].project.conv.weight.val(), 13.0);

            let expand = model.blocks[1].expand.as_ref().unwrap();
            assert_filled(expand.conv.weight.val(), 19.0);
            assert_filled(expand.norm.gamma.val(), 20.0);
            assert_filled(model.blocks[1].depthwise.conv.weight.val(), 25.0);
            assert_filled(model.blocks[1].project.conv.weight.val(), 31.0);

            let expand = model.blocks[15].expand.as_ref().unwrap();
            assert_eq!(expand.conv.weight.dims(), [240, 40, 1, 1]);
            assert_filled(expand.conv.weight.val(), 271.0);
            assert_filled(model.blocks[15].project.conv.weight.val(), 283.0);

            let features = model.forward(Tensor::random(
                [1, 3, 64, 64],
                Distribution::Default,
                &device,
            ));
            assert_eq!(
                features.dims(),
                [
                    [1, 6, 16, 16],
                    [1, 8, 8, 8],
                    [1, 24, 4, 4],
                    [1, 40, 2, 2],
                ]
            );
        }
    }

    #[test]
    fn test_load_pytorch_weights_keeps_frozen() {
        type AB = Autodiff<B>;
        let device = Default::default();

        let model: MobileNetV2<AB> = MobileNetV2Config::new()
            .with_width_mult(0.25)
            .with_frozen(true)
            .init(&device)
            .load_pytorch_weights(
                checkpoint_path("mobilenet_v2_025_legacy.pth"),
                CheckpointLayout::Legacy,
            )
            .unwrap();
        assert!(model.is_frozen());
        assert_filled(model.stem.conv.weight.val().inner(), 1.0);

        let input: Tensor<AB, 4> =
            Tensor::random([1, 3, 32, 32], Distribution::Default, &device).require_grad();
        let grads = model.forward(input.clone()).stride_32.sum().backward();

        assert!(input.grad(&grads).is_some());
        assert!(model.stem.conv.weight.val().grad(&grads).is_none());
        assert!(
            model.blocks[15]
                .project
                .conv
                .weight
                .val()
                .grad(&grads)
                .is_none()
        );
    }

    #[test]
    fn test_load_stub_record_keeps_block_layers() {
        let device = Default::default();
        let remaps = CheckpointLayout::Legacy.key_remaps(&[
            false, true, true, true, true, true, true, true, true, true, true, true, true, true,
            true, true,
        ]);

        let record = load_mobilenet_stub_record::<B>(
            checkpoint_path("mobilenet_v2_025_legacy_no_features_9.pth"),
            &remaps,
            &device,
        )
        .unwrap();

        let blocks = &record.blocks.0;
        assert_eq!(blocks.len(), 15);
        assert!(!blocks.contains_key(&block_key(9)));
        assert!(!blocks.contains_key(&block_key(17)));
        assert_filled(
            blocks[&block_key(10)].expand.as_ref().unwrap().conv.weight.val(),
            145.0,
        );
    }

    #[test]
    fn test_load_pytorch_weights_missing_block() {
        let device = Default::default();
        let model: MobileNetV2<B> = MobileNetV2Config::new()
            .with_width_mult(0.25)
            .init(&device);
        let untouched = model.blocks[8].project.conv.weight.val();

        let model = model
            .load_pytorch_weights(
                checkpoint_path("mobilenet_v2_025_legacy_no_features_9.pth"),
                CheckpointLayout::Legacy,
            )
            .unwrap();

        assert_filled(model.stem.conv.weight.val(), 1.0);
        assert_filled(
            model.blocks[7].expand.as_ref().unwrap().conv.weight.val(),
            127.0,
        );
        model.blocks[8]
            .project
            .conv
            .weight
            .val()
            .to_data()
            .assert_eq(&untouched.to_data(), true);
        assert_filled(
            model.blocks[9].expand.as_ref().unwrap().conv.weight.val(),
            145.0,
        );
        assert_filled(model.blocks[9].project.conv.weight.val(), 157.0);
        assert_filled(
            model.blocks[15].expand.as_ref().unwrap().conv.weight.val(),
            253.0,
        );
    }
}
