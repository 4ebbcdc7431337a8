//! # Pretrained `MobileNetV2` Configs and Weights

use crate::cache::disk::DiskCacheConfig;
use crate::cache::prefabs::{PreFabConfig, StaticPreFabConfig, StaticPreFabMap};
use crate::cache::weights::{
    PretrainedWeightsDescriptor, StaticPretrainedWeightsDescriptor, StaticPretrainedWeightsMap,
};
use crate::models::mobilenet_v2::mobilenet_io::CheckpointLayout;
use crate::models::mobilenet_v2::mobilenet_model::{MobileNetV2, MobileNetV2Config};
use burn::prelude::Backend;

/// A [`MobileNetV2Config`] Well-Known Pre-Fab.
pub type MobileNetV2PreFab = PreFabConfig<MobileNetV2Config>;

/// Pretrained [`MobileNetV2`] configs and weights.
///
/// All hosted weights use [`CheckpointLayout::Torchvision`].
pub static PREFAB_MOBILENET_V2_MAP: StaticPreFabMap<MobileNetV2Config> = StaticPreFabMap {
    name: "mobilenet_v2",
    description: "Well-Known MobileNetV2 feature backbone configs",

    items: &[
        &StaticPreFabConfig {
            name: "mobilenet_v2",
            description: "MobileNetV2, width 1.0",
            builder: MobileNetV2Config::new,

            weights: Some(&StaticPretrainedWeightsMap {
                items: &[&StaticPretrainedWeightsDescriptor {
                    name: "tv_in1k",
                    description: "MobileNetV2 pretrained on ImageNet-1k",
                    license: Some("bsd-3-clause"),
                    origin: Some("https://github.com/pytorch/vision"),
                    urls: &["https://download.pytorch.org/models/mobilenet_v2-b0353104.pth"],
                }],
            }),
        },
        &StaticPreFabConfig {
            name: "mobilenet_v2_140",
            description: "MobileNetV2, width 1.4",
            builder: || MobileNetV2Config::new().with_width_mult(1.4),
            weights: None,
        },
        &StaticPreFabConfig {
            name: "mobilenet_v2_075",
            description: "MobileNetV2, width 0.75",
            builder: || MobileNetV2Config::new().with_width_mult(0.75),
            weights: None,
        },
        &StaticPreFabConfig {
            name: "mobilenet_v2_050",
            description: "MobileNetV2, width 0.5",
            builder: || MobileNetV2Config::new().with_width_mult(0.5),
            weights: None,
        },
    ],
};

impl<B: Backend> MobileNetV2<B> {
    /// Fetch hosted pretrained weights through the disk cache, and load them.
    ///
    /// # Arguments
    ///
    /// - `weights`: the hosted weights; see [`PREFAB_MOBILENET_V2_MAP`].
    /// - `disk_cache`: the cache policy.
    pub fn load_pretrained(
        self,
        weights: &PretrainedWeightsDescriptor,
        disk_cache: &DiskCacheConfig,
    ) -> anyhow::Result<Self> {
        let path = weights.fetch_weights_to_disk_cache(disk_cache)?;
        self.load_pytorch_weights(path, CheckpointLayout::Torchvision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefab_names() {
        assert_eq!(
            PREFAB_MOBILENET_V2_MAP.names(),
            vec![
                "mobilenet_v2",
                "mobilenet_v2_140",
                "mobilenet_v2_075",
                "mobilenet_v2_050"
            ]
        );
    }

    #[test]
    fn test_prefab_configs_are_valid() {
        for name in PREFAB_MOBILENET_V2_MAP.names() {
            let prefab: MobileNetV2PreFab = PREFAB_MOBILENET_V2_MAP.expect_lookup_prefab(name);
            prefab.new_config().expect_valid();
        }

        let channels = |name: &str| {
            PREFAB_MOBILENET_V2_MAP
                .expect_lookup_prefab(name)
                .new_config()
                .feature_channels()
        };
        assert_eq!(channels("mobilenet_v2"), [24, 32, 96, 160]);
        assert_eq!(channels("mobilenet_v2_075"), [18, 24, 72, 120]);
        assert_eq!(channels("mobilenet_v2_050"), [12, 16, 48, 80]);
    }

    #[test]
    fn test_torchvision_weights() {
        let prefab = PREFAB_MOBILENET_V2_MAP.expect_lookup_prefab("mobilenet_v2");
        let weights = prefab
            .try_weights()
            .unwrap()
            .try_lookup_by_name("tv_in1k")
            .unwrap();

        assert_eq!(
            weights.primary_url().unwrap(),
            "https://download.pytorch.org/models/mobilenet_v2-b0353104.pth"
        );
        assert!(
            weights
                .cache_key()
                .unwrap()
                .ends_with("-mobilenet_v2-b0353104.pth")
        );

        let prefab = PREFAB_MOBILENET_V2_MAP.expect_lookup_prefab("mobilenet_v2_140");
        assert!(prefab.try_weights().is_err());
    }
}
