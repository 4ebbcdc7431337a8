use anyhow::{Context, bail};
use burn::backend::NdArray;
use burn::prelude::Tensor;
use burn::tensor::Distribution;
use clap::{Parser, ValueEnum};
use mnv2::cache::disk::DiskCacheConfig;
use mnv2::models::mobilenet_v2::{
    BackboneConfig, CheckpointLayout, MobileNetV2, PREFAB_MOBILENET_V2_MAP, build_backbone,
};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(ValueEnum, Clone, Copy, Debug)]
enum LayoutArg {
    Legacy,
    Torchvision,
}

impl From<LayoutArg> for CheckpointLayout {
    fn from(layout: LayoutArg) -> Self {
        match layout {
            LayoutArg::Legacy => CheckpointLayout::Legacy,
            LayoutArg::Torchvision => CheckpointLayout::Torchvision,
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Named config; overrides `--width-mult`.
    #[arg(long)]
    prefab: Option<String>,

    /// Channel width multiplier.
    #[arg(long, default_value = "1.0")]
    width_mult: f64,

    /// Input height.
    #[arg(long, default_value = "224")]
    height: usize,

    /// Input width.
    #[arg(long, default_value = "224")]
    width: usize,

    /// Batch size.
    #[arg(long, default_value = "1")]
    batch: usize,

    /// Local ``.pth`` checkpoint to load.
    #[arg(long)]
    pretrained: Option<String>,

    /// Key layout of `--pretrained`.
    #[arg(long, value_enum, default_value = "legacy")]
    layout: LayoutArg,

    /// Hosted weights of `--prefab` to fetch and load (e.g. ``tv_in1k``).
    #[arg(long)]
    weights: Option<String>,

    /// Disable gradient tracking for the backbone.
    #[arg(long)]
    frozen: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let args = Args::parse();
    type B = NdArray<f32>;
    let device = Default::default();

    if args.pretrained.is_some() && args.weights.is_some() {
        bail!("--pretrained and --weights are mutually exclusive");
    }

    let prefab = match &args.prefab {
        Some(name) => Some(PREFAB_MOBILENET_V2_MAP.try_lookup_prefab(name)?),
        None => None,
    };
    let width_mult = match &prefab {
        Some(prefab) => prefab.new_config().width_mult,
        None => args.width_mult,
    };

    let config = BackboneConfig::new()
        .with_width_mult(width_mult)
        .with_frozen_mobilenet(args.frozen)
        .with_use_pretrained(args.pretrained.is_some())
        .with_backbone_pretrained_path(args.pretrained.clone())
        .with_checkpoint_layout(args.layout.into());

    let model: MobileNetV2<B> = build_backbone(&config, true, &device)?;

    let model = match &args.weights {
        Some(name) => {
            let prefab = prefab.context("--weights requires --prefab")?;
            let weights = prefab.try_weights()?.try_lookup_by_name(name)?;
            model.load_pretrained(&weights, &DiskCacheConfig::default())?
        }
        None => model,
    };

    tracing::info!(
        channels = ?model.feature_channels(),
        strides = ?model.feature_strides(),
        frozen = model.is_frozen(),
        "backbone ready"
    );

    let input: Tensor<B, 4> = Tensor::random(
        [args.batch, model.in_channels(), args.height, args.width],
        Distribution::Normal(0.0, 1.0),
        &device,
    );
    let features = model.forward(input);

    for (stride, dims) in model.feature_strides().iter().zip(features.dims()) {
        println!("1/{stride:<2} {dims:?}");
    }

    Ok(())
}
