#![allow(missing_docs)]
//! # `MobileNetV2` Stubs.
//!
//! Loaded ``torch`` weights carry no information about stateless modules
//! (such as [`crate::compat::activation_wrapper::Activation`]), so they are
//! loaded into these activation-free stubs, and then copied onto a live model.
use crate::layers::blocks::cna::CNA2d;
use crate::layers::blocks::conv_norm::ConvNorm2d;
use crate::models::mobilenet_v2::inverted_residual::InvertedResidual;
use crate::models::mobilenet_v2::mobilenet_model::MobileNetV2;
use anyhow::bail;
use burn::module::Module;
use burn::nn::BatchNorm;
use burn::nn::conv::Conv2d;
use burn::prelude::Backend;
use burn::record::{PrecisionSettings, Record};
use std::collections::HashMap;

/// The [`BlockStubs`] key of ``features.{layer}``.
pub fn block_key(layer: usize) -> String {
    format!("features_{layer}")
}

/// Checkpoint blocks, keyed by [`block_key`].
///
/// Numeric record paths deserialize as a packed `Vec`, so a block missing
/// from the middle of a checkpoint would shift every later block down.
pub struct BlockStubs<B: Backend>(pub HashMap<String, InvertedResidualStubRecord<B>>);

impl<B: Backend> Record<B> for BlockStubs<B> {
    type Item<S: PrecisionSettings> =
        HashMap<String, <InvertedResidualStubRecord<B> as Record<B>>::Item<S>>;

    fn into_item<S: PrecisionSettings>(self) -> Self::Item<S> {
        self.0
            .into_iter()
            .map(|(key, record)| (key, record.into_item()))
            .collect()
    }

    fn from_item<S: PrecisionSettings>(
        item: Self::Item<S>,
        device: &B::Device,
    ) -> Self {
        Self(
            item.into_iter()
                .map(|(key, item)| (key, InvertedResidualStubRecord::from_item(item, device)))
                .collect(),
        )
    }
}

#[derive(Record)]
pub struct MobileNetV2StubRecord<B: Backend> {
    pub stem: ConvNormStubRecord<B>,
    pub blocks: BlockStubs<B>,
}

impl<B: Backend> MobileNetV2StubRecord<B> {
    /// Copy the stub weights onto a model.
    ///
    /// Model blocks absent from the stub keep their weights.
    pub fn copy_weights(
        self,
        target: MobileNetV2<B>,
    ) -> anyhow::Result<MobileNetV2<B>> {
        let stem = self.stem.copy_to_cna(target.stem, "features.0")?;

        let mut stubs = self.blocks.0;
        let blocks = target
            .blocks
            .into_iter()
            .enumerate()
            .map(|(idx, block)| {
                let layer = idx + 1;
                match stubs.remove(&block_key(layer)) {
                    Some(stub) => stub.copy_weights(block, &format!("features.{layer}")),
                    None => {
                        tracing::warn!(layer, "no checkpoint weights for features.{layer}");
                        Ok(block)
                    }
                }
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(MobileNetV2 {
            stem,
            blocks,
            ..target
        })
    }
}

#[derive(Module, Debug)]
pub struct InvertedResidualStub<B: Backend> {
    pub expand: Option<ConvNormStub<B>>,
    pub depthwise: ConvNormStub<B>,
    pub project: ConvNormStub<B>,
}

impl<B: Backend> InvertedResidualStubRecord<B> {
    pub fn copy_weights(
        self,
        target: InvertedResidual<B>,
        name: &str,
    ) -> anyhow::Result<InvertedResidual<B>> {
        let expand = match (self.expand, target.expand) {
            (Some(stub), Some(expand)) => Some(stub.copy_to_cna(expand, name)?),
            (None, None) => None,
            (Some(_), None) => bail!("{name}: checkpoint has an expansion conv, the model does not"),
            (None, Some(_)) => bail!("{name}: model has an expansion conv, the checkpoint does not"),
        };

        Ok(InvertedResidual {
            expand,
            depthwise: self.depthwise.copy_to_cna(target.depthwise, name)?,
            project: self.project.copy_to_conv_norm(target.project, name)?,
        })
    }
}

#[derive(Module, Debug)]
pub struct ConvNormStub<B: Backend> {
    pub conv: Conv2d<B>,
    pub norm: BatchNorm<B, 2>,
}

fn check_dims<const D: usize>(
    name: &str,
    param: &str,
    checkpoint: [usize; D],
    model: [usize; D],
) -> anyhow::Result<()> {
    if checkpoint != model {
        bail!("{name}: checkpoint {param} {checkpoint:?} does not match model {model:?}");
    }
    Ok(())
}

impl<B: Backend> ConvNormStubRecord<B> {
    fn check_dims(
        &self,
        name: &str,
        conv: &Conv2d<B>,
        norm: &BatchNorm<B, 2>,
    ) -> anyhow::Result<()> {
        check_dims(
            name,
            "conv.weight",
            self.conv.weight.dims(),
            conv.weight.dims(),
        )?;
        check_dims(name, "norm.gamma", self.norm.gamma.dims(), norm.gamma.dims())
    }

    pub fn copy_to_cna(
        self,
        target: CNA2d<B>,
        name: &str,
    ) -> anyhow::Result<CNA2d<B>> {
        self.check_dims(name, &target.conv, &target.norm)?;
        Ok(CNA2d {
            conv: target.conv.load_record(self.conv),
            norm: target.norm.load_record(self.norm),
            ..target
        })
    }

    pub fn copy_to_conv_norm(
        self,
        target: ConvNorm2d<B>,
        name: &str,
    ) -> anyhow::Result<ConvNorm2d<B>> {
        self.check_dims(name, &target.conv, &target.norm)?;
        Ok(ConvNorm2d {
            conv: target.conv.load_record(self.conv),
            norm: target.norm.load_record(self.norm),
        })
    }
}
