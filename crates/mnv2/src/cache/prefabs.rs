//! # Config Prefabs for Well-Known Model Configurations

use crate::cache::weights::{PretrainedWeightsMap, StaticPretrainedWeightsMap};
use anyhow::bail;
use burn::config::Config;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;

/// Static builder for a [`PreFabConfig`]
pub struct StaticPreFabConfig<C>
where
    C: 'static + Config + Debug + Clone,
{
    /// Name of the model config pre-fab.
    pub name: &'static str,

    /// Description of the model config pre-fab.
    pub description: &'static str,

    /// Builder function for the config.
    pub builder: fn() -> C,

    /// Pretrained weights available for the config.
    pub weights: Option<&'static StaticPretrainedWeightsMap<'static>>,
}

impl<C> StaticPreFabConfig<C>
where
    C: 'static + Config + Debug + Clone,
{
    /// Convert to a [`PreFabConfig<C>`].
    pub fn to_prefab(&self) -> PreFabConfig<C> {
        PreFabConfig {
            name: self.name.to_string(),
            description: self.description.to_string(),
            builder: Arc::new(self.builder),
            weights: self.weights.map(|w| w.to_directory()),
        }
    }
}

impl<C> From<&StaticPreFabConfig<C>> for PreFabConfig<C>
where
    C: 'static + Config + Debug + Clone,
{
    fn from(config: &StaticPreFabConfig<C>) -> Self {
        config.to_prefab()
    }
}

impl<C> Debug for StaticPreFabConfig<C>
where
    C: 'static + Config + Debug + Clone,
{
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        self.to_prefab().fmt(f)
    }
}

/// A [`Config`] Well-Known Pre-Fab.
#[derive(Clone)]
pub struct PreFabConfig<C>
where
    C: 'static + Config + Debug + Clone,
{
    /// Name of the model config pre-fab.
    pub name: String,

    /// Description of the model config pre-fab.
    pub description: String,

    /// Builder function for the config.
    pub builder: Arc<dyn Fn() -> C + Send + Sync>,

    /// Pretrained weights available for the config.
    pub weights: Option<PretrainedWeightsMap>,
}

impl<C> Debug for PreFabConfig<C>
where
    C: 'static + Config + Debug + Clone,
{
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        let pretty = f.alternate();

        let type_name = std::any::type_name::<C>();
        let mut handle = f.debug_struct(&format!("PreFabConfig<{}>", type_name));

        handle
            .field("name", &self.name)
            .field("description", &self.description);

        if pretty {
            handle
                .field("config", &self.new_config())
                .field("weights", &self.weights);
        }

        handle.finish()
    }
}

impl<C> PreFabConfig<C>
where
    C: 'static + Config + Debug + Clone,
{
    /// Build a new config.
    pub fn new_config(&self) -> C {
        (self.builder)()
    }

    /// Lookup the pretrained weights map.
    pub fn try_weights(&self) -> anyhow::Result<&PretrainedWeightsMap> {
        match &self.weights {
            Some(weights) => Ok(weights),
            None => bail!("No pretrained weights for prefab: {}", self.name),
        }
    }
}

/// Static builder for a [`PreFabMap`].
pub struct StaticPreFabMap<C>
where
    C: 'static + Config + Debug + Clone,
{
    /// Name of the map.
    pub name: &'static str,

    /// Description of the map.
    pub description: &'static str,

    /// The static prefabs.
    pub items: &'static [&'static StaticPreFabConfig<C>],
}

impl<C> StaticPreFabMap<C>
where
    C: 'static + Config + Debug + Clone,
{
    /// Convert to a [`PreFabMap<C>`].
    pub fn to_map(&self) -> PreFabMap<C> {
        PreFabMap {
            name: self.name.to_string(),
            description: self.description.to_string(),
            items: self
                .items
                .iter()
                .map(|item| (item.name.to_string(), item.to_prefab()))
                .collect(),
        }
    }

    /// Lookup a prefab by name.
    pub fn lookup_prefab(
        &self,
        name: &str,
    ) -> Option<PreFabConfig<C>> {
        self.items
            .iter()
            .find(|item| item.name == name)
            .map(|item| item.to_prefab())
    }

    /// Lookup a prefab by name.
    pub fn try_lookup_prefab(
        &self,
        name: &str,
    ) -> anyhow::Result<PreFabConfig<C>> {
        match self.lookup_prefab(name) {
            Some(prefab) => Ok(prefab),
            None => bail!(
                "PreFab not found in {}: {}; known: {:?}",
                self.name,
                name,
                self.names()
            ),
        }
    }

    /// Lookup a prefab by name.
    pub fn expect_lookup_prefab(
        &self,
        name: &str,
    ) -> PreFabConfig<C> {
        match self.try_lookup_prefab(name) {
            Ok(prefab) => prefab,
            Err(err) => panic!("{}", err),
        }
    }

    /// The prefab names, in declaration order.
    pub fn names(&self) -> Vec<&'static str> {
        self.items.iter().map(|item| item.name).collect()
    }
}

/// Directory of [`PreFabConfig`]s.
#[derive(Debug, Clone)]
pub struct PreFabMap<C>
where
    C: 'static + Config + Debug + Clone,
{
    /// Name of the map.
    pub name: String,

    /// Description of the map.
    pub description: String,

    /// Map of prefabs.
    pub items: BTreeMap<String, PreFabConfig<C>>,
}
