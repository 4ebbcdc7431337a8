//! # Pretrained Weight Descriptors

use crate::cache::disk::DiskCacheConfig;
use anyhow::bail;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

const X25: crc::Crc<u16> = crc::Crc::<u16>::new(&crc::CRC_16_IBM_SDLC);

/// Build a cache key (bare cache file name) from a name and URL.
///
/// The key is ``[{name}-]{crc16(url)}-{url basename}``.
pub fn url_to_cache_key(
    name: Option<&str>,
    url: &str,
) -> String {
    let hash = X25.checksum(url.as_bytes()).to_string();
    let base_name = match url.rsplit_once('/') {
        Some((_, base_name)) => base_name,
        None => url,
    };
    match name {
        Some(n) => format!("{}-{}-{}", n, hash, base_name),
        None => format!("{}-{}", hash, base_name),
    }
}

/// Get the cache resource key for a pretrained weights file.
///
/// # Arguments
///
/// - `cache_key`: the cache key (the bare cache file name).
///
/// # Returns
///
/// The cache resource key.
pub fn pretrained_weights_resource_key(cache_key: &str) -> Vec<String> {
    vec!["weights".to_string(), cache_key.to_string()]
}

/// Static [`PretrainedWeightsDescriptor`] provider.
#[derive(Debug)]
pub struct StaticPretrainedWeightsDescriptor<'a> {
    /// Name of the weights.
    pub name: &'a str,

    /// Description of the weights.
    pub description: &'a str,

    /// License.
    pub license: Option<&'a str>,

    /// Source URL.
    pub origin: Option<&'a str>,

    /// URLs to download the weights from.
    pub urls: &'a [&'a str],
}

impl<'a> StaticPretrainedWeightsDescriptor<'a> {
    /// Convert to a [`PretrainedWeightsDescriptor`].
    pub fn to_descriptor(&self) -> PretrainedWeightsDescriptor {
        PretrainedWeightsDescriptor {
            name: self.name.to_string(),
            description: self.description.to_string(),
            license: self.license.map(|s| s.to_string()),
            origin: self.origin.map(|s| s.to_string()),
            urls: self.urls.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl From<&StaticPretrainedWeightsDescriptor<'_>> for PretrainedWeightsDescriptor {
    fn from(descriptor: &StaticPretrainedWeightsDescriptor) -> Self {
        descriptor.to_descriptor()
    }
}

/// A descriptor for a pretrained weights file.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PretrainedWeightsDescriptor {
    /// Name of the weights.
    pub name: String,

    /// Description of the weights.
    pub description: String,

    /// License.
    pub license: Option<String>,

    /// Source URL.
    pub origin: Option<String>,

    /// URLs to download the weights from.
    pub urls: Vec<String>,
}

impl PretrainedWeightsDescriptor {
    /// The URL weights are fetched from.
    pub fn primary_url(&self) -> anyhow::Result<&str> {
        match self.urls.first() {
            Some(url) => Ok(url.as_str()),
            None => bail!("No URLs for pretrained weights: {}", self.name),
        }
    }

    /// Cache Key
    ///
    /// The key is ``{name}-{url crc hash}-{url basename}``.
    pub fn cache_key(&self) -> anyhow::Result<String> {
        Ok(url_to_cache_key(Some(&self.name), self.primary_url()?))
    }

    /// Read-Through Cache the Model Weights
    ///
    /// # Returns
    ///
    /// The disk location of the cached weights.
    pub fn fetch_weights_to_disk_cache(
        &self,
        disk_cache: &DiskCacheConfig,
    ) -> anyhow::Result<PathBuf> {
        let url = self.primary_url()?;
        let resource = pretrained_weights_resource_key(&self.cache_key()?);

        disk_cache.fetch_resource(url, &resource)
    }
}

/// Static [`PretrainedWeightsMap`] builder.
#[derive(Debug)]
pub struct StaticPretrainedWeightsMap<'a> {
    /// List of static descriptors.
    pub items: &'a [&'a StaticPretrainedWeightsDescriptor<'a>],
}

impl<'a> StaticPretrainedWeightsMap<'a> {
    /// Convert to a [`PretrainedWeightsMap`].
    pub fn to_directory(&self) -> PretrainedWeightsMap {
        PretrainedWeightsMap {
            items: self
                .items
                .iter()
                .map(|d| {
                    let desc = d.to_descriptor();
                    (desc.name.clone(), desc)
                })
                .collect(),
        }
    }
}

impl<'a> From<&StaticPretrainedWeightsMap<'a>> for PretrainedWeightsMap {
    fn from(directory: &StaticPretrainedWeightsMap) -> Self {
        directory.to_directory()
    }
}

/// Directory of [`PretrainedWeightsDescriptor`]s.
#[derive(Debug, Clone)]
pub struct PretrainedWeightsMap {
    /// Map of descriptors.
    pub items: BTreeMap<String, PretrainedWeightsDescriptor>,
}

impl PretrainedWeightsMap {
    /// Lookup a descriptor by name.
    pub fn lookup_by_name(
        &self,
        name: &str,
    ) -> Option<PretrainedWeightsDescriptor> {
        self.items.get(name).cloned()
    }

    /// Lookup a descriptor.
    pub fn try_lookup_by_name(
        &self,
        name: &str,
    ) -> anyhow::Result<PretrainedWeightsDescriptor> {
        match self.lookup_by_name(name) {
            Some(d) => Ok(d),
            None => bail!("Descriptor not found: {}", name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hamcrest::prelude::*;

    #[test]
    fn test_url_to_cache_key() {
        let url = "https://download.pytorch.org/models/mobilenet_v2-b0353104.pth";
        let hash = X25.checksum(url.as_bytes()).to_string();

        assert_eq!(
            url_to_cache_key(Some("tv_in1k"), url),
            format!("tv_in1k-{hash}-mobilenet_v2-b0353104.pth")
        );
        assert_eq!(
            url_to_cache_key(None, url),
            format!("{hash}-mobilenet_v2-b0353104.pth")
        );
        assert_eq!(
            url_to_cache_key(None, "weights.pth"),
            format!("{}-weights.pth", X25.checksum(b"weights.pth"))
        );
    }

    #[test]
    fn test_static_descriptor_to_descriptor() {
        let s_desc = StaticPretrainedWeightsDescriptor {
            name: "my_model",
            description: "some description of my model.",
            urls: &["foo/a.pth", "bar/b.pth"],
            license: Some("MIT"),
            origin: Some("https://github.com/my_org/my_model"),
        };
        let d_desc = s_desc.to_descriptor();

        assert_that!(d_desc.name.as_str(), is(equal_to("my_model")));
        assert_that!(d_desc.license.clone(), is(equal_to(Some("MIT".to_string()))));
        assert_eq!(d_desc.urls, vec!["foo/a.pth", "bar/b.pth"]);
        assert_eq!(d_desc.primary_url().unwrap(), "foo/a.pth");
        assert!(d_desc.cache_key().unwrap().starts_with("my_model-"));
        assert!(d_desc.cache_key().unwrap().ends_with("-a.pth"));
    }

    #[test]
    fn test_descriptor_without_urls() {
        let desc = PretrainedWeightsDescriptor {
            name: "empty".to_string(),
            description: String::new(),
            license: None,
            origin: None,
            urls: vec![],
        };
        assert!(desc.primary_url().is_err());
        assert!(desc.cache_key().is_err());
    }

    #[test]
    fn test_weights_map_lookup() {
        let map = StaticPretrainedWeightsMap {
            items: &[&StaticPretrainedWeightsDescriptor {
                name: "v1",
                description: "first",
                license: None,
                origin: None,
                urls: &["https://example.com/v1.pth"],
            }],
        }
        .to_directory();

        assert!(map.lookup_by_name("v1").is_some());
        assert!(map.try_lookup_by_name("v2").is_err());
    }
}
