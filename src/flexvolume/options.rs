//! Volume options passed by the kubelet
//!
//! The kubelet hands the PV's `options` map over as a JSON object of strings,
//! together with a few `kubernetes.io/` keys of its own. Unknown keys are
//! ignored.

use crate::config::LinstorConfig;
use crate::domain::resource::ResourceSpec;
use crate::error::{Error, Result};
use crate::node::filesystem::FormatOptions;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Decoded option map
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FlexOptions {
    #[serde(rename = "kubernetes.io/fsType")]
    pub fs_type: String,
    #[serde(rename = "kubernetes.io/readwrite")]
    pub readwrite: String,
    #[serde(rename = "kubernetes.io/pvOrVolumeName")]
    pub pv_or_volume_name: String,
    pub resource: String,
    pub block_size: String,
    pub force: String,
    #[serde(rename = "xfsDataSU")]
    pub xfs_data_su: String,
    #[serde(rename = "xfsDataSW")]
    pub xfs_data_sw: String,
    pub xfs_log_dev: String,
    pub mount_opts: String,
    pub storage_pool: String,
    pub diskless_storage_pool: String,
    pub auto_place: String,
    pub do_not_place_with_regex: String,
    #[serde(rename = "sizeKiB")]
    pub size_kib: String,
    pub encryption: String,
    pub node_list: String,
    pub client_list: String,
    pub diskless: String,
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "" | "false" | "0" | "no" => Ok(false),
        "true" | "1" | "yes" => Ok(true),
        _ => Err(Error::ApiValidation(format!(
            "{} must be true or false, got {:?}",
            key, value
        ))),
    }
}

fn parse_number<T: FromStr + Default>(key: &str, value: &str) -> Result<T> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(T::default());
    }
    value
        .parse()
        .map_err(|_| Error::ApiValidation(format!("{} must be a number, got {:?}", key, value)))
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn non_empty(value: &str) -> Option<String> {
    Some(value.trim().to_string()).filter(|v| !v.is_empty())
}

impl FlexOptions {
    /// Decode the JSON option argument of a call
    pub fn parse(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| {
            Error::ApiValidation(format!("couldn't parse options from {}: {}", json, e))
        })
    }

    /// `resource`, falling back to the PV name
    pub fn resource_name(&self) -> Result<String> {
        non_empty(&self.resource)
            .or_else(|| non_empty(&self.pv_or_volume_name))
            .ok_or_else(|| {
                Error::ApiValidation("neither resource nor kubernetes.io/pvOrVolumeName set".into())
            })
    }

    /// Placement request; pools default to the configured ones
    pub fn resource_spec(&self, defaults: &LinstorConfig) -> Result<ResourceSpec> {
        Ok(ResourceSpec {
            name: self.resource_name()?,
            node_list: parse_list(&self.node_list),
            client_list: parse_list(&self.client_list),
            auto_place: parse_number("autoPlace", &self.auto_place)?,
            do_not_place_with_regex: self.do_not_place_with_regex.trim().to_string(),
            size_kib: parse_number("sizeKiB", &self.size_kib)?,
            storage_pool: non_empty(&self.storage_pool).unwrap_or_else(|| defaults.storage_pool.clone()),
            diskless_storage_pool: non_empty(&self.diskless_storage_pool)
                .unwrap_or_else(|| defaults.diskless_storage_pool.clone()),
            encryption: parse_bool("encryption", &self.encryption)?,
        })
    }

    /// Filesystem creation options; an unset type means `default_fs_type`
    pub fn format_options(&self, default_fs_type: &str) -> Result<FormatOptions> {
        Ok(FormatOptions {
            fs_type: non_empty(&self.fs_type).unwrap_or_else(|| default_fs_type.to_string()),
            block_size: parse_number("blockSize", &self.block_size)?,
            force: parse_bool("force", &self.force)?,
            xfs_data_su: non_empty(&self.xfs_data_su),
            xfs_data_sw: parse_number("xfsDataSW", &self.xfs_data_sw)?,
            xfs_log_dev: non_empty(&self.xfs_log_dev),
        })
    }

    pub fn mount_options(&self) -> String {
        self.mount_opts.trim().to_string()
    }

    pub fn read_only(&self) -> bool {
        self.readwrite.trim() == "ro"
    }

    pub fn diskless(&self) -> Result<bool> {
        parse_bool("diskless", &self.diskless)
    }
}
