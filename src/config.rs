//! Persisted config document: `{"tuya":{"devices":[...],"models":[...]}}`.
//!
//! Only a thin collaborator — its job is feeding `DeviceTable::merge_config`
//! and `ModelRegistry::reload`, not owning protocol logic.

use crate::device::Device;
use crate::error::{CoreError, Result};
use crate::model::Model;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct ConfigFile {
    pub tuya: TuyaConfig,
}

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct TuyaConfig {
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
    #[serde(default)]
    pub models: Vec<ModelConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub name: String,
    pub id: String,
    pub key: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub id: String,
    pub name: String,
    pub control: u32,
}

impl From<DeviceConfig> for Device {
    fn from(cfg: DeviceConfig) -> Self {
        let mut device = Device::new(cfg.id, cfg.name, cfg.key);
        device.model = cfg.model;
        device.description = cfg.description;
        device
    }
}

impl From<ModelConfig> for Model {
    fn from(cfg: ModelConfig) -> Self {
        Model {
            product_key: cfg.id,
            friendly_name: cfg.name,
            control_point: cfg.control,
        }
    }
}

/// Parse a config document from bytes. A parse error leaves the caller's
/// live state untouched — it is up to the caller not to apply a `None`/`Err`
/// result.
pub fn parse(bytes: &[u8]) -> Result<ConfigFile> {
    serde_json::from_slice(bytes).map_err(|e| CoreError::ConfigParse(e.to_string()))
}

pub fn serialize(config: &ConfigFile) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec_pretty(config)?)
}

pub async fn load(path: &Path) -> Result<ConfigFile> {
    let bytes = tokio::fs::read(path).await?;
    parse(&bytes)
}

pub async fn save(path: &Path, config: &ConfigFile) -> Result<()> {
    let bytes = serialize(config)?;
    tokio::fs::write(path, bytes).await?;
    Ok(())
}
