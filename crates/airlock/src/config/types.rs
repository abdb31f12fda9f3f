/*
 *  Copyright 2025-2026 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::models::PackageKind;
use crate::updater::UpdatePolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AirlockConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub trust: TrustConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub keyggdrasil: KeyggdrasilConfig,
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
    #[serde(default)]
    pub install: InstallConfig,
    #[serde(default)]
    pub auto_update: UpdatePolicy,
    #[serde(default)]
    pub packages: Vec<PackageConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustConfig {
    /// Directory holding one JSON file per supplier.
    pub store_dir: PathBuf,
    /// Exclusive lock held while a cycle runs.
    pub lock_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub timeout_secs: u64,
    #[serde(alias = "tor_only")]
    pub anonymity_only: bool,
    #[serde(alias = "prefer_tor")]
    pub prefer_anonymity: bool,
    #[serde(alias = "tor_proxy", skip_serializing_if = "Option::is_none")]
    pub anonymity_proxy: Option<String>,
    pub max_download_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyggdrasilConfig {
    pub min_quorum: usize,
    pub sentinel_max_age_secs: u64,
    pub peer_response_max_age_secs: u64,
    pub updates_max_age_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub name: String,
    pub urls: Vec<String>,
    /// Hex Ed25519 public key.
    pub public_key: String,
    #[serde(default)]
    pub peers: Vec<PeerConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerConfig {
    pub name: String,
    pub public_key: String,
    pub urls: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallConfig {
    pub engine_root: PathBuf,
    pub extensions_dir: PathBuf,
    pub plugins_dir: PathBuf,
    pub themes_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub offline_marker: PathBuf,
    pub script_timeout_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_interpreter: Option<PathBuf>,
    /// Database that package migration scripts run against. Migrations are
    /// skipped when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site_database_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageConfig {
    #[serde(alias = "type")]
    pub kind: PackageKind,
    pub supplier: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<UpdatePolicy>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Directory for daily rolling log files. Console only when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
    pub json: bool,
}
