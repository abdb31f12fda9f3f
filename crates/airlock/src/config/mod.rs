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

//! Configuration.
//!
//! One TOML file describes the database, trust store, network, channels,
//! install layout and tracked packages. [`ConfigLoader`] finds and parses it
//! with environment substitution; [`Validate`] checks it; the conversion
//! methods below build the runtime settings each engine takes.

pub mod defaults;
pub mod error;
pub mod loader;
pub mod types;
pub mod validation;

pub use defaults::generate_default_config_toml;
pub use error::{ConfigError, ValidationError};
pub use loader::{ConfigLoader, CONFIG_ENV_VAR};
pub use types::*;
pub use validation::Validate;

use std::time::Duration as StdDuration;

use crate::channel::{Channel, ChannelRegistry, Peer};
use crate::crypto::decode_public_key_hex;
use crate::keyggdrasil::KeyggdrasilSettings;
use crate::models::PackageId;
use crate::transport::HttpTransportConfig;
use crate::updater::{InstallSettings, TrackedPackage, UpdaterSettings};

const MAX_SECS: u64 = (i64::MAX / 1000) as u64;

fn secs(value: u64) -> chrono::Duration {
    chrono::Duration::seconds(value.min(MAX_SECS) as i64)
}

fn decode_key(owner: String, hex_key: &str) -> Result<[u8; 32], ValidationError> {
    decode_public_key_hex(hex_key).map_err(|e| ValidationError::InvalidPublicKey {
        owner,
        message: e.to_string(),
    })
}

impl AirlockConfig {
    /// Builds the channel registry, decoding every public key.
    pub fn channel_registry(&self) -> Result<ChannelRegistry, ValidationError> {
        let mut channels = Vec::with_capacity(self.channels.len());
        for config in &self.channels {
            let peers = config
                .peers
                .iter()
                .map(|peer| {
                    Ok(Peer {
                        name: peer.name.clone(),
                        public_key: decode_key(format!("peer '{}'", peer.name), &peer.public_key)?,
                        urls: peer.urls.clone(),
                    })
                })
                .collect::<Result<Vec<_>, ValidationError>>()?;

            channels.push(Channel {
                name: config.name.clone(),
                urls: config.urls.clone(),
                public_key: decode_key(format!("channel '{}'", config.name), &config.public_key)?,
                peers,
            });
        }
        Ok(ChannelRegistry::new(channels))
    }

    pub fn keyggdrasil_settings(&self) -> KeyggdrasilSettings {
        KeyggdrasilSettings {
            min_quorum: self.keyggdrasil.min_quorum,
            sentinel_max_age: secs(self.keyggdrasil.sentinel_max_age_secs),
            peer_response_max_age: secs(self.keyggdrasil.peer_response_max_age_secs),
            prefer_anonymity: self.network.prefer_anonymity,
        }
    }

    pub fn transport_config(&self) -> HttpTransportConfig {
        HttpTransportConfig {
            timeout: StdDuration::from_secs(self.network.timeout_secs),
            anonymity_proxy: self.network.anonymity_proxy.clone(),
            anonymity_only: self.network.anonymity_only,
            max_download_bytes: self.network.max_download_bytes,
        }
    }

    pub fn install_settings(&self) -> InstallSettings {
        InstallSettings {
            engine_root: self.install.engine_root.clone(),
            extensions_dir: self.install.extensions_dir.clone(),
            plugins_dir: self.install.plugins_dir.clone(),
            themes_dir: self.install.themes_dir.clone(),
            cache_dir: self.install.cache_dir.clone(),
            offline_marker: self.install.offline_marker.clone(),
            script_timeout: StdDuration::from_secs(self.install.script_timeout_secs),
            code_interpreter: self.install.code_interpreter.clone(),
        }
    }

    pub fn updater_settings(&self) -> UpdaterSettings {
        UpdaterSettings {
            default_policy: self.auto_update,
            prefer_anonymity: self.network.prefer_anonymity,
            response_max_age: secs(self.keyggdrasil.updates_max_age_secs),
        }
    }

    pub fn tracked_packages(&self) -> Vec<TrackedPackage> {
        self.packages
            .iter()
            .map(|p| TrackedPackage {
                package: PackageId::new(p.kind, p.supplier.clone(), p.name.clone()),
                policy: p.policy,
            })
            .collect()
    }
}
