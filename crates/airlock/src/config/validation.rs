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

use std::collections::HashSet;

use crate::channel::is_anonymity_url;
use crate::config::{types::*, ValidationError};
use crate::crypto::decode_public_key_hex;
use crate::trust::validate_supplier_name;

pub trait Validate {
    fn validate(&self) -> Result<(), ValidationError>;
}

/// Folds a list of failures into one error.
fn collect(mut errors: Vec<ValidationError>) -> Result<(), ValidationError> {
    match errors.len() {
        0 => Ok(()),
        1 => Err(errors.remove(0)),
        _ => Err(ValidationError::Multiple { errors }),
    }
}

impl Validate for AirlockConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        let mut errors = Vec::new();

        let sections: [&dyn Validate; 5] = [
            &self.database,
            &self.network,
            &self.keyggdrasil,
            &self.install,
            &self.logging,
        ];
        for section in sections {
            if let Err(e) = section.validate() {
                errors.push(e);
            }
        }

        let mut seen = HashSet::new();
        for channel in &self.channels {
            if !seen.insert(channel.name.as_str()) {
                errors.push(ValidationError::DuplicateChannel {
                    name: channel.name.clone(),
                });
            }
            if let Err(e) = channel.validate() {
                errors.push(e);
            }

            let min_quorum = self.keyggdrasil.min_quorum;
            if min_quorum > 0 && channel.peers.len() < min_quorum {
                errors.push(ValidationError::QuorumUnreachable {
                    channel: channel.name.clone(),
                    peers: channel.peers.len(),
                    min_quorum,
                });
            }

            if self.network.anonymity_proxy.is_none() {
                let urls = channel
                    .urls
                    .iter()
                    .chain(channel.peers.iter().flat_map(|p| p.urls.iter()));
                for url in urls.filter(|u| is_anonymity_url(u)) {
                    errors.push(ValidationError::MissingProxy { url: url.clone() });
                }
            }
        }

        for package in &self.packages {
            if let Err(e) = package.validate() {
                errors.push(e);
            }
        }

        collect(errors)
    }
}

impl Validate for DatabaseConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        let path = self.url.strip_prefix("sqlite://").unwrap_or(&self.url);
        if path.trim().is_empty() || (self.url.contains("://") && !self.url.starts_with("sqlite://")) {
            return Err(ValidationError::InvalidDatabaseUrl {
                url: self.url.clone(),
            });
        }
        Ok(())
    }
}

impl Validate for NetworkConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        let mut errors = Vec::new();
        if self.timeout_secs == 0 {
            errors.push(ValidationError::InvalidTimeout {
                field: "network.timeout_secs".into(),
                value: self.timeout_secs,
            });
        }
        if self.max_download_bytes == 0 {
            errors.push(ValidationError::InvalidTimeout {
                field: "network.max_download_bytes".into(),
                value: self.max_download_bytes,
            });
        }
        if self.anonymity_only && self.anonymity_proxy.is_none() {
            errors.push(ValidationError::MissingProxy {
                url: "network.anonymity_only".into(),
            });
        }
        if let Some(proxy) = &self.anonymity_proxy {
            if url::Url::parse(proxy).is_err() {
                errors.push(ValidationError::InvalidUrl {
                    owner: "network.anonymity_proxy".into(),
                    url: proxy.clone(),
                });
            }
        }
        collect(errors)
    }
}

impl Validate for KeyggdrasilConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        let mut errors = Vec::new();
        for (field, value) in [
            ("keyggdrasil.sentinel_max_age_secs", self.sentinel_max_age_secs),
            ("keyggdrasil.peer_response_max_age_secs", self.peer_response_max_age_secs),
            ("keyggdrasil.updates_max_age_secs", self.updates_max_age_secs),
        ] {
            if value == 0 {
                errors.push(ValidationError::InvalidTimeout {
                    field: field.to_string(),
                    value,
                });
            }
        }
        collect(errors)
    }
}

fn validate_endpoint(owner: &str, urls: &[String], public_key: &str) -> Result<(), ValidationError> {
    let mut errors = Vec::new();
    if urls.is_empty() {
        errors.push(ValidationError::NoUrls {
            owner: owner.to_string(),
        });
    }
    for url in urls {
        if url::Url::parse(url).is_err() {
            errors.push(ValidationError::InvalidUrl {
                owner: owner.to_string(),
                url: url.clone(),
            });
        }
    }
    if let Err(e) = decode_public_key_hex(public_key) {
        errors.push(ValidationError::InvalidPublicKey {
            owner: owner.to_string(),
            message: e.to_string(),
        });
    }
    collect(errors)
}

impl Validate for ChannelConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        let mut errors = Vec::new();
        if let Err(e) = validate_endpoint(&format!("channel '{}'", self.name), &self.urls, &self.public_key) {
            errors.push(e);
        }
        for peer in &self.peers {
            let owner = format!("peer '{}' of channel '{}'", peer.name, self.name);
            if let Err(e) = validate_endpoint(&owner, &peer.urls, &peer.public_key) {
                errors.push(e);
            }
        }
        collect(errors)
    }
}

impl Validate for InstallConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        let mut errors = Vec::new();
        if self.script_timeout_secs == 0 {
            errors.push(ValidationError::InvalidTimeout {
                field: "install.script_timeout_secs".into(),
                value: self.script_timeout_secs,
            });
        }
        for path in [
            &self.engine_root,
            &self.extensions_dir,
            &self.plugins_dir,
            &self.themes_dir,
            &self.cache_dir,
            &self.offline_marker,
        ] {
            if path.as_os_str().is_empty() {
                errors.push(ValidationError::InvalidPath {
                    path: "install paths cannot be empty".to_string(),
                });
            }
        }
        if let Some(url) = &self.site_database_url {
            let site = DatabaseConfig { url: url.clone() };
            if let Err(e) = site.validate() {
                errors.push(e);
            }
        }
        if let Some(interpreter) = &self.code_interpreter {
            if !interpreter.is_absolute() {
                errors.push(ValidationError::InvalidPath {
                    path: interpreter.display().to_string(),
                });
            }
        }
        collect(errors)
    }
}

impl Validate for PackageConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        validate_supplier_name(&self.supplier).map_err(|_| ValidationError::InvalidSupplierName {
            name: self.supplier.clone(),
        })?;
        if self.name.is_empty() || self.name.contains(['/', '\\']) || self.name.starts_with('.') {
            return Err(ValidationError::InvalidPath {
                path: format!("package name '{}'", self.name),
            });
        }
        Ok(())
    }
}

impl Validate for LoggingConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        match self.level.to_lowercase().as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => Ok(()),
            _ => Err(ValidationError::InvalidLogLevel {
                level: self.level.clone(),
            }),
        }
    }
}
