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

use crate::config::types::*;
use crate::updater::UpdatePolicy;
use std::path::PathBuf;

impl Default for AirlockConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            trust: TrustConfig::default(),
            network: NetworkConfig::default(),
            keyggdrasil: KeyggdrasilConfig::default(),
            channels: Vec::new(),
            install: InstallConfig::default(),
            auto_update: UpdatePolicy::default(),
            packages: Vec::new(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:///var/lib/airlock/airlock.db".to_string(),
        }
    }
}

impl Default for TrustConfig {
    fn default() -> Self {
        Self {
            store_dir: PathBuf::from("/var/lib/airlock/trust"),
            lock_file: PathBuf::from("/var/lib/airlock/airlock.lock"),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            anonymity_only: false,
            prefer_anonymity: false,
            anonymity_proxy: None,
            max_download_bytes: 256 * 1024 * 1024,
        }
    }
}

impl Default for KeyggdrasilConfig {
    fn default() -> Self {
        Self {
            min_quorum: 3,
            sentinel_max_age_secs: 3600,
            peer_response_max_age_secs: 86400,
            updates_max_age_secs: 3600,
        }
    }
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            engine_root: PathBuf::from("/var/www/airlock"),
            extensions_dir: PathBuf::from("/var/www/airlock/extensions"),
            plugins_dir: PathBuf::from("/var/www/airlock/plugins"),
            themes_dir: PathBuf::from("/var/www/airlock/themes"),
            cache_dir: PathBuf::from("/var/cache/airlock"),
            offline_marker: PathBuf::from("/var/lib/airlock/offline"),
            script_timeout_secs: 300,
            code_interpreter: None,
            site_database_url: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: None,
            json: false,
        }
    }
}

/// Generate a complete default configuration as TOML string
pub fn generate_default_config_toml() -> Result<String, toml::ser::Error> {
    toml::to_string_pretty(&AirlockConfig::default())
}
