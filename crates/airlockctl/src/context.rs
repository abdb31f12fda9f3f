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

//! Wiring from configuration to engines.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;

use airlock::config::{AirlockConfig, Validate};
use airlock::updater::{AutoUpdater, PackageInstaller};
use airlock::{
    ChannelRegistry, Database, HttpTransport, Keyggdrasil, SupplierRegistry, Transport,
    TrustStore, UpdateCycle, DAL,
};

pub struct AppContext {
    pub config: AirlockConfig,
    pub dal: DAL,
    pub channels: Arc<ChannelRegistry>,
    pub suppliers: Arc<SupplierRegistry>,
}

fn ensure_parent_dir(database_url: &str) -> Result<()> {
    let path = database_url.strip_prefix("sqlite://").unwrap_or(database_url);
    if path == ":memory:" {
        return Ok(());
    }
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    Ok(())
}

impl AppContext {
    /// Validates the configuration, opens the database and runs migrations.
    pub async fn open(config: AirlockConfig) -> Result<Self> {
        config.validate().context("Invalid configuration")?;

        ensure_parent_dir(&config.database.url)?;
        let database = Database::new(&config.database.url)
            .with_context(|| format!("Failed to open database {}", config.database.url))?;
        database
            .run_migrations()
            .await
            .context("Failed to run database migrations")?;

        let channels = Arc::new(config.channel_registry()?);
        let suppliers = Arc::new(SupplierRegistry::new(TrustStore::new(
            config.trust.store_dir.clone(),
        )));

        Ok(Self {
            config,
            dal: DAL::new(database),
            channels,
            suppliers,
        })
    }

    pub fn transport(&self) -> Result<Arc<dyn Transport>> {
        let transport = HttpTransport::new(self.config.transport_config())
            .context("Failed to build HTTP client")?;
        Ok(Arc::new(transport))
    }

    pub fn keyggdrasil(&self, transport: Arc<dyn Transport>) -> Keyggdrasil {
        Keyggdrasil::new(
            self.channels.clone(),
            self.suppliers.clone(),
            self.dal.clone(),
            transport,
            self.config.keyggdrasil_settings(),
        )
    }

    pub fn updater(&self, transport: Arc<dyn Transport>) -> Result<AutoUpdater> {
        let mut installer = PackageInstaller::new(self.config.install_settings());
        if let Some(url) = &self.config.install.site_database_url {
            let site = Database::new(url)
                .with_context(|| format!("Failed to open site database {}", url))?;
            installer = installer.with_database(site);
        }

        Ok(AutoUpdater::new(
            self.channels.clone(),
            self.suppliers.clone(),
            self.dal.clone(),
            transport,
            Arc::new(installer),
            self.config.updater_settings(),
        ))
    }

    pub fn cycle(&self) -> Result<UpdateCycle> {
        let transport = self.transport()?;
        Ok(UpdateCycle::new(
            self.keyggdrasil(transport.clone()),
            self.updater(transport)?,
            self.config.tracked_packages(),
        ))
    }
}
