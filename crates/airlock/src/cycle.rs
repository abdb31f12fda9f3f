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

//! A full update cycle: Keyggdrasil first, then the update pipeline.
//!
//! The updater only installs checksums Keyggdrasil has anchored, so it must
//! see the log as of this cycle.

use tracing::info;

use crate::error::CycleError;
use crate::keyggdrasil::{ChannelOutcome, Keyggdrasil};
use crate::models::PackageId;
use crate::updater::{AutoUpdater, TrackedPackage, UpdateOutcome};

#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub channels: Vec<(String, ChannelOutcome)>,
    pub packages: Vec<(PackageId, UpdateOutcome)>,
}

impl CycleReport {
    /// Whether any channel or package ended in a rejection.
    pub fn has_rejections(&self) -> bool {
        self.channels
            .iter()
            .any(|(_, o)| matches!(o, ChannelOutcome::Rejected(_)))
            || self
                .packages
                .iter()
                .any(|(_, o)| matches!(o, UpdateOutcome::Rejected(_)))
    }
}

pub struct UpdateCycle {
    keyggdrasil: Keyggdrasil,
    updater: AutoUpdater,
    packages: Vec<TrackedPackage>,
}

impl UpdateCycle {
    pub fn new(keyggdrasil: Keyggdrasil, updater: AutoUpdater, packages: Vec<TrackedPackage>) -> Self {
        Self {
            keyggdrasil,
            updater,
            packages,
        }
    }

    pub fn keyggdrasil(&self) -> &Keyggdrasil {
        &self.keyggdrasil
    }

    pub fn updater(&self) -> &AutoUpdater {
        &self.updater
    }

    pub fn packages(&self) -> &[TrackedPackage] {
        &self.packages
    }

    pub async fn run(&self) -> Result<CycleReport, CycleError> {
        let channels = self.keyggdrasil.run_cycle().await?;
        let packages = self.updater.run(&self.packages).await?;

        let installed = packages
            .iter()
            .filter(|(_, o)| matches!(o, UpdateOutcome::Installed { .. }))
            .count();
        info!(
            channels = channels.len(),
            packages = packages.len(),
            installed,
            "Update cycle complete"
        );
        Ok(CycleReport { channels, packages })
    }
}
