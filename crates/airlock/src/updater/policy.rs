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

//! Automatic upgrade policy.

use serde::{Deserialize, Serialize};

use crate::version::{UpgradeClass, Version};

/// Which upgrade classes may be installed without an administrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatePolicy {
    #[serde(default, alias = "major")]
    pub allow_major: bool,
    #[serde(default = "default_true", alias = "minor")]
    pub allow_minor: bool,
    #[serde(default = "default_true", alias = "patch")]
    pub allow_patch: bool,
}

fn default_true() -> bool {
    true
}

impl Default for UpdatePolicy {
    fn default() -> Self {
        Self {
            allow_major: false,
            allow_minor: true,
            allow_patch: true,
        }
    }
}

impl UpdatePolicy {
    /// Permits every upgrade.
    pub fn all() -> Self {
        Self {
            allow_major: true,
            allow_minor: true,
            allow_patch: true,
        }
    }

    /// Whether moving from `installed` to `candidate` is allowed.
    pub fn allows(&self, installed: &Version, candidate: &Version) -> bool {
        match installed.upgrade_class(candidate) {
            UpgradeClass::None => false,
            UpgradeClass::Patch => self.allow_patch,
            UpgradeClass::Minor => self.allow_minor,
            UpgradeClass::Major => self.allow_major,
        }
    }
}
