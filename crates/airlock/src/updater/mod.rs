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

//! The update pipeline.
//!
//! For each tracked package:
//!
//! 1. read the installed version and ask the supplier's channels for newer
//!    releases, keeping those the upgrade policy allows;
//! 2. download the first allowed release and hash it from disk;
//! 3. require the hash to equal the advertised checksum and a release
//!    signature from a currently trusted sub key over it;
//! 4. require a Keyggdrasil release event anchoring that checksum;
//! 5. hand the artifact to the [`Installer`].
//!
//! Any failure in steps 2-4 rejects the release before a file is touched.

pub mod archive;
pub mod error;
pub mod installer;
pub mod offline;
pub mod policy;
pub mod scripts;

pub use archive::{read_manifest, unpack_package, PackageManifest, ScriptCategory, ScriptEntry, MANIFEST_FILENAME};
pub use error::InstallError;
pub use installer::{InstallReport, InstallSettings, Installer, PackageInstaller};
pub use offline::{OfflineMarker, StillOffline};
pub use policy::UpdatePolicy;
pub use scripts::{ScriptOutcome, ScriptSandbox, SANDBOX_PATH};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::channel::{
    check_freshness, endpoint, Channel, ChannelRegistry, EnvelopeError, EnvelopeStatus,
    SignedEnvelope, DOWNLOAD_PATH, UPDATES_PATH,
};
use crate::crypto::{constant_time_eq, hash_file, verify_signature};
use crate::dal::DAL;
use crate::error::{CycleError, UpdateError};
use crate::models::{KeyType, PackageId, UpdateArtifact, UpdatePackageInfo};
use crate::security::audit;
use crate::transport::Transport;
use crate::trust::SupplierRegistry;
use crate::version::{is_upgrade, Version};

/// One release in an updates response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseRecord {
    pub version: String,
    /// Hex artifact checksum.
    pub checksum: String,
    /// Base64 Ed25519 signature over the decoded checksum.
    pub signature: String,
    pub merkle_root: String,
}

/// Payload of an updates response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdatesPayload {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub updates: Vec<ReleaseRecord>,
}

/// A package the updater keeps current.
#[derive(Debug, Clone)]
pub struct TrackedPackage {
    pub package: PackageId,
    /// Overrides the global policy.
    pub policy: Option<UpdatePolicy>,
}

#[derive(Debug, Clone)]
pub enum UpdateOutcome {
    /// The package is not installed, so it is not auto-updated.
    NotInstalled,
    UpToDate {
        installed: Version,
    },
    /// Newer releases exist but the policy allows none of them.
    Skipped {
        installed: Version,
        available: Vec<Version>,
    },
    /// An allowed release exists. Only reported by [`AutoUpdater::check`].
    Available {
        installed: Version,
        next: Version,
    },
    Installed {
        from: Version,
        to: Version,
    },
    Rejected(UpdateError),
}

#[derive(Debug, Clone)]
pub struct UpdaterSettings {
    pub default_policy: UpdatePolicy,
    pub prefer_anonymity: bool,
    /// Maximum age of a signed updates response.
    pub response_max_age: Duration,
}

impl Default for UpdaterSettings {
    fn default() -> Self {
        Self {
            default_policy: UpdatePolicy::default(),
            prefer_anonymity: false,
            response_max_age: Duration::hours(1),
        }
    }
}

enum Failure {
    Update(UpdateError),
    Cycle(CycleError),
}

impl From<UpdateError> for Failure {
    fn from(e: UpdateError) -> Self {
        Failure::Update(e)
    }
}

impl From<CycleError> for Failure {
    fn from(e: CycleError) -> Self {
        Failure::Cycle(e)
    }
}

enum Plan {
    Done(UpdateOutcome),
    Install {
        installed: Version,
        next: UpdatePackageInfo,
    },
}

pub struct AutoUpdater {
    channels: Arc<ChannelRegistry>,
    suppliers: Arc<SupplierRegistry>,
    dal: DAL,
    transport: Arc<dyn Transport>,
    installer: Arc<dyn Installer>,
    settings: UpdaterSettings,
}

impl AutoUpdater {
    pub fn new(
        channels: Arc<ChannelRegistry>,
        suppliers: Arc<SupplierRegistry>,
        dal: DAL,
        transport: Arc<dyn Transport>,
        installer: Arc<dyn Installer>,
        settings: UpdaterSettings,
    ) -> Self {
        Self {
            channels,
            suppliers,
            dal,
            transport,
            installer,
            settings,
        }
    }

    /// Updates every tracked package in order.
    pub async fn run(
        &self,
        packages: &[TrackedPackage],
    ) -> Result<Vec<(PackageId, UpdateOutcome)>, CycleError> {
        let mut outcomes = Vec::with_capacity(packages.len());
        for tracked in packages {
            let outcome = self.update(tracked).await?;
            outcomes.push((tracked.package.clone(), outcome));
        }
        Ok(outcomes)
    }

    /// Reports what [`update`](Self::update) would install, without downloading.
    pub async fn check(&self, tracked: &TrackedPackage) -> Result<UpdateOutcome, CycleError> {
        match self.plan(tracked).await {
            Ok(Plan::Done(outcome)) => Ok(outcome),
            Ok(Plan::Install { installed, next }) => Ok(UpdateOutcome::Available {
                installed,
                next: next.version,
            }),
            Err(Failure::Update(e)) => Ok(UpdateOutcome::Rejected(e)),
            Err(Failure::Cycle(e)) => Err(e),
        }
    }

    /// Runs the whole pipeline for one package.
    ///
    /// At most one release is installed per call: the oldest one the policy
    /// allows.
    pub async fn update(&self, tracked: &TrackedPackage) -> Result<UpdateOutcome, CycleError> {
        let (installed, next) = match self.plan(tracked).await {
            Ok(Plan::Done(outcome)) => return Ok(outcome),
            Ok(Plan::Install { installed, next }) => (installed, next),
            Err(Failure::Update(e)) => return Ok(UpdateOutcome::Rejected(e)),
            Err(Failure::Cycle(e)) => return Err(e),
        };

        match self.apply(&next).await {
            Ok(()) => {
                audit::log_update_installed(
                    &next.package,
                    installed.as_str(),
                    next.version.as_str(),
                    &next.checksum,
                );
                Ok(UpdateOutcome::Installed {
                    from: installed,
                    to: next.version,
                })
            }
            Err(Failure::Update(e)) => {
                audit::log_update_rejected(&next.package, next.version.as_str(), e.kind(), &e.to_string());
                Ok(UpdateOutcome::Rejected(e))
            }
            Err(Failure::Cycle(e)) => Err(e),
        }
    }

    async fn plan(&self, tracked: &TrackedPackage) -> Result<Plan, Failure> {
        let package = &tracked.package;
        let installed = match self.installer.installed_version(package) {
            Ok(Some(version)) => version,
            Ok(None) => {
                debug!(package = %package, "Not installed; skipping");
                return Ok(Plan::Done(UpdateOutcome::NotInstalled));
            }
            Err(e) => {
                return Err(UpdateError::Install {
                    package: package.clone(),
                    version: String::new(),
                    reason: e.to_string(),
                }
                .into())
            }
        };

        let candidates = self.available_updates(package, &installed).await?;
        if candidates.is_empty() {
            return Ok(Plan::Done(UpdateOutcome::UpToDate { installed }));
        }

        let policy = tracked.policy.unwrap_or(self.settings.default_policy);
        match candidates
            .iter()
            .find(|c| policy.allows(&installed, &c.version))
        {
            Some(next) => Ok(Plan::Install {
                next: next.clone(),
                installed,
            }),
            None => {
                info!(
                    package = %package,
                    installed = %installed,
                    "Newer releases available but not allowed by policy"
                );
                Ok(Plan::Done(UpdateOutcome::Skipped {
                    available: candidates.into_iter().map(|c| c.version).collect(),
                    installed,
                }))
            }
        }
    }

    /// Newer releases across the supplier's channels, oldest first.
    async fn available_updates(
        &self,
        package: &PackageId,
        installed: &Version,
    ) -> Result<Vec<UpdatePackageInfo>, Failure> {
        let channels = self.channels_for(package)?;

        let mut found = Vec::new();
        let mut reached = false;
        let mut last_error = None;
        for channel in &channels {
            match self.query_channel(channel, package, installed).await {
                Ok(releases) => {
                    reached = true;
                    found.extend(releases);
                }
                Err(e) => last_error = Some(e),
            }
        }
        if !reached {
            if let Some(e) = last_error {
                return Err(e.into());
            }
        }

        found.retain(|info| is_upgrade(installed.expanded(), info.version.expanded()));
        found.sort_by(|a, b| a.version.cmp(&b.version));
        found.dedup_by(|a, b| a.version == b.version && a.checksum == b.checksum);
        Ok(found)
    }

    /// The channels the supplier is known on, or every channel for a
    /// supplier not seen on any yet.
    fn channels_for(&self, package: &PackageId) -> Result<Vec<Arc<Channel>>, Failure> {
        let supplier = self
            .suppliers
            .get(&package.supplier)
            .map_err(|e| Failure::Cycle(e.into()))?;
        let known: Vec<Arc<Channel>> = supplier
            .iter()
            .flat_map(|s| s.channels.iter())
            .filter_map(|name| self.channels.get(name))
            .collect();
        if known.is_empty() {
            Ok(self.channels.iter().cloned().collect())
        } else {
            Ok(known)
        }
    }

    async fn query_channel(
        &self,
        channel: &Channel,
        package: &PackageId,
        installed: &Version,
    ) -> Result<Vec<UpdatePackageInfo>, UpdateError> {
        let body = json!({
            "type": package.kind.as_str(),
            "supplier": package.supplier,
            "package": package.name,
            "minimum_version": installed.as_str(),
        });

        let mut last_error = UpdateError::Transport {
            channel: channel.name.clone(),
            url: String::new(),
            message: "no URLs configured".to_string(),
        };

        for base in channel.all_urls(self.settings.prefer_anonymity) {
            let url = endpoint(&base, UPDATES_PATH);
            let response = match self.transport.post_json(&url, &body).await {
                Ok(response) => response,
                Err(e) => {
                    audit::log_transport_failure(&channel.name, &url, &e.to_string());
                    last_error = UpdateError::Transport {
                        channel: channel.name.clone(),
                        url,
                        message: e.to_string(),
                    };
                    continue;
                }
            };

            match self.open_updates_response(channel, &base, package, response) {
                Ok(releases) => return Ok(releases),
                Err(EnvelopeError::Remote(message)) => {
                    audit::log_transport_failure(&channel.name, &url, &message);
                    last_error = UpdateError::Transport {
                        channel: channel.name.clone(),
                        url,
                        message,
                    };
                }
                Err(e) => {
                    audit::log_channel_auth_failure(&channel.name, &url, &e.to_string());
                    last_error = UpdateError::ChannelAuthentication {
                        channel: channel.name.clone(),
                        url,
                        reason: e.to_string(),
                    };
                }
            }
        }

        Err(last_error)
    }

    fn open_updates_response(
        &self,
        channel: &Channel,
        base: &str,
        package: &PackageId,
        response: serde_json::Value,
    ) -> Result<Vec<UpdatePackageInfo>, EnvelopeError> {
        let envelope = SignedEnvelope::from_value(response)?;
        let payload: UpdatesPayload = envelope.open(&channel.public_key)?;
        check_freshness(payload.timestamp, Utc::now(), self.settings.response_max_age)?;
        if envelope.status == EnvelopeStatus::NoUpdates {
            return Ok(Vec::new());
        }

        payload
            .updates
            .into_iter()
            .map(|record| {
                let release_signature = STANDARD.decode(&record.signature).map_err(|e| {
                    EnvelopeError::Malformed(format!(
                        "release {} signature: {}",
                        record.version, e
                    ))
                })?;
                Ok(UpdatePackageInfo {
                    package: package.clone(),
                    version: Version::new(record.version),
                    channel: channel.name.clone(),
                    channel_url: base.to_string(),
                    checksum: record.checksum.trim().to_lowercase(),
                    release_signature,
                    merkle_root: record.merkle_root,
                })
            })
            .collect()
    }

    async fn apply(&self, info: &UpdatePackageInfo) -> Result<(), Failure> {
        let artifact = self.download(info).await?;
        self.verify_checksum(&artifact)?;
        self.verify_signature(&artifact)?;
        self.verify_anchor(&artifact).await?;

        self.installer
            .install(&artifact)
            .await
            .map_err(|e| UpdateError::Install {
                package: info.package.clone(),
                version: info.version.to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    async fn download(&self, info: &UpdatePackageInfo) -> Result<UpdateArtifact, Failure> {
        let install_error = |reason: String| UpdateError::Install {
            package: info.package.clone(),
            version: info.version.to_string(),
            reason,
        };

        let file = tempfile::NamedTempFile::new()
            .map_err(|e| install_error(format!("cannot create download file: {}", e)))?;
        let path = file.into_temp_path();

        let body = json!({
            "type": info.package.kind.as_str(),
            "supplier": info.package.supplier,
            "package": info.package.name,
            "version": info.version.as_str(),
        });

        // The advertising URL first, then the channel's other URLs.
        let mut bases = vec![info.channel_url.clone()];
        if let Some(channel) = self.channels.get(&info.channel) {
            for base in channel.all_urls(self.settings.prefer_anonymity) {
                if !bases.contains(&base) {
                    bases.push(base);
                }
            }
        }

        let mut last_error = UpdateError::Transport {
            channel: info.channel.clone(),
            url: String::new(),
            message: "no URLs configured".to_string(),
        };
        for base in bases {
            let url = endpoint(&base, DOWNLOAD_PATH);
            match self.transport.download(&url, &body, &path).await {
                Ok(size) => {
                    let hash = hash_file(&path)
                        .map_err(|e| install_error(format!("cannot hash download: {}", e)))?;
                    debug!(package = %info.package, size, hash = %hash, "Downloaded artifact");
                    return Ok(UpdateArtifact::new(info.clone(), path, size, hash));
                }
                Err(e) => {
                    audit::log_transport_failure(&info.channel, &url, &e.to_string());
                    last_error = UpdateError::Transport {
                        channel: info.channel.clone(),
                        url,
                        message: e.to_string(),
                    };
                }
            }
        }
        Err(last_error.into())
    }

    fn verify_checksum(&self, artifact: &UpdateArtifact) -> Result<(), UpdateError> {
        let info = &artifact.info;
        let matches = match (hex::decode(&info.checksum), hex::decode(&artifact.hash)) {
            (Ok(expected), Ok(actual)) => constant_time_eq(&expected, &actual),
            _ => false,
        };
        if matches {
            Ok(())
        } else {
            Err(UpdateError::ChecksumMismatch {
                package: info.package.clone(),
                version: info.version.to_string(),
                expected: info.checksum.clone(),
                actual: artifact.hash.clone(),
            })
        }
    }

    fn verify_signature(&self, artifact: &UpdateArtifact) -> Result<(), Failure> {
        let info = &artifact.info;
        let signature_error = |reason: &str| UpdateError::Signature {
            package: info.package.clone(),
            version: info.version.to_string(),
            reason: reason.to_string(),
        };

        let supplier = self
            .suppliers
            .get(&info.package.supplier)
            .map_err(|e| Failure::Cycle(e.into()))?
            .ok_or_else(|| signature_error("supplier is not in the trust store"))?;
        let digest =
            hex::decode(&artifact.hash).map_err(|_| signature_error("artifact hash is not hex"))?;

        let verified = supplier
            .trusted_keys(KeyType::Sub, Utc::now())
            .any(|key| verify_signature(&digest, &info.release_signature, &key.public_key).is_ok());
        if verified {
            Ok(())
        } else {
            Err(signature_error("no currently trusted sub key signed this checksum").into())
        }
    }

    async fn verify_anchor(&self, artifact: &UpdateArtifact) -> Result<(), Failure> {
        let info = &artifact.info;
        let mismatch = || UpdateError::KeyTransparencyMismatch {
            package: info.package.clone(),
            version: info.version.to_string(),
            checksum: artifact.hash.clone(),
        };

        let leaf = self
            .dal
            .merkle_log()
            .find_release(&info.package, &artifact.hash)
            .await
            .map_err(|e| Failure::Cycle(e.into()))?
            .ok_or_else(mismatch)?;

        // A damaged row cannot vouch for anything, but it only affects this package.
        let event = leaf.decode().map_err(|e| {
            audit::log_row_corrupt(&leaf.channel, leaf.id, leaf.channel_sequence_id, &e.to_string());
            mismatch()
        })?;
        match event.release() {
            Some((_, anchor)) if anchor.version == info.version.as_str() => Ok(()),
            _ => {
                warn!(
                    package = %info.package,
                    version = %info.version,
                    "Checksum is anchored for a different version"
                );
                Err(mismatch().into())
            }
        }
    }
}
