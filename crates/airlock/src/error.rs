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

//! Error types for the update and Keyggdrasil pipelines.
//!
//! [`UpdateError`] is the per-channel / per-package failure taxonomy. It is
//! logged and reported as an outcome, never propagated out of a cycle.
//! [`CycleError`] is reserved for conditions that make the whole cycle
//! meaningless: nothing reachable, or local state that cannot be written.

use thiserror::Error;

use crate::dal::DalError;
use crate::models::PackageId;
use crate::trust::TrustStoreError;

#[derive(Debug, Clone, Error)]
pub enum UpdateError {
    #[error("Transport error on channel '{channel}' at {url}: {message}")]
    Transport {
        channel: String,
        url: String,
        message: String,
    },

    #[error("Channel '{channel}' failed authentication at {url}: {reason}")]
    ChannelAuthentication {
        channel: String,
        url: String,
        reason: String,
    },

    #[error("Event authentication failed on channel '{channel}' (supplier {supplier:?}, sequence {sequence_id:?}): {reason}")]
    EventAuthentication {
        channel: String,
        supplier: Option<String>,
        sequence_id: Option<i64>,
        reason: String,
    },

    #[error("Quorum failure on channel '{channel}' for root {root} ({successes} agreed, {failures} failed): {reason}")]
    Quorum {
        channel: String,
        root: String,
        successes: usize,
        failures: usize,
        reason: String,
    },

    #[error("Release signature for {package} {version} did not verify: {reason}")]
    Signature {
        package: PackageId,
        version: String,
        reason: String,
    },

    #[error("Checksum mismatch for {package} {version}: channel advertised {expected}, downloaded {actual}")]
    ChecksumMismatch {
        package: PackageId,
        version: String,
        expected: String,
        actual: String,
    },

    #[error("No Keyggdrasil record anchors {package} {version} with checksum {checksum}")]
    KeyTransparencyMismatch {
        package: PackageId,
        version: String,
        checksum: String,
    },

    #[error("Install of {package} {version} failed: {reason}")]
    Install {
        package: PackageId,
        version: String,
        reason: String,
    },
}

impl UpdateError {
    /// Short machine-readable name of the failure class.
    pub fn kind(&self) -> &'static str {
        match self {
            UpdateError::Transport { .. } => "transport",
            UpdateError::ChannelAuthentication { .. } => "channel_authentication",
            UpdateError::EventAuthentication { .. } => "event_authentication",
            UpdateError::Quorum { .. } => "quorum",
            UpdateError::Signature { .. } => "signature",
            UpdateError::ChecksumMismatch { .. } => "checksum_mismatch",
            UpdateError::KeyTransparencyMismatch { .. } => "key_transparency_mismatch",
            UpdateError::Install { .. } => "install",
        }
    }
}

/// Errors that terminate a whole cycle.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("No channel could be reached")]
    NoChannelReachable,

    #[error("Trust store unavailable: {0}")]
    TrustStore(#[from] TrustStoreError),

    #[error("Merkle log unavailable: {0}")]
    Database(#[from] DalError),
}
