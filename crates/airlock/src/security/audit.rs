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

//! Security audit logging for SIEM integration.
//!
//! Every trust decision made by a cycle is emitted here as a structured
//! `tracing` event with a dot-notation `event_type` field:
//! - Keyggdrasil log mutations (key inserted/revoked, release anchored)
//! - Channel, event and quorum failures
//! - Package install outcomes
//!
//! `tracing` has no critical level; install failures that leave a package in
//! an indeterminate state are logged at `error` with `severity = "critical"`.

use crate::models::PackageId;

/// Event types.
pub mod events {
    /// Key inserted into a supplier's trust set.
    pub const KEY_INSERTED: &str = "keyggdrasil.key.inserted";
    /// Key revoked from a supplier's trust set.
    pub const KEY_REVOKED: &str = "keyggdrasil.key.revoked";
    /// Release checksum anchored in the log.
    pub const RELEASE_ANCHORED: &str = "keyggdrasil.release.anchored";
    /// Persisted log row could not be decoded.
    pub const LOG_ROW_CORRUPT: &str = "keyggdrasil.log.corrupt";

    /// Transport failure on one URL.
    pub const TRANSPORT_FAILURE: &str = "channel.transport.failure";
    /// Channel signature or sentinel rejected.
    pub const CHANNEL_AUTH_FAILURE: &str = "channel.auth.failure";
    /// Event signature, sequence or key rejected.
    pub const EVENT_AUTH_FAILURE: &str = "event.auth.failure";
    /// Peers did not attest to the candidate root.
    pub const QUORUM_FAILURE: &str = "quorum.failure";

    /// Update installed.
    pub const UPDATE_INSTALLED: &str = "update.installed";
    /// Update rejected before any file was touched.
    pub const UPDATE_REJECTED: &str = "update.rejected";
    /// File replacement failed mid-install.
    pub const INSTALL_FAILURE: &str = "install.failure";
}

/// Log a key insertion.
pub fn log_key_inserted(
    channel: &str,
    supplier: &str,
    sequence_id: i64,
    key_type: &str,
    key_fingerprint: &str,
) {
    tracing::warn!(
        event_type = events::KEY_INSERTED,
        channel = %channel,
        supplier = %supplier,
        sequence_id,
        key_type = %key_type,
        key_fingerprint = %key_fingerprint,
        "Supplier key inserted"
    );
}

/// Log a key revocation.
pub fn log_key_revoked(
    channel: &str,
    supplier: &str,
    sequence_id: i64,
    key_type: &str,
    key_fingerprint: &str,
) {
    tracing::warn!(
        event_type = events::KEY_REVOKED,
        channel = %channel,
        supplier = %supplier,
        sequence_id,
        key_type = %key_type,
        key_fingerprint = %key_fingerprint,
        "Supplier key revoked"
    );
}

/// Log a release anchor.
pub fn log_release_anchored(
    channel: &str,
    supplier: &str,
    sequence_id: i64,
    package_type: &str,
    package_name: &str,
    version: &str,
    checksum: &str,
) {
    tracing::info!(
        event_type = events::RELEASE_ANCHORED,
        channel = %channel,
        supplier = %supplier,
        sequence_id,
        package_type = %package_type,
        package_name = %package_name,
        version = %version,
        checksum = %checksum,
        "Release checksum anchored"
    );
}

/// Log an undecodable row in the local Merkle log.
pub fn log_row_corrupt(channel: &str, row_id: i32, sequence_id: i64, reason: &str) {
    tracing::error!(
        event_type = events::LOG_ROW_CORRUPT,
        channel = %channel,
        row_id,
        sequence_id,
        reason = %reason,
        "Merkle log row is corrupt; run verify-log"
    );
}

/// Log a transport failure. Retried on the next URL.
pub fn log_transport_failure(channel: &str, url: &str, error: &str) {
    tracing::warn!(
        event_type = events::TRANSPORT_FAILURE,
        channel = %channel,
        url = %url,
        error = %error,
        "Channel request failed"
    );
}

/// Log a channel authentication failure.
pub fn log_channel_auth_failure(channel: &str, url: &str, reason: &str) {
    tracing::error!(
        event_type = events::CHANNEL_AUTH_FAILURE,
        channel = %channel,
        url = %url,
        reason = %reason,
        "Channel response failed authentication"
    );
}

/// Log an event authentication failure. The whole batch is rejected.
pub fn log_event_auth_failure(
    channel: &str,
    supplier: Option<&str>,
    sequence_id: Option<i64>,
    reason: &str,
) {
    tracing::error!(
        event_type = events::EVENT_AUTH_FAILURE,
        channel = %channel,
        supplier = supplier.unwrap_or("<unknown>"),
        sequence_id = ?sequence_id,
        reason = %reason,
        "Keyggdrasil batch rejected"
    );
}

/// Log a quorum failure. Trust state is unchanged.
pub fn log_quorum_failure(
    channel: &str,
    root: &str,
    successes: usize,
    failures: usize,
    reason: &str,
) {
    tracing::error!(
        event_type = events::QUORUM_FAILURE,
        channel = %channel,
        root = %root,
        successes,
        failures,
        reason = %reason,
        "Peer quorum not reached"
    );
}

/// Log a successful install.
pub fn log_update_installed(package: &PackageId, from_version: &str, to_version: &str, checksum: &str) {
    tracing::info!(
        event_type = events::UPDATE_INSTALLED,
        package = %package,
        from_version = %from_version,
        to_version = %to_version,
        checksum = %checksum,
        "Update installed"
    );
}

/// Log an update rejected during verification.
pub fn log_update_rejected(package: &PackageId, version: &str, kind: &str, reason: &str) {
    tracing::error!(
        event_type = events::UPDATE_REJECTED,
        package = %package,
        version = %version,
        kind = %kind,
        reason = %reason,
        "Update rejected"
    );
}

/// Log a failed file replacement. The offline marker stays in place.
pub fn log_install_failure(package: &PackageId, version: &str, path: &str, error: &str) {
    tracing::error!(
        event_type = events::INSTALL_FAILURE,
        severity = "critical",
        package = %package,
        version = %version,
        path = %path,
        error = %error,
        "Install failed; package left offline pending manual recovery"
    );
}
