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

//! The Keyggdrasil engine.
//!
//! One cycle walks every configured channel:
//!
//! 1. fetch the delta since the local root, trying URLs in order and falling
//!    through on transport or channel-authentication failure;
//! 2. authenticate every event in sequence order against the staged trust
//!    state;
//! 3. extend the local log, require the recomputed root to equal the root the
//!    newest event claims, and ask the channel's peers to attest to it. If
//!    that fails the newest event is dropped and the shorter prefix retried;
//! 4. rewrite the affected supplier files, then persist the accepted prefix
//!    in one transaction. A failure in either step restores the files.

pub mod authenticate;
pub mod quorum;

pub use authenticate::{authenticate_batch, check_sequence, TrustOverlay};
pub use quorum::{max_failure, PeerVerdict, QuorumChecker, QuorumFailure, QuorumReport};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::channel::{
    check_freshness, endpoint, Channel, ChannelRegistry, EnvelopeError, EnvelopeStatus,
    SignedEnvelope, KEYGGDRASIL_FETCH_PATH,
};
use crate::crypto::compute_key_fingerprint;
use crate::dal::{AcceptedEvent, DAL};
use crate::error::{CycleError, UpdateError};
use crate::merkle::MerkleLog;
use crate::models::{Action, KeyUpdate, Supplier, WireKeyUpdate};
use crate::security::audit;
use crate::trust::SupplierRegistry;
use crate::transport::Transport;

/// Payload of a Keyggdrasil fetch response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchPayload {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub updates: Vec<WireKeyUpdate>,
}

/// Engine settings.
#[derive(Debug, Clone)]
pub struct KeyggdrasilSettings {
    /// Peers that must attest before a root is trusted. `0` disables the check.
    pub min_quorum: usize,
    /// Maximum age of a signed "no updates" sentinel.
    pub sentinel_max_age: Duration,
    /// Maximum age of a peer attestation.
    pub peer_response_max_age: Duration,
    pub prefer_anonymity: bool,
}

impl Default for KeyggdrasilSettings {
    fn default() -> Self {
        Self {
            min_quorum: 3,
            sentinel_max_age: Duration::hours(1),
            peer_response_max_age: Duration::days(1),
            prefer_anonymity: false,
        }
    }
}

/// Result of syncing one channel.
#[derive(Debug, Clone)]
pub enum ChannelOutcome {
    NoUpdates,
    Accepted {
        count: usize,
        /// Newest events dropped while isolating a prefix that passed quorum.
        dropped: usize,
        root: String,
    },
    Rejected(UpdateError),
}

impl ChannelOutcome {
    fn is_unreachable(&self) -> bool {
        matches!(self, ChannelOutcome::Rejected(UpdateError::Transport { .. }))
    }
}

enum Fetched {
    NoUpdates,
    Batch(Vec<WireKeyUpdate>),
}

/// The Keyggdrasil engine.
pub struct Keyggdrasil {
    channels: Arc<ChannelRegistry>,
    suppliers: Arc<SupplierRegistry>,
    dal: DAL,
    transport: Arc<dyn Transport>,
    settings: KeyggdrasilSettings,
}

impl Keyggdrasil {
    pub fn new(
        channels: Arc<ChannelRegistry>,
        suppliers: Arc<SupplierRegistry>,
        dal: DAL,
        transport: Arc<dyn Transport>,
        settings: KeyggdrasilSettings,
    ) -> Self {
        Self {
            channels,
            suppliers,
            dal,
            transport,
            settings,
        }
    }

    /// Syncs every channel in name order.
    ///
    /// Per-channel failures are reported as outcomes. Fails only if no channel
    /// could be reached at all, or local state could not be written.
    pub async fn run_cycle(&self) -> Result<Vec<(String, ChannelOutcome)>, CycleError> {
        let mut outcomes = Vec::with_capacity(self.channels.len());
        for channel in self.channels.iter() {
            let outcome = self.sync_channel(channel).await?;
            outcomes.push((channel.name.clone(), outcome));
        }

        if !outcomes.is_empty() && outcomes.iter().all(|(_, o)| o.is_unreachable()) {
            return Err(CycleError::NoChannelReachable);
        }
        Ok(outcomes)
    }

    /// Runs the full state machine for one channel.
    pub async fn sync_channel(&self, channel: &Channel) -> Result<ChannelOutcome, CycleError> {
        let log_dal = self.dal.merkle_log();
        let local_log = log_dal.load_channel_log(&channel.name).await?;
        let last_local = log_dal.last_sequence_id(&channel.name).await?;

        let wire = match self.fetch(channel, &local_log).await {
            Ok(Fetched::NoUpdates) => {
                debug!(channel = %channel.name, "No updates");
                return Ok(ChannelOutcome::NoUpdates);
            }
            Ok(Fetched::Batch(wire)) => wire,
            Err(e) => return Ok(ChannelOutcome::Rejected(e)),
        };

        let events = match self.decode(channel, &wire) {
            Ok(events) => events,
            Err(e) => return Ok(self.reject(e)),
        };

        if let Err(e) = authenticate_batch(&self.suppliers, &channel.name, last_local, &events, Utc::now()) {
            return Ok(self.reject(e));
        }

        let accepted = match self.find_accepted_prefix(channel, &local_log, &events).await {
            Ok(accepted) => accepted,
            Err(e) => return Ok(self.reject(e)),
        };

        // Trust mutations of exactly the accepted prefix.
        let mutations =
            match authenticate_batch(&self.suppliers, &channel.name, last_local, accepted, Utc::now()) {
                Ok(mutations) => mutations,
                Err(e) => return Ok(self.reject(e)),
            };

        let count = accepted.len();
        let dropped = events.len() - count;
        let root = self.persist(channel, &local_log, accepted, mutations).await?;
        info!(channel = %channel.name, count, dropped, root = %root, "Keyggdrasil events accepted");
        Ok(ChannelOutcome::Accepted {
            count,
            dropped,
            root,
        })
    }

    fn reject(&self, error: UpdateError) -> ChannelOutcome {
        match &error {
            UpdateError::EventAuthentication {
                channel,
                supplier,
                sequence_id,
                reason,
            } => audit::log_event_auth_failure(channel, supplier.as_deref(), *sequence_id, reason),
            UpdateError::Quorum {
                channel,
                root,
                successes,
                failures,
                reason,
            } => audit::log_quorum_failure(channel, root, *successes, *failures, reason),
            _ => {}
        }
        ChannelOutcome::Rejected(error)
    }

    /// Fetches the delta since `local_log`'s root.
    async fn fetch(&self, channel: &Channel, local_log: &MerkleLog) -> Result<Fetched, UpdateError> {
        let since = if local_log.is_empty() {
            String::new()
        } else {
            local_log.root_hex()
        };
        let body = json!({ "channel": channel.name, "since": since });

        let mut last_error = UpdateError::Transport {
            channel: channel.name.clone(),
            url: String::new(),
            message: "no URLs configured".to_string(),
        };

        for base in channel.all_urls(self.settings.prefer_anonymity) {
            let url = endpoint(&base, KEYGGDRASIL_FETCH_PATH);
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

            match self.open_fetch_response(channel, response) {
                Ok(fetched) => return Ok(fetched),
                Err(e) if e.is_authentication_failure() || matches!(e, EnvelopeError::Malformed(_)) => {
                    audit::log_channel_auth_failure(&channel.name, &url, &e.to_string());
                    last_error = UpdateError::ChannelAuthentication {
                        channel: channel.name.clone(),
                        url,
                        reason: e.to_string(),
                    };
                }
                Err(e) => {
                    audit::log_transport_failure(&channel.name, &url, &e.to_string());
                    last_error = UpdateError::Transport {
                        channel: channel.name.clone(),
                        url,
                        message: e.to_string(),
                    };
                }
            }
        }

        Err(last_error)
    }

    fn open_fetch_response(
        &self,
        channel: &Channel,
        response: serde_json::Value,
    ) -> Result<Fetched, EnvelopeError> {
        let envelope = SignedEnvelope::from_value(response)?;
        let payload: FetchPayload = envelope.open(&channel.public_key)?;

        if envelope.status == EnvelopeStatus::NoUpdates || payload.updates.is_empty() {
            // An unsigned or replayed sentinel could suppress updates indefinitely.
            check_freshness(payload.timestamp, Utc::now(), self.settings.sentinel_max_age)?;
            return Ok(Fetched::NoUpdates);
        }
        Ok(Fetched::Batch(payload.updates))
    }

    fn decode(&self, channel: &Channel, wire: &[WireKeyUpdate]) -> Result<Vec<KeyUpdate>, UpdateError> {
        wire.iter()
            .map(|w| {
                KeyUpdate::decode(w).map_err(|e| UpdateError::EventAuthentication {
                    channel: channel.name.clone(),
                    supplier: None,
                    sequence_id: None,
                    reason: e.to_string(),
                })
            })
            .collect()
    }

    /// Finds the longest prefix of `events` whose root matches the channel's
    /// claim and passes peer quorum.
    async fn find_accepted_prefix<'e>(
        &self,
        channel: &Channel,
        local_log: &MerkleLog,
        events: &'e [KeyUpdate],
    ) -> Result<&'e [KeyUpdate], UpdateError> {
        let checker = QuorumChecker::new(
            self.transport.as_ref(),
            self.settings.min_quorum,
            self.settings.peer_response_max_age,
            self.settings.prefer_anonymity,
        );

        let mut last_failure = None;
        for len in (1..=events.len()).rev() {
            let prefix = &events[..len];
            let newest = &prefix[len - 1];
            let candidate = local_log.extend(prefix.iter().map(|e| e.raw().as_bytes().to_vec()));
            let root = candidate.root_hex();

            if candidate.root() != newest.merkle_root {
                warn!(
                    channel = %channel.name,
                    sequence_id = newest.sequence_id(),
                    computed = %root,
                    claimed = %newest.merkle_root_hex(),
                    "Recomputed root does not match the channel's claim"
                );
                last_failure = Some(UpdateError::Quorum {
                    channel: channel.name.clone(),
                    root: root.clone(),
                    successes: 0,
                    failures: 0,
                    reason: format!(
                        "channel claims root {} after sequence {}",
                        newest.merkle_root_hex(),
                        newest.sequence_id()
                    ),
                });
                continue;
            }

            let report = checker.check(channel, &root).await;
            match report.result {
                Ok(()) => return Ok(prefix),
                Err(failure) => {
                    warn!(channel = %channel.name, len, reason = %failure, "Quorum not reached, retrying shorter prefix");
                    last_failure = Some(UpdateError::Quorum {
                        channel: channel.name.clone(),
                        root,
                        successes: report.successes,
                        failures: report.failures,
                        reason: failure.to_string(),
                    });
                }
            }
        }

        Err(last_failure.unwrap_or_else(|| UpdateError::Quorum {
            channel: channel.name.clone(),
            root: local_log.root_hex(),
            successes: 0,
            failures: 0,
            reason: "empty batch".to_string(),
        }))
    }

    /// Writes an accepted prefix: trust-store files first, then the log rows
    /// in one transaction. If either step fails the supplier files are
    /// restored, so a retried cycle sees the same trust state and the same
    /// local root.
    async fn persist(
        &self,
        channel: &Channel,
        local_log: &MerkleLog,
        accepted: &[KeyUpdate],
        mutations: Vec<Supplier>,
    ) -> Result<String, CycleError> {
        let mut log = local_log.clone();
        let rows: Vec<AcceptedEvent> = accepted
            .iter()
            .map(|event| AcceptedEvent {
                root_hex: hex::encode(log.append([event.raw().as_bytes().to_vec()])),
                event: event.clone(),
            })
            .collect();

        let written = self.write_suppliers(&mutations)?;
        if let Err(e) = self.dal.merkle_log().append_batch(&channel.name, &rows).await {
            self.restore_suppliers(&written);
            return Err(e.into());
        }

        for event in accepted {
            match event.action() {
                Action::Insert { key_type, public_key } => audit::log_key_inserted(
                    &channel.name,
                    event.supplier(),
                    event.sequence_id(),
                    key_type.as_str(),
                    &compute_key_fingerprint(public_key),
                ),
                Action::Revoke { key_type, public_key } => audit::log_key_revoked(
                    &channel.name,
                    event.supplier(),
                    event.sequence_id(),
                    key_type.as_str(),
                    &compute_key_fingerprint(public_key),
                ),
                Action::Release(anchor) => audit::log_release_anchored(
                    &channel.name,
                    event.supplier(),
                    event.sequence_id(),
                    anchor.package_type.as_str(),
                    &anchor.package_name,
                    &anchor.version,
                    &anchor.checksum,
                ),
            }
        }

        Ok(log.root_hex())
    }

    /// Saves every mutated supplier, returning the previous state of each.
    /// A failure part way through restores the files already written.
    fn write_suppliers(
        &self,
        mutations: &[Supplier],
    ) -> Result<Vec<(String, Option<Supplier>)>, CycleError> {
        let store = self.suppliers.store();
        let mut written = Vec::with_capacity(mutations.len());
        for supplier in mutations {
            let saved = store
                .load(&supplier.name)
                .and_then(|previous| store.save(supplier).map(|()| previous));
            match saved {
                Ok(previous) => {
                    self.suppliers.invalidate(&supplier.name);
                    written.push((supplier.name.clone(), previous));
                }
                Err(e) => {
                    self.restore_suppliers(&written);
                    return Err(e.into());
                }
            }
        }
        Ok(written)
    }

    fn restore_suppliers(&self, written: &[(String, Option<Supplier>)]) {
        let store = self.suppliers.store();
        for (name, previous) in written.iter().rev() {
            let restored = match previous {
                Some(supplier) => store.save(supplier),
                None => store.remove(name),
            };
            if let Err(e) = restored {
                error!(supplier = %name, error = %e, "Failed to restore trust store file; manual repair required");
            }
            self.suppliers.invalidate(name);
        }
    }
}
