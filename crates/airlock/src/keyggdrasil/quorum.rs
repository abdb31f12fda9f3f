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

//! Peer quorum over a candidate Merkle root.
//!
//! Peers are challenged one at a time in a freshly shuffled order. The check
//! stops as soon as `min_success` peers attest to the candidate root, or as
//! soon as `max_failure` peers were unreachable or returned an unusable
//! response. A verified attestation to any other root fails the check
//! immediately.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{Duration, Utc};
use rand::seq::SliceRandom;
use rand::RngCore;
use serde_json::json;
use tracing::{debug, warn};

use crate::channel::{check_freshness, Channel, Peer, PeerAttestation, SignedEnvelope};
use crate::crypto::constant_time_eq;
use crate::transport::Transport;

/// Nonce length in bytes.
pub const CHALLENGE_LEN: usize = 32;

/// Largest number of failed peers tolerated for a given quorum size:
/// `max(1, min(floor(min_success * e), num_peers - 1))`.
pub fn max_failure(min_success: usize, num_peers: usize) -> usize {
    let derived = (min_success as f64 * std::f64::consts::E).floor() as usize;
    derived.min(num_peers.saturating_sub(1)).max(1)
}

/// What a single peer said.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerVerdict {
    Agrees,
    /// A verified attestation to a different root.
    Disagrees { root: String },
    /// Unreachable, unauthenticated, stale or replayed.
    Unavailable { reason: String },
}

/// Why a quorum check failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuorumFailure {
    NotEnoughPeers { configured: usize, required: usize },
    Conflict { peer: String, root: String },
    TooManyFailures { failures: usize, max_failure: usize },
    Exhausted,
}

impl std::fmt::Display for QuorumFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QuorumFailure::NotEnoughPeers {
                configured,
                required,
            } => write!(f, "{} peers configured, {} required", configured, required),
            QuorumFailure::Conflict { peer, root } => {
                write!(f, "peer '{}' attests to a different root {}", peer, root)
            }
            QuorumFailure::TooManyFailures {
                failures,
                max_failure,
            } => write!(f, "{} peers failed (max {})", failures, max_failure),
            QuorumFailure::Exhausted => f.write_str("ran out of peers before reaching quorum"),
        }
    }
}

/// Tally of a quorum check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuorumReport {
    pub successes: usize,
    pub failures: usize,
    pub result: Result<(), QuorumFailure>,
}

impl QuorumReport {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Challenges peers about a candidate root.
pub struct QuorumChecker<'a> {
    transport: &'a dyn Transport,
    min_success: usize,
    response_max_age: Duration,
    prefer_anonymity: bool,
}

impl<'a> QuorumChecker<'a> {
    pub fn new(
        transport: &'a dyn Transport,
        min_success: usize,
        response_max_age: Duration,
        prefer_anonymity: bool,
    ) -> Self {
        Self {
            transport,
            min_success,
            response_max_age,
            prefer_anonymity,
        }
    }

    /// Runs the check for `root_hex` against the peers of `channel`.
    pub async fn check(&self, channel: &Channel, root_hex: &str) -> QuorumReport {
        if self.min_success == 0 {
            warn!(
                channel = %channel.name,
                "Peer quorum disabled (min_quorum = 0); accepting root without attestation"
            );
            return QuorumReport {
                successes: 0,
                failures: 0,
                result: Ok(()),
            };
        }

        let mut peers: Vec<&Peer> = channel.peers.iter().collect();
        if peers.len() < self.min_success {
            return QuorumReport {
                successes: 0,
                failures: 0,
                result: Err(QuorumFailure::NotEnoughPeers {
                    configured: peers.len(),
                    required: self.min_success,
                }),
            };
        }
        peers.shuffle(&mut rand::rngs::OsRng);

        let max_failure = max_failure(self.min_success, peers.len());
        let mut successes = 0;
        let mut failures = 0;

        for peer in peers {
            match self.challenge(peer, root_hex).await {
                PeerVerdict::Agrees => {
                    successes += 1;
                    debug!(peer = %peer.name, successes, "Peer agrees");
                    if successes >= self.min_success {
                        return QuorumReport {
                            successes,
                            failures,
                            result: Ok(()),
                        };
                    }
                }
                PeerVerdict::Disagrees { root } => {
                    return QuorumReport {
                        successes,
                        failures,
                        result: Err(QuorumFailure::Conflict {
                            peer: peer.name.clone(),
                            root,
                        }),
                    };
                }
                PeerVerdict::Unavailable { reason } => {
                    failures += 1;
                    warn!(peer = %peer.name, reason = %reason, failures, max_failure, "Peer unavailable");
                    if failures >= max_failure {
                        return QuorumReport {
                            successes,
                            failures,
                            result: Err(QuorumFailure::TooManyFailures {
                                failures,
                                max_failure,
                            }),
                        };
                    }
                }
            }
        }

        QuorumReport {
            successes,
            failures,
            result: Err(QuorumFailure::Exhausted),
        }
    }

    /// Sends one fresh challenge to a peer, trying its URLs in order.
    pub async fn challenge(&self, peer: &Peer, root_hex: &str) -> PeerVerdict {
        let mut nonce = [0u8; CHALLENGE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce);
        let challenge = BASE64.encode(nonce);
        let body = json!({ "challenge": challenge });

        let mut last_error = "no URLs configured".to_string();
        for url in peer.all_urls(self.prefer_anonymity) {
            let response = match self.transport.post_json(&url, &body).await {
                Ok(response) => response,
                Err(e) => {
                    last_error = e.to_string();
                    continue;
                }
            };
            return self.evaluate(peer, &challenge, root_hex, response);
        }
        PeerVerdict::Unavailable { reason: last_error }
    }

    fn evaluate(
        &self,
        peer: &Peer,
        challenge: &str,
        root_hex: &str,
        response: serde_json::Value,
    ) -> PeerVerdict {
        let unavailable = |reason: String| PeerVerdict::Unavailable { reason };

        let attestation: PeerAttestation =
            match SignedEnvelope::from_value(response).and_then(|env| env.open(&peer.public_key)) {
                Ok(attestation) => attestation,
                Err(e) => return unavailable(e.to_string()),
            };

        if !constant_time_eq(attestation.challenge.as_bytes(), challenge.as_bytes()) {
            return unavailable("challenge mismatch".to_string());
        }
        if let Err(e) = check_freshness(attestation.timestamp, Utc::now(), self.response_max_age) {
            return unavailable(e.to_string());
        }

        let observed = attestation.root.trim().to_ascii_lowercase();
        if constant_time_eq(observed.as_bytes(), root_hex.as_bytes()) {
            PeerVerdict::Agrees
        } else {
            PeerVerdict::Disagrees { root: observed }
        }
    }
}
