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

//! Peer quorum behavior against simulated peers.

use chrono::{Duration, Utc};

use airlock::channel::{EnvelopeStatus, PeerAttestation, SignedEnvelope};
use airlock::crypto::generate_signing_keypair;
use airlock::keyggdrasil::{QuorumChecker, QuorumFailure};

use crate::fixtures::{MockTransport, SimChannel};

const ROOT: &str = "7f0c2a5e9d3b1f4a6c8e0d2b4f6a8c0e1d3f5b7a9c1e3d5f7b9a1c3e5d7f9b1a";

fn checker(transport: &MockTransport, min_quorum: usize) -> QuorumChecker<'_> {
    QuorumChecker::new(transport, min_quorum, Duration::days(1), false)
}

/// Ten peers, quorum of three: seven unreachable peers stay under the
/// failure bound of eight.
#[tokio::test]
async fn test_quorum_survives_unreachable_peers() {
    let transport = MockTransport::new();
    let channel = SimChannel::new("main", 10);
    for index in 0..3 {
        channel.attest(&transport, index, ROOT.to_string());
    }

    let report = checker(&transport, 3).check(&channel.channel(), ROOT).await;
    assert!(report.is_success(), "{:?}", report);
    assert_eq!(report.successes, 3);
    assert!(report.failures <= 7);
}

/// With only two honest peers out of ten the check gives up after eight
/// failures.
#[tokio::test]
async fn test_quorum_fails_after_max_failures() {
    let transport = MockTransport::new();
    let channel = SimChannel::new("main", 10);
    for index in 0..2 {
        channel.attest(&transport, index, ROOT.to_string());
    }

    let report = checker(&transport, 3).check(&channel.channel(), ROOT).await;
    assert_eq!(
        report.result,
        Err(QuorumFailure::TooManyFailures {
            failures: 8,
            max_failure: 8
        })
    );
    assert_eq!(report.failures, 8);
    assert!(report.successes <= 2);
}

/// A single verified attestation to another root stops the check.
#[tokio::test]
async fn test_conflicting_peer_fails_fast() {
    let transport = MockTransport::new();
    let channel = SimChannel::new("main", 3);
    channel.attest(&transport, 0, ROOT.to_string());
    channel.attest(&transport, 1, ROOT.to_string());
    channel.attest(&transport, 2, hex::encode([0x22u8; 32]));

    let report = checker(&transport, 3).check(&channel.channel(), ROOT).await;
    match report.result {
        Err(QuorumFailure::Conflict { peer, root }) => {
            assert_eq!(peer, channel.peers[2].name);
            assert_eq!(root, hex::encode([0x22u8; 32]));
        }
        other => panic!("Expected Conflict, got {:?}", other),
    }
}

#[tokio::test]
async fn test_not_enough_peers() {
    let transport = MockTransport::new();
    let channel = SimChannel::new("main", 2);
    channel.attest_all(&transport);

    let report = checker(&transport, 3).check(&channel.channel(), ROOT).await;
    assert_eq!(
        report.result,
        Err(QuorumFailure::NotEnoughPeers {
            configured: 2,
            required: 3
        })
    );
    // No peer is contacted when the quorum is unreachable by construction
    assert!(transport.requests().is_empty());
}

#[tokio::test]
async fn test_quorum_disabled() {
    let transport = MockTransport::new();
    let channel = SimChannel::new("main", 0);

    let report = checker(&transport, 0).check(&channel.channel(), ROOT).await;
    assert!(report.is_success());
    assert_eq!(report.successes, 0);
}

/// Stale, replayed and unauthenticated attestations count as failures, not
/// as disagreement.
#[tokio::test]
async fn test_unusable_attestations_are_failures() {
    let transport = MockTransport::new();
    let channel = SimChannel::new("main", 5);
    channel.attest(&transport, 0, ROOT.to_string());
    channel.attest(&transport, 1, ROOT.to_string());

    // Stale
    let stale_key = channel.peers[2].key.private_key.clone();
    transport.route(channel.peers[2].url.clone(), move |body| {
        let attestation = PeerAttestation {
            challenge: body["challenge"].as_str().unwrap_or_default().to_string(),
            root: ROOT.to_string(),
            timestamp: Utc::now() - Duration::days(3),
        };
        Ok(SignedEnvelope::seal(EnvelopeStatus::Ok, &attestation, &stale_key)
            .unwrap()
            .into_peer_response())
    });

    // Replayed challenge
    let replay_key = channel.peers[3].key.private_key.clone();
    transport.route(channel.peers[3].url.clone(), move |_| {
        let attestation = PeerAttestation {
            challenge: "cmVwbGF5ZWQ=".to_string(),
            root: ROOT.to_string(),
            timestamp: Utc::now(),
        };
        Ok(SignedEnvelope::seal(EnvelopeStatus::Ok, &attestation, &replay_key)
            .unwrap()
            .into_peer_response())
    });

    // Signed by a key the peer is not configured with
    let wrong_key = generate_signing_keypair().private_key;
    transport.route(channel.peers[4].url.clone(), move |body| {
        let attestation = PeerAttestation {
            challenge: body["challenge"].as_str().unwrap_or_default().to_string(),
            root: hex::encode([0x33u8; 32]),
            timestamp: Utc::now(),
        };
        Ok(SignedEnvelope::seal(EnvelopeStatus::Ok, &attestation, &wrong_key)
            .unwrap()
            .into_peer_response())
    });

    let report = checker(&transport, 3).check(&channel.channel(), ROOT).await;
    assert!(!report.is_success());
    assert!(!matches!(report.result, Err(QuorumFailure::Conflict { .. })));
    assert_eq!(report.successes, 2);
    assert_eq!(report.failures, 3);
}
