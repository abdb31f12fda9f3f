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

//! End-to-end channel sync: fetch, event authentication, root check,
//! quorum, and persistence.

use chrono::{Duration, Utc};
use diesel::sqlite::SqliteConnection;
use diesel::{Connection, RunQueryDsl};

use airlock::crypto::generate_signing_keypair;
use airlock::models::{KeyType, KeyUpdate};
use airlock::{ChannelOutcome, CycleError, UpdateError};

use crate::fixtures::{insert, revoke, Node, SimChannel, SimSupplier};

/// A new supplier is bootstrapped with a self-signed master key, then gains
/// a sub key signed by that master.
#[tokio::test]
async fn test_bootstrap_onboards_supplier() {
    let node = Node::new().await;
    let mut channel = SimChannel::new("main", 3);
    let acme = SimSupplier::new("acme");
    let events = channel.onboard(&acme);

    channel.serve_fetch(&node.transport, &events);
    channel.attest_all(&node.transport);

    let outcome = node
        .keyggdrasil(&[&channel], 3)
        .sync_channel(&channel.channel())
        .await
        .unwrap();
    match outcome {
        ChannelOutcome::Accepted {
            count,
            dropped,
            root,
        } => {
            assert_eq!(count, 2);
            assert_eq!(dropped, 0);
            assert_eq!(root, channel.root_hex());
        }
        other => panic!("Expected Accepted, got {:?}", other),
    }

    // Trust store file written and readable through the registry
    assert!(node.trust_dir().join("acme.json").exists());
    let supplier = node.suppliers.get("acme").unwrap().expect("acme is trusted");
    assert!(supplier.has_key(KeyType::Master, &acme.master.public_key));
    assert!(supplier.has_key(KeyType::Sub, &acme.sub.public_key));
    assert!(supplier.channels.contains("main"));

    // Log rows persisted with their roots
    let log = node.dal.merkle_log();
    let leaves = log.list_for_channel("main").await.unwrap();
    assert_eq!(leaves.len(), 2);
    assert_eq!(leaves[1].merkle_root, channel.root_hex());
    assert_eq!(log.last_sequence_id("main").await.unwrap(), Some(2));
    assert!(log.verify_persisted_log("main").await.unwrap().is_consistent());
}

/// A second cycle only receives the delta and applies a revocation.
#[tokio::test]
async fn test_incremental_sync_revokes_key() {
    let node = Node::new().await;
    let mut channel = SimChannel::new("main", 3);
    let acme = SimSupplier::new("acme");
    let onboarding = channel.onboard(&acme);
    node.sync_honest(&channel, &onboarding, 3).await;

    let revocation = channel.publish("acme", revoke(KeyType::Sub, &acme.sub), &acme.master);
    node.sync_honest(&channel, &[revocation], 3).await;

    let supplier = node.suppliers.get("acme").unwrap().unwrap();
    assert!(supplier.has_key(KeyType::Master, &acme.master.public_key));
    assert!(!supplier.has_key(KeyType::Sub, &acme.sub.public_key));

    let log = node.dal.merkle_log();
    assert_eq!(log.last_sequence_id("main").await.unwrap(), Some(3));
    assert_eq!(log.latest_root("main").await.unwrap(), Some(channel.root_hex()));
}

/// A fresh signed sentinel means there is nothing to do.
#[tokio::test]
async fn test_no_updates_sentinel() {
    let node = Node::new().await;
    let channel = SimChannel::new("main", 3);
    channel.serve_fetch(&node.transport, &[]);

    let outcome = node
        .keyggdrasil(&[&channel], 3)
        .sync_channel(&channel.channel())
        .await
        .unwrap();
    assert!(matches!(outcome, ChannelOutcome::NoUpdates));
    assert!(node.dal.merkle_log().channels().await.unwrap().is_empty());
}

/// A correctly signed sentinel that is hours old could be a replay hiding
/// newer events, so it is rejected.
#[tokio::test]
async fn test_stale_no_updates_sentinel_rejected() {
    let node = Node::new().await;
    let channel = SimChannel::new("main", 3);
    node.transport.respond(
        channel.fetch_url(),
        channel.fetch_response_at(&[], Utc::now() - Duration::hours(3)),
    );

    let outcome = node
        .keyggdrasil(&[&channel], 3)
        .sync_channel(&channel.channel())
        .await
        .unwrap();
    match outcome {
        ChannelOutcome::Rejected(UpdateError::ChannelAuthentication { reason, .. }) => {
            assert!(reason.contains("stale"), "unexpected reason: {}", reason)
        }
        other => panic!("Expected ChannelAuthentication, got {:?}", other),
    }
    assert!(node.dal.merkle_log().channels().await.unwrap().is_empty());
}

/// A response signed by anything but the channel key is not trusted.
#[tokio::test]
async fn test_response_signed_by_wrong_key_rejected() {
    let node = Node::new().await;
    let mut channel = SimChannel::new("main", 3);
    let impostor = SimChannel::new("main", 0);
    let acme = SimSupplier::new("acme");
    let events = channel.onboard(&acme);

    node.transport
        .respond(channel.fetch_url(), impostor.fetch_response(&events));
    channel.attest_all(&node.transport);

    let outcome = node
        .keyggdrasil(&[&channel], 3)
        .sync_channel(&channel.channel())
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        ChannelOutcome::Rejected(UpdateError::ChannelAuthentication { .. })
    ));
    assert!(node.suppliers.get("acme").unwrap().is_none());
}

/// A key insert signed by a key the supplier never published is rejected
/// and nothing is written.
#[tokio::test]
async fn test_forged_insert_rejected() {
    let node = Node::new().await;
    let mut channel = SimChannel::new("main", 3);
    let acme = SimSupplier::new("acme");
    let onboarding = channel.onboard(&acme);
    node.sync_honest(&channel, &onboarding, 3).await;

    let attacker = SimSupplier::new("mallory");
    let forged = channel.publish("acme", insert(KeyType::Sub, &attacker.sub), &attacker.master);
    channel.serve_fetch(&node.transport, &[forged]);
    channel.attest_all(&node.transport);

    let outcome = node
        .keyggdrasil(&[&channel], 3)
        .sync_channel(&channel.channel())
        .await
        .unwrap();
    match outcome {
        ChannelOutcome::Rejected(UpdateError::EventAuthentication {
            supplier,
            sequence_id,
            ..
        }) => {
            assert_eq!(supplier.as_deref(), Some("acme"));
            assert_eq!(sequence_id, Some(3));
        }
        other => panic!("Expected EventAuthentication, got {:?}", other),
    }

    let supplier = node.suppliers.get("acme").unwrap().unwrap();
    assert!(!supplier.has_key(KeyType::Sub, &attacker.sub.public_key));
    assert_eq!(node.dal.merkle_log().last_sequence_id("main").await.unwrap(), Some(2));
}

/// Releases must be signed by a sub key, not the master key.
#[tokio::test]
async fn test_release_signed_by_master_rejected() {
    let node = Node::new().await;
    let mut channel = SimChannel::new("main", 3);
    let acme = SimSupplier::new("acme");
    let onboarding = channel.onboard(&acme);
    node.sync_honest(&channel, &onboarding, 3).await;

    let anchor = crate::fixtures::release(airlock::PackageKind::Theme, "dark", "2.1.0", "ab");
    let event = channel.publish("acme", anchor, &acme.master);
    channel.serve_fetch(&node.transport, &[event]);
    channel.attest_all(&node.transport);

    let outcome = node
        .keyggdrasil(&[&channel], 3)
        .sync_channel(&channel.channel())
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        ChannelOutcome::Rejected(UpdateError::EventAuthentication { .. })
    ));
}

/// A gap in sequence ids rejects the whole batch with no side effects.
#[tokio::test]
async fn test_sequence_gap_has_no_side_effects() {
    let node = Node::new().await;
    let mut channel = SimChannel::new("main", 3);
    let acme = SimSupplier::new("acme");
    let globex = SimSupplier::new("globex");

    // Sequence ids 1..=4 are accepted
    let mut first = channel.onboard(&acme);
    first.extend(channel.onboard(&globex));
    node.sync_honest(&channel, &first, 3).await;
    let trust_before = std::fs::read_to_string(node.trust_dir().join("acme.json")).unwrap();

    let rotated = SimSupplier::new("rotated");
    let e5 = channel.publish("acme", insert(KeyType::Sub, &rotated.sub), &acme.master);
    let e6 = channel.publish("acme", insert(KeyType::Sub, &rotated.master), &acme.master);
    let _e7 = channel.publish("acme", revoke(KeyType::Sub, &acme.sub), &acme.master);
    let e8 = channel.publish("acme", revoke(KeyType::Sub, &rotated.master), &acme.master);
    channel.serve_fetch(&node.transport, &[e5, e6, e8]);
    channel.attest_all(&node.transport);

    let outcome = node
        .keyggdrasil(&[&channel], 3)
        .sync_channel(&channel.channel())
        .await
        .unwrap();
    match outcome {
        ChannelOutcome::Rejected(UpdateError::EventAuthentication { sequence_id, .. }) => {
            assert_eq!(sequence_id, Some(8));
        }
        other => panic!("Expected EventAuthentication, got {:?}", other),
    }

    let log = node.dal.merkle_log();
    assert_eq!(log.list_for_channel("main").await.unwrap().len(), 4);
    assert_eq!(log.last_sequence_id("main").await.unwrap(), Some(4));
    let trust_after = std::fs::read_to_string(node.trust_dir().join("acme.json")).unwrap();
    assert_eq!(trust_before, trust_after);
}

/// The recomputed root must equal the root the channel claims.
#[tokio::test]
async fn test_claimed_root_mismatch_rejected() {
    let node = Node::new().await;
    let mut channel = SimChannel::new("main", 3);
    let acme = SimSupplier::new("acme");
    let honest = channel.publish("acme", insert(KeyType::Master, &acme.master), &acme.master);
    let lying = KeyUpdate::from_parts(
        honest.raw().to_string(),
        honest.signature.clone(),
        vec![0xAA; 32],
    )
    .unwrap();

    channel.serve_fetch(&node.transport, &[lying]);
    channel.attest_all(&node.transport);

    let outcome = node
        .keyggdrasil(&[&channel], 3)
        .sync_channel(&channel.channel())
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        ChannelOutcome::Rejected(UpdateError::Quorum { .. })
    ));
    assert!(node.suppliers.get("acme").unwrap().is_none());
    assert!(node.dal.merkle_log().list_for_channel("main").await.unwrap().is_empty());
}

/// Peers attesting to a different root block the batch entirely.
#[tokio::test]
async fn test_peer_disagreement_rejects_batch() {
    let node = Node::new().await;
    let mut channel = SimChannel::new("main", 3);
    let acme = SimSupplier::new("acme");
    let events = channel.onboard(&acme);

    channel.serve_fetch(&node.transport, &events);
    for index in 0..3 {
        channel.attest(&node.transport, index, hex::encode([0x11u8; 32]));
    }

    let outcome = node
        .keyggdrasil(&[&channel], 3)
        .sync_channel(&channel.channel())
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        ChannelOutcome::Rejected(UpdateError::Quorum { .. })
    ));
    assert!(!node.trust_dir().join("acme.json").exists());
    assert!(node.dal.merkle_log().list_for_channel("main").await.unwrap().is_empty());
}

/// When peers have only seen part of a batch, the prefix they attest to is
/// accepted and the rest waits for a later cycle.
#[tokio::test]
async fn test_accepts_prefix_peers_agree_on() {
    let node = Node::new().await;
    let mut channel = SimChannel::new("main", 3);
    let acme = SimSupplier::new("acme");
    let bootstrap = channel.publish("acme", insert(KeyType::Master, &acme.master), &acme.master);
    let seen_root = channel.root_hex();
    let sub = channel.publish("acme", insert(KeyType::Sub, &acme.sub), &acme.master);

    channel.serve_fetch(&node.transport, &[bootstrap, sub.clone()]);
    for index in 0..3 {
        channel.attest(&node.transport, index, seen_root.clone());
    }

    let outcome = node
        .keyggdrasil(&[&channel], 3)
        .sync_channel(&channel.channel())
        .await
        .unwrap();
    match outcome {
        ChannelOutcome::Accepted {
            count,
            dropped,
            root,
        } => {
            assert_eq!(count, 1);
            assert_eq!(dropped, 1);
            assert_eq!(root, seen_root);
        }
        other => panic!("Expected Accepted, got {:?}", other),
    }

    let supplier = node.suppliers.get("acme").unwrap().unwrap();
    assert!(supplier.has_key(KeyType::Master, &acme.master.public_key));
    assert!(!supplier.has_key(KeyType::Sub, &acme.sub.public_key));

    // Once peers catch up the remaining event goes through
    node.sync_honest(&channel, &[sub], 3).await;
    let supplier = node.suppliers.get("acme").unwrap().unwrap();
    assert!(supplier.has_key(KeyType::Sub, &acme.sub.public_key));
}

/// One unreachable channel does not fail the cycle; all unreachable does.
#[tokio::test]
async fn test_cycle_reachability() {
    let node = Node::new().await;
    let mut up = SimChannel::new("alpha", 3);
    let down = SimChannel::new("beta", 3);
    let acme = SimSupplier::new("acme");
    let events = up.onboard(&acme);
    up.serve_fetch(&node.transport, &events);
    up.attest_all(&node.transport);

    let outcomes = node.keyggdrasil(&[&up, &down], 3).run_cycle().await.unwrap();
    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[0].0, "alpha");
    assert!(matches!(outcomes[0].1, ChannelOutcome::Accepted { count: 2, .. }));
    assert!(matches!(
        outcomes[1].1,
        ChannelOutcome::Rejected(UpdateError::Transport { .. })
    ));

    let result = node.keyggdrasil(&[&down], 3).run_cycle().await;
    assert!(matches!(result, Err(airlock::CycleError::NoChannelReachable)));
}

/// Only one of five peers answers: the failure budget runs out before the
/// quorum of four is reached, and nothing is trusted or logged.
#[tokio::test]
async fn test_unreachable_peers_leave_state_unchanged() {
    let node = Node::new().await;
    let mut channel = SimChannel::new("main", 5);
    let acme = SimSupplier::new("acme");
    let bootstrap = channel.publish("acme", insert(KeyType::Master, &acme.master), &acme.master);

    channel.serve_fetch(&node.transport, &[bootstrap]);
    channel.attest(&node.transport, 0, channel.root_hex());

    let outcome = node
        .keyggdrasil(&[&channel], 4)
        .sync_channel(&channel.channel())
        .await
        .unwrap();
    match outcome {
        ChannelOutcome::Rejected(UpdateError::Quorum {
            successes, failures, ..
        }) => {
            assert!(successes <= 1);
            assert_eq!(failures, 4);
        }
        other => panic!("Expected Quorum failure, got {:?}", other),
    }

    assert!(node.suppliers.get("acme").unwrap().is_none());
    assert!(!node.trust_dir().join("acme.json").exists());
    let log = node.dal.merkle_log();
    assert!(log.list_for_channel("main").await.unwrap().is_empty());
    assert_eq!(log.last_sequence_id("main").await.unwrap(), None);
}

/// If a supplier file cannot be written, the events are not logged either,
/// so the next cycle fetches and applies them again.
#[tokio::test]
async fn test_trust_store_write_failure_leaves_log_untouched() {
    let node = Node::new().await;
    let mut channel = SimChannel::new("main", 3);
    let acme = SimSupplier::new("acme");
    let onboarding = channel.onboard(&acme);
    node.sync_honest(&channel, &onboarding, 3).await;
    let root_before = channel.root_hex();

    let sub2 = generate_signing_keypair();
    let event = channel.publish("acme", insert(KeyType::Sub, &sub2), &acme.master);
    channel.serve_fetch(&node.transport, &[event]);
    channel.attest_all(&node.transport);

    // Replace the trust directory with a plain file while peers attest
    let trust_dir = node.trust_dir();
    let parked = node.dir.path().join("trust.parked");
    {
        let (trust_dir, parked) = (trust_dir.clone(), parked.clone());
        channel.attest_with(&node.transport, 0, channel.root_hex(), move || {
            if trust_dir.is_dir() {
                std::fs::rename(&trust_dir, &parked).unwrap();
                std::fs::write(&trust_dir, b"not a directory").unwrap();
            }
        });
    }

    let engine = node.keyggdrasil(&[&channel], 3);
    let result = engine.sync_channel(&channel.channel()).await;
    assert!(matches!(result, Err(CycleError::TrustStore(_))), "got {:?}", result);

    let log = node.dal.merkle_log();
    assert_eq!(log.last_sequence_id("main").await.unwrap(), Some(2));
    assert_eq!(log.latest_root("main").await.unwrap(), Some(root_before));

    std::fs::remove_file(&trust_dir).unwrap();
    std::fs::rename(&parked, &trust_dir).unwrap();
    node.suppliers.invalidate_all();
    channel.attest_all(&node.transport);

    let outcome = engine.sync_channel(&channel.channel()).await.unwrap();
    assert!(matches!(outcome, ChannelOutcome::Accepted { count: 1, .. }));
    let supplier = node.suppliers.get("acme").unwrap().unwrap();
    assert!(supplier.has_key(KeyType::Sub, &sub2.public_key));
    assert_eq!(log.last_sequence_id("main").await.unwrap(), Some(3));
}

/// If the log transaction fails, supplier files written for the batch are
/// put back: existing suppliers regain their old keys, new ones vanish.
#[tokio::test]
async fn test_log_write_failure_restores_trust_store() {
    let node = Node::new().await;
    let mut channel = SimChannel::new("main", 3);
    let acme = SimSupplier::new("acme");
    let globex = SimSupplier::new("globex");
    let onboarding = channel.onboard(&acme);
    node.sync_honest(&channel, &onboarding, 3).await;

    let sub2 = generate_signing_keypair();
    let events = vec![
        channel.publish("acme", insert(KeyType::Sub, &sub2), &acme.master),
        channel.publish("globex", insert(KeyType::Master, &globex.master), &globex.master),
    ];
    channel.serve_fetch(&node.transport, &events);
    channel.attest_all(&node.transport);

    // Another writer claims sequence 4 while peers attest
    let db_path = node.db_path();
    channel.attest_with(&node.transport, 0, channel.root_hex(), move || {
        let mut conn = SqliteConnection::establish(db_path.to_str().unwrap()).unwrap();
        diesel::sql_query(
            "INSERT OR IGNORE INTO merkle_leaves \
             (channel, channel_sequence_id, action, supplier, payload, signature, merkle_root, created_at) \
             VALUES ('main', 4, 'insert', 'other', '{}', '', '', '')",
        )
        .execute(&mut conn)
        .unwrap();
    });

    let result = node
        .keyggdrasil(&[&channel], 3)
        .sync_channel(&channel.channel())
        .await;
    assert!(matches!(result, Err(CycleError::Database(_))), "got {:?}", result);

    let supplier = node.suppliers.get("acme").unwrap().unwrap();
    assert!(supplier.has_key(KeyType::Sub, &acme.sub.public_key));
    assert!(!supplier.has_key(KeyType::Sub, &sub2.public_key));
    assert!(node.suppliers.get("globex").unwrap().is_none());
    assert!(!node.trust_dir().join("globex.json").exists());

    let leaves = node.dal.merkle_log().list_for_channel("main").await.unwrap();
    assert!(leaves.iter().all(|leaf| leaf.channel_sequence_id != 3));
}
