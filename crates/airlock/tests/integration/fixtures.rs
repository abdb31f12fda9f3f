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

//! Shared fixtures: an in-memory transport, a simulated channel with its
//! peers, and a scratch node (database plus trust store).

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

use airlock::channel::{EnvelopeStatus, PeerAttestation, SignedEnvelope};
use airlock::crypto::{generate_signing_keypair, GeneratedKeypair};
use airlock::keyggdrasil::FetchPayload;
use airlock::models::{Action, KeyType, KeyUpdate, KeyUpdateData, PackageKind, ReleaseAnchor};
use airlock::{
    Channel, ChannelRegistry, Database, Keyggdrasil, KeyggdrasilSettings, MerkleLog, Peer,
    SupplierRegistry, Transport, TransportError, TrustStore, DAL,
};

type Handler = Arc<dyn Fn(&Value) -> Result<Value, TransportError> + Send + Sync>;

/// Routes requests by exact URL. Unrouted URLs behave like a refused
/// connection.
#[derive(Default)]
pub struct MockTransport {
    routes: Mutex<HashMap<String, Handler>>,
    files: Mutex<HashMap<String, Vec<u8>>>,
    requests: Mutex<Vec<String>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn route<F>(&self, url: impl Into<String>, handler: F)
    where
        F: Fn(&Value) -> Result<Value, TransportError> + Send + Sync + 'static,
    {
        self.routes.lock().insert(url.into(), Arc::new(handler));
    }

    /// Answers every request to `url` with the same body.
    pub fn respond(&self, url: impl Into<String>, body: Value) {
        self.route(url, move |_| Ok(body.clone()));
    }

    pub fn unroute(&self, url: &str) {
        self.routes.lock().remove(url);
    }

    pub fn serve_file(&self, url: impl Into<String>, bytes: Vec<u8>) {
        self.files.lock().insert(url.into(), bytes);
    }

    /// Every URL requested so far, in order.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self, url: &str) -> usize {
        self.requests.lock().iter().filter(|u| u.as_str() == url).count()
    }
}

fn refused(url: &str) -> TransportError {
    TransportError::Request {
        url: url.to_string(),
        message: "connection refused".to_string(),
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn post_json(&self, url: &str, body: &Value) -> Result<Value, TransportError> {
        self.requests.lock().push(url.to_string());
        let handler = self.routes.lock().get(url).cloned();
        match handler {
            Some(handler) => handler(body),
            None => Err(refused(url)),
        }
    }

    async fn download(&self, url: &str, _body: &Value, dest: &Path) -> Result<u64, TransportError> {
        self.requests.lock().push(url.to_string());
        let bytes = self.files.lock().get(url).cloned().ok_or_else(|| refused(url))?;
        tokio::fs::write(dest, &bytes).await?;
        Ok(bytes.len() as u64)
    }
}

pub fn public_key(keypair: &GeneratedKeypair) -> [u8; 32] {
    keypair.public_key.as_slice().try_into().unwrap()
}

pub fn insert(key_type: KeyType, keypair: &GeneratedKeypair) -> Action {
    Action::Insert {
        key_type,
        public_key: public_key(keypair),
    }
}

pub fn revoke(key_type: KeyType, keypair: &GeneratedKeypair) -> Action {
    Action::Revoke {
        key_type,
        public_key: public_key(keypair),
    }
}

pub fn release(kind: PackageKind, name: &str, version: &str, checksum: &str) -> Action {
    Action::Release(ReleaseAnchor {
        package_type: kind,
        package_name: name.to_string(),
        version: version.to_string(),
        checksum: checksum.to_string(),
    })
}

/// A supplier's key material.
pub struct SimSupplier {
    pub name: String,
    pub master: GeneratedKeypair,
    pub sub: GeneratedKeypair,
}

impl SimSupplier {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            master: generate_signing_keypair(),
            sub: generate_signing_keypair(),
        }
    }
}

pub struct SimPeer {
    pub name: String,
    pub url: String,
    pub key: GeneratedKeypair,
}

/// A channel server and its peers, publishing a real Merkle log.
pub struct SimChannel {
    pub name: String,
    pub base_url: String,
    pub key: GeneratedKeypair,
    pub peers: Vec<SimPeer>,
    log: MerkleLog,
    next_sequence_id: i64,
}

impl SimChannel {
    pub fn new(name: &str, peer_count: usize) -> Self {
        let peers = (0..peer_count)
            .map(|i| SimPeer {
                name: format!("{}-peer-{}", name, i),
                url: format!("https://peer{}.{}.example/attest", i, name),
                key: generate_signing_keypair(),
            })
            .collect();
        Self {
            name: name.to_string(),
            base_url: format!("https://{}.example/api", name),
            key: generate_signing_keypair(),
            peers,
            log: MerkleLog::new(),
            next_sequence_id: 1,
        }
    }

    /// The client-side view of this channel.
    pub fn channel(&self) -> Channel {
        Channel {
            name: self.name.clone(),
            urls: vec![self.base_url.clone()],
            public_key: public_key(&self.key),
            peers: self
                .peers
                .iter()
                .map(|p| Peer {
                    name: p.name.clone(),
                    public_key: public_key(&p.key),
                    urls: vec![p.url.clone()],
                })
                .collect(),
        }
    }

    pub fn fetch_url(&self) -> String {
        format!("{}/keyggdrasil/fetch", self.base_url)
    }

    pub fn updates_url(&self) -> String {
        format!("{}/updates", self.base_url)
    }

    pub fn download_url(&self) -> String {
        format!("{}/download", self.base_url)
    }

    /// Root of the channel's published log.
    pub fn root_hex(&self) -> String {
        self.log.root_hex()
    }

    /// Signs the next event with `signer`, claiming the root after it.
    pub fn publish(&mut self, supplier: &str, action: Action, signer: &GeneratedKeypair) -> KeyUpdate {
        let data = KeyUpdateData {
            channel_sequence_id: self.next_sequence_id,
            date_generated: Utc::now(),
            supplier: supplier.to_string(),
            action,
        };
        self.next_sequence_id += 1;
        let raw = data.canonical_json().unwrap();
        let root = self.log.append([raw.into_bytes()]);
        KeyUpdate::sign(data, &signer.private_key, root).unwrap()
    }

    /// Bootstrap (self-signed master) followed by a master-signed sub key.
    pub fn onboard(&mut self, supplier: &SimSupplier) -> Vec<KeyUpdate> {
        vec![
            self.publish(&supplier.name, insert(KeyType::Master, &supplier.master), &supplier.master),
            self.publish(&supplier.name, insert(KeyType::Sub, &supplier.sub), &supplier.master),
        ]
    }

    /// A signed fetch response carrying `events`, or a fresh sentinel when empty.
    pub fn fetch_response(&self, events: &[KeyUpdate]) -> Value {
        self.fetch_response_at(events, Utc::now())
    }

    /// Like [`Self::fetch_response`], stamped with `timestamp`.
    pub fn fetch_response_at(&self, events: &[KeyUpdate], timestamp: DateTime<Utc>) -> Value {
        let status = if events.is_empty() {
            EnvelopeStatus::NoUpdates
        } else {
            EnvelopeStatus::Ok
        };
        let payload = FetchPayload {
            timestamp,
            updates: events.iter().map(KeyUpdate::to_wire).collect(),
        };
        let envelope = SignedEnvelope::seal(status, &payload, &self.key.private_key).unwrap();
        serde_json::to_value(envelope).unwrap()
    }

    pub fn serve_fetch(&self, transport: &MockTransport, events: &[KeyUpdate]) {
        transport.respond(self.fetch_url(), self.fetch_response(events));
    }

    /// Makes peer `index` attest to `root`, echoing each challenge.
    pub fn attest(&self, transport: &MockTransport, index: usize, root: String) {
        self.attest_with(transport, index, root, || {});
    }

    /// Like [`Self::attest`], running `before` ahead of each answer.
    pub fn attest_with<F>(&self, transport: &MockTransport, index: usize, root: String, before: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        let peer = &self.peers[index];
        let private_key = peer.key.private_key.clone();
        transport.route(peer.url.clone(), move |body| {
            before();
            let attestation = PeerAttestation {
                challenge: body["challenge"].as_str().unwrap_or_default().to_string(),
                root: root.clone(),
                timestamp: Utc::now(),
            };
            let envelope = SignedEnvelope::seal(EnvelopeStatus::Ok, &attestation, &private_key).unwrap();
            Ok(envelope.into_peer_response())
        });
    }

    /// Makes every peer attest to the channel's current root.
    pub fn attest_all(&self, transport: &MockTransport) {
        let root = self.root_hex();
        for index in 0..self.peers.len() {
            self.attest(transport, index, root.clone());
        }
    }

    pub fn take_peer_down(&self, transport: &MockTransport, index: usize) {
        transport.unroute(&self.peers[index].url);
    }
}

/// One airlock installation: scratch database, trust store and transport.
pub struct Node {
    pub dir: TempDir,
    pub database: Database,
    pub dal: DAL,
    pub suppliers: Arc<SupplierRegistry>,
    pub transport: Arc<MockTransport>,
}

impl Node {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("airlock.db");
        let database = Database::new(db_path.to_str().unwrap()).unwrap();
        database.run_migrations().await.unwrap();
        let dal = DAL::new(database.clone());
        let suppliers = Arc::new(SupplierRegistry::new(TrustStore::new(dir.path().join("trust"))));
        Self {
            dir,
            database,
            dal,
            suppliers,
            transport: MockTransport::new(),
        }
    }

    pub fn trust_dir(&self) -> std::path::PathBuf {
        self.dir.path().join("trust")
    }

    pub fn db_path(&self) -> std::path::PathBuf {
        self.dir.path().join("airlock.db")
    }

    pub fn keyggdrasil(&self, channels: &[&SimChannel], min_quorum: usize) -> Keyggdrasil {
        let registry = ChannelRegistry::new(channels.iter().map(|c| c.channel()));
        Keyggdrasil::new(
            Arc::new(registry),
            self.suppliers.clone(),
            self.dal.clone(),
            self.transport.clone(),
            KeyggdrasilSettings {
                min_quorum,
                ..Default::default()
            },
        )
    }

    /// Syncs `channel` serving `events`, with every peer honest.
    pub async fn sync_honest(&self, channel: &SimChannel, events: &[KeyUpdate], min_quorum: usize) {
        channel.serve_fetch(&self.transport, events);
        channel.attest_all(&self.transport);
        let outcome = self
            .keyggdrasil(&[channel], min_quorum)
            .sync_channel(&channel.channel())
            .await
            .unwrap();
        assert!(
            matches!(outcome, airlock::ChannelOutcome::Accepted { .. }),
            "expected events to be accepted, got {:?}",
            outcome
        );
    }
}
