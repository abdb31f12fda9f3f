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

//! Per-event authentication.
//!
//! Events are checked in arrival order against a [`TrustOverlay`]: the
//! persisted trust store plus every mutation made by earlier events of the
//! same batch. Nothing is written until the whole batch (or an accepted
//! prefix of it) has passed quorum.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};

use crate::crypto::verify_signature;
use crate::error::UpdateError;
use crate::models::{Action, KeyType, KeyUpdate, SigningKey, Supplier};
use crate::trust::{validate_supplier_name, SupplierRegistry};

/// Trust state staged on top of the supplier registry.
pub struct TrustOverlay<'a> {
    registry: &'a SupplierRegistry,
    channel: String,
    staged: BTreeMap<String, Supplier>,
    touched: BTreeSet<String>,
    now: DateTime<Utc>,
}

impl<'a> TrustOverlay<'a> {
    pub fn new(registry: &'a SupplierRegistry, channel: &str, now: DateTime<Utc>) -> Self {
        Self {
            registry,
            channel: channel.to_string(),
            staged: BTreeMap::new(),
            touched: BTreeSet::new(),
            now,
        }
    }

    fn reject(&self, event: &KeyUpdate, reason: impl Into<String>) -> UpdateError {
        UpdateError::EventAuthentication {
            channel: self.channel.clone(),
            supplier: Some(event.supplier().to_string()),
            sequence_id: Some(event.sequence_id()),
            reason: reason.into(),
        }
    }

    /// The staged view of a supplier, loading it from the registry once.
    fn current(&mut self, name: &str) -> Result<Option<&mut Supplier>, UpdateError> {
        if !self.staged.contains_key(name) {
            let loaded = self.registry.get(name).map_err(|e| UpdateError::EventAuthentication {
                channel: self.channel.clone(),
                supplier: Some(name.to_string()),
                sequence_id: None,
                reason: format!("trust store unreadable: {}", e),
            })?;
            match loaded {
                Some(supplier) => {
                    self.staged.insert(name.to_string(), (*supplier).clone());
                }
                None => return Ok(None),
            }
        }
        Ok(self.staged.get_mut(name))
    }

    fn signed_by_any(event: &KeyUpdate, supplier: &Supplier, key_type: KeyType, now: DateTime<Utc>) -> bool {
        supplier
            .trusted_keys(key_type, now)
            .any(|key| verify_signature(event.raw().as_bytes(), &event.signature, &key.public_key).is_ok())
    }

    /// Authenticates one event and stages its trust mutation.
    pub fn apply(&mut self, event: &KeyUpdate) -> Result<(), UpdateError> {
        validate_supplier_name(event.supplier()).map_err(|e| self.reject(event, e.to_string()))?;
        let now = self.now;
        let channel = self.channel.clone();
        let name = event.supplier().to_string();

        // A supplier whose keys were all revoked stays known: it cannot be
        // re-bootstrapped with a fresh self-signed master.
        let known = self.current(&name)?.is_some();

        match event.action() {
            Action::Insert {
                key_type,
                public_key,
            } if !known => {
                // Bootstrap: the first key of a new supplier must be a
                // self-signed master key.
                if *key_type != KeyType::Master {
                    return Err(self.reject(event, "first key of an unknown supplier must be a master key"));
                }
                verify_signature(event.raw().as_bytes(), &event.signature, public_key)
                    .map_err(|e| self.reject(event, format!("bootstrap signature invalid: {}", e)))?;

                let mut supplier = Supplier::new(name.clone());
                supplier.channels.insert(channel);
                supplier.insert_key(SigningKey::new(*key_type, *public_key));
                self.staged.insert(name.clone(), supplier);
            }
            Action::Revoke { .. } | Action::Release(_) if !known => {
                return Err(self.reject(
                    event,
                    format!("{} for unknown supplier", event.action().name()),
                ));
            }
            Action::Insert {
                key_type,
                public_key,
            } => {
                let supplier = self.staged_mut(&name);
                if !Self::signed_by_any(event, supplier, KeyType::Master, now) {
                    return Err(self.reject(event, "not signed by a trusted master key"));
                }
                let supplier = self.staged_mut(&name);
                supplier.channels.insert(channel);
                supplier.insert_key(SigningKey::new(*key_type, *public_key));
            }
            Action::Revoke {
                key_type,
                public_key,
            } => {
                let supplier = self.staged_mut(&name);
                if !Self::signed_by_any(event, supplier, KeyType::Master, now) {
                    return Err(self.reject(event, "not signed by a trusted master key"));
                }
                let supplier = self.staged_mut(&name);
                supplier.channels.insert(channel);
                supplier.revoke_key(*key_type, public_key);
            }
            Action::Release(_) => {
                let supplier = self.staged_mut(&name);
                if !Self::signed_by_any(event, supplier, KeyType::Sub, now) {
                    return Err(self.reject(event, "release not signed by a trusted sub key"));
                }
                // Releases do not mutate the trust store.
                return Ok(());
            }
        }

        self.touched.insert(name);
        Ok(())
    }

    fn staged_mut(&mut self, name: &str) -> &mut Supplier {
        self.staged
            .entry(name.to_string())
            .or_insert_with(|| Supplier::new(name))
    }

    /// Suppliers whose keys changed, with their new state.
    pub fn into_mutations(mut self) -> Vec<Supplier> {
        let touched = std::mem::take(&mut self.touched);
        touched
            .into_iter()
            .filter_map(|name| self.staged.remove(&name))
            .collect()
    }
}

/// Checks strict, gap-free ascending sequence ids.
///
/// `last_local` is the highest persisted id for the channel. An empty local
/// log accepts whatever id the batch starts at.
pub fn check_sequence(
    channel: &str,
    last_local: Option<i64>,
    events: &[KeyUpdate],
) -> Result<(), UpdateError> {
    let mut expected = last_local.map(|id| id + 1);
    for event in events {
        let id = event.sequence_id();
        if let Some(want) = expected {
            if id != want {
                return Err(UpdateError::EventAuthentication {
                    channel: channel.to_string(),
                    supplier: Some(event.supplier().to_string()),
                    sequence_id: Some(id),
                    reason: format!("expected sequence id {}, got {}", want, id),
                });
            }
        }
        expected = Some(id + 1);
    }
    Ok(())
}

/// Authenticates a full batch in order. Returns the trust mutations the
/// batch would make.
pub fn authenticate_batch(
    registry: &SupplierRegistry,
    channel: &str,
    last_local: Option<i64>,
    events: &[KeyUpdate],
    now: DateTime<Utc>,
) -> Result<Vec<Supplier>, UpdateError> {
    check_sequence(channel, last_local, events)?;
    let mut overlay = TrustOverlay::new(registry, channel, now);
    for event in events {
        overlay.apply(event)?;
    }
    Ok(overlay.into_mutations())
}
