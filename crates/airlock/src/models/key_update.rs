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

//! Signed Keyggdrasil log events.
//!
//! A [`KeyUpdate`] is one entry of a channel's transparency log: a key
//! insertion, a key revocation or a release anchor. The signed bytes are the
//! exact `data` string the channel delivered; that same string is the Merkle
//! leaf and the persisted payload, so nothing is ever re-serialized before it
//! is hashed or verified.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::package::{PackageId, PackageKind};
use super::supplier::{hex_key, KeyType};
use crate::crypto::{sign_message, SigningError, PUBLIC_KEY_LEN};

#[derive(Debug, Error)]
pub enum KeyUpdateError {
    #[error("Malformed event data: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Malformed event signature: {0}")]
    Signature(#[from] base64::DecodeError),

    #[error("Malformed Merkle root: {0}")]
    MerkleRoot(#[from] hex::FromHexError),

    #[error("Failed to sign event: {0}")]
    Signing(#[from] SigningError),
}

/// A checksum anchored in the log for one release of a package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseAnchor {
    pub package_type: PackageKind,
    pub package_name: String,
    pub version: String,
    /// Hex checksum of the release artifact.
    pub checksum: String,
}

/// What an event does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum Action {
    Insert {
        key_type: KeyType,
        #[serde(with = "hex_key")]
        public_key: [u8; PUBLIC_KEY_LEN],
    },
    Revoke {
        key_type: KeyType,
        #[serde(with = "hex_key")]
        public_key: [u8; PUBLIC_KEY_LEN],
    },
    Release(ReleaseAnchor),
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::Insert { .. } => "insert",
            Action::Revoke { .. } => "revoke",
            Action::Release(_) => "release",
        }
    }
}

/// The signed content of an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyUpdateData {
    pub channel_sequence_id: i64,
    pub date_generated: DateTime<Utc>,
    pub supplier: String,
    #[serde(flatten)]
    pub action: Action,
}

impl KeyUpdateData {
    /// Compact JSON in declaration order. Producers sign exactly these bytes.
    pub fn canonical_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// An event as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireKeyUpdate {
    pub data: String,
    /// Base64 Ed25519 signature over `data`.
    pub signature: String,
    /// Hex root claimed by the channel after this event.
    pub merkle_root: String,
}

/// A decoded, not yet authenticated event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyUpdate {
    pub data: KeyUpdateData,
    raw: String,
    pub signature: Vec<u8>,
    pub merkle_root: Vec<u8>,
}

impl KeyUpdate {
    pub fn decode(wire: &WireKeyUpdate) -> Result<Self, KeyUpdateError> {
        Self::from_parts(
            wire.data.clone(),
            BASE64.decode(wire.signature.trim())?,
            hex::decode(wire.merkle_root.trim())?,
        )
    }

    /// Rebuilds an event from persisted parts.
    pub fn from_parts(
        raw: String,
        signature: Vec<u8>,
        merkle_root: Vec<u8>,
    ) -> Result<Self, KeyUpdateError> {
        let data = serde_json::from_str(&raw)?;
        Ok(Self {
            data,
            raw,
            signature,
            merkle_root,
        })
    }

    /// Serializes and signs `data` with a supplier private key.
    pub fn sign(
        data: KeyUpdateData,
        private_key: &[u8],
        merkle_root: Vec<u8>,
    ) -> Result<Self, KeyUpdateError> {
        let raw = data.canonical_json()?;
        let signature = sign_message(raw.as_bytes(), private_key)?;
        Ok(Self {
            data,
            raw,
            signature,
            merkle_root,
        })
    }

    /// The exact signed bytes.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn sequence_id(&self) -> i64 {
        self.data.channel_sequence_id
    }

    pub fn supplier(&self) -> &str {
        &self.data.supplier
    }

    pub fn action(&self) -> &Action {
        &self.data.action
    }

    /// The package this event anchors a release for, if any.
    pub fn release(&self) -> Option<(PackageId, &ReleaseAnchor)> {
        match &self.data.action {
            Action::Release(anchor) => Some((
                PackageId::new(
                    anchor.package_type,
                    self.data.supplier.clone(),
                    anchor.package_name.clone(),
                ),
                anchor,
            )),
            _ => None,
        }
    }

    pub fn merkle_root_hex(&self) -> String {
        hex::encode(&self.merkle_root)
    }

    pub fn to_wire(&self) -> WireKeyUpdate {
        WireKeyUpdate {
            data: self.raw.clone(),
            signature: BASE64.encode(&self.signature),
            merkle_root: self.merkle_root_hex(),
        }
    }
}
