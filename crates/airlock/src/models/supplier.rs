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

//! Suppliers and their signing keys.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::crypto::{compute_key_fingerprint, PUBLIC_KEY_LEN};

/// Role of a signing key.
///
/// Master keys sign key-management events; sub keys sign release metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyType {
    Master,
    Sub,
}

impl KeyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyType::Master => "master",
            KeyType::Sub => "sub",
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "master" => Ok(KeyType::Master),
            "sub" => Ok(KeyType::Sub),
            other => Err(format!("unknown key type '{}'", other)),
        }
    }
}

/// Optional validity window of a signing key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<DateTime<Utc>>,
}

impl Validity {
    /// Whether `at` lies inside the window. Open ends are unbounded.
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.from.map_or(true, |from| at >= from) && self.until.map_or(true, |until| at <= until)
    }
}

/// Serde adapter for raw Ed25519 public keys stored as hex.
pub(crate) mod hex_key {
    use crate::crypto::{decode_public_key_hex, PUBLIC_KEY_LEN};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(key: &[u8; PUBLIC_KEY_LEN], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(key))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; PUBLIC_KEY_LEN], D::Error> {
        let encoded = String::deserialize(d)?;
        decode_public_key_hex(&encoded).map_err(serde::de::Error::custom)
    }
}

/// A supplier signing key as recorded in the trust store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningKey {
    #[serde(rename = "type")]
    pub key_type: KeyType,
    #[serde(with = "hex_key")]
    pub public_key: [u8; PUBLIC_KEY_LEN],
    #[serde(default)]
    pub validity: Validity,
}

impl SigningKey {
    pub fn new(key_type: KeyType, public_key: [u8; PUBLIC_KEY_LEN]) -> Self {
        Self {
            key_type,
            public_key,
            validity: Validity::default(),
        }
    }

    pub fn with_validity(mut self, validity: Validity) -> Self {
        self.validity = validity;
        self
    }

    pub fn is_valid_at(&self, at: DateTime<Utc>) -> bool {
        self.validity.contains(at)
    }

    /// SHA256 fingerprint for logs.
    pub fn fingerprint(&self) -> String {
        compute_key_fingerprint(&self.public_key)
    }
}

/// A software publisher and the keys currently trusted for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Supplier {
    pub name: String,
    pub channels: BTreeSet<String>,
    pub signing_keys: Vec<SigningKey>,
}

impl Supplier {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            channels: BTreeSet::new(),
            signing_keys: Vec::new(),
        }
    }

    /// Keys of `key_type` that are inside their validity window at `at`.
    pub fn trusted_keys(
        &self,
        key_type: KeyType,
        at: DateTime<Utc>,
    ) -> impl Iterator<Item = &SigningKey> + '_ {
        self.signing_keys
            .iter()
            .filter(move |k| k.key_type == key_type && k.is_valid_at(at))
    }

    pub fn has_key(&self, key_type: KeyType, public_key: &[u8]) -> bool {
        self.signing_keys
            .iter()
            .any(|k| k.key_type == key_type && k.public_key.as_slice() == public_key)
    }

    /// Adds a key unless an identical one is already present.
    pub fn insert_key(&mut self, key: SigningKey) -> bool {
        if self.has_key(key.key_type, &key.public_key) {
            return false;
        }
        self.signing_keys.push(key);
        true
    }

    /// Removes a key. Returns whether anything was removed.
    pub fn revoke_key(&mut self, key_type: KeyType, public_key: &[u8]) -> bool {
        let before = self.signing_keys.len();
        self.signing_keys
            .retain(|k| !(k.key_type == key_type && k.public_key.as_slice() == public_key));
        self.signing_keys.len() != before
    }
}
