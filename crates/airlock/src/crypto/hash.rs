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

//! Configurable hashing.
//!
//! Every hash in airlock is BLAKE3. A [`HashConfig`] fixes the output length
//! (extendable output) and an optional personalization string. Personalized
//! configs use BLAKE3's key-derivation mode, so a Merkle node hash can never
//! collide with a checksum over the same bytes.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Default digest length in bytes.
pub const HASH_LEN: usize = 32;

/// Hash configuration for Merkle leaves and interior nodes.
pub const MERKLE_NODE_HASH: HashConfig =
    HashConfig::new(HASH_LEN).with_personalization("airlock 2026-01-01 keyggdrasil merkle node");

/// Hash configuration for artifact checksums.
pub const CHECKSUM_HASH: HashConfig = HashConfig::new(HASH_LEN);

const FILE_READ_CHUNK: usize = 64 * 1024;

/// Output size and domain separation for a hash function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashConfig {
    output_len: usize,
    personalization: Option<&'static str>,
}

impl HashConfig {
    /// Creates an unpersonalized config producing `output_len` bytes.
    pub const fn new(output_len: usize) -> Self {
        Self {
            output_len,
            personalization: None,
        }
    }

    /// Returns a copy of this config bound to a personalization string.
    pub const fn with_personalization(mut self, personalization: &'static str) -> Self {
        self.personalization = Some(personalization);
        self
    }

    /// Digest length in bytes.
    pub fn output_len(&self) -> usize {
        self.output_len
    }

    /// Personalization string, if any.
    pub fn personalization(&self) -> Option<&'static str> {
        self.personalization
    }

    fn hasher(&self) -> blake3::Hasher {
        match self.personalization {
            Some(context) => blake3::Hasher::new_derive_key(context),
            None => blake3::Hasher::new(),
        }
    }

    /// Hashes a single buffer.
    pub fn hash(&self, data: &[u8]) -> Vec<u8> {
        self.hash_parts(&[data])
    }

    /// Hashes the concatenation of several buffers without copying them together.
    pub fn hash_parts(&self, parts: &[&[u8]]) -> Vec<u8> {
        let mut hasher = self.hasher();
        for part in parts {
            hasher.update(part);
        }
        let mut out = vec![0u8; self.output_len];
        hasher.finalize_xof().fill(&mut out);
        out
    }

    /// Hashes everything readable from `reader`.
    pub fn hash_reader<R: Read>(&self, mut reader: R) -> io::Result<Vec<u8>> {
        let mut hasher = self.hasher();
        let mut buf = vec![0u8; FILE_READ_CHUNK];
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        let mut out = vec![0u8; self.output_len];
        hasher.finalize_xof().fill(&mut out);
        Ok(out)
    }
}

/// Keyed (MAC-mode) hash with a 32-byte key.
pub fn keyed_hash(key: &[u8; 32], data: &[u8]) -> [u8; HASH_LEN] {
    *blake3::keyed_hash(key, data).as_bytes()
}

/// Computes the hex checksum of a file by reading it back from disk.
pub fn hash_file(path: &Path) -> io::Result<String> {
    let file = File::open(path)?;
    Ok(hex::encode(CHECKSUM_HASH.hash_reader(file)?))
}

/// Compares two byte strings in time independent of their contents.
///
/// Lengths are not secret; a length mismatch returns early.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
