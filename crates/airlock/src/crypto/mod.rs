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

//! Cryptographic primitives used throughout airlock.
//!
//! This module provides:
//! - Ed25519 key generation, signing and verification
//! - A configurable BLAKE-family hash (output length + domain separation)
//! - File checksums and constant-time comparison

mod hash;
mod signing;

pub use hash::{
    constant_time_eq, hash_file, keyed_hash, HashConfig, CHECKSUM_HASH, HASH_LEN,
    MERKLE_NODE_HASH,
};
pub use signing::{
    compute_key_fingerprint, decode_public_key_hex, generate_signing_keypair, sign_message,
    verify_signature, GeneratedKeypair, SigningError, PUBLIC_KEY_LEN, SIGNATURE_LEN,
};
