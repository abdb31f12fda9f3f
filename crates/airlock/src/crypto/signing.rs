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

//! Ed25519 signing utilities.
//!
//! Channel envelopes, peer attestations, key events and release checksums are
//! all authenticated with the same two functions: [`sign_message`] and
//! [`verify_signature`].

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Length of a raw Ed25519 public key.
pub const PUBLIC_KEY_LEN: usize = 32;

/// Length of a raw Ed25519 signature.
pub const SIGNATURE_LEN: usize = 64;

/// Errors that can occur during signing operations.
#[derive(Debug, Error)]
pub enum SigningError {
    #[error("Invalid private key: expected 32 bytes, got {0}")]
    InvalidPrivateKeyLength(usize),

    #[error("Invalid public key: expected 32 bytes, got {0}")]
    InvalidPublicKeyLength(usize),

    #[error("Invalid signature: expected 64 bytes, got {0}")]
    InvalidSignatureLength(usize),

    #[error("Invalid key encoding: {0}")]
    InvalidEncoding(String),

    #[error("Failed to create verifying key: {0}")]
    KeyCreationFailed(String),

    #[error("Signature verification failed")]
    VerificationFailed,
}

/// A generated Ed25519 keypair.
pub struct GeneratedKeypair {
    /// The 32-byte private key seed
    pub private_key: Vec<u8>,
    /// The 32-byte public key
    pub public_key: Vec<u8>,
    /// SHA256 hex fingerprint of the public key
    pub fingerprint: String,
}

/// Generates a new Ed25519 signing keypair.
pub fn generate_signing_keypair() -> GeneratedKeypair {
    let mut csprng = rand::rngs::OsRng;
    let signing_key = SigningKey::generate(&mut csprng);
    let public_key_bytes = signing_key.verifying_key().to_bytes();

    GeneratedKeypair {
        private_key: signing_key.to_bytes().to_vec(),
        public_key: public_key_bytes.to_vec(),
        fingerprint: compute_key_fingerprint(&public_key_bytes),
    }
}

/// Computes the SHA256 hex fingerprint of a public key.
///
/// Fingerprints are only used for display and log correlation; trust
/// decisions always compare the full key.
pub fn compute_key_fingerprint(public_key: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(public_key);
    hex::encode(hasher.finalize())
}

/// Decodes a hex-encoded Ed25519 public key.
pub fn decode_public_key_hex(encoded: &str) -> Result<[u8; PUBLIC_KEY_LEN], SigningError> {
    let bytes =
        hex::decode(encoded.trim()).map_err(|e| SigningError::InvalidEncoding(e.to_string()))?;
    let key: [u8; PUBLIC_KEY_LEN] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| SigningError::InvalidPublicKeyLength(bytes.len()))?;

    // Reject points that are not valid curve encodings up front.
    VerifyingKey::from_bytes(&key).map_err(|e| SigningError::KeyCreationFailed(e.to_string()))?;
    Ok(key)
}

/// Signs a message with an Ed25519 private key seed.
///
/// # Arguments
///
/// * `message` - The exact bytes to sign
/// * `private_key` - The 32-byte Ed25519 private key seed
///
/// # Returns
///
/// The 64-byte Ed25519 signature.
pub fn sign_message(message: &[u8], private_key: &[u8]) -> Result<Vec<u8>, SigningError> {
    let key_bytes: [u8; 32] = private_key
        .try_into()
        .map_err(|_| SigningError::InvalidPrivateKeyLength(private_key.len()))?;

    let signing_key = SigningKey::from_bytes(&key_bytes);
    Ok(signing_key.sign(message).to_bytes().to_vec())
}

/// Verifies an Ed25519 signature.
///
/// # Arguments
///
/// * `message` - The bytes that were signed
/// * `signature` - The 64-byte Ed25519 signature
/// * `public_key` - The 32-byte Ed25519 public key
///
/// # Errors
///
/// Returns `SigningError` if a length is wrong or verification fails.
pub fn verify_signature(
    message: &[u8],
    signature: &[u8],
    public_key: &[u8],
) -> Result<(), SigningError> {
    let key_bytes: [u8; PUBLIC_KEY_LEN] = public_key
        .try_into()
        .map_err(|_| SigningError::InvalidPublicKeyLength(public_key.len()))?;

    let sig_bytes: [u8; SIGNATURE_LEN] = signature
        .try_into()
        .map_err(|_| SigningError::InvalidSignatureLength(signature.len()))?;

    let verifying_key = VerifyingKey::from_bytes(&key_bytes)
        .map_err(|e| SigningError::KeyCreationFailed(e.to_string()))?;

    let sig = Signature::from_bytes(&sig_bytes);

    verifying_key
        .verify_strict(message, &sig)
        .map_err(|_| SigningError::VerificationFailed)
}
