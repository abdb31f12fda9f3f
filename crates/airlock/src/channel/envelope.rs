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

//! Signed channel envelopes and peer attestations.
//!
//! Every channel response is `{status, payload, signature}` where `payload`
//! is base64 JSON and `signature` is the base64 Ed25519 signature of the
//! decoded payload bytes under the channel key. Peer challenge responses use
//! the same shape with the payload field named `response`.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::{sign_message, verify_signature, SigningError};

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("Malformed envelope: {0}")]
    Malformed(String),

    #[error("Envelope signature invalid: {0}")]
    BadSignature(#[from] SigningError),

    #[error("Remote reported an error: {0}")]
    Remote(String),

    #[error("Response is stale: generated {generated}, older than {max_age_secs}s")]
    Stale {
        generated: DateTime<Utc>,
        max_age_secs: i64,
    },
}

impl EnvelopeError {
    /// Whether the failure is an authentication failure rather than a
    /// transport-level or remote problem.
    pub fn is_authentication_failure(&self) -> bool {
        matches!(self, EnvelopeError::BadSignature(_) | EnvelopeError::Stale { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnvelopeStatus {
    Ok,
    NoUpdates,
    Error,
}

/// A signed response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedEnvelope {
    pub status: EnvelopeStatus,
    #[serde(default, alias = "response")]
    pub payload: String,
    #[serde(default)]
    pub signature: String,
    /// Human-readable detail for `ERROR` responses. Not authenticated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl SignedEnvelope {
    /// Serializes `payload` and signs it.
    pub fn seal<T: Serialize>(
        status: EnvelopeStatus,
        payload: &T,
        private_key: &[u8],
    ) -> Result<Self, EnvelopeError> {
        let bytes =
            serde_json::to_vec(payload).map_err(|e| EnvelopeError::Malformed(e.to_string()))?;
        let signature = sign_message(&bytes, private_key)?;
        Ok(Self {
            status,
            payload: BASE64.encode(&bytes),
            signature: BASE64.encode(signature),
            message: None,
        })
    }

    /// Parses an envelope out of a JSON response body.
    pub fn from_value(value: serde_json::Value) -> Result<Self, EnvelopeError> {
        serde_json::from_value(value).map_err(|e| EnvelopeError::Malformed(e.to_string()))
    }

    /// Verifies the signature and decodes the payload.
    ///
    /// `ERROR` responses are reported as [`EnvelopeError::Remote`] without
    /// touching the signature.
    pub fn open<T: DeserializeOwned>(&self, public_key: &[u8]) -> Result<T, EnvelopeError> {
        if self.status == EnvelopeStatus::Error {
            return Err(EnvelopeError::Remote(
                self.message.clone().unwrap_or_else(|| "unspecified".to_string()),
            ));
        }

        let payload = BASE64
            .decode(self.payload.trim())
            .map_err(|e| EnvelopeError::Malformed(format!("payload: {}", e)))?;
        let signature = BASE64
            .decode(self.signature.trim())
            .map_err(|e| EnvelopeError::Malformed(format!("signature: {}", e)))?;

        verify_signature(&payload, &signature, public_key)?;

        serde_json::from_slice(&payload).map_err(|e| EnvelopeError::Malformed(e.to_string()))
    }

    /// The envelope as a peer challenge response (`response` instead of `payload`).
    pub fn into_peer_response(self) -> serde_json::Value {
        serde_json::json!({
            "status": self.status,
            "response": self.payload,
            "signature": self.signature,
        })
    }
}

/// Rejects timestamps older than `max_age`. Timestamps from the future are
/// accepted up to the same tolerance.
pub fn check_freshness(
    generated: DateTime<Utc>,
    now: DateTime<Utc>,
    max_age: Duration,
) -> Result<(), EnvelopeError> {
    let age = now.signed_duration_since(generated);
    if age > max_age || age < -max_age {
        return Err(EnvelopeError::Stale {
            generated,
            max_age_secs: max_age.num_seconds(),
        });
    }
    Ok(())
}

/// Payload of a peer attestation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerAttestation {
    /// Base64 nonce echoed back from the challenge.
    pub challenge: String,
    /// Hex Merkle root the peer observes.
    pub root: String,
    pub timestamp: DateTime<Utc>,
}
