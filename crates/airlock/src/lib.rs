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

//! # Airlock
//!
//! Key transparency and verified auto-updates for self-hosted software.
//!
//! Suppliers publish packages through *channels*. Every change to a
//! supplier's signing keys, and every release checksum, is an event in an
//! append-only Merkle log ("Keyggdrasil") that independent peers attest to.
//! A package is only installed when its download hashes to a checksum that is
//! both signed by a currently trusted supplier key and anchored in that log.
//!
//! ## Components
//!
//! - [`keyggdrasil::Keyggdrasil`]: fetches, authenticates, quorum-checks and
//!   persists key events for each channel.
//! - [`updater::AutoUpdater`]: checks, downloads, verifies and installs
//!   tracked packages through an [`updater::Installer`].
//! - [`cycle::UpdateCycle`]: runs both in order.
//! - [`trust::SupplierRegistry`]: the file-backed trust store with an
//!   in-process cache.
//! - [`dal::DAL`]: the SQLite-backed Merkle log.
//! - [`config::ConfigLoader`]: TOML configuration.
//!
//! Cycles mutate the trust store and the log without internal locking. Run
//! at most one at a time per installation.

pub mod channel;
pub mod config;
pub mod crypto;
pub mod cycle;
pub mod dal;
pub mod database;
pub mod error;
pub mod keyggdrasil;
pub mod merkle;
pub mod models;
pub mod security;
pub mod transport;
pub mod trust;
pub mod updater;
pub mod version;

pub use channel::{Channel, ChannelRegistry, Peer};
pub use cycle::{CycleReport, UpdateCycle};
pub use dal::DAL;
pub use database::Database;
pub use error::{CycleError, UpdateError};
pub use keyggdrasil::{ChannelOutcome, Keyggdrasil, KeyggdrasilSettings};
pub use merkle::MerkleLog;
pub use models::{PackageId, PackageKind, Supplier};
pub use transport::{HttpTransport, Transport, TransportError};
pub use trust::{SupplierRegistry, TrustStore};
pub use updater::{AutoUpdater, PackageInstaller, TrackedPackage, UpdateOutcome};
pub use version::Version;
