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

//! Data Access Layer.
//!
//! [`DAL`] owns a [`Database`] handle and hands out borrowed, per-table
//! accessors. Every query runs inside the pool's `interact` closure.

pub mod merkle_log;

pub use merkle_log::{AcceptedEvent, LogVerification, MerkleLeaf, MerkleLogDAL};

use thiserror::Error;

use crate::database::{Database, DatabaseError};

#[derive(Debug, Error)]
pub enum DalError {
    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error("Query failed: {0}")]
    Query(#[from] diesel::result::Error),

    #[error("Connection interaction failed: {0}")]
    Interact(String),

    #[error("Stored row {id} is corrupt: {message}")]
    Corrupt { id: i32, message: String },
}

/// The Data Access Layer.
#[derive(Clone, Debug)]
pub struct DAL {
    pub database: Database,
}

impl DAL {
    pub fn new(database: Database) -> Self {
        Self { database }
    }

    /// Accessor for the `merkle_leaves` table.
    pub fn merkle_log(&self) -> MerkleLogDAL<'_> {
        MerkleLogDAL { dal: self }
    }
}
