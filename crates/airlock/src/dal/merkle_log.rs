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

//! Merkle log Data Access Layer.
//!
//! Rows are append-only. The auto-increment `id` is the insertion order and
//! the order in which leaves are replayed into a [`MerkleLog`].

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::Utc;
use diesel::prelude::*;

use super::{DalError, DAL};
use crate::crypto::constant_time_eq;
use crate::database::schema::merkle_leaves;
use crate::merkle::MerkleLog;
use crate::models::{Action, KeyUpdate, KeyUpdateData, PackageId};

/// A persisted log entry.
#[derive(Debug, Clone, PartialEq, Eq, Queryable, Selectable)]
#[diesel(table_name = merkle_leaves)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct MerkleLeaf {
    pub id: i32,
    pub channel: String,
    pub channel_sequence_id: i64,
    pub action: String,
    pub supplier: String,
    /// The exact signed event bytes.
    pub payload: String,
    /// Base64 event signature.
    pub signature: String,
    /// Hex root of the channel log after this row.
    pub merkle_root: String,
    pub created_at: String,
}

impl MerkleLeaf {
    /// Decodes the stored event.
    pub fn decode(&self) -> Result<KeyUpdate, DalError> {
        let corrupt = |message: String| DalError::Corrupt {
            id: self.id,
            message,
        };
        let signature = BASE64
            .decode(&self.signature)
            .map_err(|e| corrupt(e.to_string()))?;
        let root = hex::decode(&self.merkle_root).map_err(|e| corrupt(e.to_string()))?;
        KeyUpdate::from_parts(self.payload.clone(), signature, root)
            .map_err(|e| corrupt(e.to_string()))
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = merkle_leaves)]
struct NewMerkleLeaf {
    channel: String,
    channel_sequence_id: i64,
    action: String,
    supplier: String,
    payload: String,
    signature: String,
    merkle_root: String,
    created_at: String,
}

/// An authenticated, quorum-checked event with the root it produces.
#[derive(Debug, Clone)]
pub struct AcceptedEvent {
    pub event: KeyUpdate,
    pub root_hex: String,
}

/// Result of replaying a channel's persisted log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogVerification {
    pub channel: String,
    pub leaves: usize,
    /// Hex root recomputed from the payloads.
    pub root: String,
    /// First row whose stored root differs from the recomputed prefix root.
    pub first_mismatch: Option<MerkleLeaf>,
}

impl LogVerification {
    pub fn is_consistent(&self) -> bool {
        self.first_mismatch.is_none()
    }
}

/// Accessor for the `merkle_leaves` table.
pub struct MerkleLogDAL<'a> {
    pub dal: &'a DAL,
}

fn interact_err(e: impl std::fmt::Display) -> DalError {
    DalError::Interact(e.to_string())
}

impl<'a> MerkleLogDAL<'a> {
    /// Appends a batch of accepted events in one transaction.
    ///
    /// Either every row is written or none is.
    pub async fn append_batch(
        &self,
        channel: &str,
        events: &[AcceptedEvent],
    ) -> Result<usize, DalError> {
        let now = Utc::now().to_rfc3339();
        let rows: Vec<NewMerkleLeaf> = events
            .iter()
            .map(|accepted| NewMerkleLeaf {
                channel: channel.to_string(),
                channel_sequence_id: accepted.event.sequence_id(),
                action: accepted.event.action().name().to_string(),
                supplier: accepted.event.supplier().to_string(),
                payload: accepted.event.raw().to_string(),
                signature: BASE64.encode(&accepted.event.signature),
                merkle_root: accepted.root_hex.clone(),
                created_at: now.clone(),
            })
            .collect();

        let conn = self.dal.database.get_connection().await?;
        let inserted = conn
            .interact(move |conn| {
                conn.transaction::<_, diesel::result::Error, _>(|conn| {
                    let mut inserted = 0;
                    for row in &rows {
                        inserted += diesel::insert_into(merkle_leaves::table)
                            .values(row)
                            .execute(conn)?;
                    }
                    Ok(inserted)
                })
            })
            .await
            .map_err(interact_err)??;
        Ok(inserted)
    }

    /// Every row of a channel in insertion order.
    pub async fn list_for_channel(&self, channel: &str) -> Result<Vec<MerkleLeaf>, DalError> {
        let channel = channel.to_string();
        let conn = self.dal.database.get_connection().await?;
        let rows = conn
            .interact(move |conn| {
                merkle_leaves::table
                    .filter(merkle_leaves::channel.eq(channel))
                    .order(merkle_leaves::id.asc())
                    .select(MerkleLeaf::as_select())
                    .load::<MerkleLeaf>(conn)
            })
            .await
            .map_err(interact_err)??;
        Ok(rows)
    }

    /// Distinct channel names that have at least one row.
    pub async fn channels(&self) -> Result<Vec<String>, DalError> {
        let conn = self.dal.database.get_connection().await?;
        let names = conn
            .interact(|conn| {
                merkle_leaves::table
                    .select(merkle_leaves::channel)
                    .distinct()
                    .order(merkle_leaves::channel.asc())
                    .load::<String>(conn)
            })
            .await
            .map_err(interact_err)??;
        Ok(names)
    }

    /// Highest accepted sequence id of a channel.
    pub async fn last_sequence_id(&self, channel: &str) -> Result<Option<i64>, DalError> {
        let channel = channel.to_string();
        let conn = self.dal.database.get_connection().await?;
        let max = conn
            .interact(move |conn| {
                merkle_leaves::table
                    .filter(merkle_leaves::channel.eq(channel))
                    .select(diesel::dsl::max(merkle_leaves::channel_sequence_id))
                    .first::<Option<i64>>(conn)
            })
            .await
            .map_err(interact_err)??;
        Ok(max)
    }

    /// Stored root of the newest row of a channel.
    pub async fn latest_root(&self, channel: &str) -> Result<Option<String>, DalError> {
        let channel = channel.to_string();
        let conn = self.dal.database.get_connection().await?;
        let root = conn
            .interact(move |conn| {
                merkle_leaves::table
                    .filter(merkle_leaves::channel.eq(channel))
                    .order(merkle_leaves::id.desc())
                    .select(merkle_leaves::merkle_root)
                    .first::<String>(conn)
                    .optional()
            })
            .await
            .map_err(interact_err)??;
        Ok(root)
    }

    /// Rebuilds a channel's Merkle log from the stored payloads.
    pub async fn load_channel_log(&self, channel: &str) -> Result<MerkleLog, DalError> {
        let rows = self.list_for_channel(channel).await?;
        Ok(MerkleLog::build(rows.into_iter().map(|row| row.payload.into_bytes())))
    }

    /// Replays a channel's rows and checks each stored root.
    pub async fn verify_persisted_log(&self, channel: &str) -> Result<LogVerification, DalError> {
        let rows = self.list_for_channel(channel).await?;
        let mut log = MerkleLog::new();
        let mut first_mismatch = None;

        for row in &rows {
            let root = hex::encode(log.append([row.payload.as_bytes().to_vec()]));
            if first_mismatch.is_none() && !constant_time_eq(root.as_bytes(), row.merkle_root.as_bytes()) {
                first_mismatch = Some(row.clone());
            }
        }

        Ok(LogVerification {
            channel: channel.to_string(),
            leaves: log.len(),
            root: log.root_hex(),
            first_mismatch,
        })
    }

    /// Finds the release row anchoring `checksum` for `package`, across all
    /// channels.
    ///
    /// The checksum comparison is constant-time over the decoded bytes.
    pub async fn find_release(
        &self,
        package: &PackageId,
        checksum: &str,
    ) -> Result<Option<MerkleLeaf>, DalError> {
        let Ok(wanted) = hex::decode(checksum.trim()) else {
            return Ok(None);
        };

        let supplier = package.supplier.clone();
        let conn = self.dal.database.get_connection().await?;
        let rows: Vec<MerkleLeaf> = conn
            .interact(move |conn| {
                merkle_leaves::table
                    .filter(merkle_leaves::action.eq("release"))
                    .filter(merkle_leaves::supplier.eq(supplier))
                    .order(merkle_leaves::id.asc())
                    .select(MerkleLeaf::as_select())
                    .load(conn)
            })
            .await
            .map_err(interact_err)??;

        for row in rows {
            let Ok(data) = serde_json::from_str::<KeyUpdateData>(&row.payload) else {
                continue;
            };
            let Action::Release(anchor) = &data.action else {
                continue;
            };
            if anchor.package_type != package.kind
                || anchor.package_name != package.name
                || data.supplier != package.supplier
            {
                continue;
            }
            let Ok(anchored) = hex::decode(anchor.checksum.trim()) else {
                continue;
            };
            if constant_time_eq(&anchored, &wanted) {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }
}
