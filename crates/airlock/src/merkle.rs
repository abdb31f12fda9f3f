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

//! Append-only Merkle log.
//!
//! Leaves are `H(record)`, interior nodes are `H(left || right)`, and a node
//! without a sibling is promoted unchanged to the next level. All hashing uses
//! [`MERKLE_NODE_HASH`] so node digests live in their own domain.
//!
//! [`MerkleLog::extend`] reuses every subtree that is unaffected by the new
//! leaves and only rehashes the right edge of the tree. The result is
//! bit-identical to [`MerkleLog::build`] over the concatenated records.

use crate::crypto::{HashConfig, MERKLE_NODE_HASH};

/// Domain of the empty-tree root, kept apart from every leaf and node hash.
const EMPTY_TREE_CONTEXT: &str = "airlock 2026-01-01 keyggdrasil merkle empty tree";

fn empty_root(config: &HashConfig) -> Vec<u8> {
    HashConfig::new(config.output_len())
        .with_personalization(EMPTY_TREE_CONTEXT)
        .hash(&[])
}

/// A single leaf: the opaque record and its leaf hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    data: Vec<u8>,
    hash: Vec<u8>,
}

impl Node {
    fn new(config: &HashConfig, data: Vec<u8>) -> Self {
        let hash = config.hash(&data);
        Self { data, hash }
    }

    /// The record bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// The leaf hash.
    pub fn hash(&self) -> &[u8] {
        &self.hash
    }
}

/// Every level of the tree, leaves first.
#[derive(Debug, Clone, PartialEq, Eq)]
struct MerkleTree {
    config: HashConfig,
    levels: Vec<Vec<Vec<u8>>>,
}

impl MerkleTree {
    fn empty(config: HashConfig) -> Self {
        Self {
            config,
            levels: Vec::new(),
        }
    }

    /// Rebuilds the tree above `leaves`, keeping the first `reusable` leaves'
    /// ancestors from `previous` wherever their children are unchanged.
    fn rebuild(config: HashConfig, leaves: Vec<Vec<u8>>, previous: Option<(&Self, usize)>) -> Self {
        let mut levels = vec![leaves];
        let mut reusable = previous.map(|(_, n)| n).unwrap_or(0);

        while levels.last().map_or(false, |level| level.len() > 1) {
            let depth = levels.len();
            let below = &levels[depth - 1];
            // Parent i is unchanged iff both of its children were unchanged.
            reusable /= 2;

            let mut next = Vec::with_capacity((below.len() + 1) / 2);
            for (i, pair) in below.chunks(2).enumerate() {
                let cached = previous
                    .filter(|_| i < reusable)
                    .and_then(|(tree, _)| tree.levels.get(depth))
                    .and_then(|level| level.get(i));

                let parent = match (cached, pair) {
                    (Some(hash), _) => hash.clone(),
                    (None, [left, right]) => config.hash_parts(&[left.as_slice(), right.as_slice()]),
                    (None, [single]) => single.clone(),
                    (None, _) => continue,
                };
                next.push(parent);
            }
            levels.push(next);
        }

        if levels.first().map_or(true, Vec::is_empty) {
            return Self::empty(config);
        }
        Self { config, levels }
    }

    fn root(&self) -> Vec<u8> {
        match self.levels.last().and_then(|level| level.first()) {
            Some(root) => root.clone(),
            None => empty_root(&self.config),
        }
    }
}

/// An ordered, append-only sequence of records summarised by a Merkle root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleLog {
    nodes: Vec<Node>,
    tree: MerkleTree,
}

impl Default for MerkleLog {
    fn default() -> Self {
        Self::new()
    }
}

impl MerkleLog {
    /// An empty log using the Merkle node hash.
    pub fn new() -> Self {
        Self::with_config(MERKLE_NODE_HASH)
    }

    /// An empty log using a custom hash configuration.
    pub fn with_config(config: HashConfig) -> Self {
        Self {
            nodes: Vec::new(),
            tree: MerkleTree::empty(config),
        }
    }

    /// Builds a log from scratch.
    pub fn build<I, R>(records: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<Vec<u8>>,
    {
        let mut log = Self::new();
        log.append(records);
        log
    }

    /// Appends records in place and returns the new root.
    pub fn append<I, R>(&mut self, records: I) -> Vec<u8>
    where
        I: IntoIterator<Item = R>,
        R: Into<Vec<u8>>,
    {
        let extended = self.extend(records);
        *self = extended;
        self.root()
    }

    /// Returns a new log equal to this one with `records` appended.
    ///
    /// `self` is left untouched, so a candidate root can be computed and
    /// compared before anything is committed.
    pub fn extend<I, R>(&self, records: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<Vec<u8>>,
    {
        let config = self.tree.config;
        let mut nodes = self.nodes.clone();
        nodes.extend(records.into_iter().map(|r| Node::new(&config, r.into())));

        let leaves = nodes.iter().map(|n| n.hash.clone()).collect();
        let tree = MerkleTree::rebuild(config, leaves, Some((&self.tree, self.nodes.len())));
        Self { nodes, tree }
    }

    /// The current root, or a fixed empty-tree constant for an empty log.
    pub fn root(&self) -> Vec<u8> {
        self.tree.root()
    }

    /// Hex encoding of [`Self::root`].
    pub fn root_hex(&self) -> String {
        hex::encode(self.root())
    }

    /// Number of leaves.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The leaves in insertion order.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }
}
