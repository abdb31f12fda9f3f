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

//! Channels, their peers and URL selection.

pub mod envelope;

pub use envelope::{
    check_freshness, EnvelopeError, EnvelopeStatus, PeerAttestation, SignedEnvelope,
};

use rand::seq::SliceRandom;
use std::collections::BTreeMap;
use std::sync::Arc;
use url::Url;

use crate::crypto::PUBLIC_KEY_LEN;

/// Host suffix of anonymity-network (onion service) endpoints.
pub const ANONYMITY_HOST_SUFFIX: &str = ".onion";

/// Endpoint path for Keyggdrasil fetches, relative to a channel base URL.
pub const KEYGGDRASIL_FETCH_PATH: &str = "keyggdrasil/fetch";
/// Endpoint path for update queries.
pub const UPDATES_PATH: &str = "updates";
/// Endpoint path for artifact downloads.
pub const DOWNLOAD_PATH: &str = "download";

/// Whether a URL addresses an anonymity-network endpoint.
pub fn is_anonymity_url(url: &str) -> bool {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
        .map_or(false, |host| host.ends_with(ANONYMITY_HOST_SUFFIX))
}

/// Orders candidate URLs for a fetch attempt.
///
/// With `prefer_anonymity`, anonymity-network URLs come first; each group is
/// shuffled independently with the OS RNG. Otherwise the whole list is
/// shuffled.
pub fn order_urls(urls: &[String], prefer_anonymity: bool) -> Vec<String> {
    let mut rng = rand::rngs::OsRng;
    if !prefer_anonymity {
        let mut all = urls.to_vec();
        all.shuffle(&mut rng);
        return all;
    }

    let (mut hidden, mut clear): (Vec<String>, Vec<String>) =
        urls.iter().cloned().partition(|u| is_anonymity_url(u));
    hidden.shuffle(&mut rng);
    clear.shuffle(&mut rng);
    hidden.extend(clear);
    hidden
}

/// Joins an endpoint path onto a base URL.
pub fn endpoint(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path)
}

/// One independent notary of a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub name: String,
    pub public_key: [u8; PUBLIC_KEY_LEN],
    pub urls: Vec<String>,
}

impl Peer {
    pub fn all_urls(&self, prefer_anonymity: bool) -> Vec<String> {
        order_urls(&self.urls, prefer_anonymity)
    }
}

/// A named trust domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    pub name: String,
    pub urls: Vec<String>,
    pub public_key: [u8; PUBLIC_KEY_LEN],
    pub peers: Vec<Peer>,
}

impl Channel {
    pub fn all_urls(&self, prefer_anonymity: bool) -> Vec<String> {
        order_urls(&self.urls, prefer_anonymity)
    }
}

/// Channels built once from configuration and shared by handle.
#[derive(Debug, Clone, Default)]
pub struct ChannelRegistry {
    channels: BTreeMap<String, Arc<Channel>>,
}

impl ChannelRegistry {
    pub fn new(channels: impl IntoIterator<Item = Channel>) -> Self {
        Self {
            channels: channels
                .into_iter()
                .map(|c| (c.name.clone(), Arc::new(c)))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<Channel>> {
        self.channels.get(name).cloned()
    }

    /// All channels in name order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Channel>> {
        self.channels.values()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}
