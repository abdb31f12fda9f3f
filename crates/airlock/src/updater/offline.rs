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

//! Offline marker.
//!
//! While files are being replaced a marker file exists. Request-handling code
//! calls [`OfflineMarker::wait_until_online`], which polls with a bounded wait
//! and fails closed. This is a cooperative flag, not an OS lock.

use chrono::Utc;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
#[error("Still offline after {waited:?} (marker {path})")]
pub struct StillOffline {
    pub path: PathBuf,
    pub waited: Duration,
}

#[derive(Debug, Clone)]
pub struct OfflineMarker {
    path: PathBuf,
}

impl OfflineMarker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_offline(&self) -> bool {
        self.path.exists()
    }

    /// Creates the marker, recording why and when.
    pub fn enter(&self, reason: &str) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, format!("{}\n{}\n", Utc::now().to_rfc3339(), reason))
    }

    /// Removes the marker. Removing an absent marker is not an error.
    pub fn leave(&self) -> io::Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Waits for the marker to disappear, at most `timeout`.
    pub async fn wait_until_online(&self, timeout: Duration) -> Result<(), StillOffline> {
        let start = Instant::now();
        while self.is_offline() {
            if start.elapsed() >= timeout {
                return Err(StillOffline {
                    path: self.path.clone(),
                    waited: start.elapsed(),
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        Ok(())
    }
}
