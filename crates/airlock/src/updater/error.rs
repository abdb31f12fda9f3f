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

use std::path::PathBuf;
use thiserror::Error;

use crate::database::DatabaseError;

/// Errors raised while unpacking or installing a package.
#[derive(Debug, Error)]
pub enum InstallError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid package archive: {0}")]
    Archive(String),

    #[error("Archive member escapes the package directory: {0}")]
    UnsafePath(String),

    #[error("Invalid manifest: {0}")]
    Manifest(String),

    #[error("Manifest describes {found}, expected {expected}")]
    ManifestMismatch { expected: String, found: String },

    #[error("File replacement failed at {path}: {source}")]
    Replace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Script {path} failed: {message}")]
    Script { path: String, message: String },

    #[error("Script {path} timed out after {timeout_secs}s")]
    ScriptTimeout { path: String, timeout_secs: u64 },

    #[error("Migration failed: {0}")]
    Migration(#[from] DatabaseError),

    #[error("Could not manage the offline marker {path}: {source}")]
    Marker {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl InstallError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        InstallError::Io {
            path: path.into(),
            source,
        }
    }
}
