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

//! File-backed supplier trust store.
//!
//! Each supplier lives in `<store_dir>/<name>.json`:
//!
//! ```json
//! { "channels": ["main"],
//!   "signing_keys": [ { "type": "master", "public_key": "<hex>",
//!                       "validity": { "from": "2026-01-01T00:00:00Z" } } ] }
//! ```
//!
//! Files are replaced atomically (write to a sibling temp file, then rename).
//! [`SupplierRegistry`] caches loaded suppliers for the lifetime of the
//! process; callers that mutate the store must call
//! [`SupplierRegistry::invalidate`] afterwards.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::models::{SigningKey, Supplier};

const SUPPLIER_FILE_EXTENSION: &str = "json";

#[derive(Debug, Error)]
pub enum TrustStoreError {
    #[error("Invalid supplier name '{0}': only ASCII letters, digits, '-' and '_' are allowed")]
    InvalidSupplierName(String),

    #[error("Trust store I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Malformed trust store file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Failed to replace trust store file {path}: {source}")]
    Persist {
        path: PathBuf,
        source: tempfile::PersistError,
    },
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SupplierFile {
    #[serde(default)]
    channels: BTreeSet<String>,
    #[serde(default)]
    signing_keys: Vec<SigningKey>,
}

/// Validates a supplier name for use as a file stem.
pub fn validate_supplier_name(name: &str) -> Result<&str, TrustStoreError> {
    let valid = !name.is_empty()
        && name.len() <= 128
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(name)
    } else {
        Err(TrustStoreError::InvalidSupplierName(name.to_string()))
    }
}

/// Reads and writes supplier files.
#[derive(Debug, Clone)]
pub struct TrustStore {
    dir: PathBuf,
}

impl TrustStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, name: &str) -> Result<PathBuf, TrustStoreError> {
        let name = validate_supplier_name(name)?;
        Ok(self
            .dir
            .join(format!("{}.{}", name, SUPPLIER_FILE_EXTENSION)))
    }

    /// Loads a supplier, or `None` if it has never been seen.
    pub fn load(&self, name: &str) -> Result<Option<Supplier>, TrustStoreError> {
        let path = self.path_for(name)?;
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(TrustStoreError::Io { path, source }),
        };

        let file: SupplierFile = serde_json::from_str(&content)
            .map_err(|source| TrustStoreError::Parse { path, source })?;

        Ok(Some(Supplier {
            name: name.to_string(),
            channels: file.channels,
            signing_keys: file.signing_keys,
        }))
    }

    /// Atomically writes a supplier file.
    pub fn save(&self, supplier: &Supplier) -> Result<(), TrustStoreError> {
        let path = self.path_for(&supplier.name)?;
        fs::create_dir_all(&self.dir).map_err(|source| TrustStoreError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let file = SupplierFile {
            channels: supplier.channels.clone(),
            signing_keys: supplier.signing_keys.clone(),
        };
        let body = serde_json::to_vec_pretty(&file).map_err(|source| TrustStoreError::Parse {
            path: path.clone(),
            source,
        })?;

        let io_err = |source| TrustStoreError::Io {
            path: path.clone(),
            source,
        };
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir).map_err(io_err)?;
        tmp.write_all(&body).map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(&path).map_err(|source| TrustStoreError::Persist {
            path: path.clone(),
            source,
        })?;

        debug!(supplier = %supplier.name, path = %path.display(), "Trust store file written");
        Ok(())
    }

    /// Deletes a supplier file. Removing an absent supplier is not an error.
    pub fn remove(&self, name: &str) -> Result<(), TrustStoreError> {
        let path = self.path_for(name)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(TrustStoreError::Io { path, source }),
        }
    }

    /// Names of every supplier with a file in the store, sorted.
    pub fn list(&self) -> Result<Vec<String>, TrustStoreError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(TrustStoreError::Io {
                    path: self.dir.clone(),
                    source,
                })
            }
        };

        let mut names: Vec<String> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.extension().and_then(|e| e.to_str()) == Some(SUPPLIER_FILE_EXTENSION))
            .filter_map(|path| path.file_stem().and_then(|s| s.to_str()).map(str::to_string))
            .filter(|name| validate_supplier_name(name).is_ok())
            .collect();
        names.sort();
        Ok(names)
    }
}

/// Process-wide cache of suppliers in front of a [`TrustStore`].
#[derive(Debug)]
pub struct SupplierRegistry {
    store: TrustStore,
    cache: RwLock<HashMap<String, Arc<Supplier>>>,
}

impl SupplierRegistry {
    pub fn new(store: TrustStore) -> Self {
        Self {
            store,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &TrustStore {
        &self.store
    }

    /// Returns the supplier, loading it on first use.
    pub fn get(&self, name: &str) -> Result<Option<Arc<Supplier>>, TrustStoreError> {
        if let Some(supplier) = self.cache.read().get(name) {
            return Ok(Some(Arc::clone(supplier)));
        }

        let Some(supplier) = self.store.load(name)? else {
            return Ok(None);
        };
        let supplier = Arc::new(supplier);
        self.cache
            .write()
            .insert(name.to_string(), Arc::clone(&supplier));
        Ok(Some(supplier))
    }

    /// Drops the cached copy so the next [`Self::get`] re-reads the file.
    pub fn invalidate(&self, name: &str) {
        self.cache.write().remove(name);
    }

    pub fn invalidate_all(&self) {
        self.cache.write().clear();
    }
}
