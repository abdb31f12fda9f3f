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

//! Package archives.
//!
//! An artifact is a gzip'd tar archive with a `manifest.json` at its root.
//! Members may only be regular files or directories with relative paths that
//! stay inside the destination.

use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Component, Path};
use tar::{Archive, EntryType};

use super::error::InstallError;

pub const MANIFEST_FILENAME: &str = "manifest.json";

/// When a post-install script is run and how.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptCategory {
    /// Run with the configured interpreter.
    Code,
    /// Run with `/bin/sh`.
    Shell,
    /// SQL executed through the database connection.
    Migration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptEntry {
    pub category: ScriptCategory,
    /// Path relative to the package root.
    pub path: String,
    /// Database driver a migration targets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageManifest {
    pub supplier: String,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub scripts: Vec<ScriptEntry>,
}

/// Reads `manifest.json` from a directory. A missing manifest is `None`.
pub fn read_manifest(dir: &Path) -> Result<Option<PackageManifest>, InstallError> {
    let path = dir.join(MANIFEST_FILENAME);
    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(InstallError::io(path, e)),
    };
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|e| InstallError::Manifest(format!("{}: {}", path.display(), e)))
}

/// Unpacks `archive` into `dest` and returns its manifest.
pub fn unpack_package(archive: &Path, dest: &Path) -> Result<PackageManifest, InstallError> {
    let file = fs::File::open(archive).map_err(|e| InstallError::io(archive, e))?;
    let mut tar = Archive::new(GzDecoder::new(file));
    fs::create_dir_all(dest).map_err(|e| InstallError::io(dest, e))?;

    let entries = tar
        .entries()
        .map_err(|e| InstallError::Archive(e.to_string()))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| InstallError::Archive(e.to_string()))?;
        let member = entry
            .path()
            .map_err(|e| InstallError::Archive(e.to_string()))?
            .into_owned();

        let entry_type = entry.header().entry_type();
        if matches!(entry_type, EntryType::XHeader | EntryType::XGlobalHeader) {
            continue;
        }
        if !(entry_type.is_file() || entry_type.is_dir()) {
            return Err(InstallError::UnsafePath(format!(
                "{} ({:?} entries are not allowed)",
                member.display(),
                entry_type
            )));
        }
        check_member_path(&member)?;

        let unpacked = entry
            .unpack_in(dest)
            .map_err(|e| InstallError::io(dest.join(&member), e))?;
        if !unpacked {
            return Err(InstallError::UnsafePath(member.display().to_string()));
        }
    }

    read_manifest(dest)?
        .ok_or_else(|| InstallError::Manifest(format!("{} not found in archive", MANIFEST_FILENAME)))
}

fn check_member_path(path: &Path) -> Result<(), InstallError> {
    let safe = path
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if safe && path.components().next().is_some() {
        Ok(())
    } else {
        Err(InstallError::UnsafePath(path.display().to_string()))
    }
}
