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

//! Package kinds and the per-attempt update records.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::version::Version;

/// Kind of installable package.
///
/// Wire names are the lowercase variant names; the historical product names
/// (`airship`, `cabin`, `gadget`, `motif`) are accepted as aliases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageKind {
    #[serde(alias = "airship")]
    Engine,
    #[serde(alias = "cabin")]
    Extension,
    #[serde(alias = "gadget")]
    Plugin,
    #[serde(alias = "motif")]
    Theme,
}

impl PackageKind {
    pub const ALL: [PackageKind; 4] = [
        PackageKind::Engine,
        PackageKind::Extension,
        PackageKind::Plugin,
        PackageKind::Theme,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PackageKind::Engine => "engine",
            PackageKind::Extension => "extension",
            PackageKind::Plugin => "plugin",
            PackageKind::Theme => "theme",
        }
    }
}

impl fmt::Display for PackageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PackageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "engine" | "airship" => Ok(PackageKind::Engine),
            "extension" | "cabin" => Ok(PackageKind::Extension),
            "plugin" | "gadget" => Ok(PackageKind::Plugin),
            "theme" | "motif" => Ok(PackageKind::Theme),
            other => Err(format!("unknown package type '{}'", other)),
        }
    }
}

/// Identifies one tracked package.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PackageId {
    pub kind: PackageKind,
    pub supplier: String,
    pub name: String,
}

impl PackageId {
    pub fn new(kind: PackageKind, supplier: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            supplier: supplier.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.kind, self.supplier, self.name)
    }
}

/// A release advertised by a channel.
#[derive(Debug, Clone)]
pub struct UpdatePackageInfo {
    pub package: PackageId,
    pub version: Version,
    pub channel: String,
    pub channel_url: String,
    /// Hex checksum of the artifact.
    pub checksum: String,
    pub release_signature: Vec<u8>,
    /// Root under which the checksum was anchored, as claimed by the channel.
    pub merkle_root: String,
}

/// A downloaded artifact awaiting verification.
///
/// The backing temporary file is deleted when the artifact is dropped.
#[derive(Debug)]
pub struct UpdateArtifact {
    pub info: UpdatePackageInfo,
    file: tempfile::TempPath,
    pub size: u64,
    /// Hex hash recomputed from the bytes on disk.
    pub hash: String,
}

impl UpdateArtifact {
    pub fn new(info: UpdatePackageInfo, file: tempfile::TempPath, size: u64, hash: String) -> Self {
        Self {
            info,
            file,
            size,
            hash,
        }
    }

    pub fn path(&self) -> &Path {
        &self.file
    }
}
