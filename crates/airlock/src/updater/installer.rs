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

//! Package installation.
//!
//! One installer serves every [`PackageKind`]; the kind only selects the
//! target and cache directories. Installation unpacks into a staging
//! directory, checks the manifest against the verified release, then swaps
//! files in under the offline marker, keeping a `.backup` of each replaced
//! file.

use async_trait::async_trait;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info};

use super::archive::{read_manifest, unpack_package, PackageManifest};
use super::error::InstallError;
use super::offline::OfflineMarker;
use super::scripts::{ScriptOutcome, ScriptSandbox};
use crate::database::Database;
use crate::models::{PackageId, PackageKind, UpdateArtifact};
use crate::security::audit;
use crate::version::Version;

const BACKUP_SUFFIX: &str = ".backup";

/// Filesystem layout for installed packages.
#[derive(Debug, Clone)]
pub struct InstallSettings {
    pub engine_root: PathBuf,
    pub extensions_dir: PathBuf,
    pub plugins_dir: PathBuf,
    pub themes_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub offline_marker: PathBuf,
    pub script_timeout: Duration,
    pub code_interpreter: Option<PathBuf>,
}

impl InstallSettings {
    /// Directory a package is installed into.
    pub fn target_dir(&self, package: &PackageId) -> PathBuf {
        let base = match package.kind {
            PackageKind::Engine => return self.engine_root.clone(),
            PackageKind::Extension => &self.extensions_dir,
            PackageKind::Plugin => &self.plugins_dir,
            PackageKind::Theme => &self.themes_dir,
        };
        base.join(&package.supplier).join(&package.name)
    }

    /// Cache directory invalidated after installing a package.
    pub fn cache_path(&self, package: &PackageId) -> PathBuf {
        match package.kind {
            PackageKind::Engine => self.cache_dir.clone(),
            kind => self
                .cache_dir
                .join(kind.as_str())
                .join(&package.supplier)
                .join(&package.name),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
    pub target: PathBuf,
    pub files_replaced: usize,
    pub backups_created: usize,
    pub scripts_run: usize,
    pub scripts_skipped: usize,
}

/// Installs verified artifacts.
#[async_trait]
pub trait Installer: Send + Sync {
    /// Version currently installed, or `None` if the package is absent.
    fn installed_version(&self, package: &PackageId) -> Result<Option<Version>, InstallError>;

    async fn install(&self, artifact: &UpdateArtifact) -> Result<InstallReport, InstallError>;
}

pub struct PackageInstaller {
    settings: InstallSettings,
    marker: OfflineMarker,
    database: Option<Database>,
}

impl PackageInstaller {
    pub fn new(settings: InstallSettings) -> Self {
        let marker = OfflineMarker::new(settings.offline_marker.clone());
        Self {
            settings,
            marker,
            database: None,
        }
    }

    /// Database that migration scripts run against.
    pub fn with_database(mut self, database: Database) -> Self {
        self.database = Some(database);
        self
    }

    pub fn settings(&self) -> &InstallSettings {
        &self.settings
    }

    pub fn marker(&self) -> &OfflineMarker {
        &self.marker
    }

    fn invalidate_cache(&self, package: &PackageId) -> Result<(), InstallError> {
        let path = self.settings.cache_path(package);
        match fs::remove_dir_all(&path) {
            Ok(()) => info!("Invalidated cache {}", path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(InstallError::io(path, e)),
        }
        if package.kind == PackageKind::Engine {
            fs::create_dir_all(&path).map_err(|e| InstallError::io(&path, e))?;
        }
        Ok(())
    }
}

#[async_trait]
impl Installer for PackageInstaller {
    fn installed_version(&self, package: &PackageId) -> Result<Option<Version>, InstallError> {
        let target = self.settings.target_dir(package);
        Ok(read_manifest(&target)?.map(|manifest| Version::new(manifest.version)))
    }

    async fn install(&self, artifact: &UpdateArtifact) -> Result<InstallReport, InstallError> {
        let package = &artifact.info.package;
        let version = &artifact.info.version;
        let target = self.settings.target_dir(package);

        let staging = tempfile::tempdir().map_err(|e| InstallError::io(std::env::temp_dir(), e))?;
        let archive_path = artifact.path().to_path_buf();
        let staging_path = staging.path().to_path_buf();
        let manifest =
            tokio::task::spawn_blocking(move || unpack_package(&archive_path, &staging_path))
                .await
                .map_err(|e| InstallError::Archive(e.to_string()))??;
        check_manifest(package, version, &manifest)?;
        let files = collect_files(staging.path())?;

        self.marker
            .enter(&format!("installing {} {}", package, version))
            .map_err(|source| InstallError::Marker {
                path: self.marker.path().to_path_buf(),
                source,
            })?;

        let mut report = InstallReport {
            target: target.clone(),
            ..Default::default()
        };

        for relative in &files {
            let dest = target.join(relative);
            match replace_file(&staging.path().join(relative), &dest) {
                Ok(backed_up) => {
                    report.files_replaced += 1;
                    if backed_up {
                        report.backups_created += 1;
                    }
                }
                Err(err) => {
                    audit::log_install_failure(
                        package,
                        version.as_str(),
                        &dest.display().to_string(),
                        &err.to_string(),
                    );
                    return Err(err);
                }
            }
        }

        let sandbox = ScriptSandbox::new(&target, self.settings.script_timeout)
            .with_interpreter(self.settings.code_interpreter.as_deref())
            .with_database(self.database.as_ref());
        for script in &manifest.scripts {
            match sandbox.run(script).await {
                Ok(ScriptOutcome::Ran) => report.scripts_run += 1,
                Ok(ScriptOutcome::Skipped(_)) => report.scripts_skipped += 1,
                Err(err) => {
                    audit::log_install_failure(
                        package,
                        version.as_str(),
                        &script.path,
                        &err.to_string(),
                    );
                    return Err(err);
                }
            }
        }

        self.invalidate_cache(package)?;
        self.marker.leave().map_err(|source| InstallError::Marker {
            path: self.marker.path().to_path_buf(),
            source,
        })?;

        info!(
            "Installed {} {} into {} ({} files, {} backups)",
            package,
            version,
            target.display(),
            report.files_replaced,
            report.backups_created
        );
        Ok(report)
    }
}

fn check_manifest(
    package: &PackageId,
    version: &Version,
    manifest: &PackageManifest,
) -> Result<(), InstallError> {
    if manifest.supplier == package.supplier
        && manifest.name == package.name
        && manifest.version == version.as_str()
    {
        return Ok(());
    }
    Err(InstallError::ManifestMismatch {
        expected: format!("{} {}", package, version),
        found: format!(
            "{}:{}/{} {}",
            package.kind, manifest.supplier, manifest.name, manifest.version
        ),
    })
}

fn backup_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(BACKUP_SUFFIX);
    PathBuf::from(name)
}

/// Lists every regular file under `root` as a sorted relative path.
fn collect_files(root: &Path) -> Result<Vec<PathBuf>, InstallError> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let entries = fs::read_dir(&dir).map_err(|e| InstallError::io(&dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| InstallError::io(&dir, e))?;
            let path = entry.path();
            let file_type = entry.file_type().map_err(|e| InstallError::io(&path, e))?;
            if file_type.is_dir() {
                pending.push(path);
            } else if file_type.is_file() {
                if let Ok(relative) = path.strip_prefix(root) {
                    files.push(relative.to_path_buf());
                }
            }
        }
    }
    files.sort();
    Ok(files)
}

/// Replaces `dest` with `src`, keeping the previous file as a backup.
///
/// Returns whether a backup was made. On failure the backup is moved back.
fn replace_file(src: &Path, dest: &Path) -> Result<bool, InstallError> {
    let replace_err = |source| InstallError::Replace {
        path: dest.to_path_buf(),
        source,
    };

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(replace_err)?;
    }

    let backup = backup_path(dest);
    let had_original = dest.exists();
    if had_original {
        if backup.exists() {
            fs::remove_file(&backup).map_err(replace_err)?;
        }
        fs::rename(dest, &backup).map_err(replace_err)?;
    }

    if let Err(e) = fs::copy(src, dest) {
        if dest.exists() {
            if let Err(cleanup) = fs::remove_file(dest) {
                error!("Could not remove partial file {}: {}", dest.display(), cleanup);
            }
        }
        if had_original {
            if let Err(restore) = fs::rename(&backup, dest) {
                error!(
                    "Could not restore {} from {}: {}",
                    dest.display(),
                    backup.display(),
                    restore
                );
            }
        }
        return Err(replace_err(e));
    }
    Ok(had_original)
}
