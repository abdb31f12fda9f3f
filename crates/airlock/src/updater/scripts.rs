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

//! Post-install script sandbox.
//!
//! Scripts run with a cleared environment and a fixed `PATH`, inside the
//! package directory, under a timeout. A script that outlives the timeout is
//! killed. Migration scripts are SQL and only run when their declared driver
//! matches the active database.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

use super::archive::{ScriptCategory, ScriptEntry};
use super::error::InstallError;
use crate::database::Database;

/// `PATH` given to every sandboxed process.
pub const SANDBOX_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

const SHELL: &str = "/bin/sh";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptOutcome {
    Ran,
    Skipped(String),
}

pub struct ScriptSandbox<'a> {
    package_dir: &'a Path,
    timeout: Duration,
    code_interpreter: Option<&'a Path>,
    database: Option<&'a Database>,
}

impl<'a> ScriptSandbox<'a> {
    pub fn new(package_dir: &'a Path, timeout: Duration) -> Self {
        Self {
            package_dir,
            timeout,
            code_interpreter: None,
            database: None,
        }
    }

    pub fn with_interpreter(mut self, interpreter: Option<&'a Path>) -> Self {
        self.code_interpreter = interpreter;
        self
    }

    pub fn with_database(mut self, database: Option<&'a Database>) -> Self {
        self.database = database;
        self
    }

    /// Resolves a script path, requiring it to stay inside the package.
    pub fn resolve(&self, script: &str) -> Result<PathBuf, InstallError> {
        let root = self
            .package_dir
            .canonicalize()
            .map_err(|e| InstallError::io(self.package_dir, e))?;
        let resolved = root
            .join(script)
            .canonicalize()
            .map_err(|e| InstallError::Script {
                path: script.to_string(),
                message: e.to_string(),
            })?;
        if resolved.starts_with(&root) {
            Ok(resolved)
        } else {
            Err(InstallError::UnsafePath(script.to_string()))
        }
    }

    pub async fn run(&self, entry: &ScriptEntry) -> Result<ScriptOutcome, InstallError> {
        let path = self.resolve(&entry.path)?;

        let outcome = match entry.category {
            ScriptCategory::Code => match self.code_interpreter {
                Some(interpreter) => self.spawn(interpreter, &path, &entry.path).await?,
                None => ScriptOutcome::Skipped("no code interpreter configured".into()),
            },
            ScriptCategory::Shell => self.spawn(Path::new(SHELL), &path, &entry.path).await?,
            ScriptCategory::Migration => self.migrate(&path, entry).await?,
        };

        match &outcome {
            ScriptOutcome::Ran => info!("Post-install script {} completed", entry.path),
            ScriptOutcome::Skipped(reason) => {
                info!("Post-install script {} skipped: {}", entry.path, reason)
            }
        }
        Ok(outcome)
    }

    async fn migrate(&self, path: &Path, entry: &ScriptEntry) -> Result<ScriptOutcome, InstallError> {
        let Some(database) = self.database else {
            return Ok(ScriptOutcome::Skipped("no database configured".into()));
        };
        match entry.driver.as_deref() {
            Some(driver) if driver == database.driver() => {
                let sql = tokio::fs::read_to_string(path)
                    .await
                    .map_err(|e| InstallError::io(path, e))?;
                database.execute_script(sql).await?;
                Ok(ScriptOutcome::Ran)
            }
            other => Ok(ScriptOutcome::Skipped(format!(
                "migration targets {}, active driver is {}",
                other.unwrap_or("no driver"),
                database.driver()
            ))),
        }
    }

    async fn spawn(
        &self,
        program: &Path,
        script: &Path,
        label: &str,
    ) -> Result<ScriptOutcome, InstallError> {
        let child = Command::new(program)
            .arg(script)
            .current_dir(self.package_dir)
            .env_clear()
            .env("PATH", SANDBOX_PATH)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| InstallError::Script {
                path: label.to_string(),
                message: format!("failed to start {}: {}", program.display(), e),
            })?;

        // Dropping the child on timeout kills it.
        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| InstallError::ScriptTimeout {
                path: label.to_string(),
                timeout_secs: self.timeout.as_secs(),
            })?
            .map_err(|e| InstallError::Script {
                path: label.to_string(),
                message: e.to_string(),
            })?;

        debug!(
            "Script {} stdout: {}",
            label,
            String::from_utf8_lossy(&output.stdout).trim()
        );
        if output.status.success() {
            Ok(ScriptOutcome::Ran)
        } else {
            Err(InstallError::Script {
                path: label.to_string(),
                message: format!(
                    "{}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            })
        }
    }
}
