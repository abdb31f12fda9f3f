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

//! Implementation of the `run` command.

use anyhow::{bail, Result};
use tracing::info;

use super::{print_channel_outcomes, print_package_outcomes};
use crate::context::AppContext;
use crate::lock::LockFile;

pub async fn run(ctx: &AppContext) -> Result<()> {
    let _lock = LockFile::acquire(&ctx.config.trust.lock_file)?;
    info!("Starting update cycle");

    let report = ctx.cycle()?.run().await?;
    print_channel_outcomes(&report.channels);
    print_package_outcomes(&report.packages);

    if report.has_rejections() {
        bail!("Update cycle finished with rejections; see the audit log");
    }
    Ok(())
}
