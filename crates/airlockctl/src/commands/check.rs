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

//! Implementation of the `check` command.

use anyhow::Result;

use super::print_package_outcomes;
use crate::context::AppContext;

pub async fn run(ctx: &AppContext) -> Result<()> {
    let updater = ctx.updater(ctx.transport()?)?;

    let mut outcomes = Vec::new();
    for tracked in ctx.config.tracked_packages() {
        let outcome = updater.check(&tracked).await?;
        outcomes.push((tracked.package, outcome));
    }

    if outcomes.is_empty() {
        println!("No packages are tracked");
    }
    print_package_outcomes(&outcomes);
    Ok(())
}
