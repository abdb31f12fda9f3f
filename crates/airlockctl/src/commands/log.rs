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

//! Implementation of the `log` and `verify-log` commands.

use anyhow::{bail, Result};

use crate::context::AppContext;

async fn channel_names(ctx: &AppContext, only: Option<&str>) -> Result<Vec<String>> {
    if let Some(channel) = only {
        return Ok(vec![channel.to_string()]);
    }
    let mut names = ctx.dal.merkle_log().channels().await?;
    for channel in ctx.channels.iter() {
        if !names.contains(&channel.name) {
            names.push(channel.name.clone());
        }
    }
    names.sort();
    Ok(names)
}

pub async fn show(ctx: &AppContext, only: Option<&str>) -> Result<()> {
    let log_dal = ctx.dal.merkle_log();
    for channel in channel_names(ctx, only).await? {
        let log = log_dal.load_channel_log(&channel).await?;
        let last = log_dal.last_sequence_id(&channel).await?;
        println!(
            "{channel}: {} leaves, last sequence {}, root {}",
            log.len(),
            last.map_or_else(|| "-".to_string(), |id| id.to_string()),
            if log.is_empty() { "-".to_string() } else { log.root_hex() }
        );
    }
    Ok(())
}

pub async fn verify(ctx: &AppContext, only: Option<&str>) -> Result<()> {
    let log_dal = ctx.dal.merkle_log();
    let mut tampered = 0;
    for channel in channel_names(ctx, only).await? {
        let report = log_dal.verify_persisted_log(&channel).await?;
        match &report.first_mismatch {
            None => println!("{channel}: OK ({} leaves, root {})", report.leaves, report.root),
            Some(row) => {
                tampered += 1;
                println!(
                    "{channel}: MISMATCH at row {} (sequence {}): stored root {}",
                    row.id, row.channel_sequence_id, row.merkle_root
                );
            }
        }
    }
    if tampered > 0 {
        bail!("{tampered} channel log(s) failed verification");
    }
    Ok(())
}
