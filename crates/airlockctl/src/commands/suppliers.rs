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

//! Implementation of the `suppliers` command.

use anyhow::{Context, Result};

use crate::context::AppContext;

pub fn run(ctx: &AppContext, only: Option<&str>) -> Result<()> {
    let names = match only {
        Some(name) => vec![name.to_string()],
        None => ctx
            .suppliers
            .store()
            .list()
            .context("Failed to list the trust store")?,
    };

    if names.is_empty() {
        println!("Trust store {} is empty", ctx.suppliers.store().dir().display());
    }

    for name in names {
        let Some(supplier) = ctx.suppliers.get(&name)? else {
            println!("{name}: not in trust store");
            continue;
        };
        let channels: Vec<&str> = supplier.channels.iter().map(String::as_str).collect();
        println!("{} (channels: {})", supplier.name, channels.join(", "));
        for key in &supplier.signing_keys {
            let window = match (key.validity.from, key.validity.until) {
                (None, None) => String::new(),
                (from, until) => format!(
                    " valid {} .. {}",
                    from.map_or_else(|| "-".to_string(), |t| t.to_rfc3339()),
                    until.map_or_else(|| "-".to_string(), |t| t.to_rfc3339())
                ),
            };
            println!(
                "  {:<6} {} ({}){}",
                key.key_type,
                hex::encode(key.public_key),
                &key.fingerprint()[..16],
                window
            );
        }
    }
    Ok(())
}
