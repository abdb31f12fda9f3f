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

//! Implementation of the `config` commands.

use anyhow::{Context, Result};
use airlock::config::{generate_default_config_toml, AirlockConfig, Validate};

pub fn print_default() -> Result<()> {
    let content =
        generate_default_config_toml().context("Failed to render the default configuration")?;
    print!("{}", content);
    Ok(())
}

pub fn validate(config: &AirlockConfig) -> Result<()> {
    config.validate().context("Invalid configuration")?;
    println!(
        "Configuration OK: {} channel(s), {} tracked package(s)",
        config.channels.len(),
        config.packages.len()
    );
    Ok(())
}
