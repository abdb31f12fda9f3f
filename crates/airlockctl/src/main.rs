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

//! airlockctl - administrator interface for Airlock.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use airlock::config::{ConfigLoader, LoggingConfig};

mod commands;
mod context;
mod lock;
mod logging;

use context::AppContext;

/// Airlock - key transparency and verified auto-updates
#[derive(Parser)]
#[command(name = "airlockctl")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (defaults to the standard search paths)
    #[arg(short, long, env = "AIRLOCK_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a full cycle: sync Keyggdrasil, then update tracked packages
    Run,
    /// Sync Keyggdrasil only
    Sync,
    /// List updates the policy would install, without installing
    Check,
    /// Show each channel's Merkle log root and size
    Log {
        /// Limit to one channel
        #[arg(long)]
        channel: Option<String>,
    },
    /// Recompute every stored root and report tampering
    VerifyLog {
        /// Limit to one channel
        #[arg(long)]
        channel: Option<String>,
    },
    /// List suppliers in the trust store
    Suppliers {
        /// Show a single supplier
        name: Option<String>,
    },
    /// Generate an Ed25519 keypair for channel or supplier operators
    Keygen {
        /// Write the private key to this file (mode 0600) instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Configuration helpers
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print a default configuration file
    Default,
    /// Load and validate the configuration
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Commands that need no configuration log to the console only.
    match &cli.command {
        Commands::Keygen { out } => {
            logging::init(cli.verbose, &LoggingConfig::default())?;
            return commands::keygen::run(out.as_deref());
        }
        Commands::Config {
            command: ConfigCommands::Default,
        } => return commands::config::print_default(),
        _ => {}
    }

    let config = ConfigLoader::new()
        .load_config(cli.config.as_deref())
        .context("Failed to load configuration")?;
    let _guard = logging::init(cli.verbose, &config.logging)?;

    if let Commands::Config {
        command: ConfigCommands::Validate,
    } = &cli.command
    {
        return commands::config::validate(&config);
    }

    let ctx = AppContext::open(config).await?;
    match cli.command {
        Commands::Run => commands::run::run(&ctx).await,
        Commands::Sync => commands::sync::run(&ctx).await,
        Commands::Check => commands::check::run(&ctx).await,
        Commands::Log { channel } => commands::log::show(&ctx, channel.as_deref()).await,
        Commands::VerifyLog { channel } => commands::log::verify(&ctx, channel.as_deref()).await,
        Commands::Suppliers { name } => commands::suppliers::run(&ctx, name.as_deref()),
        Commands::Keygen { .. } | Commands::Config { .. } => Ok(()),
    }
}
