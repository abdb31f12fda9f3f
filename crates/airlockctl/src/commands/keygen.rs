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

//! Implementation of the `keygen` command.

use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use airlock::crypto::generate_signing_keypair;

pub fn run(out: Option<&Path>) -> Result<()> {
    let keypair = generate_signing_keypair();

    println!("public_key  = {}", hex::encode(&keypair.public_key));
    println!("fingerprint = {}", keypair.fingerprint);

    match out {
        Some(path) => {
            write_private_key(path, &hex::encode(&keypair.private_key))?;
            println!("private key written to {}", path.display());
        }
        None => println!("private_key = {}", hex::encode(&keypair.private_key)),
    }
    Ok(())
}

fn write_private_key(path: &Path, encoded: &str) -> Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options
        .open(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    writeln!(file, "{}", encoded).with_context(|| format!("Failed to write {}", path.display()))
}
