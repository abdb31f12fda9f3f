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

pub mod check;
pub mod config;
pub mod keygen;
pub mod log;
pub mod run;
pub mod suppliers;
pub mod sync;

use airlock::keyggdrasil::ChannelOutcome;
use airlock::updater::UpdateOutcome;
use airlock::PackageId;

pub(crate) fn print_channel_outcomes(outcomes: &[(String, ChannelOutcome)]) {
    for (channel, outcome) in outcomes {
        match outcome {
            ChannelOutcome::NoUpdates => println!("{channel}: no updates"),
            ChannelOutcome::Accepted {
                count,
                dropped,
                root,
            } => {
                println!("{channel}: accepted {count} event(s), root {root}");
                if *dropped > 0 {
                    println!("{channel}: {dropped} newer event(s) deferred to the next cycle");
                }
            }
            ChannelOutcome::Rejected(e) => println!("{channel}: REJECTED ({}) {}", e.kind(), e),
        }
    }
}

pub(crate) fn print_package_outcomes(outcomes: &[(PackageId, UpdateOutcome)]) {
    for (package, outcome) in outcomes {
        match outcome {
            UpdateOutcome::NotInstalled => println!("{package}: not installed"),
            UpdateOutcome::UpToDate { installed } => println!("{package}: up to date ({installed})"),
            UpdateOutcome::Skipped {
                installed,
                available,
            } => {
                let versions: Vec<&str> = available.iter().map(|v| v.as_str()).collect();
                println!(
                    "{package}: {installed} installed; {} available but not allowed by policy",
                    versions.join(", ")
                );
            }
            UpdateOutcome::Available { installed, next } => {
                println!("{package}: {installed} -> {next} available")
            }
            UpdateOutcome::Installed { from, to } => println!("{package}: installed {from} -> {to}"),
            UpdateOutcome::Rejected(e) => println!("{package}: REJECTED ({}) {}", e.kind(), e),
        }
    }
}
