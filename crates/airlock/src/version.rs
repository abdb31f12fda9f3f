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

//! Version strings expanded into a single ordered integer.
//!
//! `major.minor.patch[<sep>increment]` becomes
//! `major * 10^6 + minor * 10^4 + patch * 10^2 + (increment - 100)`, with the
//! increment term omitted for a bare release. A pre-release such as
//! `1.2.3-rc1` therefore sorts before `1.2.3`.
//!
//! An expanded value of `0` means "not a valid version" and every upgrade
//! predicate returns `false` for it.
//!
//! Minor, patch and increment each own two decimal digits. A string whose
//! minor or patch is 100 or more, or whose increment is 100 or more, would
//! carry into the next group and break the ordering, so it expands to `0`
//! even though it matches the version pattern.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::sync::OnceLock;

/// Granularity of the major digit group.
pub const GROUP_MAJOR: i64 = 1_000_000;
/// Granularity of the minor digit group.
pub const GROUP_MINOR: i64 = 10_000;
/// Granularity of the patch digit group.
pub const GROUP_PATCH: i64 = 100;
/// Granularity of the increment digit group.
pub const GROUP_INCREMENT: i64 = 1;

const INCREMENT_BASE: i64 = 100;

fn version_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\d+)\.(\d+)\.(\d+)(?:[^0-9]*(\d+))?").expect("static regex compiles")
    })
}

/// Upgrade classification of a version bump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpgradeClass {
    /// The candidate is not newer.
    None,
    Patch,
    Minor,
    Major,
}

/// An immutable version string with its expanded integer form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Version {
    raw: String,
    expanded: i64,
}

impl Version {
    /// Parses a version string. Unparseable input yields an invalid version
    /// (expanded value `0`) rather than an error.
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let expanded = expand(&raw);
        Self { raw, expanded }
    }

    /// The original version string.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The expanded integer form.
    pub fn expanded(&self) -> i64 {
        self.expanded
    }

    /// Whether the string parsed.
    pub fn is_valid(&self) -> bool {
        self.expanded > 0
    }

    /// Classifies the bump from `self` to `candidate`.
    pub fn upgrade_class(&self, candidate: &Version) -> UpgradeClass {
        classify(self.expanded, candidate.expanded)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.expanded
            .cmp(&other.expanded)
            .then_with(|| self.raw.cmp(&other.raw))
    }
}

/// Expands a version string into its ordered integer form, or `0`.
pub fn expand(version: &str) -> i64 {
    let Some(caps) = version_regex().captures(version.trim()) else {
        return 0;
    };

    let group = |i: usize| -> Option<i64> { caps.get(i).and_then(|m| m.as_str().parse().ok()) };

    let (Some(major), Some(minor), Some(patch)) = (group(1), group(2), group(3)) else {
        return 0;
    };
    if minor >= 100 || patch >= 100 {
        return 0;
    }

    let mut expanded = major
        .saturating_mul(GROUP_MAJOR)
        .saturating_add(minor * GROUP_MINOR)
        .saturating_add(patch * GROUP_PATCH);

    if let Some(increment) = caps.get(4) {
        match increment.as_str().parse::<i64>() {
            Ok(inc) if inc < INCREMENT_BASE => expanded += inc - INCREMENT_BASE,
            _ => return 0,
        }
    }

    expanded.max(0)
}

/// Extracts one digit group from an expanded version.
///
/// `granularity` is one of [`GROUP_MAJOR`], [`GROUP_MINOR`], [`GROUP_PATCH`]
/// or [`GROUP_INCREMENT`].
pub fn group(expanded: i64, granularity: i64) -> i64 {
    match granularity {
        GROUP_MAJOR => expanded / GROUP_MAJOR,
        GROUP_MINOR => (expanded % GROUP_MAJOR) / GROUP_MINOR,
        GROUP_PATCH => (expanded % GROUP_MINOR) / GROUP_PATCH,
        _ => expanded % GROUP_PATCH,
    }
}

fn classify(from: i64, to: i64) -> UpgradeClass {
    if from <= 0 || to <= 0 || to <= from {
        return UpgradeClass::None;
    }
    if group(to, GROUP_MAJOR) > group(from, GROUP_MAJOR) {
        return UpgradeClass::Major;
    }
    if group(to, GROUP_MINOR) > group(from, GROUP_MINOR) {
        return UpgradeClass::Minor;
    }
    UpgradeClass::Patch
}

/// `to` is newer than `from`.
pub fn is_upgrade(from: i64, to: i64) -> bool {
    classify(from, to) != UpgradeClass::None
}

/// The major group strictly increased.
pub fn is_major_upgrade(from: i64, to: i64) -> bool {
    classify(from, to) == UpgradeClass::Major
}

/// Major unchanged, minor strictly increased.
pub fn is_minor_upgrade(from: i64, to: i64) -> bool {
    classify(from, to) == UpgradeClass::Minor
}

/// Major and minor unchanged, patch (or pre-release increment) increased.
pub fn is_patch_upgrade(from: i64, to: i64) -> bool {
    classify(from, to) == UpgradeClass::Patch
}
