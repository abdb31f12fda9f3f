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

//! The verified update pipeline: discovery, download, checksum, release
//! signature, key-transparency anchor, install.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use diesel::sqlite::SqliteConnection;
use diesel::{Connection, RunQueryDsl};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use airlock::channel::{EnvelopeStatus, SignedEnvelope};
use airlock::crypto::{generate_signing_keypair, sign_message, CHECKSUM_HASH};
use airlock::updater::{
    InstallSettings, Installer, ReleaseRecord, UpdatePolicy, UpdatesPayload, UpdaterSettings,
};
use airlock::{
    AutoUpdater, ChannelOutcome, ChannelRegistry, PackageId, PackageInstaller, PackageKind,
    TrackedPackage, UpdateCycle, UpdateError, UpdateOutcome,
};

use crate::fixtures::{release, Node, SimChannel, SimSupplier};

const POST_INSTALL: &str = "#!/bin/sh\necho ok > installed.flag\n";

/// A `.tar.gz` package for the `acme/dark` theme.
fn package_archive(version: &str, index: &str) -> Vec<u8> {
    let manifest = serde_json::json!({
        "supplier": "acme",
        "name": "dark",
        "version": version,
        "scripts": [{ "category": "shell", "path": "post-install.sh" }],
    });
    let members: Vec<(&str, Vec<u8>)> = vec![
        ("manifest.json", manifest.to_string().into_bytes()),
        ("index.html", index.as_bytes().to_vec()),
        ("css/site.css", b"body { color: #111; }".to_vec()),
        ("post-install.sh", POST_INSTALL.as_bytes().to_vec()),
    ];

    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for (name, body) in members {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(body.len() as u64);
        header.set_mode(0o644);
        builder.append_data(&mut header, name, body.as_slice()).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

fn checksum(bytes: &[u8]) -> String {
    hex::encode(CHECKSUM_HASH.hash(bytes))
}

/// One site with `acme` onboarded on a single channel.
struct Site {
    node: Node,
    channel: SimChannel,
    acme: SimSupplier,
    settings: InstallSettings,
    package: PackageId,
}

impl Site {
    async fn new() -> Self {
        let node = Node::new().await;
        let mut channel = SimChannel::new("main", 3);
        let acme = SimSupplier::new("acme");
        let onboarding = channel.onboard(&acme);
        node.sync_honest(&channel, &onboarding, 3).await;

        let root = node.dir.path().join("site");
        let settings = InstallSettings {
            engine_root: root.join("engine"),
            extensions_dir: root.join("extensions"),
            plugins_dir: root.join("plugins"),
            themes_dir: root.join("themes"),
            cache_dir: root.join("cache"),
            offline_marker: root.join("offline"),
            script_timeout: Duration::from_secs(10),
            code_interpreter: None,
        };
        Self {
            node,
            channel,
            acme,
            settings,
            package: PackageId::new(PackageKind::Theme, "acme", "dark"),
        }
    }

    fn target(&self) -> PathBuf {
        self.settings.target_dir(&self.package)
    }

    /// Lays down an installed copy of the theme at `version`.
    fn install_existing(&self, version: &str) {
        let target = self.target();
        fs::create_dir_all(&target).unwrap();
        let manifest = serde_json::json!({ "supplier": "acme", "name": "dark", "version": version });
        fs::write(target.join("manifest.json"), manifest.to_string()).unwrap();
        fs::write(target.join("index.html"), format!("v{}", version)).unwrap();
    }

    /// Publishes a release anchor signed by the sub key and syncs it.
    async fn anchor(&mut self, version: &str, checksum: &str) {
        let event = self.channel.publish(
            "acme",
            release(PackageKind::Theme, "dark", version, checksum),
            &self.acme.sub,
        );
        self.node.sync_honest(&self.channel, &[event], 3).await;
    }

    fn record(&self, version: &str, archive: &[u8], signer: &[u8]) -> ReleaseRecord {
        let digest = CHECKSUM_HASH.hash(archive);
        ReleaseRecord {
            version: version.to_string(),
            checksum: hex::encode(&digest),
            signature: STANDARD.encode(sign_message(&digest, signer).unwrap()),
            merkle_root: self.channel.root_hex(),
        }
    }

    fn advertise(&self, updates: Vec<ReleaseRecord>) {
        let status = if updates.is_empty() {
            EnvelopeStatus::NoUpdates
        } else {
            EnvelopeStatus::Ok
        };
        let payload = UpdatesPayload {
            timestamp: Utc::now(),
            updates,
        };
        let envelope = SignedEnvelope::seal(status, &payload, &self.channel.key.private_key).unwrap();
        self.node
            .transport
            .respond(self.channel.updates_url(), serde_json::to_value(envelope).unwrap());
    }

    fn serve(&self, archive: Vec<u8>) {
        self.node.transport.serve_file(self.channel.download_url(), archive);
    }

    fn updater(&self) -> AutoUpdater {
        AutoUpdater::new(
            Arc::new(ChannelRegistry::new([self.channel.channel()])),
            self.node.suppliers.clone(),
            self.node.dal.clone(),
            self.node.transport.clone(),
            Arc::new(PackageInstaller::new(self.settings.clone())),
            UpdaterSettings::default(),
        )
    }

    fn tracked(&self, policy: Option<UpdatePolicy>) -> TrackedPackage {
        TrackedPackage {
            package: self.package.clone(),
            policy,
        }
    }

    /// The installed copy was not modified.
    fn assert_untouched(&self, version: &str) {
        let target = self.target();
        assert_eq!(
            fs::read_to_string(target.join("index.html")).unwrap(),
            format!("v{}", version)
        );
        assert!(!target.join("index.html.backup").exists());
        assert!(!target.join("css").exists());
        assert!(!self.settings.offline_marker.exists());
    }
}

/// A signed, anchored release is installed: files replaced with backups,
/// post-install script run, cache invalidated, site back online.
#[tokio::test]
async fn test_installs_anchored_release() {
    let mut site = Site::new().await;
    site.install_existing("2.0.0");
    let cache = site.settings.cache_path(&site.package);
    fs::create_dir_all(&cache).unwrap();
    fs::write(cache.join("compiled.css"), "stale").unwrap();

    let archive = package_archive("2.1.0", "v2.1.0");
    site.anchor("2.1.0", &checksum(&archive)).await;
    site.advertise(vec![site.record("2.1.0", &archive, &site.acme.sub.private_key)]);
    site.serve(archive);

    let outcome = site.updater().update(&site.tracked(None)).await.unwrap();
    match outcome {
        UpdateOutcome::Installed { from, to } => {
            assert_eq!(from.as_str(), "2.0.0");
            assert_eq!(to.as_str(), "2.1.0");
        }
        other => panic!("Expected Installed, got {:?}", other),
    }

    let target = site.target();
    assert_eq!(fs::read_to_string(target.join("index.html")).unwrap(), "v2.1.0");
    assert_eq!(
        fs::read_to_string(target.join("index.html.backup")).unwrap(),
        "v2.0.0"
    );
    assert!(target.join("css/site.css").exists());
    assert!(!target.join("css/site.css.backup").exists());
    assert!(target.join("installed.flag").exists());
    assert!(!site.settings.offline_marker.exists());
    assert!(!cache.exists());

    let installer = PackageInstaller::new(site.settings.clone());
    let installed = installer.installed_version(&site.package).unwrap().unwrap();
    assert_eq!(installed.as_str(), "2.1.0");
}

/// An artifact whose bytes do not match the advertised checksum never
/// reaches the installer.
#[tokio::test]
async fn test_checksum_mismatch_touches_nothing() {
    let mut site = Site::new().await;
    site.install_existing("2.0.0");

    let archive = package_archive("2.1.0", "v2.1.0");
    site.anchor("2.1.0", &checksum(&archive)).await;
    site.advertise(vec![site.record("2.1.0", &archive, &site.acme.sub.private_key)]);
    site.serve(package_archive("2.1.0", "tampered"));

    let outcome = site.updater().update(&site.tracked(None)).await.unwrap();
    assert!(matches!(
        outcome,
        UpdateOutcome::Rejected(UpdateError::ChecksumMismatch { .. })
    ));
    site.assert_untouched("2.0.0");
}

/// A correctly signed release that Keyggdrasil never anchored is refused.
#[tokio::test]
async fn test_unanchored_release_rejected() {
    let site = Site::new().await;
    site.install_existing("2.0.0");

    let archive = package_archive("2.1.0", "v2.1.0");
    site.advertise(vec![site.record("2.1.0", &archive, &site.acme.sub.private_key)]);
    site.serve(archive);

    let outcome = site.updater().update(&site.tracked(None)).await.unwrap();
    assert!(matches!(
        outcome,
        UpdateOutcome::Rejected(UpdateError::KeyTransparencyMismatch { .. })
    ));
    site.assert_untouched("2.0.0");
}

/// The anchor must name the version being installed, not just the checksum.
#[tokio::test]
async fn test_anchor_for_other_version_rejected() {
    let mut site = Site::new().await;
    site.install_existing("2.0.0");

    let archive = package_archive("2.1.0", "v2.1.0");
    site.anchor("2.0.5", &checksum(&archive)).await;
    site.advertise(vec![site.record("2.1.0", &archive, &site.acme.sub.private_key)]);
    site.serve(archive);

    let outcome = site.updater().update(&site.tracked(None)).await.unwrap();
    assert!(matches!(
        outcome,
        UpdateOutcome::Rejected(UpdateError::KeyTransparencyMismatch { .. })
    ));
    site.assert_untouched("2.0.0");
}

/// A release row whose stored signature no longer decodes cannot vouch for
/// the artifact; the package is rejected and the cycle carries on.
#[tokio::test]
async fn test_corrupt_anchor_row_rejected() {
    let mut site = Site::new().await;
    site.install_existing("2.0.0");

    let archive = package_archive("2.1.0", "v2.1.0");
    site.anchor("2.1.0", &checksum(&archive)).await;
    let mut conn = SqliteConnection::establish(site.node.db_path().to_str().unwrap()).unwrap();
    let damaged = diesel::sql_query(
        "UPDATE merkle_leaves SET signature = '!!not base64!!' WHERE action = 'release'",
    )
    .execute(&mut conn)
    .unwrap();
    assert_eq!(damaged, 1);

    site.advertise(vec![site.record("2.1.0", &archive, &site.acme.sub.private_key)]);
    site.serve(archive);

    let outcome = site.updater().update(&site.tracked(None)).await.unwrap();
    assert!(matches!(
        outcome,
        UpdateOutcome::Rejected(UpdateError::KeyTransparencyMismatch { .. })
    ));
    site.assert_untouched("2.0.0");
}

/// Release signatures must come from one of the supplier's sub keys.
#[tokio::test]
async fn test_release_signature_from_unknown_key_rejected() {
    let mut site = Site::new().await;
    site.install_existing("2.0.0");

    let archive = package_archive("2.1.0", "v2.1.0");
    site.anchor("2.1.0", &checksum(&archive)).await;
    let stranger = generate_signing_keypair();
    site.advertise(vec![site.record("2.1.0", &archive, &stranger.private_key)]);
    site.serve(archive);

    let outcome = site.updater().update(&site.tracked(None)).await.unwrap();
    assert!(matches!(
        outcome,
        UpdateOutcome::Rejected(UpdateError::Signature { .. })
    ));
    site.assert_untouched("2.0.0");
}

/// Major upgrades wait for an explicit policy; nothing is downloaded.
#[tokio::test]
async fn test_policy_skips_major_upgrade() {
    let site = Site::new().await;
    site.install_existing("2.0.0");

    let archive = package_archive("3.0.0", "v3.0.0");
    site.advertise(vec![site.record("3.0.0", &archive, &site.acme.sub.private_key)]);
    site.serve(archive);

    let outcome = site.updater().update(&site.tracked(None)).await.unwrap();
    match outcome {
        UpdateOutcome::Skipped {
            installed,
            available,
        } => {
            assert_eq!(installed.as_str(), "2.0.0");
            assert_eq!(available.len(), 1);
            assert_eq!(available[0].as_str(), "3.0.0");
        }
        other => panic!("Expected Skipped, got {:?}", other),
    }
    assert_eq!(site.node.transport.request_count(&site.channel.download_url()), 0);

    let outcome = site
        .updater()
        .check(&site.tracked(Some(UpdatePolicy::all())))
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        UpdateOutcome::Available { ref next, .. } if next.as_str() == "3.0.0"
    ));
}

/// The oldest allowed release is next, whatever order the channel lists them.
#[tokio::test]
async fn test_check_picks_oldest_allowed_release() {
    let site = Site::new().await;
    site.install_existing("2.0.0");

    let newer = package_archive("2.1.0", "v2.1.0");
    let older = package_archive("2.0.1", "v2.0.1");
    let stale = package_archive("1.9.0", "v1.9.0");
    site.advertise(vec![
        site.record("2.1.0", &newer, &site.acme.sub.private_key),
        site.record("1.9.0", &stale, &site.acme.sub.private_key),
        site.record("2.0.1", &older, &site.acme.sub.private_key),
    ]);

    let outcome = site.updater().check(&site.tracked(None)).await.unwrap();
    match outcome {
        UpdateOutcome::Available { installed, next } => {
            assert_eq!(installed.as_str(), "2.0.0");
            assert_eq!(next.as_str(), "2.0.1");
        }
        other => panic!("Expected Available, got {:?}", other),
    }
}

#[tokio::test]
async fn test_up_to_date_and_not_installed() {
    let site = Site::new().await;
    site.advertise(Vec::new());

    let outcome = site.updater().update(&site.tracked(None)).await.unwrap();
    assert!(matches!(outcome, UpdateOutcome::NotInstalled));
    assert_eq!(site.node.transport.request_count(&site.channel.updates_url()), 0);

    site.install_existing("2.0.0");
    let outcome = site.updater().update(&site.tracked(None)).await.unwrap();
    assert!(matches!(
        outcome,
        UpdateOutcome::UpToDate { ref installed } if installed.as_str() == "2.0.0"
    ));
}

/// One full cycle: the anchor arrives through Keyggdrasil and the release is
/// installed in the same run.
#[tokio::test]
async fn test_full_cycle_installs_release() {
    let mut site = Site::new().await;
    site.install_existing("2.0.0");

    let archive = package_archive("2.0.1", "v2.0.1");
    let anchor = site.channel.publish(
        "acme",
        release(PackageKind::Theme, "dark", "2.0.1", &checksum(&archive)),
        &site.acme.sub,
    );
    site.channel.serve_fetch(&site.node.transport, &[anchor]);
    site.channel.attest_all(&site.node.transport);
    site.advertise(vec![site.record("2.0.1", &archive, &site.acme.sub.private_key)]);
    site.serve(archive);

    let cycle = UpdateCycle::new(
        site.node.keyggdrasil(&[&site.channel], 3),
        site.updater(),
        vec![site.tracked(None)],
    );
    let report = cycle.run().await.unwrap();

    assert!(!report.has_rejections(), "{:?}", report);
    assert!(matches!(
        report.channels[0].1,
        ChannelOutcome::Accepted { count: 1, .. }
    ));
    assert!(matches!(
        report.packages[0].1,
        UpdateOutcome::Installed { ref to, .. } if to.as_str() == "2.0.1"
    ));
    assert_eq!(
        fs::read_to_string(site.target().join("index.html")).unwrap(),
        "v2.0.1"
    );
}
