//! Property-based tests for tether-core.
//!
//! # Properties Tested
//!
//! - Platform table totality: every pair outside the table is rejected,
//!   every pair inside it maps to exactly one key
//! - Version gate ordering: an update happens iff the installed version is
//!   strictly older than the remote one
//! - Digest comparison ignores case and rejects any other difference
//! - Reconciliation schedules exactly the files whose content is missing or
//!   wrong, and a converged tree plans nothing

#![cfg(test)]

use std::collections::BTreeSet;

use proptest::prelude::*;
use semver::Version;
use tempfile::TempDir;

use crate::hash::{hashes_equal, HashAlgorithm};
use crate::manifest::{FileDescriptor, FileKind, FileManifest};
use crate::platform::PlatformKey;
use crate::reconcile::{reconcile, OrphanPolicy};
use crate::selfupdate::{decide, GateDecision, InstalledVersionRecord};

// =============================================================================
// Generators
// =============================================================================

const SUPPORTED: &[(&str, &str, &str)] = &[
    ("linux", "x86", "linux-i386"),
    ("linux", "i686", "linux-i386"),
    ("linux", "x86_64", "linux"),
    ("linux", "amd64", "linux"),
    ("macos", "aarch64", "mac-os-arm64"),
    ("darwin", "arm64", "mac-os-arm64"),
    ("macos", "x86_64", "mac-os"),
    ("darwin", "amd64", "mac-os"),
    ("windows", "x86", "windows-x86"),
    ("windows", "i386", "windows-x86"),
    ("windows", "x86_64", "windows-x64"),
    ("windows", "aarch64", "windows-arm64"),
];

const KNOWN_OS: &[&str] = &["linux", "macos", "windows"];
const UNKNOWN_ARCH: &[&str] = &["riscv64", "powerpc64", "s390x", "mips", "arm"];
const UNKNOWN_OS: &[&str] = &["freebsd", "android", "ios", "solaris", ""];
const KNOWN_ARCH: &[&str] = &["x86_64", "aarch64", "x86"];

/// Generate a supported `(os, arch, expected key)` triple.
fn arb_supported() -> impl Strategy<Value = (&'static str, &'static str, &'static str)> {
    prop::sample::select(SUPPORTED)
}

/// Generate an `(os, arch)` pair that the table does not list.
fn arb_unsupported() -> impl Strategy<Value = (String, String)> {
    prop_oneof![
        // Known OS, unknown architecture
        (
            prop::sample::select(KNOWN_OS),
            prop::sample::select(UNKNOWN_ARCH),
        )
            .prop_map(|(os, arch)| (os.to_string(), arch.to_string())),
        // Known architecture, unknown OS
        (
            prop::sample::select(UNKNOWN_OS),
            prop::sample::select(KNOWN_ARCH),
        )
            .prop_map(|(os, arch)| (os.to_string(), arch.to_string())),
        // Listed separately but never together
        Just(("macos".to_string(), "x86".to_string())),
        Just(("linux".to_string(), "aarch64".to_string())),
        // Arbitrary lowercase noise
        ("[a-z]{8,12}", "[a-z]{8,12}"),
    ]
}

/// Generate a random version.
fn arb_version() -> impl Strategy<Value = Version> {
    (0u64..100, 0u64..100, 0u64..100)
        .prop_map(|(major, minor, patch)| Version::new(major, minor, patch))
}

/// Generate a small file tree: relative name to content.
fn arb_tree() -> impl Strategy<Value = Vec<(String, Vec<u8>)>> {
    let content = prop::collection::vec(any::<u8>(), 0..256);
    prop::collection::btree_map("[a-z]{1,8}\\.bin", content, 1..8)
        .prop_map(|files| files.into_iter().collect())
}

fn manifest_for(tree: &[(String, Vec<u8>)]) -> FileManifest {
    let descriptors = tree.iter().map(|(name, content)| FileDescriptor {
        relative_path: name.clone(),
        kind: FileKind::File,
        hash: HashAlgorithm::Sha256.digest(content),
        algorithm: HashAlgorithm::Sha256,
        size: content.len() as u64,
        url: format!("https://cdn.example.com/{name}"),
        executable: false,
    });
    FileManifest::from_descriptors(descriptors).unwrap()
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Every supported pair resolves to its key.
    #[test]
    fn prop_supported_platforms_resolve((os, arch, expected) in arb_supported()) {
        let key = PlatformKey::resolve(os, arch).unwrap();
        prop_assert_eq!(key.as_str(), expected);
    }

    /// Every pair outside the table is an error, never a default.
    #[test]
    fn prop_unsupported_platforms_rejected((os, arch) in arb_unsupported()) {
        prop_assert!(PlatformKey::resolve(&os, &arch).is_err());
    }

    /// The gate updates exactly when the installed version is older.
    #[test]
    fn prop_gate_follows_version_order(installed in arb_version(), remote in arb_version()) {
        let record = InstalledVersionRecord {
            version: installed.to_string(),
            hash: "00".to_string(),
        };
        let decision = decide(&record, &remote.to_string());

        if installed < remote {
            prop_assert_eq!(decision, GateDecision::Update);
        } else {
            prop_assert_eq!(decision, GateDecision::RunExisting);
        }
    }

    /// A digest equals itself in any case, and differs from any edit.
    #[test]
    fn prop_digest_comparison(
        content in prop::collection::vec(any::<u8>(), 0..512),
        flip in 0usize..64,
    ) {
        let digest = HashAlgorithm::Sha256.digest(&content);
        prop_assert!(hashes_equal(&digest, &digest.to_ascii_uppercase()));

        let mut edited = digest.clone().into_bytes();
        edited[flip] = if edited[flip] == b'0' { b'1' } else { b'0' };
        let edited = String::from_utf8(edited).unwrap();
        prop_assert!(!hashes_equal(&digest, &edited));
        prop_assert!(!hashes_equal(&digest, &digest[..63]));
    }

    /// Only absent or corrupted files are scheduled.
    #[test]
    fn prop_reconcile_schedules_exactly_divergent_files(
        tree in arb_tree(),
        states in prop::collection::vec(0u8..3, 8),
    ) {
        let dir = TempDir::new().unwrap();
        let manifest = manifest_for(&tree);

        // 0 = correct, 1 = corrupted, 2 = missing
        let mut expected = BTreeSet::new();
        for ((name, content), state) in tree.iter().zip(states.iter()) {
            let path = dir.path().join(name);
            match state {
                0 => std::fs::write(&path, content).unwrap(),
                1 => {
                    let mut corrupted = content.clone();
                    corrupted.push(0xff);
                    std::fs::write(&path, corrupted).unwrap();
                    expected.insert(path);
                }
                _ => {
                    expected.insert(path);
                }
            }
        }

        let plan = reconcile(&manifest, dir.path(), OrphanPolicy::Prune).unwrap();
        let scheduled: BTreeSet<_> = plan.downloads.iter().map(|t| t.destination.clone()).collect();
        prop_assert_eq!(scheduled, expected);
        prop_assert!(plan.orphans.is_empty());

        // Write the correct content and the tree converges.
        for (name, content) in &tree {
            std::fs::write(dir.path().join(name), content).unwrap();
        }
        let plan = reconcile(&manifest, dir.path(), OrphanPolicy::Prune).unwrap();
        prop_assert!(plan.is_empty());
    }
}
