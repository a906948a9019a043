//! Host platform detection.
//!
//! Maps the host operating system and CPU architecture onto the fixed set
//! of platform keys used to index runtime manifests. The table is closed:
//! anything not listed is an error rather than a silent default.

use std::fmt;

use crate::error::BootstrapError;

/// Canonical platform key used as a lookup index into runtime manifests.
///
/// Derived once per run and never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PlatformKey(&'static str);

/// Every `(os, arch, key)` entry of the platform table.
///
/// Architecture names follow `std::env::consts::ARCH`; the 32/64-bit x86
/// families accept both the Rust and the conventional spelling.
const PLATFORM_TABLE: &[(&str, &[&str], &str)] = &[
    ("linux", &["x86", "i386", "i686"], "linux-i386"),
    ("linux", &["x86_64", "amd64"], "linux"),
    ("macos", &["aarch64", "arm64"], "mac-os-arm64"),
    ("macos", &["x86_64", "amd64"], "mac-os"),
    ("windows", &["x86", "i386", "i686"], "windows-x86"),
    ("windows", &["x86_64", "amd64"], "windows-x64"),
    ("windows", &["aarch64", "arm64"], "windows-arm64"),
];

impl PlatformKey {
    /// Resolve a platform key from an operating system and architecture.
    ///
    /// `darwin` is accepted as an alias of `macos`.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError::UnsupportedPlatform`] for any pair not in
    /// the table.
    pub fn resolve(os: &str, arch: &str) -> Result<Self, BootstrapError> {
        let os_normalized = match os {
            "darwin" => "macos",
            other => other,
        };

        PLATFORM_TABLE
            .iter()
            .find(|(table_os, arches, _)| *table_os == os_normalized && arches.contains(&arch))
            .map(|(_, _, key)| PlatformKey(key))
            .ok_or_else(|| BootstrapError::UnsupportedPlatform {
                os: os.to_string(),
                arch: arch.to_string(),
            })
    }

    /// Resolve the platform key of the running host.
    pub fn current() -> Result<Self, BootstrapError> {
        Self::resolve(std::env::consts::OS, std::env::consts::ARCH)
    }

    /// The key as it appears in manifests.
    pub fn as_str(&self) -> &'static str {
        self.0
    }

    /// Whether this key designates a Windows host.
    pub fn is_windows(&self) -> bool {
        self.0.starts_with("windows")
    }

    /// Whether this key designates a macOS host.
    pub fn is_macos(&self) -> bool {
        self.0.starts_with("mac-os")
    }
}

impl fmt::Display for PlatformKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_documented_table() {
        let cases = [
            ("linux", "x86", "linux-i386"),
            ("linux", "x86_64", "linux"),
            ("linux", "amd64", "linux"),
            ("darwin", "arm64", "mac-os-arm64"),
            ("macos", "aarch64", "mac-os-arm64"),
            ("darwin", "amd64", "mac-os"),
            ("windows", "x86", "windows-x86"),
            ("windows", "x86_64", "windows-x64"),
            ("windows", "arm64", "windows-arm64"),
        ];

        for (os, arch, expected) in cases {
            let key = PlatformKey::resolve(os, arch).unwrap();
            assert_eq!(key.as_str(), expected, "{os}/{arch}");
        }
    }

    #[test]
    fn test_unsupported_pairs() {
        for (os, arch) in [
            ("linux", "aarch64"),
            ("darwin", "x86"),
            ("freebsd", "x86_64"),
            ("windows", "riscv64"),
            ("", ""),
        ] {
            let err = PlatformKey::resolve(os, arch).unwrap_err();
            assert!(
                matches!(err, BootstrapError::UnsupportedPlatform { .. }),
                "{os}/{arch} should be unsupported"
            );
        }
    }

    #[test]
    fn test_os_predicates() {
        assert!(PlatformKey::resolve("windows", "arm64").unwrap().is_windows());
        assert!(PlatformKey::resolve("darwin", "arm64").unwrap().is_macos());
        assert!(!PlatformKey::resolve("linux", "x86_64").unwrap().is_windows());
    }

    #[test]
    fn test_display() {
        let key = PlatformKey::resolve("windows", "x86_64").unwrap();
        assert_eq!(key.to_string(), "windows-x64");
    }
}
