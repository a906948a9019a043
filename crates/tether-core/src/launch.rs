//! Launch specification handed to the process boundary.
//!
//! The engine does not start processes. It resolves the program, its
//! working directory and its arguments with placeholders substituted; the
//! binary spawns it.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::manifest::{AppManifest, FileKind};
use crate::platform::PlatformKey;

/// Values substituted into `${name}` placeholders of launch arguments.
#[derive(Debug, Clone)]
pub struct LaunchContext {
    /// `${rootPath}`
    pub root_path: PathBuf,
    /// `${osArch}`
    pub platform: PlatformKey,
    /// `${isPortable}`
    pub portable: bool,
    /// `${bsVersion}`
    pub bootstrap_version: String,
}

impl LaunchContext {
    /// Replace every known placeholder in `arg`. Unknown placeholders are kept.
    pub fn substitute(&self, arg: &str) -> String {
        let root = self.root_path.display().to_string();
        let portable = self.portable.to_string();
        let variables = [
            ("rootPath", root.as_str()),
            ("osArch", self.platform.as_str()),
            ("isPortable", portable.as_str()),
            ("bsVersion", self.bootstrap_version.as_str()),
        ];

        variables
            .iter()
            .fold(arg.to_string(), |acc, (name, value)| {
                acc.replace(&format!("${{{name}}}"), value)
            })
    }
}

/// A resolved process invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub working_dir: PathBuf,
    pub args: Vec<String>,
}

impl LaunchSpec {
    /// Launch the application tree on the managed runtime.
    ///
    /// Arguments are `-classpath <entries> <main class>` followed by the
    /// manifest's arguments. Classpath entries keep manifest order.
    pub fn for_tree(
        context: &LaunchContext,
        runtime_base: &Path,
        app_base: &Path,
        manifest: &AppManifest,
    ) -> Self {
        let classpath: Vec<String> = manifest
            .files
            .iter()
            .filter(|f| f.kind == FileKind::Classpath)
            .map(|f| app_base.join(&f.path).display().to_string())
            .collect();

        let mut args = vec![
            "-classpath".to_string(),
            classpath.join(classpath_separator(&context.platform)),
            manifest.main_class.clone(),
        ];
        args.extend(manifest.args.iter().map(|a| context.substitute(a)));

        Self {
            program: runtime_base.join(runtime_executable(&context.platform)),
            working_dir: context.root_path.clone(),
            args,
        }
    }

    /// Launch a single executable payload.
    pub fn for_executable(context: &LaunchContext, payload: &Path, args: &[String]) -> Self {
        Self {
            program: payload.to_path_buf(),
            working_dir: context.root_path.clone(),
            args: args.iter().map(|a| context.substitute(a)).collect(),
        }
    }

    /// Build a [`Command`] for this spec. Standard streams are inherited.
    pub fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args).current_dir(&self.working_dir);
        command
    }
}

/// Runtime executable relative to a runtime component's base directory.
pub fn runtime_executable(platform: &PlatformKey) -> &'static str {
    if platform.is_windows() {
        "bin/javaw.exe"
    } else if platform.is_macos() {
        "jre.bundle/Contents/Home/bin/java"
    } else {
        "bin/java"
    }
}

/// Classpath separator of the target OS.
pub fn classpath_separator(platform: &PlatformKey) -> &'static str {
    if platform.is_windows() {
        ";"
    } else {
        ":"
    }
}
