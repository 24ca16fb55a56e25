//! Host identification and runtime binary discovery.
//!
//! OS and architecture names follow the conventions the launched runtime
//! itself reports (`Linux`, `Windows 10`, `Mac OS X`; `amd64`, `x86`,
//! `aarch64`), so descriptors written against it keep matching.

use crate::config::settings::LauncherSettings;
use crate::config::types::{LaunchError, Result};
use log::debug;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub fn os_name() -> &'static str {
    match std::env::consts::OS {
        "linux" => "Linux",
        "windows" => "Windows",
        "macos" => "Mac OS X",
        "freebsd" => "FreeBSD",
        "openbsd" => "OpenBSD",
        "netbsd" => "NetBSD",
        "solaris" => "SunOS",
        "android" => "Linux",
        other => other,
    }
}

pub fn os_arch() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "x86" => "x86",
        "aarch64" => "aarch64",
        "arm" => "arm",
        "powerpc64" => "ppc64",
        "riscv64" => "riscv64",
        other => other,
    }
}

fn os_version() -> String {
    if cfg!(target_os = "linux") {
        std::fs::read_to_string("/proc/sys/kernel/osrelease")
            .map(|v| v.trim().to_string())
            .unwrap_or_default()
    } else {
        String::new()
    }
}

pub fn path_separator() -> &'static str {
    if cfg!(windows) {
        ";"
    } else {
        ":"
    }
}

/// Host facts exposed to descriptors as `${os.name}` and friends
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostInfo {
    pub os_name: String,
    pub os_arch: String,
    props: BTreeMap<String, String>,
}

impl HostInfo {
    pub fn detect(settings: &LauncherSettings) -> Self {
        let mut props = BTreeMap::new();
        let mut put = |k: &str, v: String| {
            props.insert(k.to_string(), v);
        };
        put("os.name", os_name().to_string());
        put("os.arch", os_arch().to_string());
        put("os.version", os_version());
        put(
            "user.home",
            dirs::home_dir()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
        );
        put(
            "user.name",
            std::env::var("USER")
                .or_else(|_| std::env::var("USERNAME"))
                .unwrap_or_default(),
        );
        put(
            "user.dir",
            std::env::current_dir()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
        );
        put(
            "java.home",
            settings
                .runtime_home
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
        );
        put(
            "java.library.path",
            settings.library_path.clone().unwrap_or_default(),
        );
        put("file.separator", std::path::MAIN_SEPARATOR.to_string());
        put("path.separator", path_separator().to_string());
        put(
            "line.separator",
            if cfg!(windows) { "\r\n" } else { "\n" }.to_string(),
        );

        Self {
            os_name: os_name().to_string(),
            os_arch: os_arch().to_string(),
            props,
        }
    }

    /// Fixed host for tests and tools.
    pub fn fixed(os_name: &str, os_arch: &str) -> Self {
        let mut props = BTreeMap::new();
        props.insert("os.name".to_string(), os_name.to_string());
        props.insert("os.arch".to_string(), os_arch.to_string());
        Self {
            os_name: os_name.to_string(),
            os_arch: os_arch.to_string(),
            props,
        }
    }

    pub fn property(&self, name: &str) -> Option<&str> {
        self.props.get(name).map(String::as_str)
    }

    pub fn is_64bit(&self) -> bool {
        cfg!(target_pointer_width = "64")
    }
}

const RUNTIME_NAMES: [&str; 3] = ["java", "javaw.exe", "java.exe"];

fn find_in(dir: &Path) -> Option<PathBuf> {
    RUNTIME_NAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.is_file())
}

/// Locate the runtime binary: `<home>/bin` first, then `PATH`.
pub fn find_runtime(home: Option<&Path>) -> Result<PathBuf> {
    if let Some(home) = home {
        if let Some(found) = find_in(&home.join("bin")) {
            return Ok(found);
        }
        debug!("No runtime under {}", home.display());
    }
    if let Some(path) = std::env::var_os("PATH") {
        for dir in std::env::split_paths(&path) {
            if let Some(found) = find_in(&dir) {
                return Ok(found);
            }
        }
    }
    Err(LaunchError::Config(
        "could not find a Java executable; set JAVA_HOME or runtime_home".to_string(),
    ))
}
