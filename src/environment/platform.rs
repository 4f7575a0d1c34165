use std::{
    fs,
    path::{Path, PathBuf},
};

use once_cell::sync::Lazy;
use regex::Regex;

use super::process::ProcessSpec;
use crate::core::error::ProvisioningError;

const MINICONDA_BASE_URL: &str = "https://repo.anaconda.com/miniconda";

static WINDOWS_LIBRARY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^python3\d*\.dll$").expect("valid regex"));
static LINUX_LIBRARY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^libpython3\.\d+[a-z]*\.so$").expect("valid regex"));
static LINUX_VERSIONED_LIBRARY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^libpython3\.\d+[a-z]*\.so\.[\d.]+$").expect("valid regex"));
static MACOS_LIBRARY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^libpython3\.\d+[a-z]*\.dylib$").expect("valid regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Platform {
    pub os: &'static str,
    pub arch: &'static str,
}

impl Platform {
    #[must_use]
    pub fn current() -> Self {
        Self {
            os: std::env::consts::OS,
            arch: std::env::consts::ARCH,
        }
    }

    #[must_use]
    pub fn new(os: &'static str, arch: &'static str) -> Self {
        Self { os, arch }
    }

    #[must_use]
    pub fn is_windows(&self) -> bool {
        self.os == "windows"
    }

    pub fn installer_url(&self) -> Result<String, ProvisioningError> {
        let file = match (self.os, self.arch) {
            ("windows", "x86_64") => "Miniconda3-latest-Windows-x86_64.exe",
            ("windows", "x86") => "Miniconda3-latest-Windows-x86.exe",
            ("linux", "x86_64") => "Miniconda3-latest-Linux-x86_64.sh",
            ("linux", "aarch64") => "Miniconda3-latest-Linux-aarch64.sh",
            ("macos", "x86_64") => "Miniconda3-latest-MacOSX-x86_64.sh",
            ("macos", "aarch64") => "Miniconda3-latest-MacOSX-arm64.sh",
            (os, arch) => {
                return Err(ProvisioningError::UnsupportedPlatform {
                    os: os.into(),
                    arch: arch.into(),
                })
            }
        };
        Ok(format!("{MINICONDA_BASE_URL}/{file}"))
    }

    #[must_use]
    pub fn installer_file_name(&self) -> &'static str {
        if self.is_windows() {
            "miniconda_installer.exe"
        } else {
            "miniconda_installer.sh"
        }
    }

    #[must_use]
    pub fn installer_invocation(&self, installer: &Path, target: &Path) -> ProcessSpec {
        if self.is_windows() {
            ProcessSpec::new(installer).args([
                "/InstallationType=JustMe".to_string(),
                "/RegisterPython=0".to_string(),
                "/S".to_string(),
                format!("/D={}", target.display()),
            ])
        } else {
            ProcessSpec::new("bash")
                .arg(installer.display().to_string())
                .arg("-b")
                .arg("-p")
                .arg(target.display().to_string())
        }
    }

    #[must_use]
    pub fn conda_executable(&self, root: &Path) -> PathBuf {
        if self.is_windows() {
            root.join("Scripts").join("conda.exe")
        } else {
            root.join("bin").join("conda")
        }
    }

    #[must_use]
    pub fn pip_executable(&self, prefix: &Path) -> PathBuf {
        if self.is_windows() {
            prefix.join("Scripts").join("pip.exe")
        } else {
            prefix.join("bin").join("pip")
        }
    }

    #[must_use]
    pub fn python_executable(&self, prefix: &Path) -> PathBuf {
        if self.is_windows() {
            prefix.join("python.exe")
        } else {
            prefix.join("bin").join("python")
        }
    }

    #[must_use]
    pub fn binary_dirs(&self, prefix: &Path) -> Vec<PathBuf> {
        if self.is_windows() {
            vec![
                prefix.to_path_buf(),
                prefix.join("Scripts"),
                prefix.join("Library").join("bin"),
            ]
        } else {
            vec![prefix.join("bin")]
        }
    }

    // the highest sorted name wins when several versions match
    #[must_use]
    pub fn find_python_library(&self, prefix: &Path) -> Option<PathBuf> {
        match self.os {
            "windows" => latest_match(prefix, &WINDOWS_LIBRARY)
                .or_else(|| latest_match(&prefix.join("DLLs"), &WINDOWS_LIBRARY)),
            "macos" => latest_match(&prefix.join("lib"), &MACOS_LIBRARY),
            _ => {
                let lib = prefix.join("lib");
                latest_match(&lib, &LINUX_LIBRARY)
                    .or_else(|| latest_match(&lib, &LINUX_VERSIONED_LIBRARY))
            }
        }
    }
}

fn latest_match(dir: &Path, pattern: &Regex) -> Option<PathBuf> {
    let entries = fs::read_dir(dir).ok()?;
    let mut matches: Vec<PathBuf> = entries
        .flatten()
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .map(|name| pattern.is_match(name))
                .unwrap_or(false)
        })
        .map(|entry| entry.path())
        .collect();
    matches.sort();
    matches.pop()
}
