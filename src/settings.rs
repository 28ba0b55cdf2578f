use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};

const DEFAULT_FILE: &str = "apkfile.yaml";

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Path to the `aapt` binary, searched in the PATH when unset
    pub aapt: Option<PathBuf>,

    /// Path to the `adb` binary, searched in the PATH when unset
    pub adb: Option<PathBuf>,

    /// Leave out splits the badging tool can't read instead of failing
    #[serde(default)]
    pub skip_broken_splits: bool,

    /// Replace an already installed package
    #[serde(default)]
    pub upgrade: bool,

    /// Installer package name reported to the device
    pub installer: Option<String>,

    pub originating_uri: Option<String>,

    /// Check device compatibility before installing
    #[serde(default = "default_check")]
    pub check: bool,
}

fn default_check() -> bool {
    true
}

impl Settings {
    /// Load `apkfile.yaml` (or `path`, which must exist) and `APKFILE_*` variables
    pub fn load(path: Option<&Path>) -> Result<Settings, ConfigError> {
        let file = match path {
            Some(p) => File::from(p).required(true),
            None => File::from(PathBuf::from(DEFAULT_FILE)).required(false),
        };
        Config::builder()
            .add_source(file)
            .add_source(Environment::with_prefix("APKFILE"))
            .build()?
            .try_deserialize()
    }
}
