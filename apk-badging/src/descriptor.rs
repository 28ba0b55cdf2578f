use crate::abi::Abi;
use crate::density::DENSITY_SUFFIX;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Where the application may be installed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum InstallLocation {
    #[default]
    Auto,
    InternalOnly,
    PreferExternal,
}

impl InstallLocation {
    /// Decode a raw install-location token, anything unrecognized is [InstallLocation::Auto]
    pub fn decode(token: &str) -> InstallLocation {
        match token.trim() {
            "internalOnly" => InstallLocation::InternalOnly,
            "preferExternal" => InstallLocation::PreferExternal,
            _ => InstallLocation::Auto,
        }
    }
}

/// What a split package carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitCategory {
    Language,
    Density,
    Abi,
    Other,
}

/// Metadata of a single package archive, as reported by the badging dump
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageDescriptor {
    pub(crate) package_name: String,
    pub(crate) version_code: u64,
    pub(crate) version_name: Option<String>,
    pub(crate) min_sdk_version: Option<u32>,
    pub(crate) target_sdk_version: Option<u32>,
    pub(crate) install_location: InstallLocation,
    pub(crate) label: Option<String>,
    pub(crate) labels: BTreeMap<String, String>,
    pub(crate) permissions: BTreeSet<String>,
    pub(crate) libraries: BTreeSet<String>,
    pub(crate) features: BTreeSet<String>,
    pub(crate) launchable_activity: Option<String>,
    pub(crate) supported_screens: BTreeSet<String>,
    pub(crate) supports_any_density: bool,
    pub(crate) locales: BTreeSet<String>,
    pub(crate) densities: BTreeSet<String>,
    pub(crate) abis: BTreeSet<Abi>,
    pub(crate) icons: BTreeMap<u32, String>,
    pub(crate) split_name: Option<String>,
    pub(crate) debuggable: bool,
}

impl PackageDescriptor {
    pub fn package_name(&self) -> &str {
        &self.package_name
    }

    pub fn version_code(&self) -> u64 {
        self.version_code
    }

    pub fn version_name(&self) -> Option<&str> {
        self.version_name.as_deref()
    }

    pub fn min_sdk_version(&self) -> Option<u32> {
        self.min_sdk_version
    }

    pub fn target_sdk_version(&self) -> Option<u32> {
        self.target_sdk_version
    }

    pub fn install_location(&self) -> InstallLocation {
        self.install_location
    }

    /// Default (unlocalized) application label
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Localized application labels keyed by locale
    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }

    pub fn permissions(&self) -> &BTreeSet<String> {
        &self.permissions
    }

    pub fn libraries(&self) -> &BTreeSet<String> {
        &self.libraries
    }

    pub fn features(&self) -> &BTreeSet<String> {
        &self.features
    }

    pub fn launchable_activity(&self) -> Option<&str> {
        self.launchable_activity.as_deref()
    }

    pub fn supported_screens(&self) -> &BTreeSet<String> {
        &self.supported_screens
    }

    pub fn supports_any_density(&self) -> bool {
        self.supports_any_density
    }

    pub fn locales(&self) -> &BTreeSet<String> {
        &self.locales
    }

    pub fn densities(&self) -> &BTreeSet<String> {
        &self.densities
    }

    /// Native ABIs, empty when the package has no native code (runs everywhere)
    pub fn abis(&self) -> &BTreeSet<Abi> {
        &self.abis
    }

    /// Icon paths inside the archive keyed by pixel density
    pub fn icons(&self) -> &BTreeMap<u32, String> {
        &self.icons
    }

    pub fn split_name(&self) -> Option<&str> {
        self.split_name.as_deref()
    }

    pub fn debuggable(&self) -> bool {
        self.debuggable
    }

    pub fn is_split(&self) -> bool {
        self.split_name.is_some()
    }

    /// True when the package runs on every known ABI
    pub fn is_universal(&self) -> bool {
        self.abis.is_empty() || Abi::ALL.iter().all(|a| self.abis.contains(a))
    }

    /// Classify a split by its name and content, [None] for base packages.
    ///
    /// Density wins over language, language wins over a single ABI.
    pub fn split_category(&self) -> Option<SplitCategory> {
        let name = self.split_name.as_deref()?;
        let segment = name.rsplit('.').next().unwrap_or(name);

        if segment.ends_with(DENSITY_SUFFIX) {
            return Some(SplitCategory::Density);
        }
        if !segment.is_empty() && self.locales.iter().any(|l| l.contains(segment)) {
            return Some(SplitCategory::Language);
        }
        if self.abis.len() == 1 {
            return Some(SplitCategory::Abi);
        }
        Some(SplitCategory::Other)
    }
}
