use crate::abi::Abi;
use crate::descriptor::{InstallLocation, PackageDescriptor};
use crate::error::{Error, Result};
use log::trace;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

/// Every datum read from the badging dump
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    PackageName,
    VersionCode,
    VersionName,
    MinSdkVersion,
    TargetSdkVersion,
    InstallLocation,
    Label,
    ApplicationLabel,
    Labels,
    Permissions,
    Libraries,
    Features,
    LaunchableActivity,
    SupportedScreens,
    SupportsAnyDensity,
    Locales,
    Densities,
    Abis,
    Icons,
    SplitName,
    Debuggable,
}

impl Field {
    const ALL: [Field; 21] = [
        Field::PackageName,
        Field::VersionCode,
        Field::VersionName,
        Field::MinSdkVersion,
        Field::TargetSdkVersion,
        Field::InstallLocation,
        Field::Label,
        Field::ApplicationLabel,
        Field::Labels,
        Field::Permissions,
        Field::Libraries,
        Field::Features,
        Field::LaunchableActivity,
        Field::SupportedScreens,
        Field::SupportsAnyDensity,
        Field::Locales,
        Field::Densities,
        Field::Abis,
        Field::Icons,
        Field::SplitName,
        Field::Debuggable,
    ];

    fn pattern(self) -> &'static str {
        match self {
            Field::PackageName => r"(?m)^package: name='([^']+)'",
            Field::VersionCode => r"\bversionCode='([^']+)'",
            Field::VersionName => r"\bversionName='([^']+)'",
            Field::MinSdkVersion => r"(?m)^(?:sdkVersion|minSdkVersion):'([^']+)'",
            Field::TargetSdkVersion => r"(?m)^targetSdkVersion:'([^']+)'",
            Field::InstallLocation => r"(?m)^install-location:'([^']+)'",
            Field::Label => r"(?m)^application-label:'([^']*)'",
            Field::ApplicationLabel => r"(?m)^application: label='([^']*)'",
            Field::Labels => r"(?m)^application-label-([^:'\s]+):'([^']*)'",
            Field::Permissions => r"(?m)^uses-permission(?:-sdk-23)?: name='([^']+)'",
            Field::Libraries => r"(?m)^uses-library(?:-not-required)?:'([^']+)'",
            Field::Features => r"(?m)^[ \t]*uses-feature(?:-not-required)?: name='([^']+)'",
            Field::LaunchableActivity => r"(?m)^launchable-activity: name='([^']+)'",
            Field::SupportedScreens => r"(?m)^supports-screens: '(.*)'",
            Field::SupportsAnyDensity => r"(?m)^supports-any-density: '([^']+)'",
            Field::Locales => r"(?m)^locales: '(.*)'",
            Field::Densities => r"(?m)^densities: '(.*)'",
            Field::Abis => r"(?m)^native-code: '(.*)'",
            Field::Icons => r"(?m)^application-icon-(\d+):'([^']+)'",
            Field::SplitName => r"\bsplit='([^']+)'",
            Field::Debuggable => r"(?m)^application-debuggable",
        }
    }
}

static PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    Field::ALL
        .iter()
        .map(|f| Regex::new(f.pattern()).expect("field pattern must compile"))
        .collect()
});

static LOCALE_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9-]+$").expect("locale pattern must compile"));

fn regex(field: Field) -> &'static Regex {
    let idx = Field::ALL
        .iter()
        .position(|f| *f == field)
        .expect("every field is in the table");
    &PATTERNS[idx]
}

/// Badging text plus the per-field lookups over it
struct Badging<'a> {
    raw: &'a str,
}

impl<'a> Badging<'a> {
    fn all(&self, field: Field) -> Vec<&'a str> {
        regex(field)
            .captures_iter(self.raw)
            .filter_map(|c| c.get(1))
            .map(|m| m.as_str())
            .collect()
    }

    fn first(&self, field: Field) -> Option<&'a str> {
        regex(field)
            .captures(self.raw)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str())
    }

    fn present(&self, field: Field) -> bool {
        regex(field).is_match(self.raw)
    }

    fn pairs(&self, field: Field) -> Vec<(&'a str, &'a str)> {
        regex(field)
            .captures_iter(self.raw)
            .filter_map(|c| Some((c.get(1)?.as_str(), c.get(2)?.as_str())))
            .collect()
    }

    /// Split the first quoted token list (`'a' 'b' 'c'`) of a field
    fn tokens(&self, field: Field) -> Vec<&'a str> {
        self.first(field)
            .map(|list| {
                list.split('\'')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Optional integer, zero reads as absent
    fn optional_int(&self, field: Field) -> Option<u32> {
        self.first(field)
            .and_then(|v| v.trim().parse().ok())
            .filter(|v| *v != 0)
    }

    fn optional_string(&self, field: Field) -> Option<String> {
        self.first(field).map(str::to_string)
    }

    fn set(&self, field: Field) -> BTreeSet<String> {
        self.all(field).into_iter().map(str::to_string).collect()
    }
}

/// Parse the textual badging dump of a package archive.
///
/// Only the package name and version code are mandatory, every other field
/// falls back to empty or [None] when it is missing.
pub fn parse(raw: &str) -> Result<PackageDescriptor> {
    let b = Badging { raw };

    let package_name = b
        .first(Field::PackageName)
        .ok_or(Error::MalformedInput {
            field: "package name",
            reason: "not found",
        })?
        .to_string();
    let version_code = b
        .first(Field::VersionCode)
        .ok_or(Error::MalformedInput {
            field: "version code",
            reason: "not found",
        })?
        .trim()
        .parse()
        .map_err(|_| Error::MalformedInput {
            field: "version code",
            reason: "is not an integer",
        })?;

    let label = b
        .optional_string(Field::Label)
        .or_else(|| b.optional_string(Field::ApplicationLabel))
        .filter(|l| !l.is_empty());

    let labels: BTreeMap<String, String> = b
        .pairs(Field::Labels)
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    let icons: BTreeMap<u32, String> = b
        .pairs(Field::Icons)
        .into_iter()
        .filter_map(|(size, path)| Some((size.parse().ok()?, path.to_string())))
        .collect();

    let locales = b
        .tokens(Field::Locales)
        .into_iter()
        .filter(|l| LOCALE_TAG.is_match(l))
        .map(str::to_string)
        .collect();

    let abis = b.tokens(Field::Abis).into_iter().map(Abi::decode).collect();

    let descriptor = PackageDescriptor {
        package_name,
        version_code,
        version_name: b.optional_string(Field::VersionName),
        min_sdk_version: b.optional_int(Field::MinSdkVersion),
        target_sdk_version: b.optional_int(Field::TargetSdkVersion),
        install_location: b
            .first(Field::InstallLocation)
            .map(InstallLocation::decode)
            .unwrap_or_default(),
        label,
        labels,
        permissions: b.set(Field::Permissions),
        libraries: b.set(Field::Libraries),
        features: b.set(Field::Features),
        launchable_activity: b.optional_string(Field::LaunchableActivity),
        supported_screens: b
            .tokens(Field::SupportedScreens)
            .into_iter()
            .map(str::to_string)
            .collect(),
        supports_any_density: b.first(Field::SupportsAnyDensity) == Some("true"),
        locales,
        densities: b
            .tokens(Field::Densities)
            .into_iter()
            .map(str::to_string)
            .collect(),
        abis,
        icons,
        split_name: b.optional_string(Field::SplitName),
        debuggable: b.present(Field::Debuggable),
    };
    trace!("Parsed badging: {:?}", descriptor);
    Ok(descriptor)
}
