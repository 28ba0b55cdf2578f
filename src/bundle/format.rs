use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::path::Path;

/// Composite package container kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerFormat {
    /// APKMirror bundle
    Apkm,
    /// APKPure bundle
    Xapk,
    /// SAI / bundletool APK set
    Apks,
}

/// Keys of the manifest document fields a container format uses
struct Keys {
    package_name: &'static str,
    version_code: &'static str,
    version_name: &'static str,
    min_sdk_version: &'static str,
    target_sdk_version: Option<&'static str>,
    app_name: &'static str,
    permissions: Option<&'static str>,
    format_version: &'static str,
}

impl ContainerFormat {
    pub fn from_path(path: &Path) -> Option<ContainerFormat> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "apkm" => Some(ContainerFormat::Apkm),
            "xapk" => Some(ContainerFormat::Xapk),
            "apks" => Some(ContainerFormat::Apks),
            _ => None,
        }
    }

    /// Manifest document names to try, in order
    pub fn manifest_documents(&self) -> &'static [&'static str] {
        match self {
            ContainerFormat::Apkm => &["info.json"],
            ContainerFormat::Xapk => &["manifest.json"],
            ContainerFormat::Apks => &["meta.sai_v2.json", "meta.sai_v1.json"],
        }
    }

    /// Base package member, may reference manifest fields
    pub fn base_template(&self) -> &'static str {
        match self {
            ContainerFormat::Xapk => "{package_name}.apk",
            ContainerFormat::Apkm | ContainerFormat::Apks => "base.apk",
        }
    }

    pub fn icon_template(&self) -> &'static str {
        "icon.png"
    }

    fn keys(&self) -> Keys {
        match self {
            ContainerFormat::Apkm => Keys {
                package_name: "pname",
                version_code: "versioncode",
                version_name: "release_version",
                min_sdk_version: "min_api",
                target_sdk_version: None,
                app_name: "app_name",
                permissions: None,
                format_version: "apkm_version",
            },
            ContainerFormat::Xapk => Keys {
                package_name: "package_name",
                version_code: "version_code",
                version_name: "version_name",
                min_sdk_version: "min_sdk_version",
                target_sdk_version: Some("target_sdk_version"),
                app_name: "name",
                permissions: Some("permissions"),
                format_version: "xapk_version",
            },
            ContainerFormat::Apks => Keys {
                package_name: "package",
                version_code: "version_code",
                version_name: "version_name",
                min_sdk_version: "min_sdk",
                target_sdk_version: Some("target_sdk"),
                app_name: "label",
                permissions: None,
                format_version: "meta_version",
            },
        }
    }
}

/// Facts available from the container manifest without unpacking anything
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestSummary {
    pub package_name: String,
    pub version_code: u64,
    pub version_name: Option<String>,
    pub min_sdk_version: Option<u32>,
    pub target_sdk_version: Option<u32>,
    pub app_name: Option<String>,
    pub permissions: BTreeSet<String>,
    pub format_version: Option<u32>,
}

fn as_u64(v: &Value) -> Option<u64> {
    match v {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Optional integer, zero reads as absent
fn optional_int(facts: &Map<String, Value>, key: &str) -> Option<u32> {
    facts
        .get(key)
        .and_then(as_u64)
        .and_then(|v| u32::try_from(v).ok())
        .filter(|v| *v != 0)
}

/// Read the typed summary out of a container manifest document
pub(crate) fn summarize(
    format: ContainerFormat,
    document: &str,
    facts: &Map<String, Value>,
) -> Result<ManifestSummary, String> {
    let keys = format.keys();

    let package_name = facts
        .get(keys.package_name)
        .and_then(as_string)
        .ok_or_else(|| format!("{} has no '{}'", document, keys.package_name))?;
    let version_code = facts
        .get(keys.version_code)
        .and_then(as_u64)
        .ok_or_else(|| format!("{} has no valid '{}'", document, keys.version_code))?;

    let format_version = optional_int(facts, keys.format_version).or(
        match (format, document) {
            (ContainerFormat::Apks, "meta.sai_v1.json") => Some(1),
            _ => None,
        },
    );

    // SAI v1 metadata does not carry reliable SDK levels
    let trust_sdk = !(format == ContainerFormat::Apks && format_version.unwrap_or(1) < 2);

    let permissions = keys
        .permissions
        .and_then(|k| facts.get(k))
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(as_string).collect())
        .unwrap_or_default();

    Ok(ManifestSummary {
        package_name,
        version_code,
        version_name: facts.get(keys.version_name).and_then(as_string),
        min_sdk_version: optional_int(facts, keys.min_sdk_version).filter(|_| trust_sdk),
        target_sdk_version: keys
            .target_sdk_version
            .and_then(|k| optional_int(facts, k))
            .filter(|_| trust_sdk),
        app_name: facts.get(keys.app_name).and_then(as_string),
        permissions,
        format_version,
    })
}
