use crate::aapt::BadgingTool;
use crate::apk::ApkFile;
use crate::error::{Error, Result};
use crate::template;
use apk_badging::Abi;
use log::{debug, info, warn};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

mod archive;
mod format;

use archive::Archive;
pub use format::{ContainerFormat, ManifestSummary};

const PACKAGE_SUFFIX: &str = ".apk";
const BROKEN_SPLIT_HINT: &str = " (enable skip_broken_splits to ignore it)";

#[derive(Debug, Clone, Default)]
pub struct BundleOptions {
    /// Unpack here right away, may reference manifest fields (`out/{package_name}`).
    /// Without it a temporary directory is used on first access.
    pub extract_dir: Option<String>,
    /// Drop splits the badging tool rejects instead of failing
    pub skip_broken_splits: bool,
}

/// Packages unpacked from a bundle
#[derive(Debug, Clone)]
pub struct Contents {
    base: ApkFile,
    splits: Vec<ApkFile>,
    icon: Option<PathBuf>,
}

impl Contents {
    pub fn base(&self) -> &ApkFile {
        &self.base
    }

    pub fn splits(&self) -> &[ApkFile] {
        &self.splits
    }

    pub fn icon(&self) -> Option<&Path> {
        self.icon.as_deref()
    }

    /// Base first, then every split
    pub fn apks(&self) -> impl Iterator<Item = &ApkFile> {
        std::iter::once(&self.base).chain(self.splits.iter())
    }

    fn union<T: Ord + Clone>(&self, f: impl Fn(&ApkFile) -> &BTreeSet<T>) -> BTreeSet<T> {
        self.apks().flat_map(|a| f(a).iter().cloned()).collect()
    }

    pub fn package_name(&self) -> &str {
        self.base.descriptor.package_name()
    }

    pub fn version_code(&self) -> u64 {
        self.base.descriptor.version_code()
    }

    pub fn version_name(&self) -> Option<&str> {
        self.base.descriptor.version_name()
    }

    pub fn min_sdk_version(&self) -> Option<u32> {
        self.base.descriptor.min_sdk_version()
    }

    pub fn target_sdk_version(&self) -> Option<u32> {
        self.base.descriptor.target_sdk_version()
    }

    pub fn supported_screens(&self) -> &BTreeSet<String> {
        self.base.descriptor.supported_screens()
    }

    pub fn launchable_activity(&self) -> Option<&str> {
        self.base.descriptor.launchable_activity()
    }

    pub fn densities(&self) -> &BTreeSet<String> {
        self.base.descriptor.densities()
    }

    pub fn supports_any_density(&self) -> bool {
        self.base.descriptor.supports_any_density()
    }

    pub fn permissions(&self) -> BTreeSet<String> {
        self.union(|a| a.descriptor.permissions())
    }

    pub fn features(&self) -> BTreeSet<String> {
        self.union(|a| a.descriptor.features())
    }

    pub fn libraries(&self) -> BTreeSet<String> {
        self.union(|a| a.descriptor.libraries())
    }

    pub fn locales(&self) -> BTreeSet<String> {
        self.union(|a| a.descriptor.locales())
    }

    pub fn abis(&self) -> BTreeSet<Abi> {
        self.union(|a| a.descriptor.abis())
    }

    /// Labels of every split merged, then the base labels on top
    pub fn labels(&self) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::new();
        for apk in self.splits.iter().chain(std::iter::once(&self.base)) {
            labels.extend(
                apk.descriptor
                    .labels()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone())),
            );
        }
        labels
    }
}

enum State {
    Unextracted,
    Extracted(Contents),
}

enum ExtractDir {
    Given(PathBuf),
    Temporary(Option<TempDir>),
}

/// A composite package container (APKM, XAPK, APKS).
///
/// Manifest facts are read when opening. The packages inside are unpacked and
/// run through the badging tool once, on the first call that needs them.
pub struct Bundle {
    path: PathBuf,
    format: ContainerFormat,
    archive: Archive,
    facts: Map<String, Value>,
    manifest: ManifestSummary,
    base_member: String,
    icon_member: String,
    skip_broken_splits: bool,
    tool: Arc<dyn BadgingTool>,
    dir: ExtractDir,
    state: State,
}

impl Bundle {
    pub async fn open(
        path: impl Into<PathBuf>,
        format: ContainerFormat,
        options: BundleOptions,
        tool: Arc<dyn BadgingTool>,
    ) -> Result<Bundle> {
        let path = path.into();
        let archive = Archive::open(&path).await?;

        let mut document = None;
        for name in format.manifest_documents() {
            if let Some(data) = archive.read(name).await? {
                document = Some((*name, data));
                break;
            }
        }
        let (document, data) = document.ok_or_else(|| {
            Error::invalid_archive(
                &path,
                format!("missing {}", format.manifest_documents().join(" / ")),
            )
        })?;
        let facts = match serde_json::from_slice(&data) {
            Ok(Value::Object(m)) => m,
            Ok(_) => {
                return Err(Error::invalid_archive(
                    &path,
                    format!("{} is not a JSON object", document),
                ))
            }
            Err(e) => return Err(Error::invalid_archive(&path, format!("{}: {}", document, e))),
        };
        let manifest = format::summarize(format, document, &facts)
            .map_err(|e| Error::invalid_archive(&path, e))?;
        let base_member = template::render(format.base_template(), &facts)
            .map_err(|e| Error::invalid_archive(&path, e))?;
        let icon_member = template::render(format.icon_template(), &facts)
            .map_err(|e| Error::invalid_archive(&path, e))?;
        debug!(
            "Opened {} ({:?}, {}): base member {}",
            path.display(),
            format,
            document,
            base_member
        );

        let dir = match &options.extract_dir {
            Some(t) => ExtractDir::Given(PathBuf::from(template::render(t, &facts)?)),
            None => ExtractDir::Temporary(None),
        };
        let eager = matches!(dir, ExtractDir::Given(_));

        let mut bundle = Bundle {
            path,
            format,
            archive,
            facts,
            manifest,
            base_member,
            icon_member,
            skip_broken_splits: options.skip_broken_splits,
            tool,
            dir,
            state: State::Unextracted,
        };
        if eager {
            bundle.ensure_extracted().await?;
        }
        Ok(bundle)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> ContainerFormat {
        self.format
    }

    /// Raw fields of the embedded manifest document
    pub fn facts(&self) -> &Map<String, Value> {
        &self.facts
    }

    pub fn manifest(&self) -> &ManifestSummary {
        &self.manifest
    }

    pub fn base_member(&self) -> &str {
        &self.base_member
    }

    pub fn is_extracted(&self) -> bool {
        matches!(self.state, State::Extracted(_))
    }

    /// Unpacked contents, if extraction already ran
    pub fn extracted(&self) -> Option<&Contents> {
        match &self.state {
            State::Extracted(c) => Some(c),
            State::Unextracted => None,
        }
    }

    pub fn package_name(&self) -> &str {
        match self.extracted() {
            Some(c) => c.package_name(),
            None => &self.manifest.package_name,
        }
    }

    pub fn version_code(&self) -> u64 {
        match self.extracted() {
            Some(c) => c.version_code(),
            None => self.manifest.version_code,
        }
    }

    pub fn version_name(&self) -> Option<&str> {
        match self.extracted() {
            Some(c) => c.version_name(),
            None => self.manifest.version_name.as_deref(),
        }
    }

    pub fn min_sdk_version(&self) -> Option<u32> {
        match self.extracted() {
            Some(c) => c.min_sdk_version(),
            None => self.manifest.min_sdk_version,
        }
    }

    pub fn app_name(&self) -> Option<&str> {
        self.manifest.app_name.as_deref()
    }

    /// Unpack into `dir` unless the bundle is already unpacked
    pub async fn extract_to(&mut self, dir: impl Into<PathBuf>) -> Result<&Contents> {
        if !self.is_extracted() {
            self.dir = ExtractDir::Given(dir.into());
        }
        self.ensure_extracted().await
    }

    /// Unpack and parse the packages on first use, later calls are free
    pub async fn ensure_extracted(&mut self) -> Result<&Contents> {
        if !self.is_extracted() {
            let dir = self.extraction_dir().await?;
            match self.unpack(&dir).await {
                Ok(contents) => self.state = State::Extracted(contents),
                Err(e) => {
                    // leave nothing half unpacked behind
                    if let Err(cleanup) = self.delete_extracted_files().await {
                        warn!("Failed to remove {}: {}", dir.display(), cleanup);
                    }
                    return Err(e);
                }
            }
        }
        match &self.state {
            State::Extracted(c) => Ok(c),
            State::Unextracted => unreachable!("extraction just completed"),
        }
    }

    async fn extraction_dir(&mut self) -> Result<PathBuf> {
        match &mut self.dir {
            ExtractDir::Given(p) => {
                tokio::fs::create_dir_all(&p).await?;
                Ok(p.clone())
            }
            ExtractDir::Temporary(Some(t)) => Ok(t.path().to_path_buf()),
            ExtractDir::Temporary(slot) => {
                let t = tempfile::Builder::new().prefix("apkfile-").tempdir()?;
                let p = t.path().to_path_buf();
                *slot = Some(t);
                Ok(p)
            }
        }
    }

    async fn unpack(&self, dir: &Path) -> Result<Contents> {
        let names = self.archive.names();
        if !names.contains(&self.base_member) {
            return Err(Error::invalid_archive(
                &self.path,
                format!("missing base package {}", self.base_member),
            ));
        }
        let split_members: Vec<&String> = names
            .iter()
            .filter(|n| n.ends_with(PACKAGE_SUFFIX) && **n != self.base_member)
            .collect();
        info!(
            "Extracting {} ({} split(s)) to {}",
            self.path.display(),
            split_members.len(),
            dir.display()
        );

        let base_path = self.archive.extract(&self.base_member, dir).await?;
        let icon = if self.archive.contains(&self.icon_member) {
            Some(self.archive.extract(&self.icon_member, dir).await?)
        } else {
            None
        };
        let mut split_paths = Vec::with_capacity(split_members.len());
        for member in split_members {
            split_paths.push(self.archive.extract(member, dir).await?);
        }

        let base = ApkFile::open(base_path, self.tool.as_ref()).await?;
        let mut splits = Vec::with_capacity(split_paths.len());
        for path in split_paths {
            match ApkFile::open(&path, self.tool.as_ref()).await {
                Ok(apk) => splits.push(apk),
                Err(e @ (Error::InvalidArchive { .. } | Error::MalformedInput(_))) => {
                    if !self.skip_broken_splits {
                        return Err(match e {
                            Error::InvalidArchive { path, reason } => Error::InvalidArchive {
                                path,
                                reason: format!("{}{}", reason, BROKEN_SPLIT_HINT),
                            },
                            e => Error::invalid_archive(&path, format!("{}{}", e, BROKEN_SPLIT_HINT)),
                        });
                    }
                    warn!("Skipping broken split {}: {}", path.display(), e);
                    tokio::fs::remove_file(&path).await?;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(Contents { base, splits, icon })
    }

    /// Remove unpacked files, including what a failed extraction left.
    /// The parsed contents stay available.
    pub async fn delete_extracted_files(&mut self) -> Result<()> {
        match &mut self.dir {
            ExtractDir::Given(p) => match tokio::fs::remove_dir_all(&p).await {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e.into()),
                _ => {}
            },
            ExtractDir::Temporary(slot) => {
                if let Some(t) = slot.take() {
                    t.close()?;
                }
            }
        }
        Ok(())
    }
}
