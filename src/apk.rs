use crate::aapt::BadgingTool;
use crate::error::{Error, Result};
use crate::template;
use apk_badging::PackageDescriptor;
use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;

/// A package archive on disk together with its parsed badging
#[derive(Debug, Clone, Serialize)]
pub struct ApkFile {
    pub path: PathBuf,
    pub size: u64,
    #[serde(flatten)]
    pub descriptor: PackageDescriptor,
}

impl ApkFile {
    /// Run the badging tool over `path` and parse its output
    pub async fn open(path: impl Into<PathBuf>, tool: &dyn BadgingTool) -> Result<ApkFile> {
        let path = path.into();
        let raw = tool.dump_badging(&path).await?;
        let descriptor = apk_badging::parse(&raw)?;
        let size = tokio::fs::metadata(&path)
            .await
            .map_err(|e| not_found_or_io(&path, e))?
            .len();
        Ok(ApkFile {
            path,
            size,
            descriptor,
        })
    }

    pub fn file_name(&self) -> &str {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
    }

    /// Hex SHA-256 of the archive
    pub async fn sha256(&self) -> Result<String> {
        let mut file = tokio::fs::File::open(&self.path).await?;
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hex::encode(hasher.finalize()))
    }

    /// Fields usable as `{placeholders}` when renaming
    pub fn facts(&self) -> Map<String, Value> {
        let d = &self.descriptor;
        let mut m = Map::new();
        m.insert("package_name".into(), d.package_name().into());
        m.insert("version_code".into(), d.version_code().into());
        if let Some(v) = d.version_name() {
            m.insert("version_name".into(), v.into());
        }
        if let Some(v) = d.split_name() {
            m.insert("split_name".into(), v.into());
        }
        if let Some(v) = d.min_sdk_version() {
            m.insert("min_sdk_version".into(), v.into());
        }
        if let Some(v) = d.target_sdk_version() {
            m.insert("target_sdk_version".into(), v.into());
        }
        m
    }

    /// Rename the archive within its directory, e.g. `{package_name}-{version_code}.apk`
    pub async fn rename(&mut self, name: &str) -> Result<&Path> {
        let name = template::render(name, &self.facts())?;
        let target = self
            .path
            .parent()
            .map(|p| p.join(&name))
            .unwrap_or_else(|| PathBuf::from(&name));
        tokio::fs::rename(&self.path, &target).await?;
        self.path = target;
        Ok(&self.path)
    }
}

pub(crate) fn not_found_or_io(path: &Path, e: std::io::Error) -> Error {
    match e.kind() {
        std::io::ErrorKind::NotFound => Error::ArchiveNotFound(path.display().to_string()),
        _ => Error::Io(e),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Badging tool whose "archives" are the badging text itself
    #[derive(Default)]
    pub(crate) struct TextBadging {
        pub calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl BadgingTool for TextBadging {
        async fn dump_badging(&self, apk: &Path) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let text = tokio::fs::read_to_string(apk)
                .await
                .map_err(|e| not_found_or_io(apk, e))?;
            if text.starts_with("ERROR") {
                return Err(crate::aapt::classify_failure(apk, text));
            }
            Ok(text)
        }
    }

    pub(crate) fn badging(name: &str, extra: &str) -> String {
        format!(
            "package: name='org.example.notes' versionCode='10452' versionName='4.2.1'{}\n{}",
            name, extra
        )
    }

    #[tokio::test]
    async fn open_and_hash() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.apk");
        tokio::fs::write(&path, badging("", "sdkVersion:'21'\n"))
            .await
            .unwrap();

        let apk = ApkFile::open(&path, &TextBadging::default()).await.unwrap();
        assert_eq!(apk.descriptor.package_name(), "org.example.notes");
        assert_eq!(apk.descriptor.min_sdk_version(), Some(21));
        assert_eq!(apk.size, tokio::fs::metadata(&path).await.unwrap().len());
        assert_eq!(apk.file_name(), "app.apk");

        let digest = apk.sha256().await.unwrap();
        assert_eq!(digest.len(), 64);
        assert_eq!(
            digest,
            hex::encode(Sha256::digest(std::fs::read(&path).unwrap()))
        );
    }

    #[tokio::test]
    async fn missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let e = ApkFile::open(dir.path().join("none.apk"), &TextBadging::default())
            .await
            .unwrap_err();
        assert!(matches!(e, Error::ArchiveNotFound(_)));
    }

    #[tokio::test]
    async fn rename_with_template() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("download.apk");
        tokio::fs::write(&path, badging("", "")).await.unwrap();

        let mut apk = ApkFile::open(&path, &TextBadging::default()).await.unwrap();
        apk.rename("{package_name}-{version_code}.apk").await.unwrap();
        assert_eq!(
            apk.path,
            dir.path().join("org.example.notes-10452.apk")
        );
        assert!(apk.path.exists());
        assert!(!path.exists());

        let e = apk.rename("{split_name}.apk").await.unwrap_err();
        assert!(matches!(e, Error::Template(_)));
    }
}
