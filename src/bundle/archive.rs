use crate::error::{Error, Result};
use async_zip::tokio::read::fs::ZipFileReader;
use log::trace;
use std::path::{Component, Path, PathBuf};

/// Read access to the members of a zip container
pub(crate) struct Archive {
    path: PathBuf,
    reader: ZipFileReader,
}

impl Archive {
    pub async fn open(path: &Path) -> Result<Archive> {
        tokio::fs::metadata(path)
            .await
            .map_err(|e| crate::apk::not_found_or_io(path, e))?;
        let reader = ZipFileReader::new(path)
            .await
            .map_err(|e| Error::invalid_archive(path, e))?;
        Ok(Archive {
            path: path.to_path_buf(),
            reader,
        })
    }

    /// Names of every file member, in archive order
    pub fn names(&self) -> Vec<String> {
        self.reader
            .file()
            .entries()
            .iter()
            .filter_map(|e| e.filename().as_str().ok().map(str::to_string))
            .filter(|n| !n.ends_with('/'))
            .collect()
    }

    fn index_of(&self, name: &str) -> Option<usize> {
        self.reader
            .file()
            .entries()
            .iter()
            .position(|e| e.filename().as_str().ok() == Some(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index_of(name).is_some()
    }

    /// Read a whole member, [None] when the archive has no such member
    pub async fn read(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let Some(index) = self.index_of(name) else {
            return Ok(None);
        };
        let mut reader = self
            .reader
            .reader_with_entry(index)
            .await
            .map_err(|e| Error::invalid_archive(&self.path, e))?;
        let mut buf = Vec::new();
        reader
            .read_to_end_checked(&mut buf)
            .await
            .map_err(|e| Error::invalid_archive(&self.path, format!("{}: {}", name, e)))?;
        Ok(Some(buf))
    }

    /// Write a member below `dir`, returning where it landed
    pub async fn extract(&self, name: &str, dir: &Path) -> Result<PathBuf> {
        let target = dir.join(member_path(&self.path, name)?);
        let data = self.read(name).await?.ok_or_else(|| {
            Error::invalid_archive(&self.path, format!("missing member {}", name))
        })?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        trace!("Extracting {} -> {}", name, target.display());
        tokio::fs::write(&target, data).await?;
        Ok(target)
    }
}

/// Relative path of a member, refusing names that escape the extraction directory
fn member_path(archive: &Path, name: &str) -> Result<PathBuf> {
    let path = Path::new(name);
    if name.is_empty() || !path.components().all(|c| matches!(c, Component::Normal(_))) {
        return Err(Error::invalid_archive(
            archive,
            format!("unsafe member path {}", name),
        ));
    }
    Ok(path.to_path_buf())
}
