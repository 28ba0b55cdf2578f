use crate::error::{Error, Result};
use log::debug;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tokio::process::Command;

/// Produces the raw badging text of a package archive
#[async_trait::async_trait]
pub trait BadgingTool: Send + Sync {
    async fn dump_badging(&self, apk: &Path) -> Result<String>;
}

/// `aapt dump badging` from the Android build tools
#[derive(Debug, Clone)]
pub struct Aapt {
    program: PathBuf,
}

impl Aapt {
    pub fn new(program: PathBuf) -> Aapt {
        Aapt { program }
    }

    /// Use the given binary, or find `aapt` in the PATH
    pub fn locate(program: Option<PathBuf>) -> Result<Aapt> {
        match program {
            Some(p) => Ok(Aapt::new(p)),
            None => which::which("aapt")
                .map(Aapt::new)
                .map_err(|_| Error::ToolMissing { tool: "aapt" }),
        }
    }
}

#[async_trait::async_trait]
impl BadgingTool for Aapt {
    async fn dump_badging(&self, apk: &Path) -> Result<String> {
        debug!("{} dump badging {}", self.program.display(), apk.display());
        let output = Command::new(&self.program)
            .args(["dump", "badging"])
            .arg(apk)
            .output()
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => Error::ToolMissing { tool: "aapt" },
                _ => Error::Io(e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = if stderr.trim().is_empty() {
                String::from_utf8_lossy(&output.stdout).into_owned()
            } else {
                stderr.into_owned()
            };
            return Err(classify_failure(apk, message));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Locates `aapt` on the first dump, so work that only needs a bundle
/// manifest runs on machines without the build tools
#[derive(Debug, Default)]
pub struct DeferredAapt {
    program: Option<PathBuf>,
    aapt: OnceLock<Aapt>,
}

impl DeferredAapt {
    pub fn new(program: Option<PathBuf>) -> DeferredAapt {
        DeferredAapt {
            program,
            aapt: OnceLock::new(),
        }
    }

    fn resolve(&self) -> Result<&Aapt> {
        if let Some(a) = self.aapt.get() {
            return Ok(a);
        }
        let a = Aapt::locate(self.program.clone())?;
        Ok(self.aapt.get_or_init(|| a))
    }
}

#[async_trait::async_trait]
impl BadgingTool for DeferredAapt {
    async fn dump_badging(&self, apk: &Path) -> Result<String> {
        self.resolve()?.dump_badging(apk).await
    }
}

/// Map the diagnostic of a failed badging dump to an error kind
pub fn classify_failure(apk: &Path, message: String) -> Error {
    if message.to_lowercase().contains("invalid file") || message.contains("AndroidManifest.xml") {
        Error::invalid_archive(apk, message.trim())
    } else if message.contains("is neither a directory nor file") {
        Error::ArchiveNotFound(message.trim().to_string())
    } else {
        Error::ToolExecution(message)
    }
}
