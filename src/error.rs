use apk_badging::Abi;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("file not found: {0}")]
    ArchiveNotFound(String),

    /// Corrupt or unexpected package archive, or a broken container manifest
    #[error("'{}' is not a valid package: {reason}", path.display())]
    InvalidArchive { path: PathBuf, reason: String },

    /// The badging tool ran but failed for an unrecognized reason
    #[error("badging tool failed: {0}")]
    ToolExecution(String),

    #[error("{tool} is not installed or not in the PATH")]
    ToolMissing { tool: &'static str },

    #[error("no split matches the device ABIs {device_abis:?}")]
    NoCompatibleAbi { device_abis: Vec<Abi> },

    #[error("package needs SDK {required}, device runs SDK {device}")]
    UnsupportedSdk { required: u32, device: u32 },

    #[error("`{command}` failed: {output}")]
    BridgeCommand { command: String, output: String },

    #[error("install session {session}: {reason}")]
    InstallSession { session: String, reason: String },

    #[error(transparent)]
    Template(#[from] crate::template::TemplateError),

    #[error(transparent)]
    MalformedInput(#[from] apk_badging::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn invalid_archive(path: impl Into<PathBuf>, reason: impl ToString) -> Error {
        Error::InvalidArchive {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
