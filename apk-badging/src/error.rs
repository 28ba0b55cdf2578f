use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A mandatory field is missing or could not be read
    #[error("malformed badging output: {field} {reason}")]
    MalformedInput {
        field: &'static str,
        reason: &'static str,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
