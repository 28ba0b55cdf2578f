//! Typed view over the badging dump (`aapt dump badging`) of an Android package.

mod abi;
mod density;
mod descriptor;
mod error;
mod parser;

pub use abi::Abi;
pub use density::{bucket_dpi, DENSITY_SUFFIX};
pub use descriptor::{InstallLocation, PackageDescriptor, SplitCategory};
pub use error::{Error, Result};
pub use parser::parse;
