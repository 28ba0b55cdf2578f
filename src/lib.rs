//! Inspect Android packages (APK, APKM, XAPK, APKS) and install them on
//! attached devices.

pub mod aapt;
pub mod adb;
pub mod apk;
pub mod bundle;
pub mod error;
pub mod install;
pub mod select;
pub mod settings;
pub mod template;

pub use error::{Error, Result};
