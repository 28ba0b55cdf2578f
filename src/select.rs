use crate::apk::ApkFile;
use crate::error::{Error, Result};
use apk_badging::{bucket_dpi, Abi, PackageDescriptor, SplitCategory};
use log::debug;
use serde::Serialize;

/// What a target device can run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceProfile {
    /// Supported ABIs, preferred first
    pub abis: Vec<Abi>,
    pub sdk: u32,
    /// BCP-47 style locale, e.g. `en-US`
    pub locale: String,
    /// Display density in DPI
    pub density: u32,
}

impl DeviceProfile {
    pub fn primary_abi(&self) -> Option<Abi> {
        self.abis.first().copied()
    }

    /// Primary language subtag of the device locale (`en` for `en-US`)
    pub fn language(&self) -> &str {
        primary_subtag(&self.locale)
    }

    fn runs(&self, apk: &PackageDescriptor) -> bool {
        apk.abis().is_empty()
            || apk
                .abis()
                .iter()
                .any(|a| self.abis.iter().any(|d| d.is_compatible_with(*a)))
    }
}

fn primary_subtag(locale: &str) -> &str {
    locale.split(['-', '_']).next().unwrap_or(locale).trim()
}

/// Last dot separated segment of a split name (`xxhdpi` for `config.xxhdpi`)
fn split_suffix(d: &PackageDescriptor) -> &str {
    d.split_name()
        .and_then(|n| n.rsplit('.').next())
        .unwrap_or_default()
}

/// Pick the packages to install on `device`: every compatible base and
/// generic split, one ABI split, the matching language splits and the
/// closest density split. Bases come first.
pub fn select_install_set<'a>(
    apks: &'a [ApkFile],
    device: &DeviceProfile,
) -> Result<Vec<&'a ApkFile>> {
    let mut bases = vec![];
    let mut others = vec![];
    let mut languages = vec![];
    let mut densities = vec![];
    let mut abis = vec![];
    for apk in apks {
        match apk.descriptor.split_category() {
            None => bases.push(apk),
            Some(SplitCategory::Other) => others.push(apk),
            Some(SplitCategory::Language) => languages.push(apk),
            Some(SplitCategory::Density) => densities.push(apk),
            Some(SplitCategory::Abi) => abis.push(apk),
        }
    }

    let mut selected: Vec<&ApkFile> = vec![];
    let mut rejection = None;
    for apk in bases.into_iter().chain(others) {
        let d = &apk.descriptor;
        match d.min_sdk_version() {
            Some(min) if min > device.sdk => {
                debug!("{} needs SDK {}, device has {}", apk.path.display(), min, device.sdk);
                rejection.get_or_insert(Error::UnsupportedSdk {
                    required: min,
                    device: device.sdk,
                });
                continue;
            }
            _ => {}
        }
        if !device.runs(d) {
            debug!("{} has no ABI the device runs", apk.path.display());
            rejection.get_or_insert(Error::NoCompatibleAbi {
                device_abis: device.abis.clone(),
            });
            continue;
        }
        selected.push(apk);
    }
    if selected.is_empty() {
        return Err(rejection.unwrap_or(Error::NoCompatibleAbi {
            device_abis: device.abis.clone(),
        }));
    }

    if !abis.is_empty() {
        let primary = device.primary_abi();
        let split = abis
            .iter()
            .copied()
            .find(|a| a.descriptor.abis().iter().next().copied() == primary)
            .ok_or_else(|| Error::NoCompatibleAbi {
                device_abis: device.abis.clone(),
            })?;
        selected.push(split);
    }

    if !languages.is_empty() {
        let language = device.language();
        let matching: Vec<&ApkFile> = languages
            .iter()
            .copied()
            .filter(|l| {
                l.descriptor
                    .locales()
                    .iter()
                    .any(|loc| primary_subtag(loc).eq_ignore_ascii_case(language))
            })
            .collect();
        if matching.is_empty() {
            debug!("No language split for '{}', adding all of them", device.locale);
            selected.extend(languages);
        } else {
            selected.extend(matching);
        }
    }

    let mut closest: Option<(u32, &ApkFile)> = None;
    for split in densities {
        let Some(dpi) = bucket_dpi(split_suffix(&split.descriptor)) else {
            continue;
        };
        let better = match closest {
            Some((best, _)) => dpi.abs_diff(device.density) < best.abs_diff(device.density),
            None => true,
        };
        if better {
            closest = Some((dpi, split));
        }
    }
    if let Some((_, split)) = closest {
        selected.push(split);
    }

    Ok(selected)
}
