use crate::adb::{self, DeviceBridge, InstallSession, SessionFlags};
use crate::apk::ApkFile;
use crate::error::{Error, Result};
use crate::select::select_install_set;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, error, info, warn};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinSet;

#[derive(Debug, Clone)]
pub struct InstallOptions {
    /// Pick a compatible install set per device, otherwise install everything given
    pub check: bool,
    /// Target serials, every ready device when [None]
    pub devices: Option<Vec<String>>,
    pub session: SessionFlags,
}

impl Default for InstallOptions {
    fn default() -> Self {
        InstallOptions {
            check: true,
            devices: None,
            session: SessionFlags::default(),
        }
    }
}

/// A file handed to the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub path: PathBuf,
    pub size: u64,
}

/// Outcome of an install, keyed by device serial
#[derive(Debug, Default)]
pub struct InstallReport {
    pub devices: BTreeMap<String, Result<Vec<Payload>>>,
}

impl InstallReport {
    pub fn succeeded(&self) -> impl Iterator<Item = &str> {
        self.devices
            .iter()
            .filter(|(_, r)| r.is_ok())
            .map(|(s, _)| s.as_str())
    }

    /// Devices left alone because nothing in the package runs on them
    pub fn skipped(&self) -> impl Iterator<Item = &str> {
        self.devices
            .iter()
            .filter(|(_, r)| matches!(r, Err(Error::NoCompatibleAbi { .. })))
            .map(|(s, _)| s.as_str())
    }

    /// Devices where the install went wrong, skipped devices excluded
    pub fn failed(&self) -> impl Iterator<Item = (&str, &Error)> {
        self.devices.iter().filter_map(|(s, r)| match r {
            Err(Error::NoCompatibleAbi { .. }) => None,
            Err(e) => Some((s.as_str(), e)),
            Ok(_) => None,
        })
    }
}

/// Install `apks` on every target device. Devices run concurrently and a
/// failure on one never stops the others.
pub async fn install(
    apks: Vec<ApkFile>,
    bridge: Arc<dyn DeviceBridge>,
    options: InstallOptions,
) -> Result<InstallReport> {
    let serials = match &options.devices {
        Some(d) => d.clone(),
        None => bridge.devices().await?,
    };
    let mut report = InstallReport::default();
    if serials.is_empty() {
        warn!("No devices to install to");
        return Ok(report);
    }

    let progress = ProgressBar::new(serials.len() as u64);
    progress.set_style(
        ProgressStyle::with_template("{spinner} [{pos}/{len}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );

    let apks: Arc<[ApkFile]> = apks.into();
    let options = Arc::new(options);
    let mut tasks = JoinSet::new();
    for serial in serials {
        let bridge = bridge.clone();
        let apks = apks.clone();
        let options = options.clone();
        tasks.spawn(async move {
            let result = install_on_device(bridge.as_ref(), &serial, &apks, &options).await;
            (serial, result)
        });
    }

    while let Some(joined) = tasks.join_next().await {
        let (serial, result) = match joined {
            Ok(r) => r,
            Err(e) => {
                error!("Install task failed: {}", e);
                continue;
            }
        };
        match &result {
            Ok(p) => info!("{}: installed {} package(s)", serial, p.len()),
            Err(Error::NoCompatibleAbi { device_abis }) => {
                warn!("{}: skipped, nothing runs on {:?}", serial, device_abis)
            }
            Err(e) => error!("{}: {}", serial, e),
        }
        progress.set_message(serial.clone());
        progress.inc(1);
        report.devices.insert(serial, result);
    }
    progress.finish_and_clear();
    Ok(report)
}

async fn install_on_device(
    bridge: &dyn DeviceBridge,
    serial: &str,
    apks: &[ApkFile],
    options: &InstallOptions,
) -> Result<Vec<Payload>> {
    let selected: Vec<&ApkFile> = if options.check {
        let profile = adb::device_profile(bridge, serial).await?;
        debug!("{}: {:?}", serial, profile);
        select_install_set(apks, &profile)?
    } else {
        apks.iter().collect()
    };
    let payloads: Vec<Payload> = selected
        .iter()
        .map(|a| Payload {
            path: a.path.clone(),
            size: a.size,
        })
        .collect();

    let dir = adb::make_temp_dir(bridge, serial).await?;
    let result = transfer(bridge, serial, &dir, &payloads, &options.session).await;
    if let Err(e) = adb::remove_dir(bridge, serial, &dir).await {
        warn!("{}: failed to remove {}: {}", serial, dir, e);
    }
    result.map(|_| payloads)
}

async fn transfer(
    bridge: &dyn DeviceBridge,
    serial: &str,
    dir: &str,
    payloads: &[Payload],
    flags: &SessionFlags,
) -> Result<()> {
    let total = payloads.iter().map(|p| p.size).sum();
    let mut session = InstallSession::create(bridge, serial, total, payloads.len(), flags).await?;

    match stage(bridge, serial, dir, payloads, &mut session).await {
        Ok(()) => session.commit().await,
        Err(e) => {
            session.abandon().await;
            Err(e)
        }
    }
}

/// Push every payload, then write each into the session
async fn stage(
    bridge: &dyn DeviceBridge,
    serial: &str,
    dir: &str,
    payloads: &[Payload],
    session: &mut InstallSession<'_>,
) -> Result<()> {
    // numbered names keep same-named files from different directories apart
    let remote: Vec<String> = (0..payloads.len())
        .map(|i| format!("{}/{}.apk", dir, i))
        .collect();
    for (payload, remote) in payloads.iter().zip(&remote) {
        bridge.push(serial, &payload.path, remote).await?;
    }
    for (index, (payload, remote)) in payloads.iter().zip(&remote).enumerate() {
        session.write(index, payload.size, remote).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adb::tests::{FakeBridge, PIXEL};

    fn apk(file: &str, split: Option<&str>, extra: &str, size: u64) -> ApkFile {
        let split = split.map(|s| format!(" split='{}'", s)).unwrap_or_default();
        ApkFile {
            path: PathBuf::from(file),
            size,
            descriptor: apk_badging::parse(&format!(
                "package: name='org.example.notes' versionCode='1'{}\n{}",
                split, extra
            ))
            .unwrap(),
        }
    }

    fn bundle() -> Vec<ApkFile> {
        vec![
            apk("/work/base.apk", None, "native-code: 'arm64-v8a' 'x86_64'\n", 1000),
            apk(
                "/work/config.arm64_v8a.apk",
                Some("config.arm64_v8a"),
                "native-code: 'arm64-v8a'\n",
                300,
            ),
            apk(
                "/work/config.x86_64.apk",
                Some("config.x86_64"),
                "native-code: 'x86_64'\n",
                200,
            ),
        ]
    }

    #[tokio::test]
    async fn ordered_session_on_one_device() {
        let bridge = Arc::new(FakeBridge::new().device("pixel", &PIXEL));
        let report = install(bundle(), bridge.clone(), InstallOptions::default())
            .await
            .unwrap();

        let payloads = report.devices["pixel"].as_ref().unwrap();
        assert_eq!(
            payloads,
            &vec![
                Payload {
                    path: "/work/base.apk".into(),
                    size: 1000
                },
                Payload {
                    path: "/work/config.arm64_v8a.apk".into(),
                    size: 300
                },
            ]
        );

        let calls: Vec<String> = bridge
            .calls_for("pixel")
            .into_iter()
            .filter(|c| !c.starts_with("getprop"))
            .collect();
        assert_eq!(
            calls,
            vec![
                "mktemp -d --tmpdir=/data/local/tmp",
                "pm install-create -S 1300",
                "push /work/base.apk /data/local/tmp/tmp.XyZ/0.apk",
                "push /work/config.arm64_v8a.apk /data/local/tmp/tmp.XyZ/1.apk",
                "pm install-write -S 1000 1337 0 /data/local/tmp/tmp.XyZ/0.apk",
                "pm install-write -S 300 1337 1 /data/local/tmp/tmp.XyZ/1.apk",
                "pm install-commit 1337",
                "rm -rf /data/local/tmp/tmp.XyZ",
            ]
        );
    }

    #[tokio::test]
    async fn failures_stay_per_device() {
        let bridge = Arc::new(
            FakeBridge::new()
                .device("pixel", &PIXEL)
                .device(
                    "emulator-5554",
                    &[
                        ("ro.product.cpu.abilist", "x86_64,x86"),
                        ("ro.build.version.sdk", "33"),
                        ("persist.sys.locale", "en-US"),
                        ("ro.sf.lcd_density", "440"),
                    ],
                )
                .device(
                    "old-arm",
                    &[
                        ("ro.product.cpu.abilist", "armeabi-v7a,armeabi"),
                        ("ro.build.version.sdk", "28"),
                        ("persist.sys.locale", "en-US"),
                        ("ro.sf.lcd_density", "320"),
                    ],
                )
                .failing("emulator-5554", "pm install-commit"),
        );
        let report = install(bundle(), bridge.clone(), InstallOptions::default())
            .await
            .unwrap();

        assert_eq!(report.devices.len(), 3);
        assert!(report.devices["pixel"].is_ok());
        assert!(matches!(
            report.devices["emulator-5554"],
            Err(Error::BridgeCommand { .. })
        ));
        assert!(matches!(
            report.devices["old-arm"],
            Err(Error::NoCompatibleAbi { .. })
        ));
        assert_eq!(report.succeeded().collect::<Vec<_>>(), vec!["pixel"]);
        assert_eq!(report.skipped().collect::<Vec<_>>(), vec!["old-arm"]);
        assert_eq!(
            report.failed().map(|(s, _)| s).collect::<Vec<_>>(),
            vec!["emulator-5554"]
        );

        // remote scratch space is removed even when the commit fails
        assert_eq!(
            bridge.calls_for("emulator-5554").last().unwrap(),
            "rm -rf /data/local/tmp/tmp.XyZ"
        );
        // nothing touched a device that could not run the package
        assert!(!bridge
            .calls_for("old-arm")
            .iter()
            .any(|c| c.starts_with("mktemp")));
    }

    #[tokio::test]
    async fn unchecked_installs_everything() {
        let bridge = Arc::new(FakeBridge::new().device("pixel", &PIXEL));
        let options = InstallOptions {
            check: false,
            devices: Some(vec!["pixel".into()]),
            session: SessionFlags {
                upgrade: true,
                installer: None,
                originating_uri: Some("https://example.org/notes".into()),
            },
        };
        let report = install(bundle(), bridge.clone(), options).await.unwrap();
        assert_eq!(report.devices["pixel"].as_ref().unwrap().len(), 3);

        let calls = bridge.calls_for("pixel");
        assert!(!calls.iter().any(|c| c.starts_with("getprop")));
        assert!(calls.contains(
            &"pm install-create -r --originating-uri https://example.org/notes -S 1500".to_string()
        ));
    }

    #[tokio::test]
    async fn no_devices() {
        let bridge = Arc::new(FakeBridge::new());
        let report = install(bundle(), bridge, InstallOptions::default())
            .await
            .unwrap();
        assert!(report.devices.is_empty());
    }
}
