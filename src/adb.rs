use crate::error::{Error, Result};
use crate::select::DeviceProfile;
use apk_badging::Abi;
use log::{debug, warn};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::process::Command;

const REMOTE_TMP: &str = "/data/local/tmp";

/// Access to attached Android devices
#[async_trait::async_trait]
pub trait DeviceBridge: Send + Sync {
    /// Serials of every attached device that is ready
    async fn devices(&self) -> Result<Vec<String>>;

    /// Run a shell command on the device and return its stdout
    async fn shell(&self, serial: &str, args: &[&str]) -> Result<String>;

    /// Copy a local file to `remote` on the device
    async fn push(&self, serial: &str, local: &Path, remote: &str) -> Result<()>;

    async fn getprop(&self, serial: &str, key: &str) -> Result<String> {
        Ok(self.shell(serial, &["getprop", key]).await?.trim().to_string())
    }
}

/// The `adb` command line client
#[derive(Debug, Clone)]
pub struct Adb {
    program: PathBuf,
}

impl Adb {
    pub fn new(program: PathBuf) -> Adb {
        Adb { program }
    }

    /// Use the given binary, or find `adb` in the PATH
    pub fn locate(program: Option<PathBuf>) -> Result<Adb> {
        match program {
            Some(p) => Ok(Adb::new(p)),
            None => which::which("adb")
                .map(Adb::new)
                .map_err(|_| Error::ToolMissing { tool: "adb" }),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<String> {
        let command = format!("adb {}", args.join(" "));
        debug!("{}", command);
        let output = Command::new(&self.program)
            .args(args)
            .output()
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => Error::ToolMissing { tool: "adb" },
                _ => Error::Io(e),
            })?;
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::BridgeCommand {
                command,
                output: if stdout.trim().is_empty() {
                    stderr.trim().to_string()
                } else {
                    stdout.trim().to_string()
                },
            });
        }
        Ok(stdout)
    }
}

#[async_trait::async_trait]
impl DeviceBridge for Adb {
    async fn devices(&self) -> Result<Vec<String>> {
        Ok(parse_devices(&self.run(&["devices"]).await?))
    }

    async fn shell(&self, serial: &str, args: &[&str]) -> Result<String> {
        let quoted: Vec<String> = args.iter().map(|a| shell_quote(a)).collect();
        let mut full = vec!["-s", serial, "shell"];
        full.extend(quoted.iter().map(String::as_str));
        self.run(&full).await
    }

    async fn push(&self, serial: &str, local: &Path, remote: &str) -> Result<()> {
        let local = local.to_string_lossy();
        self.run(&["-s", serial, "push", &local, remote]).await?;
        Ok(())
    }
}

/// Serials in the `device` state from `adb devices` output
fn parse_devices(output: &str) -> Vec<String> {
    output
        .lines()
        .skip_while(|l| !l.starts_with("List of devices"))
        .skip(1)
        .filter_map(|l| {
            let mut parts = l.split_whitespace();
            match (parts.next(), parts.next()) {
                (Some(serial), Some("device")) => Some(serial.to_string()),
                _ => None,
            }
        })
        .collect()
}

/// Quote an argument for the device shell
fn shell_quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./:=+,@%".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

fn parse_prop<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| Error::BridgeCommand {
        command: format!("getprop {}", key),
        output: format!("unexpected value '{}'", value),
    })
}

/// Read the ABI list, SDK level, locale and density of a device
pub async fn device_profile(bridge: &dyn DeviceBridge, serial: &str) -> Result<DeviceProfile> {
    let mut abilist = bridge.getprop(serial, "ro.product.cpu.abilist").await?;
    if abilist.is_empty() {
        abilist = bridge.getprop(serial, "ro.product.cpu.abi").await?;
    }
    let abis = abilist
        .split(',')
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .map(Abi::decode)
        .collect();

    let sdk = parse_prop(
        "ro.build.version.sdk",
        &bridge.getprop(serial, "ro.build.version.sdk").await?,
    )?;

    let mut locale = bridge.getprop(serial, "persist.sys.locale").await?;
    if locale.is_empty() {
        locale = bridge.getprop(serial, "ro.product.locale").await?;
    }

    let density = parse_prop(
        "ro.sf.lcd_density",
        &bridge.getprop(serial, "ro.sf.lcd_density").await?,
    )?;

    Ok(DeviceProfile {
        abis,
        sdk,
        locale,
        density,
    })
}

/// Create a scratch directory on the device
pub async fn make_temp_dir(bridge: &dyn DeviceBridge, serial: &str) -> Result<String> {
    let tmpdir = format!("--tmpdir={}", REMOTE_TMP);
    let dir = bridge
        .shell(serial, &["mktemp", "-d", &tmpdir])
        .await?
        .trim()
        .to_string();
    if !dir.starts_with(REMOTE_TMP) {
        return Err(Error::BridgeCommand {
            command: "mktemp -d".into(),
            output: dir,
        });
    }
    Ok(dir)
}

pub async fn remove_dir(bridge: &dyn DeviceBridge, serial: &str, dir: &str) -> Result<()> {
    bridge.shell(serial, &["rm", "-rf", dir]).await?;
    Ok(())
}

/// Flags for `pm install-create`
#[derive(Debug, Clone, Default)]
pub struct SessionFlags {
    /// Replace an installed package
    pub upgrade: bool,
    /// Package name recorded as the installer
    pub installer: Option<String>,
    pub originating_uri: Option<String>,
}

/// A package manager install session on one device.
///
/// Only [InstallSession::create] yields a session, so payloads can't be
/// written before it exists. Committing requires every payload written.
pub struct InstallSession<'a> {
    bridge: &'a dyn DeviceBridge,
    serial: &'a str,
    id: String,
    written: Vec<bool>,
}

impl<'a> InstallSession<'a> {
    pub async fn create(
        bridge: &'a dyn DeviceBridge,
        serial: &'a str,
        total_size: u64,
        payloads: usize,
        flags: &SessionFlags,
    ) -> Result<InstallSession<'a>> {
        let size = total_size.to_string();
        let mut args = vec!["pm", "install-create"];
        if flags.upgrade {
            args.push("-r");
        }
        if let Some(i) = &flags.installer {
            args.extend(["-i", i.as_str()]);
        }
        if let Some(u) = &flags.originating_uri {
            args.extend(["--originating-uri", u.as_str()]);
        }
        args.extend(["-S", size.as_str()]);

        let output = pm(bridge, serial, &args).await?;
        let id = session_id(&output).ok_or_else(|| Error::BridgeCommand {
            command: args.join(" "),
            output: output.trim().to_string(),
        })?;
        debug!("{}: created install session {}", serial, id);
        Ok(InstallSession {
            bridge,
            serial,
            id,
            written: vec![false; payloads],
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Stream a pushed payload into the session at `index`
    pub async fn write(&mut self, index: usize, size: u64, remote: &str) -> Result<()> {
        match self.written.get(index) {
            None => return Err(self.error(format!("payload index {} out of range", index))),
            Some(true) => return Err(self.error(format!("payload {} already written", index))),
            Some(false) => {}
        }
        let size = size.to_string();
        let idx = index.to_string();
        pm(
            self.bridge,
            self.serial,
            &["pm", "install-write", "-S", &size, &self.id, &idx, remote],
        )
        .await?;
        self.written[index] = true;
        Ok(())
    }

    pub async fn commit(self) -> Result<()> {
        if let Some(missing) = self.written.iter().position(|w| !w) {
            let e = self.error(format!("payload {} was never written", missing));
            self.abandon().await;
            return Err(e);
        }
        pm(self.bridge, self.serial, &["pm", "install-commit", &self.id]).await?;
        Ok(())
    }

    /// Drop the session on the device, failures are only logged
    pub async fn abandon(self) {
        if let Err(e) = pm(self.bridge, self.serial, &["pm", "install-abandon", &self.id]).await {
            warn!("{}: failed to abandon session {}: {}", self.serial, self.id, e);
        }
    }

    fn error(&self, reason: String) -> Error {
        Error::InstallSession {
            session: self.id.clone(),
            reason,
        }
    }
}

/// Package manager commands may exit cleanly and still report a failure
async fn pm(bridge: &dyn DeviceBridge, serial: &str, args: &[&str]) -> Result<String> {
    let output = bridge.shell(serial, args).await?;
    if output.contains("Failure") || output.contains("Error:") {
        return Err(Error::BridgeCommand {
            command: args.join(" "),
            output: output.trim().to_string(),
        });
    }
    Ok(output)
}

/// Session id from `Success: created install session [1234]`
fn session_id(output: &str) -> Option<String> {
    let start = output.find(|c: char| c.is_ascii_digit())?;
    let id: String = output[start..]
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    Some(id)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Device bridge that answers from canned properties and records every call
    pub(crate) struct FakeBridge {
        pub serials: Vec<String>,
        pub props: HashMap<String, HashMap<String, String>>,
        pub fail_on: Option<(String, String)>,
        pub calls: Mutex<Vec<String>>,
    }

    impl FakeBridge {
        pub fn new() -> FakeBridge {
            FakeBridge {
                serials: vec![],
                props: HashMap::new(),
                fail_on: None,
                calls: Mutex::new(vec![]),
            }
        }

        pub fn device(mut self, serial: &str, props: &[(&str, &str)]) -> FakeBridge {
            self.serials.push(serial.to_string());
            self.props.insert(
                serial.to_string(),
                props
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            );
            self
        }

        /// Make `serial` fail every command that starts with `prefix`
        pub fn failing(mut self, serial: &str, prefix: &str) -> FakeBridge {
            self.fail_on = Some((serial.to_string(), prefix.to_string()));
            self
        }

        pub fn calls_for(&self, serial: &str) -> Vec<String> {
            let prefix = format!("{} ", serial);
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter_map(|c| c.strip_prefix(&prefix).map(str::to_string))
                .collect()
        }
    }

    #[async_trait::async_trait]
    impl DeviceBridge for FakeBridge {
        async fn devices(&self) -> Result<Vec<String>> {
            Ok(self.serials.clone())
        }

        async fn shell(&self, serial: &str, args: &[&str]) -> Result<String> {
            let command = args.join(" ");
            self.calls
                .lock()
                .unwrap()
                .push(format!("{} {}", serial, command));
            if let Some((s, prefix)) = &self.fail_on {
                if s == serial && command.starts_with(prefix.as_str()) {
                    return Ok("Failure [INSTALL_FAILED_INSUFFICIENT_STORAGE]".into());
                }
            }
            Ok(match args {
                ["getprop", key] => self
                    .props
                    .get(serial)
                    .and_then(|p| p.get(*key))
                    .cloned()
                    .unwrap_or_default(),
                ["mktemp", ..] => "/data/local/tmp/tmp.XyZ\n".into(),
                ["pm", "install-create", ..] => "Success: created install session [1337]\n".into(),
                ["pm", ..] => "Success\n".into(),
                _ => String::new(),
            })
        }

        async fn push(&self, serial: &str, local: &Path, remote: &str) -> Result<()> {
            self.calls.lock().unwrap().push(format!(
                "{} push {} {}",
                serial,
                local.display(),
                remote
            ));
            Ok(())
        }
    }

    pub(crate) const PIXEL: [(&str, &str); 4] = [
        ("ro.product.cpu.abilist", "arm64-v8a,armeabi-v7a,armeabi"),
        ("ro.build.version.sdk", "34"),
        ("persist.sys.locale", "en-US"),
        ("ro.sf.lcd_density", "420"),
    ];

    #[test]
    fn devices_output() {
        let out = "* daemon not running; starting now at tcp:5037\n* daemon started successfully\nList of devices attached\nemulator-5554\tdevice\n0123456789ABCDEF\tunauthorized\nR58M12345\tdevice product:x model:y\n\n";
        assert_eq!(parse_devices(out), vec!["emulator-5554", "R58M12345"]);
        assert!(parse_devices("List of devices attached\n\n").is_empty());
    }

    #[test]
    fn quoting() {
        assert_eq!(shell_quote("/data/local/tmp/a.apk"), "/data/local/tmp/a.apk");
        assert_eq!(shell_quote("--tmpdir=/data/local/tmp"), "--tmpdir=/data/local/tmp");
        assert_eq!(shell_quote("my app.apk"), "'my app.apk'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn session_ids() {
        assert_eq!(
            session_id("Success: created install session [1234567]\n").as_deref(),
            Some("1234567")
        );
        assert_eq!(session_id("Success"), None);
    }

    #[tokio::test]
    async fn profile_from_props() {
        let bridge = FakeBridge::new().device("pixel", &PIXEL);
        let p = device_profile(&bridge, "pixel").await.unwrap();
        assert_eq!(p.abis, vec![Abi::Arm64, Abi::Arm7, Abi::Arm]);
        assert_eq!(p.sdk, 34);
        assert_eq!(p.locale, "en-US");
        assert_eq!(p.density, 420);
    }

    #[tokio::test]
    async fn profile_fallbacks() {
        let bridge = FakeBridge::new().device(
            "old",
            &[
                ("ro.product.cpu.abi", "armeabi-v7a"),
                ("ro.build.version.sdk", "19"),
                ("ro.product.locale", "de-DE"),
                ("ro.sf.lcd_density", "240"),
            ],
        );
        let p = device_profile(&bridge, "old").await.unwrap();
        assert_eq!(p.abis, vec![Abi::Arm7]);
        assert_eq!(p.locale, "de-DE");
    }

    #[tokio::test]
    async fn profile_with_bad_sdk() {
        let bridge = FakeBridge::new().device("weird", &[("ro.build.version.sdk", "UpsideDownCake")]);
        assert!(matches!(
            device_profile(&bridge, "weird").await,
            Err(Error::BridgeCommand { .. })
        ));
    }

    #[tokio::test]
    async fn session_in_order() {
        let bridge = FakeBridge::new().device("pixel", &PIXEL);
        let flags = SessionFlags {
            upgrade: true,
            installer: Some("com.android.vending".into()),
            originating_uri: None,
        };
        let mut session = InstallSession::create(&bridge, "pixel", 300, 2, &flags)
            .await
            .unwrap();
        assert_eq!(session.id(), "1337");
        session.write(0, 100, "/data/local/tmp/tmp.XyZ/0.apk").await.unwrap();
        session.write(1, 200, "/data/local/tmp/tmp.XyZ/1.apk").await.unwrap();
        session.commit().await.unwrap();

        assert_eq!(
            bridge.calls_for("pixel"),
            vec![
                "pm install-create -r -i com.android.vending -S 300",
                "pm install-write -S 100 1337 0 /data/local/tmp/tmp.XyZ/0.apk",
                "pm install-write -S 200 1337 1 /data/local/tmp/tmp.XyZ/1.apk",
                "pm install-commit 1337",
            ]
        );
    }

    #[tokio::test]
    async fn commit_before_all_writes_fails_fast() {
        let bridge = FakeBridge::new().device("pixel", &PIXEL);
        let mut session = InstallSession::create(&bridge, "pixel", 300, 2, &SessionFlags::default())
            .await
            .unwrap();
        session.write(0, 100, "/tmp/0.apk").await.unwrap();
        let e = session.commit().await.unwrap_err();
        assert!(matches!(e, Error::InstallSession { .. }));

        let calls = bridge.calls_for("pixel");
        assert!(!calls.iter().any(|c| c.starts_with("pm install-commit")));
        assert_eq!(calls.last().unwrap(), "pm install-abandon 1337");
    }

    #[tokio::test]
    async fn bad_writes_are_rejected() {
        let bridge = FakeBridge::new().device("pixel", &PIXEL);
        let mut session = InstallSession::create(&bridge, "pixel", 1, 1, &SessionFlags::default())
            .await
            .unwrap();
        assert!(session.write(1, 1, "/tmp/1.apk").await.is_err());
        session.write(0, 1, "/tmp/0.apk").await.unwrap();
        assert!(session.write(0, 1, "/tmp/0.apk").await.is_err());
    }

    #[tokio::test]
    async fn package_manager_failure() {
        let bridge = FakeBridge::new()
            .device("pixel", &PIXEL)
            .failing("pixel", "pm install-commit");
        let mut session = InstallSession::create(&bridge, "pixel", 1, 1, &SessionFlags::default())
            .await
            .unwrap();
        session.write(0, 1, "/tmp/0.apk").await.unwrap();
        match session.commit().await {
            Err(Error::BridgeCommand { output, .. }) => {
                assert!(output.contains("INSTALL_FAILED_INSUFFICIENT_STORAGE"))
            }
            r => panic!("unexpected {:?}", r),
        }
    }

    #[tokio::test]
    async fn temp_dir() {
        let bridge = FakeBridge::new().device("pixel", &PIXEL);
        assert_eq!(
            make_temp_dir(&bridge, "pixel").await.unwrap(),
            "/data/local/tmp/tmp.XyZ"
        );
    }
}
