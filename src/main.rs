use anyhow::{anyhow, bail, Result};
use apkfile::aapt::{BadgingTool, DeferredAapt};
use apkfile::adb::{Adb, DeviceBridge, SessionFlags};
use apkfile::apk::ApkFile;
use apkfile::bundle::{Bundle, BundleOptions, ContainerFormat};
use apkfile::install::{install, InstallOptions};
use apkfile::settings::Settings;
use apkfile::template;
use clap::{Parser, Subcommand, ValueEnum};
use log::{info, warn};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(clap::Parser)]
#[command(version, about)]
struct Args {
    /// Package file
    pub file: PathBuf,

    /// Package type, guessed from the file extension by default
    #[arg(long = "type", value_enum, default_value_t = FileType::Auto)]
    pub file_type: FileType,

    /// Path to aapt
    #[arg(long)]
    pub aapt: Option<PathBuf>,

    /// User specified config path
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum FileType {
    Auto,
    Apk,
    Apkm,
    Xapk,
    Apks,
}

#[derive(Subcommand)]
enum Command {
    /// Show package metadata
    Info {
        /// Print JSON
        #[arg(long)]
        json: bool,

        /// Only read the bundle manifest, don't look at the packages inside
        #[arg(long)]
        no_recursion: bool,
    },
    /// Install on attached devices
    Install {
        /// Device serial, may be repeated. Defaults to every attached device
        #[arg(long = "device", short)]
        devices: Vec<String>,

        /// Install every package without checking device compatibility
        #[arg(long)]
        no_check: bool,

        /// Replace an installed package
        #[arg(short = 'r', long)]
        upgrade: bool,

        /// Installer package name
        #[arg(short, long)]
        installer: Option<String>,

        #[arg(long)]
        originating_uri: Option<String>,

        /// Leave out splits that can't be read
        #[arg(long)]
        skip_broken: bool,

        /// Path to adb
        #[arg(long)]
        adb: Option<PathBuf>,

        /// Don't ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },
    /// Unpack a bundle
    Extract {
        #[arg(long, short)]
        output: PathBuf,
    },
    /// Rename the file, e.g. `{package_name}-{version_code}.apk`
    Rename { new_name: String },
}

enum Package {
    Apk(ApkFile),
    Bundle(Bundle),
}

impl Package {
    async fn open(
        path: &Path,
        file_type: FileType,
        options: BundleOptions,
        tool: Arc<dyn BadgingTool>,
    ) -> Result<Package> {
        let format = match file_type {
            FileType::Auto => ContainerFormat::from_path(path),
            FileType::Apk => None,
            FileType::Apkm => Some(ContainerFormat::Apkm),
            FileType::Xapk => Some(ContainerFormat::Xapk),
            FileType::Apks => Some(ContainerFormat::Apks),
        };
        Ok(match format {
            Some(f) => Package::Bundle(Bundle::open(path, f, options, tool).await?),
            None => Package::Apk(ApkFile::open(path, tool.as_ref()).await?),
        })
    }

    async fn apks(&mut self) -> Result<Vec<ApkFile>> {
        Ok(match self {
            Package::Apk(a) => vec![a.clone()],
            Package::Bundle(b) => b.ensure_extracted().await?.apks().cloned().collect(),
        })
    }

    fn describe(&self) -> String {
        match self {
            Package::Apk(a) => format!(
                "{} {}",
                a.descriptor.package_name(),
                a.descriptor.version_name().unwrap_or_default()
            ),
            Package::Bundle(b) => format!(
                "{} {}",
                b.package_name(),
                b.version_name().unwrap_or_default()
            ),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Set default log level to info
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    let args = Args::parse();

    let settings = Settings::load(args.config.as_deref())
        .map_err(|e| anyhow!("Failed to load config: {}", e))?;

    let tool: Arc<dyn BadgingTool> =
        Arc::new(DeferredAapt::new(args.aapt.clone().or(settings.aapt.clone())));

    let skip_broken_splits = settings.skip_broken_splits
        || matches!(args.command, Command::Install { skip_broken: true, .. });
    let options = BundleOptions {
        extract_dir: None,
        skip_broken_splits,
    };
    let mut package = Package::open(&args.file, args.file_type, options, tool).await?;

    match args.command {
        Command::Info { json, no_recursion } => show_info(&mut package, json, no_recursion).await,
        Command::Install {
            devices,
            no_check,
            upgrade,
            installer,
            originating_uri,
            adb,
            yes,
            ..
        } => {
            let adb = Adb::locate(adb.or(settings.adb.clone()))?;
            let bridge: Arc<dyn DeviceBridge> = Arc::new(adb);
            let devices = if devices.is_empty() {
                bridge.devices().await?
            } else {
                devices
            };
            if devices.is_empty() {
                bail!("No devices attached");
            }

            let apks = package.apks().await?;
            info!("Installing {}", package.describe());
            info!("Packages: ");
            for a in &apks {
                info!(" - {}", a.file_name());
            }
            info!("Devices: {}", devices.join(", "));
            if !yes
                && !dialoguer::Confirm::new()
                    .default(false)
                    .with_prompt(format!(
                        "Install {} on {} device(s)?",
                        package.describe(),
                        devices.len()
                    ))
                    .interact()?
            {
                return Ok(());
            }

            let options = InstallOptions {
                check: settings.check && !no_check,
                devices: Some(devices),
                session: SessionFlags {
                    upgrade: upgrade || settings.upgrade,
                    installer: installer.or(settings.installer),
                    originating_uri: originating_uri.or(settings.originating_uri),
                },
            };
            let report = install(apks, bridge, options).await?;
            for serial in report.succeeded() {
                info!("{}: done", serial);
            }
            for serial in report.skipped() {
                warn!("{}: skipped, no compatible packages", serial);
            }
            let failed: Vec<String> = report
                .failed()
                .map(|(s, e)| format!("{}: {}", s, e))
                .collect();
            if !failed.is_empty() {
                bail!("Install failed on {} device(s):\n{}", failed.len(), failed.join("\n"));
            }
            Ok(())
        }
        Command::Extract { output } => {
            let Package::Bundle(mut bundle) = package else {
                bail!("{} is not a bundle", args.file.display());
            };
            let contents = bundle.extract_to(output).await?;
            for apk in contents.apks() {
                println!("{}", apk.path.display());
            }
            if let Some(icon) = contents.icon() {
                println!("{}", icon.display());
            }
            Ok(())
        }
        Command::Rename { new_name } => {
            let target = match &mut package {
                Package::Apk(a) => a.rename(&new_name).await?.to_path_buf(),
                Package::Bundle(b) => {
                    let name = template::render(&new_name, b.facts())?;
                    let target = b.path().with_file_name(name);
                    tokio::fs::rename(b.path(), &target).await?;
                    target
                }
            };
            info!("Renamed to {}", target.display());
            Ok(())
        }
    }
}

async fn show_info(package: &mut Package, as_json: bool, no_recursion: bool) -> Result<()> {
    match package {
        Package::Apk(apk) => {
            let sha256 = apk.sha256().await?;
            if as_json {
                let mut v = serde_json::to_value(&*apk)?;
                v["sha256"] = sha256.into();
                println!("{}", serde_json::to_string_pretty(&v)?);
                return Ok(());
            }
            let d = &apk.descriptor;
            println!("File:        {} ({} bytes)", apk.path.display(), apk.size);
            println!("SHA-256:     {}", sha256);
            println!("Package:     {}", d.package_name());
            println!(
                "Version:     {} ({})",
                d.version_name().unwrap_or("?"),
                d.version_code()
            );
            if let Some(s) = d.split_name() {
                println!("Split:       {}", s);
            }
            print_sdk(d.min_sdk_version(), d.target_sdk_version());
            if let Some(l) = d.label() {
                println!("Label:       {}", l);
            }
            print_list("ABIs", d.abis().iter().map(|a| a.as_str()));
            print_list("Locales", d.locales().iter().map(String::as_str));
            print_list("Permissions", d.permissions().iter().map(String::as_str));
            Ok(())
        }
        Package::Bundle(bundle) if no_recursion => {
            if as_json {
                let v = json!({
                    "path": bundle.path(),
                    "format": bundle.format(),
                    "manifest": bundle.manifest(),
                });
                println!("{}", serde_json::to_string_pretty(&v)?);
                return Ok(());
            }
            let m = bundle.manifest();
            println!("File:        {}", bundle.path().display());
            println!("Package:     {}", m.package_name);
            println!(
                "Version:     {} ({})",
                m.version_name.as_deref().unwrap_or("?"),
                m.version_code
            );
            if let Some(n) = &m.app_name {
                println!("Name:        {}", n);
            }
            print_sdk(m.min_sdk_version, m.target_sdk_version);
            Ok(())
        }
        Package::Bundle(bundle) => {
            let path = bundle.path().to_path_buf();
            let format = bundle.format();
            let app_name = bundle.app_name().map(str::to_string);
            let c = bundle.ensure_extracted().await?;
            if as_json {
                let v = json!({
                    "path": path,
                    "format": format,
                    "app_name": app_name,
                    "package_name": c.package_name(),
                    "version_code": c.version_code(),
                    "version_name": c.version_name(),
                    "min_sdk_version": c.min_sdk_version(),
                    "target_sdk_version": c.target_sdk_version(),
                    "labels": c.labels(),
                    "permissions": c.permissions(),
                    "features": c.features(),
                    "libraries": c.libraries(),
                    "locales": c.locales(),
                    "abis": c.abis(),
                    "densities": c.densities(),
                    "base": c.base(),
                    "splits": c.splits(),
                });
                println!("{}", serde_json::to_string_pretty(&v)?);
                return Ok(());
            }
            println!("File:        {}", path.display());
            println!("Package:     {}", c.package_name());
            println!(
                "Version:     {} ({})",
                c.version_name().unwrap_or("?"),
                c.version_code()
            );
            if let Some(n) = &app_name {
                println!("Name:        {}", n);
            }
            print_sdk(c.min_sdk_version(), c.target_sdk_version());
            print_list("Splits", c.splits().iter().map(|s| s.file_name()));
            print_list("ABIs", c.abis().iter().map(|a| a.as_str()));
            print_list("Locales", c.locales().iter().map(String::as_str));
            print_list("Permissions", c.permissions().iter().map(String::as_str));
            Ok(())
        }
    }
}

fn print_sdk(min: Option<u32>, target: Option<u32>) {
    if let Some(v) = min {
        println!("Min SDK:     {}", v);
    }
    if let Some(v) = target {
        println!("Target SDK:  {}", v);
    }
}

fn print_list<'a>(title: &str, items: impl Iterator<Item = &'a str>) {
    let items: Vec<&str> = items.collect();
    if items.is_empty() {
        return;
    }
    println!("{}:", title);
    for i in items {
        println!(" - {}", i);
    }
}
