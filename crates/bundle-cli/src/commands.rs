use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use tracing::{debug, info};

use bundle_updater::{
    BundleMetadata, HostPlatform, HttpTransport, InstallOutcome, LocalBundle, PlatformInfo,
    RemoteBundle, UpdateCoordinator, UpdateDecision, UpdaterConfig, find_closest_version,
};

use crate::cli::BundleArgs;
use crate::progress::TerminalListener;

/// A coordinator plus the configuration it was built from.
pub struct Session {
    pub config: UpdaterConfig,
    pub config_path: PathBuf,
    pub coordinator: Arc<UpdateCoordinator>,
}

impl Session {
    fn name(&self) -> String {
        self.coordinator.display_name()
    }

    fn save_config(&self) -> Result<()> {
        self.config
            .save(&self.config_path)
            .with_context(|| format!("save {}", self.config_path.display()))
    }
}

/// Configuration file values with command-line overrides applied.
pub fn effective_config(args: &BundleArgs) -> Result<UpdaterConfig> {
    let mut config = UpdaterConfig::load_or_default(&args.config)
        .with_context(|| format!("load {}", args.config.display()))?;
    if let Some(base_url) = &args.base_url {
        config.base_url.clone_from(base_url);
    }
    if let Some(root) = &args.root {
        config.install_root.clone_from(root);
    }
    if let Some(name) = &args.name {
        config.bundle_name.clone_from(name);
    }
    if let Some(display_name) = &args.display_name {
        config.display_name.clone_from(display_name);
    }
    if let Some(arch) = &args.arch {
        config.arch.clone_from(arch);
    }
    if args.plugin_version.is_some() {
        config.plugin_version.clone_from(&args.plugin_version);
    }
    Ok(config)
}

/// Build the coordinator described by `args`.
pub fn open_session(args: &BundleArgs, quiet: bool) -> Result<Session> {
    let config = effective_config(args)?;
    let platform: Arc<dyn PlatformInfo> = Arc::new(HostPlatform);

    let mut remote = match &args.s3_bucket {
        Some(bucket) => RemoteBundle::s3(
            bucket,
            args.s3_folder.as_deref().unwrap_or_default(),
            config.display_name.clone(),
            platform.as_ref(),
        ),
        None if config.base_url.trim().is_empty() => {
            bail!(
                "no release location configured; pass --base-url or set base_url in {}",
                args.config.display()
            )
        }
        None => RemoteBundle::new(&config.base_url, config.display_name.clone(), platform.as_ref()),
    }
    .context("resolve release location")?;
    remote
        .set_arch(config.arch.clone())
        .context("resolve release location")?;
    remote.set_plugin_version(config.plugin_version.clone());

    let local = LocalBundle::new(
        &config.install_root,
        &config.bundle_name,
        config.display_name.clone(),
        platform.as_ref(),
    );
    let transport = HttpTransport::new().context("create HTTP client")?;
    let coordinator = UpdateCoordinator::new(
        local,
        remote,
        platform,
        Arc::new(transport),
        Arc::new(TerminalListener::new(quiet)),
    );
    debug!("Metadata URL: {}", coordinator.metadata_url());

    Ok(Session {
        config,
        config_path: args.config.clone(),
        coordinator: Arc::new(coordinator),
    })
}

pub fn run_status(session: &Session, json: bool) -> Result<()> {
    let coordinator = &session.coordinator;
    let installed = coordinator.local_metadata();

    if json {
        let status = serde_json::json!({
            "name": session.name(),
            "installDir": coordinator.install_dir(),
            "executable": coordinator.executable_path(),
            "installed": installed.as_deref(),
            "metadataUrl": coordinator.metadata_url(),
            "skippedVersion": session.config.skipped_version,
            "lastCheck": session.config.last_check.map(|t| t.to_rfc3339()),
        });
        let text = serde_json::to_string_pretty(&status).context("serialize status")?;
        println!("{text}");
        return Ok(());
    }

    println!("Bundle: {}", session.name());
    println!("Install directory: {}", coordinator.install_dir().display());
    match installed.as_deref() {
        Some(meta) => println!("Installed version: {}", meta.version_label()),
        None => println!("Installed version: not installed"),
    }
    println!("Releases: {}", coordinator.metadata_url());
    if let Some(skipped) = &session.config.skipped_version {
        println!("Skipped version: {skipped}");
    }
    if let Some(last) = session.config.last_check {
        println!("Last check: {}", last.to_rfc3339());
    }
    Ok(())
}

pub fn run_check(session: &mut Session, scheduled: bool) -> Result<()> {
    if scheduled && !session.config.should_check_now() {
        debug!("Scheduled check not due yet");
        return Ok(());
    }

    let decision = session
        .coordinator
        .check_for_update()
        .context("check for updates")?;
    session.config.record_check();
    session.save_config()?;

    match decision {
        UpdateDecision::UpToDate => {
            if !scheduled {
                let installed = session.coordinator.local_metadata();
                println!(
                    "{} is up to date ({}).",
                    session.name(),
                    installed.as_deref().map_or("N/A", BundleMetadata::version_label)
                );
            }
        }
        UpdateDecision::UpdateAvailable(release) => {
            if scheduled && session.config.should_skip_version(&release.version) {
                info!("Skipping {} {}", session.name(), release.version);
                return Ok(());
            }
            print_available(session, &release);
        }
    }
    Ok(())
}

fn print_available(session: &Session, release: &BundleMetadata) {
    let installed = session.coordinator.local_metadata();
    println!(
        "{} {} is available (installed: {}).",
        session.name(),
        release.version,
        installed.as_deref().map_or("N/A", BundleMetadata::version_label)
    );
    if !release.message().is_empty() {
        println!("{}", release.message());
    }
    if let Some(changes) = release.changes.as_ref().filter(|_| release.has_changes()) {
        for change in changes {
            println!("  - {change}");
        }
    }
}

pub fn run_update(session: &Session, force: bool) -> Result<()> {
    let outcome = if force {
        install(session)?
    } else {
        let decision = session
            .coordinator
            .check_for_update()
            .context("check for updates")?;
        match decision {
            UpdateDecision::UpToDate => {
                println!("{} is up to date.", session.name());
                return Ok(());
            }
            UpdateDecision::UpdateAvailable(release) => {
                print_available(session, &release);
                session
                    .coordinator
                    .perform_update(&release)
                    .with_context(|| format!("update to {}", release.version))?
            }
        }
    };
    println!("{}", outcome.message(&session.name()));
    Ok(())
}

pub fn run_install(session: &Session) -> Result<()> {
    let outcome = install(session)?;
    println!("{}", outcome.message(&session.name()));
    Ok(())
}

fn install(session: &Session) -> Result<InstallOutcome> {
    session
        .coordinator
        .download_and_install()
        .with_context(|| format!("install {}", session.name()))
}

pub fn run_recover(session: &Session) -> Result<()> {
    let action = session.coordinator.recover().context("recover installation")?;
    println!("{}: {}", session.name(), action);
    Ok(())
}

pub fn run_skip(session: &mut Session, version: Option<String>, clear: bool) -> Result<()> {
    if clear {
        session.config.clear_skipped_version();
        session.save_config()?;
        println!("No version is skipped.");
        return Ok(());
    }

    let version = match version {
        Some(version) => version,
        None => {
            session
                .coordinator
                .fetch_remote_metadata()
                .context("fetch release metadata")?
                .version
        }
    };
    println!("Skipping {} {} in scheduled checks.", session.name(), version);
    session.config.skip_version(version);
    session.save_config()
}

pub fn run_closest(target: &str, versions: &[String]) -> Result<()> {
    let closest = find_closest_version(versions, target)
        .ok_or_else(|| anyhow!("no versions to choose from"))?;
    println!("{closest}");
    Ok(())
}
