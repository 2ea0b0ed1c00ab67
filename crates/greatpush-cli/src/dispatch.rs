use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use greatpush_core::{
    GreatPushConfig, LedgerRecord, PackageMetadata, PendingUpdate, UpdateDescriptor,
    STORAGE_FOLDER_NAME,
};
use greatpush_installer::{
    default_storage_base, FilePayloadSource, JsonFileStore, UpdateContext, UpdateLayout,
};

use crate::completion::write_completions_script;
use crate::host::{ConfiguredHost, PrintingReloader};
use crate::render::TerminalRenderer;
use crate::transport::{is_http_url, sha256_file, CliPayloadSource};
use crate::{Cli, Commands};

const SETTINGS_FILE_NAME: &str = "preferences.json";

pub(crate) fn run_cli(cli: Cli) -> Result<()> {
    if let Commands::Completions { shell } = cli.command {
        return write_completions_script(shell, &mut io::stdout().lock());
    }

    // Only `start` models a process launch; `restart` reaches the check via its reload.
    let restart_check = matches!(cli.command, Commands::Start);
    let renderer = TerminalRenderer::current();
    let mut context = open_context(
        &cli.config,
        cli.storage_root.as_deref(),
        renderer,
        restart_check,
    )?;
    let app_version = context.config().app_version.clone();

    match cli.command {
        Commands::Status => {
            let record = context.ledger().read()?;
            let pending = context.pending().get()?;
            let failed = context.failed().list()?;
            renderer.print_section("status");
            renderer.print_lines(&format_status_lines(
                context.layout().root(),
                &record,
                pending.as_ref(),
                &failed,
            ));
        }
        Commands::Config => {
            let configuration = context.configuration()?;
            println!(
                "{}",
                serde_json::to_string_pretty(&configuration)
                    .context("failed to serialize configuration")?
            );
        }
        Commands::Download {
            source,
            hash,
            label,
            description,
            app_version: descriptor_version,
            mandatory,
            progress,
        } => {
            let descriptor = UpdateDescriptor {
                package_hash: resolve_payload_hash(&source, hash)?,
                download_url: source,
                app_version: Some(descriptor_version.unwrap_or(app_version)),
                label,
                description,
                is_mandatory: mandatory,
                ..UpdateDescriptor::default()
            };

            let mut view = progress.then(|| renderer.start_progress("download"));
            let result = context.download_update(&descriptor, progress, &mut |event| {
                if let Some(view) = view.as_mut() {
                    view.update(event);
                }
            });
            let metadata = match result {
                Ok(metadata) => {
                    if let Some(view) = view {
                        view.finish_success();
                    }
                    metadata
                }
                Err(err) => {
                    if let Some(view) = view {
                        view.finish_abandon();
                    }
                    return Err(err);
                }
            };
            renderer.print_status(
                "ok",
                &format!(
                    "downloaded {} bundle={}",
                    metadata.package_hash,
                    metadata.relative_bundle_path.as_deref().unwrap_or("-")
                ),
            );
        }
        Commands::Install {
            hash,
            mode,
            min_background_secs,
        } => {
            let descriptor = UpdateDescriptor {
                package_hash: hash,
                ..UpdateDescriptor::default()
            };
            context.install_update(
                &descriptor,
                mode.into(),
                Duration::from_secs(min_background_secs),
            )?;
            renderer.print_status(
                "ok",
                &format!(
                    "installed {} mode={}",
                    descriptor.package_hash,
                    greatpush_core::InstallMode::from(mode).as_str()
                ),
            );
        }
        Commands::Ready => {
            context.notify_application_ready()?;
            renderer.print_status("ok", "current update confirmed");
        }
        Commands::Restart { only_if_pending } => {
            if !context.restart_app(only_if_pending)? {
                renderer.print_status("skip", "no pending update, restart skipped");
            }
        }
        Commands::Start => {
            if let Some(rolled_back) = context.take_rollback_report()? {
                renderer.print_status(
                    "warn",
                    &format!("rolled back {}", rolled_back.package_hash),
                );
            }
            let resolution = context.resolve_bundle()?;
            match resolution.package.as_ref() {
                Some(package) if context.is_first_run(&package.package_hash)? => {
                    renderer.print_status(
                        "ok",
                        &format!("first run of {}", package.package_hash),
                    );
                }
                _ => {}
            }
            if resolution.purged {
                renderer.print_status("warn", "binary changed, stored updates cleared");
            }
            renderer.print_status(
                "ok",
                &format!(
                    "boot {} ({})",
                    resolution.bundle_path.display(),
                    boot_source(resolution.package.as_ref())
                ),
            );
        }
        Commands::Metadata { state } => match context.get_update_metadata(state.into())? {
            Some(metadata) => println!(
                "{}",
                metadata
                    .to_json_string()
                    .context("failed to serialize update metadata")?
            ),
            None => println!("null"),
        },
        Commands::IsFailed { hash } => println!("{}", context.is_failed_update(&hash)?),
        Commands::FirstRun { hash } => println!("{}", context.is_first_run(&hash)?),
        Commands::Rollback => {
            context.rollback()?;
            renderer.print_status("ok", "rolled back to the previous package");
        }
        Commands::Clear => {
            context.clear_updates()?;
            renderer.print_status("ok", "cleared all updates");
        }
        Commands::Completions { shell } => {
            write_completions_script(shell, &mut io::stdout().lock())?;
        }
    }

    Ok(())
}

pub(crate) fn open_context(
    config_path: &Path,
    storage_root: Option<&Path>,
    renderer: TerminalRenderer,
    restart_check: bool,
) -> Result<UpdateContext> {
    let config = GreatPushConfig::load(config_path)?;
    let config_dir = config_dir(config_path);
    let base = resolve_storage_base(storage_root, &config, &config_dir)?;
    let host = ConfiguredHost::from_config(&config, &config_dir);

    let layout = UpdateLayout::new(base.join(STORAGE_FOLDER_NAME));
    UpdateContext::builder(layout, config)
        .settings(Arc::new(JsonFileStore::new(base.join(SETTINGS_FILE_NAME))))
        .host(host)
        .reloader(PrintingReloader::new(renderer))
        .payload_source(CliPayloadSource::new()?)
        .run_restart_check(restart_check)
        .build()
}

pub(crate) fn config_dir(config_path: &Path) -> PathBuf {
    config_path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

pub(crate) fn resolve_storage_base(
    flag: Option<&Path>,
    config: &GreatPushConfig,
    config_dir: &Path,
) -> Result<PathBuf> {
    if let Some(flag) = flag {
        return Ok(flag.to_path_buf());
    }
    match &config.storage_root {
        Some(root) if root.is_absolute() => Ok(root.clone()),
        Some(root) => Ok(config_dir.join(root)),
        None => default_storage_base(),
    }
}

/// Local payloads default to their SHA-256; remote ones must name a hash.
pub(crate) fn resolve_payload_hash(source: &str, hash: Option<String>) -> Result<String> {
    if let Some(hash) = hash {
        return Ok(hash);
    }
    if is_http_url(source) {
        return Err(anyhow!("--hash is required for remote payload {source}"));
    }
    sha256_file(&FilePayloadSource::local_path(source))
}

pub(crate) fn boot_source(package: Option<&PackageMetadata>) -> String {
    match package {
        Some(package) => format!("update {}", package.package_hash),
        None => "binary".to_string(),
    }
}

pub(crate) fn format_status_lines(
    root: &Path,
    record: &LedgerRecord,
    pending: Option<&PendingUpdate>,
    failed: &[PackageMetadata],
) -> Vec<String> {
    let pending = match pending {
        Some(pending) if pending.is_loading => format!("{} (attempting)", pending.hash),
        Some(pending) => format!("{} (installed)", pending.hash),
        None => "-".to_string(),
    };
    let failed = if failed.is_empty() {
        "-".to_string()
    } else {
        failed
            .iter()
            .map(|entry| entry.package_hash.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    };
    vec![
        format!("storage: {}", root.display()),
        format!(
            "current: {}",
            record.current_package.as_deref().unwrap_or("-")
        ),
        format!(
            "previous: {}",
            record.previous_package.as_deref().unwrap_or("-")
        ),
        format!("pending: {pending}"),
        format!("failed: {failed}"),
    ]
}
