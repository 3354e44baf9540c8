//! clientsync: keep a game client installation in line with its manifest
//!
//! - Hashes every installed file (MD5 or BLAKE3)
//! - Diffs the installation against a JSON manifest
//! - Fetches missing and stale files with verified atomic writes
//! - Prunes files the manifest no longer lists

mod debug_log;
mod progress;

use std::path::{Path, PathBuf};

use clap::builder::styling::{AnsiColor, Effects};
use clap::{Parser, Subcommand, ValueEnum, builder::Styles};
use color_eyre::Result;
use color_eyre::eyre::{WrapErr as _, bail, eyre};
use tracing::{debug, info};

use clientsync_core::{
    CONFIG_FILE, Error, HashAlgorithm, LauncherConfig, Manifest, MirrorSource, Pruner,
    ReconcileOptions, Reconciler, Scanner, diff,
};

use crate::progress::Progress;

const STYLES: Styles = Styles::styled()
    .header(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .usage(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .literal(AnsiColor::Cyan.on_default().effects(Effects::BOLD))
    .placeholder(AnsiColor::Cyan.on_default())
    .valid(AnsiColor::Green.on_default())
    .invalid(AnsiColor::Red.on_default());

#[derive(Parser)]
#[command(name = "clientsync")]
#[command(version)]
#[command(styles = STYLES)]
#[command(about = "Reconcile a game client installation with its manifest")]
#[command(long_about = r#"
clientsync brings a local client installation in line with a manifest
of expected files (relative path, size, hash).

Examples:
  clientsync scan                                   Hash the installation
  clientsync manifest -o files.json                 Manifest of what is installed
  clientsync diff files.json                        What would change
  clientsync prune files.json --dry-run             List orphaned files
  clientsync sync files.json --from ./mirror        Fetch, verify and prune
"#)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Launcher config file
    #[arg(short, long, global = true, default_value = CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    #[default]
    Summary,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Hash every file under the installation root
    Scan {
        /// Installation root (defaults to the configured install_dir)
        #[arg(short, long)]
        root: Option<PathBuf>,

        /// Digest algorithm
        #[arg(short, long)]
        algorithm: Option<HashAlgorithm>,

        #[arg(short, long, value_enum, default_value_t)]
        format: OutputFormat,
    },

    /// Write a manifest describing the installation as it is
    Manifest {
        #[arg(short, long)]
        root: Option<PathBuf>,

        #[arg(short, long)]
        algorithm: Option<HashAlgorithm>,

        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Compare the installation with a manifest
    Diff {
        /// Manifest JSON file
        manifest: PathBuf,

        #[arg(short, long)]
        root: Option<PathBuf>,

        #[arg(short, long)]
        algorithm: Option<HashAlgorithm>,

        #[arg(short, long, value_enum, default_value_t)]
        format: OutputFormat,
    },

    /// Delete files the manifest does not list
    Prune {
        manifest: PathBuf,

        #[arg(short, long)]
        root: Option<PathBuf>,

        /// Report orphans without deleting anything
        #[arg(long)]
        dry_run: bool,

        #[arg(short, long, value_enum, default_value_t)]
        format: OutputFormat,
    },

    /// Fetch missing and stale files from a mirror, then prune
    Sync {
        manifest: PathBuf,

        /// Directory holding the expected files
        #[arg(long)]
        from: PathBuf,

        #[arg(short, long)]
        root: Option<PathBuf>,

        #[arg(short, long)]
        algorithm: Option<HashAlgorithm>,

        /// Keep orphaned files
        #[arg(long)]
        no_prune: bool,
    },

    /// Show (or change) the selected client executable
    Client {
        /// Client name to select
        select: Option<String>,
    },

    /// Show version and build info
    Version,
}

/// Loaded config plus the directory relative paths are taken from
struct Context {
    config: LauncherConfig,
    config_path: PathBuf,
    base: PathBuf,
}

impl Context {
    fn load(config_path: &Path) -> Result<Self> {
        let config = LauncherConfig::load(config_path)
            .wrap_err_with(|| format!("failed to load {}", config_path.display()))?;
        let base = match config_path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        debug!(config = %config_path.display(), base = %base.display(), "loaded config");
        Ok(Self {
            config,
            config_path: config_path.to_path_buf(),
            base,
        })
    }

    fn root(&self, flag: Option<PathBuf>) -> PathBuf {
        flag.unwrap_or_else(|| self.config.install_root(&self.base))
    }

    /// Flag, then config, then whatever the manifest's hashes look like
    fn algorithm(&self, flag: Option<HashAlgorithm>, manifest: Option<&Manifest>) -> HashAlgorithm {
        flag.or(self.config.hash_algorithm)
            .or_else(|| manifest.and_then(Manifest::infer_algorithm))
            .unwrap_or_default()
    }
}

fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    let session = debug_log::init(cli.verbose);
    let _log_guard = session.guard;
    debug!(log = %session.log_path.display(), "session started");

    let ctx = Context::load(&cli.config)?;

    match cli.command {
        Commands::Version => {
            eprintln!("clientsync {}", env!("CARGO_PKG_VERSION"));
            eprintln!("Built with Rust {}", env!("CARGO_PKG_RUST_VERSION"));
            eprintln!("Session log: {}", session.log_path.display());
        }
        Commands::Scan {
            root,
            algorithm,
            format,
        } => scan_command(&ctx, root, algorithm, format)?,
        Commands::Manifest {
            root,
            algorithm,
            output,
        } => manifest_command(&ctx, root, algorithm, output.as_deref())?,
        Commands::Diff {
            manifest,
            root,
            algorithm,
            format,
        } => diff_command(&ctx, &manifest, root, algorithm, format)?,
        Commands::Prune {
            manifest,
            root,
            dry_run,
            format,
        } => prune_command(&ctx, &manifest, root, dry_run, format)?,
        Commands::Sync {
            manifest,
            from,
            root,
            algorithm,
            no_prune,
        } => sync_command(&ctx, &manifest, &from, root, algorithm, no_prune)?,
        Commands::Client { select } => client_command(ctx, select)?,
    }

    Ok(())
}

fn load_manifest(path: &Path) -> Result<Manifest> {
    Manifest::load(path).wrap_err_with(|| format!("failed to load manifest {}", path.display()))
}

fn scanner(ctx: &Context, root: &Path, algorithm: HashAlgorithm) -> Scanner {
    Scanner::new(root)
        .algorithm(algorithm)
        .concurrency(ctx.config.concurrency)
}

fn scan_command(
    ctx: &Context,
    root: Option<PathBuf>,
    algorithm: Option<HashAlgorithm>,
    format: OutputFormat,
) -> Result<()> {
    let root = ctx.root(root);
    let progress = Progress::new();
    progress.scanning(&root);

    let inventory = scanner(ctx, &root, ctx.algorithm(algorithm, None)).scan()?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&inventory)?),
        OutputFormat::Summary => {
            progress.scanned(inventory.len(), inventory.total_size());
            if inventory.len() <= 20 {
                for (path, record) in inventory.iter() {
                    println!("  {path} ({}, {})", progress::size(record.size), record.hash);
                }
            }
        }
    }
    Ok(())
}

fn manifest_command(
    ctx: &Context,
    root: Option<PathBuf>,
    algorithm: Option<HashAlgorithm>,
    output: Option<&Path>,
) -> Result<()> {
    let root = ctx.root(root);
    let progress = Progress::new();
    progress.scanning(&root);

    let inventory = scanner(ctx, &root, ctx.algorithm(algorithm, None)).scan()?;
    let manifest = Manifest::from_inventory(&inventory);
    progress.scanned(manifest.len(), manifest.total_size());

    let json = manifest.to_json()?;
    match output {
        Some(path) => {
            std::fs::write(path, json + "\n")
                .wrap_err_with(|| format!("failed to write {}", path.display()))?;
            info!(path = %path.display(), entries = manifest.len(), "wrote manifest");
        }
        None => println!("{json}"),
    }
    Ok(())
}

fn diff_command(
    ctx: &Context,
    manifest_path: &Path,
    root: Option<PathBuf>,
    algorithm: Option<HashAlgorithm>,
    format: OutputFormat,
) -> Result<()> {
    let manifest = load_manifest(manifest_path)?;
    let root = ctx.root(root);
    let algorithm = ctx.algorithm(algorithm, Some(&manifest));
    let progress = Progress::new();
    progress.scanning(&root);

    let inventory = scanner(ctx, &root, algorithm).scan()?;
    let result = diff(&manifest, &inventory);

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        OutputFormat::Summary => {
            progress.scanned(inventory.len(), inventory.total_size());
            if result.is_clean() {
                progress.up_to_date(result.up_to_date.len());
                return Ok(());
            }
            for path in result.missing() {
                println!("  + {path}");
            }
            for path in &result.stale {
                println!("  ~ {path}");
            }
            for path in &result.orphans {
                println!("  - {path}");
            }
            println!(
                "{} to fetch ({}), {} orphaned, {} up to date",
                result.to_fetch.len(),
                progress::size(result.fetch_bytes(&manifest)),
                result.orphans.len(),
                result.up_to_date.len()
            );
        }
    }
    Ok(())
}

fn prune_command(
    ctx: &Context,
    manifest_path: &Path,
    root: Option<PathBuf>,
    dry_run: bool,
    format: OutputFormat,
) -> Result<()> {
    let manifest = load_manifest(manifest_path)?;
    let root = ctx.root(root);
    let progress = Progress::new();

    let report = Pruner::new(&root)
        .remove_empty_dirs(ctx.config.prune_empty_dirs)
        .dry_run(dry_run)
        .prune(&manifest)?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report.summary())?),
        OutputFormat::Summary => {
            for path in &report.removed {
                println!("  - {path}");
            }
            for failure in &report.failures {
                progress.prune_failure(&failure.path, &failure.source.to_string());
            }
            progress.pruned(report.removed.len(), dry_run);
        }
    }

    report.into_result()?;
    Ok(())
}

fn sync_command(
    ctx: &Context,
    manifest_path: &Path,
    mirror: &Path,
    root: Option<PathBuf>,
    algorithm: Option<HashAlgorithm>,
    no_prune: bool,
) -> Result<()> {
    let manifest = load_manifest(manifest_path)?;
    let root = ctx.root(root);
    let options = ReconcileOptions {
        algorithm: ctx.algorithm(algorithm, Some(&manifest)),
        concurrency: ctx.config.concurrency,
        prune: !no_prune,
        remove_empty_dirs: ctx.config.prune_empty_dirs,
    };
    info!(root = %root.display(), mirror = %mirror.display(), ?options, "starting sync");

    let progress = Progress::new();
    let reconciler = Reconciler::new(&root).options(options);

    progress.scanning(&root);
    let plan = reconciler.plan(&manifest)?;
    progress.scanned(plan.inventory.len(), plan.inventory.total_size());

    if plan.diff.to_fetch.is_empty() && (no_prune || plan.diff.orphans.is_empty()) {
        progress.up_to_date(plan.diff.up_to_date.len());
        return Ok(());
    }

    let spinner = progress.fetch_spinner(plan.diff.to_fetch.len(), plan.diff.fetch_bytes(&manifest));
    let result = reconciler.apply(&manifest, &plan, &MirrorSource::new(mirror));
    spinner.finish_and_clear();

    let report = match result {
        Ok(report) => report,
        Err(Error::PruneIncomplete { failures }) => {
            for failure in &failures {
                progress.prune_failure(&failure.path, &failure.source.to_string());
            }
            bail!(
                "fetched all files but {} orphaned file(s) could not be deleted",
                failures.len()
            );
        }
        Err(e) => return Err(e).wrap_err("sync aborted"),
    };

    if let Some(pruned) = &report.prune {
        progress.pruned(pruned.removed.len(), false);
    }
    progress.finish(report.fetched.len());
    Ok(())
}

fn client_command(mut ctx: Context, select: Option<String>) -> Result<()> {
    if let Some(name) = select {
        if !ctx.config.clients.contains_key(&name) {
            let known: Vec<&str> = ctx.config.clients.keys().map(String::as_str).collect();
            return Err(eyre!("unknown client {name:?}, configured: {}", known.join(", ")));
        }
        ctx.config.preferences.selected_client = name;
        ctx.config
            .save(&ctx.config_path)
            .wrap_err_with(|| format!("failed to save {}", ctx.config_path.display()))?;
        info!(client = %ctx.config.preferences.selected_client, "selected client");
    }

    let path = ctx.config.selected_client_path(&ctx.base)?;
    println!("{}: {}", ctx.config.preferences.selected_client, path.display());
    Ok(())
}
