//! Command line front end for the resolution engine.
//!
//! Resolves a content tree once, printing a summary of the composed view.
//! Mostly useful for content authors checking that their core or overlay
//! loads cleanly, and for schema validation runs.

use anyhow::{Context, Result};
use clap::Parser;
use rulestack::defines::DefineScope;
use rulestack::dispatch::{LogNotifier, NullProgress};
use rulestack::manager::{ConfigManager, ManagerOptions, ReloadStrength};
use rulestack::prefs::MemoryPrefs;
use rulestack::store::{ContentPaths, FsStore};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "rulestack", version, about = "Resolve a layered content tree")]
struct Cli {
    /// Mainline content directory (holds cores.yaml).
    #[arg(long, value_name = "DIR")]
    data_dir: PathBuf,

    /// Installed overlay directory. Defaults to `<data dir>/add-ons`, or the
    /// per-user data directory when that exists.
    #[arg(long, value_name = "DIR")]
    addons_dir: Option<PathBuf>,

    /// Core id to resolve with.
    #[arg(long, default_value = "default")]
    core: String,

    /// Define to activate, `NAME` or `NAME=off`. Repeatable.
    #[arg(short = 'D', long = "define", value_name = "NAME[=off]")]
    defines: Vec<String>,

    /// Resolve the core alone, without any overlays.
    #[arg(long)]
    no_addons: bool,

    /// Disable the parse cache; every document is re-read and re-parsed.
    #[arg(long)]
    nocache: bool,

    /// Validate the core's root document against schema.yaml.
    #[arg(long)]
    validate_core: bool,

    /// Validate one installed overlay against schema.yaml.
    #[arg(long, value_name = "ID")]
    validate_addon: Option<String>,

    /// Log destination: 0/off, 1/stdout, 2/stderr, or a file path.
    #[arg(long, default_value = "2")]
    log: String,

    /// Enable debug logging.
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(cli: &Cli) -> Result<()> {
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    match cli.log.as_str() {
        "0" | "off" => {}
        "1" | "stdout" => {
            let subscriber = FmtSubscriber::builder()
                .with_max_level(level)
                .with_writer(std::io::stdout)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        "2" | "stderr" => {
            let subscriber = FmtSubscriber::builder()
                .with_max_level(level)
                .with_writer(std::io::stderr)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        filename => {
            let file = OpenOptions::new().create(true).append(true).open(filename)?;
            let subscriber = FmtSubscriber::builder()
                .with_max_level(level)
                .with_writer(file)
                .with_ansi(false)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }
    Ok(())
}

/// `NAME` activates the define; `NAME=off` records it inactive, which still
/// distinguishes it from an unmentioned define for caching purposes.
fn parse_define(spec: &str) -> Result<(String, bool)> {
    match spec.split_once('=') {
        None => Ok((spec.to_string(), true)),
        Some((name, "off")) => Ok((name.to_string(), false)),
        Some((name, "on")) => Ok((name.to_string(), true)),
        Some((_, other)) => {
            anyhow::bail!("invalid define state {other:?} in {spec:?}, expected on or off")
        }
    }
}

fn default_addons_dir(data_dir: &Path) -> PathBuf {
    if let Some(base) = dirs::data_dir() {
        let per_user = base.join("rulestack").join("add-ons");
        if per_user.is_dir() {
            return per_user;
        }
    }
    data_dir.join("add-ons")
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli)?;

    let addons_dir = cli
        .addons_dir
        .clone()
        .unwrap_or_else(|| default_addons_dir(&cli.data_dir));
    let paths = ContentPaths::new(&cli.data_dir, &addons_dir);
    let store = Arc::new(FsStore::for_paths(&paths));

    let options = ManagerOptions {
        validate_core: cli.validate_core,
        validate_addon: cli.validate_addon.clone(),
        no_addons: cli.no_addons,
        use_cache: !cli.nocache,
    };
    let mut manager = ConfigManager::new(
        paths,
        store,
        Box::new(MemoryPrefs::new(cli.core.as_str())),
        Arc::new(LogNotifier),
        Arc::new(NullProgress),
        options,
    );

    let mut scopes = Vec::with_capacity(cli.defines.len());
    for spec in &cli.defines {
        let (name, active) = parse_define(spec)?;
        scopes.push(DefineScope::new(manager.defines(), &name, active));
    }

    manager
        .resolve(ReloadStrength::Force, None)
        .context("configuration resolution failed")?;
    drop(scopes);

    let view = manager.view();
    let derived = manager.derived();
    println!("resolved {} tree(s)", view.len());
    println!("  core: {}", view.base().attr_or("name", "(unnamed)"));
    for descriptor in manager.overlay_descriptors() {
        println!(
            "  overlay: {} {} ({})",
            descriptor.id, descriptor.version, descriptor.title
        );
    }
    println!("  unit types: {}", derived.unit_types.len());
    println!("  multiplayer entries: {}", derived.multiplayer_hashes.len());
    if !manager.notices().is_empty() {
        println!("  deprecation notices:");
        for entry in manager.notices() {
            println!("    {}: {}", entry.origin, entry.message);
        }
    }
    if !manager.error_log().is_empty() {
        println!("  failed overlays:");
        for entry in manager.error_log() {
            println!("    {}: {}", entry.origin, entry.message);
        }
        std::process::exit(1);
    }
    Ok(())
}
