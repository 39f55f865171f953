//! packtool: build, inspect and manage PolyRead language packs.

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use polyread_core::archive;
use polyread_core::{
    Config, DictionaryEngine, InstallEvent, LookupOutcome, PackBuilder, PackManifest, PackRegistry,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "packtool")]
#[command(about = "Build, inspect and manage PolyRead language packs")]
#[command(version)]
struct Cli {
    /// Data directory holding the dictionary and pack stores
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a pack archive and manifest from a JSON source
    Build {
        /// JSON pack source
        source: PathBuf,
        /// Output directory
        #[arg(short, long, default_value = "packs")]
        out: PathBuf,
        /// Leave the reverse index out; the importer derives it from glosses
        #[arg(long)]
        no_reverse: bool,
    },
    /// Validate an archive and show the store file it contains
    Inspect { archive: PathBuf },
    /// List packs in a registry document
    Registry {
        registry: PathBuf,
        #[arg(long)]
        from: Option<String>,
        #[arg(long)]
        to: Option<String>,
    },
    /// Install a pack from its manifest
    Install {
        manifest: PathBuf,
        /// Pick this pack id when the file is a registry
        #[arg(long)]
        id: Option<String>,
    },
    /// Remove an installed pack
    Remove { id: String },
    /// Show installed packs and storage usage
    List,
    /// Re-check a pack's stored rows
    Verify { id: String },
    /// Clear broken packs and orphaned rows
    Repair,
    /// Look a word up in both directions
    Lookup {
        word: String,
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
    },
    /// Prefix search over forms and reverse words
    Search {
        needle: String,
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Translate text through the provider chain
    Translate {
        text: String,
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
    },
    /// Print the effective configuration as TOML
    Config {
        /// Write it to this file instead
        #[arg(long)]
        write: Option<PathBuf>,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load_toml(path)
            .map_err(|e| anyhow!("{e}"))
            .with_context(|| format!("loading config {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    Ok(config)
}

fn open_engine(cli: &Cli) -> Result<DictionaryEngine> {
    let config = load_config(cli)?;
    let data_dir = config.data_dir.clone();
    DictionaryEngine::open(config).with_context(|| format!("opening {}", data_dir.display()))
}

fn read_manifest(path: &Path, id: Option<&str>) -> Result<PackManifest> {
    match id {
        Some(id) => {
            let registry = PackRegistry::load(path)
                .with_context(|| format!("reading registry {}", path.display()))?;
            registry
                .find(id)
                .cloned()
                .with_context(|| format!("pack {id} is not in {}", path.display()))
        }
        None => PackManifest::load(path).with_context(|| format!("reading manifest {}", path.display())),
    }
}

fn build(source: &Path, out: &Path, no_reverse: bool) -> Result<()> {
    let mut builder = PackBuilder::load_json(source)
        .with_context(|| format!("reading pack source {}", source.display()))?;
    if builder.is_empty() {
        bail!("pack source {} has no entries", source.display());
    }
    builder.include_reverse_index(!no_reverse);
    let built = builder.build(out).context("building pack")?;

    let manifest_path = out.join(format!("{}.manifest.json", built.manifest.id));
    std::fs::write(&manifest_path, built.manifest.to_json()?)
        .with_context(|| format!("writing {}", manifest_path.display()))?;
    println!(
        "{} entries -> {} ({} bytes), manifest {}",
        builder.len(),
        built.archive_path.display(),
        built.manifest.files[0].size_bytes,
        manifest_path.display()
    );
    Ok(())
}

fn install(engine: &DictionaryEngine, manifest: PackManifest) -> Result<()> {
    let handle = engine.install(manifest)?;
    for event in handle.events.iter() {
        match event {
            InstallEvent::StateChanged { state, .. } => println!("{state}"),
            InstallEvent::Download { bytes, total, .. } => {
                tracing::debug!(bytes, total, "download progress")
            }
            InstallEvent::Import { processed, total, .. } => {
                println!("  imported {processed}/{total}")
            }
        }
    }
    let report = handle.wait();
    if let Some(failure) = report.failure() {
        bail!("install of {} failed ({:?}): {}", report.pack_id, failure.category, failure.message);
    }
    if !report.evicted.is_empty() {
        println!("evicted: {}", report.evicted.join(", "));
    }
    print_json(&report.import)
}

fn lookup(engine: &DictionaryEngine, word: &str, from: &str, to: &str) -> Result<()> {
    let result = match engine.lookup(word, from, to)? {
        LookupOutcome::NoData {
            source_language,
            target_language,
        } => bail!("no pack installed for {source_language}<->{target_language}"),
        LookupOutcome::Resolved(result) => result,
    };
    let cycle = result.cycle();
    if cycle.is_empty() {
        println!("{word}: not found");
        return Ok(());
    }
    for position in 1..=cycle.len() {
        if let Some(entry) = cycle.get(position as i64) {
            match entry.item.context() {
                Some(context) => println!("{} {} ({context})", entry.label(), entry.item.text()),
                None => println!("{} {}", entry.label(), entry.item.text()),
            }
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match &cli.command {
        Commands::Build {
            source,
            out,
            no_reverse,
        } => build(source, out, *no_reverse),
        Commands::Inspect { archive: path } => {
            let config = load_config(&cli)?;
            let plan = archive::validate(path, &config.archive)
                .with_context(|| format!("validating {}", path.display()))?;
            print_json(&plan)
        }
        Commands::Registry { registry, from, to } => {
            let registry = PackRegistry::load(registry)?;
            let packs: Vec<&PackManifest> = match (from, to) {
                (Some(from), Some(to)) => registry.for_pair(from, to).collect(),
                (None, None) => registry.packs.iter().collect(),
                _ => bail!("--from and --to go together"),
            };
            for pack in packs {
                println!(
                    "{}\t{}->{}\t{} bytes\t{}",
                    pack.id, pack.source_language, pack.target_language, pack.size_bytes, pack.name
                );
            }
            Ok(())
        }
        Commands::Install { manifest, id } => {
            let manifest = read_manifest(manifest, id.as_deref())?;
            install(&open_engine(&cli)?, manifest)
        }
        Commands::Remove { id } => {
            let removed = open_engine(&cli)?.remove_pack(id)?;
            println!("removed {id} ({removed} word groups)");
            Ok(())
        }
        Commands::List => {
            let engine = open_engine(&cli)?;
            print_json(&engine.statistics()?)
        }
        Commands::Verify { id } => print_json(&open_engine(&cli)?.verify_pack(id)?),
        Commands::Repair => print_json(&open_engine(&cli)?.repair()?),
        Commands::Lookup { word, from, to } => lookup(&open_engine(&cli)?, word, from, to),
        Commands::Search {
            needle,
            from,
            to,
            limit,
        } => print_json(&open_engine(&cli)?.search(needle, from, to, *limit)?),
        Commands::Translate { text, from, to } => {
            let response = open_engine(&cli)?.translate(text, from, to);
            if !response.success {
                bail!(response.error.unwrap_or_else(|| "translation failed".into()));
            }
            print_json(&response)
        }
        Commands::Config { write } => {
            let config = load_config(&cli)?;
            match write {
                Some(path) => config
                    .save_toml(path)
                    .map_err(|e| anyhow!("writing {}: {e}", path.display())),
                None => {
                    print!("{}", config.to_toml_string()?);
                    Ok(())
                }
            }
        }
    }
}
