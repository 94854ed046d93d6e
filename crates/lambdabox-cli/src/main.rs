//! Command-line runner for the lambdabox execution engine
//!
//! Runs a single source file through the engine against the local Docker
//! daemon (or the host fallback when Docker is unreachable) and prints the
//! execution result as JSON. Useful for checking sandbox images and runtimes
//! on a host before putting the engine behind a service.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lambdabox_core::{
    BackendKind, ConfigLoader, Engine, EngineConfig, ExecutionRequest, InMemoryFunctionStore,
    Language,
};
use log::LevelFilter;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Lambdabox - run functions in a sandbox")]
struct Cli {
    #[clap(subcommand)]
    command: Commands,

    #[clap(long, short, global = true, help = "Engine configuration file (YAML)")]
    config: Option<PathBuf>,

    #[clap(long, short, global = true, help = "Log level; overrides logging.level from the config")]
    log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Execute a source file in a sandbox
    Run {
        file: PathBuf,

        #[clap(long, help = "python or javascript; inferred from the file extension if omitted")]
        language: Option<String>,

        #[clap(long, default_value_t = 5)]
        timeout: u64,

        #[clap(long, help = "Use the hardened (syscall-intercepting) runtime")]
        hardened: bool,
    },
    /// Report which sandbox backends are reachable
    Probe,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => ConfigLoader::from_file(path).await?,
        None => EngineConfig::default(),
    };

    // Initialize logger
    let level = cli.log_level.as_deref().unwrap_or(&config.logging.level);
    let log_level_filter = level.parse().unwrap_or(LevelFilter::Info);
    env_logger::Builder::new()
        .filter_level(log_level_filter)
        .init();

    match cli.command {
        Commands::Run {
            file,
            language,
            timeout,
            hardened,
        } => run_file(config, &file, language.as_deref(), timeout, hardened).await,
        Commands::Probe => probe(config).await,
    }
}

fn infer_language(file: &Path) -> Result<Language> {
    let extension = file
        .extension()
        .and_then(|ext| ext.to_str())
        .context("Cannot infer language from a file without extension; pass --language")?;
    Ok(extension.parse::<Language>()?)
}

async fn run_file(
    config: EngineConfig,
    file: &Path,
    language: Option<&str>,
    timeout: u64,
    hardened: bool,
) -> Result<()> {
    let language = match language {
        Some(language) => language.parse::<Language>()?,
        None => infer_language(file)?,
    };
    let code = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let store = Arc::new(InMemoryFunctionStore::new());
    let name = file
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "function".to_string());
    let function_id = store.insert_function(&name, language, &code, timeout).await;
    log::info!("Running {} as function {} ({})", file.display(), function_id, language);

    let engine = Engine::with_docker(config, store.clone());
    let request = ExecutionRequest::new(function_id, language, timeout).hardened(hardened);
    let result = engine.execute(request).await;

    println!("{}", serde_json::to_string_pretty(&result)?);
    if !result.is_success() {
        std::process::exit(1);
    }
    Ok(())
}

async fn probe(config: EngineConfig) -> Result<()> {
    let engine = Engine::with_docker(config, Arc::new(InMemoryFunctionStore::new()));

    for kind in [BackendKind::Standard, BackendKind::Hardened] {
        match engine.probe(kind).await {
            Ok(()) => println!("{}: available", kind),
            Err(e) => println!("{}: unavailable ({})", kind, e),
        }
    }
    Ok(())
}
