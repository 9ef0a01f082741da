mod config;
mod server;

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use esprit_contracts::catalog::{normalize_catalog, CatalogPersistence, JsonCatalogStore, DEFAULT_STYLE};
use esprit_contracts::events::EventWriter;
use esprit_engine::{default_provider_registry, LocalAssetStore, Orchestrator};
use serde_json::json;
use tracing_subscriber::EnvFilter;

use crate::config::{CatalogArgs, EngineArgs, EngineConfig, ServeConfig};
use crate::server::AppState;

#[derive(Debug, Parser)]
#[command(name = "esprit", version, about = "L'Esprit mythology catalog and image generation backend")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the HTTP API
    Serve(ServeArgs),
    /// Print catalog totals and image coverage per style
    Analyze(CatalogArgs),
    /// List entities without a legacy image
    ListMissing(CatalogArgs),
    /// Show the prompt that would be sent for an entity and style
    Preview(PreviewArgs),
    /// Generate one image and record it in the catalog
    Generate(GenerateArgs),
    /// Bring every record up to the current rendering schema
    Normalize(NormalizeArgs),
}

#[derive(Debug, Parser)]
struct ServeArgs {
    #[command(flatten)]
    engine: EngineArgs,
    /// Listen host (env: HOST)
    #[arg(long)]
    host: Option<String>,
    /// Listen port (env: PORT)
    #[arg(long)]
    port: Option<u16>,
}

#[derive(Debug, Parser)]
struct PreviewArgs {
    name: String,
    #[arg(long, default_value = DEFAULT_STYLE)]
    style: String,
    #[command(flatten)]
    catalog: CatalogArgs,
}

#[derive(Debug, Parser)]
struct GenerateArgs {
    name: String,
    #[arg(long, default_value = DEFAULT_STYLE)]
    style: String,
    #[command(flatten)]
    engine: EngineArgs,
}

#[derive(Debug, Parser)]
struct NormalizeArgs {
    #[command(flatten)]
    catalog: CatalogArgs,
    /// Report what would change without writing the catalog
    #[arg(long)]
    dry_run: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("esprit error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => run_serve(args),
        Command::Analyze(args) => run_analyze(args),
        Command::ListMissing(args) => run_list_missing(args),
        Command::Preview(args) => run_preview(args),
        Command::Generate(args) => run_generate(args),
        Command::Normalize(args) => run_normalize(args),
    }
}

fn build_orchestrator(config: &EngineConfig) -> Result<(Orchestrator, LocalAssetStore)> {
    let registry = default_provider_registry();
    let provider = registry.get(&config.provider).ok_or_else(|| {
        anyhow!(
            "unknown image provider '{}' (available: {})",
            config.provider,
            registry.names().join(", ")
        )
    })?;
    let catalog = Arc::new(JsonCatalogStore::new(&config.catalog_path));
    let assets = LocalAssetStore::new(&config.generated_dir);
    let mut orchestrator = Orchestrator::open(catalog, provider, Arc::new(assets.clone()))
        .with_context(|| format!("failed to load catalog {}", config.catalog_path.display()))?
        .with_params(config.params.clone());
    if let Some(events_path) = &config.events_path {
        let instance = uuid::Uuid::new_v4().to_string();
        orchestrator = orchestrator.with_events(EventWriter::new(events_path, instance));
    }
    Ok((orchestrator, assets))
}

fn open_catalog(args: &CatalogArgs) -> Result<Orchestrator> {
    let config = EngineConfig::resolve(&EngineArgs {
        catalog: args.clone(),
        provider: Some("dryrun".to_string()),
        ..EngineArgs::default()
    });
    Ok(build_orchestrator(&config)?.0)
}

fn run_serve(args: ServeArgs) -> Result<i32> {
    let config = ServeConfig::resolve(&args.engine, args.host.as_deref(), args.port)?;
    let (orchestrator, assets) = build_orchestrator(&config.engine)?;
    tracing::info!(
        catalog = %config.engine.catalog_path.display(),
        generated_dir = %config.engine.generated_dir.display(),
        model = %config.engine.params.model,
        "engine ready"
    );
    let state = AppState::new(orchestrator, assets);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    runtime.block_on(server::serve(state, config.addr))?;
    Ok(0)
}

fn run_analyze(args: CatalogArgs) -> Result<i32> {
    let orchestrator = open_catalog(&args)?;
    let stats = orchestrator.stats();
    println!("Total entities: {}", stats.total_entities);
    println!("Missing images: {}", stats.missing_images);
    println!("Coverage: {:.1}%", stats.coverage_pct());
    for (style_id, count) in orchestrator.style_coverage() {
        println!("  {style_id}: {count}/{}", stats.total_entities);
    }
    Ok(0)
}

fn run_list_missing(args: CatalogArgs) -> Result<i32> {
    let orchestrator = open_catalog(&args)?;
    let missing = orchestrator.missing_images();
    for entry in &missing {
        println!("{} ({})", entry.name, entry.entity_type);
    }
    println!("{} entities without an image", missing.len());
    Ok(0)
}

fn run_preview(args: PreviewArgs) -> Result<i32> {
    let orchestrator = open_catalog(&args.catalog)?;
    match orchestrator.preview(&args.name, &args.style) {
        Ok(resolved) => {
            let payload = json!({
                "entity": resolved.entity_name,
                "style_id": resolved.style_id,
                "source": resolved.source,
                "prompt": resolved.prompt,
            });
            println!("{}", serde_json::to_string_pretty(&payload)?);
            Ok(0)
        }
        Err(err) => {
            eprintln!("{err}");
            Ok(2)
        }
    }
}

fn run_generate(args: GenerateArgs) -> Result<i32> {
    let config = EngineConfig::resolve(&args.engine);
    let (orchestrator, _) = build_orchestrator(&config)?;
    match orchestrator.generate(&args.name, &args.style) {
        Ok(result) => {
            let payload = json!({
                "entity": result.entity_name,
                "style_id": result.style_id,
                "image_url": result.image_url,
                "prompt_used": result.prompt_used,
            });
            println!("{}", serde_json::to_string_pretty(&payload)?);
            Ok(0)
        }
        Err(err) if err.is_client_error() => {
            eprintln!("{err}");
            Ok(2)
        }
        Err(err) => Err(err.into()),
    }
}

fn run_normalize(args: NormalizeArgs) -> Result<i32> {
    let store = JsonCatalogStore::new(args.catalog.catalog_path());
    let mut entities = store
        .load()
        .with_context(|| format!("failed to load catalog {}", store.path().display()))?;
    let report = normalize_catalog(&mut entities);
    println!(
        "{} of {} entities need schema updates",
        report.changed, report.entities
    );
    if args.dry_run || report.changed == 0 {
        return Ok(0);
    }
    store
        .save(&entities)
        .with_context(|| format!("failed to write {}", store.path().display()))?;
    tracing::info!(path = %store.path().display(), changed = report.changed, "catalog normalized");
    Ok(0)
}
