use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use esprit_engine::GenerationParams;

pub const DEFAULT_CATALOG_PATH: &str = "src/data/mythology_data.json";
pub const DEFAULT_GENERATED_DIR: &str = "public/generated_images";
pub const DEFAULT_PROVIDER: &str = "imagen";
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 7860;

#[derive(Debug, Clone, Default, Parser)]
pub struct CatalogArgs {
    /// Catalog document (env: ESPRIT_CATALOG)
    #[arg(long)]
    pub catalog: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Parser)]
pub struct EngineArgs {
    #[command(flatten)]
    pub catalog: CatalogArgs,
    /// Directory generated images are written to (env: ESPRIT_GENERATED_DIR)
    #[arg(long)]
    pub generated_dir: Option<PathBuf>,
    /// Image provider name, `imagen` or `dryrun` (env: ESPRIT_PROVIDER)
    #[arg(long)]
    pub provider: Option<String>,
    /// Append generation events to this JSONL file (env: ESPRIT_EVENTS_PATH)
    #[arg(long)]
    pub events: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub catalog_path: PathBuf,
    pub generated_dir: PathBuf,
    pub provider: String,
    pub events_path: Option<PathBuf>,
    pub params: GenerationParams,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServeConfig {
    pub engine: EngineConfig,
    pub addr: SocketAddr,
}

impl CatalogArgs {
    pub fn catalog_path(&self) -> PathBuf {
        self.catalog
            .clone()
            .or_else(|| non_empty_env("ESPRIT_CATALOG").map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CATALOG_PATH))
    }
}

impl EngineConfig {
    pub fn resolve(args: &EngineArgs) -> Self {
        let defaults = GenerationParams::default();
        Self {
            catalog_path: args.catalog.catalog_path(),
            generated_dir: args
                .generated_dir
                .clone()
                .or_else(|| non_empty_env("ESPRIT_GENERATED_DIR").map(PathBuf::from))
                .unwrap_or_else(|| PathBuf::from(DEFAULT_GENERATED_DIR)),
            provider: args
                .provider
                .clone()
                .or_else(|| non_empty_env("ESPRIT_PROVIDER"))
                .unwrap_or_else(|| DEFAULT_PROVIDER.to_string()),
            events_path: args
                .events
                .clone()
                .or_else(|| non_empty_env("ESPRIT_EVENTS_PATH").map(PathBuf::from)),
            params: GenerationParams {
                model: non_empty_env("IMAGEN_MODEL").unwrap_or(defaults.model),
                aspect_ratio: non_empty_env("IMAGEN_ASPECT_RATIO").unwrap_or(defaults.aspect_ratio),
                safety_filter_level: non_empty_env("IMAGEN_SAFETY_LEVEL")
                    .unwrap_or(defaults.safety_filter_level),
                person_generation: non_empty_env("IMAGEN_PERSON_GENERATION")
                    .unwrap_or(defaults.person_generation),
                language: non_empty_env("IMAGEN_LANGUAGE").unwrap_or(defaults.language),
            },
        }
    }
}

impl ServeConfig {
    pub fn resolve(engine: &EngineArgs, host: Option<&str>, port: Option<u16>) -> Result<Self> {
        let host = host
            .map(str::to_string)
            .or_else(|| non_empty_env("HOST"))
            .unwrap_or_else(|| DEFAULT_HOST.to_string());
        let port = match port {
            Some(port) => port,
            None => match non_empty_env("PORT") {
                Some(raw) => raw
                    .parse::<u16>()
                    .with_context(|| format!("PORT must be a port number, got '{raw}'"))?,
                None => DEFAULT_PORT,
            },
        };
        let addr = format!("{host}:{port}")
            .parse::<SocketAddr>()
            .with_context(|| format!("invalid listen address {host}:{port}"))?;
        Ok(Self {
            engine: EngineConfig::resolve(engine),
            addr,
        })
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::{CatalogArgs, EngineArgs, EngineConfig, ServeConfig};

    #[test]
    fn explicit_args_win() -> anyhow::Result<()> {
        let args = EngineArgs {
            catalog: CatalogArgs {
                catalog: Some(PathBuf::from("/data/catalog.json")),
            },
            generated_dir: Some(PathBuf::from("/data/images")),
            provider: Some("dryrun".to_string()),
            events: Some(PathBuf::from("/data/events.jsonl")),
        };
        let config = ServeConfig::resolve(&args, Some("127.0.0.1"), Some(8080))?;
        assert_eq!(config.addr.to_string(), "127.0.0.1:8080");
        assert_eq!(config.engine.catalog_path, PathBuf::from("/data/catalog.json"));
        assert_eq!(config.engine.generated_dir, PathBuf::from("/data/images"));
        assert_eq!(config.engine.provider, "dryrun");
        assert_eq!(
            config.engine.events_path,
            Some(PathBuf::from("/data/events.jsonl"))
        );
        Ok(())
    }

    #[test]
    fn generation_params_are_never_blank() {
        let config = EngineConfig::resolve(&EngineArgs::default());
        assert!(!config.params.aspect_ratio.is_empty());
        assert!(!config.params.safety_filter_level.is_empty());
    }

    #[test]
    fn bad_host_is_rejected() {
        assert!(ServeConfig::resolve(&EngineArgs::default(), Some("not a host"), Some(1)).is_err());
    }
}
