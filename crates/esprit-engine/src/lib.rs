pub mod assets;
pub mod error;
pub mod orchestrator;
pub mod providers;

pub use assets::{asset_file_name, entity_slug, AssetStore, LocalAssetStore};
pub use error::{GenerateError, GenerateResult};
pub use orchestrator::{
    load_catalog, record_image, CatalogStats, GenerationResult, MissingImage, Orchestrator,
};
pub use providers::{
    default_provider_registry, DryrunProvider, GeneratedImage, GenerationParams, ImageProvider,
    ImageProviderRegistry, ImagenProvider, ProviderError,
};
