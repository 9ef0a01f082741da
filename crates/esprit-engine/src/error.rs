use esprit_contracts::CatalogError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("entity '{0}' not found")]
    EntityNotFound(String),

    #[error("no prompt available for style '{style_id}' on '{entity}'")]
    StyleUnavailable { entity: String, style_id: String },

    #[error("image provider rate limited: {0}")]
    RateLimited(String),

    #[error("image provider returned no image (possible safety filter)")]
    NoImageProduced,

    #[error("image generation failed: {0:#}")]
    GenerationFailed(anyhow::Error),

    #[error("storing generated image failed: {0:#}")]
    AssetStorage(anyhow::Error),

    #[error("persisting catalog failed: {0}")]
    Persistence(#[from] CatalogError),

    #[error("catalog inconsistent: {0}")]
    Inconsistent(String),
}

impl GenerateError {
    /// Errors caused by the request itself rather than by a dependency.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::EntityNotFound(_) | Self::StyleUnavailable { .. }
        )
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited(_))
    }

    /// Stable tag for logs and the generation journal.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::EntityNotFound(_) => "entity_not_found",
            Self::StyleUnavailable { .. } => "style_unavailable",
            Self::RateLimited(_) => "rate_limited",
            Self::NoImageProduced => "no_image_produced",
            Self::GenerationFailed(_) => "generation_failed",
            Self::AssetStorage(_) => "asset_storage",
            Self::Persistence(_) => "persistence",
            Self::Inconsistent(_) => "inconsistent",
        }
    }
}

pub type GenerateResult<T> = std::result::Result<T, GenerateError>;
