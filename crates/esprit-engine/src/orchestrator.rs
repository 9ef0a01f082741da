use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use esprit_contracts::catalog::{
    CatalogPersistence, Entity, EntityType, Nullable, DEFAULT_STYLE,
};
use esprit_contracts::events::{EventSubject, EventWriter, GenerationEvent};
use esprit_contracts::prompts::{self, ResolvedPrompt, STYLES};
use esprit_contracts::{CatalogError, CatalogResult};
use sha2::{Digest, Sha256};

use crate::assets::{asset_file_name, AssetStore};
use crate::error::{GenerateError, GenerateResult};
use crate::providers::{GenerationParams, ImageProvider, ProviderError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationResult {
    pub entity_name: String,
    pub image_url: String,
    pub style_id: String,
    pub prompt_used: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogStats {
    pub total_entities: usize,
    pub missing_images: usize,
}

impl CatalogStats {
    pub fn coverage_pct(&self) -> f64 {
        if self.total_entities == 0 {
            return 0.0;
        }
        (self.total_entities - self.missing_images) as f64 / self.total_entities as f64 * 100.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingImage {
    pub name: String,
    pub entity_type: EntityType,
}

/// Loads the catalog for serving. A missing document yields an empty
/// collection (nothing can be generated, so nothing gets overwritten); a
/// malformed one is fatal.
pub fn load_catalog(catalog: &dyn CatalogPersistence) -> CatalogResult<Vec<Entity>> {
    match catalog.load() {
        Ok(entities) => {
            tracing::info!(entities = entities.len(), "catalog loaded");
            Ok(entities)
        }
        Err(CatalogError::NotFound(path)) => {
            tracing::error!(
                path = %path.display(),
                "catalog document not found; serving an empty catalog"
            );
            Ok(Vec::new())
        }
        Err(err) => Err(err),
    }
}

/// Sets the stored image for `style_id`. The default style also updates the
/// legacy `appearance.imageUrl` that older readers still use.
pub fn record_image(entity: &mut Entity, style_id: &str, image_url: &str) {
    entity
        .rendering_mut()
        .images_mut()
        .insert(style_id.to_string(), image_url.to_string());
    if style_id == DEFAULT_STYLE {
        entity.appearance.legacy_image_url = Nullable::Value(image_url.to_string());
    }
}

/// Owns the in-memory catalog and runs resolve → generate → persist.
///
/// The collection sits behind one mutex. Provider calls and asset writes
/// happen outside it; the mutate-then-save step holds it throughout so full
/// catalog rewrites never interleave.
pub struct Orchestrator {
    entities: Mutex<Vec<Entity>>,
    catalog: Arc<dyn CatalogPersistence>,
    provider: Arc<dyn ImageProvider>,
    assets: Arc<dyn AssetStore>,
    params: GenerationParams,
    events: Option<EventWriter>,
}

impl Orchestrator {
    pub fn new(
        entities: Vec<Entity>,
        catalog: Arc<dyn CatalogPersistence>,
        provider: Arc<dyn ImageProvider>,
        assets: Arc<dyn AssetStore>,
    ) -> Self {
        Self {
            entities: Mutex::new(entities),
            catalog,
            provider,
            assets,
            params: GenerationParams::default(),
            events: None,
        }
    }

    pub fn open(
        catalog: Arc<dyn CatalogPersistence>,
        provider: Arc<dyn ImageProvider>,
        assets: Arc<dyn AssetStore>,
    ) -> CatalogResult<Self> {
        let entities = load_catalog(catalog.as_ref())?;
        Ok(Self::new(entities, catalog, provider, assets))
    }

    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_events(mut self, events: EventWriter) -> Self {
        self.events = Some(events);
        self
    }

    pub fn params(&self) -> &GenerationParams {
        &self.params
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn snapshot(&self) -> Vec<Entity> {
        self.lock_entities().clone()
    }

    pub fn stats(&self) -> CatalogStats {
        let entities = self.lock_entities();
        CatalogStats {
            total_entities: entities.len(),
            missing_images: entities.iter().filter(|e| e.is_missing_image()).count(),
        }
    }

    pub fn missing_images(&self) -> Vec<MissingImage> {
        self.lock_entities()
            .iter()
            .filter(|entity| entity.is_missing_image())
            .map(|entity| MissingImage {
                name: entity.name.clone(),
                entity_type: entity.entity_type.clone(),
            })
            .collect()
    }

    /// Number of entities holding an image per known style.
    pub fn style_coverage(&self) -> Vec<(&'static str, usize)> {
        let entities = self.lock_entities();
        STYLES
            .iter()
            .map(|style| {
                let count = entities
                    .iter()
                    .filter(|entity| entity.image_for_style(style.style_id).is_some())
                    .count();
                (style.style_id, count)
            })
            .collect()
    }

    pub fn preview(&self, entity_name: &str, style_id: &str) -> GenerateResult<ResolvedPrompt> {
        let entities = self.lock_entities();
        prompts::resolve(&entities, entity_name, style_id)
            .ok_or_else(|| GenerateError::EntityNotFound(entity_name.to_string()))
    }

    pub fn generate(&self, entity_name: &str, style_id: &str) -> GenerateResult<GenerationResult> {
        let resolved = self.preview(entity_name, style_id)?;
        if resolved.is_unavailable() {
            let err = GenerateError::StyleUnavailable {
                entity: resolved.entity_name.clone(),
                style_id: style_id.to_string(),
            };
            self.journal(GenerationEvent::GenerationRejected {
                subject: subject(&resolved),
                error: err.kind(),
            });
            return Err(err);
        }

        tracing::info!(
            entity = %resolved.entity_name,
            style_id,
            source = ?resolved.source,
            provider = self.provider.name(),
            prompt = %resolved.prompt,
            "generating image"
        );
        self.journal(GenerationEvent::GenerationStarted {
            subject: subject(&resolved),
            provider: self.provider.name().to_string(),
            prompt_source: resolved.source,
        });

        let image = match self.provider.generate(&resolved.prompt, &self.params) {
            Ok(Some(image)) => image,
            Ok(None) => return Err(self.fail(&resolved, GenerateError::NoImageProduced)),
            Err(ProviderError::RateLimited(message)) => {
                return Err(self.fail(&resolved, GenerateError::RateLimited(message)))
            }
            Err(ProviderError::Other(err)) => {
                return Err(self.fail(&resolved, GenerateError::GenerationFailed(err)))
            }
        };

        let file_name = asset_file_name(&resolved.entity_name, style_id);
        let image_url = self
            .assets
            .store(&file_name, &image.bytes)
            .map_err(|err| self.fail(&resolved, GenerateError::AssetStorage(err)))?;
        tracing::info!(entity = %resolved.entity_name, url = %image_url, "image stored");
        self.journal(GenerationEvent::ImageStored {
            subject: subject(&resolved),
            image_url: image_url.clone(),
            bytes: image.bytes.len(),
        });

        self.persist_image(&resolved.entity_name, style_id, &image_url)
            .map_err(|err| self.fail(&resolved, err))?;
        self.journal(GenerationEvent::CatalogSaved {
            subject: subject(&resolved),
            image_url: image_url.clone(),
        });

        Ok(GenerationResult {
            entity_name: resolved.entity_name,
            image_url,
            style_id: style_id.to_string(),
            prompt_used: resolved.prompt,
        })
    }

    fn persist_image(&self, entity_name: &str, style_id: &str, image_url: &str) -> GenerateResult<()> {
        let mut entities = self.lock_entities();
        let Some(idx) = entities.iter().position(|entity| entity.matches_name(entity_name)) else {
            return Err(GenerateError::Inconsistent(format!(
                "entity '{entity_name}' resolved but missing when recording its image"
            )));
        };
        let previous = entities[idx].clone();
        record_image(&mut entities[idx], style_id, image_url);
        if let Err(err) = self.catalog.save(&entities) {
            entities[idx] = previous;
            return Err(err.into());
        }
        tracing::info!(entities = entities.len(), "catalog saved");
        Ok(())
    }

    fn fail(&self, resolved: &ResolvedPrompt, err: GenerateError) -> GenerateError {
        if err.is_retryable() {
            tracing::warn!(entity = %resolved.entity_name, style_id = %resolved.style_id, error = %err, "generation throttled");
        } else {
            tracing::error!(entity = %resolved.entity_name, style_id = %resolved.style_id, error = %err, "generation failed");
        }
        self.journal(GenerationEvent::GenerationFailed {
            subject: subject(resolved),
            error: err.kind(),
            message: err.to_string(),
        });
        err
    }

    fn journal(&self, event: GenerationEvent) {
        let Some(events) = &self.events else {
            return;
        };
        if let Err(err) = events.emit(&event) {
            tracing::warn!(error = %err, event = event.kind(), "journal write failed");
        }
    }

    fn lock_entities(&self) -> MutexGuard<'_, Vec<Entity>> {
        // Failed saves roll back before unlocking, so a poisoned guard still
        // holds a consistent collection.
        self.entities.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn subject(resolved: &ResolvedPrompt) -> EventSubject {
    EventSubject {
        entity: resolved.entity_name.clone(),
        style_id: resolved.style_id.clone(),
        prompt_digest: prompt_digest(&resolved.prompt),
    }
}

fn prompt_digest(prompt: &str) -> String {
    hex::encode(&Sha256::digest(prompt.as_bytes())[..6])
}
