pub mod entity;
pub mod normalize;
pub mod nullable;
pub mod store;

pub use entity::{
    Appearance, Attributes, Entity, EntityType, Extensions, Identity, Origin, PromptVariant,
    Relations, Rendering, Story, DEFAULT_STYLE,
};
pub use normalize::{normalize_catalog, normalize_entity, NormalizeReport};
pub use nullable::Nullable;
pub use store::{parse_entities, write_atomic, CatalogPersistence, JsonCatalogStore};
