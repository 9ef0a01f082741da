use serde::Serialize;

use crate::catalog::entity::{Entity, DEFAULT_STYLE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StyleSpec {
    pub style_id: &'static str,
    pub label: &'static str,
}

/// Styles the catalog knows how to render. `photoreal` is served from the
/// canonical prompt; the others live in `rendering.prompt_variants`.
pub const STYLES: &[StyleSpec] = &[
    StyleSpec {
        style_id: DEFAULT_STYLE,
        label: "Photoreal",
    },
    StyleSpec {
        style_id: "regional_or_ethnic",
        label: "Regional/Ethnic Style",
    },
    StyleSpec {
        style_id: "manga",
        label: "Manga Style",
    },
    StyleSpec {
        style_id: "comic_marvel",
        label: "Comic Book Style",
    },
    StyleSpec {
        style_id: "modern_african_painting",
        label: "Modern African Art",
    },
];

pub fn variant_styles() -> impl Iterator<Item = &'static StyleSpec> {
    STYLES.iter().filter(|style| style.style_id != DEFAULT_STYLE)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptSource {
    Canon,
    Legacy,
    Variant,
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPrompt {
    pub entity_name: String,
    pub style_id: String,
    pub prompt: String,
    pub source: PromptSource,
}

impl ResolvedPrompt {
    /// An empty prompt means the entity exists but cannot be rendered in
    /// the requested style.
    pub fn is_unavailable(&self) -> bool {
        self.prompt.is_empty()
    }
}

pub fn find_entity<'a>(entities: &'a [Entity], entity_name: &str) -> Option<&'a Entity> {
    entities.iter().find(|entity| entity.matches_name(entity_name))
}

/// Picks the prompt for `style_id`. `None` when no entity matches.
///
/// `photoreal` prefers `rendering.prompt_canon` and falls back to the legacy
/// `appearance.image_generation_prompt`. Any other style only consults the
/// variants and resolves to an empty prompt when none applies.
pub fn resolve(entities: &[Entity], entity_name: &str, style_id: &str) -> Option<ResolvedPrompt> {
    let entity = find_entity(entities, entity_name)?;
    Some(resolve_for_entity(entity, style_id))
}

pub fn resolve_for_entity(entity: &Entity, style_id: &str) -> ResolvedPrompt {
    let (prompt, source) = if style_id == DEFAULT_STYLE {
        match entity
            .rendering()
            .and_then(|rendering| rendering.prompt_canon.as_deref())
            .filter(|canon| !canon.is_empty())
        {
            Some(canon) => (canon.to_string(), PromptSource::Canon),
            None => (
                entity.appearance.legacy_prompt.clone(),
                PromptSource::Legacy,
            ),
        }
    } else {
        match entity.find_variant(style_id) {
            Some(variant) => (variant.prompt_text().to_string(), PromptSource::Variant),
            None => (String::new(), PromptSource::Unavailable),
        }
    };
    ResolvedPrompt {
        entity_name: entity.name.clone(),
        style_id: style_id.to_string(),
        prompt,
        source,
    }
}
