use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::nullable::Nullable;

pub const DEFAULT_STYLE: &str = "photoreal";

/// Keys a record carries that the model does not interpret. Captured on
/// parse and re-emitted on save.
pub type Extensions = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntityType {
    Divinity,
    Hero,
    Creature,
    Other(String),
}

impl EntityType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Divinity => "Divinity",
            Self::Hero => "Hero",
            Self::Creature => "Creature",
            Self::Other(tag) => tag.as_str(),
        }
    }

    /// Key under `type_specific` for this tag (`divinity`, `hero`, ...).
    pub fn type_key(&self) -> String {
        self.as_str().to_lowercase()
    }
}

impl From<String> for EntityType {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "Divinity" => Self::Divinity,
            "Hero" => Self::Hero,
            "Creature" => Self::Creature,
            _ => Self::Other(raw),
        }
    }
}

impl From<EntityType> for String {
    fn from(value: EntityType) -> Self {
        match value {
            EntityType::Other(tag) => tag,
            known => known.as_str().to_string(),
        }
    }
}

impl Serialize for EntityType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EntityType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::from)
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Origin {
    pub country: String,
    pub ethnicity: String,
    pub pantheon: String,
    #[serde(flatten)]
    pub extra: Extensions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub gender: String,
    pub cultural_role: String,
    pub alignment: String,
    #[serde(flatten)]
    pub extra: Extensions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attributes {
    pub domains: Vec<String>,
    pub symbols: Vec<String>,
    pub power_objects: Vec<String>,
    pub symbolic_animals: Vec<String>,
    #[serde(flatten)]
    pub extra: Extensions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Appearance {
    pub physical_signs: Vec<String>,
    pub manifestations: String,
    #[serde(rename = "image_generation_prompt")]
    pub legacy_prompt: String,
    #[serde(
        rename = "imageUrl",
        default,
        skip_serializing_if = "Nullable::is_absent"
    )]
    pub legacy_image_url: Nullable<String>,
    #[serde(flatten)]
    pub extra: Extensions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Story {
    pub description: String,
    pub characteristics: Vec<String>,
    #[serde(flatten)]
    pub extra: Extensions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relations {
    pub parents: Vec<String>,
    pub conjoint: Vec<String>,
    pub descendants: Vec<String>,
    #[serde(flatten)]
    pub extra: Extensions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptVariant {
    pub style_id: String,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub label: Nullable<String>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub prompt: Nullable<String>,
    #[serde(flatten)]
    pub extra: Extensions,
}

impl PromptVariant {
    pub fn new(style_id: impl Into<String>, label: Option<String>, prompt: impl Into<String>) -> Self {
        Self {
            style_id: style_id.into(),
            label: label.into(),
            prompt: Nullable::Value(prompt.into()),
            extra: Extensions::new(),
        }
    }

    /// Prompt text; a missing or `null` prompt reads as empty.
    pub fn prompt_text(&self) -> &str {
        self.prompt.as_deref().unwrap_or("")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Rendering {
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub prompt_canon: Nullable<String>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub prompt_variants: Nullable<Vec<PromptVariant>>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub images: Nullable<IndexMap<String, String>>,
    #[serde(flatten)]
    pub extra: Extensions,
}

impl Rendering {
    pub fn variants(&self) -> &[PromptVariant] {
        self.prompt_variants.as_deref().unwrap_or_default()
    }

    pub fn images_mut(&mut self) -> &mut IndexMap<String, String> {
        self.images.get_or_insert_with(IndexMap::new)
    }
}

/// One catalog record. Everything outside the core and rendering schema
/// lands in `extensions` and is written back untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub entity_type: EntityType,
    pub name: String,
    pub category: String,
    pub origin: Origin,
    pub identity: Identity,
    pub attributes: Attributes,
    pub appearance: Appearance,
    pub story: Story,
    pub relations: Relations,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub rendering: Nullable<Rendering>,
    #[serde(flatten)]
    pub extensions: Extensions,
}

impl Entity {
    pub fn has_rendering_block(&self) -> bool {
        self.rendering.value().is_some()
    }

    pub fn rendering(&self) -> Option<&Rendering> {
        self.rendering.value()
    }

    pub fn find_variant(&self, style_id: &str) -> Option<&PromptVariant> {
        self.rendering().and_then(|rendering| {
            rendering
                .variants()
                .iter()
                .find(|variant| variant.style_id == style_id && !variant.prompt_text().is_empty())
        })
    }

    pub fn matches_name(&self, name: &str) -> bool {
        self.name.to_lowercase() == name.to_lowercase()
    }

    pub fn legacy_image_url(&self) -> &str {
        self.appearance.legacy_image_url.as_deref().unwrap_or("")
    }

    pub fn is_missing_image(&self) -> bool {
        self.legacy_image_url().trim().is_empty()
    }

    pub fn image_for_style(&self, style_id: &str) -> Option<&str> {
        self.rendering()
            .and_then(|rendering| rendering.images.value())
            .and_then(|images| images.get(style_id))
            .map(String::as_str)
    }

    pub fn rendering_mut(&mut self) -> &mut Rendering {
        self.rendering.get_or_insert_with(Rendering::default)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use serde_json::{json, Value};

    use super::{Entity, EntityType, Nullable, PromptVariant};

    pub(crate) fn entity_json(name: &str) -> Value {
        json!({
            "entity_type": "Divinity",
            "name": name,
            "category": "Orisha",
            "origin": {"country": "Nigeria", "ethnicity": "Yoruba", "pantheon": "Orisha"},
            "identity": {"gender": "Male", "cultural_role": "King", "alignment": "Neutral"},
            "attributes": {
                "domains": ["Thunder"],
                "symbols": ["Double axe"],
                "power_objects": ["Oshe"],
                "symbolic_animals": ["Ram"]
            },
            "appearance": {
                "physical_signs": ["Red and white beads"],
                "manifestations": "Lightning",
                "image_generation_prompt": "Legacy"
            },
            "story": {"description": "Fourth Alafin of Oyo.", "characteristics": ["Fiery"]},
            "relations": {"parents": [], "conjoint": ["Oya"], "descendants": []}
        })
    }

    pub(crate) fn entity(name: &str) -> Entity {
        serde_json::from_value(entity_json(name)).unwrap_or_else(|err| panic!("fixture: {err}"))
    }

    #[test]
    fn legacy_record_has_no_rendering_block() -> anyhow::Result<()> {
        let parsed: Entity = serde_json::from_value(entity_json("Shango"))?;
        assert_eq!(parsed.entity_type, EntityType::Divinity);
        assert!(!parsed.has_rendering_block());
        assert_eq!(parsed.appearance.legacy_prompt, "Legacy");
        assert!(parsed.is_missing_image());
        assert!(parsed.extensions.is_empty());
        Ok(())
    }

    #[test]
    fn unknown_keys_land_in_extension_bags() -> anyhow::Result<()> {
        let mut raw = entity_json("Shango");
        raw["sources"] = json!([{"label": "Future Field", "url": "http://example.com"}]);
        raw["origin"]["region"] = json!("Oyo");
        raw["rendering"] = json!({
            "prompt_canon": "Canon",
            "seed_hint": 7,
            "prompt_variants": [{"style_id": "manga", "prompt": "M", "negative": "blur"}]
        });
        let parsed: Entity = serde_json::from_value(raw)?;
        assert_eq!(parsed.extensions.get("sources").map(Value::is_array), Some(true));
        assert_eq!(parsed.origin.extra.get("region"), Some(&json!("Oyo")));
        let rendering = parsed.rendering().map(|r| r.extra.clone()).unwrap_or_default();
        assert_eq!(rendering.get("seed_hint"), Some(&json!(7)));
        let variant = parsed.find_variant("manga").map(|v| v.extra.clone()).unwrap_or_default();
        assert_eq!(variant.get("negative"), Some(&json!("blur")));
        Ok(())
    }

    #[test]
    fn unknown_entity_type_tag_is_kept_verbatim() -> anyhow::Result<()> {
        let mut raw = entity_json("Mami Wata");
        raw["entity_type"] = json!("Spirit");
        let parsed: Entity = serde_json::from_value(raw)?;
        assert_eq!(parsed.entity_type, EntityType::Other("Spirit".to_string()));
        assert_eq!(parsed.entity_type.type_key(), "spirit");
        assert_eq!(serde_json::to_value(&parsed)?["entity_type"], json!("Spirit"));
        Ok(())
    }

    #[test]
    fn find_variant_skips_empty_prompts_and_is_case_sensitive() {
        let mut shango = entity("Shango");
        shango.rendering_mut().prompt_variants = Nullable::Value(vec![
            PromptVariant::new("manga", None, ""),
            PromptVariant::new("manga", Some("Manga Style".to_string()), "M"),
            PromptVariant::new("oil", None, "O"),
        ]);
        assert_eq!(shango.find_variant("manga").map(|v| v.prompt_text()), Some("M"));
        assert!(shango.find_variant("Manga").is_none());
        assert!(shango.find_variant("cyberpunk").is_none());
    }

    #[test]
    fn name_matching_ignores_case() {
        let shango = entity("Shango");
        assert!(shango.matches_name("shango"));
        assert!(shango.matches_name("SHANGO"));
        assert!(!shango.matches_name("Shang"));
    }

    #[test]
    fn blank_legacy_url_counts_as_missing() {
        let mut shango = entity("Shango");
        shango.appearance.legacy_image_url = Nullable::Value("   ".to_string());
        assert!(shango.is_missing_image());
        shango.appearance.legacy_image_url =
            Nullable::Value("/generated_images/shango.png".to_string());
        assert!(!shango.is_missing_image());
    }
}
