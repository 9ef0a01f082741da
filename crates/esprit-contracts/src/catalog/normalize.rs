use serde_json::{json, Map, Value};

use super::entity::{Entity, EntityType, PromptVariant, Rendering};
use super::nullable::Nullable;
use crate::prompts::variant_styles;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NormalizeReport {
    pub entities: usize,
    pub changed: usize,
}

pub fn normalize_catalog(entities: &mut [Entity]) -> NormalizeReport {
    let mut report = NormalizeReport {
        entities: entities.len(),
        changed: 0,
    };
    for entity in entities.iter_mut() {
        if normalize_entity(entity) {
            report.changed += 1;
        }
    }
    report
}

/// Brings a record up to the current schema without overwriting anything:
/// a `type_specific.<type>` skeleton, a `rendering` block seeded from the
/// legacy prompt, and an empty variant for every catalog style that lacks
/// one. Returns whether the record changed.
pub fn normalize_entity(entity: &mut Entity) -> bool {
    let before = entity.clone();
    ensure_type_specific(entity);

    let legacy_prompt = entity.appearance.legacy_prompt.clone();
    let rendering = entity.rendering.get_or_insert_with(|| Rendering {
        prompt_canon: Nullable::Value(legacy_prompt),
        prompt_variants: Nullable::Value(Vec::new()),
        ..Rendering::default()
    });
    let variants = rendering.prompt_variants.get_or_insert_with(Vec::new);
    for style in variant_styles() {
        if variants.iter().any(|variant| variant.style_id == style.style_id) {
            continue;
        }
        variants.push(PromptVariant::new(
            style.style_id,
            Some(style.label.to_string()),
            "",
        ));
    }

    *entity != before
}

fn ensure_type_specific(entity: &mut Entity) {
    let type_key = entity.entity_type.type_key();
    if !entity.extensions.contains_key("type_specific") {
        entity
            .extensions
            .insert("type_specific".to_string(), Value::Object(Map::new()));
    }
    let has_block = entity
        .extensions
        .get("type_specific")
        .and_then(Value::as_object)
        .map(|blocks| blocks.contains_key(&type_key));
    if has_block != Some(false) {
        return;
    }

    // Transitional records kept the type block at the root.
    let mut specific = match entity.extensions.get(&type_key) {
        Some(Value::Object(_)) => entity
            .extensions
            .shift_remove(&type_key)
            .and_then(|value| value.as_object().cloned())
            .unwrap_or_default(),
        _ => Map::new(),
    };
    for (key, default) in skeleton(&entity.entity_type) {
        specific.entry(key).or_insert(default);
    }
    if let Some(blocks) = entity
        .extensions
        .get_mut("type_specific")
        .and_then(Value::as_object_mut)
    {
        blocks.insert(type_key, Value::Object(specific));
    }
}

fn skeleton(entity_type: &EntityType) -> Vec<(String, Value)> {
    let fields = match entity_type {
        EntityType::Divinity => vec![
            ("cult", json!({"offerings": [], "taboos": []})),
            ("domains", json!([])),
        ],
        EntityType::Hero => vec![
            ("titles", json!([])),
            ("achievements", json!([])),
            ("weapons_or_artifacts", json!([])),
            ("legacy", json!("")),
        ],
        EntityType::Creature => vec![
            ("habitat", json!([])),
            ("powers", json!([])),
            ("size", json!("")),
        ],
        EntityType::Other(_) => Vec::new(),
    };
    fields
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}
