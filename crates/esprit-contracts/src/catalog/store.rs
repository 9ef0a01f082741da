use std::collections::HashSet;
use std::fs::Permissions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde_json::Value;

use super::entity::Entity;
use crate::error::{CatalogError, CatalogResult};

/// Backing storage for the full entity collection.
pub trait CatalogPersistence: Send + Sync {
    fn load(&self) -> CatalogResult<Vec<Entity>>;
    fn save(&self, entities: &[Entity]) -> CatalogResult<()>;
}

/// The JSON array document the frontend and the engine share.
#[derive(Debug, Clone)]
pub struct JsonCatalogStore {
    path: PathBuf,
}

impl JsonCatalogStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CatalogPersistence for JsonCatalogStore {
    fn load(&self) -> CatalogResult<Vec<Entity>> {
        if !self.path.exists() {
            return Err(CatalogError::NotFound(self.path.clone()));
        }
        let raw = std::fs::read_to_string(&self.path)?;
        let payload: Value = serde_json::from_str(&raw).map_err(|err| CatalogError::Malformed {
            record: None,
            reason: format!("invalid JSON: {err}"),
        })?;
        parse_entities(payload)
    }

    fn save(&self, entities: &[Entity]) -> CatalogResult<()> {
        let mut body = serde_json::to_string_pretty(entities)?;
        body.push('\n');
        write_atomic(&self.path, body.as_bytes())?;
        Ok(())
    }
}

/// Replaces `path` with `bytes` through a staged file in the same directory.
/// The replacement keeps the permissions of the file it replaces; new files
/// get `0644` on unix.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    let permissions = match std::fs::metadata(path) {
        Ok(existing) => Some(existing.permissions()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => new_file_permissions(),
        Err(err) => return Err(err),
    };

    let mut staged = tempfile::NamedTempFile::new_in(dir)?;
    staged.write_all(bytes)?;
    if let Some(permissions) = permissions {
        staged.as_file().set_permissions(permissions)?;
    }
    staged.as_file().sync_all()?;
    staged.persist(path).map_err(|err| err.error)?;
    Ok(())
}

#[cfg(unix)]
fn new_file_permissions() -> Option<Permissions> {
    use std::os::unix::fs::PermissionsExt;
    Some(Permissions::from_mode(0o644))
}

#[cfg(not(unix))]
fn new_file_permissions() -> Option<Permissions> {
    None
}

pub fn parse_entities(payload: Value) -> CatalogResult<Vec<Entity>> {
    let Value::Array(rows) = payload else {
        return Err(CatalogError::Malformed {
            record: None,
            reason: "catalog document must be a JSON array".to_string(),
        });
    };

    let mut entities = Vec::with_capacity(rows.len());
    let mut names = HashSet::new();
    for (idx, row) in rows.into_iter().enumerate() {
        let label = record_label(idx, &row);
        let entity: Entity = serde_json::from_value(row).map_err(|err| CatalogError::Malformed {
            record: Some(label.clone()),
            reason: err.to_string(),
        })?;
        if !names.insert(entity.name.to_lowercase()) {
            return Err(CatalogError::Malformed {
                record: Some(label),
                reason: format!("duplicate entity name '{}'", entity.name),
            });
        }
        let mut styles = HashSet::new();
        if let Some(rendering) = entity.rendering.value() {
            for variant in rendering.variants() {
                if !styles.insert(variant.style_id.as_str()) {
                    return Err(CatalogError::Malformed {
                        record: Some(label),
                        reason: format!("duplicate style_id '{}'", variant.style_id),
                    });
                }
            }
        }
        entities.push(entity);
    }
    Ok(entities)
}

fn record_label(idx: usize, row: &Value) -> String {
    match row.get("name").and_then(Value::as_str) {
        Some(name) => format!("#{idx} ({name})"),
        None => format!("#{idx}"),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::{CatalogPersistence, JsonCatalogStore};
    use crate::catalog::entity::tests::entity_json;
    use crate::prompts::resolve_for_entity;
    use crate::catalog::nullable::Nullable;
    use crate::error::CatalogError;

    fn write_catalog(path: &std::path::Path, rows: Value) -> anyhow::Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(&rows)?)?;
        Ok(())
    }

    fn v2_record() -> Value {
        let mut raw = entity_json("TestEntityV2");
        raw["type_specific"] = json!({
            "divinity": {"cult": {"offerings": ["Logs"], "taboos": ["Bugs"]}}
        });
        raw["rendering"] = json!({
            "prompt_canon": "V2 Canon Prompt",
            "prompt_variants": [
                {"style_id": "manga", "prompt": "Manga Prompt"},
                {"style_id": "oil", "prompt": "Oil Prompt"}
            ]
        });
        raw["sources"] = json!([{"label": "Future Field", "url": "http://example.com"}]);
        raw
    }

    #[test]
    fn round_trip_preserves_extension_fields() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("mythology_data.json");
        let original = json!([v2_record()]);
        write_catalog(&path, original.clone())?;

        let store = JsonCatalogStore::new(&path);
        let loaded = store.load()?;
        assert_eq!(loaded.len(), 1);
        store.save(&loaded)?;

        let saved: Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
        assert_eq!(saved, original);
        assert_eq!(
            saved[0]["type_specific"]["divinity"]["cult"]["offerings"],
            json!(["Logs"])
        );
        assert_eq!(saved[0]["sources"][0]["label"], json!("Future Field"));
        assert_eq!(store.load()?, loaded);
        Ok(())
    }

    #[test]
    fn round_trip_keeps_nested_unknown_keys_and_absent_optionals() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("catalog.json");
        let mut record = entity_json("Oya");
        record["appearance"]["palette"] = json!({"primary": "purple", "tones": [1, 2.5, null]});
        record["relations"]["rivals"] = json!(["Oshun"]);
        let original = json!([record]);
        write_catalog(&path, original.clone())?;

        let store = JsonCatalogStore::new(&path);
        store.save(&store.load()?)?;
        let saved: Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
        assert_eq!(saved, original);
        assert!(saved[0]["appearance"].get("imageUrl").is_none());
        assert!(saved[0].get("rendering").is_none());
        Ok(())
    }

    #[test]
    fn missing_document_is_not_found() {
        let store = JsonCatalogStore::new("/nonexistent/esprit/catalog.json");
        assert!(matches!(store.load(), Err(CatalogError::NotFound(_))));
    }

    #[test]
    fn record_missing_core_field_is_malformed() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("catalog.json");
        let mut broken = entity_json("Eshu");
        broken.as_object_mut().map(|row| row.remove("origin"));
        write_catalog(&path, json!([entity_json("Shango"), broken]))?;

        match JsonCatalogStore::new(&path).load() {
            Err(CatalogError::Malformed { record, reason }) => {
                assert_eq!(record.as_deref(), Some("#1 (Eshu)"));
                assert!(reason.contains("origin"), "{reason}");
            }
            other => panic!("expected malformed, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn non_array_document_is_malformed() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("catalog.json");
        write_catalog(&path, json!({"entities": []}))?;
        assert!(matches!(
            JsonCatalogStore::new(&path).load(),
            Err(CatalogError::Malformed { record: None, .. })
        ));
        Ok(())
    }

    #[test]
    fn duplicate_names_and_style_ids_are_malformed() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let names = temp.path().join("names.json");
        write_catalog(&names, json!([entity_json("Oshun"), entity_json("OSHUN")]))?;
        assert!(matches!(
            JsonCatalogStore::new(&names).load(),
            Err(CatalogError::Malformed { .. })
        ));

        let styles = temp.path().join("styles.json");
        let mut record = entity_json("Oshun");
        record["rendering"] = json!({"prompt_variants": [
            {"style_id": "manga", "prompt": "a"},
            {"style_id": "manga", "prompt": "b"}
        ]});
        write_catalog(&styles, json!([record]))?;
        assert!(matches!(
            JsonCatalogStore::new(&styles).load(),
            Err(CatalogError::Malformed { .. })
        ));
        Ok(())
    }

    #[test]
    fn save_replaces_document_without_leaving_staging_files() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("catalog.json");
        write_catalog(&path, json!([entity_json("Shango")]))?;
        let store = JsonCatalogStore::new(&path);
        let mut entities = store.load()?;
        entities[0].appearance.legacy_image_url =
            Nullable::Value("/generated_images/shango.png".to_string());
        store.save(&entities)?;

        let files = std::fs::read_dir(temp.path())?.count();
        assert_eq!(files, 1);
        assert_eq!(
            store.load()?[0].legacy_image_url(),
            "/generated_images/shango.png"
        );
        Ok(())
    }

    #[test]
    fn save_writes_unescaped_utf8() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("catalog.json");
        write_catalog(&path, json!([entity_json("Ògún")]))?;
        let store = JsonCatalogStore::new(&path);
        store.save(&store.load()?)?;
        assert!(std::fs::read_to_string(&path)?.contains("\"name\": \"Ògún\""));
        Ok(())
    }

    #[test]
    fn explicit_nulls_in_known_fields_round_trip() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("catalog.json");
        let mut oya = entity_json("Oya");
        oya["appearance"]["imageUrl"] = Value::Null;
        oya["rendering"] = json!({
            "prompt_canon": null,
            "images": null,
            "prompt_variants": [{"style_id": "manga", "label": null, "prompt": "M"}]
        });
        let mut eshu = entity_json("Eshu");
        eshu["rendering"] = Value::Null;
        let original = json!([oya, eshu]);
        write_catalog(&path, original.clone())?;

        let store = JsonCatalogStore::new(&path);
        let loaded = store.load()?;
        assert!(loaded[0].is_missing_image());
        assert!(!loaded[1].has_rendering_block());
        store.save(&loaded)?;

        let saved: Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
        assert_eq!(saved, original);
        Ok(())
    }

    #[test]
    fn null_variant_prompt_is_unavailable_not_malformed() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("catalog.json");
        let mut oya = entity_json("Oya");
        oya["rendering"] = json!({"prompt_variants": [{"style_id": "manga", "prompt": null}]});
        let original = json!([oya]);
        write_catalog(&path, original.clone())?;

        let store = JsonCatalogStore::new(&path);
        let loaded = store.load()?;
        assert!(loaded[0].find_variant("manga").is_none());
        assert!(resolve_for_entity(&loaded[0], "manga").is_unavailable());

        store.save(&loaded)?;
        let saved: Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
        assert_eq!(saved, original);
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn save_keeps_document_permissions() -> anyhow::Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempfile::tempdir()?;
        let path = temp.path().join("catalog.json");
        write_catalog(&path, json!([entity_json("Shango")]))?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o664))?;

        let store = JsonCatalogStore::new(&path);
        store.save(&store.load()?)?;
        assert_eq!(std::fs::metadata(&path)?.permissions().mode() & 0o777, 0o664);

        let fresh = JsonCatalogStore::new(temp.path().join("fresh.json"));
        fresh.save(&store.load()?)?;
        assert_eq!(
            std::fs::metadata(fresh.path())?.permissions().mode() & 0o777,
            0o644
        );
        Ok(())
    }
}
