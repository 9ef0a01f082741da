use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use esprit_contracts::catalog::{write_atomic, DEFAULT_STYLE};

pub const DEFAULT_URL_PREFIX: &str = "/generated_images";

/// Where generated images end up. Returns the public URL of the stored file.
pub trait AssetStore: Send + Sync {
    fn store(&self, file_name: &str, bytes: &[u8]) -> Result<String>;
}

/// Filesystem/URL-safe form of an entity name.
pub fn entity_slug(entity_name: &str) -> String {
    entity_name.to_lowercase().replace(' ', "_").replace('/', "-")
}

/// `slug.png` for the default style, `slug_<style>.png` otherwise.
pub fn asset_file_name(entity_name: &str, style_id: &str) -> String {
    let slug = entity_slug(entity_name);
    if style_id == DEFAULT_STYLE {
        format!("{slug}.png")
    } else {
        format!("{slug}_{style_id}.png")
    }
}

#[derive(Debug, Clone)]
pub struct LocalAssetStore {
    root: PathBuf,
    url_prefix: String,
}

impl LocalAssetStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_url_prefix(root, DEFAULT_URL_PREFIX)
    }

    pub fn with_url_prefix(root: impl Into<PathBuf>, url_prefix: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            url_prefix: url_prefix.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves a served file name inside the root, refusing anything that
    /// would escape it.
    pub fn resolve(&self, file_name: &str) -> Option<PathBuf> {
        let valid = !file_name.is_empty()
            && !file_name.contains("..")
            && !file_name.contains('/')
            && !file_name.contains('\\');
        valid.then(|| self.root.join(file_name))
    }
}

impl AssetStore for LocalAssetStore {
    fn store(&self, file_name: &str, bytes: &[u8]) -> Result<String> {
        let Some(path) = self.resolve(file_name) else {
            bail!("refusing to store asset under unsafe name '{file_name}'");
        };
        write_atomic(&path, bytes).with_context(|| format!("failed to write {}", path.display()))?;
        Ok(format!("{}/{}", self.url_prefix, file_name))
    }
}

#[cfg(test)]
mod tests {
    use super::{asset_file_name, entity_slug, AssetStore, LocalAssetStore};

    #[test]
    fn slug_lowercases_and_replaces_separators() {
        assert_eq!(entity_slug("Shango"), "shango");
        assert_eq!(entity_slug("Mami Wata"), "mami_wata");
        assert_eq!(entity_slug("Oshun/Yemoja Pair"), "oshun-yemoja_pair");
    }

    #[test]
    fn file_name_depends_on_style() {
        assert_eq!(asset_file_name("CanonEntity", "photoreal"), "canonentity.png");
        assert_eq!(asset_file_name("MangaEntity", "manga"), "mangaentity_manga.png");
    }

    #[test]
    fn local_store_writes_bytes_and_returns_url() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let root = temp.path().join("generated_images");
        let store = LocalAssetStore::new(&root);
        let url = store.store("shango.png", b"image")?;
        assert_eq!(url, "/generated_images/shango.png");
        assert_eq!(std::fs::read(root.join("shango.png"))?, b"image".to_vec());

        let overwritten = store.store("shango.png", b"second")?;
        assert_eq!(overwritten, url);
        assert_eq!(std::fs::read(root.join("shango.png"))?, b"second".to_vec());
        Ok(())
    }

    #[test]
    fn local_store_rejects_traversal() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = LocalAssetStore::with_url_prefix(temp.path(), "https://cdn.example/img/");
        assert!(store.store("../escape.png", b"x").is_err());
        assert!(store.resolve("nested/file.png").is_none());
        assert_eq!(
            store.store("oya.png", b"x")?,
            "https://cdn.example/img/oya.png"
        );
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn stored_images_stay_world_readable() -> anyhow::Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempfile::tempdir()?;
        let store = LocalAssetStore::new(temp.path());
        let mode = |name: &str| -> anyhow::Result<u32> {
            Ok(std::fs::metadata(temp.path().join(name))?.permissions().mode() & 0o777)
        };

        store.store("shango.png", b"first")?;
        assert_eq!(mode("shango.png")?, 0o644);

        std::fs::set_permissions(
            temp.path().join("shango.png"),
            std::fs::Permissions::from_mode(0o664),
        )?;
        store.store("shango.png", b"second")?;
        assert_eq!(mode("shango.png")?, 0o664);
        Ok(())
    }
}
