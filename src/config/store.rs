//! Reads and writes the `IntegrationsDocument` atomically.

use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::error::ConfigError;
use crate::registry::FactoryRegistry;

use super::document::IntegrationsDocument;

/// Owns the on-disk document. Every write goes through a temp file + fsync
/// + rename so a crash mid-write can never leave a half-written document
/// behind.
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the document from disk, materialising an empty one if the path
    /// does not exist yet.
    pub async fn load(&self, factories: &FactoryRegistry) -> Result<IntegrationsDocument, ConfigError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => {
                let doc: IntegrationsDocument = serde_json::from_str(&raw)?;
                doc.validate(factories)?;
                Ok(doc)
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                let doc = IntegrationsDocument::empty();
                self.write(&doc).await?;
                Ok(doc)
            }
            Err(err) => Err(ConfigError::Io(err)),
        }
    }

    /// Re-read without materialising, for the watcher's reload path: a
    /// missing file at this point is a real error, not first-boot.
    pub async fn read(&self) -> Result<IntegrationsDocument, ConfigError> {
        let raw = tokio::fs::read_to_string(&self.path).await?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Write via `<path>.tmp-<uuid>`, fsync, rename over the target. The
    /// temp file is removed if any step fails, so a failed write never
    /// leaves stray siblings.
    pub async fn write(&self, document: &IntegrationsDocument) -> Result<(), ConfigError> {
        let tmp_path = self.path.with_extension(format!("tmp-{}", Uuid::new_v4()));
        let serialized = serde_json::to_vec_pretty(document)?;

        let result = self.write_and_sync(&tmp_path, &serialized).await;
        if result.is_err() {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return result.map_err(ConfigError::Io);
        }

        if let Err(err) = tokio::fs::rename(&tmp_path, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(ConfigError::Io(err));
        }
        Ok(())
    }

    async fn write_and_sync(&self, tmp_path: &Path, bytes: &[u8]) -> std::io::Result<()> {
        use tokio::io::AsyncWriteExt;

        let mut file = tokio::fs::File::create(tmp_path).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InstanceConfig;
    use crate::integration::FactoryContext;
    use std::sync::Arc;

    fn registry_with(types: &[&str]) -> FactoryRegistry {
        let registry = FactoryRegistry::new();
        for t in types {
            registry
                .register(t, Arc::new(|_cfg: &InstanceConfig, _ctx: FactoryContext| {
                    Err(crate::error::FactoryError::InvalidSettings {
                        name: "unused".into(),
                        reason: "test factory never actually constructs".into(),
                    })
                }) as crate::registry::Factory)
                .unwrap();
        }
        registry
    }

    #[tokio::test]
    async fn missing_path_materialises_an_empty_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("integrations.json");
        let store = ConfigStore::new(&path);
        let registry = registry_with(&[]);

        let doc = store.load(&registry).await.unwrap();
        assert!(doc.instances.is_empty());
        assert!(path.exists());
    }

    #[tokio::test]
    async fn round_trips_a_written_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("integrations.json");
        let store = ConfigStore::new(&path);
        let registry = registry_with(&["vlogs"]);

        let doc = IntegrationsDocument {
            schema_version: "v1".into(),
            instances: vec![InstanceConfig {
                name: "prod".into(),
                type_name: "vlogs".into(),
                min_version: None,
                settings: serde_json::json!({"endpoint": "https://example.test"}),
            }],
        };
        store.write(&doc).await.unwrap();

        let loaded = store.load(&registry).await.unwrap();
        assert_eq!(loaded.instances.len(), 1);
        assert_eq!(loaded.instances[0].name, "prod");
    }

    #[tokio::test]
    async fn writing_never_leaves_a_stray_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("integrations.json");
        let store = ConfigStore::new(&path);

        store.write(&IntegrationsDocument::empty()).await.unwrap();

        let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        assert_eq!(names, vec!["integrations.json".to_string()]);
    }

    #[tokio::test]
    async fn read_on_missing_file_is_an_error_not_a_materialisation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("integrations.json");
        let store = ConfigStore::new(&path);

        assert!(store.read().await.is_err());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn malformed_document_surfaces_as_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("integrations.json");
        tokio::fs::write(&path, "not json").await.unwrap();
        let store = ConfigStore::new(&path);
        let registry = registry_with(&[]);

        assert!(matches!(store.load(&registry).await, Err(ConfigError::Json(_))));
    }
}
