use super::{
    ArtifactCategory, ArtifactContent, ArtifactMetadata, ArtifactScope, ArtifactStore,
    CURRENT_VERSION,
};
use crate::clock::{Clock, SystemClock};
use crate::errors::{StoreError, validate_component};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;

const METADATA_SUFFIX: &str = ".meta.json";

/// File-backed artifact store.
///
/// Directory structure:
/// ```text
/// root/
/// └── <application>/
///     └── <owner>/
///         ├── inputs/
///         ├── reports/
///         │   ├── report_<id>.md
///         │   └── report_<id>.md.meta.json
///         ├── sub_agent_outputs/
///         └── other/
/// ```
pub struct FileArtifactStore {
    root: PathBuf,
    clock: Arc<dyn Clock>,
}

impl FileArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn scope_dir(&self, scope: &ArtifactScope) -> Result<PathBuf, StoreError> {
        validate_component("application", &scope.application)?;
        validate_component("owner", &scope.owner)?;
        Ok(self.root.join(&scope.application).join(&scope.owner))
    }

    /// Content path for `name`, routed into its category directory.
    pub fn content_path(&self, scope: &ArtifactScope, name: &str) -> Result<PathBuf, StoreError> {
        validate_component("artifact name", name)?;
        if name.ends_with(METADATA_SUFFIX) {
            return Err(StoreError::InvalidName {
                kind: "artifact name",
                value: name.to_string(),
            });
        }
        let category = ArtifactCategory::for_name(name);
        Ok(self.scope_dir(scope)?.join(category.dir_name()).join(name))
    }

    fn metadata_path(content_path: &Path) -> PathBuf {
        let mut os = content_path.as_os_str().to_os_string();
        os.push(METADATA_SUFFIX);
        PathBuf::from(os)
    }

    fn guess_content_type(name: &str) -> String {
        mime_guess::from_path(name)
            .first_or_octet_stream()
            .essence_str()
            .to_string()
    }
}

#[async_trait]
impl ArtifactStore for FileArtifactStore {
    async fn save(
        &self,
        scope: &ArtifactScope,
        name: &str,
        content: ArtifactContent,
        custom: Map<String, Value>,
    ) -> Result<u32, StoreError> {
        let path = self.content_path(scope, name)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::io(parent, e))?;
        }

        // Content first, then the sidecar.
        fs::write(&path, content.as_bytes())
            .await
            .map_err(|e| StoreError::io(&path, e))?;

        let metadata = ArtifactMetadata {
            application: scope.application.clone(),
            owner: scope.owner.clone(),
            name: name.to_string(),
            category: ArtifactCategory::for_name(name),
            content_type: Self::guess_content_type(name),
            size_bytes: content.len() as u64,
            is_text: content.is_text(),
            created_at: self.clock.now(),
            version: CURRENT_VERSION,
            custom,
        };
        let meta_path = Self::metadata_path(&path);
        let json = serde_json::to_vec_pretty(&metadata)
            .map_err(|e| StoreError::serialization(&meta_path, e))?;
        fs::write(&meta_path, json)
            .await
            .map_err(|e| StoreError::io(&meta_path, e))?;

        tracing::debug!(
            scope = %scope,
            artifact = name,
            category = %metadata.category,
            size = metadata.size_bytes,
            "saved artifact"
        );
        Ok(CURRENT_VERSION)
    }

    async fn load(
        &self,
        scope: &ArtifactScope,
        name: &str,
        version: Option<u32>,
    ) -> Result<Option<ArtifactContent>, StoreError> {
        if version.is_some_and(|v| v != CURRENT_VERSION) {
            return Ok(None);
        }
        let path = self.content_path(scope, name)?;
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(&path, e)),
        };

        // The sidecar may not exist yet right after a content write.
        let saved_as_text = match self.load_metadata(scope, name).await {
            Ok(Some(meta)) => meta.is_text,
            Ok(None) => true,
            Err(e) => {
                tracing::debug!(
                    scope = %scope,
                    artifact = name,
                    error = %e,
                    "ignoring unreadable artifact metadata"
                );
                true
            }
        };

        if saved_as_text {
            match String::from_utf8(bytes) {
                Ok(text) => Ok(Some(ArtifactContent::Text(text))),
                Err(e) => Ok(Some(ArtifactContent::Binary(e.into_bytes()))),
            }
        } else {
            Ok(Some(ArtifactContent::Binary(bytes)))
        }
    }

    async fn load_metadata(
        &self,
        scope: &ArtifactScope,
        name: &str,
    ) -> Result<Option<ArtifactMetadata>, StoreError> {
        let meta_path = Self::metadata_path(&self.content_path(scope, name)?);
        let raw = match fs::read(&meta_path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(&meta_path, e)),
        };
        let metadata =
            serde_json::from_slice(&raw).map_err(|e| StoreError::serialization(&meta_path, e))?;
        Ok(Some(metadata))
    }

    async fn list_keys(&self, scope: &ArtifactScope) -> Result<Vec<String>, StoreError> {
        let scope_dir = self.scope_dir(scope)?;
        let mut names = Vec::new();
        for category in ArtifactCategory::all() {
            let dir = scope_dir.join(category.dir_name());
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(StoreError::io(&dir, e)),
            };
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| StoreError::io(&dir, e))?
            {
                let name = entry.file_name().to_string_lossy().to_string();
                if name.ends_with(METADATA_SUFFIX) {
                    continue;
                }
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    async fn list_versions(
        &self,
        scope: &ArtifactScope,
        name: &str,
    ) -> Result<Vec<u32>, StoreError> {
        let path = self.content_path(scope, name)?;
        let exists = fs::try_exists(&path)
            .await
            .map_err(|e| StoreError::io(&path, e))?;
        Ok(if exists { vec![CURRENT_VERSION] } else { Vec::new() })
    }

    async fn delete(&self, scope: &ArtifactScope, name: &str) -> Result<bool, StoreError> {
        let path = self.content_path(scope, name)?;
        let removed = match fs::remove_file(&path).await {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => return Err(StoreError::io(&path, e)),
        };
        let meta_path = Self::metadata_path(&path);
        match fs::remove_file(&meta_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(StoreError::io(&meta_path, e)),
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn make_store() -> (FileArtifactStore, ArtifactScope, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = FileArtifactStore::new(dir.path().join("artifacts"));
        (store, ArtifactScope::new("app", "alice"), dir)
    }

    #[tokio::test]
    async fn test_report_lands_in_reports_and_round_trips() {
        let (store, scope, _dir) = make_store();
        let version = store
            .save(&scope, "report_abc.md", "# Report\n".into(), Map::new())
            .await
            .unwrap();
        assert_eq!(version, 1);

        let expected = store.root().join("app/alice/reports/report_abc.md");
        assert!(expected.exists());
        assert_eq!(std::fs::read(&expected).unwrap(), b"# Report\n");

        let loaded = store.load(&scope, "report_abc.md", None).await.unwrap();
        assert_eq!(loaded, Some(ArtifactContent::Text("# Report\n".to_string())));
        assert_eq!(
            store.list_versions(&scope, "report_abc.md").await.unwrap(),
            vec![1]
        );
    }

    #[tokio::test]
    async fn test_metadata_sidecar_contents() {
        let (store, scope, _dir) = make_store();
        let mut custom = Map::new();
        custom.insert("analysis_id".into(), json!("abc"));
        store
            .save(&scope, "analysis_abc_security_worker.json", "{}".into(), custom)
            .await
            .unwrap();

        let meta = store
            .load_metadata(&scope, "analysis_abc_security_worker.json")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(meta.category, ArtifactCategory::SubAgentOutputs);
        assert_eq!(meta.content_type, "application/json");
        assert_eq!(meta.size_bytes, 2);
        assert_eq!(meta.version, 1);
        assert_eq!(meta.custom["analysis_id"], json!("abc"));
    }

    #[tokio::test]
    async fn test_binary_round_trip() {
        let (store, scope, _dir) = make_store();
        let bytes = vec![0u8, 159, 146, 150, 255];
        store
            .save(&scope, "blob.bin", bytes.clone().into(), Map::new())
            .await
            .unwrap();
        let loaded = store.load(&scope, "blob.bin", None).await.unwrap();
        assert_eq!(loaded, Some(ArtifactContent::Binary(bytes)));
    }

    #[tokio::test]
    async fn test_load_tolerates_missing_metadata() {
        let (store, scope, _dir) = make_store();
        let path = store.content_path(&scope, "report_x.md").unwrap();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "partial").unwrap();

        assert!(store.load_metadata(&scope, "report_x.md").await.unwrap().is_none());
        let loaded = store.load(&scope, "report_x.md", None).await.unwrap();
        assert_eq!(loaded, Some(ArtifactContent::Text("partial".to_string())));
    }

    #[tokio::test]
    async fn test_unknown_version_is_absent() {
        let (store, scope, _dir) = make_store();
        store
            .save(&scope, "report_abc.md", "x".into(), Map::new())
            .await
            .unwrap();
        assert!(store.load(&scope, "report_abc.md", Some(1)).await.unwrap().is_some());
        assert!(store.load(&scope, "report_abc.md", Some(2)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_replace_overwrites_single_version() {
        let (store, scope, _dir) = make_store();
        store
            .save(&scope, "report_abc.md", "first".into(), Map::new())
            .await
            .unwrap();
        store
            .replace(&scope, "report_abc.md", "second".into(), Map::new())
            .await
            .unwrap();
        assert_eq!(
            store.load(&scope, "report_abc.md", None).await.unwrap(),
            Some(ArtifactContent::Text("second".to_string()))
        );
        assert_eq!(
            store.list_versions(&scope, "report_abc.md").await.unwrap(),
            vec![1]
        );
    }

    #[tokio::test]
    async fn test_list_keys_spans_categories_and_skips_sidecars() {
        let (store, scope, _dir) = make_store();
        for name in [
            "report_a.md",
            "code_input_a.txt",
            "analysis_a_quality_worker.json",
            "misc.txt",
        ] {
            store.save(&scope, name, "x".into(), Map::new()).await.unwrap();
        }
        let keys = store.list_keys(&scope).await.unwrap();
        assert_eq!(
            keys,
            vec![
                "analysis_a_quality_worker.json",
                "code_input_a.txt",
                "misc.txt",
                "report_a.md",
            ]
        );
        let other = ArtifactScope::new("app", "bob");
        assert!(store.list_keys(&other).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_and_delete_version() {
        let (store, scope, _dir) = make_store();
        store
            .save(&scope, "report_abc.md", "x".into(), Map::new())
            .await
            .unwrap();
        assert!(!store.delete_version(&scope, "report_abc.md", 7).await.unwrap());
        assert!(store.delete_version(&scope, "report_abc.md", 1).await.unwrap());
        assert!(store.load(&scope, "report_abc.md", None).await.unwrap().is_none());
        assert!(store.load_metadata(&scope, "report_abc.md").await.unwrap().is_none());
        assert!(store.list_versions(&scope, "report_abc.md").await.unwrap().is_empty());
        assert!(!store.delete(&scope, "report_abc.md").await.unwrap());
    }

    #[tokio::test]
    async fn test_rejects_bad_names() {
        let (store, scope, _dir) = make_store();
        for name in ["../escape", "a/b.txt", "", "x.meta.json"] {
            let result = store.save(&scope, name, "x".into(), Map::new()).await;
            assert!(matches!(result, Err(StoreError::InvalidName { .. })), "{}", name);
        }
    }
}
