//! Server test utilities.

use std::sync::Arc;
use tempfile::TempDir;
use viewfinder_core::StaticHiddenContent;
use viewfinder_core::config::{AppConfig, MetadataConfig};
use viewfinder_metadata::{MetadataStore, SqliteStore};
use viewfinder_server::{AppState, create_router};
use viewfinder_upstream::ScriptedSource;

/// Page size served by the scripted upstream unless a test overrides it.
pub const DEFAULT_PAGE_SIZE: usize = 30;

/// A test server wrapper with all dependencies.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    pub upstream: Arc<ScriptedSource>,
    pub hidden: Arc<StaticHiddenContent>,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    /// Create a new test server with a temporary SQLite store.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a test server with custom config modifications.
    pub async fn with_config<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        Self::build(DEFAULT_PAGE_SIZE, modifier).await
    }

    /// Create a test server whose upstream serves `page_size` photos per page.
    pub async fn with_page_size<F>(page_size: usize, modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        Self::build(page_size, modifier).await
    }

    async fn build<F>(page_size: usize, modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");

        let db_path = temp_dir.path().join("metadata.db");
        let metadata: Arc<dyn MetadataStore> = Arc::new(
            SqliteStore::new(&db_path, None)
                .await
                .expect("Failed to create metadata store"),
        );

        let upstream = Arc::new(ScriptedSource::new(page_size));
        let hidden = Arc::new(StaticHiddenContent::new());

        let mut config = AppConfig::for_testing();
        config.metadata = MetadataConfig::Sqlite {
            path: db_path,
            query_timeout_secs: None,
        };
        modifier(&mut config);

        let state = AppState::new(config, metadata, upstream.clone(), hidden.clone())
            .expect("Failed to create app state");
        let router = create_router(state.clone());

        Self {
            router,
            state,
            upstream,
            hidden,
            _temp_dir: temp_dir,
        }
    }

    /// Get access to the underlying metadata.
    pub fn metadata(&self) -> Arc<dyn MetadataStore> {
        self.state.metadata.clone()
    }
}
