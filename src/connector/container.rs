use std::sync::Arc;

use anyhow::Result;
use tracing::debug;

use crate::application::{
    ChatClient, ChunkerService, DeleteRepositoryUseCase, DocumentStore, EmbeddingService,
    ExploreStructureUseCase, FetchSourceUseCase, IngestRepositoryUseCase,
    ListRepositoriesUseCase, Orchestrator, SearchCodeUseCase,
};
use crate::connector::adapter::{
    HttpChatClient, HttpEmbedding, MemoryDocumentStore, MockChatClient, MockEmbedding,
    OpenSearchStore, TreeSitterChunker,
};
use crate::domain::EngineConfig;

pub struct ContainerConfig {
    pub engine: EngineConfig,
    /// Use deterministic mock LLM and embedding backends (offline mode).
    pub mock_backends: bool,
    /// Use the in-memory store instead of OpenSearch.
    pub memory_store: bool,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            mock_backends: true,
            memory_store: true,
        }
    }
}

/// Application context: adapters and use cases are constructed once here and
/// injected; nothing in the core reaches for globals.
pub struct Container {
    config: Arc<EngineConfig>,
    store: Arc<dyn DocumentStore>,
    orchestrator: Arc<Orchestrator>,
    search: Arc<SearchCodeUseCase>,
    list_repositories: Arc<ListRepositoriesUseCase>,
    explore: Arc<ExploreStructureUseCase>,
    fetch_source: Arc<FetchSourceUseCase>,
    delete_repository: Arc<DeleteRepositoryUseCase>,
}

impl Container {
    pub async fn new(container_config: ContainerConfig) -> Result<Self> {
        let config = Arc::new(container_config.engine);

        let chunker: Arc<dyn ChunkerService> = Arc::new(TreeSitterChunker::new());

        let (chat, embedding): (Arc<dyn ChatClient>, Arc<dyn EmbeddingService>) =
            if container_config.mock_backends {
                debug!("Using mock chat and embedding backends");
                (
                    Arc::new(MockChatClient::new()),
                    Arc::new(MockEmbedding::with_dimensions(config.embed_dims)),
                )
            } else {
                debug!("Using HTTP chat and embedding backends");
                (
                    Arc::new(HttpChatClient::from_env()),
                    Arc::new(HttpEmbedding::from_env(config.embed_dims)),
                )
            };

        let store: Arc<dyn DocumentStore> = if container_config.memory_store {
            debug!("Using in-memory document store");
            Arc::new(MemoryDocumentStore::new())
        } else {
            Arc::new(OpenSearchStore::from_env(config.embed_dims).await?)
        };

        let ingest = Arc::new(IngestRepositoryUseCase::new(
            Arc::clone(&store),
            chunker,
            chat,
            Arc::clone(&embedding),
            Arc::clone(&config),
        ));
        let orchestrator = Arc::new(Orchestrator::new(ingest, &config));
        let search = Arc::new(SearchCodeUseCase::new(
            Arc::clone(&store),
            embedding,
            Arc::clone(&config),
        ));
        let list_repositories = Arc::new(ListRepositoriesUseCase::new(Arc::clone(&store)));
        let explore = Arc::new(ExploreStructureUseCase::new(Arc::clone(&store)));
        let fetch_source = Arc::new(FetchSourceUseCase::new(Arc::clone(&config)));
        let delete_repository = Arc::new(DeleteRepositoryUseCase::new(Arc::clone(&store)));

        Ok(Self {
            config,
            store,
            orchestrator,
            search,
            list_repositories,
            explore,
            fetch_source,
            delete_repository,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<dyn DocumentStore> {
        Arc::clone(&self.store)
    }

    pub fn orchestrator(&self) -> Arc<Orchestrator> {
        Arc::clone(&self.orchestrator)
    }

    pub fn search(&self) -> Arc<SearchCodeUseCase> {
        Arc::clone(&self.search)
    }

    pub fn list_repositories(&self) -> Arc<ListRepositoriesUseCase> {
        Arc::clone(&self.list_repositories)
    }

    pub fn explore(&self) -> Arc<ExploreStructureUseCase> {
        Arc::clone(&self.explore)
    }

    pub fn fetch_source(&self) -> Arc<FetchSourceUseCase> {
        Arc::clone(&self.fetch_source)
    }

    pub fn delete_repository(&self) -> Arc<DeleteRepositoryUseCase> {
        Arc::clone(&self.delete_repository)
    }
}
