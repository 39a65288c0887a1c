//! Application context.
//!
//! One explicit dependency struct built at startup and threaded through
//! handlers — the long-lived store clients, the pipeline services, and the
//! repositories. No process-wide singletons.

use std::sync::Arc;
use std::time::Duration;

use lattice_core::cache::QueryCache;
use lattice_core::channel::ChannelHub;
use lattice_core::compile::WorkflowCompiler;
use lattice_core::config::LatticeConfig;
use lattice_core::exec::{ExecutionManager, ExecutionStore};
use lattice_core::live::LiveDataPoller;
use lattice_core::ratelimit::RateLimiter;
use lattice_core::route::QueryRouter;
use lattice_core::schema::{CatalogService, SchemaEngine};
use lattice_core::store::{AnalyticalStore, FastStore, LiveStore, PointStore};
use lattice_error::{CoreError, Result};

use crate::repo::{self, ApiKeyRepo, DashboardRepo, WidgetRepo, WorkflowRepo};
use crate::widget_service::WidgetService;

/// Everything a handler can reach.
#[derive(Clone)]
pub struct AppContext {
    /// Application configuration.
    pub config:     Arc<LatticeConfig>,
    /// Fast store (cache, records, bus).
    pub fast:       FastStore,
    /// Analytical store client (health probes).
    pub analytical: Arc<AnalyticalStore>,
    /// Live store client (health probes).
    pub live:       Arc<LiveStore>,
    /// Workflow compiler.
    pub compiler:   WorkflowCompiler,
    /// Read-through query cache.
    pub cache:      Arc<QueryCache>,
    /// Execution manager.
    pub executions: Arc<ExecutionManager>,
    /// Live channel hub.
    pub hub:        Arc<ChannelHub>,
    /// Live-widget poller.
    pub poller:     Arc<LiveDataPoller>,
    /// Schema catalog service.
    pub catalog:    Arc<CatalogService>,
    /// Embed rate limiter.
    pub limiter:    Arc<RateLimiter>,
    /// Widget data service.
    pub widgets:    Arc<WidgetService>,
    /// Workflow repository.
    pub workflow_repo:  WorkflowRepo,
    /// Dashboard repository.
    pub dashboard_repo: DashboardRepo,
    /// Widget repository.
    pub widget_repo:    WidgetRepo,
    /// API key repository.
    pub api_key_repo:   ApiKeyRepo,
}

impl AppContext {
    /// Build the full context from configuration: connect the fast store,
    /// construct store clients and pools, and wire the pipeline services.
    ///
    /// # Errors
    ///
    /// Configuration and connection errors; the process should not start
    /// half-wired.
    pub async fn build(config: LatticeConfig) -> Result<Self> {
        let config = Arc::new(config);

        let fast = FastStore::connect(&config.fast_store_url).await.map_err(|e| {
            CoreError::config(format!("fast store unreachable at startup: {e}"))
        })?;

        let analytical = Arc::new(
            AnalyticalStore::new(&config.analytical).map_err(CoreError::from)?,
        );
        let live = Arc::new(LiveStore::new(&config.live).map_err(CoreError::from)?);
        let point = Arc::new(PointStore::new(fast.connection()));

        let relational = repo::build_pool(&config.relational_url, 16)?;
        let workflow_repo = WorkflowRepo::new(relational.clone());
        let dashboard_repo = DashboardRepo::new(relational.clone());
        let widget_repo = WidgetRepo::new(relational.clone());
        let api_key_repo = ApiKeyRepo::new(relational);

        let compiler = WorkflowCompiler::new(SchemaEngine::new());
        let router = Arc::new(
            QueryRouter::new(Arc::clone(&analytical), Arc::clone(&live), point)
                .with_budget(Duration::from_secs(config.widget_budget.max_execution_secs)),
        );

        let cache = Arc::new(QueryCache::new(
            compiler,
            Arc::clone(&router),
            fast.clone(),
            &config.namespace,
            config.cache_ttl,
            config.preview_budget,
            config.widget_budget,
        ));

        let hub = Arc::new(ChannelHub::new(&config.namespace, fast.clone()));
        let executions = Arc::new(ExecutionManager::new(
            compiler,
            Arc::clone(&router),
            Arc::clone(&hub),
            ExecutionStore::new(fast.clone(), &config.namespace),
        ));

        let catalog = Arc::new(CatalogService::new(
            Arc::clone(&analytical),
            Arc::clone(&live),
            fast.clone(),
            &config.namespace,
            config.cache_ttl.schema_secs,
        ));
        let limiter = Arc::new(RateLimiter::new(fast.clone(), &config.namespace, config.rate_limit));

        let widgets = Arc::new(WidgetService::new(
            Arc::clone(&cache),
            workflow_repo.clone(),
            widget_repo.clone(),
        ));
        let widget_source: Arc<dyn lattice_core::live::WidgetDataSource> = widgets.clone();
        let poller = Arc::new(LiveDataPoller::new(
            Arc::clone(&hub),
            widget_source,
            Duration::from_secs(config.live_poll_secs),
        ));

        Ok(Self {
            config,
            fast,
            analytical,
            live,
            compiler,
            cache,
            executions,
            hub,
            poller,
            catalog,
            limiter,
            widgets,
            workflow_repo,
            dashboard_repo,
            widget_repo,
            api_key_repo,
        })
    }
}
