//! Widget data service.
//!
//! Resolves a widget to its source workflow (tenant-checked on both hops),
//! overlays the widget's config onto the source node, and serves the data
//! through the cache-and-execute layer. Also the poller's data source for
//! live-mode widgets.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use uuid::Uuid;

use lattice_core::cache::{CachePath, QueryCache, QueryRequest, QueryResponse};
use lattice_core::graph::WorkflowGraph;
use lattice_core::live::WidgetDataSource;
use lattice_error::{CoreError, Result};

use crate::repo::{WidgetRepo, WorkflowRepo};

/// Rows fetched per poll tick for live-mode widgets.
const LIVE_POLL_LIMIT: u64 = 100;

/// Paging and runtime filters for a widget data read.
#[derive(Debug, Clone)]
pub struct WidgetQuery {
    /// Page offset.
    pub offset:        u64,
    /// Page limit.
    pub limit:         u64,
    /// Runtime filters (`column -> value`).
    pub filter_params: Option<Map<String, Value>>,
}

impl Default for WidgetQuery {
    fn default() -> Self {
        Self {
            offset:        0,
            limit:         1_000,
            filter_params: None,
        }
    }
}

/// Serves widget data with caching.
pub struct WidgetService {
    cache:     Arc<QueryCache>,
    workflows: WorkflowRepo,
    widgets:   WidgetRepo,
}

impl WidgetService {
    /// Create the service.
    #[must_use]
    pub fn new(cache: Arc<QueryCache>, workflows: WorkflowRepo, widgets: WidgetRepo) -> Self {
        Self {
            cache,
            workflows,
            widgets,
        }
    }

    /// Fetch data for a widget, resolving and tenant-checking both the
    /// widget and its source workflow.
    ///
    /// # Errors
    ///
    /// `NotFound` for absent or cross-tenant widgets/workflows, plus the
    /// cache layer's compile and router errors.
    pub async fn fetch_data(
        &self,
        tenant_id: Uuid,
        widget_id: Uuid,
        query: WidgetQuery,
    ) -> Result<QueryResponse> {
        let widget = self
            .widgets
            .get(tenant_id, widget_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Widget"))?;

        let workflow = self
            .workflows
            .get(tenant_id, widget.source_workflow_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Source workflow"))?;

        let graph = WorkflowGraph::parse(&workflow.graph)?;
        let overrides = widget.config_overrides.as_object().filter(|o| !o.is_empty()).cloned();

        let request = QueryRequest {
            tenant_id,
            target_node_id: widget.source_node_id.clone(),
            graph,
            config_overrides: overrides,
            filter_params: query.filter_params,
            offset: query.offset,
            limit: query.limit,
        };
        self.cache.fetch(CachePath::Widget, &request).await
    }
}

#[async_trait]
impl WidgetDataSource for WidgetService {
    async fn fetch(&self, tenant_id: Uuid, widget_id: Uuid) -> Result<Value> {
        let response = self
            .fetch_data(tenant_id, widget_id, WidgetQuery {
                limit: LIVE_POLL_LIMIT,
                ..WidgetQuery::default()
            })
            .await?;
        let mut value = serde_json::to_value(response)?;
        // The poller publishes only on content change; timing and cache
        // provenance vary per tick and must not defeat the hash compare.
        if let Some(object) = value.as_object_mut() {
            object.remove("execution_ms");
            object.remove("cache_hit");
        }
        Ok(value)
    }
}
