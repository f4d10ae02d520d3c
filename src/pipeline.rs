// SPDX-License-Identifier: Apache-2.0

//! Filter Pipeline
//!
//! Holds the configured filters of one service and opens a chain of their
//! sessions for each client connection:
//! 1. Configuration: build every filter instance of a service definition
//! 2. Connection: attach the instances in order and wire router and client

use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::filter::{
    diagnostic, ConnectionInfo, Downstream, Filter, FilterChain, FilterContext, FilterError,
    FilterRegistry, FilterResult, ServiceDefinition, Upstream,
};

/// A configured filter with its name in the service
struct ConfiguredFilter {
    name: String,
    filter: Arc<dyn Filter>,
}

struct PipelineState {
    definition: ServiceDefinition,
    filters: Vec<ConfiguredFilter>,
}

/// The filters of one service
pub struct FilterPipeline {
    registry: FilterRegistry,
    ctx: FilterContext,
    state: RwLock<PipelineState>,
}

impl FilterPipeline {
    /// Creates an empty pipeline with the built-in modules
    pub fn new(ctx: FilterContext) -> Self {
        Self::with_registry(FilterRegistry::with_builtin(), ctx)
    }

    pub fn with_registry(registry: FilterRegistry, ctx: FilterContext) -> Self {
        Self {
            registry,
            ctx,
            state: RwLock::new(PipelineState {
                definition: ServiceDefinition::default(),
                filters: Vec::new(),
            }),
        }
    }

    /// Load a service definition from a JSON file
    ///
    /// A missing file leaves the pipeline as it is.
    pub fn load_config(&self, path: &Path) -> FilterResult<()> {
        if !path.exists() {
            debug!("No filter definition found at {:?}, keeping current filters", path);
            return Ok(());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| FilterError::definition(format!("Failed to read {:?}: {}", path, e)))?;
        let definition = ServiceDefinition::from_json(&content)?;

        self.configure(definition)?;

        info!("Loaded filter definition from {:?}", path);
        Ok(())
    }

    /// Save the current service definition to a JSON file
    pub fn save_config(&self, path: &Path) -> FilterResult<()> {
        let definition = self.state.read().definition.clone();
        let content = serde_json::to_string_pretty(&definition)
            .map_err(|e| FilterError::definition(e.to_string()))?;

        std::fs::write(path, content)?;

        debug!("Saved filter definition to {:?}", path);
        Ok(())
    }

    /// Replace all filters with those of the definition
    ///
    /// Every instance is built before anything is replaced; on failure the
    /// current filters stay in place.
    pub fn configure(&self, definition: ServiceDefinition) -> FilterResult<()> {
        let mut filters: Vec<ConfiguredFilter> = Vec::with_capacity(definition.filters.len());

        for def in &definition.filters {
            if filters.iter().any(|f| f.name == def.name) {
                return Err(FilterError::DuplicateFilter {
                    name: def.name.clone(),
                });
            }

            let filter = self.registry.create(&def.module, &def.params, &self.ctx)?;
            filters.push(ConfiguredFilter {
                name: def.name.clone(),
                filter,
            });
        }

        info!("Configured {} filter(s)", filters.len());

        let mut state = self.state.write();
        state.definition = definition;
        state.filters = filters;
        Ok(())
    }

    /// Names of the configured filters, client end first
    pub fn filter_names(&self) -> Vec<String> {
        self.state.read().filters.iter().map(|f| f.name.clone()).collect()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Filter>> {
        self.state
            .read()
            .filters
            .iter()
            .find(|f| f.name == name)
            .map(|f| Arc::clone(&f.filter))
    }

    pub fn definition(&self) -> ServiceDefinition {
        self.state.read().definition.clone()
    }

    pub fn registry(&self) -> &FilterRegistry {
        &self.registry
    }

    pub fn context(&self) -> &FilterContext {
        &self.ctx
    }

    /// Open the filter chain of a new client connection
    pub fn open_chain(
        &self,
        connection: ConnectionInfo,
        router: Box<dyn Downstream>,
        client: Option<Box<dyn Upstream>>,
    ) -> FilterResult<FilterChain> {
        let mut builder = FilterChain::builder(connection);
        {
            let state = self.state.read();
            for configured in &state.filters {
                builder = builder.stage(configured.name.clone(), Arc::clone(&configured.filter));
            }
        }

        builder = builder.router(router);
        if let Some(client) = client {
            builder = builder.client(client);
        }
        builder.build()
    }

    /// Instance-level diagnostics of every configured filter
    pub fn describe(&self) -> String {
        let state = self.state.read();
        let mut out = String::new();
        for configured in &state.filters {
            out.push_str(&format!(
                "Filter: {} (module {})\n",
                configured.name,
                configured.filter.module().name
            ));
            out.push_str(&diagnostic(configured.filter.as_ref(), None));
        }
        out
    }
}
