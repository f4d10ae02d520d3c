// SPDX-License-Identifier: Apache-2.0

//! Filter Registry
//!
//! Maps module names to the factories that build filter instances.
//! Each service owns its own registry; there is no process-wide state.

use std::collections::HashMap;
use std::sync::Arc;

use super::config::{FilterContext, FilterParams};
use super::error::{FilterError, FilterResult};
use super::traits::Filter;
use super::types::ModuleInfo;
use super::{ccr, counter, qla, topn};

/// Builds a filter instance from its parameters
pub type FilterFactory = fn(&FilterParams, &FilterContext) -> FilterResult<Arc<dyn Filter>>;

struct Module {
    info: &'static ModuleInfo,
    factory: FilterFactory,
}

/// Registry of available filter modules
pub struct FilterRegistry {
    modules: HashMap<&'static str, Module>,
}

impl FilterRegistry {
    /// Creates a new empty registry
    pub fn new() -> Self {
        Self {
            modules: HashMap::new(),
        }
    }

    /// Creates a registry with the modules shipped in this crate
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(&qla::MODULE, qla::QueryLogFilter::create);
        registry.register(&ccr::MODULE, ccr::CcrFilter::create);
        registry.register(&topn::MODULE, topn::TopNFilter::create);
        registry.register(&counter::MODULE, counter::QueryCounterFilter::create);
        registry
    }

    /// Registers a module, replacing any module of the same name
    pub fn register(&mut self, info: &'static ModuleInfo, factory: FilterFactory) {
        self.modules.insert(info.name, Module { info, factory });
    }

    /// Builds an instance of the named module
    pub fn create(
        &self,
        module: &str,
        params: &FilterParams,
        ctx: &FilterContext,
    ) -> FilterResult<Arc<dyn Filter>> {
        let entry = self
            .modules
            .get(module)
            .ok_or_else(|| FilterError::unknown_module(module))?;
        (entry.factory)(params, ctx)
    }

    pub fn get(&self, module: &str) -> Option<&'static ModuleInfo> {
        self.modules.get(module).map(|m| m.info)
    }

    /// Lists registered modules sorted by name
    pub fn list(&self) -> Vec<&'static ModuleInfo> {
        let mut infos: Vec<&'static ModuleInfo> = self.modules.values().map(|m| m.info).collect();
        infos.sort_by(|a, b| a.name.cmp(b.name));
        infos
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

impl Default for FilterRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}
