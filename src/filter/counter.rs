// SPDX-License-Identifier: Apache-2.0

//! Query counting filter
//!
//! Counts the SQL statements of each session and the sessions of the
//! instance. Everything is forwarded unchanged.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::config::{FilterContext, FilterParams};
use super::error::FilterResult;
use super::traits::{Filter, FilterSession};
use super::types::{ConnectionInfo, Flow, ModuleInfo, ModuleStatus, QueryMessage};

pub static MODULE: ModuleInfo = ModuleInfo {
    name: "testfilter",
    description: "A simple query counting filter",
    version: "V1.0.0",
    status: ModuleStatus::Beta,
};

pub struct QueryCounterFilter {
    sessions: AtomicU64,
    ctx: FilterContext,
}

impl QueryCounterFilter {
    pub fn new(params: &FilterParams, ctx: &FilterContext) -> FilterResult<Self> {
        params.check_params(&[])?;
        params.pattern_flags()?;
        Ok(Self {
            sessions: AtomicU64::new(0),
            ctx: ctx.clone(),
        })
    }

    pub fn create(params: &FilterParams, ctx: &FilterContext) -> FilterResult<Arc<dyn Filter>> {
        Ok(Arc::new(Self::new(params, ctx)?))
    }

    pub fn sessions(&self) -> u64 {
        self.sessions.load(Ordering::Relaxed)
    }
}

impl Filter for QueryCounterFilter {
    fn module(&self) -> &'static ModuleInfo {
        &MODULE
    }

    fn attach(&self, _connection: &ConnectionInfo) -> FilterResult<Box<dyn FilterSession>> {
        self.sessions.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(QueryCounterSession {
            queries: 0,
            ctx: self.ctx.clone(),
        }))
    }

    fn describe(&self, out: &mut String) {
        out.push_str(&format!("\t\tNo. of sessions created: {}\n", self.sessions()));
    }
}

struct QueryCounterSession {
    queries: u64,
    ctx: FilterContext,
}

impl FilterSession for QueryCounterSession {
    fn route_query(&mut self, query: QueryMessage) -> Flow {
        if self.ctx.extractor.is_sql(query.payload()) {
            self.queries += 1;
        }
        Flow::Forward(query)
    }

    fn describe(&self, out: &mut String) {
        out.push_str(&format!("\t\tNo. of queries routed by filter: {}\n", self.queries));
    }
}
