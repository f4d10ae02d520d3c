// SPDX-License-Identifier: Apache-2.0

//! Query filter core
//!
//! Filters sit between a client connection and the router. Every request
//! passes each filter session in turn; replies come back through the
//! sessions that asked to see them.

pub mod ccr;
pub mod chain;
pub mod clock;
pub mod config;
pub mod counter;
pub mod endpoints;
pub mod error;
pub mod qla;
pub mod registry;
pub mod topn;
pub mod traits;
pub mod types;

pub use ccr::{CcrFilter, CcrStats};
pub use chain::{FilterChain, FilterChainBuilder};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    FilterContext, FilterDefinition, FilterParams, PatternFlags, PatternRules, ServiceDefinition,
    SessionScope,
};
pub use counter::QueryCounterFilter;
pub use endpoints::{NullClient, NullRouter};
pub use error::{FilterError, FilterResult};
pub use qla::QueryLogFilter;
pub use registry::{FilterFactory, FilterRegistry};
pub use topn::{RankedQuery, TopNFilter, TopNRanking};
pub use traits::{diagnostic, Downstream, Filter, FilterSession, Upstream};
pub use types::{
    ConnectionInfo, Delivery, Flow, ModuleInfo, ModuleStatus, QueryMessage, ReplyMessage,
    RoutingHint, SessionId,
};
