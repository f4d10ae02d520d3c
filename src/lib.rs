// SPDX-License-Identifier: Apache-2.0

// QoreProxy - query filters for a database proxy
// Core library

pub mod filter;
pub mod observability;
pub mod pipeline;

pub use filter::{
    ConnectionInfo, Delivery, Filter, FilterChain, FilterContext, FilterError, FilterRegistry,
    FilterResult, FilterSession, QueryMessage, ReplyMessage, RoutingHint, ServiceDefinition,
};
pub use pipeline::FilterPipeline;
