// SPDX-License-Identifier: Apache-2.0

//! Terminal stages that accept and discard traffic.
//!
//! Both keep a count that can be read through a shared handle after the
//! endpoint has been moved into a chain.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::error::FilterResult;
use super::traits::{Downstream, Upstream};
use super::types::{QueryMessage, ReplyMessage, RoutingHint};

/// Router that discards requests
#[derive(Debug, Clone, Default)]
pub struct NullRouter {
    routed: Arc<AtomicU64>,
    forced_to_master: Arc<AtomicU64>,
}

impl NullRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests received
    pub fn routed(&self) -> u64 {
        self.routed.load(Ordering::Relaxed)
    }

    /// Requests received with a route-to-master hint
    pub fn forced_to_master(&self) -> u64 {
        self.forced_to_master.load(Ordering::Relaxed)
    }
}

impl Downstream for NullRouter {
    fn route_query(&mut self, query: QueryMessage) -> FilterResult<()> {
        self.routed.fetch_add(1, Ordering::Relaxed);
        if query.has_hint(&RoutingHint::RouteToMaster) {
            self.forced_to_master.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }
}

/// Client that discards replies
#[derive(Debug, Clone, Default)]
pub struct NullClient {
    replies: Arc<AtomicU64>,
}

impl NullClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replies(&self) -> u64 {
        self.replies.load(Ordering::Relaxed)
    }
}

impl Upstream for NullClient {
    fn client_reply(&mut self, _reply: ReplyMessage) -> FilterResult<()> {
        self.replies.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
