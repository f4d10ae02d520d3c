// SPDX-License-Identifier: Apache-2.0

//! Filter Chain
//!
//! Composes the sessions of one client connection into a pipeline:
//! 1. Requests enter at the client end and pass every stage in order, then
//!    reach the router.
//! 2. Replies pass the reply-observing stages in reverse order, then reach the
//!    client. Stages without reply interest are not visited at all.
//!
//! Links are fixed when the chain is built and never reassigned.

use std::sync::Arc;

use tracing::{debug, error, info_span, Span};

use super::error::{FilterError, FilterResult};
use super::traits::{diagnostic, Downstream, Filter, FilterSession, Upstream};
use super::types::{ConnectionInfo, Delivery, Flow, QueryMessage, ReplyMessage};

/// One attached filter session and the instance it belongs to
struct Stage {
    name: String,
    filter: Arc<dyn Filter>,
    session: Box<dyn FilterSession>,
}

/// The processing pipeline of one client connection
pub struct FilterChain {
    connection: ConnectionInfo,
    stages: Vec<Stage>,
    /// Indexes of reply-observing stages, nearest the backend first
    reply_path: Vec<usize>,
    router: Box<dyn Downstream>,
    client: Option<Box<dyn Upstream>>,
    /// Carries the session id of the connection
    span: Span,
    closed: bool,
}

impl FilterChain {
    pub fn builder(connection: ConnectionInfo) -> FilterChainBuilder {
        FilterChainBuilder {
            connection,
            filters: Vec::new(),
            router: None,
            client: None,
        }
    }

    pub fn connection(&self) -> &ConnectionInfo {
        &self.connection
    }

    /// Names of the stages, client end first
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name.as_str()).collect()
    }

    /// Passes a request through every stage to the router
    pub fn route_query(&mut self, query: QueryMessage) -> FilterResult<Delivery> {
        let _enter = self.span.enter();
        let mut query = query;
        for stage in self.stages.iter_mut() {
            match stage.session.route_query(query) {
                Flow::Forward(next) => query = next,
                Flow::Terminate => {
                    debug!(stage = %stage.name, "Stage terminated the connection");
                    return Ok(Delivery::Terminated {
                        stage: stage.name.clone(),
                    });
                }
            }
        }

        self.router.route_query(query)?;
        Ok(Delivery::Routed)
    }

    /// Passes a reply through the reply-observing stages to the client.
    ///
    /// Fails with `Unwired` if the chain was built without a client.
    pub fn client_reply(&mut self, reply: ReplyMessage) -> FilterResult<()> {
        let _enter = self.span.enter();
        let mut reply = reply;
        for &index in &self.reply_path {
            reply = self.stages[index].session.client_reply(reply);
        }

        match self.client.as_mut() {
            Some(client) => client.client_reply(reply),
            None => Err(FilterError::unwired(
                "replies were never wired for this chain; build it with a client",
            )),
        }
    }

    /// Closes every session, client end first.
    ///
    /// All sessions are closed even if some fail; the first failure is
    /// returned. Closing twice is a no-op.
    pub fn close(&mut self) -> FilterResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let _enter = self.span.enter();

        let mut first_error = None;
        for stage in self.stages.iter_mut() {
            if let Err(e) = stage.session.close() {
                error!(stage = %stage.name, "Failed to close filter session: {}", e);
                first_error.get_or_insert(e);
            }
        }

        debug!("Filter chain closed");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Diagnostics of every stage with its live session
    pub fn diagnostics(&self) -> String {
        let mut out = String::new();
        for stage in &self.stages {
            out.push_str(&format!(
                "Filter: {} (module {})\n",
                stage.name,
                stage.filter.module().name
            ));
            out.push_str(&diagnostic(stage.filter.as_ref(), Some(stage.session.as_ref())));
        }
        out
    }
}

impl Drop for FilterChain {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Wires a [`FilterChain`] together
pub struct FilterChainBuilder {
    connection: ConnectionInfo,
    filters: Vec<(String, Arc<dyn Filter>)>,
    router: Option<Box<dyn Downstream>>,
    client: Option<Box<dyn Upstream>>,
}

impl FilterChainBuilder {
    /// Appends a filter on the backend side of those already added
    pub fn stage(mut self, name: impl Into<String>, filter: Arc<dyn Filter>) -> Self {
        self.filters.push((name.into(), filter));
        self
    }

    /// Sets the component receiving requests after the last stage
    pub fn router(mut self, router: Box<dyn Downstream>) -> Self {
        self.router = Some(router);
        self
    }

    /// Sets the component receiving replies after the first stage
    pub fn client(mut self, client: Box<dyn Upstream>) -> Self {
        self.client = Some(client);
        self
    }

    /// Attaches every filter to the connection and links the stages.
    ///
    /// Fails without creating a chain if the router is missing, if a stage
    /// needs replies but no client is set, or if any session cannot be
    /// attached. Sessions attached before a failure are closed again.
    ///
    /// A chain without reply-observing stages may omit the client; such a
    /// chain only routes requests and rejects replies.
    pub fn build(self) -> FilterResult<FilterChain> {
        let span = info_span!("filter_chain", session = %self.connection.id);
        let entered = span.enter();

        let router = self
            .router
            .ok_or_else(|| FilterError::unwired("no router after the last stage"))?;

        let mut stages: Vec<Stage> = Vec::with_capacity(self.filters.len());
        for (name, filter) in self.filters {
            match filter.attach(&self.connection) {
                Ok(session) => stages.push(Stage {
                    name,
                    filter,
                    session,
                }),
                Err(e) => {
                    error!(stage = %name, "Failed to attach filter session: {}", e);
                    close_all(&mut stages);
                    return Err(e);
                }
            }
        }

        let reply_path: Vec<usize> = (0..stages.len())
            .rev()
            .filter(|&i| stages[i].session.wants_replies())
            .collect();

        if !reply_path.is_empty() && self.client.is_none() {
            close_all(&mut stages);
            return Err(FilterError::unwired(format!(
                "stage '{}' observes replies but no client is set",
                stages[reply_path[0]].name
            )));
        }

        debug!(
            stages = stages.len(),
            reply_stages = reply_path.len(),
            "Filter chain built"
        );
        drop(entered);

        Ok(FilterChain {
            connection: self.connection,
            stages,
            reply_path,
            router,
            client: self.client,
            span,
            closed: false,
        })
    }
}

fn close_all(stages: &mut [Stage]) {
    for stage in stages.iter_mut() {
        if let Err(e) = stage.session.close() {
            error!(stage = %stage.name, "Failed to close filter session: {}", e);
        }
    }
}
