// SPDX-License-Identifier: Apache-2.0

//! Filter trait definitions
//!
//! A [`Filter`] is the shared, immutable-after-construction instance of one
//! configured filter. Each client connection attaches to it and gets its own
//! [`FilterSession`], owned exclusively by that connection's chain.

use crate::filter::error::FilterResult;
use crate::filter::types::{ConnectionInfo, Flow, ModuleInfo, QueryMessage, ReplyMessage};

/// A configured filter instance shared by all sessions of a service
pub trait Filter: Send + Sync {
    /// Returns the module this instance was created from
    fn module(&self) -> &'static ModuleInfo;

    /// Creates the per-connection session state
    ///
    /// Fails with a resource error when the session cannot be set up, in which
    /// case nothing is attached for this connection.
    fn attach(&self, connection: &ConnectionInfo) -> FilterResult<Box<dyn FilterSession>>;

    /// Appends a human-readable snapshot of the instance configuration and
    /// counters
    fn describe(&self, out: &mut String);
}

/// Diagnostics for a filter instance and, if given, one of its live sessions
pub fn diagnostic(filter: &dyn Filter, session: Option<&dyn FilterSession>) -> String {
    let mut out = String::new();
    filter.describe(&mut out);
    if let Some(session) = session {
        session.describe(&mut out);
    }
    out
}

/// Per-connection filter state
///
/// Sessions run on the single task that owns their connection, so they take
/// `&mut self` and need no locking of their own.
pub trait FilterSession: Send {
    /// Inspects a request on its way to the backend
    fn route_query(&mut self, query: QueryMessage) -> Flow;

    /// Returns true if this session must see replies
    ///
    /// Sessions that return false are skipped on the reply path.
    fn wants_replies(&self) -> bool {
        false
    }

    /// Inspects a reply on its way to the client
    fn client_reply(&mut self, reply: ReplyMessage) -> ReplyMessage {
        reply
    }

    /// Releases session resources; called exactly once when the connection ends
    fn close(&mut self) -> FilterResult<()> {
        Ok(())
    }

    /// Appends session-level diagnostics
    fn describe(&self, out: &mut String);
}

/// Receives requests leaving the far end of a chain
pub trait Downstream: Send {
    fn route_query(&mut self, query: QueryMessage) -> FilterResult<()>;
}

/// Receives replies leaving the near end of a chain
pub trait Upstream: Send {
    fn client_reply(&mut self, reply: ReplyMessage) -> FilterResult<()>;
}
