// SPDX-License-Identifier: Apache-2.0

//! Filter Types
//!
//! Messages, routing hints and connection identity passed through the chain.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a client connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of the client behind a connection, captured once at attach time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub id: SessionId,
    /// Remote address of the client
    #[serde(default)]
    pub remote: Option<String>,
    /// Authenticated user name
    #[serde(default)]
    pub user: Option<String>,
}

impl ConnectionInfo {
    pub fn new(remote: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            id: SessionId::new(),
            remote: Some(remote.into()),
            user: Some(user.into()),
        }
    }

    /// Connection whose client identity is not known
    pub fn anonymous() -> Self {
        Self {
            id: SessionId::new(),
            remote: None,
            user: None,
        }
    }

    pub fn remote(&self) -> &str {
        self.remote.as_deref().unwrap_or("")
    }

    pub fn user(&self) -> &str {
        self.user.as_deref().unwrap_or("")
    }
}

/// Routing instruction attached to a request for the router
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingHint {
    /// Send to the primary backend
    RouteToMaster,
    /// Send to any replica
    RouteToSlave,
    /// Send to the named backend server
    RouteToNamedServer(String),
}

/// A client request travelling toward the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryMessage {
    payload: Bytes,
    hints: Vec<RoutingHint>,
}

impl QueryMessage {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            hints: Vec::new(),
        }
    }

    /// Builds a `COM_QUERY` request for the given SQL text
    pub fn sql(sql: &str) -> Self {
        Self::new(qore_sql::mysql::encode_query(sql))
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    pub fn hints(&self) -> &[RoutingHint] {
        &self.hints
    }

    /// Appends a hint after any already present
    pub fn add_hint(&mut self, hint: RoutingHint) {
        self.hints.push(hint);
    }

    pub fn has_hint(&self, hint: &RoutingHint) -> bool {
        self.hints.contains(hint)
    }
}

/// A backend reply travelling toward the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyMessage {
    payload: Bytes,
}

impl ReplyMessage {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }
}

/// What a session does with a request it was handed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flow {
    /// Pass the (possibly annotated) request to the next stage
    Forward(QueryMessage),
    /// Stop processing and terminate the connection
    Terminate,
}

/// Outcome of routing a request through a whole chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// The request reached the router
    Routed,
    /// A stage terminated the connection
    Terminated { stage: String },
}

/// Module maturity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleStatus {
    InDevelopment,
    Alpha,
    Beta,
    Ga,
    Experimental,
}

/// Static description of a filter module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ModuleInfo {
    pub name: &'static str,
    pub description: &'static str,
    pub version: &'static str,
    pub status: ModuleStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hints_keep_insertion_order() {
        let mut msg = QueryMessage::sql("SELECT 1");
        msg.add_hint(RoutingHint::RouteToNamedServer("db1".to_string()));
        msg.add_hint(RoutingHint::RouteToMaster);
        assert_eq!(
            msg.hints(),
            &[
                RoutingHint::RouteToNamedServer("db1".to_string()),
                RoutingHint::RouteToMaster
            ]
        );
        assert!(msg.has_hint(&RoutingHint::RouteToMaster));
        assert!(!msg.has_hint(&RoutingHint::RouteToSlave));
    }

    #[test]
    fn anonymous_connection_has_empty_identity() {
        let conn = ConnectionInfo::anonymous();
        assert_eq!(conn.remote(), "");
        assert_eq!(conn.user(), "");
    }
}
