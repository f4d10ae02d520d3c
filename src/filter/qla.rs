// SPDX-License-Identifier: Apache-2.0

//! Query Log All filter
//!
//! Writes every statement of a session to its own file, one line per
//! statement: `YYYY-MM-DD HH:MM:SS,<user>@<remote>,<sql>`.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;

use qore_sql::normalize_whitespace;
use tracing::{debug, info, warn};

use super::config::{
    session_file, FilterContext, FilterParams, PatternRules, SessionCounter, SessionScope,
};
use super::error::{FilterError, FilterResult};
use super::traits::{Filter, FilterSession};
use super::types::{ConnectionInfo, Flow, ModuleInfo, ModuleStatus, QueryMessage};

pub static MODULE: ModuleInfo = ModuleInfo {
    name: "qlafilter",
    description: "A simple query logging filter",
    version: "V1.1.1",
    status: ModuleStatus::Ga,
};

const PARAMETERS: &[&str] = &["match", "exclude", "ignore", "source", "user", "filebase"];

/// Timestamp layout of a log line
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Query logger instance
pub struct QueryLogFilter {
    filebase: String,
    rules: PatternRules,
    scope: SessionScope,
    sessions: SessionCounter,
    ctx: FilterContext,
}

impl QueryLogFilter {
    pub fn new(params: &FilterParams, ctx: &FilterContext) -> FilterResult<Self> {
        params.check_params(PARAMETERS)?;
        let flags = params.pattern_flags()?;
        let filebase = params.filebase()?;
        let rules = PatternRules::from_params(params, flags)?;

        info!("Query logger writing to {}.<n>", filebase);

        Ok(Self {
            filebase,
            rules,
            scope: SessionScope::from_params(params),
            sessions: SessionCounter::new(),
            ctx: ctx.clone(),
        })
    }

    pub fn create(params: &FilterParams, ctx: &FilterContext) -> FilterResult<Arc<dyn Filter>> {
        Ok(Arc::new(Self::new(params, ctx)?))
    }
}

impl Filter for QueryLogFilter {
    fn module(&self) -> &'static ModuleInfo {
        &MODULE
    }

    fn attach(&self, connection: &ConnectionInfo) -> FilterResult<Box<dyn FilterSession>> {
        let path = session_file(&self.filebase, self.sessions.next());
        let active = self.scope.admits(connection);

        let writer = if active {
            let file = File::create(&path)
                .map_err(|e| FilterError::output_file(path.display().to_string(), e.to_string()))?;
            Some(BufWriter::new(file))
        } else {
            None
        };

        debug!(session = %connection.id, file = %path.display(), active, "Query logger session attached");

        Ok(Box::new(QueryLogSession {
            path,
            writer,
            rules: self.rules.clone(),
            connection: connection.clone(),
            ctx: self.ctx.clone(),
        }))
    }

    fn describe(&self, out: &mut String) {
        if let Some(source) = self.scope.source() {
            out.push_str(&format!("\t\tLimit logging to connections from \t{}\n", source));
        }
        if let Some(user) = self.scope.user() {
            out.push_str(&format!("\t\tLimit logging to user\t\t{}\n", user));
        }
        if let Some(include) = self.rules.include() {
            out.push_str(&format!("\t\tInclude queries that match\t\t{}\n", include));
        }
        if let Some(exclude) = self.rules.exclude() {
            out.push_str(&format!("\t\tExclude queries that match\t\t{}\n", exclude));
        }
    }
}

/// Per-connection query log
struct QueryLogSession {
    path: PathBuf,
    /// Open only for active sessions
    writer: Option<BufWriter<File>>,
    rules: PatternRules,
    connection: ConnectionInfo,
    ctx: FilterContext,
}

impl QueryLogSession {
    fn log(&mut self, sql: &str) {
        let Some(writer) = self.writer.as_mut() else {
            return;
        };

        let line = format!(
            "{},{}@{},{}\n",
            self.ctx.clock.local_now().format(TIMESTAMP_FORMAT),
            self.connection.user(),
            self.connection.remote(),
            normalize_whitespace(sql)
        );

        if let Err(e) = writer.write_all(line.as_bytes()) {
            warn!(file = %self.path.display(), "Failed to write query log line: {}", e);
        }
    }
}

impl FilterSession for QueryLogSession {
    fn route_query(&mut self, query: QueryMessage) -> Flow {
        if self.writer.is_some() && self.ctx.extractor.is_sql(query.payload()) {
            if let Some(sql) = self.ctx.extractor.extract_sql(query.payload()) {
                if self.rules.admits(&sql) {
                    self.log(&sql);
                }
            }
        }
        Flow::Forward(query)
    }

    fn close(&mut self) -> FilterResult<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
            debug!(session = %self.connection.id, file = %self.path.display(), "Query log closed");
        }
        Ok(())
    }

    fn describe(&self, out: &mut String) {
        if self.writer.is_some() {
            out.push_str(&format!("\t\tLogging to file {}.\n", self.path.display()));
        }
    }
}
