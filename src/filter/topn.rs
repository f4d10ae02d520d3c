// SPDX-License-Identifier: Apache-2.0

//! Top N query filter
//!
//! Times each statement from request to reply and keeps the N slowest of a
//! session. When the session closes, a report is written to
//! `<filebase>.<n>`.

use std::fmt::Write as _;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use tracing::{debug, info};

use super::config::{
    session_file, FilterContext, FilterParams, PatternRules, SessionCounter, SessionScope,
};
use super::error::{FilterError, FilterResult};
use super::traits::{Filter, FilterSession};
use super::types::{ConnectionInfo, Flow, ModuleInfo, ModuleStatus, QueryMessage, ReplyMessage};

pub static MODULE: ModuleInfo = ModuleInfo {
    name: "topfilter",
    description: "A top N query logging filter",
    version: "V1.0.1",
    status: ModuleStatus::Ga,
};

const PARAMETERS: &[&str] = &["count", "filebase", "match", "exclude", "ignore", "source", "user"];

const DEFAULT_COUNT: usize = 10;

const RULE: &str =
    "-----------+-----------------------------------------------------------------\n";

/// One timed statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankedQuery {
    pub duration: Duration,
    pub sql: String,
}

/// The slowest statements seen so far, longest first
#[derive(Debug, Clone)]
pub struct TopNRanking {
    capacity: usize,
    entries: Vec<RankedQuery>,
}

impl TopNRanking {
    /// Entries grow one reply at a time, so nothing is reserved up front
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Vec::new(),
        }
    }

    /// Offers a timed statement; returns true if it was kept.
    ///
    /// When full, the statement replaces the shortest entry only if it took
    /// strictly longer.
    pub fn offer(&mut self, duration: Duration, sql: String) -> bool {
        if self.capacity == 0 {
            return false;
        }

        if self.entries.len() < self.capacity {
            self.entries.push(RankedQuery { duration, sql });
        } else {
            match self.entries.last_mut() {
                Some(last) if duration > last.duration => *last = RankedQuery { duration, sql },
                _ => return false,
            }
        }

        self.entries.sort_by(|a, b| b.duration.cmp(&a.duration));
        true
    }

    pub fn entries(&self) -> &[RankedQuery] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Seconds with the sub-millisecond part dropped
fn millis_secs(duration: Duration) -> f64 {
    duration.as_millis() as f64 / 1000.0
}

/// Top N instance
pub struct TopNFilter {
    count: usize,
    filebase: String,
    rules: PatternRules,
    scope: SessionScope,
    sessions: SessionCounter,
    ctx: FilterContext,
}

impl TopNFilter {
    pub fn new(params: &FilterParams, ctx: &FilterContext) -> FilterResult<Self> {
        params.check_params(PARAMETERS)?;
        let flags = params.pattern_flags()?;
        let count = params.parse::<usize>("count")?.unwrap_or(DEFAULT_COUNT);
        if count < 1 {
            return Err(FilterError::invalid_value("count", count.to_string()));
        }
        let filebase = params.filebase()?;
        let rules = PatternRules::from_params(params, flags)?;

        info!(count, "Top N filter reporting to {}.<n>", filebase);

        Ok(Self {
            count,
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

impl Filter for TopNFilter {
    fn module(&self) -> &'static ModuleInfo {
        &MODULE
    }

    fn attach(&self, connection: &ConnectionInfo) -> FilterResult<Box<dyn FilterSession>> {
        let path = session_file(&self.filebase, self.sessions.next());
        let active = self.scope.admits(connection);

        debug!(session = %connection.id, file = %path.display(), active, "Top N session attached");

        Ok(Box::new(TopNSession {
            path,
            active,
            rules: self.rules.clone(),
            ctx: self.ctx.clone(),
            connection: connection.clone(),
            ranking: TopNRanking::new(self.count),
            pending: None,
            statements: 0,
            total: Duration::ZERO,
            connected_at: self.ctx.clock.now(),
            started: self.ctx.clock.local_now(),
        }))
    }

    fn describe(&self, out: &mut String) {
        out.push_str(&format!("\t\tReport size            {}\n", self.count));
        if let Some(source) = self.scope.source() {
            out.push_str(&format!("\t\tLimit logging to connections from  {}\n", source));
        }
        if let Some(user) = self.scope.user() {
            out.push_str(&format!("\t\tLimit logging to user      {}\n", user));
        }
        if let Some(include) = self.rules.include() {
            out.push_str(&format!("\t\tInclude queries that match     {}\n", include));
        }
        if let Some(exclude) = self.rules.exclude() {
            out.push_str(&format!("\t\tExclude queries that match     {}\n", exclude));
        }
    }
}

/// Statement waiting for its reply
struct Pending {
    sql: String,
    started: Instant,
}

struct TopNSession {
    path: PathBuf,
    active: bool,
    rules: PatternRules,
    ctx: FilterContext,
    connection: ConnectionInfo,
    ranking: TopNRanking,
    pending: Option<Pending>,
    statements: u64,
    total: Duration,
    connected_at: Instant,
    started: DateTime<Local>,
}

impl TopNSession {
    fn report(&self, connected_for: Duration) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Top {} longest running queries in session.",
            self.ranking.capacity()
        );
        out.push_str("==========================================\n\n");
        out.push_str("Time (sec) | Query\n");
        out.push_str(RULE);
        for entry in self.ranking.entries() {
            let _ = writeln!(out, "{:10.3} |  {}", millis_secs(entry.duration), entry.sql);
        }
        out.push_str(RULE);

        let _ = writeln!(
            out,
            "\n\nSession started {}",
            self.started.format("%a %b %e %H:%M:%S %Y")
        );
        if let Some(remote) = &self.connection.remote {
            let _ = writeln!(out, "Connection from {}", remote);
        }
        if let Some(user) = &self.connection.user {
            let _ = writeln!(out, "Username        {}", user);
        }

        let divisor = self.statements.max(1) as f64;
        let _ = writeln!(out, "\nTotal of {} statements executed.", self.statements);
        let _ = writeln!(
            out,
            "Total statement execution time   {:9.3} seconds",
            millis_secs(self.total)
        );
        let _ = writeln!(
            out,
            "Average statement execution time {:9.3} seconds",
            millis_secs(self.total) / divisor
        );
        let _ = writeln!(
            out,
            "Total connection time            {:9.3} seconds",
            millis_secs(connected_for)
        );
        out
    }
}

impl FilterSession for TopNSession {
    fn route_query(&mut self, query: QueryMessage) -> Flow {
        if self.active {
            if let Some(sql) = self.ctx.extractor.extract_sql(query.payload()) {
                if self.rules.admits(&sql) {
                    // An unanswered statement is replaced
                    self.pending = Some(Pending {
                        sql,
                        started: self.ctx.clock.now(),
                    });
                }
            }
        }
        Flow::Forward(query)
    }

    fn wants_replies(&self) -> bool {
        true
    }

    fn client_reply(&mut self, reply: ReplyMessage) -> ReplyMessage {
        if let Some(pending) = self.pending.take() {
            let elapsed = self.ctx.clock.now().saturating_duration_since(pending.started);
            self.total += elapsed;
            self.statements += 1;
            self.ranking.offer(elapsed, pending.sql);
        }
        reply
    }

    fn close(&mut self) -> FilterResult<()> {
        if !self.active {
            return Ok(());
        }

        let connected_for = self.ctx.clock.now().saturating_duration_since(self.connected_at);
        fs::write(&self.path, self.report(connected_for))
            .map_err(|e| FilterError::output_file(self.path.display().to_string(), e.to_string()))?;

        debug!(session = %self.connection.id, file = %self.path.display(), statements = self.statements, "Top N report written");
        Ok(())
    }

    fn describe(&self, out: &mut String) {
        out.push_str(&format!("\t\tLogging to file {}.\n", self.path.display()));
        out.push_str(&format!("\t\tCurrent Top {}:\n", self.ranking.capacity()));
        for (place, entry) in self.ranking.entries().iter().enumerate() {
            out.push_str(&format!("\t\t{} place:\n", place + 1));
            out.push_str(&format!(
                "\t\t\tExecution time: {:.3} seconds\n",
                millis_secs(entry.duration)
            ));
            out.push_str(&format!("\t\t\tSQL: {}\n", entry.sql));
        }
    }
}
