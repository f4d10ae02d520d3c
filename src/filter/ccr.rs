// SPDX-License-Identifier: Apache-2.0

//! Consistent Critical Read filter
//!
//! After a statement that may modify data, routes the following reads of the
//! same session to the master: the next `count` statements, and every
//! statement within `time` seconds of the modification. Anything that is not
//! a plain SELECT counts as a modification, including statements the
//! classifier cannot identify.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use super::config::{FilterContext, FilterParams, PatternRules, SessionScope};
use super::error::FilterResult;
use super::traits::{Filter, FilterSession};
use super::types::{ConnectionInfo, Flow, ModuleInfo, ModuleStatus, QueryMessage, RoutingHint};

pub static MODULE: ModuleInfo = ModuleInfo {
    name: "ccrfilter",
    description: "A routing hint filter that send queries to the master after data modification",
    version: "V1.1.0",
    status: ModuleStatus::Ga,
};

const PARAMETERS: &[&str] = &["count", "time", "match", "exclude", "ignore", "source", "user"];

const DEFAULT_COUNT: u64 = 0;
const DEFAULT_TIME_SECS: u64 = 60;

/// Running totals shared by all sessions of an instance
#[derive(Debug, Default)]
pub struct CcrStats {
    modifications: AtomicU64,
    hints_by_count: AtomicU64,
    hints_by_time: AtomicU64,
}

impl CcrStats {
    pub fn modifications(&self) -> u64 {
        self.modifications.load(Ordering::Relaxed)
    }

    pub fn hints_by_count(&self) -> u64 {
        self.hints_by_count.load(Ordering::Relaxed)
    }

    pub fn hints_by_time(&self) -> u64 {
        self.hints_by_time.load(Ordering::Relaxed)
    }
}

/// Routing hysteresis instance
pub struct CcrFilter {
    count: u64,
    time: Duration,
    rules: PatternRules,
    scope: SessionScope,
    stats: Arc<CcrStats>,
    ctx: FilterContext,
}

impl CcrFilter {
    pub fn new(params: &FilterParams, ctx: &FilterContext) -> FilterResult<Self> {
        params.check_params(PARAMETERS)?;
        let flags = params.pattern_flags()?;
        let count = params.parse::<u64>("count")?.unwrap_or(DEFAULT_COUNT);
        let time = params.parse::<u64>("time")?.unwrap_or(DEFAULT_TIME_SECS);
        let rules = PatternRules::from_params(params, flags)?;

        info!(count, time, "Consistent read filter created");

        Ok(Self {
            count,
            time: Duration::from_secs(time),
            rules,
            scope: SessionScope::from_params(params),
            stats: Arc::new(CcrStats::default()),
            ctx: ctx.clone(),
        })
    }

    pub fn create(params: &FilterParams, ctx: &FilterContext) -> FilterResult<Arc<dyn Filter>> {
        Ok(Arc::new(Self::new(params, ctx)?))
    }

    pub fn stats(&self) -> &CcrStats {
        &self.stats
    }
}

impl Filter for CcrFilter {
    fn module(&self) -> &'static ModuleInfo {
        &MODULE
    }

    fn attach(&self, connection: &ConnectionInfo) -> FilterResult<Box<dyn FilterSession>> {
        Ok(Box::new(CcrSession {
            active: self.scope.admits(connection),
            count: self.count,
            time: self.time,
            rules: self.rules.clone(),
            stats: Arc::clone(&self.stats),
            ctx: self.ctx.clone(),
            hints_left: 0,
            last_modification: None,
            connection: connection.clone(),
        }))
    }

    fn describe(&self, out: &mut String) {
        out.push_str(&format!("Configuration:\n\tCount: {}\n", self.count));
        out.push_str(&format!("\tTime: {} seconds\n", self.time.as_secs()));
        if let Some(include) = self.rules.include() {
            out.push_str(&format!("\tMatch regex: {}\n", include));
        }
        if let Some(exclude) = self.rules.exclude() {
            out.push_str(&format!("\tExclude regex: {}\n", exclude));
        }

        out.push_str("\nStatistics:\n");
        out.push_str(&format!("\tNo. of data modifications: {}\n", self.stats.modifications()));
        out.push_str(&format!(
            "\tNo. of hints added based on count: {}\n",
            self.stats.hints_by_count()
        ));
        out.push_str(&format!(
            "\tNo. of hints added based on time: {}\n",
            self.stats.hints_by_time()
        ));
    }
}

struct CcrSession {
    active: bool,
    count: u64,
    time: Duration,
    rules: PatternRules,
    stats: Arc<CcrStats>,
    ctx: FilterContext,
    hints_left: u64,
    /// Unset until the first counted modification
    last_modification: Option<Instant>,
    connection: ConnectionInfo,
}

impl CcrSession {
    fn within_window(&self, now: Instant) -> bool {
        self.last_modification
            .map_or(false, |at| now.saturating_duration_since(at) < self.time)
    }
}

impl FilterSession for CcrSession {
    fn route_query(&mut self, mut query: QueryMessage) -> Flow {
        if !self.active || !self.ctx.extractor.is_sql(query.payload()) {
            return Flow::Forward(query);
        }
        let Some(sql) = self.ctx.extractor.extract_sql(query.payload()) else {
            return Flow::Forward(query);
        };

        let now = self.ctx.clock.now();
        if !self.ctx.classifier.operation(&sql).is_read() {
            if self.rules.admits(&sql) {
                self.hints_left = self.count;
                self.last_modification = Some(now);
                self.stats.modifications.fetch_add(1, Ordering::Relaxed);
            }
        } else if self.hints_left > 0 {
            query.add_hint(RoutingHint::RouteToMaster);
            self.hints_left -= 1;
            self.stats.hints_by_count.fetch_add(1, Ordering::Relaxed);
            debug!(session = %self.connection.id, hints_left = self.hints_left, "Read forced to master by count");
        } else if self.within_window(now) {
            query.add_hint(RoutingHint::RouteToMaster);
            self.stats.hints_by_time.fetch_add(1, Ordering::Relaxed);
            debug!(session = %self.connection.id, "Read forced to master by time");
        }

        Flow::Forward(query)
    }

    fn describe(&self, out: &mut String) {
        out.push_str(&format!("\tHints remaining: {}\n", self.hints_left));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::clock::ManualClock;
    use crate::filter::error::FilterError;
    use crate::filter::traits::diagnostic;
    use qore_sql::NullClassifier;

    fn setup(params: FilterParams) -> (CcrFilter, ManualClock) {
        let clock = ManualClock::new();
        let ctx = FilterContext::new().with_clock(Arc::new(clock.clone()));
        (CcrFilter::new(&params, &ctx).unwrap(), clock)
    }

    fn forced(session: &mut Box<dyn FilterSession>, sql: &str) -> bool {
        match session.route_query(QueryMessage::sql(sql)) {
            Flow::Forward(query) => query.has_hint(&RoutingHint::RouteToMaster),
            Flow::Terminate => panic!("ccr never terminates"),
        }
    }

    #[test]
    fn count_then_time_window() {
        let (filter, clock) = setup(FilterParams::new().with_param("count", 2).with_param("time", 60));
        let mut session = filter.attach(&ConnectionInfo::anonymous()).unwrap();

        assert!(!forced(&mut session, "INSERT INTO t VALUES (1)"));
        assert!(forced(&mut session, "SELECT * FROM t"));
        assert!(forced(&mut session, "SELECT * FROM t"));
        clock.advance(Duration::from_secs(10));
        assert!(forced(&mut session, "SELECT * FROM t"));

        assert_eq!(filter.stats().modifications(), 1);
        assert_eq!(filter.stats().hints_by_count(), 2);
        assert_eq!(filter.stats().hints_by_time(), 1);
    }

    #[test]
    fn read_after_window_is_not_forced() {
        let (filter, clock) = setup(FilterParams::new());
        let mut session = filter.attach(&ConnectionInfo::anonymous()).unwrap();

        assert!(!forced(&mut session, "UPDATE t SET a = 1"));
        clock.advance(Duration::from_secs(61));
        assert!(!forced(&mut session, "SELECT a FROM t"));
    }

    #[test]
    fn default_window_forces_reads_within_sixty_seconds() {
        let (filter, clock) = setup(FilterParams::new());
        let mut session = filter.attach(&ConnectionInfo::anonymous()).unwrap();

        assert!(!forced(&mut session, "SELECT 1"));
        assert!(!forced(&mut session, "DELETE FROM t"));
        clock.advance(Duration::from_secs(59));
        assert!(forced(&mut session, "SELECT 1"));
        assert_eq!(filter.stats().hints_by_count(), 0);
    }

    #[test]
    fn count_one_time_zero_forces_exactly_one_read() {
        let (filter, _clock) =
            setup(FilterParams::new().with_param("count", 1).with_param("time", 0));
        let mut session = filter.attach(&ConnectionInfo::anonymous()).unwrap();

        assert!(!forced(&mut session, "INSERT INTO t VALUES (1)"));
        assert!(forced(&mut session, "SELECT * FROM t"));
        assert!(!forced(&mut session, "SELECT * FROM t"));
        assert!(!forced(&mut session, "SELECT * FROM t"));
    }

    #[test]
    fn unclassified_statements_count_as_modifications() {
        let clock = ManualClock::new();
        let ctx = FilterContext::new()
            .with_clock(Arc::new(clock.clone()))
            .with_classifier(Arc::new(NullClassifier));
        let params = FilterParams::new().with_param("count", 1).with_param("time", 0);
        let filter = CcrFilter::new(&params, &ctx).unwrap();
        let mut session = filter.attach(&ConnectionInfo::anonymous()).unwrap();

        assert!(!forced(&mut session, "SELECT 1"));
        assert!(!forced(&mut session, "SELECT 2"));
        assert_eq!(filter.stats().modifications(), 2);
    }

    #[test]
    fn excluded_modifications_do_not_open_the_window() {
        let (filter, _clock) = setup(
            FilterParams::new()
                .with_param("count", 3)
                .with_param("ignore", "audit_log"),
        );
        let mut session = filter.attach(&ConnectionInfo::anonymous()).unwrap();

        assert!(!forced(&mut session, "INSERT INTO audit_log VALUES (1)"));
        assert!(!forced(&mut session, "SELECT * FROM t"));
        assert_eq!(filter.stats().modifications(), 0);
    }

    #[test]
    fn match_limits_counted_modifications() {
        let (filter, _clock) = setup(
            FilterParams::new()
                .with_param("count", 1)
                .with_param("time", 0)
                .with_param("match", "orders"),
        );
        let mut session = filter.attach(&ConnectionInfo::anonymous()).unwrap();

        assert!(!forced(&mut session, "UPDATE customers SET a = 1"));
        assert!(!forced(&mut session, "SELECT 1"));
        assert!(!forced(&mut session, "UPDATE orders SET a = 1"));
        assert!(forced(&mut session, "SELECT 1"));
    }

    #[test]
    fn non_sql_messages_pass_untouched() {
        let (filter, _clock) = setup(FilterParams::new().with_param("count", 5));
        let mut session = filter.attach(&ConnectionInfo::anonymous()).unwrap();

        assert!(!forced(&mut session, "INSERT INTO t VALUES (1)"));
        let ping = QueryMessage::new(vec![1u8, 0, 0, 0, 0x0e]);
        assert_eq!(session.route_query(ping.clone()), Flow::Forward(ping));
        assert_eq!(filter.stats().hints_by_count(), 0);
    }

    #[test]
    fn existing_hints_are_kept_in_order() {
        let (filter, _clock) = setup(FilterParams::new().with_param("count", 1));
        let mut session = filter.attach(&ConnectionInfo::anonymous()).unwrap();
        session.route_query(QueryMessage::sql("INSERT INTO t VALUES (1)"));

        let mut query = QueryMessage::sql("SELECT 1");
        query.add_hint(RoutingHint::RouteToNamedServer("db2".to_string()));
        let Flow::Forward(query) = session.route_query(query) else {
            panic!("expected forward");
        };
        assert_eq!(
            query.hints(),
            &[
                RoutingHint::RouteToNamedServer("db2".to_string()),
                RoutingHint::RouteToMaster
            ]
        );
    }

    #[test]
    fn invalid_numbers_are_rejected() {
        let ctx = FilterContext::new();
        let err = CcrFilter::new(&FilterParams::new().with_param("time", "soon"), &ctx)
            .err()
            .unwrap();
        assert_eq!(err, FilterError::invalid_value("time", "soon"));
        assert!(err.is_config());
    }

    #[test]
    fn describes_configuration_and_statistics() {
        let (filter, _clock) = setup(
            FilterParams::new()
                .with_param("count", 3)
                .with_param("match", "orders"),
        );
        let mut session = filter.attach(&ConnectionInfo::anonymous()).unwrap();
        session.route_query(QueryMessage::sql("DELETE FROM orders"));

        let text = diagnostic(&filter, Some(session.as_ref()));
        assert!(text.starts_with("Configuration:\n\tCount: 3\n\tTime: 60 seconds\n"));
        assert!(text.contains("\tMatch regex: orders\n"));
        assert!(text.contains("\tNo. of data modifications: 1\n"));
        assert!(text.contains("\tHints remaining: 3\n"));
    }
}
