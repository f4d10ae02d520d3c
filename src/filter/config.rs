// SPDX-License-Identifier: Apache-2.0

//! Filter configuration
//!
//! Parameters arrive as loose key/value pairs plus bare options. Each filter
//! validates them once at instance creation and keeps only compiled, owned
//! values afterwards.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use qore_sql::{MySqlExtractor, ParserClassifier, QueryClassifier, SqlExtractor};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Deserializer, Serialize};

use super::clock::{Clock, SystemClock};
use super::error::{FilterError, FilterResult};
use super::types::ConnectionInfo;

/// Parameters every filter accepts and ignores
const STANDARD_PARAMETERS: &[&str] = &["type", "module"];

/// Options and parameters for one filter instance
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterParams {
    /// Bare options such as `ignorecase`
    #[serde(default)]
    pub options: Vec<String>,
    /// Named parameters
    #[serde(default, deserialize_with = "deserialize_params")]
    pub params: BTreeMap<String, String>,
}

impl FilterParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.params.insert(name.into(), value.to_string());
        self
    }

    pub fn with_option(mut self, option: impl Into<String>) -> Self {
        self.options.push(option.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(|s| s.as_str())
    }

    /// Parses a parameter, failing on values that do not parse
    pub fn parse<T: FromStr>(&self, name: &str) -> FilterResult<Option<T>> {
        match self.get(name) {
            None => Ok(None),
            Some(raw) => raw
                .trim()
                .parse::<T>()
                .map(Some)
                .map_err(|_| FilterError::invalid_value(name, raw)),
        }
    }

    /// Rejects parameters outside `known` and the standard set
    pub fn check_params(&self, known: &[&str]) -> FilterResult<()> {
        for name in self.params.keys() {
            if !known.contains(&name.as_str()) && !STANDARD_PARAMETERS.contains(&name.as_str()) {
                return Err(FilterError::unexpected_parameter(name));
            }
        }
        Ok(())
    }

    /// Reads pattern options; later options override earlier ones
    pub fn pattern_flags(&self) -> FilterResult<PatternFlags> {
        let mut flags = PatternFlags::default();
        for option in &self.options {
            if option.eq_ignore_ascii_case("ignorecase") {
                flags.case_insensitive = true;
            } else if option.eq_ignore_ascii_case("case") {
                flags.case_insensitive = false;
            } else if option.eq_ignore_ascii_case("extended") {
                // Regex syntax is always extended
            } else {
                return Err(FilterError::unsupported_option(option));
            }
        }
        Ok(flags)
    }

    /// Output file base, required by filters that write files
    pub fn filebase(&self) -> FilterResult<String> {
        match self.get("filebase") {
            Some(base) if !base.is_empty() => Ok(base.to_string()),
            _ => Err(FilterError::missing_parameter("filebase")),
        }
    }
}

fn deserialize_params<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = BTreeMap::<String, serde_json::Value>::deserialize(deserializer)?;
    raw.into_iter()
        .map(|(name, value)| {
            let text = match value {
                serde_json::Value::String(s) => s,
                serde_json::Value::Number(n) => n.to_string(),
                serde_json::Value::Bool(b) => b.to_string(),
                other => {
                    return Err(<D::Error as serde::de::Error>::custom(format!(
                        "parameter '{}' must be a string, number or boolean, got {}",
                        name, other
                    )))
                }
            };
            Ok((name, text))
        })
        .collect()
}

/// Regular expression options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatternFlags {
    pub case_insensitive: bool,
}

impl Default for PatternFlags {
    fn default() -> Self {
        Self {
            case_insensitive: true,
        }
    }
}

/// A compiled pattern that remembers its source text
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    regex: Regex,
}

impl Pattern {
    pub fn compile(param: &str, source: &str, flags: PatternFlags) -> FilterResult<Self> {
        let regex = RegexBuilder::new(source)
            .case_insensitive(flags.case_insensitive)
            .build()
            .map_err(|e| FilterError::invalid_pattern(param, source, e.to_string()))?;

        Ok(Self {
            source: source.to_string(),
            regex,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Inclusion and exclusion patterns applied to statement text
#[derive(Debug, Clone, Default)]
pub struct PatternRules {
    include: Option<Pattern>,
    exclude: Option<Pattern>,
}

impl PatternRules {
    /// Builds rules from `match` and `exclude` (or its alias `ignore`)
    pub fn from_params(params: &FilterParams, flags: PatternFlags) -> FilterResult<Self> {
        let include = params
            .get("match")
            .map(|p| Pattern::compile("match", p, flags))
            .transpose()?;

        let exclude = match (params.get("exclude"), params.get("ignore")) {
            (Some(p), _) => Some(Pattern::compile("exclude", p, flags)?),
            (None, Some(p)) => Some(Pattern::compile("ignore", p, flags)?),
            (None, None) => None,
        };

        Ok(Self { include, exclude })
    }

    /// True if the text passes both patterns; absent patterns pass everything
    pub fn admits(&self, text: &str) -> bool {
        let included = self.include.as_ref().map_or(true, |p| p.is_match(text));
        let excluded = self.exclude.as_ref().map_or(false, |p| p.is_match(text));
        included && !excluded
    }

    pub fn include(&self) -> Option<&Pattern> {
        self.include.as_ref()
    }

    pub fn exclude(&self) -> Option<&Pattern> {
        self.exclude.as_ref()
    }
}

/// Restriction of a filter to one client address and/or user
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionScope {
    source: Option<String>,
    user: Option<String>,
}

impl SessionScope {
    pub fn from_params(params: &FilterParams) -> Self {
        Self {
            source: params.get("source").map(str::to_string),
            user: params.get("user").map(str::to_string),
        }
    }

    /// True unless a known client identity differs from a configured one.
    ///
    /// Comparison is exact; an empty or absent restriction admits everyone.
    pub fn admits(&self, connection: &ConnectionInfo) -> bool {
        let differs = |wanted: &Option<String>, actual: &Option<String>| match (wanted, actual) {
            (Some(wanted), Some(actual)) => !wanted.is_empty() && wanted != actual,
            _ => false,
        };

        !differs(&self.source, &connection.remote) && !differs(&self.user, &connection.user)
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }
}

/// Per-instance session index used to derive unique output file names
#[derive(Debug, Default)]
pub struct SessionCounter(AtomicU64);

impl SessionCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current index and advances it
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }

    /// Number of indexes handed out so far
    pub fn issued(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// `<filebase>.<index>`
pub fn session_file(filebase: &str, index: u64) -> PathBuf {
    PathBuf::from(format!("{}.{}", filebase, index))
}

/// External collaborators shared by all filters of a service
#[derive(Clone)]
pub struct FilterContext {
    pub clock: Arc<dyn Clock>,
    pub extractor: Arc<dyn SqlExtractor>,
    pub classifier: Arc<dyn QueryClassifier>,
}

impl FilterContext {
    pub fn new() -> Self {
        Self {
            clock: Arc::new(SystemClock::new()),
            extractor: Arc::new(MySqlExtractor::new()),
            classifier: Arc::new(ParserClassifier::new()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn SqlExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn QueryClassifier>) -> Self {
        self.classifier = classifier;
        self
    }
}

impl Default for FilterContext {
    fn default() -> Self {
        Self::new()
    }
}

/// One named filter in a service definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterDefinition {
    /// Name of this filter within the service
    pub name: String,
    /// Module implementing it, e.g. `qlafilter`
    pub module: String,
    #[serde(flatten)]
    pub params: FilterParams,
}

/// Filters of one service, in chain order from client to backend
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDefinition {
    #[serde(default)]
    pub filters: Vec<FilterDefinition>,
}

impl ServiceDefinition {
    pub fn from_json(content: &str) -> FilterResult<Self> {
        serde_json::from_str(content).map_err(|e| FilterError::definition(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unknown_parameter() {
        let params = FilterParams::new()
            .with_param("filebase", "/tmp/q")
            .with_param("colour", "red");
        let err = params.check_params(&["filebase"]).unwrap_err();
        assert_eq!(err, FilterError::unexpected_parameter("colour"));
    }

    #[test]
    fn accepts_standard_parameters() {
        let params = FilterParams::new()
            .with_param("type", "filter")
            .with_param("module", "qlafilter");
        assert!(params.check_params(&[]).is_ok());
    }

    #[test]
    fn parse_rejects_garbage() {
        let params = FilterParams::new().with_param("count", "ten");
        let err = params.parse::<u64>("count").unwrap_err();
        assert_eq!(err, FilterError::invalid_value("count", "ten"));
        assert_eq!(params.parse::<u64>("time").unwrap(), None);
    }

    #[test]
    fn options_toggle_case_sensitivity() {
        let flags = FilterParams::new().pattern_flags().unwrap();
        assert!(flags.case_insensitive);

        let flags = FilterParams::new()
            .with_option("CASE")
            .pattern_flags()
            .unwrap();
        assert!(!flags.case_insensitive);

        let flags = FilterParams::new()
            .with_option("case")
            .with_option("ignorecase")
            .with_option("extended")
            .pattern_flags()
            .unwrap();
        assert_eq!(flags, PatternFlags::default());

        let err = FilterParams::new()
            .with_option("multiline")
            .pattern_flags()
            .unwrap_err();
        assert_eq!(err, FilterError::unsupported_option("multiline"));
    }

    #[test]
    fn missing_filebase() {
        assert_eq!(
            FilterParams::new().filebase().unwrap_err(),
            FilterError::missing_parameter("filebase")
        );
    }

    #[test]
    fn rules_apply_match_and_exclude() {
        let params = FilterParams::new()
            .with_param("match", "select")
            .with_param("exclude", "secret");
        let rules = PatternRules::from_params(&params, PatternFlags::default()).unwrap();

        assert!(rules.admits("SELECT * FROM t"));
        assert!(!rules.admits("SELECT * FROM secret"));
        assert!(!rules.admits("INSERT INTO t VALUES (1)"));
    }

    #[test]
    fn ignore_is_an_alias_for_exclude() {
        let params = FilterParams::new().with_param("ignore", "^update");
        let rules = PatternRules::from_params(&params, PatternFlags::default()).unwrap();
        assert_eq!(rules.exclude().map(Pattern::source), Some("^update"));
        assert!(!rules.admits("UPDATE t SET a = 1"));
        assert!(rules.admits("DELETE FROM t"));
    }

    #[test]
    fn case_sensitive_rules() {
        let flags = PatternFlags {
            case_insensitive: false,
        };
        let params = FilterParams::new().with_param("match", "select");
        let rules = PatternRules::from_params(&params, flags).unwrap();
        assert!(!rules.admits("SELECT 1"));
        assert!(rules.admits("select 1"));
    }

    #[test]
    fn invalid_pattern_names_parameter() {
        let params = FilterParams::new().with_param("match", "(unclosed");
        let err = PatternRules::from_params(&params, PatternFlags::default()).unwrap_err();
        assert!(matches!(err, FilterError::InvalidPattern { ref param, .. } if param == "match"));
    }

    #[test]
    fn scope_requires_exact_match() {
        let params = FilterParams::new()
            .with_param("source", "10.0.0.1")
            .with_param("user", "app");
        let scope = SessionScope::from_params(&params);

        assert!(scope.admits(&ConnectionInfo::new("10.0.0.1", "app")));
        assert!(!scope.admits(&ConnectionInfo::new("10.0.0.10", "app")));
        assert!(!scope.admits(&ConnectionInfo::new("10.0.0.1", "admin")));
        assert!(scope.admits(&ConnectionInfo::anonymous()));
    }

    #[test]
    fn counter_reads_then_increments() {
        let counter = SessionCounter::new();
        assert_eq!(counter.next(), 0);
        assert_eq!(counter.next(), 1);
        assert_eq!(counter.issued(), 2);
        assert_eq!(session_file("/tmp/qla", 1), PathBuf::from("/tmp/qla.1"));
    }

    #[test]
    fn definition_accepts_numeric_params() {
        let json = r#"{
            "filters": [
                { "name": "top", "module": "topfilter", "options": ["case"],
                  "params": { "filebase": "/tmp/top", "count": 5 } }
            ]
        }"#;
        let def = ServiceDefinition::from_json(json).unwrap();
        let filter = &def.filters[0];
        assert_eq!(filter.module, "topfilter");
        assert_eq!(filter.params.get("count"), Some("5"));
        assert_eq!(filter.params.options, vec!["case".to_string()]);
    }

    #[test]
    fn definition_rejects_nested_params() {
        let json = r#"{ "filters": [ { "name": "q", "module": "qlafilter",
                        "params": { "filebase": ["a"] } } ] }"#;
        let err = ServiceDefinition::from_json(json).unwrap_err();
        assert!(err.is_config());
    }
}
