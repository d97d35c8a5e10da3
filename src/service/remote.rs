//! Remote SPARQL backend.
//!
//! Every operation becomes one query built from a fixed template plus a
//! rendered condition block. Results go through the [`QueryCache`] first;
//! a miss hits the endpoint, which may answer 429 any number of times
//! before it answers for real.
//!
//! ## Rate limiting
//!
//! The delay starts at `initial_backoff`. On every 429 the `retry-after`
//! seconds (when given) and then `backoff_step` are added to it, and the
//! client sleeps that long before reissuing the identical request. There is
//! no attempt limit; callers bound the total time with a deadline.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, HeaderMap, RETRY_AFTER, USER_AGENT};
use reqwest::{Client as HttpClient, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::cache::{DEFAULT_HOT_CAPACITY, QueryCache};
use super::{GraphService, NeighbourQuery};
use crate::model::{
    EntityId, NeighbourRecord, RelationCondition, Term, is_qualifier_artifact, last_segment,
    render_conditions,
};
use crate::{Error, Result};

/// Public Wikidata query service.
pub const WIKIDATA_SPARQL_URL: &str = "https://query.wikidata.org/sparql";

/// Cache namespace for raw endpoint answers.
const CACHE_FUNCTION: &str = "execute_sparql_request";

const PREFIXES: &str = "PREFIX wdt: <http://www.wikidata.org/prop/direct/>\n\
                        PREFIX wd: <http://www.wikidata.org/entity/>";

// entity as subject or object; `?object wdt:P31 ?smth` keeps item-valued objects only
const ALL_HOPS_TEMPLATE: &str = "<PREFIXES>
SELECT DISTINCT ?property ?object
WHERE {
    {?object ?property wd:<ENTITY>} UNION {wd:<ENTITY> ?property ?object}.
    ?object wdt:P31 ?smth.
    <CONDITIONS>
}";

const DIRECT_TEMPLATE: &str = "<PREFIXES>
SELECT DISTINCT ?property ?object
WHERE {
    wd:<ENTITY> ?property ?object.
    ?object wdt:P31 ?smth.
    <CONDITIONS>
}";

const COUNT_MATCHES_TEMPLATE: &str = "<PREFIXES>
SELECT ?object (COUNT(?object) as ?matched)
WHERE {
    <CONDITIONS>
    VALUES ?object { <CANDIDATES> }
}
GROUP BY ?object";

// ============================================================================
// Configuration
// ============================================================================

/// Backoff schedule for 429 responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub initial_backoff: Duration,
    pub backoff_step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(200),
            backoff_step: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt, given the delay used so far and the
    /// server's `retry-after` hint in seconds.
    pub fn next_delay(&self, current: Duration, retry_after: Option<u64>) -> Duration {
        let hinted = retry_after.map(Duration::from_secs).unwrap_or_default();
        current + hinted + self.backoff_step
    }
}

/// Settings for [`RemoteGraphService`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub endpoint: String,
    pub user_agent: String,
    /// `None` disables the on-disk cache.
    pub cache_dir: Option<PathBuf>,
    /// Query results kept in memory in front of `cache_dir`.
    pub hot_cache_capacity: u64,
    pub timeout_secs: Option<u64>,
    pub initial_backoff_ms: u64,
    pub backoff_step_ms: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        Self {
            endpoint: WIKIDATA_SPARQL_URL.to_string(),
            user_agent: concat!("kgqa-signatures/", env!("CARGO_PKG_VERSION")).to_string(),
            cache_dir: Some(QueryCache::default_root()),
            hot_cache_capacity: DEFAULT_HOT_CAPACITY,
            timeout_secs: None,
            initial_backoff_ms: retry.initial_backoff.as_millis() as u64,
            backoff_step_ms: retry.backoff_step.as_millis() as u64,
        }
    }
}

impl RemoteConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            backoff_step: Duration::from_millis(self.backoff_step_ms),
        }
    }
}

// ============================================================================
// Wire types
// ============================================================================

/// One cell of a SPARQL JSON result row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingValue {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub value: String,
}

/// A result row: variable name → value.
pub type Binding = HashMap<String, BindingValue>;

// ============================================================================
// RemoteGraphService
// ============================================================================

/// `GraphService` backed by a SPARQL endpoint.
#[derive(Clone)]
pub struct RemoteGraphService {
    http: HttpClient,
    endpoint: String,
    user_agent: String,
    cache: Option<Arc<QueryCache>>,
    retry: RetryPolicy,
}

impl std::fmt::Debug for RemoteGraphService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteGraphService")
            .field("endpoint", &self.endpoint)
            .field("cache", &self.cache.as_ref().map(|c| c.root().to_path_buf()))
            .field("retry", &self.retry)
            .finish()
    }
}

impl RemoteGraphService {
    /// Uncached client with default retry policy.
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        Self::from_config(&RemoteConfig {
            endpoint: endpoint.into(),
            cache_dir: None,
            ..RemoteConfig::default()
        })
    }

    pub fn from_config(config: &RemoteConfig) -> Result<Self> {
        let mut builder = HttpClient::builder();
        if let Some(secs) = config.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let http = builder
            .build()
            .map_err(|e| Error::Config(format!("cannot build HTTP client: {e}")))?;

        Ok(Self {
            http,
            endpoint: config.endpoint.clone(),
            user_agent: config.user_agent.clone(),
            cache: config
                .cache_dir
                .as_ref()
                .map(|dir| Arc::new(QueryCache::with_capacity(dir, config.hot_cache_capacity))),
            retry: config.retry_policy(),
        })
    }

    /// Share an existing cache (one per process).
    pub fn with_cache(mut self, cache: Arc<QueryCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn cache(&self) -> Option<&Arc<QueryCache>> {
        self.cache.as_ref()
    }

    // ========================================================================
    // Query execution
    // ========================================================================

    /// Run `query`, consulting the cache first.
    pub async fn execute(&self, query: &str) -> Result<Vec<Binding>> {
        if let Some(cache) = &self.cache {
            if let Some(bindings) = cache.get::<Vec<Binding>>(CACHE_FUNCTION, query).await {
                return Ok(bindings);
            }
        }

        let bindings = self.fetch(query).await?;

        if let Some(cache) = &self.cache {
            if let Err(e) = cache.put(CACHE_FUNCTION, query, &bindings).await {
                warn!(error = %e, "Failed to persist query result");
            }
        }
        Ok(bindings)
    }

    /// One logical request against the endpoint, retrying through 429s.
    async fn fetch(&self, query: &str) -> Result<Vec<Binding>> {
        info!(endpoint = %self.endpoint, query, "Send request to SPARQL endpoint");

        let mut delay = self.retry.initial_backoff;
        let response = loop {
            let response = self.send(query).await?;
            if response.status() != StatusCode::TOO_MANY_REQUESTS {
                break response;
            }

            let retry_after = parse_retry_after(response.headers());
            delay = self.retry.next_delay(delay, retry_after);
            warn!(
                endpoint = %self.endpoint,
                status = response.status().as_u16(),
                headers = ?response.headers(),
                retry_after = ?retry_after,
                wait_ms = delay.as_millis() as u64,
                "Rate limited by SPARQL endpoint, retrying"
            );
            tokio::time::sleep(delay).await;
        };

        let status = response.status();
        let body = response.text().await.map_err(|e| Error::Http {
            endpoint: self.endpoint.clone(),
            query: query.to_string(),
            message: e.to_string(),
        })?;

        if !status.is_success() {
            error!(endpoint = %self.endpoint, status = status.as_u16(), query, body = %body, "SPARQL endpoint failed");
            return Err(Error::UpstreamStatus {
                endpoint: self.endpoint.clone(),
                status: status.as_u16(),
                query: query.to_string(),
                body,
            });
        }

        let bindings = self.parse_bindings(query, &body)?;
        debug!(endpoint = %self.endpoint, rows = bindings.len(), "Received response from SPARQL endpoint");
        Ok(bindings)
    }

    async fn send(&self, query: &str) -> Result<reqwest::Response> {
        self.http
            .get(&self.endpoint)
            .query(&[("format", "json"), ("query", query)])
            .header(ACCEPT, "application/sparql-results+json")
            .header(USER_AGENT, self.user_agent.as_str())
            .send()
            .await
            .map_err(|e| Error::Http {
                endpoint: self.endpoint.clone(),
                query: query.to_string(),
                message: e.to_string(),
            })
    }

    fn parse_bindings(&self, query: &str, body: &str) -> Result<Vec<Binding>> {
        let parsed = serde_json::from_str::<serde_json::Value>(body)
            .map_err(|e| e.to_string())
            .and_then(|json| {
                let bindings = json
                    .get("results")
                    .and_then(|r| r.get("bindings"))
                    .cloned()
                    .ok_or_else(|| "missing `results.bindings`".to_string())?;
                serde_json::from_value::<Vec<Binding>>(bindings).map_err(|e| e.to_string())
            });

        parsed.map_err(|message| self.malformed(query, message, body))
    }

    fn malformed(&self, query: &str, message: String, body: &str) -> Error {
        error!(endpoint = %self.endpoint, query, body, message = %message, "Malformed SPARQL response");
        Error::MalformedResponse {
            endpoint: self.endpoint.clone(),
            query: query.to_string(),
            message,
            body: body.to_string(),
        }
    }

    fn field<'b>(&self, row: &'b Binding, name: &str, query: &str) -> Result<&'b BindingValue> {
        row.get(name).ok_or_else(|| {
            let body = serde_json::to_string(row).unwrap_or_default();
            self.malformed(query, format!("result row lacks `{name}`"), &body)
        })
    }

    // ========================================================================
    // Query construction
    // ========================================================================

    /// Text of the neighbourhood query for `entity`.
    pub fn neighbours_query(entity: &EntityId, query: NeighbourQuery<'_>) -> String {
        let conditions = render_conditions(query.conditions, "?object", "?condition_property", query.match_all);
        let template = if query.direct_only { DIRECT_TEMPLATE } else { ALL_HOPS_TEMPLATE };
        template
            .replace("<PREFIXES>", PREFIXES)
            .replace("<ENTITY>", &entity.to_string())
            .replace("<CONDITIONS>", &conditions)
    }

    /// Text of the count-matches query.
    pub fn count_matches_query(candidates: &[EntityId], conditions: &[RelationCondition]) -> String {
        let conditions = render_conditions(conditions, "?object", "?condition_property", false);
        let candidates: Vec<String> = candidates.iter().map(|c| format!("wd:{c}")).collect();
        COUNT_MATCHES_TEMPLATE
            .replace("<PREFIXES>", PREFIXES)
            .replace("<CONDITIONS>", &conditions)
            .replace("<CANDIDATES>", &candidates.join(" "))
    }
}

/// `retry-after` in whole seconds. HTTP-date forms are ignored.
fn parse_retry_after(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Reduce a binding value to a term: URIs to their last segment, literals
/// verbatim. Qualifier artifacts yield `None`.
fn binding_term(value: &BindingValue) -> Option<Term> {
    match value.kind.as_deref() {
        Some("literal") | Some("typed-literal") => Some(Term::Literal(value.value.clone())),
        _ => Term::classify(last_segment(&value.value)),
    }
}

// ============================================================================
// GraphService impl
// ============================================================================

#[async_trait]
impl GraphService for RemoteGraphService {
    async fn one_hop_neighbours(
        &self,
        entity: &EntityId,
        query: NeighbourQuery<'_>,
    ) -> Result<Vec<NeighbourRecord>> {
        let sparql = Self::neighbours_query(entity, query);
        let rows = self.execute(&sparql).await?;

        let mut result = Vec::with_capacity(rows.len());
        for row in &rows {
            let property = last_segment(&self.field(row, "property", &sparql)?.value);
            if !property.starts_with(['P', 'p']) || is_qualifier_artifact(property) {
                debug!(property, "Skipping non-relation row");
                continue;
            }
            let Ok(relation) = property.parse::<EntityId>() else {
                debug!(property, "Skipping unparseable relation");
                continue;
            };
            let Some(neighbour) = binding_term(self.field(row, "object", &sparql)?) else {
                debug!(relation = %relation, "Skipping qualifier artifact");
                continue;
            };
            result.push(NeighbourRecord { relation, neighbour });
        }

        if result.is_empty() {
            if query.conditions.is_empty() {
                warn!(entity = %entity, backend = "remote", "No neighbours found; unknown entity?");
            } else {
                debug!(entity = %entity, conditions = query.conditions.len(), "No neighbours match conditions");
            }
        }
        Ok(result)
    }

    async fn count_matches(
        &self,
        candidates: &[EntityId],
        conditions: &[RelationCondition],
    ) -> Result<HashMap<EntityId, usize>> {
        if candidates.is_empty() || conditions.is_empty() {
            return Ok(HashMap::new());
        }

        let sparql = Self::count_matches_query(candidates, conditions);
        let rows = self.execute(&sparql).await?;

        let mut result = HashMap::new();
        for row in &rows {
            let matched = &self.field(row, "matched", &sparql)?.value;
            let count: usize = matched.parse().map_err(|_| {
                let body = serde_json::to_string(row).unwrap_or_default();
                self.malformed(&sparql, format!("`matched` is not a count: {matched:?}"), &body)
            })?;
            let object = &self.field(row, "object", &sparql)?.value;
            if let Some(id) = Term::classify(last_segment(object)).and_then(|t| t.as_item()) {
                result.insert(id, count);
            }
        }
        Ok(result)
    }

    fn name(&self) -> &'static str {
        "remote"
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_next_delay_adds_hint_and_step() {
        let policy = RetryPolicy::default();
        let first = policy.next_delay(policy.initial_backoff, Some(3));
        assert_eq!(first, Duration::from_millis(3700));
        let second = policy.next_delay(first, None);
        assert_eq!(second, Duration::from_millis(4200));
    }

    #[test]
    fn test_direct_query_text() {
        let conditions = [RelationCondition::to_object(EntityId::property(17), EntityId::item(30)).inverted()];
        let text = RemoteGraphService::neighbours_query(
            &EntityId::item(30),
            NeighbourQuery::direct().with_conditions(&conditions, false),
        );
        assert!(text.starts_with("PREFIX wdt: <http://www.wikidata.org/prop/direct/>\nPREFIX wd:"));
        assert!(text.contains("wd:Q30 ?property ?object."));
        assert!(!text.contains("UNION {wd:Q30 ?property ?object}"));
        assert!(text.contains("{?object wdt:P17 wd:Q30} UNION {wd:Q30 wdt:P17 ?object}"));
    }

    #[test]
    fn test_all_hops_query_text() {
        let text = RemoteGraphService::neighbours_query(&EntityId::item(61), NeighbourQuery::all_hops());
        assert!(text.contains("{?object ?property wd:Q61} UNION {wd:Q61 ?property ?object}."));
        assert!(text.contains("?object wdt:P31 ?smth."));
        assert!(!text.contains("<CONDITIONS>"));
    }

    #[test]
    fn test_count_matches_query_text() {
        let conditions = [RelationCondition::to_object(EntityId::property(17), EntityId::item(30)).inverted()];
        let text = RemoteGraphService::count_matches_query(&[EntityId::item(61), EntityId::item(60)], &conditions);
        assert!(text.contains("VALUES ?object { wd:Q61 wd:Q60 }"));
        assert!(text.contains("GROUP BY ?object"));
    }

    #[test]
    fn test_binding_term() {
        let uri = BindingValue { kind: Some("uri".into()), value: "http://www.wikidata.org/entity/Q30".into() };
        assert_eq!(binding_term(&uri), Some(Term::Entity(EntityId::item(30))));

        let qualifier = BindingValue { kind: Some("uri".into()), value: "http://www.wikidata.org/entity/statement/Q30-abc-def".into() };
        assert_eq!(binding_term(&qualifier), None);

        let literal = BindingValue { kind: Some("literal".into()), value: "331893745".into() };
        assert_eq!(binding_term(&literal), Some(Term::Literal("331893745".into())));
    }

    #[test]
    fn test_retry_after_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_retry_after(&headers), None);
        headers.insert(RETRY_AFTER, "3".parse().unwrap());
        assert_eq!(parse_retry_after(&headers), Some(3));
        headers.insert(RETRY_AFTER, "Wed, 21 Oct 2015 07:28:00 GMT".parse().unwrap());
        assert_eq!(parse_retry_after(&headers), None);
    }
}
