//! # kgqa-signatures — Relational Signatures for Knowledge-Graph QA
//!
//! Given a question entity and a set of candidate answers, pick the
//! neighbour of the question entity that best matches the relational
//! pattern the candidates share.
//!
//! ## Design Principles
//!
//! 1. **Trait-first**: `GraphService` is the contract between ranking and the graph
//! 2. **Conditions are an AST**: every query string comes from `RelationCondition::render`
//! 3. **Per-request tables**: connection, signature and score tables never outlive a request
//! 4. **Explicit shared state**: the query cache and worker pool are constructed once and passed in
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use kgqa_signatures::{EntityId, SignatureEngine};
//! use kgqa_signatures::graph::edge_list::load_edge_list;
//!
//! # async fn example() -> kgqa_signatures::Result<()> {
//! let engine = SignatureEngine::open_local(load_edge_list("wikidata_lgl.txt")?);
//!
//! let candidates: Vec<EntityId> = ["Q61", "Q60", "Q65"]
//!     .iter()
//!     .map(|s| s.parse())
//!     .collect::<Result<_, _>>()?;
//! let answer = engine.answer(&"Q30".parse::<EntityId>()?, &candidates).await?;
//! println!("{} (signature: {} relations)", answer.entity, answer.signature.len());
//! # Ok(())
//! # }
//! ```
//!
//! ## Graph Backends
//!
//! | Backend | Feature | Description |
//! |---------|---------|-------------|
//! | Local | (always) | In-memory weighted graph from an LGL edge list |
//! | Remote | `remote` (default) | SPARQL endpoint with persistent cache and 429 backoff |

// ============================================================================
// Modules
// ============================================================================

pub mod model;
pub mod graph;
pub mod service;
pub mod signature;
pub mod config;
pub mod dataset;
pub mod evaluation;
pub mod logging;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

// ============================================================================
// Re-exports: Model
// ============================================================================

pub use model::{EntityId, Namespace, NeighbourRecord, RelationCondition, Term};

// ============================================================================
// Re-exports: Services
// ============================================================================

pub use service::{BackendConfig, GraphService, LocalGraphService, NeighbourQuery};
#[cfg(feature = "remote")]
pub use service::{QueryCache, RemoteConfig, RemoteGraphService, RetryPolicy};

// ============================================================================
// Re-exports: Signatures
// ============================================================================

pub use signature::{
    build_signature, ConnectionAggregator, ConnectionTable, NeighbourRanker, RankingOptions,
    ScoreTable, SignatureEntry, SignatureTable, WorkerPool,
};

pub use config::Settings;

// ============================================================================
// Top-level engine
// ============================================================================

/// Outcome of one ranking request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    /// Winning neighbour, or [`EntityId::NO_ENTITY`].
    pub entity: EntityId,
    pub signature: SignatureTable,
    pub scores: ScoreTable,
}

impl Answer {
    pub fn is_no_entity(&self) -> bool {
        self.entity.is_no_entity()
    }
}

/// The primary entry point: aggregate candidates, build their signature,
/// rank the question entity's neighbours.
pub struct SignatureEngine<S: GraphService + ?Sized> {
    service: Arc<S>,
    aggregator: ConnectionAggregator<S>,
    ranker: NeighbourRanker<S>,
    deadline: Option<Duration>,
}

impl<S: GraphService + ?Sized> SignatureEngine<S> {
    /// Engine with the default pool size and ranking options.
    pub fn with_service(service: Arc<S>) -> Self {
        Self::new(service, WorkerPool::default(), RankingOptions::default())
    }

    pub fn new(service: Arc<S>, pool: WorkerPool, options: RankingOptions) -> Self {
        Self {
            aggregator: ConnectionAggregator::new(Arc::clone(&service), pool),
            ranker: NeighbourRanker::new(Arc::clone(&service), options),
            service,
            deadline: None,
        }
    }

    /// Fail requests that run longer than `deadline` with
    /// [`Error::DeadlineExceeded`].
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Access the underlying service (for advanced use).
    pub fn service(&self) -> &Arc<S> {
        &self.service
    }

    pub fn options(&self) -> &RankingOptions {
        self.ranker.options()
    }

    /// Answer one question.
    pub async fn answer(&self, question: &EntityId, candidates: &[EntityId]) -> Result<Answer> {
        match self.deadline {
            Some(limit) => tokio::time::timeout(limit, self.answer_inner(question, candidates))
                .await
                .map_err(|_| Error::DeadlineExceeded)?,
            None => self.answer_inner(question, candidates).await,
        }
    }

    async fn answer_inner(&self, question: &EntityId, candidates: &[EntityId]) -> Result<Answer> {
        // Phase 1: Aggregate
        let table = self.aggregator.aggregate(candidates).await?;

        // Phase 2: Signature
        let signature = build_signature(&table);
        debug!(
            question = %question,
            relations = table.relation_count(),
            signature = signature.len(),
            "Built signature"
        );

        // Phase 3: Rank
        let scores = self.ranker.score(&signature, question, candidates).await?;
        let entity = scores.best();
        info!(question = %question, candidates = candidates.len(), answer = %entity, backend = self.service.name(), "Ranked");

        Ok(Answer { entity, signature, scores })
    }

    /// Stop the worker pool and release backend resources.
    pub async fn shutdown(&self) -> Result<()> {
        self.aggregator.pool().shutdown();
        self.service.shutdown().await
    }
}

/// In-memory graph for testing and embedding.
impl SignatureEngine<LocalGraphService> {
    pub fn open_local(graph: graph::LocalGraph) -> Self {
        Self::with_service(Arc::new(LocalGraphService::new(graph)))
    }
}

impl SignatureEngine<dyn GraphService> {
    /// Build the backend, pool and ranking options described by `settings`.
    pub async fn from_settings(settings: &Settings) -> Result<Self> {
        let service = settings.backend.connect().await?;
        let pool = WorkerPool::new(settings.aggregation.workers);
        Ok(Self::new(service, pool, settings.ranking.options()).with_deadline(settings.ranking.deadline()))
    }
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid entity id: {0:?}")]
    InvalidEntityId(String),

    #[error("Edge list parse error at line {line}: {message}")]
    EdgeListParse { line: usize, message: String },

    #[error("HTTP error from {endpoint}: {message}\nquery: {query}")]
    Http { endpoint: String, query: String, message: String },

    #[error("Upstream {endpoint} answered {status}: {body}\nquery: {query}")]
    UpstreamStatus { endpoint: String, status: u16, query: String, body: String },

    #[error("Malformed response from {endpoint}: {message}\nquery: {query}\nbody: {body}")]
    MalformedResponse { endpoint: String, query: String, message: String, body: String },

    #[error("Cache error at {path}: {message}")]
    Cache { path: String, message: String },

    #[error("Aggregation failed for candidate {candidate}: {source}")]
    Aggregation {
        candidate: EntityId,
        #[source]
        source: Box<Error>,
    },

    #[error("Worker error: {0}")]
    Worker(String),

    #[error("Deadline exceeded")]
    DeadlineExceeded,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Dataset error: {0}")]
    Dataset(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether retrying the whole request may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::DeadlineExceeded | Error::Http { .. } => true,
            Error::Aggregation { source, .. } => source.is_retryable(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(Error::DeadlineExceeded.is_retryable());
        let http = Error::Http { endpoint: "e".into(), query: "q".into(), message: "reset".into() };
        let wrapped = Error::Aggregation { candidate: EntityId::item(61), source: Box::new(http) };
        assert!(wrapped.is_retryable());
        let malformed = Error::MalformedResponse {
            endpoint: "e".into(),
            query: "q".into(),
            message: "missing results".into(),
            body: "{}".into(),
        };
        assert!(!malformed.is_retryable());
    }
}
