//! # Graph Query Service
//!
//! The contract between signature building and whatever holds the graph.
//! Callers only ever see `GraphService`; the concrete backend is picked once
//! at construction time.
//!
//! ## Implementations
//!
//! | Backend | Module | Description |
//! |---------|--------|-------------|
//! | `LocalGraphService` | `local` | In-memory weighted graph loaded from an edge list |
//! | `RemoteGraphService` | `remote` | SPARQL endpoint with on-disk cache and 429 backoff (feature `remote`) |

pub mod local;
#[cfg(feature = "remote")]
pub mod cache;
#[cfg(feature = "remote")]
pub mod remote;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::model::{EntityId, NeighbourRecord, RelationCondition};
use crate::Result;

pub use local::LocalGraphService;
#[cfg(feature = "remote")]
pub use cache::{CacheStats, QueryCache};
#[cfg(feature = "remote")]
pub use remote::{RemoteConfig, RemoteGraphService, RetryPolicy};

// ============================================================================
// Neighbourhood query
// ============================================================================

/// Parameters of a one-hop neighbourhood lookup.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeighbourQuery<'a> {
    /// Only edges where the queried entity is the subject.
    pub direct_only: bool,
    /// Constraints on the neighbour; empty means unconstrained.
    pub conditions: &'a [RelationCondition],
    /// Neighbour must satisfy every condition (otherwise any one).
    pub match_all: bool,
}

impl<'a> NeighbourQuery<'a> {
    /// Both directions, no conditions.
    pub fn all_hops() -> Self {
        Self::default()
    }

    /// Outgoing edges only, no conditions.
    pub fn direct() -> Self {
        Self { direct_only: true, ..Self::default() }
    }

    pub fn with_conditions(mut self, conditions: &'a [RelationCondition], match_all: bool) -> Self {
        self.conditions = conditions;
        self.match_all = match_all;
        self
    }
}

// ============================================================================
// GraphService trait
// ============================================================================

/// Read-only access to a knowledge graph's one-hop structure.
///
/// Unknown entities are not errors: both operations log them and answer as
/// if the entity had no edges.
#[async_trait]
pub trait GraphService: Send + Sync + 'static {
    /// Every `(relation, neighbour)` pair incident to `entity`, filtered by
    /// `query`. Qualifier artifacts never appear in the result.
    async fn one_hop_neighbours(
        &self,
        entity: &EntityId,
        query: NeighbourQuery<'_>,
    ) -> Result<Vec<NeighbourRecord>>;

    /// For each candidate, how many of `conditions` it satisfies.
    ///
    /// Backends may omit candidates with no match; treat a missing key as 0.
    async fn count_matches(
        &self,
        candidates: &[EntityId],
        conditions: &[RelationCondition],
    ) -> Result<HashMap<EntityId, usize>>;

    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Release backend resources. Default: nothing to release.
    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// Backend Configuration
// ============================================================================

/// Which backend to build, and how.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConfig {
    /// In-memory graph loaded from an edge-list file.
    Local { edge_list: PathBuf },

    /// SPARQL endpoint.
    #[cfg(feature = "remote")]
    Remote(RemoteConfig),
}

#[cfg(feature = "remote")]
impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig::Remote(RemoteConfig::default())
    }
}

#[cfg(not(feature = "remote"))]
impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig::Local { edge_list: PathBuf::from("wikidata_lgl.txt") }
    }
}

impl BackendConfig {
    /// Build the configured backend. Called once per process.
    pub async fn connect(&self) -> Result<Arc<dyn GraphService>> {
        match self {
            BackendConfig::Local { edge_list } => {
                let path = edge_list.clone();
                let graph = tokio::task::spawn_blocking(move || crate::graph::edge_list::load_edge_list(path))
                    .await
                    .map_err(|e| crate::Error::Worker(e.to_string()))??;
                Ok(Arc::new(LocalGraphService::new(graph)))
            }
            #[cfg(feature = "remote")]
            BackendConfig::Remote(config) => Ok(Arc::new(RemoteGraphService::from_config(config)?)),
        }
    }
}
