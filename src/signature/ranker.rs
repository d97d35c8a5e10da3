//! Rank the question entity's neighbours against a signature.
//!
//! Selected signature entries become invertible conditions weighted by their
//! support. The question entity's direct neighbourhood is fetched under the
//! disjunction of those conditions, and every returned item scores the sum of
//! the weights of the conditions it satisfies on its own. The top score wins;
//! ties go to the neighbour that appeared first.

use std::sync::Arc;

use hashbrown::{HashMap, HashSet};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::builder::{SignatureEntry, SignatureTable};
use crate::model::{EntityId, RelationCondition};
use crate::service::{GraphService, NeighbourQuery};
use crate::Result;

/// Which signature entries turn into conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingOptions {
    /// Leading signature entries to use regardless of support.
    pub top_n: usize,
    /// Also use every entry all candidates agree on.
    pub include_full_matches: bool,
}

impl Default for RankingOptions {
    fn default() -> Self {
        Self { top_n: 0, include_full_matches: true }
    }
}

/// A condition and the score it contributes when satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeightedCondition {
    pub condition: RelationCondition,
    pub weight: u32,
}

impl From<&SignatureEntry> for WeightedCondition {
    fn from(entry: &SignatureEntry) -> Self {
        Self {
            condition: RelationCondition::to_object(entry.relation, entry.neighbour).inverted(),
            weight: entry.support,
        }
    }
}

/// The first `top_n` entries, plus (with `include_full_matches`) every entry
/// whose support equals the number of candidates. Table order is kept.
pub fn select_conditions(
    signature: &SignatureTable,
    candidate_count: usize,
    options: &RankingOptions,
) -> Vec<WeightedCondition> {
    signature
        .iter()
        .enumerate()
        .filter(|(i, entry)| {
            *i < options.top_n
                || (options.include_full_matches && entry.support as usize == candidate_count)
        })
        .map(|(_, entry)| WeightedCondition::from(entry))
        .collect()
}

// ============================================================================
// ScoreTable
// ============================================================================

/// Neighbours with their accumulated scores.
#[derive(Debug, Clone, Default, Eq, Serialize, Deserialize)]
#[serde(from = "ScoreEntries")]
pub struct ScoreTable {
    entries: Vec<(EntityId, u32)>,
    /// neighbour → position in `entries`
    #[serde(skip)]
    index: HashMap<EntityId, usize>,
}

#[derive(Deserialize)]
struct ScoreEntries {
    entries: Vec<(EntityId, u32)>,
}

impl From<ScoreEntries> for ScoreTable {
    fn from(raw: ScoreEntries) -> Self {
        let mut table = Self { entries: raw.entries, index: HashMap::new() };
        table.reindex();
        table
    }
}

impl PartialEq for ScoreTable {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl ScoreTable {
    /// Zero scores for `neighbours`, in the given order.
    fn seeded(neighbours: &[EntityId]) -> Self {
        ScoreEntries { entries: neighbours.iter().map(|n| (*n, 0)).collect() }.into()
    }

    fn reindex(&mut self) {
        self.index = self.entries.iter().enumerate().map(|(i, (n, _))| (*n, i)).collect();
    }

    fn credit(&mut self, neighbour: &EntityId, weight: u32) {
        if let Some(&i) = self.index.get(neighbour) {
            self.entries[i].1 += weight;
        }
    }

    fn sort(&mut self) {
        self.entries.sort_by(|a, b| b.1.cmp(&a.1));
        self.reindex();
    }

    pub fn entries(&self) -> &[(EntityId, u32)] {
        &self.entries
    }

    pub fn score(&self, neighbour: &EntityId) -> Option<u32> {
        self.index.get(neighbour).map(|&i| self.entries[i].1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The winning neighbour, or [`EntityId::NO_ENTITY`] when empty.
    pub fn best(&self) -> EntityId {
        self.entries.first().map_or(EntityId::NO_ENTITY, |(n, _)| *n)
    }
}

// ============================================================================
// NeighbourRanker
// ============================================================================

pub struct NeighbourRanker<S: GraphService + ?Sized> {
    service: Arc<S>,
    options: RankingOptions,
}

impl<S: GraphService + ?Sized> Clone for NeighbourRanker<S> {
    fn clone(&self) -> Self {
        Self { service: Arc::clone(&self.service), options: self.options }
    }
}

impl<S: GraphService + ?Sized> NeighbourRanker<S> {
    pub fn new(service: Arc<S>, options: RankingOptions) -> Self {
        Self { service, options }
    }

    pub fn options(&self) -> &RankingOptions {
        &self.options
    }

    /// Best neighbour of `question` under `signature`, or
    /// [`EntityId::NO_ENTITY`] when nothing qualifies.
    pub async fn rank(
        &self,
        signature: &SignatureTable,
        question: &EntityId,
        candidates: &[EntityId],
    ) -> Result<EntityId> {
        Ok(self.score(signature, question, candidates).await?.best())
    }

    /// Full score table, sorted best first.
    pub async fn score(
        &self,
        signature: &SignatureTable,
        question: &EntityId,
        candidates: &[EntityId],
    ) -> Result<ScoreTable> {
        let selected = select_conditions(signature, candidates.len(), &self.options);
        if selected.is_empty() {
            debug!(question = %question, "No signature conditions selected");
            return Ok(ScoreTable::default());
        }
        debug!(question = %question, conditions = selected.len(), "Ranking question neighbourhood");

        let conditions: Vec<RelationCondition> = selected.iter().map(|w| w.condition).collect();
        let query = NeighbourQuery::direct().with_conditions(&conditions, false);
        let records = self.service.one_hop_neighbours(question, query).await?;

        let mut seen = HashSet::new();
        let neighbours: Vec<EntityId> = records
            .iter()
            .filter_map(|r| r.neighbour.as_item())
            .filter(|n| seen.insert(*n))
            .collect();

        let mut scores = ScoreTable::seeded(&neighbours);
        if neighbours.is_empty() {
            return Ok(scores);
        }

        for weighted in &selected {
            let matches = self
                .service
                .count_matches(&neighbours, std::slice::from_ref(&weighted.condition))
                .await?;
            for (neighbour, count) in &matches {
                if *count > 0 {
                    scores.credit(neighbour, weighted.weight);
                }
            }
        }

        scores.sort();
        debug!(question = %question, best = %scores.best(), neighbours = scores.len(), "Scored neighbours");
        Ok(scores)
    }
}
