//! In-memory graph backend.
//!
//! Answers the `GraphService` contract by walking incident-edge lists of a
//! [`LocalGraph`]. The graph is immutable after construction, so concurrent
//! queries read it without any locking.
//!
//! Condition checks re-walk the neighbour's own incident edges: a condition
//! `?n -P-> O` holds when one of them has weight `P` and `O` at its other
//! end (either end when the condition is invertible).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{GraphService, NeighbourQuery};
use crate::graph::{LocalGraph, NodeIndex};
use crate::model::{EntityId, NeighbourRecord, RelationCondition, Term};
use crate::Result;

// ============================================================================
// LocalGraphService
// ============================================================================

/// `GraphService` over an in-memory weighted graph.
#[derive(Debug, Clone)]
pub struct LocalGraphService {
    graph: Arc<LocalGraph>,
}

impl LocalGraphService {
    pub fn new(graph: LocalGraph) -> Self {
        Self { graph: Arc::new(graph) }
    }

    pub fn from_shared(graph: Arc<LocalGraph>) -> Self {
        Self { graph }
    }

    pub fn graph(&self) -> &LocalGraph {
        &self.graph
    }

    fn node_of(&self, entity: &EntityId) -> Option<NodeIndex> {
        if !entity.is_item() {
            return None;
        }
        self.graph.node(entity.number)
    }

    /// Map conditions onto node indices. A condition naming an entity the
    /// graph doesn't know can never hold and resolves to `None`.
    fn resolve(&self, conditions: &[RelationCondition]) -> Vec<Option<ResolvedCondition>> {
        conditions
            .iter()
            .map(|c| {
                let object = match c.object {
                    None => None,
                    Some(id) => match self.node_of(&id) {
                        Some(idx) => Some(idx),
                        None => {
                            debug!(condition_object = %id, "Condition object not in graph");
                            return None;
                        }
                    },
                };
                let subject = match c.subject {
                    None => None,
                    Some(id) => Some(self.node_of(&id)?),
                };
                Some(ResolvedCondition {
                    subject,
                    relation: c.relation.map(|r| r.number as i64),
                    object,
                    invertible: c.invertible,
                })
            })
            .collect()
    }

    /// Number of resolved conditions `node` satisfies.
    fn satisfied(&self, node: NodeIndex, conditions: &[Option<ResolvedCondition>]) -> usize {
        conditions
            .iter()
            .flatten()
            .filter(|c| c.holds_for(&self.graph, node))
            .count()
    }

    fn neighbours_sync(&self, entity: &EntityId, query: NeighbourQuery<'_>) -> Vec<NeighbourRecord> {
        let Some(node) = self.node_of(entity) else {
            warn!(entity = %entity, backend = "local", "No such node; empty neighbourhood");
            return Vec::new();
        };

        let resolved = self.resolve(query.conditions);
        let mut result = Vec::new();

        for edge in self.graph.incident(node) {
            // skip system edges like labels
            if !edge.is_relational() {
                continue;
            }
            if query.direct_only && edge.source != node {
                continue;
            }
            let neighbour = edge.other(node);

            if !query.conditions.is_empty() {
                let matched = self.satisfied(neighbour, &resolved);
                let wanted = if query.match_all { query.conditions.len() } else { 1 };
                if matched < wanted {
                    continue;
                }
            }

            result.push(NeighbourRecord {
                relation: EntityId::property(edge.weight as u64),
                neighbour: Term::Entity(EntityId::item(self.graph.name(neighbour))),
            });
        }

        result
    }

    fn count_matches_sync(
        &self,
        candidates: &[EntityId],
        conditions: &[RelationCondition],
    ) -> HashMap<EntityId, usize> {
        let resolved = self.resolve(conditions);
        let mut result = HashMap::with_capacity(candidates.len());
        for candidate in candidates {
            let count = match self.node_of(candidate) {
                Some(node) => self.satisfied(node, &resolved),
                None => {
                    warn!(entity = %candidate, backend = "local", "No such node; counting 0 matches");
                    0
                }
            };
            result.insert(*candidate, count);
        }
        result
    }
}

#[derive(Debug, Clone, Copy)]
struct ResolvedCondition {
    subject: Option<NodeIndex>,
    relation: Option<i64>,
    object: Option<NodeIndex>,
    invertible: bool,
}

impl ResolvedCondition {
    /// Does `node`, standing in for the free subject, satisfy this condition?
    fn holds_for(&self, graph: &LocalGraph, node: NodeIndex) -> bool {
        if self.subject.is_some_and(|s| s != node) {
            return false;
        }
        graph.incident(node).any(|edge| {
            if !edge.is_relational() || self.relation.is_some_and(|r| r != edge.weight) {
                return false;
            }
            let forward = edge.source == node && self.object.is_none_or(|o| edge.target == o);
            let backward = self.invertible
                && self.object.is_some()
                && edge.target == node
                && self.object.is_none_or(|o| edge.source == o);
            forward || backward
        })
    }
}

// ============================================================================
// GraphService impl
// ============================================================================

#[async_trait]
impl GraphService for LocalGraphService {
    async fn one_hop_neighbours(
        &self,
        entity: &EntityId,
        query: NeighbourQuery<'_>,
    ) -> Result<Vec<NeighbourRecord>> {
        Ok(self.neighbours_sync(entity, query))
    }

    async fn count_matches(
        &self,
        candidates: &[EntityId],
        conditions: &[RelationCondition],
    ) -> Result<HashMap<EntityId, usize>> {
        Ok(self.count_matches_sync(candidates, conditions))
    }

    fn name(&self) -> &'static str {
        "local"
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn q(n: u64) -> EntityId {
        EntityId::item(n)
    }

    fn p(n: u64) -> EntityId {
        EntityId::property(n)
    }

    /// Q61 -P17-> Q30, Q60 -P17-> Q30, Q30 -P36-> Q61, Q61 -0-> Q999 (label edge)
    fn small_graph() -> LocalGraphService {
        let mut g = LocalGraph::new();
        g.add_edge(61, 30, 17);
        g.add_edge(60, 30, 17);
        g.add_edge(30, 61, 36);
        g.add_edge(61, 999, 0);
        LocalGraphService::new(g)
    }

    #[tokio::test]
    async fn test_all_hops_includes_incoming() {
        let svc = small_graph();
        let records = svc.one_hop_neighbours(&q(30), NeighbourQuery::all_hops()).await.unwrap();
        assert_eq!(
            records,
            vec![
                NeighbourRecord::new(p(17), q(61)),
                NeighbourRecord::new(p(17), q(60)),
                NeighbourRecord::new(p(36), q(61)),
            ]
        );
    }

    #[tokio::test]
    async fn test_direct_only_and_system_edges() {
        let svc = small_graph();
        let records = svc.one_hop_neighbours(&q(61), NeighbourQuery::direct()).await.unwrap();
        // the weight-0 edge to Q999 is skipped
        assert_eq!(records, vec![NeighbourRecord::new(p(17), q(30))]);
    }

    #[tokio::test]
    async fn test_unknown_entity_is_empty() {
        let svc = small_graph();
        let records = svc.one_hop_neighbours(&q(12345), NeighbourQuery::all_hops()).await.unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn test_condition_filters_neighbours() {
        let svc = small_graph();
        let conditions = [RelationCondition::to_object(p(17), q(30)).inverted()];
        let query = NeighbourQuery::all_hops().with_conditions(&conditions, false);
        let records = svc.one_hop_neighbours(&q(30), query).await.unwrap();
        let neighbours: Vec<Term> = records.into_iter().map(|r| r.neighbour).collect();
        assert_eq!(neighbours, vec![Term::from(q(61)), Term::from(q(60)), Term::from(q(61))]);
    }

    #[tokio::test]
    async fn test_match_all_requires_every_condition() {
        let svc = small_graph();
        let conditions = [
            RelationCondition::to_object(p(17), q(30)).inverted(),
            RelationCondition::to_object(p(36), q(30)).inverted(),
        ];
        let any = NeighbourQuery::all_hops().with_conditions(&conditions, false);
        let all = NeighbourQuery::all_hops().with_conditions(&conditions, true);

        let any_hits = svc.one_hop_neighbours(&q(30), any).await.unwrap();
        let all_hits = svc.one_hop_neighbours(&q(30), all).await.unwrap();

        assert_eq!(any_hits.len(), 3);
        // only Q61 is both in P17 with Q30 and in P36 with Q30
        assert!(all_hits.iter().all(|r| r.neighbour == Term::from(q(61))));
        assert_eq!(all_hits.len(), 2);
    }

    #[tokio::test]
    async fn test_direction_matters_without_invert() {
        let svc = small_graph();
        // Q30 -P36-> Q61, so Q61 does not satisfy "?x -P36-> Q30" forward
        let forward = [RelationCondition::to_object(p(36), q(30))];
        let counts = svc.count_matches(&[q(61)], &forward).await.unwrap();
        assert_eq!(counts[&q(61)], 0);

        let inverted = [RelationCondition::to_object(p(36), q(30)).inverted()];
        let counts = svc.count_matches(&[q(61)], &inverted).await.unwrap();
        assert_eq!(counts[&q(61)], 1);
    }

    #[tokio::test]
    async fn test_count_matches_unknown_candidate_and_object() {
        let svc = small_graph();
        let conditions = [
            RelationCondition::to_object(p(17), q(30)),
            RelationCondition::to_object(p(17), q(77777)),
        ];
        let counts = svc.count_matches(&[q(61), q(60), q(4242)], &conditions).await.unwrap();
        assert_eq!(counts[&q(61)], 1);
        assert_eq!(counts[&q(60)], 1);
        assert_eq!(counts[&q(4242)], 0);
    }
}
