//! Connection aggregation across candidate answers.
//!
//! Each candidate's one-hop neighbourhood is fetched on a bounded worker
//! pool, turned into a per-candidate [`ConnectionTable`], and the tables are
//! summed. Summation is commutative, and tables are merged in candidate
//! order rather than completion order, so first-seen order (which breaks
//! ties later on) is the same on every run.

use std::future::Future;
use std::sync::Arc;

use hashbrown::HashMap;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error};

use crate::model::{EntityId, NeighbourRecord, Term};
use crate::service::{GraphService, NeighbourQuery};
use crate::{Error, Result};

/// Default number of concurrent candidate fetches.
pub const DEFAULT_WORKERS: usize = 4;

// ============================================================================
// ConnectionTable
// ============================================================================

/// Counts in first-insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tally<K: std::hash::Hash + Eq + Clone> {
    entries: Vec<(K, u32)>,
    index: HashMap<K, usize>,
}

impl<K: std::hash::Hash + Eq + Clone> Tally<K> {
    pub fn new() -> Self {
        Self { entries: Vec::new(), index: HashMap::new() }
    }

    pub fn add(&mut self, key: K, count: u32) {
        match self.index.get(&key) {
            Some(&i) => self.entries[i].1 += count,
            None => {
                self.index.insert(key.clone(), self.entries.len());
                self.entries.push((key, count));
            }
        }
    }

    pub fn get(&self, key: &K) -> u32 {
        self.index.get(key).map_or(0, |&i| self.entries[i].1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, u32)> + '_ {
        self.entries.iter().map(|(k, c)| (k, *c))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// relation → neighbour → occurrence count.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionTable {
    relations: Vec<(EntityId, Tally<Term>)>,
    index: HashMap<EntityId, usize>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table of a single neighbourhood.
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a NeighbourRecord>) -> Self {
        let mut table = Self::new();
        for record in records {
            table.add(record.relation, record.neighbour.clone(), 1);
        }
        table
    }

    pub fn add(&mut self, relation: EntityId, neighbour: Term, count: u32) {
        let slot = match self.index.get(&relation) {
            Some(&i) => i,
            None => {
                self.index.insert(relation, self.relations.len());
                self.relations.push((relation, Tally::new()));
                self.relations.len() - 1
            }
        };
        self.relations[slot].1.add(neighbour, count);
    }

    /// Sum `other` into `self`.
    pub fn merge(&mut self, other: &ConnectionTable) {
        for (relation, neighbours) in other.iter() {
            for (neighbour, count) in neighbours.iter() {
                self.add(*relation, neighbour.clone(), count);
            }
        }
    }

    pub fn count(&self, relation: &EntityId, neighbour: &Term) -> u32 {
        self.index
            .get(relation)
            .map_or(0, |&i| self.relations[i].1.get(neighbour))
    }

    /// Relations in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = (&EntityId, &Tally<Term>)> + '_ {
        self.relations.iter().map(|(r, t)| (r, t))
    }

    pub fn relation_count(&self) -> usize {
        self.relations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }
}

// ============================================================================
// WorkerPool
// ============================================================================

/// Bounded pool for independent async jobs.
///
/// Create one per process and hand clones to the components that fan out.
/// `shutdown` stops it from admitting new work.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(DEFAULT_WORKERS)
    }
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self { permits: Arc::new(Semaphore::new(size)), size }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn shutdown(&self) {
        self.permits.close();
    }

    pub fn is_shut_down(&self) -> bool {
        self.permits.is_closed()
    }

    /// Run `job` on every item, at most `size` at a time. Results come back
    /// in input order. The first failure cancels the remaining jobs.
    pub async fn map<T, R, F, Fut>(&self, items: Vec<T>, job: F) -> Result<Vec<R>>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        if self.is_shut_down() {
            return Err(Error::Worker("worker pool is shut down".into()));
        }

        let job = Arc::new(job);
        let mut set = JoinSet::new();
        let total = items.len();

        for (position, item) in items.into_iter().enumerate() {
            let permits = Arc::clone(&self.permits);
            let job = Arc::clone(&job);
            set.spawn(async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|_| Error::Worker("worker pool is shut down".into()))?;
                job(item).await.map(|r| (position, r))
            });
        }

        let mut slots: Vec<Option<R>> = (0..total).map(|_| None).collect();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Ok((position, result))) => slots[position] = Some(result),
                Ok(Err(e)) => {
                    set.abort_all();
                    return Err(e);
                }
                Err(e) => {
                    set.abort_all();
                    return Err(Error::Worker(format!("task failed: {e}")));
                }
            }
        }

        slots
            .into_iter()
            .map(|r| r.ok_or_else(|| Error::Worker("task finished without a result".into())))
            .collect()
    }
}

// ============================================================================
// ConnectionAggregator
// ============================================================================

/// Fetches and sums candidate neighbourhoods.
pub struct ConnectionAggregator<S: GraphService + ?Sized> {
    service: Arc<S>,
    pool: WorkerPool,
}

impl<S: GraphService + ?Sized> Clone for ConnectionAggregator<S> {
    fn clone(&self) -> Self {
        Self { service: Arc::clone(&self.service), pool: self.pool.clone() }
    }
}

impl<S: GraphService + ?Sized> ConnectionAggregator<S> {
    pub fn new(service: Arc<S>, pool: WorkerPool) -> Self {
        Self { service, pool }
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Build the combined connection table of `candidates`.
    ///
    /// Any candidate failing fails the whole aggregation; a table missing a
    /// candidate would silently skew the signature.
    pub async fn aggregate(&self, candidates: &[EntityId]) -> Result<ConnectionTable> {
        let service = Arc::clone(&self.service);
        let tables = self
            .pool
            .map(candidates.to_vec(), move |candidate| {
                let service = Arc::clone(&service);
                async move {
                    let records = service
                        .one_hop_neighbours(&candidate, NeighbourQuery::all_hops())
                        .await
                        .map_err(|e| {
                            error!(candidate = %candidate, error = %e, "Candidate lookup failed");
                            Error::Aggregation { candidate, source: Box::new(e) }
                        })?;
                    debug!(candidate = %candidate, edges = records.len(), "Fetched candidate neighbourhood");
                    Ok(ConnectionTable::from_records(&records))
                }
            })
            .await?;

        let mut combined = ConnectionTable::new();
        for table in &tables {
            combined.merge(table);
        }
        Ok(combined)
    }
}
