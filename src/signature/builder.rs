//! Reduce a connection table to its signature.

use serde::{Deserialize, Serialize};

use super::aggregator::ConnectionTable;
use crate::model::EntityId;

/// One relation's consensus neighbour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureEntry {
    pub relation: EntityId,
    pub neighbour: EntityId,
    /// How many candidate edges agree on `neighbour` for `relation`.
    pub support: u32,
}

/// Signature entries, highest support first. Equal support keeps the order
/// in which relations were first discovered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureTable {
    entries: Vec<SignatureEntry>,
}

impl SignatureTable {
    pub fn entries(&self) -> &[SignatureEntry] {
        &self.entries
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SignatureEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn first(&self) -> Option<&SignatureEntry> {
        self.entries.first()
    }
}

impl<'a> IntoIterator for &'a SignatureTable {
    type Item = &'a SignatureEntry;
    type IntoIter = std::slice::Iter<'a, SignatureEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Pick each relation's most frequent neighbour and order by support.
///
/// Ties between neighbours go to the first one seen. Relations whose best
/// neighbour is not an item (a literal or a property) are dropped entirely;
/// the runner-up is not promoted.
pub fn build_signature(table: &ConnectionTable) -> SignatureTable {
    let mut entries = Vec::with_capacity(table.relation_count());

    for (relation, neighbours) in table.iter() {
        let mut best = None;
        let mut best_count = 0;
        for (neighbour, count) in neighbours.iter() {
            if best_count < count {
                best = Some(neighbour);
                best_count = count;
            }
        }
        if let Some(neighbour) = best.and_then(|t| t.as_item()) {
            entries.push(SignatureEntry { relation: *relation, neighbour, support: best_count });
        }
    }

    // Vec::sort_by is stable
    entries.sort_by(|a, b| b.support.cmp(&a.support));
    SignatureTable { entries }
}
