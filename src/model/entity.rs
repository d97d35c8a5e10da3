//! Entity and relation identifiers, and the values found at edge endpoints.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Id namespace: `Q…` items or `P…` properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Namespace {
    Item,
    Property,
}

impl Namespace {
    pub fn prefix(self) -> char {
        match self {
            Namespace::Item => 'Q',
            Namespace::Property => 'P',
        }
    }

    fn from_prefix(c: char) -> Option<Self> {
        match c {
            'Q' | 'q' => Some(Namespace::Item),
            'P' | 'p' => Some(Namespace::Property),
            _ => None,
        }
    }
}

/// Namespaced knowledge-graph identifier (`Q61`, `P17`).
///
/// Round-trips through its display form. Qualifier artifacts such as
/// `Q30-6D0A…` are not ids and fail to parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityId {
    pub namespace: Namespace,
    pub number: u64,
}

impl EntityId {
    /// Placeholder answer that never matches a real entity.
    pub const NO_ENTITY: EntityId = EntityId::item(0);

    pub const fn item(number: u64) -> Self {
        Self { namespace: Namespace::Item, number }
    }

    pub const fn property(number: u64) -> Self {
        Self { namespace: Namespace::Property, number }
    }

    pub fn is_item(&self) -> bool {
        self.namespace == Namespace::Item
    }

    pub fn is_property(&self) -> bool {
        self.namespace == Namespace::Property
    }

    pub fn is_no_entity(&self) -> bool {
        *self == Self::NO_ENTITY
    }

    /// Parse the trailing path segment of a URI such as
    /// `http://www.wikidata.org/entity/Q61`.
    pub fn from_uri(uri: &str) -> Result<Self> {
        last_segment(uri).parse()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.namespace.prefix(), self.number)
    }
}

impl FromStr for EntityId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut chars = s.chars();
        let namespace = chars
            .next()
            .and_then(Namespace::from_prefix)
            .ok_or_else(|| Error::InvalidEntityId(s.to_string()))?;
        let digits = chars.as_str();
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::InvalidEntityId(s.to_string()));
        }
        let number = digits
            .parse()
            .map_err(|_| Error::InvalidEntityId(s.to_string()))?;
        Ok(Self { namespace, number })
    }
}

impl TryFrom<String> for EntityId {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<EntityId> for String {
    fn from(id: EntityId) -> Self {
        id.to_string()
    }
}

/// The last `/`-delimited segment of a URI (the whole string if there is none).
pub fn last_segment(uri: &str) -> &str {
    uri.rsplit('/').next().unwrap_or(uri)
}

/// True for ids of statement-qualifier nodes, e.g. `Q30-1B2C…` or `P17-…`.
pub fn is_qualifier_artifact(segment: &str) -> bool {
    segment.chars().next().and_then(Namespace::from_prefix).is_some() && segment.contains('-')
}

// ============================================================================
// Term
// ============================================================================

/// A value at the far end of an edge: an id or a literal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Term {
    Entity(EntityId),
    Literal(String),
}

impl Term {
    /// Classify a bare value: ids become `Entity`, qualifier artifacts are
    /// rejected with `None`, everything else is a `Literal`.
    pub fn classify(raw: &str) -> Option<Term> {
        if is_qualifier_artifact(raw) {
            return None;
        }
        Some(match raw.parse::<EntityId>() {
            Ok(id) => Term::Entity(id),
            Err(_) => Term::Literal(raw.to_string()),
        })
    }

    /// The id if this term is a `Q…` item.
    pub fn as_item(&self) -> Option<EntityId> {
        match self {
            Term::Entity(id) if id.is_item() => Some(*id),
            _ => None,
        }
    }

    pub fn is_item(&self) -> bool {
        self.as_item().is_some()
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Entity(id) => write!(f, "{id}"),
            Term::Literal(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<EntityId> for Term {
    fn from(id: EntityId) -> Self {
        Term::Entity(id)
    }
}

/// One edge incident to a queried entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NeighbourRecord {
    pub relation: EntityId,
    pub neighbour: Term,
}

impl NeighbourRecord {
    pub fn new(relation: EntityId, neighbour: impl Into<Term>) -> Self {
        Self { relation, neighbour: neighbour.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let id: EntityId = "Q61".parse().unwrap();
        assert_eq!(id, EntityId::item(61));
        assert_eq!(id.to_string(), "Q61");

        let lower: EntityId = "p17".parse().unwrap();
        assert_eq!(lower, EntityId::property(17));
        assert_eq!(lower.to_string(), "P17");
    }

    #[test]
    fn test_rejects_qualifiers_and_garbage() {
        assert!("Q30-6D0A1B".parse::<EntityId>().is_err());
        assert!("Q".parse::<EntityId>().is_err());
        assert!("X12".parse::<EntityId>().is_err());
        assert!("Q12a".parse::<EntityId>().is_err());
        assert!("".parse::<EntityId>().is_err());
    }

    #[test]
    fn test_from_uri() {
        let id = EntityId::from_uri("http://www.wikidata.org/entity/Q1297").unwrap();
        assert_eq!(id, EntityId::item(1297));
        let prop = EntityId::from_uri("http://www.wikidata.org/prop/direct/P36").unwrap();
        assert_eq!(prop, EntityId::property(36));
    }

    #[test]
    fn test_classify() {
        assert_eq!(Term::classify("Q30"), Some(Term::Entity(EntityId::item(30))));
        assert_eq!(Term::classify("Q30-ABC-DEF"), None);
        assert_eq!(Term::classify("2020-01-01T00:00:00Z"), Some(Term::Literal("2020-01-01T00:00:00Z".into())));
        assert!(!Term::classify("P31").unwrap().is_item());
    }

    #[test]
    fn test_serde_roundtrip_as_string() {
        let json = serde_json::to_string(&EntityId::item(65)).unwrap();
        assert_eq!(json, "\"Q65\"");
        let back: EntityId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, EntityId::item(65));
        assert!(serde_json::from_str::<EntityId>("\"Q65-x\"").is_err());
    }

    #[test]
    fn test_sentinel() {
        assert_eq!(EntityId::NO_ENTITY.to_string(), "Q0");
        assert!(EntityId::NO_ENTITY.is_no_entity());
    }
}
