//! # Knowledge Graph Model
//!
//! Plain DTOs shared by every layer: ids, edge endpoints, neighbour records
//! and relation conditions.
//!
//! Design rule: no HTTP, no graph storage, no async here.

pub mod condition;
pub mod entity;

pub use condition::{RelationCondition, render_conditions};
pub use entity::{EntityId, Namespace, NeighbourRecord, Term, is_qualifier_artifact, last_segment};
