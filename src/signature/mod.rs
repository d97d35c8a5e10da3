//! # Signatures
//!
//! candidates → [`ConnectionAggregator`] → [`build_signature`] →
//! [`NeighbourRanker`] → answer entity.
//!
//! Tables built here live for a single request. The worker pool is the only
//! piece meant to outlive one; share it by cloning.

pub mod aggregator;
pub mod builder;
pub mod ranker;

pub use aggregator::{ConnectionAggregator, ConnectionTable, Tally, WorkerPool, DEFAULT_WORKERS};
pub use builder::{build_signature, SignatureEntry, SignatureTable};
pub use ranker::{select_conditions, NeighbourRanker, RankingOptions, ScoreTable, WeightedCondition};
