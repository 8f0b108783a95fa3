//! Feed scoring and duplicate ranking.
//!
//! This module provides:
//! - [`ScoringEngine`]: reliability over the trailing window and the stored
//!   quality/display scores derived from it
//! - [`DuplicateRanker`]: ordering of feeds that carry the same channel

pub mod quality_scorer;
pub mod ranker;

pub use quality_scorer::{display_score, quality_score, reliability_percentage, ScoringEngine};
pub use ranker::DuplicateRanker;
