//! # Assignment Decision Engine
//!
//! Ranks available developers for a categorized bug and returns the winner only
//! when it clears a confidence floor. The engine is pure and synchronous: it reads
//! borrowed snapshots, takes `now` as an input and never touches I/O, so the same
//! inputs always produce the same decision.

pub mod decision;
pub mod scoring;
pub mod skill_confidence;
pub mod skills;

pub use decision::{
    rank_candidates, AssignmentEngine, AssignmentResult, DecisionContext, EngineConfig,
};
pub use scoring::CandidateScore;
pub use skills::required_skills;
