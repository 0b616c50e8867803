//! Iterative exercise retrieval and fitness-plan synthesis.
//!
//! [`agent::FitnessCoach`] plans sub-goals from a user profile, retrieves
//! exercises over a few adaptive rounds, scores what it found and writes the
//! final recommendation. Retrieval and text generation are injected through
//! the traits in [`capabilities`].

pub mod agent;
pub mod capabilities;
pub mod config;
pub mod knowledge;
pub mod llm_client;
pub mod memory;

pub use agent::profile::UserProfileInput;
pub use agent::{FitnessCoach, RecommendationPayload};
