use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::{distinct_exercise_types, mean_relevance, AgentPlan, SearchResult};

/// Share of sub-goals that distinct exercise types must reach.
const GOAL_ACHIEVEMENT_RATIO: f64 = 0.7;

/// Post-run self-assessment. Read-only over the finished run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reflection {
    pub planning_effectiveness: bool,
    pub goal_achievement: bool,
    pub search_efficiency: f64,
    pub strategy_adaptation: bool,
    pub learnings_for_future: String,
}

pub struct Reflector;

impl Reflector {
    pub fn reflect(plan: &AgentPlan, results: &[SearchResult], rounds_used: usize) -> Reflection {
        let planning_effectiveness = rounds_used <= plan.expected_iterations;
        let goal_achievement = distinct_exercise_types(results) as f64
            >= plan.sub_goals.len() as f64 * GOAL_ACHIEVEMENT_RATIO;
        let sources: BTreeSet<&str> = results.iter().map(|r| r.source.as_str()).collect();
        let strategy_adaptation = sources.len() > 1;

        let learnings_for_future = if results.is_empty() {
            "No exercises were retrieved; the knowledge base needs attention before retrieval can shape the plan."
        } else if !goal_achievement {
            "Retrieved exercises covered few categories; more targeted sub-goal queries would widen coverage."
        } else if !strategy_adaptation {
            "Goals were covered by a single strategy; adaptation was not needed for this profile."
        } else {
            "Strategic planning improved recommendation quality and coverage."
        };

        Reflection {
            planning_effectiveness,
            goal_achievement,
            search_efficiency: mean_relevance(results),
            strategy_adaptation,
            learnings_for_future: learnings_for_future.to_string(),
        }
    }
}
