use super::{mean_relevance, AgentPlan, SearchResult, Strategy};

const GENERIC_TYPE_TERMS: &[&str] = &["general", "basic", "beginner", "simple"];

/// Minimum cumulative results before quality-driven rules apply.
const MIN_RESULTS_FOR_ANALYSIS: usize = 3;

/// Picks the retrieval strategy for a round. Pure and deterministic.
pub struct StrategySelector;

impl StrategySelector {
    pub fn select(plan: &AgentPlan, results: &[SearchResult], iteration: usize) -> Strategy {
        if iteration == 0 {
            return Strategy::BroadSearch;
        }
        if results.len() < MIN_RESULTS_FOR_ANALYSIS {
            return Strategy::MultiAngleApproach;
        }
        if lacks_specificity(results) {
            return Strategy::TargetedSearch;
        }
        if needs_refinement(results) {
            return Strategy::ProgressiveRefinement;
        }
        if plan.search_strategies.is_empty() {
            return Strategy::BroadSearch;
        }
        plan.search_strategies[iteration % plan.search_strategies.len()]
    }
}

/// More than 70% of results carry a generic exercise type.
fn lacks_specificity(results: &[SearchResult]) -> bool {
    let generic = results
        .iter()
        .filter(|r| {
            let kind = r.exercise_type.to_lowercase();
            GENERIC_TYPE_TERMS.iter().any(|t| kind.contains(t))
        })
        .count();
    generic as f64 > results.len() as f64 * 0.7
}

/// Moderate average relevance that another pass could improve.
fn needs_refinement(results: &[SearchResult]) -> bool {
    let avg = mean_relevance(results);
    avg > 0.4 && avg < 0.7
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::profile::Goal;
    use crate::agent::SuccessCriteria;

    fn plan(strategies: Vec<Strategy>) -> AgentPlan {
        AgentPlan {
            primary_goal: Goal::General,
            sub_goals: vec!["find_foundational_exercises".to_string()],
            search_strategies: strategies,
            expected_iterations: 1,
            success_criteria: SuccessCriteria::default(),
        }
    }

    fn result(exercise_type: &str, relevance: f64) -> SearchResult {
        SearchResult {
            content: "Exercise: Plank".to_string(),
            relevance_score: relevance,
            source: "test".to_string(),
            exercise_type: exercise_type.to_string(),
            target_muscles: Default::default(),
            difficulty: "beginner".to_string(),
        }
    }

    #[test]
    fn first_round_is_always_broad() {
        let plans = [
            plan(vec![Strategy::TargetedSearch]),
            plan(vec![Strategy::MultiAngleApproach, Strategy::ProgressiveRefinement]),
        ];
        let histories = [
            vec![],
            vec![result("Strength", 0.9); 10],
            vec![result("general", 0.5); 2],
        ];
        for p in &plans {
            for h in &histories {
                assert_eq!(StrategySelector::select(p, h, 0), Strategy::BroadSearch);
            }
        }
    }

    #[test]
    fn too_few_results_goes_multi_angle() {
        let p = plan(vec![Strategy::BroadSearch]);
        let results = vec![result("Strength", 0.9); 2];
        assert_eq!(
            StrategySelector::select(&p, &results, 1),
            Strategy::MultiAngleApproach
        );
    }

    #[test]
    fn generic_results_go_targeted() {
        let p = plan(vec![Strategy::BroadSearch]);
        let mut results = vec![result("Basic Cardio", 0.9); 8];
        results.extend(vec![result("Strength", 0.9); 2]);
        assert_eq!(
            StrategySelector::select(&p, &results, 1),
            Strategy::TargetedSearch
        );
    }

    #[test]
    fn exactly_seventy_percent_generic_is_not_enough() {
        let p = plan(vec![Strategy::MultiAngleApproach]);
        let mut results = vec![result("general", 0.9); 7];
        results.extend(vec![result("Strength", 0.9); 3]);
        assert_eq!(
            StrategySelector::select(&p, &results, 1),
            Strategy::MultiAngleApproach
        );
    }

    #[test]
    fn moderate_relevance_goes_progressive() {
        let p = plan(vec![Strategy::BroadSearch]);
        let results = vec![result("Strength", 0.5); 4];
        assert_eq!(
            StrategySelector::select(&p, &results, 2),
            Strategy::ProgressiveRefinement
        );
    }

    #[test]
    fn refinement_bounds_are_exclusive() {
        let p = plan(vec![Strategy::TargetedSearch, Strategy::MultiAngleApproach]);
        let low = vec![result("Strength", 0.4); 4];
        let high = vec![result("Strength", 0.7); 4];
        assert_eq!(
            StrategySelector::select(&p, &low, 1),
            Strategy::MultiAngleApproach
        );
        assert_eq!(
            StrategySelector::select(&p, &high, 2),
            Strategy::TargetedSearch
        );
    }
}
