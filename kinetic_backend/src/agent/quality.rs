use std::collections::BTreeSet;

use super::{
    capped_ratio, distinct_exercise_types, mean_relevance, AgentPlan, QualityAssessment,
    SearchResult,
};

const RELEVANCE_WEIGHT: f64 = 0.4;
const COVERAGE_WEIGHT: f64 = 0.3;
const DIVERSITY_WEIGHT: f64 = 0.3;

/// Distinct muscles plus distinct difficulties that count as full diversity.
const DIVERSITY_SATURATION: f64 = 10.0;

/// Overall score that ends the loop regardless of anything else.
pub const EXCELLENT_QUALITY: f64 = 0.9;

pub struct QualityAssessor;

impl QualityAssessor {
    /// Score a round. Relevance looks at the round's own results; coverage and
    /// diversity look at everything retrieved so far, this round included.
    pub fn assess(
        new_results: &[SearchResult],
        plan: &AgentPlan,
        previous: &[SearchResult],
    ) -> QualityAssessment {
        if new_results.is_empty() {
            return QualityAssessment::default();
        }

        let cumulative = || previous.iter().chain(new_results.iter());

        let relevance = mean_relevance(new_results);
        let coverage = capped_ratio(distinct_exercise_types(cumulative()), plan.sub_goals.len());

        let muscles: BTreeSet<&str> = cumulative()
            .flat_map(|r| r.target_muscles.iter().map(String::as_str))
            .collect();
        let difficulties: BTreeSet<&str> = cumulative().map(|r| r.difficulty.as_str()).collect();
        let diversity =
            ((muscles.len() + difficulties.len()) as f64 / DIVERSITY_SATURATION).min(1.0);

        let overall_score = RELEVANCE_WEIGHT * relevance
            + COVERAGE_WEIGHT * coverage
            + DIVERSITY_WEIGHT * diversity;

        QualityAssessment {
            overall_score,
            relevance,
            coverage,
            diversity,
            meets_criteria: overall_score >= plan.success_criteria.relevance_threshold,
        }
    }
}

/// Decides after each round whether the loop ends.
pub struct StoppingPolicy {
    max_iterations: usize,
}

impl StoppingPolicy {
    pub fn new(max_iterations: usize) -> Self {
        Self { max_iterations }
    }

    pub fn should_stop(&self, assessment: &QualityAssessment, iteration: usize) -> bool {
        assessment.meets_criteria
            || iteration >= self.max_iterations.saturating_sub(1)
            || assessment.overall_score >= EXCELLENT_QUALITY
    }
}
