pub mod planner;
pub mod profile;
pub mod quality;
pub mod reflection;
pub mod search;
pub mod strategy;
pub mod synthesis;
pub mod vision;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use crate::capabilities::{ExerciseSearch, Generator};
use crate::config::CoachConfig;
use crate::memory::AgentMemory;
use planner::Planner;
use profile::{Goal, ProfileAnalyzer, UserProfile, UserProfileInput};
use quality::{QualityAssessor, StoppingPolicy};
use reflection::{Reflection, Reflector};
use search::{SearchContext, SearchExecutor};
use strategy::StrategySelector;
use synthesis::{AgenticMetadata, SynthesisInput, Synthesizer};
use vision::VisualAnalyzer;

/// One of the four retrieval tactics a round can use.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    BroadSearch,
    TargetedSearch,
    ProgressiveRefinement,
    MultiAngleApproach,
}

impl Strategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Strategy::BroadSearch => "broad_search",
            Strategy::TargetedSearch => "targeted_search",
            Strategy::ProgressiveRefinement => "progressive_refinement",
            Strategy::MultiAngleApproach => "multi_angle_approach",
        }
    }

    /// Human-readable name, e.g. "multi angle approach".
    pub fn label(self) -> String {
        self.as_str().replace('_', " ")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub content: String,
    pub relevance_score: f64,
    pub source: String,
    pub exercise_type: String,
    pub target_muscles: BTreeSet<String>,
    pub difficulty: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuccessCriteria {
    pub relevance_threshold: f64,
    pub coverage_target: f64,
    pub diversity_minimum: usize,
    pub practical_applicability: f64,
}

impl Default for SuccessCriteria {
    fn default() -> Self {
        Self {
            relevance_threshold: 0.7,
            coverage_target: 0.8,
            diversity_minimum: 3,
            practical_applicability: 0.9,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentPlan {
    pub primary_goal: Goal,
    /// Ordered by priority.
    pub sub_goals: Vec<String>,
    pub search_strategies: Vec<Strategy>,
    pub expected_iterations: usize,
    pub success_criteria: SuccessCriteria,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityAssessment {
    pub overall_score: f64,
    pub relevance: f64,
    pub coverage: f64,
    pub diversity: f64,
    pub meets_criteria: bool,
}

/// What happened in a single retrieval round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundRecord {
    pub iteration: usize,
    pub strategy: Strategy,
    pub result_count: usize,
    pub quality: QualityAssessment,
    pub stopped: bool,
}

/// Final output of a recommendation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationPayload {
    pub run_id: String,
    pub recommendation: String,
    pub agentic_metadata: AgenticMetadata,
    pub search_results_used: usize,
    pub agent_confidence: f64,
    pub fallback_mode: bool,
    pub enhanced_with: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agentic_insights: Option<Reflection>,
    pub agent_plan: AgentPlan,
    pub user_profile: UserProfile,
    pub iterations_used: usize,
    pub strategies_employed: Vec<Strategy>,
    pub rounds: Vec<RoundRecord>,
    pub generated_at: DateTime<Utc>,
}

/// Mean relevance, 0.0 for an empty slice.
pub(crate) fn mean_relevance(results: &[SearchResult]) -> f64 {
    if results.is_empty() {
        return 0.0;
    }
    results.iter().map(|r| r.relevance_score).sum::<f64>() / results.len() as f64
}

pub(crate) fn distinct_exercise_types<'a, I>(results: I) -> usize
where
    I: IntoIterator<Item = &'a SearchResult>,
{
    results
        .into_iter()
        .map(|r| r.exercise_type.as_str())
        .collect::<BTreeSet<_>>()
        .len()
}

/// `numerator / denominator` capped at 1.0, or 0.0 when the denominator is zero.
pub(crate) fn capped_ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        return 0.0;
    }
    (numerator as f64 / denominator as f64).min(1.0)
}

/// Iterative retrieval controller.
///
/// One instance per concurrent request: the strategy memory is plain owned
/// state, and the entry point takes `&mut self`.
pub struct FitnessCoach {
    config: CoachConfig,
    search: Arc<dyn ExerciseSearch>,
    generator: Option<Arc<dyn Generator>>,
    vision: Option<Arc<dyn Generator>>,
    memory: AgentMemory,
}

impl FitnessCoach {
    pub fn new(
        config: CoachConfig,
        search: Arc<dyn ExerciseSearch>,
        generator: Option<Arc<dyn Generator>>,
    ) -> Self {
        Self {
            config,
            search,
            vision: generator.clone(),
            generator,
            memory: AgentMemory::new(),
        }
    }

    /// Use a different generator (usually another model) for image analysis.
    pub fn with_vision_generator(mut self, vision: Option<Arc<dyn Generator>>) -> Self {
        self.vision = vision;
        self
    }

    pub fn config(&self) -> &CoachConfig {
        &self.config
    }

    pub fn memory(&self) -> &AgentMemory {
        &self.memory
    }

    /// Produce a recommendation. Never fails; degradation is reported through
    /// `fallback_mode`, `agent_confidence` and `enhanced_with`.
    pub async fn generate_recommendation(
        &mut self,
        input: &UserProfileInput,
        images: &[PathBuf],
    ) -> RecommendationPayload {
        let run_id = uuid::Uuid::new_v4().to_string();
        tracing::info!("Starting recommendation run {}", run_id);

        let image_analysis = VisualAnalyzer::new(self.vision.clone(), &self.config)
            .analyze(images, input)
            .await;

        let profile = ProfileAnalyzer::analyze(input, &image_analysis);
        let plan = Planner::create_plan(&profile, self.config.max_iterations);
        tracing::info!(
            "Plan for {}: {} sub-goal(s), strategies {:?}",
            plan.primary_goal.as_str(),
            plan.sub_goals.len(),
            plan.search_strategies
        );

        let (results, rounds) = self.run_rounds(&plan).await;

        let synthesis = Synthesizer::new(self.generator.clone(), &self.config)
            .synthesize(SynthesisInput {
                results: &results,
                plan: &plan,
                profile: &profile,
                image_count: images.len(),
                image_analysis: &image_analysis,
                memory: &self.memory,
            })
            .await;

        let agentic_insights = self
            .config
            .reflection_mode
            .then(|| Reflector::reflect(&plan, &results, rounds.len()));

        tracing::info!(
            "Run {} finished: {} round(s), {} result(s), confidence {:.2}",
            run_id,
            rounds.len(),
            results.len(),
            synthesis.agent_confidence
        );

        RecommendationPayload {
            run_id,
            recommendation: synthesis.recommendation,
            agentic_metadata: synthesis.agentic_metadata,
            search_results_used: results.len(),
            agent_confidence: synthesis.agent_confidence,
            fallback_mode: synthesis.fallback_mode,
            enhanced_with: synthesis.enhanced_with,
            agentic_insights,
            iterations_used: rounds.len(),
            strategies_employed: rounds.iter().map(|r| r.strategy).collect(),
            agent_plan: plan,
            user_profile: profile,
            rounds,
            generated_at: Utc::now(),
        }
    }

    async fn run_rounds(&mut self, plan: &AgentPlan) -> (Vec<SearchResult>, Vec<RoundRecord>) {
        let max_iterations = self.config.max_iterations;
        let stopping = StoppingPolicy::new(max_iterations);
        let mut results: Vec<SearchResult> = Vec::new();
        let mut rounds = Vec::new();

        for iteration in 0..max_iterations {
            let strategy = StrategySelector::select(plan, &results, iteration);
            tracing::info!(
                "Iteration {}/{}: {}",
                iteration + 1,
                max_iterations,
                strategy.as_str()
            );

            let ctx = SearchContext { plan, iteration };
            let new_results = SearchExecutor::execute(strategy, self.search.as_ref(), &ctx).await;
            let quality = QualityAssessor::assess(&new_results, plan, &results);
            let result_count = new_results.len();
            results.extend(new_results);

            tracing::info!(
                "Iteration {} quality: {:.2} ({} new result(s))",
                iteration + 1,
                quality.overall_score,
                result_count
            );

            let stopped = stopping.should_stop(&quality, iteration);
            rounds.push(RoundRecord {
                iteration,
                strategy,
                result_count,
                quality,
                stopped,
            });

            if stopped {
                tracing::info!("Stopping after {} iteration(s)", iteration + 1);
                break;
            }
            self.memory
                .record(strategy, quality.overall_score, result_count);
        }

        (results, rounds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::SearchHit;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::collections::BTreeMap;

    struct FixedSearch {
        hits: Vec<SearchHit>,
    }

    #[async_trait]
    impl ExerciseSearch for FixedSearch {
        async fn search(
            &self,
            _query: &str,
            _filters: Option<&BTreeMap<String, String>>,
            top_k: usize,
        ) -> Result<Vec<SearchHit>> {
            Ok(self.hits.iter().take(top_k).cloned().collect())
        }
    }

    fn generic_hits(distance: f64) -> Vec<SearchHit> {
        (0..5)
            .map(|i| {
                let mut metadata = BTreeMap::new();
                metadata.insert("type".to_string(), "general".to_string());
                SearchHit {
                    content: format!("Exercise: Move {}", i),
                    metadata,
                    distance: Some(distance),
                }
            })
            .collect()
    }

    fn coach(max_iterations: usize, hits: Vec<SearchHit>) -> FitnessCoach {
        let config = CoachConfig {
            max_iterations,
            ..CoachConfig::from_lookup(|_| None)
        };
        FitnessCoach::new(config, Arc::new(FixedSearch { hits }), None)
    }

    #[test]
    fn helpers_are_zero_on_empty_input() {
        assert_eq!(mean_relevance(&[]), 0.0);
        assert_eq!(distinct_exercise_types(&Vec::<SearchResult>::new()), 0);
        assert_eq!(capped_ratio(3, 0), 0.0);
        assert_eq!(capped_ratio(9, 4), 1.0);
    }

    #[test]
    fn strategy_serializes_snake_case() {
        let json = serde_json::to_string(&Strategy::MultiAngleApproach).unwrap();
        assert_eq!(json, "\"multi_angle_approach\"");
        assert_eq!(Strategy::ProgressiveRefinement.label(), "progressive refinement");
    }

    #[tokio::test]
    async fn rounds_never_exceed_max_iterations() {
        for max in 0..5 {
            let mut coach = coach(max, generic_hits(0.5));
            let payload = coach
                .generate_recommendation(&UserProfileInput::default(), &[])
                .await;
            assert!(payload.iterations_used <= max);
            let per_round: usize = payload.rounds.iter().map(|r| r.result_count).sum();
            assert_eq!(per_round, payload.search_results_used);
            assert_eq!(payload.strategies_employed.len(), payload.rounds.len());
        }
    }

    #[tokio::test]
    async fn memory_only_records_rounds_that_continue() {
        let mut coach = coach(3, generic_hits(0.5));
        let payload = coach
            .generate_recommendation(&UserProfileInput::default(), &[])
            .await;

        let recorded: usize = [
            Strategy::BroadSearch,
            Strategy::TargetedSearch,
            Strategy::ProgressiveRefinement,
            Strategy::MultiAngleApproach,
        ]
        .into_iter()
        .map(|s| coach.memory().outcomes(s).count())
        .sum();
        let continued = payload.rounds.iter().filter(|r| !r.stopped).count();
        assert_eq!(recorded, continued);
        assert!(payload.rounds.last().is_some_and(|r| r.stopped));
    }

    #[tokio::test]
    async fn empty_index_still_yields_recommendation() {
        let mut coach = coach(3, Vec::new());
        let payload = coach
            .generate_recommendation(&UserProfileInput::default(), &[])
            .await;
        assert_eq!(payload.search_results_used, 0);
        assert_eq!(payload.agent_confidence, 0.0);
        assert!(!payload.recommendation.trim().is_empty());
        assert!(payload.fallback_mode);
        assert!(payload.agentic_insights.is_some());
    }
}
