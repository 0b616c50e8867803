//! Strategy execution against the knowledge base.
//!
//! Each [`Strategy`] has one executor. Every query goes out with
//! `filters = None`: metadata filters against the exercise catalogue returned
//! too few hits, so recall wins over precision here. A failing query is
//! logged and contributes nothing; it never aborts the round.

use async_trait::async_trait;
use std::collections::BTreeSet;

use super::profile::Goal;
use super::{AgentPlan, SearchResult, Strategy};
use crate::capabilities::{ExerciseSearch, SearchHit};

/// Hits requested from the knowledge base per query.
pub const QUERY_TOP_K: usize = 5;

const VERB_PREFIXES: &[&str] = &["find_", "identify_", "locate_", "discover_"];

/// Everything a strategy may look at while building its queries.
pub struct SearchContext<'a> {
    pub plan: &'a AgentPlan,
    pub iteration: usize,
}

/// How a raw hit becomes a [`SearchResult`] for one strategy.
struct HitMapping<'a> {
    source: &'a str,
    default_distance: f64,
    default_type: &'a str,
    default_difficulty: &'a str,
}

impl HitMapping<'_> {
    fn to_result(&self, hit: &SearchHit) -> SearchResult {
        let distance = hit.distance.unwrap_or(self.default_distance);
        let target_muscles: BTreeSet<String> =
            hit.meta("body_part").map(str::to_string).into_iter().collect();
        SearchResult {
            content: hit.content.clone(),
            relevance_score: (1.0 - distance).clamp(0.0, 1.0),
            source: self.source.to_string(),
            exercise_type: hit.meta("type").unwrap_or(self.default_type).to_string(),
            target_muscles,
            difficulty: hit
                .meta("level")
                .unwrap_or(self.default_difficulty)
                .to_string(),
        }
    }
}

#[async_trait]
pub trait StrategyExecutor: Send + Sync {
    async fn execute(
        &self,
        search: &dyn ExerciseSearch,
        ctx: &SearchContext<'_>,
    ) -> Vec<SearchResult>;
}

/// Run one query and keep its first `keep` hits; failures yield nothing.
async fn run_query(
    search: &dyn ExerciseSearch,
    query: &str,
    keep: usize,
    mapping: &HitMapping<'_>,
) -> Vec<SearchResult> {
    match search.search(query, None, QUERY_TOP_K).await {
        Ok(hits) => {
            tracing::debug!("Found {} exercises for '{}'", hits.len(), query);
            hits.iter().take(keep).map(|h| mapping.to_result(h)).collect()
        }
        Err(e) => {
            tracing::error!("Search failed for '{}': {:#}", query, e);
            Vec::new()
        }
    }
}

pub struct BroadSearch;

impl BroadSearch {
    pub fn terms(goal: Goal) -> &'static [&'static str] {
        match goal {
            Goal::WeightLoss => &["cardio", "fat burning", "HIIT", "weight loss exercises"],
            Goal::MuscleGain => &[
                "strength training",
                "muscle building",
                "hypertrophy",
                "resistance",
            ],
            Goal::Cardio => &["endurance", "cardiovascular", "aerobic", "cardio training"],
            Goal::Strength => &["strength", "powerlifting", "resistance training", "strong"],
            Goal::General => &["fitness", "exercise", "workout", "training"],
        }
    }
}

#[async_trait]
impl StrategyExecutor for BroadSearch {
    async fn execute(
        &self,
        search: &dyn ExerciseSearch,
        ctx: &SearchContext<'_>,
    ) -> Vec<SearchResult> {
        let terms = Self::terms(ctx.plan.primary_goal);
        tracing::info!("Broad search for {}: {:?}", ctx.plan.primary_goal.as_str(), terms);

        let mapping = HitMapping {
            source: "broad_search",
            default_distance: 0.5,
            default_type: "general",
            default_difficulty: "beginner",
        };

        let mut results = Vec::new();
        for term in terms {
            results.extend(run_query(search, term, 2, &mapping).await);
        }
        results
    }
}

pub struct TargetedSearch;

impl TargetedSearch {
    /// Turn a sub-goal like `find_high_intensity_cardio` into `high intensity cardio`.
    pub fn query_for_sub_goal(sub_goal: &str) -> String {
        let mut query = sub_goal.to_string();
        for prefix in VERB_PREFIXES {
            query = query.replace(prefix, "");
        }
        query.replace('_', " ").trim().to_string()
    }

    async fn run_at(
        search: &dyn ExerciseSearch,
        plan: &AgentPlan,
        index: usize,
        source: &str,
    ) -> Vec<SearchResult> {
        let Some(sub_goal) = plan.sub_goals.get(index).or_else(|| plan.sub_goals.first()) else {
            tracing::warn!("Targeted search skipped: plan has no sub-goals");
            return Vec::new();
        };

        let query = Self::query_for_sub_goal(sub_goal);
        tracing::info!("Targeted search for sub-goal '{}': '{}'", sub_goal, query);

        let mapping = HitMapping {
            source,
            default_distance: 0.6,
            default_type: "targeted",
            default_difficulty: "intermediate",
        };
        run_query(search, &query, 3, &mapping).await
    }
}

#[async_trait]
impl StrategyExecutor for TargetedSearch {
    async fn execute(
        &self,
        search: &dyn ExerciseSearch,
        ctx: &SearchContext<'_>,
    ) -> Vec<SearchResult> {
        Self::run_at(search, ctx.plan, ctx.iteration, "targeted_search").await
    }
}

/// Focused re-query of the highest-priority sub-goal.
///
/// Does not inspect earlier rounds yet; it is a targeted search pinned to
/// the first sub-goal.
pub struct ProgressiveRefinement;

#[async_trait]
impl StrategyExecutor for ProgressiveRefinement {
    async fn execute(
        &self,
        search: &dyn ExerciseSearch,
        ctx: &SearchContext<'_>,
    ) -> Vec<SearchResult> {
        TargetedSearch::run_at(search, ctx.plan, 0, "progressive_refinement").await
    }
}

pub struct MultiAngleApproach;

impl MultiAngleApproach {
    pub fn angles(goal: Goal) -> &'static [&'static str] {
        match goal {
            Goal::WeightLoss => &[
                "beginner weight loss",
                "advanced fat burning",
                "cardio for weight loss",
            ],
            Goal::MuscleGain => &[
                "beginner muscle building",
                "advanced hypertrophy",
                "strength for muscle",
            ],
            Goal::Cardio => &["running cardio", "HIIT cardio", "low intensity cardio"],
            Goal::Strength => &["powerlifting", "bodyweight strength", "dumbbell strength"],
            Goal::General => &["beginner fitness", "intermediate fitness", "advanced fitness"],
        }
    }
}

#[async_trait]
impl StrategyExecutor for MultiAngleApproach {
    async fn execute(
        &self,
        search: &dyn ExerciseSearch,
        ctx: &SearchContext<'_>,
    ) -> Vec<SearchResult> {
        let angles = Self::angles(ctx.plan.primary_goal);
        tracing::info!("Multi-angle search for {}: {:?}", ctx.plan.primary_goal.as_str(), angles);

        let mut results = Vec::new();
        for angle in angles {
            let source = format!("multi_angle:{}", angle.replace(' ', "_"));
            let mapping = HitMapping {
                source: &source,
                default_distance: 0.55,
                default_type: "multi_angle",
                default_difficulty: "varied",
            };
            results.extend(run_query(search, angle, 2, &mapping).await);
        }
        results
    }
}

impl Strategy {
    pub fn executor(self) -> &'static dyn StrategyExecutor {
        match self {
            Strategy::BroadSearch => &BroadSearch,
            Strategy::TargetedSearch => &TargetedSearch,
            Strategy::ProgressiveRefinement => &ProgressiveRefinement,
            Strategy::MultiAngleApproach => &MultiAngleApproach,
        }
    }
}

/// Runs the selected strategy and reports what it found.
pub struct SearchExecutor;

impl SearchExecutor {
    pub async fn execute(
        strategy: Strategy,
        search: &dyn ExerciseSearch,
        ctx: &SearchContext<'_>,
    ) -> Vec<SearchResult> {
        let results = strategy.executor().execute(search, ctx).await;
        tracing::info!(
            "{} complete: {} result(s) in iteration {}",
            strategy.as_str(),
            results.len(),
            ctx.iteration + 1
        );
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::planner::Planner;
    use crate::agent::profile::{ProfileAnalyzer, UserProfileInput};
    use anyhow::Result;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    /// Records every query and answers with a fixed hit list.
    struct RecordingSearch {
        queries: Mutex<Vec<String>>,
        hits: Vec<SearchHit>,
        fail_on: Option<&'static str>,
    }

    impl RecordingSearch {
        fn new(hits: Vec<SearchHit>) -> Self {
            Self {
                queries: Mutex::new(Vec::new()),
                hits,
                fail_on: None,
            }
        }

        fn queries(&self) -> Vec<String> {
            self.queries.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ExerciseSearch for RecordingSearch {
        async fn search(
            &self,
            query: &str,
            filters: Option<&BTreeMap<String, String>>,
            top_k: usize,
        ) -> Result<Vec<SearchHit>> {
            assert!(filters.is_none());
            assert_eq!(top_k, QUERY_TOP_K);
            self.queries.lock().unwrap().push(query.to_string());
            if self.fail_on.is_some_and(|f| f == query) {
                anyhow::bail!("index offline");
            }
            Ok(self.hits.clone())
        }
    }

    fn hit(kind: &str, body_part: &str, level: &str, distance: Option<f64>) -> SearchHit {
        let mut metadata = BTreeMap::new();
        metadata.insert("type".to_string(), kind.to_string());
        metadata.insert("body_part".to_string(), body_part.to_string());
        metadata.insert("level".to_string(), level.to_string());
        SearchHit {
            content: "Exercise: Burpee".to_string(),
            metadata,
            distance,
        }
    }

    fn plan_for(goal: &str) -> AgentPlan {
        let input = UserProfileInput {
            goal: Some(goal.to_string()),
            ..Default::default()
        };
        let profile = ProfileAnalyzer::analyze(&input, "");
        Planner::create_plan(&profile, 3)
    }

    #[tokio::test]
    async fn broad_search_keeps_two_per_term() {
        let search = RecordingSearch::new(vec![hit("Cardio", "Legs", "Beginner", Some(0.2)); 5]);
        let plan = plan_for("weight_loss");
        let ctx = SearchContext {
            plan: &plan,
            iteration: 0,
        };

        let results = SearchExecutor::execute(Strategy::BroadSearch, &search, &ctx).await;
        assert_eq!(results.len(), 8);
        assert_eq!(
            search.queries(),
            vec!["cardio", "fat burning", "HIIT", "weight loss exercises"]
        );
        assert!((results[0].relevance_score - 0.8).abs() < 1e-9);
        assert_eq!(results[0].source, "broad_search");
        assert!(results[0].target_muscles.contains("Legs"));
    }

    #[tokio::test]
    async fn missing_metadata_uses_strategy_defaults() {
        let bare = SearchHit {
            content: "Exercise: Mystery".to_string(),
            metadata: BTreeMap::new(),
            distance: None,
        };
        let search = RecordingSearch::new(vec![bare]);
        let plan = plan_for("general");
        let ctx = SearchContext {
            plan: &plan,
            iteration: 1,
        };

        let broad = BroadSearch.execute(&search, &ctx).await;
        assert!((broad[0].relevance_score - 0.5).abs() < 1e-9);
        assert_eq!(broad[0].exercise_type, "general");
        assert_eq!(broad[0].difficulty, "beginner");
        assert!(broad[0].target_muscles.is_empty());

        let targeted = TargetedSearch.execute(&search, &ctx).await;
        assert!((targeted[0].relevance_score - 0.4).abs() < 1e-9);
        assert_eq!(targeted[0].exercise_type, "targeted");
        assert_eq!(targeted[0].difficulty, "intermediate");

        let multi = MultiAngleApproach.execute(&search, &ctx).await;
        assert!((multi[0].relevance_score - 0.45).abs() < 1e-9);
        assert_eq!(multi[0].exercise_type, "multi_angle");
        assert_eq!(multi[0].difficulty, "varied");
    }

    #[tokio::test]
    async fn targeted_search_uses_sub_goal_for_iteration() {
        let search = RecordingSearch::new(vec![hit("Strength", "Chest", "Expert", Some(0.1)); 5]);
        let plan = plan_for("weight_loss");

        for (iteration, expected) in [
            (1, "calorie burning exercises"),
            (9, "high intensity cardio"),
        ] {
            let ctx = SearchContext {
                plan: &plan,
                iteration,
            };
            let results = TargetedSearch.execute(&search, &ctx).await;
            assert_eq!(results.len(), 3);
            assert_eq!(search.queries().last().map(String::as_str), Some(expected));
        }
    }

    #[tokio::test]
    async fn progressive_refinement_pins_first_sub_goal() {
        let search = RecordingSearch::new(vec![hit("Strength", "Chest", "Expert", Some(0.1)); 5]);
        let plan = plan_for("muscle_gain");
        let ctx = SearchContext {
            plan: &plan,
            iteration: 2,
        };

        let results = ProgressiveRefinement.execute(&search, &ctx).await;
        assert_eq!(results.len(), 3);
        assert_eq!(search.queries(), vec!["progressive strength exercises"]);
        assert_eq!(results[0].source, "progressive_refinement");
    }

    #[tokio::test]
    async fn multi_angle_tags_sources_per_angle() {
        let search = RecordingSearch::new(vec![hit("Cardio", "Legs", "Beginner", Some(0.3)); 5]);
        let plan = plan_for("cardio");
        let ctx = SearchContext {
            plan: &plan,
            iteration: 1,
        };

        let results = MultiAngleApproach.execute(&search, &ctx).await;
        assert_eq!(results.len(), 6);
        let sources: BTreeSet<&str> = results.iter().map(|r| r.source.as_str()).collect();
        assert_eq!(sources.len(), 3);
        assert!(sources.contains("multi_angle:low_intensity_cardio"));
    }

    #[tokio::test]
    async fn failed_query_is_skipped_not_fatal() {
        let mut search =
            RecordingSearch::new(vec![hit("Cardio", "Legs", "Beginner", Some(0.3)); 5]);
        search.fail_on = Some("fat burning");
        let plan = plan_for("weight_loss");
        let ctx = SearchContext {
            plan: &plan,
            iteration: 0,
        };

        let results = BroadSearch.execute(&search, &ctx).await;
        assert_eq!(results.len(), 6);
        assert_eq!(search.queries().len(), 4);
    }

    #[test]
    fn sub_goal_query_strips_verbs_and_underscores() {
        assert_eq!(
            TargetedSearch::query_for_sub_goal("identify_calorie_burning_exercises"),
            "calorie burning exercises"
        );
        assert_eq!(
            TargetedSearch::query_for_sub_goal("address_form_corrections"),
            "address form corrections"
        );
    }

    #[test]
    fn distances_outside_unit_range_are_clamped() {
        let mapping = HitMapping {
            source: "t",
            default_distance: 0.5,
            default_type: "general",
            default_difficulty: "beginner",
        };
        let far = mapping.to_result(&hit("Cardio", "Legs", "Beginner", Some(1.7)));
        assert_eq!(far.relevance_score, 0.0);
    }
}
