//! Final recommendation assembly.
//!
//! The narrative comes from the generation capability when one is configured
//! and answers in time; otherwise a baseline plan is composed locally. High
//! relevance exercises from the run are spliced in ahead of the weekly
//! structure, and the run's insights are appended.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use super::profile::{Goal, UserProfile, VisualInsights, VISUAL_ANALYSIS_SKIPPED};
use super::search::TargetedSearch;
use super::{capped_ratio, distinct_exercise_types, mean_relevance, AgentPlan, SearchResult};
use crate::capabilities::{GenerationRequest, Generator, UserContent};
use crate::config::CoachConfig;
use crate::memory::AgentMemory;

/// Results at or above this relevance are listed as concrete exercises.
pub const HIGH_QUALITY_RELEVANCE: f64 = 0.7;
pub const MAX_CATEGORIES: usize = 5;
pub const MAX_EXERCISES_PER_CATEGORY: usize = 3;

pub const WEEKLY_STRUCTURE_MARKER: &str = "COMPREHENSIVE WEEKLY STRUCTURE";
const EXERCISE_SECTION_HEADER: &str = "SPECIFIC EXERCISES FROM THE EXERCISE INDEX:";

/// Visual text shorter than this is treated as a limited analysis.
const MEANINGFUL_ANALYSIS_CHARS: usize = 50;

const NARRATIVE_SYSTEM_PROMPT: &str = "You are a certified personal trainer writing a personalized weekly fitness plan.\n\
Respect every health consideration listed. Keep the plan practical for the equipment available.\n\
Structure the answer as: a short assessment, a section that starts with the line \
\"COMPREHENSIVE WEEKLY STRUCTURE:\" listing each day of the week, then progression and safety notes.";

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub overall_quality: f64,
    pub goal_coverage: f64,
    pub confidence: f64,
}

impl QualityMetrics {
    pub fn compute(results: &[SearchResult], plan: &AgentPlan) -> Self {
        if results.is_empty() {
            return Self::default();
        }
        let overall_quality = mean_relevance(results);
        let goal_coverage = capped_ratio(distinct_exercise_types(results), plan.sub_goals.len());
        Self {
            overall_quality,
            goal_coverage,
            confidence: 0.6 * overall_quality + 0.4 * goal_coverage,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgenticMetadata {
    pub search_strategy_analysis: String,
    pub personalized_insights: String,
    pub progressive_recommendations: String,
    pub quality_metrics: QualityMetrics,
    pub visual_assessment_integration: String,
}

pub struct SynthesisInput<'a> {
    pub results: &'a [SearchResult],
    pub plan: &'a AgentPlan,
    pub profile: &'a UserProfile,
    pub image_count: usize,
    pub image_analysis: &'a str,
    pub memory: &'a AgentMemory,
}

#[derive(Debug, Clone)]
pub struct Synthesis {
    pub recommendation: String,
    pub agentic_metadata: AgenticMetadata,
    pub agent_confidence: f64,
    pub fallback_mode: bool,
    pub enhanced_with: Vec<String>,
}

pub struct Synthesizer {
    generator: Option<Arc<dyn Generator>>,
    max_tokens: u32,
    temperature: f32,
    timeout: Duration,
}

impl Synthesizer {
    pub fn new(generator: Option<Arc<dyn Generator>>, config: &CoachConfig) -> Self {
        Self {
            generator,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            timeout: config.synthesis_timeout(),
        }
    }

    pub async fn synthesize(&self, input: SynthesisInput<'_>) -> Synthesis {
        let quality_metrics = QualityMetrics::compute(input.results, input.plan);
        let visual_usable = usable_visual_analysis(input.image_analysis).is_some();

        let agentic_metadata = AgenticMetadata {
            search_strategy_analysis: strategy_analysis(input.memory),
            personalized_insights: personalized_insights(
                input.profile,
                input.results,
                input.image_analysis,
            ),
            progressive_recommendations: progressive_plan(input.results),
            quality_metrics,
            visual_assessment_integration: visual_integration(
                &input.profile.visual_insights,
                input.image_analysis,
                input.image_count,
            ),
        };

        let generated = self.generate_narrative(&input).await;
        let fallback_mode = generated.is_none();
        let narrative = generated.unwrap_or_else(|| baseline_narrative(input.profile, input.plan));

        let exercises = format_exercises(input.results, input.plan.primary_goal);
        let body = if exercises.is_empty() {
            tracing::warn!("No high-relevance exercises to splice into the plan");
            narrative
        } else {
            splice_exercises(&narrative, &exercises)
        };

        let recommendation = compose_recommendation(&body, &agentic_metadata, input.results.len());

        let mut enhanced_with = vec!["agentic_planning".to_string()];
        if !input.results.is_empty() {
            enhanced_with.push("exercise_index".to_string());
        }
        if !fallback_mode {
            enhanced_with.push("llm_narrative".to_string());
        }
        if visual_usable {
            enhanced_with.push("visual_analysis".to_string());
        }

        Synthesis {
            recommendation,
            agent_confidence: quality_metrics.confidence,
            agentic_metadata,
            fallback_mode,
            enhanced_with,
        }
    }

    /// `None` when there is no generator, it fails, times out, or says nothing.
    async fn generate_narrative(&self, input: &SynthesisInput<'_>) -> Option<String> {
        let Some(generator) = &self.generator else {
            tracing::info!("No generation capability configured, using baseline plan");
            return None;
        };

        let request = GenerationRequest {
            system_prompt: NARRATIVE_SYSTEM_PROMPT.to_string(),
            user_content: UserContent::Text(narrative_brief(input.profile, input.plan)),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        match tokio::time::timeout(self.timeout, generator.generate(request)).await {
            Ok(Ok(text)) if !text.trim().is_empty() => {
                tracing::info!("Narrative from {}: {} characters", generator.name(), text.len());
                Some(text.trim().to_string())
            }
            Ok(Ok(_)) => {
                tracing::warn!(
                    "{} returned an empty narrative, using baseline plan",
                    generator.name()
                );
                None
            }
            Ok(Err(e)) => {
                tracing::error!("Narrative generation failed: {:#}", e);
                None
            }
            Err(_) => {
                tracing::error!(
                    "Narrative generation timed out after {}s, using baseline plan",
                    self.timeout.as_secs()
                );
                None
            }
        }
    }
}

/// The visual text when it is a real analysis rather than a skip notice.
fn usable_visual_analysis(image_analysis: &str) -> Option<&str> {
    let trimmed = image_analysis.trim();
    (!trimmed.is_empty() && !trimmed.starts_with(VISUAL_ANALYSIS_SKIPPED)).then_some(trimmed)
}

fn humanize(tag: &str) -> String {
    tag.replace('_', " ")
}

fn join_or(items: &BTreeSet<String>, empty: &str) -> String {
    if items.is_empty() {
        empty.to_string()
    } else {
        items.iter().map(|i| humanize(i)).collect::<Vec<_>>().join(", ")
    }
}

fn describe_person(profile: &UserProfile) -> String {
    let d = &profile.demographics;
    let mut text = format!("{}-year-old {}, {} lbs", d.age, d.gender, d.weight);
    if let Some(height) = d.height {
        text.push_str(&format!(", {} in tall", height));
    }
    text
}

fn narrative_brief(profile: &UserProfile, plan: &AgentPlan) -> String {
    let focus: Vec<String> = plan
        .sub_goals
        .iter()
        .map(|g| TargetedSearch::query_for_sub_goal(g))
        .collect();
    let mut brief = format!(
        "Client: {}\nGoal: {}\nFitness level: {}\nMotivation: {}\nTime availability: {}\n\
         Equipment: {}\nHealth considerations: {}\nFocus areas: {}\n",
        describe_person(profile),
        humanize(plan.primary_goal.as_str()),
        humanize(&profile.fitness_level),
        humanize(&profile.motivation_level),
        humanize(&profile.time_availability),
        join_or(&profile.equipment_access, "bodyweight only"),
        join_or(&profile.health_constraints, "none reported"),
        focus.join("; "),
    );
    if let Some(visual) = usable_visual_analysis(&profile.image_analysis) {
        brief.push_str(&format!("Visual assessment:\n{}\n", visual));
    }
    brief
}

fn weekly_template(goal: Goal) -> [&'static str; 7] {
    match goal {
        Goal::WeightLoss => [
            "Monday: 30-40 min intervals plus full-body circuit",
            "Tuesday: 30 min steady-state cardio",
            "Wednesday: full-body strength circuit",
            "Thursday: active recovery walk and mobility",
            "Friday: HIIT session, 20-25 min",
            "Saturday: long low-intensity cardio, 45-60 min",
            "Sunday: rest",
        ],
        Goal::MuscleGain => [
            "Monday: upper body push",
            "Tuesday: lower body, squat focus",
            "Wednesday: rest or light mobility",
            "Thursday: upper body pull",
            "Friday: lower body, hinge focus",
            "Saturday: arms and core accessories",
            "Sunday: rest",
        ],
        Goal::Cardio => [
            "Monday: easy aerobic run or ride, 30-40 min",
            "Tuesday: interval session",
            "Wednesday: cross-training and mobility",
            "Thursday: tempo session, 20-30 min",
            "Friday: rest",
            "Saturday: long endurance session",
            "Sunday: recovery walk",
        ],
        Goal::Strength => [
            "Monday: heavy squat day",
            "Tuesday: bench press and upper accessories",
            "Wednesday: rest",
            "Thursday: deadlift day",
            "Friday: overhead press and upper accessories",
            "Saturday: conditioning and core",
            "Sunday: rest",
        ],
        Goal::General => [
            "Monday: full-body strength",
            "Tuesday: 30 min cardio",
            "Wednesday: mobility and core",
            "Thursday: full-body strength",
            "Friday: 30 min cardio",
            "Saturday: outdoor activity of choice",
            "Sunday: rest",
        ],
    }
}

fn constraint_note(tag: &str) -> Option<&'static str> {
    match tag {
        "low_impact_preferred" => {
            Some("Favor low-impact options such as cycling, swimming or the elliptical over jumping and running.")
        }
        "spine_neutral_exercises" => Some("Keep a neutral spine and avoid loaded spinal flexion."),
        "moderate_intensity_only" => {
            Some("Keep intensity moderate and stop if you feel chest discomfort or dizziness.")
        }
        _ => None,
    }
}

/// Locally composed plan used when no generated narrative is available.
pub fn baseline_narrative(profile: &UserProfile, plan: &AgentPlan) -> String {
    let mut lines = vec![
        format!(
            "PERSONALIZED {} PLAN",
            humanize(plan.primary_goal.as_str()).to_uppercase()
        ),
        String::new(),
        format!("Profile: {}", describe_person(profile)),
        format!("Fitness level: {}", humanize(&profile.fitness_level)),
        format!(
            "Equipment: {}",
            join_or(&profile.equipment_access, "bodyweight only")
        ),
        format!(
            "Health considerations: {}",
            join_or(&profile.health_constraints, "none reported")
        ),
        String::new(),
        "Focus areas:".to_string(),
    ];
    lines.extend(
        plan.sub_goals
            .iter()
            .map(|g| format!("- {}", TargetedSearch::query_for_sub_goal(g))),
    );

    lines.push(String::new());
    lines.push(format!("{}:", WEEKLY_STRUCTURE_MARKER));
    lines.extend(
        weekly_template(plan.primary_goal)
            .iter()
            .map(|day| format!("- {}", day)),
    );

    lines.push(String::new());
    lines.push("Safety notes:".to_string());
    lines.extend(
        profile
            .health_constraints
            .iter()
            .filter_map(|c| constraint_note(c))
            .map(|note| format!("- {}", note)),
    );
    lines.push("- Warm up for 5-10 minutes before every session.".to_string());

    lines.join("\n")
}

fn sets_and_reps(goal: Goal) -> &'static str {
    match goal {
        Goal::MuscleGain => "4 sets of 6-8 reps",
        Goal::WeightLoss => "3 sets of 12-15 reps",
        Goal::Strength => "5 sets of 3-5 reps",
        Goal::Cardio | Goal::General => "3 sets of 10-12 reps",
    }
}

/// Capitalize the first letter of every word.
fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut previous_alpha = false;
    for c in text.chars() {
        if previous_alpha {
            out.extend(c.to_lowercase());
        } else {
            out.extend(c.to_uppercase());
        }
        previous_alpha = c.is_alphabetic();
    }
    out
}

fn exercise_name(content: &str) -> String {
    let first_line = content.lines().next().unwrap_or_default();
    let first_line = first_line
        .strip_prefix("Exercise:")
        .unwrap_or(first_line);
    let name = first_line.split('.').next().unwrap_or_default().trim();
    if name.chars().count() > 100 {
        match name.split_once(':') {
            Some((head, _)) => head.trim().to_string(),
            None => format!("{}...", name.chars().take(50).collect::<String>()),
        }
    } else {
        name.to_string()
    }
}

/// High-relevance results grouped by exercise type, best categories first.
pub fn format_exercises(results: &[SearchResult], goal: Goal) -> String {
    let mut categories: Vec<(&str, Vec<&SearchResult>)> = Vec::new();
    for result in results
        .iter()
        .filter(|r| r.relevance_score >= HIGH_QUALITY_RELEVANCE)
    {
        match categories
            .iter_mut()
            .find(|(kind, _)| *kind == result.exercise_type)
        {
            Some((_, members)) => members.push(result),
            None => categories.push((result.exercise_type.as_str(), vec![result])),
        }
    }
    if categories.is_empty() {
        return String::new();
    }

    let best = |members: &[&SearchResult]| {
        members
            .iter()
            .map(|r| r.relevance_score)
            .fold(0.0_f64, f64::max)
    };
    for (_, members) in categories.iter_mut() {
        members.sort_by(|a, b| b.relevance_score.total_cmp(&a.relevance_score));
    }
    categories.sort_by(|(_, a), (_, b)| best(b.as_slice()).total_cmp(&best(a.as_slice())));

    let scheme = sets_and_reps(goal);
    let mut lines = vec!["Recommended exercises from the exercise index:".to_string()];
    for (kind, members) in categories.iter().take(MAX_CATEGORIES) {
        lines.push(String::new());
        lines.push(format!("{}:", title_case(kind)));
        for result in members.iter().take(MAX_EXERCISES_PER_CATEGORY) {
            lines.push(format!(
                "- {} - {} ({} level)",
                exercise_name(&result.content),
                scheme,
                title_case(&result.difficulty)
            ));
        }
    }
    lines.join("\n")
}

/// Insert the exercise section before the line carrying the weekly-structure
/// marker, or at the top when the narrative has none.
pub fn splice_exercises(narrative: &str, exercises: &str) -> String {
    let section = format!("{}\n{}\n\n", EXERCISE_SECTION_HEADER, exercises);
    match narrative.find(WEEKLY_STRUCTURE_MARKER) {
        Some(pos) => {
            let line_start = narrative[..pos].rfind('\n').map_or(0, |i| i + 1);
            format!(
                "{}{}{}",
                &narrative[..line_start],
                section,
                &narrative[line_start..]
            )
        }
        None => {
            tracing::warn!("Narrative has no weekly structure section, prepending exercises");
            format!("{}{}", section, narrative)
        }
    }
}

pub fn strategy_analysis(memory: &AgentMemory) -> String {
    match memory.best_strategy() {
        Some(strategy) => format!(
            "Analysis suggests {} approach is most effective for your profile.",
            strategy.label()
        ),
        None => "Initial recommendation - building strategy intelligence.".to_string(),
    }
}

pub fn personalized_insights(
    profile: &UserProfile,
    results: &[SearchResult],
    image_analysis: &str,
) -> String {
    let mut insights = Vec::new();

    if let Some(visual) = usable_visual_analysis(image_analysis) {
        let preview: String = visual.chars().take(100).collect();
        insights.push(format!("Visual assessment findings: {}...", preview));
    }

    let typed = |needle: &str| {
        results
            .iter()
            .filter(|r| r.exercise_type.to_lowercase().contains(needle))
            .count()
    };
    match profile.primary_goal {
        Goal::WeightLoss if typed("cardio") >= 3 => insights.push(
            "Strong focus on cardiovascular exercises detected - excellent for weight loss."
                .to_string(),
        ),
        Goal::MuscleGain if typed("strength") >= 2 => insights.push(
            "Progressive strength training approach identified - optimal for muscle development."
                .to_string(),
        ),
        _ => {}
    }

    let visual = &profile.visual_insights;
    if visual.form_issues {
        insights.push("Form improvements identified from visual analysis.".to_string());
    }
    if visual.equipment_available {
        insights.push("Available equipment optimized in recommendations.".to_string());
    }

    if insights.is_empty() {
        insights
            .push("Balanced approach detected across multiple exercise modalities.".to_string());
    }
    insights.join(" ")
}

pub fn progressive_plan(results: &[SearchResult]) -> String {
    let levels: BTreeSet<String> = results.iter().map(|r| r.difficulty.to_lowercase()).collect();
    let beginner = levels.contains("beginner");
    let advanced = levels.contains("advanced") || levels.contains("expert");

    if beginner && advanced {
        "Week 1-2: Focus on beginner exercises. Week 3-4: Progress to intermediate. Month 2+: Advance to complex movements."
    } else if beginner {
        "Start with foundational movements and progress gradually over 4-6 weeks."
    } else {
        "Continue with current intensity and focus on progressive overload."
    }
    .to_string()
}

pub fn visual_integration(
    insights: &VisualInsights,
    image_analysis: &str,
    image_count: usize,
) -> String {
    let text = image_analysis.trim();
    let lower = text.to_lowercase();
    // Only the degraded marker counts as a failure; the model's own prose may
    // say "error" or "failed" about technique.
    let is_error = !text.is_empty() && usable_visual_analysis(text).is_none();

    let mut points = Vec::new();
    if text.chars().count() > MEANINGFUL_ANALYSIS_CHARS && !is_error {
        points.push(format!(
            "VISUAL ANALYSIS COMPLETED - {} characters of detailed assessment",
            text.chars().count()
        ));
        let cues: &[(&[&str], &str)] = &[
            (
                &["form", "posture"],
                "Form and posture considerations identified from visual analysis",
            ),
            (
                &["equipment"],
                "Available equipment optimized based on visual assessment",
            ),
            (
                &["flexibility", "mobility"],
                "Mobility and flexibility needs addressed from visual cues",
            ),
            (
                &["fitness level", "condition"],
                "Current fitness level factored in from visual evaluation",
            ),
            (&["muscle"], "Muscle development and composition analyzed"),
            (&["body", "physique"], "Body composition insights integrated into recommendations"),
        ];
        points.extend(
            cues.iter()
                .filter(|(terms, _)| terms.iter().any(|t| lower.contains(t)))
                .map(|(_, note)| note.to_string()),
        );
        let preview: String = text.chars().take(150).collect();
        let ellipsis = if text.chars().count() > 150 { "..." } else { "" };
        points.push(format!("Analysis Preview: {}{}", preview, ellipsis));
    } else if is_error {
        points.push(
            "Visual analysis not available - recommendation based on profile data and the \
             exercise index"
                .to_string(),
        );
    } else if !text.is_empty() {
        points.push("Image provided but analysis returned limited results".to_string());
    } else if image_count > 0 {
        points.push(format!(
            "{} image(s) supplied but none could be analyzed - recommendation based on profile data",
            image_count
        ));
    } else {
        points.push(
            "No images provided - recommendations based on profile data and the exercise index"
                .to_string(),
        );
    }

    if insights.any() {
        points.push("Structured visual insights detected:".to_string());
        if insights.form_issues {
            points.push(
                "  - Specific form corrections integrated into exercise selection".to_string(),
            );
        }
        if insights.equipment_available {
            points.push("  - Equipment availability optimized in workout design".to_string());
        }
        if insights.current_fitness_level {
            points.push("  - Fitness level assessment guides exercise intensity".to_string());
        }
    }

    points.join("\n")
}

fn compose_recommendation(body: &str, metadata: &AgenticMetadata, result_count: usize) -> String {
    let metrics = &metadata.quality_metrics;
    format!(
        "{body}\n\n\
         Agentic Retrieval Insights\n\n\
         Visual Assessment Integration:\n{visual}\n\n\
         Personalized Strategy Analysis:\n{insights}\n{strategy}\n\n\
         Progressive Plan:\n{progressive}\n\n\
         Quality Assessment:\n\
         - Search Quality Score: {quality:.2}/1.0\n\
         - Coverage Achievement: {coverage:.1}%\n\
         - Recommendation Confidence: {confidence:.1}%\n\n\
         Built from {result_count} retrieved exercise(s) through strategic planning over the exercise index.",
        body = body,
        visual = metadata.visual_assessment_integration,
        insights = metadata.personalized_insights,
        strategy = metadata.search_strategy_analysis,
        progressive = metadata.progressive_recommendations,
        quality = metrics.overall_quality,
        coverage = metrics.goal_coverage * 100.0,
        confidence = metrics.confidence * 100.0,
        result_count = result_count,
    )
}
