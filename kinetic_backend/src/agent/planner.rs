use super::profile::{Goal, UserProfile};
use super::{AgentPlan, Strategy, SuccessCriteria};

/// Goal decomposition.
pub struct Planner;

impl Planner {
    pub fn create_plan(profile: &UserProfile, max_iterations: usize) -> AgentPlan {
        let visual = &profile.visual_insights;

        let (base, conditional, strategies): (Vec<&str>, Vec<(bool, &str)>, Vec<Strategy>) =
            match profile.primary_goal {
                Goal::WeightLoss => (
                    vec![
                        "find_high_intensity_cardio",
                        "identify_calorie_burning_exercises",
                        "locate_nutrition_guidance",
                        "discover_progression_strategies",
                    ],
                    vec![
                        (visual.form_issues, "address_form_corrections"),
                        (visual.equipment_available, "utilize_available_equipment"),
                    ],
                    vec![Strategy::BroadSearch, Strategy::TargetedSearch],
                ),
                Goal::MuscleGain => (
                    vec![
                        "find_progressive_strength_exercises",
                        "identify_muscle_building_protocols",
                        "locate_nutrition_for_growth",
                        "discover_recovery_strategies",
                    ],
                    vec![
                        (visual.muscle_definition, "target_specific_muscle_groups"),
                        (visual.posture_issues, "address_postural_corrections"),
                    ],
                    vec![Strategy::TargetedSearch, Strategy::ProgressiveRefinement],
                ),
                Goal::Cardio => (
                    vec![
                        "find_endurance_training_methods",
                        "identify_cardio_progressions",
                        "locate_heart_rate_guidance",
                        "discover_training_variations",
                    ],
                    vec![
                        (visual.current_fitness_level, "adjust_intensity_for_level"),
                        (visual.equipment_available, "optimize_available_equipment"),
                    ],
                    vec![Strategy::BroadSearch, Strategy::MultiAngleApproach],
                ),
                Goal::Strength | Goal::General => (
                    vec![
                        "find_foundational_exercises",
                        "identify_balanced_routines",
                        "locate_beginner_progressions",
                        "discover_safety_guidelines",
                    ],
                    vec![
                        (visual.form_issues, "improve_exercise_form"),
                        (visual.mobility_issues, "address_mobility_limitations"),
                        (visual.equipment_available, "adapt_for_equipment_constraints"),
                    ],
                    vec![Strategy::BroadSearch, Strategy::ProgressiveRefinement],
                ),
            };

        let mut sub_goals: Vec<String> = base.into_iter().map(str::to_string).collect();
        sub_goals.extend(
            conditional
                .into_iter()
                .filter(|(enabled, _)| *enabled)
                .map(|(_, goal)| goal.to_string()),
        );

        AgentPlan {
            primary_goal: profile.primary_goal,
            expected_iterations: sub_goals.len().min(max_iterations),
            sub_goals,
            search_strategies: strategies,
            // Identical for every goal.
            success_criteria: SuccessCriteria::default(),
        }
    }
}
