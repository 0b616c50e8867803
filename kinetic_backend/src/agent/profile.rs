//! User profile derivation.
//!
//! Turns loosely-typed request fields plus an optional free-text visual report
//! into a complete [`UserProfile`]. Nothing here fails: missing or malformed
//! values fall back to defaults, unmatched text yields no signal.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeSet;

pub const DEFAULT_AGE: u32 = 30;
pub const DEFAULT_WEIGHT: f64 = 150.0;
pub const DEFAULT_GENDER: &str = "male";

/// Prefix of every degraded visual-analysis message.
pub const VISUAL_ANALYSIS_SKIPPED: &str = "VISUAL ANALYSIS SKIPPED";

/// A field that may arrive as a JSON number or as a string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LooseNumber {
    Number(f64),
    Text(String),
}

impl LooseNumber {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            LooseNumber::Number(n) => Some(*n).filter(|n| n.is_finite()),
            LooseNumber::Text(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        }
    }
}

impl From<f64> for LooseNumber {
    fn from(value: f64) -> Self {
        LooseNumber::Number(value)
    }
}

/// Raw request fields as handed over by the API layer.
///
/// A field of the wrong JSON type reads as absent instead of rejecting the
/// whole profile.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserProfileInput {
    #[serde(default, deserialize_with = "loose_number")]
    pub age: Option<LooseNumber>,
    #[serde(default, deserialize_with = "loose_text")]
    pub gender: Option<String>,
    #[serde(default, deserialize_with = "loose_number")]
    pub weight: Option<LooseNumber>,
    #[serde(default, deserialize_with = "loose_number")]
    pub height: Option<LooseNumber>,
    #[serde(default, alias = "agent_type", deserialize_with = "loose_text")]
    pub goal: Option<String>,
    #[serde(default, deserialize_with = "loose_text")]
    pub health_conditions: Option<String>,
}

fn loose_number<'de, D>(deserializer: D) -> Result<Option<LooseNumber>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Number(n) => n.as_f64().map(LooseNumber::Number),
        serde_json::Value::String(s) => Some(LooseNumber::Text(s)),
        _ => None,
    })
}

fn loose_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Some(s),
        _ => None,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Goal {
    WeightLoss,
    MuscleGain,
    Cardio,
    Strength,
    General,
}

impl Goal {
    /// Unknown or missing tags map to `General`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "weight_loss" => Goal::WeightLoss,
            "muscle_gain" => Goal::MuscleGain,
            "cardio" => Goal::Cardio,
            "strength" => Goal::Strength,
            _ => Goal::General,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Goal::WeightLoss => "weight_loss",
            Goal::MuscleGain => "muscle_gain",
            Goal::Cardio => "cardio",
            Goal::Strength => "strength",
            Goal::General => "general",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Demographics {
    pub age: u32,
    pub gender: String,
    pub weight: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
}

/// Boolean detectors over the visual-analysis text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisualInsights {
    pub form_issues: bool,
    pub equipment_available: bool,
    pub current_fitness_level: bool,
    pub mobility_issues: bool,
    pub muscle_definition: bool,
    pub posture_issues: bool,
}

impl VisualInsights {
    pub fn any(&self) -> bool {
        self.form_issues
            || self.equipment_available
            || self.current_fitness_level
            || self.mobility_issues
            || self.muscle_definition
            || self.posture_issues
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub demographics: Demographics,
    pub primary_goal: Goal,
    pub health_constraints: BTreeSet<String>,
    pub fitness_level: String,
    pub motivation_level: String,
    pub time_availability: String,
    pub equipment_access: BTreeSet<String>,
    pub visual_insights: VisualInsights,
    pub image_analysis: String,
}

const HEALTH_RULES: &[(&str, &str)] = &[
    ("knee", "low_impact_preferred"),
    ("back", "spine_neutral_exercises"),
    ("heart", "moderate_intensity_only"),
];

const EQUIPMENT_RULES: &[(&[&str], &[&str])] = &[
    (&["dumbbell", "weight"], &["dumbbells", "free_weights"]),
    (&["gym", "machine"], &["gym_machines", "cable_machine"]),
    (&["barbell"], &["barbell"]),
    (&["resistance band", "band"], &["resistance_bands"]),
    (&["kettlebell"], &["kettlebells"]),
    (&["treadmill", "cardio machine"], &["cardio_machines"]),
];

const FORM_TERMS: &[&str] = &["form", "posture", "alignment", "technique"];
const EQUIPMENT_TERMS: &[&str] = &[
    "dumbbell",
    "barbell",
    "machine",
    "gym",
    "weight",
    "kettlebell",
    "band",
];
const FITNESS_TERMS: &[&str] = &[
    "muscular",
    "athletic",
    "beginner",
    "advanced",
    "experienced",
    "sedentary",
];
const MOBILITY_TERMS: &[&str] = &["flexibility", "mobility", "stiff", "range of motion", "tight"];
const COMPOSITION_TERMS: &[&str] = &["muscle definition", "body fat", "physique", "composition"];
const POSTURE_TERMS: &[&str] = &["rounded shoulders", "forward head", "slouch", "posture"];

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

pub struct ProfileAnalyzer;

impl ProfileAnalyzer {
    pub fn analyze(input: &UserProfileInput, image_analysis: &str) -> UserProfile {
        let age = input
            .age
            .as_ref()
            .and_then(LooseNumber::as_f64)
            .filter(|a| *a >= 0.0)
            .map(|a| a as u32)
            .unwrap_or(DEFAULT_AGE);
        let weight = input
            .weight
            .as_ref()
            .and_then(LooseNumber::as_f64)
            .unwrap_or(DEFAULT_WEIGHT);
        let height = input.height.as_ref().and_then(LooseNumber::as_f64);
        let gender = input
            .gender
            .as_deref()
            .map(str::trim)
            .filter(|g| !g.is_empty())
            .unwrap_or(DEFAULT_GENDER)
            .to_string();
        let goal = Goal::parse(input.goal.as_deref().unwrap_or("general"));

        let visual = usable_visual_text(image_analysis);

        UserProfile {
            demographics: Demographics {
                age,
                gender,
                weight,
                height,
            },
            primary_goal: goal,
            health_constraints: parse_health_constraints(
                input.health_conditions.as_deref().unwrap_or(""),
            ),
            fitness_level: infer_fitness_level(age, visual),
            motivation_level: assess_motivation(goal, age).to_string(),
            time_availability: "moderate".to_string(),
            equipment_access: infer_equipment_access(visual),
            visual_insights: extract_visual_insights(visual),
            image_analysis: image_analysis.to_string(),
        }
    }
}

/// Visual text worth scanning, or "" when the report is missing or degraded.
fn usable_visual_text(image_analysis: &str) -> &str {
    let trimmed = image_analysis.trim();
    if trimmed.is_empty() || trimmed.starts_with(VISUAL_ANALYSIS_SKIPPED) {
        ""
    } else {
        trimmed
    }
}

pub fn parse_health_constraints(health_conditions: &str) -> BTreeSet<String> {
    let lower = health_conditions.to_lowercase();
    HEALTH_RULES
        .iter()
        .filter(|(needle, _)| lower.contains(needle))
        .map(|(_, tag)| tag.to_string())
        .collect()
}

pub fn infer_fitness_level(age: u32, image_analysis: &str) -> String {
    if !image_analysis.is_empty() {
        let lower = image_analysis.to_lowercase();
        if contains_any(&lower, &["advanced", "muscular", "athletic"]) {
            return "advanced".to_string();
        }
        if contains_any(&lower, &["beginner", "sedentary", "limited experience"]) {
            return "beginner".to_string();
        }
        if contains_any(&lower, &["intermediate", "moderate"]) {
            return "intermediate".to_string();
        }
    }

    if age < 25 {
        "beginner_to_intermediate".to_string()
    } else if age > 50 {
        "experienced_but_cautious".to_string()
    } else {
        "intermediate".to_string()
    }
}

fn assess_motivation(goal: Goal, age: u32) -> &'static str {
    match goal {
        Goal::WeightLoss | Goal::MuscleGain => "high",
        _ if age < 30 => "moderate_to_high",
        _ => "moderate",
    }
}

pub fn infer_equipment_access(image_analysis: &str) -> BTreeSet<String> {
    let lower = image_analysis.to_lowercase();
    let mut equipment: BTreeSet<String> = BTreeSet::new();
    equipment.insert("bodyweight".to_string());

    if !lower.is_empty() {
        for (needles, items) in EQUIPMENT_RULES {
            if contains_any(&lower, needles) {
                equipment.extend(items.iter().map(|i| i.to_string()));
            }
        }
    }

    // Keep recommendations actionable when nothing was detected.
    if equipment.len() == 1 {
        equipment.insert("dumbbells".to_string());
        equipment.insert("resistance_bands".to_string());
    }

    equipment
}

pub fn extract_visual_insights(image_analysis: &str) -> VisualInsights {
    if image_analysis.is_empty() {
        return VisualInsights::default();
    }
    let lower = image_analysis.to_lowercase();
    VisualInsights {
        form_issues: contains_any(&lower, FORM_TERMS),
        equipment_available: contains_any(&lower, EQUIPMENT_TERMS),
        current_fitness_level: contains_any(&lower, FITNESS_TERMS),
        mobility_issues: contains_any(&lower, MOBILITY_TERMS),
        muscle_definition: contains_any(&lower, COMPOSITION_TERMS),
        posture_issues: contains_any(&lower, POSTURE_TERMS),
    }
}
