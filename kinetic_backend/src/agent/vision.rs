//! Optional image analysis ahead of planning.
//!
//! Always returns a string: empty when there is nothing to analyze, a
//! `VISUAL ANALYSIS SKIPPED: ...` notice when the call could not be made or
//! failed, otherwise the model's cleaned-up observations.

use anyhow::{bail, Context, Result};
use base64::Engine as _;
use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use super::profile::{UserProfileInput, VISUAL_ANALYSIS_SKIPPED};
use crate::capabilities::{EncodedImage, GenerationRequest, Generator, UserContent};
use crate::config::CoachConfig;

const MAX_IMAGE_BYTES: usize = 15 * 1024 * 1024;

/// Longest error detail carried into a degraded notice.
const ERROR_DETAIL_CHARS: usize = 200;

pub struct VisualAnalyzer {
    generator: Option<Arc<dyn Generator>>,
    max_tokens: u32,
    temperature: f32,
    timeout: Duration,
}

impl VisualAnalyzer {
    pub fn new(generator: Option<Arc<dyn Generator>>, config: &CoachConfig) -> Self {
        Self {
            generator,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            timeout: config.synthesis_timeout(),
        }
    }

    pub async fn analyze<P: AsRef<Path>>(&self, images: &[P], input: &UserProfileInput) -> String {
        if images.is_empty() {
            tracing::debug!("No images supplied, skipping visual analysis");
            return String::new();
        }

        let Some(generator) = &self.generator else {
            tracing::warn!(
                "{} image(s) supplied but no generation capability is configured",
                images.len()
            );
            return format!(
                "{}: generation capability not configured",
                VISUAL_ANALYSIS_SKIPPED
            );
        };

        let encoded: Vec<EncodedImage> = images
            .iter()
            .filter_map(|path| match encode_image(path.as_ref()) {
                Ok(image) => Some(image),
                Err(e) => {
                    tracing::warn!("Skipping image {}: {:#}", path.as_ref().display(), e);
                    None
                }
            })
            .collect();

        if encoded.is_empty() {
            tracing::warn!("None of the {} supplied image(s) could be encoded", images.len());
            return String::new();
        }

        let goal = input.goal.as_deref().unwrap_or("general");
        let request = GenerationRequest {
            system_prompt: vision_prompt(input),
            user_content: UserContent::WithImages {
                text: format!(
                    "Please analyze these images for {} fitness recommendations.",
                    goal
                ),
                images: encoded,
            },
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        tracing::info!(
            "Requesting visual analysis of {} image(s) from {}",
            request.user_content.image_count(),
            generator.name()
        );

        match tokio::time::timeout(self.timeout, generator.generate(request)).await {
            Ok(Ok(text)) => {
                let cleaned = clean_markdown(&text);
                tracing::info!("Visual analysis complete: {} characters", cleaned.len());
                cleaned
            }
            Ok(Err(e)) => {
                tracing::error!("Vision call failed: {:#}", e);
                let detail: String = format!("{:#}", e).chars().take(ERROR_DETAIL_CHARS).collect();
                format!("{}: Vision model error - {}", VISUAL_ANALYSIS_SKIPPED, detail)
            }
            Err(_) => {
                tracing::error!(
                    "Vision call timed out after {}s",
                    self.timeout.as_secs()
                );
                format!(
                    "{}: vision request timed out after {}s",
                    VISUAL_ANALYSIS_SKIPPED,
                    self.timeout.as_secs()
                )
            }
        }
    }
}

fn vision_prompt(input: &UserProfileInput) -> String {
    let describe = |value: Option<String>| value.unwrap_or_else(|| "Unknown".to_string());
    let age = describe(input.age.as_ref().and_then(|a| a.as_f64()).map(|a| format!("{}", a)));
    let weight = describe(
        input
            .weight
            .as_ref()
            .and_then(|w| w.as_f64())
            .map(|w| format!("{}", w)),
    );
    let gender = describe(input.gender.clone());
    let goal = input.goal.as_deref().unwrap_or("general");

    let mut prompt = format!(
        "You are a professional fitness expert analyzing images for personalized recommendations.\n\n\
         USER PROFILE:\n\
         User: {}, {} years old, {} lbs\n\
         Goal: {}\n",
        gender, age, weight, goal
    );
    if let Some(notes) = input
        .health_conditions
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
    {
        prompt.push_str(&format!("Health/Exercise Notes: {}\n", notes));
    }
    prompt.push_str(
        "\nANALYSIS TASK:\n\
         Analyze the uploaded images and describe:\n\
         1. Physical assessment: body composition, posture, visible muscle development\n\
         2. Form analysis: technique of any exercise or movement shown\n\
         3. Environment: available equipment, space, setting (gym, home, outdoor)\n\
         4. Specific recommendations: exercises or modifications that would help most\n\
         5. Visual cues: areas that need attention\n\n\
         Focus on actionable observations; they feed a personalized fitness plan.",
    );
    prompt
}

fn mime_type_from_path(path: &Path) -> Option<&'static str> {
    match path
        .extension()
        .and_then(OsStr::to_str)
        .map(|s| s.to_ascii_lowercase())
        .as_deref()
    {
        Some("png") => Some("image/png"),
        Some("jpg" | "jpeg") => Some("image/jpeg"),
        Some("webp") => Some("image/webp"),
        Some("gif") => Some("image/gif"),
        _ => None,
    }
}

fn encode_image(path: &Path) -> Result<EncodedImage> {
    let Some(mime_type) = mime_type_from_path(path) else {
        bail!("unsupported image type");
    };
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    if bytes.is_empty() {
        bail!("image is empty");
    }
    if bytes.len() > MAX_IMAGE_BYTES {
        bail!(
            "image too large ({} bytes, max {})",
            bytes.len(),
            MAX_IMAGE_BYTES
        );
    }

    Ok(EncodedImage {
        filename: path
            .file_name()
            .and_then(OsStr::to_str)
            .unwrap_or("image")
            .to_string(),
        mime_type: mime_type.to_string(),
        data_base64: base64::engine::general_purpose::STANDARD.encode(&bytes),
    })
}

/// Strip Markdown decoration from model output.
pub fn clean_markdown(text: &str) -> String {
    const RULES: &[(&str, &str)] = &[
        (r"(?m)^#{1,6}[ \t]*", ""),
        (r"\*\*(.*?)\*\*", "$1"),
        (r"\*(.*?)\*", "$1"),
        (r"(?m)^[ \t]*-[ \t]*", "- "),
        (r"(?m)^[ \t]*(\d+)\.[ \t]*", "$1. "),
        (r"\n{3,}", "\n\n"),
        (r"`([^`]+)`", "$1"),
    ];

    let mut cleaned = text.to_string();
    for (pattern, replacement) in RULES {
        if let Ok(re) = regex_lite::Regex::new(pattern) {
            cleaned = re.replace_all(&cleaned, *replacement).into_owned();
        }
    }
    cleaned.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct ScriptedGenerator {
        reply: Result<String, String>,
        delay: Option<Duration>,
        seen: Mutex<Vec<GenerationRequest>>,
    }

    impl ScriptedGenerator {
        fn replying(reply: &str) -> Self {
            Self {
                reply: Ok(reply.to_string()),
                delay: None,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Generator for ScriptedGenerator {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn generate(&self, request: GenerationRequest) -> anyhow::Result<String> {
            self.seen.lock().unwrap().push(request);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.reply.clone().map_err(|e| anyhow::anyhow!(e))
        }
    }

    fn config(timeout_secs: u64) -> CoachConfig {
        CoachConfig {
            synthesis_timeout_secs: timeout_secs,
            ..CoachConfig::from_lookup(|_| None)
        }
    }

    fn write_image(dir: &tempfile::TempDir, name: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, [0x89, b'P', b'N', b'G', 1, 2, 3]).unwrap();
        path
    }

    #[tokio::test]
    async fn no_images_means_no_call() {
        let generator = Arc::new(ScriptedGenerator::replying("unused"));
        let analyzer =
            VisualAnalyzer::new(Some(generator.clone() as Arc<dyn Generator>), &config(5));
        let images: [std::path::PathBuf; 0] = [];
        let out = analyzer.analyze(&images, &UserProfileInput::default()).await;
        assert_eq!(out, "");
        assert!(generator.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unconfigured_generator_degrades() {
        let dir = tempfile::tempdir().unwrap();
        let image = write_image(&dir, "front.png");
        let analyzer = VisualAnalyzer::new(None, &config(5));
        let out = analyzer.analyze(&[image], &UserProfileInput::default()).await;
        assert!(out.starts_with(VISUAL_ANALYSIS_SKIPPED));
    }

    #[tokio::test]
    async fn unreadable_images_yield_empty_analysis() {
        let dir = tempfile::tempdir().unwrap();
        let text_file = dir.path().join("notes.txt");
        std::fs::write(&text_file, "not an image").unwrap();
        let missing = dir.path().join("missing.jpg");

        let generator = Arc::new(ScriptedGenerator::replying("unused"));
        let analyzer =
            VisualAnalyzer::new(Some(generator.clone() as Arc<dyn Generator>), &config(5));
        let out = analyzer
            .analyze(&[text_file, missing], &UserProfileInput::default())
            .await;
        assert_eq!(out, "");
        assert!(generator.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn images_are_embedded_and_output_cleaned() {
        let dir = tempfile::tempdir().unwrap();
        let images = vec![write_image(&dir, "a.png"), write_image(&dir, "b.JPG")];
        let generator = Arc::new(ScriptedGenerator::replying(
            "## Posture\n**Rounded shoulders** noted near the `dumbbell` rack.",
        ));
        let analyzer =
            VisualAnalyzer::new(Some(generator.clone() as Arc<dyn Generator>), &config(5));
        let input = UserProfileInput {
            goal: Some("strength".to_string()),
            health_conditions: Some("old knee injury".to_string()),
            ..Default::default()
        };

        let out = analyzer.analyze(&images, &input).await;
        assert_eq!(out, "Posture\nRounded shoulders noted near the dumbbell rack.");

        let seen = generator.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].user_content.image_count(), 2);
        assert!(seen[0].system_prompt.contains("Health/Exercise Notes: old knee injury"));
        match &seen[0].user_content {
            UserContent::WithImages { images, .. } => {
                assert_eq!(images[1].mime_type, "image/jpeg");
                assert!(images[0].data_url().starts_with("data:image/png;base64,"));
            }
            UserContent::Text(_) => panic!("expected image content"),
        }
    }

    #[tokio::test]
    async fn generator_error_is_labeled() {
        let dir = tempfile::tempdir().unwrap();
        let image = write_image(&dir, "a.webp");
        let generator = Arc::new(ScriptedGenerator {
            reply: Err("deployment not found".to_string()),
            delay: None,
            seen: Mutex::new(Vec::new()),
        });
        let analyzer = VisualAnalyzer::new(Some(generator as Arc<dyn Generator>), &config(5));
        let out = analyzer.analyze(&[image], &UserProfileInput::default()).await;
        assert!(out.starts_with("VISUAL ANALYSIS SKIPPED: Vision model error - "));
        assert!(out.contains("deployment not found"));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_generator_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let image = write_image(&dir, "a.gif");
        let generator = Arc::new(ScriptedGenerator {
            reply: Ok("late".to_string()),
            delay: Some(Duration::from_secs(120)),
            seen: Mutex::new(Vec::new()),
        });
        let analyzer = VisualAnalyzer::new(Some(generator as Arc<dyn Generator>), &config(2));
        let out = analyzer.analyze(&[image], &UserProfileInput::default()).await;
        assert_eq!(
            out,
            "VISUAL ANALYSIS SKIPPED: vision request timed out after 2s"
        );
    }

    #[test]
    fn markdown_cleanup_handles_lists_and_blank_runs() {
        let raw = "# Title\n\n\n\n  -   item one\n3.   third\n*soft* emphasis";
        assert_eq!(
            clean_markdown(raw),
            "Title\n\n- item one\n3. third\nsoft emphasis"
        );
    }
}
