use serde::Deserialize;

use crate::config::GenerationConfig;
use crate::pipeline::{TopicRequest, VideoKind};
use crate::retry::RetryPolicy;
use crate::{Result, VideoError};

pub mod backend;
pub mod template;

pub use backend::{ClaudeTextBackend, GeminiTextBackend, TextBackend, TextRequest};

/// Number of voice slots rotated across segments in multi-speaker mode
const SPEAKER_ROTATION: u8 = 4;

/// Position of a segment within the final video
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentRole {
    Intro,
    Body { rank: u32 },
    Outro,
}

/// One narration+visual unit of the final video
///
/// Produced by the script generator, immutable once created. `index` always
/// equals the segment's position in the plan.
#[derive(Debug, Clone)]
pub struct SegmentDescriptor {
    pub index: usize,
    pub role: SegmentRole,
    pub title: String,
    pub narration_text: String,
    pub search_terms: Vec<String>,
    pub speaker: Option<u8>,
}

/// Ordered script for a whole video
#[derive(Debug, Clone)]
pub struct ScriptPlan {
    pub title: String,
    pub segments: Vec<SegmentDescriptor>,
}

/// Body segment count for a long video, derived from the requested duration
/// and the configured narration rate
pub fn long_body_count(request: &TopicRequest, generation: &GenerationConfig) -> usize {
    let total_words =
        request.target_duration.as_secs() * u64::from(generation.words_per_minute) / 60;
    let count = total_words / u64::from(generation.words_per_segment);
    (count as usize).max(1)
}

/// Scene count for a short video, bucketed by requested duration
pub fn short_scene_count(duration_secs: u64) -> usize {
    match duration_secs {
        0..=15 => 3,
        16..=30 => 5,
        31..=45 => 7,
        _ => 8,
    }
}

fn planned_segment_count(request: &TopicRequest, generation: &GenerationConfig) -> usize {
    match request.kind {
        VideoKind::Long => long_body_count(request, generation),
        VideoKind::Short => short_scene_count(request.target_duration.as_secs()),
    }
}

/// Script generator with a primary structured-generation backend, one
/// stricter-prompt retry, an optional secondary backend, and a deterministic
/// template as the final fallback. `generate` therefore never fails.
pub struct ScriptGenerator {
    primary: Box<dyn TextBackend>,
    fallback: Option<Box<dyn TextBackend>>,
    text_model: String,
    fallback_model: String,
    generation: GenerationConfig,
    retry: RetryPolicy,
}

impl ScriptGenerator {
    pub fn new(
        primary: Box<dyn TextBackend>,
        fallback: Option<Box<dyn TextBackend>>,
        text_model: String,
        fallback_model: String,
        generation: GenerationConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            primary,
            fallback,
            text_model,
            fallback_model,
            generation,
            retry,
        }
    }

    /// Generate the ordered segment list for a topic
    pub async fn generate(&self, request: &TopicRequest) -> ScriptPlan {
        let count = planned_segment_count(request, &self.generation);

        let prompt = build_prompt(request, count, false);
        match self.structured_attempt(request, &prompt).await {
            Ok(plan) => return self.finish(plan, request),
            Err(err) => {
                tracing::warn!("Structured generation failed: {}. Retrying with strict prompt", err);
            }
        }

        let strict_prompt = build_prompt(request, count, true);
        match self.structured_attempt(request, &strict_prompt).await {
            Ok(plan) => return self.finish(plan, request),
            Err(err) => {
                tracing::warn!("Strict retry failed: {}. Using template generator", err);
            }
        }

        self.finish(template::fallback_plan(request, count), request)
    }

    async fn structured_attempt(&self, request: &TopicRequest, prompt: &str) -> Result<ScriptPlan> {
        let raw = self.generate_text(prompt).await?;
        parse_plan(request, &raw)
    }

    /// One generation round trip, primary backend first, secondary on
    /// exhaustion
    async fn generate_text(&self, prompt: &str) -> Result<String> {
        let text_request = TextRequest {
            prompt: prompt.to_string(),
            model: self.text_model.clone(),
            max_tokens: 8192,
        };

        let primary_result = self
            .retry
            .run(self.primary.backend_name(), || {
                self.primary.generate(&text_request)
            })
            .await;

        match primary_result {
            Ok(text) => Ok(text),
            Err(err) if self.generation.enable_fallback && self.fallback.is_some() => {
                let fallback = self.fallback.as_ref().expect("checked above");
                tracing::warn!(
                    "{} exhausted ({}). Falling back to {}",
                    self.primary.backend_name(),
                    err,
                    fallback.backend_name()
                );
                let fallback_request = TextRequest {
                    model: self.fallback_model.clone(),
                    ..text_request
                };
                self.retry
                    .run(fallback.backend_name(), || {
                        fallback.generate(&fallback_request)
                    })
                    .await
            }
            Err(err) => Err(err),
        }
    }

    fn finish(&self, mut plan: ScriptPlan, request: &TopicRequest) -> ScriptPlan {
        if request.multi_speaker {
            for segment in &mut plan.segments {
                segment.speaker = Some((segment.index % SPEAKER_ROTATION as usize) as u8);
            }
        }
        plan
    }
}

/// Raw content tree for a long video as returned by the text backend
#[derive(Debug, Deserialize)]
struct LongContentTree {
    title: Option<String>,
    hook: String,
    thesis: Option<String>,
    items: Vec<ContentItem>,
    conclusion: String,
}

#[derive(Debug, Deserialize)]
struct ContentItem {
    rank: u32,
    title: String,
    script: String,
    #[serde(default)]
    search_terms: Vec<String>,
}

/// Raw content tree for a short video
#[derive(Debug, Deserialize)]
struct ShortContentTree {
    title: Option<String>,
    scenes: Vec<SceneItem>,
}

#[derive(Debug, Deserialize)]
struct SceneItem {
    text: String,
    #[serde(default)]
    search_terms: Vec<String>,
}

fn parse_plan(request: &TopicRequest, raw: &str) -> Result<ScriptPlan> {
    let json = extract_json(raw);
    match request.kind {
        VideoKind::Long => parse_long_plan(request, json),
        VideoKind::Short => parse_short_plan(request, json),
    }
}

fn parse_long_plan(request: &TopicRequest, json: &str) -> Result<ScriptPlan> {
    let tree: LongContentTree = serde_json::from_str(json).map_err(|e| malformed(e.to_string()))?;

    if tree.items.is_empty() {
        return Err(malformed("content tree has no items".to_string()));
    }

    let mut items = tree.items;
    // Countdown order regardless of how the backend listed them
    items.sort_by(|a, b| b.rank.cmp(&a.rank));

    let intro_text = match &tree.thesis {
        Some(thesis) => format!("{} {}", tree.hook.trim(), thesis.trim()),
        None => tree.hook.trim().to_string(),
    };
    validate_segment_text(&intro_text)?;
    validate_segment_text(&tree.conclusion)?;

    let mut segments = Vec::with_capacity(items.len() + 2);
    segments.push(SegmentDescriptor {
        index: 0,
        role: SegmentRole::Intro,
        title: tree
            .title
            .clone()
            .unwrap_or_else(|| format!("Top {} {}", items.len(), request.topic)),
        narration_text: intro_text,
        search_terms: vec![request.topic.clone()],
        speaker: None,
    });

    for (position, item) in items.iter().enumerate() {
        validate_segment_text(&item.script)?;
        if item.search_terms.iter().all(|t| t.trim().is_empty()) {
            return Err(malformed(format!(
                "item '{}' carries no usable search terms",
                item.title
            )));
        }

        segments.push(SegmentDescriptor {
            index: position + 1,
            role: SegmentRole::Body { rank: item.rank },
            title: item.title.clone(),
            narration_text: format!("Number {}: {}. {}", item.rank, item.title, item.script.trim()),
            search_terms: item
                .search_terms
                .iter()
                .filter(|t| !t.trim().is_empty())
                .cloned()
                .collect(),
            speaker: None,
        });
    }

    segments.push(SegmentDescriptor {
        index: segments.len(),
        role: SegmentRole::Outro,
        title: "Outro".to_string(),
        narration_text: tree.conclusion.trim().to_string(),
        search_terms: vec![format!("{} conclusion", request.topic)],
        speaker: None,
    });

    Ok(ScriptPlan {
        title: tree
            .title
            .unwrap_or_else(|| format!("Top {} {}", segments.len() - 2, request.topic)),
        segments,
    })
}

fn parse_short_plan(request: &TopicRequest, json: &str) -> Result<ScriptPlan> {
    let tree: ShortContentTree = serde_json::from_str(json).map_err(|e| malformed(e.to_string()))?;

    if tree.scenes.is_empty() {
        return Err(malformed("content tree has no scenes".to_string()));
    }

    let scene_count = tree.scenes.len();
    let mut segments = Vec::with_capacity(scene_count);
    for (index, scene) in tree.scenes.iter().enumerate() {
        validate_segment_text(&scene.text)?;
        if scene.search_terms.iter().all(|t| t.trim().is_empty()) {
            return Err(malformed(format!("scene {index} carries no usable search terms")));
        }

        let role = if index == 0 {
            SegmentRole::Intro
        } else if index == scene_count - 1 {
            SegmentRole::Outro
        } else {
            SegmentRole::Body { rank: index as u32 }
        };

        segments.push(SegmentDescriptor {
            index,
            role,
            title: format!("Scene {}", index + 1),
            narration_text: scene.text.trim().to_string(),
            search_terms: scene
                .search_terms
                .iter()
                .filter(|t| !t.trim().is_empty())
                .cloned()
                .collect(),
            speaker: None,
        });
    }

    Ok(ScriptPlan {
        title: tree.title.unwrap_or_else(|| request.topic.clone()),
        segments,
    })
}

fn validate_segment_text(text: &str) -> Result<()> {
    if text.trim().is_empty() {
        return Err(malformed("segment narration is empty".to_string()));
    }
    Ok(())
}

fn malformed(message: String) -> VideoError {
    VideoError::Validation {
        backend: "script".to_string(),
        message,
    }
}

/// Pull the JSON payload out of a model response that may wrap it in code
/// fences or surrounding prose
fn extract_json(raw: &str) -> &str {
    if let Some(start) = raw.find("```json") {
        let rest = &raw[start + 7..];
        if let Some(end) = rest.find("```") {
            return rest[..end].trim();
        }
    }
    if let Some(start) = raw.find("```") {
        let rest = &raw[start + 3..];
        if let Some(end) = rest.find("```") {
            return rest[..end].trim();
        }
    }
    if let (Some(start), Some(end)) = (raw.find('{'), raw.rfind('}')) {
        if start < end {
            return raw[start..=end].trim();
        }
    }
    raw.trim()
}

fn build_prompt(request: &TopicRequest, count: usize, strict: bool) -> String {
    let mut prompt = match request.kind {
        VideoKind::Long => format!(
            r#"You are a YouTube content strategist. Create the complete content tree for a
top {count} countdown video about "{topic}" in the {category} category.

Respond with a JSON object of this exact shape:
{{
  "title": "Video title",
  "hook": "Attention-grabbing opening line",
  "thesis": "One sentence on what viewers will learn",
  "items": [
    {{
      "rank": {count},
      "title": "Item name",
      "script": "3-4 engaging sentences about this item",
      "search_terms": ["specific visual stock-footage search", "second search term"]
    }}
  ],
  "conclusion": "Closing lines with a call to action"
}}

Provide exactly {count} items in descending rank order ({count} down to 1).
Every item needs a non-empty script and at least one visually specific search term.
Write all narration in {language}."#,
            count = count,
            topic = request.topic,
            category = if request.general_topic.is_empty() {
                "general"
            } else {
                &request.general_topic
            },
            language = request.language,
        ),
        VideoKind::Short => format!(
            r#"Create a script for a {secs}-second vertical short video about "{topic}".

Respond with a JSON object of this exact shape:
{{
  "title": "Catchy title",
  "scenes": [
    {{
      "text": "Narration for this scene",
      "search_terms": ["specific stock footage search", "second search term"]
    }}
  ]
}}

Provide exactly {count} scenes: an opening hook, the key points, and a closing
call to action. Keep every scene short and punchy. Write all narration in {language}."#,
            secs = request.target_duration.as_secs(),
            topic = request.topic,
            count = count,
            language = request.language,
        ),
    };

    if strict {
        prompt.push_str(
            "\n\nIMPORTANT: Output ONLY the JSON object. No markdown fences, no commentary, \
             no text before or after the JSON.",
        );
    }

    prompt
}
