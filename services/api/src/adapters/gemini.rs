//! services/api/src/adapters/gemini.rs
//!
//! This module contains the adapter for the Gemini vision model. It implements the
//! `HomeworkAnalysisService` and `HomeworkReviewService` ports from the `core` crate.
//!
//! The model is asked for JSON, but its replies are not always well formed: they may
//! be wrapped in markdown fences or truncated. Parsing is therefore lenient and every
//! missing field gets a friendly default.

use amibuddy_core::domain::{HomeworkAnalysis, HomeworkReview, ImageRef, Locale};
use amibuddy_core::ports::{
    HomeworkAnalysisService, HomeworkReviewService, PortError, PortResult,
};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::LazyLock;
use tracing::{debug, warn};

use super::image_source::{ImageData, ImageSource};

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

const ANALYSIS_TEMPERATURE: f32 = 0.4;
const REVIEW_TEMPERATURE: f32 = 0.6;
const MAX_OUTPUT_TOKENS: u32 = 2048;

pub const STICKERS: [&str; 10] = ["🌟", "⭐", "🎉", "🏆", "💯", "👏", "🎊", "✨", "🌈", "💪"];

//=========================================================================================
// Prompts
//=========================================================================================

const ANALYSIS_PROMPT_JA: &str = r#"この宿題の画像を分析して、以下のJSON形式で返してください：

{
  "description": "宿題の内容を子供向けに2文で説明",
  "topics": ["トピック1", "トピック2"],
  "difficulty": "かんたん"
}

JSONのみを返してください。説明文は含めないでください。"#;

const ANALYSIS_PROMPT_EN: &str = r#"Analyze this homework image and reply in the following JSON format:

{
  "description": "Two sentences explaining the homework to a child",
  "topics": ["topic 1", "topic 2"],
  "difficulty": "easy"
}

Reply with JSON only. Do not include any explanation."#;

const REVIEW_PROMPT_JA: &str = r#"この完成した宿題の画像をレビューしてください。

元の宿題: {original}

以下のJSON形式で返してください：

{
  "score": 85,
  "feedback": "よくできました！きれいにかけていますね。",
  "strengths": ["きれいな字", "正確な答え"],
  "improvements": ["もう少し大きく書こう"],
  "sticker": "🌟"
}

スコアは0-100で評価してください。
stickerは以下から選んでください: {stickers}

JSONのみを返してください。説明文は含めないでください。"#;

const REVIEW_PROMPT_EN: &str = r#"Please review this image of the completed homework.

Original homework: {original}

Reply in the following JSON format:

{
  "score": 85,
  "feedback": "Well done! Your writing is very neat.",
  "strengths": ["neat handwriting", "correct answers"],
  "improvements": ["try writing a little bigger"],
  "sticker": "🌟"
}

Give a score from 0 to 100.
Choose the sticker from: {stickers}

Reply with JSON only. Do not include any explanation."#;

fn analysis_prompt(locale: Locale) -> &'static str {
    match locale {
        Locale::English => ANALYSIS_PROMPT_EN,
        Locale::Japanese => ANALYSIS_PROMPT_JA,
    }
}

fn review_prompt(locale: Locale, original: &str) -> String {
    let template = match locale {
        Locale::English => REVIEW_PROMPT_EN,
        Locale::Japanese => REVIEW_PROMPT_JA,
    };
    template
        .replace("{original}", original)
        .replace("{stickers}", &STICKERS.join(", "))
}

//=========================================================================================
// Wire Types
//=========================================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Serialize, Deserialize, Default)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: &'static str,
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Content,
}

impl GenerateContentResponse {
    fn text(self) -> String {
        self.candidates
            .into_iter()
            .next()
            .map(|c| {
                c.content
                    .parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default()
    }
}

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// Calls Gemini `generateContent` with the homework photo inlined as base64.
#[derive(Clone)]
pub struct GeminiVisionAdapter {
    http: reqwest::Client,
    images: ImageSource,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiVisionAdapter {
    pub fn new(http: reqwest::Client, images: ImageSource, api_key: String, model: String) -> Self {
        Self {
            http,
            images,
            api_key,
            model,
            base_url: GEMINI_BASE_URL.to_string(),
        }
    }

    async fn generate(
        &self,
        prompt: String,
        image: &ImageData,
        temperature: f32,
    ) -> PortResult<String> {
        let request = GenerateContentRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![
                    Part {
                        text: Some(prompt),
                        inline_data: None,
                    },
                    Part {
                        text: None,
                        inline_data: Some(InlineData {
                            mime_type: image.mime_type.clone(),
                            data: image.to_base64(),
                        }),
                    },
                ],
            }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json",
                temperature,
                max_output_tokens: MAX_OUTPUT_TOKENS,
            },
        };

        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(PortError::Unauthorized);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PortError::Unexpected(format!(
                "Gemini returned HTTP {}: {}",
                status, body
            )));
        }

        let body: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| PortError::Unexpected(format!("Invalid Gemini response: {}", e)))?;
        let text = body.text();
        debug!("Gemini response text: {}", text);
        Ok(text)
    }
}

//=========================================================================================
// Port Implementations
//=========================================================================================

#[async_trait]
impl HomeworkAnalysisService for GeminiVisionAdapter {
    async fn analyze_homework(
        &self,
        image: &ImageRef,
        locale: Locale,
    ) -> PortResult<HomeworkAnalysis> {
        let data = self.images.load(image).await?;
        let text = self
            .generate(
                analysis_prompt(locale).to_string(),
                &data,
                ANALYSIS_TEMPERATURE,
            )
            .await?;
        Ok(parse_analysis(&text, locale))
    }
}

#[async_trait]
impl HomeworkReviewService for GeminiVisionAdapter {
    async fn review_homework(
        &self,
        image: &ImageRef,
        original_description: &str,
        locale: Locale,
    ) -> PortResult<HomeworkReview> {
        let data = self.images.load(image).await?;
        let text = self
            .generate(
                review_prompt(locale, original_description),
                &data,
                REVIEW_TEMPERATURE,
            )
            .await?;
        Ok(parse_review(&text, locale))
    }
}

//=========================================================================================
// Lenient Parsing
//=========================================================================================

struct AnalysisDefaults {
    description: &'static str,
    topic: &'static str,
    difficulty: &'static str,
}

fn analysis_defaults(locale: Locale) -> AnalysisDefaults {
    match locale {
        Locale::English => AnalysisDefaults {
            description: "I looked at your homework. You can do it!",
            topic: "homework",
            difficulty: "normal",
        },
        Locale::Japanese => AnalysisDefaults {
            description: "この宿題を見ました。がんばってね！",
            topic: "宿題",
            difficulty: "ふつう",
        },
    }
}

struct ReviewDefaults {
    feedback: &'static str,
    strength: &'static str,
    improvement: &'static str,
    unparsable_feedback: &'static str,
    unparsable_strengths: [&'static str; 2],
}

fn review_defaults(locale: Locale) -> ReviewDefaults {
    match locale {
        Locale::English => ReviewDefaults {
            feedback: "You worked really hard!",
            strength: "worked hard",
            improvement: "keep it up",
            unparsable_feedback: "You worked really hard! Wonderful!",
            unparsable_strengths: ["worked hard", "did well"],
        },
        Locale::Japanese => ReviewDefaults {
            feedback: "よくがんばりました！",
            strength: "がんばった",
            improvement: "このちょうしでがんばろう",
            unparsable_feedback: "よくがんばりました！すばらしいです！",
            unparsable_strengths: ["がんばった", "よくできた"],
        },
    }
}

const DEFAULT_SCORE: u8 = 80;

/// Strips markdown fences and closes braces the model left open.
pub fn clean_model_json(text: &str) -> String {
    let mut clean = text
        .trim()
        .replace("```json", "")
        .replace("```", "")
        .trim()
        .to_string();
    if !clean.is_empty() && !clean.ends_with('}') {
        let open = clean.matches('{').count();
        let close = clean.matches('}').count();
        if open > close {
            debug!("Adding {} missing closing brace(s)", open - close);
            clean.push_str(&"}".repeat(open - close));
        }
    }
    clean
}

fn non_empty_str(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn string_list(value: &Value, key: &str) -> Option<Vec<String>> {
    value.get(key).and_then(Value::as_array).map(|items| {
        items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .filter(|s| !s.is_empty())
            .collect()
    })
}

// Field extraction for replies that are not valid JSON.
static TOPICS_FIELD: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#""topics"\s*:\s*\[(.*?)\]"#).ok());
static DESCRIPTION_FIELD: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#""description"\s*:\s*"([^"]+)""#).ok());
static DIFFICULTY_FIELD: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#""difficulty"\s*:\s*"([^"]+)""#).ok());

fn capture(text: &str, field: &LazyLock<Option<Regex>>) -> Option<String> {
    let re = field.as_ref()?;
    re.captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Turns the model's analysis reply into a `HomeworkAnalysis`, never failing.
pub fn parse_analysis(text: &str, locale: Locale) -> HomeworkAnalysis {
    let defaults = analysis_defaults(locale);
    let clean = clean_model_json(text);

    match serde_json::from_str::<Value>(&clean) {
        Ok(value) if value.is_object() => HomeworkAnalysis {
            description: non_empty_str(&value, "description")
                .unwrap_or_else(|| defaults.description.to_string()),
            topics: string_list(&value, "topics")
                .unwrap_or_else(|| vec![defaults.topic.to_string()]),
            difficulty: non_empty_str(&value, "difficulty")
                .unwrap_or_else(|| defaults.difficulty.to_string()),
        },
        _ => {
            warn!("Analysis reply was not valid JSON; extracting fields manually.");
            let topics = capture(&clean, &TOPICS_FIELD)
                .map(|list| {
                    list.split(',')
                        .map(|t| t.replace('"', "").trim().to_string())
                        .filter(|t| !t.is_empty())
                        .collect::<Vec<_>>()
                })
                .filter(|topics| !topics.is_empty())
                .unwrap_or_else(|| vec![defaults.topic.to_string()]);
            HomeworkAnalysis {
                description: capture(&clean, &DESCRIPTION_FIELD)
                    .unwrap_or_else(|| defaults.description.to_string()),
                topics,
                difficulty: capture(&clean, &DIFFICULTY_FIELD)
                    .unwrap_or_else(|| defaults.difficulty.to_string()),
            }
        }
    }
}

/// The sticker awarded when the model does not pick one.
pub fn sticker_for_score(score: u8) -> &'static str {
    match score {
        90.. => "🌟",
        70..=89 => "⭐",
        _ => "👏",
    }
}

/// Turns the model's review reply into a `HomeworkReview`, never failing.
pub fn parse_review(text: &str, locale: Locale) -> HomeworkReview {
    let defaults = review_defaults(locale);
    let clean = clean_model_json(text);

    let value = match serde_json::from_str::<Value>(&clean) {
        Ok(value) if value.is_object() => value,
        _ => {
            warn!("Review reply was not valid JSON; using the default review.");
            return HomeworkReview {
                score: DEFAULT_SCORE,
                feedback: defaults.unparsable_feedback.to_string(),
                strengths: defaults
                    .unparsable_strengths
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
                improvements: vec![defaults.improvement.to_string()],
                sticker: "⭐".to_string(),
            };
        }
    };

    let score = value
        .get("score")
        .and_then(Value::as_f64)
        .map(|s| s.round().clamp(0.0, 100.0) as u8)
        .unwrap_or(DEFAULT_SCORE);

    HomeworkReview {
        score,
        feedback: non_empty_str(&value, "feedback")
            .unwrap_or_else(|| defaults.feedback.to_string()),
        strengths: string_list(&value, "strengths")
            .unwrap_or_else(|| vec![defaults.strength.to_string()]),
        improvements: string_list(&value, "improvements")
            .unwrap_or_else(|| vec![defaults.improvement.to_string()]),
        sticker: non_empty_str(&value, "sticker")
            .unwrap_or_else(|| sticker_for_score(score).to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fences_are_stripped_and_braces_closed() {
        let raw = "```json\n{\"description\": \"Count apples\", \"meta\": {\"a\": 1\n```";
        assert_eq!(
            clean_model_json(raw),
            "{\"description\": \"Count apples\", \"meta\": {\"a\": 1}}"
        );
    }

    #[test]
    fn analysis_fills_missing_fields() {
        let analysis = parse_analysis(r#"{"description": "Add the numbers."}"#, Locale::Japanese);
        assert_eq!(analysis.description, "Add the numbers.");
        assert_eq!(analysis.topics, vec!["宿題".to_string()]);
        assert_eq!(analysis.difficulty, "ふつう");
    }

    #[test]
    fn truncated_analysis_is_recovered() {
        let raw = r#"```json
{"description": "Write the letter A.", "topics": ["letters", "writing"], "difficulty": "easy""#;
        let analysis = parse_analysis(raw, Locale::English);
        assert_eq!(analysis.description, "Write the letter A.");
        assert_eq!(analysis.topics, vec!["letters", "writing"]);
        assert_eq!(analysis.difficulty, "easy");
    }

    #[test]
    fn broken_analysis_falls_back_to_field_extraction() {
        let raw = r#"{"description": "Spell the animals", "topics": ["spelling", "animals"], difficulty: hard}"#;
        let analysis = parse_analysis(raw, Locale::English);
        assert_eq!(analysis.description, "Spell the animals");
        assert_eq!(analysis.topics, vec!["spelling", "animals"]);
        assert_eq!(analysis.difficulty, "normal");
    }

    #[test]
    fn review_defaults_follow_score() {
        let review = parse_review(r#"{"score": 92.4}"#, Locale::Japanese);
        assert_eq!(review.score, 92);
        assert_eq!(review.feedback, "よくがんばりました！");
        assert_eq!(review.strengths, vec!["がんばった".to_string()]);
        assert_eq!(review.improvements, vec!["このちょうしでがんばろう".to_string()]);
        assert_eq!(review.sticker, "🌟");

        assert_eq!(parse_review(r#"{"score": 75}"#, Locale::English).sticker, "⭐");
        assert_eq!(parse_review(r#"{"score": 40}"#, Locale::English).sticker, "👏");
    }

    #[test]
    fn review_without_score_gets_default() {
        let review = parse_review(r#"{"score": "great", "sticker": "🏆"}"#, Locale::English);
        assert_eq!(review.score, 80);
        assert_eq!(review.sticker, "🏆");
    }

    #[test]
    fn out_of_range_score_is_clamped() {
        assert_eq!(parse_review(r#"{"score": 140}"#, Locale::English).score, 100);
        assert_eq!(parse_review(r#"{"score": -3}"#, Locale::English).score, 0);
    }

    #[test]
    fn unparsable_review_is_replaced_entirely() {
        let review = parse_review("The homework looks nice!", Locale::Japanese);
        assert_eq!(review.score, 80);
        assert_eq!(review.feedback, "よくがんばりました！すばらしいです！");
        assert_eq!(review.strengths, vec!["がんばった", "よくできた"]);
        assert_eq!(review.sticker, "⭐");
    }

    #[test]
    fn review_prompt_mentions_original_and_stickers() {
        let prompt = review_prompt(Locale::English, "Count the apples");
        assert!(prompt.contains("Original homework: Count the apples"));
        assert!(prompt.contains("🌟, ⭐, 🎉"));
    }

    #[test]
    fn response_text_joins_parts() {
        let body: GenerateContentResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"{\"a\":"},{"text":"1}"}]}}]}"#,
        )
        .unwrap();
        assert_eq!(body.text(), "{\"a\":1}");
    }

    #[test]
    fn field_patterns_compile_once() {
        assert!(TOPICS_FIELD.is_some());
        assert!(DESCRIPTION_FIELD.is_some());
        assert!(DIFFICULTY_FIELD.is_some());
        let raw = r#"{"description": "Count", "difficulty": "easy", oops"#;
        assert_eq!(capture(raw, &DIFFICULTY_FIELD).as_deref(), Some("easy"));
        assert_eq!(capture(raw, &DESCRIPTION_FIELD).as_deref(), Some("Count"));
    }

    #[tokio::test]
    async fn server_paths_are_refused_before_calling_the_model() {
        let images = ImageSource::new(&["https://buddy.test/media".to_string()], 1024).unwrap();
        let adapter = GeminiVisionAdapter::new(
            reqwest::Client::new(),
            images,
            "key".to_string(),
            "gemini-test".to_string(),
        );

        let err = adapter
            .analyze_homework(&ImageRef::new("file:///etc/passwd"), Locale::English)
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::PermissionDenied(_)));

        let err = adapter
            .review_homework(&ImageRef::new("/etc/passwd"), "Counting", Locale::Japanese)
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::PermissionDenied(_)));
    }
}
