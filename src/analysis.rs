//! AI analysis providers used by the enricher.
//!
//! - **[`MockAnalyzer`]**: deterministic and offline; for development and tests.
//! - **[`XaiAnalyzer`]**: calls an OpenAI-compatible `/chat/completions`
//!   endpoint (xAI) with a structured prompt and parses the JSON reply.
//!
//! # Retry Strategy
//!
//! The xAI provider uses exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5), cut short by
//!   cancellation or the job deadline

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::config::{analysis_api_key, AnalysisConfig};
use crate::context::JobContext;
use crate::error::PipelineError;
use crate::models::ImpactScore;

const ANALYSIS_PROMPT: &str = r#"You are an expert at analyzing government documents and Federal Register entries. Analyze the following document and provide a structured analysis.

Document Title: {title}
Agency: {agency}
Abstract: {abstract}

Provide your analysis as a JSON object with exactly these fields:
{
  "summary": "A short, punchy summary (1-2 sentences max, under 280 chars) that captures the essence and why it matters to everyday Americans. Be clear, accessible, avoid jargon.",
  "keypoints": ["Key point 1", "Key point 2", "Key point 3"],
  "impact_score": "low|medium|high",
  "political_score": <number from -100 to 100>
}

Guidelines:
- summary: Focus on human impact, make it engaging and viral-worthy
- keypoints: 3-5 bullet points of the most important takeaways
- impact_score: "low" = routine bureaucratic update, "medium" = noteworthy policy change, "high" = major news that affects many Americans
- political_score: -100 = strongly left/progressive, 0 = neutral/bipartisan, 100 = strongly right/conservative

Return ONLY the JSON object, no other text."#;

const FALLBACK_MAX_CHARS: usize = 200;
const MOCK_EXCERPT_CHARS: usize = 100;

/// What the analyzer is told about a document.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisRequest {
    pub title: String,
    pub agency: String,
    /// Summary or abstract text.
    pub text: String,
}

/// Normalized analysis: score clamped, impact always one of the three levels.
#[derive(Debug, Clone, PartialEq)]
pub struct Analysis {
    pub summary: String,
    pub key_points: Vec<String>,
    pub impact_score: ImpactScore,
    pub political_score: i64,
}

/// An AI analysis backend.
#[async_trait]
pub trait Analyzer: Send + Sync {
    /// Provider name for logs (`"mock"`, `"xai"`).
    fn name(&self) -> &str;

    /// Analyze one document. Errors are per-document and recoverable,
    /// except `Cancelled` and `DeadlineExceeded` raised through `ctx`.
    async fn analyze(
        &self,
        request: &AnalysisRequest,
        ctx: &JobContext,
    ) -> Result<Analysis, PipelineError>;
}

/// Build the analyzer selected by `analysis.provider`.
///
/// Returns `None` for `"disabled"`, which puts the enricher in dry-run mode.
pub fn create_analyzer(config: &AnalysisConfig) -> Result<Option<Box<dyn Analyzer>>, PipelineError> {
    if !config.is_enabled() {
        return Ok(None);
    }
    match config.provider.as_str() {
        "mock" => Ok(Some(Box::new(MockAnalyzer))),
        "xai" => {
            let api_key = analysis_api_key().ok_or_else(|| {
                PipelineError::Config("XAI_API_KEY or GROK_API_KEY must be set".to_string())
            })?;
            Ok(Some(Box::new(XaiAnalyzer::new(config, api_key)?)))
        }
        other => Err(PipelineError::Config(format!(
            "unknown analysis provider: '{}'",
            other
        ))),
    }
}

// ============ Mock ============

/// Offline analyzer producing fixed-shape output.
pub struct MockAnalyzer;

#[async_trait]
impl Analyzer for MockAnalyzer {
    fn name(&self) -> &str {
        "mock"
    }

    async fn analyze(
        &self,
        request: &AnalysisRequest,
        _ctx: &JobContext,
    ) -> Result<Analysis, PipelineError> {
        let summary = if request.text.is_empty() {
            "No summary available.".to_string()
        } else {
            format!(
                "This document relates to government activity. {}...",
                clip_chars(&request.text, MOCK_EXCERPT_CHARS)
            )
        };

        Ok(Analysis {
            summary,
            key_points: vec![
                format!("Key regulatory update from {}", request.agency),
                "May affect compliance requirements".to_string(),
                "Public comment period may apply".to_string(),
            ],
            impact_score: ImpactScore::Medium,
            political_score: 0,
        })
    }
}

// ============ xAI ============

/// Chat-completions analyzer for the xAI API.
pub struct XaiAnalyzer {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
    max_retries: u32,
}

impl XaiAnalyzer {
    pub fn new(config: &AnalysisConfig, api_key: String) -> Result<Self, PipelineError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            api_key,
            max_retries: config.max_retries,
        })
    }

    async fn complete(&self, prompt: &str, ctx: &JobContext) -> Result<String, PipelineError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "temperature": 0.7,
            "max_tokens": 800,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                debug!(attempt, ?delay, "retrying analysis request");
                ctx.pause(delay).await?;
            }

            let resp = self
                .client
                .post(&self.endpoint)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: ChatResponse = response.json().await?;
                        return json
                            .choices
                            .into_iter()
                            .next()
                            .map(|c| c.message.content.trim().to_string())
                            .filter(|c| !c.is_empty())
                            .ok_or_else(|| {
                                PipelineError::Transport("empty completion from analysis API".into())
                            });
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    let err = PipelineError::UpstreamStatus {
                        status: status.as_u16(),
                        body: body_text,
                    };

                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(err);
                        continue;
                    }

                    return Err(err);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| PipelineError::Transport("analysis failed after retries".into())))
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}

#[async_trait]
impl Analyzer for XaiAnalyzer {
    fn name(&self) -> &str {
        "xai"
    }

    async fn analyze(
        &self,
        request: &AnalysisRequest,
        ctx: &JobContext,
    ) -> Result<Analysis, PipelineError> {
        if request.title.is_empty() && request.text.is_empty() {
            return Err(PipelineError::Transport(
                "title and abstract cannot both be empty".into(),
            ));
        }

        let prompt = build_prompt(request);
        let content = self.complete(&prompt, ctx).await?;
        parse_analysis(&content)
    }
}

/// Analysis fields as returned by the model, before normalization.
#[derive(Debug, Deserialize)]
struct RawAnalysis {
    #[serde(default)]
    summary: String,
    #[serde(default)]
    keypoints: Vec<String>,
    #[serde(default)]
    impact_score: Option<String>,
    #[serde(default)]
    political_score: Option<serde_json::Value>,
}

fn build_prompt(request: &AnalysisRequest) -> String {
    ANALYSIS_PROMPT
        .replace("{title}", &request.title)
        .replace("{agency}", &request.agency)
        .replace("{abstract}", &request.text)
}

/// Parse a model reply into a normalized [`Analysis`].
pub fn parse_analysis(content: &str) -> Result<Analysis, PipelineError> {
    let payload = extract_json(content).ok_or_else(|| {
        PipelineError::Transport("no JSON object found in analysis response".into())
    })?;
    let raw: RawAnalysis = serde_json::from_str(payload)?;

    let summary = raw.summary.trim().to_string();
    if summary.is_empty() {
        return Err(PipelineError::Transport(
            "analysis response has no summary".into(),
        ));
    }

    let political = raw
        .political_score
        .as_ref()
        .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f.round() as i64)))
        .unwrap_or(0);

    Ok(Analysis {
        summary,
        key_points: raw
            .keypoints
            .into_iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect(),
        impact_score: raw
            .impact_score
            .as_deref()
            .map(ImpactScore::parse_lenient)
            .unwrap_or(ImpactScore::Medium),
        political_score: political.clamp(-100, 100),
    })
}

/// Locate the JSON object in a model reply.
///
/// Strips a surrounding code fence, then returns the first balanced
/// `{...}` span. Braces inside string literals are ignored.
pub fn extract_json(content: &str) -> Option<&str> {
    let mut text = content.trim();
    if let Some(rest) = text.strip_prefix("```") {
        text = rest.trim_start();
        if text.get(..4).is_some_and(|tag| tag.eq_ignore_ascii_case("json")) {
            text = text[4..].trim_start();
        }
        if let Some(inner) = text.trim_end().strip_suffix("```") {
            text = inner.trim_end();
        }
    }

    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Low-information summary used when analysis fails.
pub fn fallback_summary(text: &str) -> String {
    if text.chars().count() > FALLBACK_MAX_CHARS {
        format!("{}...", clip_chars(text, FALLBACK_MAX_CHARS))
    } else {
        text.to_string()
    }
}

fn clip_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((cut, _)) => &text[..cut],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_plain() {
        assert_eq!(extract_json(r#"{"a":1}"#), Some(r#"{"a":1}"#));
    }

    #[test]
    fn test_extract_json_from_fence() {
        let content = "```json\n{\"summary\": \"x\"}\n```";
        assert_eq!(extract_json(content), Some("{\"summary\": \"x\"}"));
    }

    #[test]
    fn test_extract_json_with_prose_and_trailing_object() {
        let content = r#"Here you go: {"summary": "has } brace", "k": {"n": 1}} and also {"other": 2}"#;
        assert_eq!(
            extract_json(content),
            Some(r#"{"summary": "has } brace", "k": {"n": 1}}"#)
        );
    }

    #[test]
    fn test_extract_json_none_when_unbalanced() {
        assert_eq!(extract_json("no json here"), None);
        assert_eq!(extract_json(r#"{"open": "#), None);
    }

    #[test]
    fn test_parse_analysis_normalizes() {
        let content = r#"{"summary": " S ", "keypoints": ["a", " ", "b"], "impact_score": "Catastrophic", "political_score": 250}"#;
        let analysis = parse_analysis(content).unwrap();
        assert_eq!(analysis.summary, "S");
        assert_eq!(analysis.key_points, vec!["a", "b"]);
        assert_eq!(analysis.impact_score, ImpactScore::Medium);
        assert_eq!(analysis.political_score, 100);
    }

    #[test]
    fn test_parse_analysis_negative_clamp_and_float() {
        let content = r#"{"summary": "S", "keypoints": [], "impact_score": "high", "political_score": -140.6}"#;
        let analysis = parse_analysis(content).unwrap();
        assert_eq!(analysis.impact_score, ImpactScore::High);
        assert_eq!(analysis.political_score, -100);
    }

    #[test]
    fn test_parse_analysis_requires_summary() {
        assert!(parse_analysis(r#"{"keypoints": ["a"]}"#).is_err());
        assert!(parse_analysis("I cannot help with that.").is_err());
    }

    #[test]
    fn test_fallback_summary_clips_long_text() {
        let text = "b".repeat(300);
        let summary = fallback_summary(&text);
        assert_eq!(summary.len(), 203);
        assert!(summary.ends_with("..."));
        assert_eq!(fallback_summary("short"), "short");
    }

    #[test]
    fn test_prompt_includes_document_fields() {
        let prompt = build_prompt(&AnalysisRequest {
            title: "Clean Water Rule".into(),
            agency: "EPA".into(),
            text: "Revises definitions.".into(),
        });
        assert!(prompt.contains("Document Title: Clean Water Rule"));
        assert!(prompt.contains("Agency: EPA"));
        assert!(prompt.contains("Abstract: Revises definitions."));
    }

    #[tokio::test]
    async fn test_mock_analyzer_shape() {
        let request = AnalysisRequest {
            title: "T".into(),
            agency: "Labor Department".into(),
            text: "x".repeat(150),
        };
        let analysis = MockAnalyzer
            .analyze(&request, &JobContext::new())
            .await
            .unwrap();
        assert_eq!(
            analysis.summary,
            format!("This document relates to government activity. {}...", "x".repeat(100))
        );
        assert_eq!(analysis.key_points.len(), 3);
        assert_eq!(analysis.key_points[0], "Key regulatory update from Labor Department");
        assert_eq!(analysis.impact_score, ImpactScore::Medium);
        assert_eq!(analysis.political_score, 0);
    }

    #[test]
    fn test_create_analyzer_disabled_is_none() {
        let config = AnalysisConfig::default();
        assert!(create_analyzer(&config).unwrap().is_none());
    }
}
