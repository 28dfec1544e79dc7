//! Clients for the two remote calls: trace analysis and speech synthesis.

use crate::{config::GeminiConfig, constants::MAX_SOURCE_CHARS, trace::RawTrace};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

/// Produces an execution trace for a piece of source code.
#[async_trait]
pub trait AnalysisClient: Send + Sync {
    async fn analyze(&self, source: &str, line_range: (usize, usize)) -> Result<RawTrace>;
}

/// Produces narration audio for a piece of text.
#[async_trait]
pub trait SpeechClient: Send + Sync {
    /// Returns base64 encoded 16-bit PCM mono at 24kHz, or `None` if the
    /// model produced no audio.
    async fn synthesize(&self, text: &str) -> Result<Option<String>>;
}

#[derive(Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    config: GeminiConfig,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Result<GeminiClient> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .context("Failed to build HTTP client")?;

        Ok(GeminiClient { http, config })
    }

    fn api_key(&self) -> Result<&str> {
        self.config
            .api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| anyhow!("No Gemini API key configured (set GEMINI_API_KEY)"))
    }

    async fn generate_content(&self, model: &str, body: &Value) -> Result<GenerateContentResponse> {
        let api_key = self.api_key()?;
        let endpoint = format!(
            "{}/models/{}:generateContent",
            self.config.api_base_url.trim_end_matches('/'),
            model
        );

        debug!("POST {endpoint}");

        let response = self
            .http
            .post(&endpoint)
            .header("x-goog-api-key", api_key)
            .header("Content-Type", "application/json")
            .body(serde_json::to_vec(body)?)
            .send()
            .await
            .with_context(|| format!("Request to {model} failed"))?;

        let status = response.status();
        let body_text = response
            .text()
            .await
            .with_context(|| format!("Failed to read response from {model}"))?;

        if !status.is_success() {
            bail!("{model} returned {status}: {body_text}");
        }

        serde_json::from_str(&body_text)
            .with_context(|| format!("Malformed generateContent response from {model}"))
    }
}

#[async_trait]
impl AnalysisClient for GeminiClient {
    async fn analyze(&self, source: &str, line_range: (usize, usize)) -> Result<RawTrace> {
        let body = json!({
            "contents": [{ "parts": [{ "text": analysis_prompt(source, line_range) }] }],
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseSchema": trace_schema(),
            },
        });

        let response = self
            .generate_content(&self.config.analysis_model, &body)
            .await?;
        let text = response
            .first_text()
            .context("Analysis response contained no text")?;

        parse_trace(&text)
    }
}

#[async_trait]
impl SpeechClient for GeminiClient {
    async fn synthesize(&self, text: &str) -> Result<Option<String>> {
        let body = json!({
            "contents": [{ "parts": [{ "text": format!("Read this code explanation clearly: {text}") }] }],
            "generationConfig": {
                "responseModalities": ["AUDIO"],
                "speechConfig": {
                    "voiceConfig": {
                        "prebuiltVoiceConfig": { "voiceName": self.config.voice_name },
                    },
                },
            },
        });

        let response = self.generate_content(&self.config.speech_model, &body).await?;

        Ok(response.first_inline_data())
    }
}

/// Parses the model's JSON text into a trace. Tolerates a Markdown code fence
/// around the JSON.
pub fn parse_trace(text: &str) -> Result<RawTrace> {
    let text = text.trim();
    let text = text
        .strip_prefix("```json")
        .or_else(|| text.strip_prefix("```"))
        .and_then(|inner| inner.strip_suffix("```"))
        .unwrap_or(text)
        .trim();

    serde_json::from_str(text).context("Malformed analysis response")
}

/// Cuts `source` to at most [MAX_SOURCE_CHARS] characters.
pub fn truncate_source(source: &str) -> &str {
    match source.char_indices().nth(MAX_SOURCE_CHARS) {
        Some((byte_index, _)) => &source[..byte_index],
        None => source,
    }
}

pub fn analysis_prompt(source: &str, (from, to): (usize, usize)) -> String {
    format!(
        r#"Act as a senior debugger. Analyze the provided code.
The code might be very long, so focus on the main entry point and significant logical blocks.
Treat unknown imports as if they were present.

Current focused lines: {from} to {to}.

Generate a sequence of execution steps that explain the program logic.
For each step:
1. Identify the line number.
2. Provide a clear, concise explanation of what is happening.
3. Simulate important variable states as a JSON object string.

Code:
{}"#,
        truncate_source(source)
    )
}

fn trace_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "summary": { "type": "STRING" },
            "steps": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "lineNumber": { "type": "INTEGER" },
                        "explanation": { "type": "STRING" },
                        "variableStateJson": { "type": "STRING" },
                        "importantChange": { "type": "BOOLEAN" },
                    },
                    "required": ["lineNumber", "explanation"],
                },
            },
        },
        "required": ["summary", "steps"],
    })
}

#[derive(Debug, Default, Deserialize)]
pub struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    text: Option<String>,
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
struct InlineData {
    data: Option<String>,
}

impl GenerateContentResponse {
    fn first_part(&self) -> Option<&Part> {
        self.candidates
            .first()
            .and_then(|candidate| candidate.content.as_ref())
            .and_then(|content| content.parts.first())
    }

    /// Concatenated text of the first candidate
    pub fn first_text(&self) -> Option<String> {
        let content = self.candidates.first()?.content.as_ref()?;
        let text: String = content
            .parts
            .iter()
            .filter_map(|part| part.text.as_deref())
            .collect();

        (!text.trim().is_empty()).then_some(text)
    }

    /// Base64 audio of the first candidate's first part
    pub fn first_inline_data(&self) -> Option<String> {
        self.first_part()
            .and_then(|part| part.inline_data.as_ref())
            .and_then(|inline| inline.data.clone())
            .filter(|data| !data.is_empty())
    }
}
