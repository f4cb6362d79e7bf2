use crate::config::{env_parse, Settings};
use crate::domain::contract::LlmThesis;
use crate::llm::error::LlmDiagnosticsError;
use crate::llm::json;
use crate::llm::{AiThesis, Provider, ThesisProvider, ThesisRequest};
use anyhow::Context;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MODEL: &str = "claude-3-5-sonnet-latest";
const DEFAULT_MAX_TOKENS: u32 = 1024;
const DEFAULT_TIMEOUT_SECS: u64 = 60;
const REPAIR_ATTEMPTS: u32 = 1;

const TOOL_NAME_EMIT_THESIS: &str = "emit_thesis";

#[derive(Debug, Clone)]
pub struct AnthropicThesisClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
}

impl AnthropicThesisClient {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let api_key = settings.require_anthropic_api_key()?.to_string();
        let base_url =
            std::env::var("ANTHROPIC_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let model = std::env::var("ANTHROPIC_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        let max_tokens = env_parse::<u32>("ANTHROPIC_MAX_TOKENS")?.unwrap_or(DEFAULT_MAX_TOKENS);
        let timeout_secs =
            env_parse::<u64>("ANTHROPIC_TIMEOUT_SECS")?.unwrap_or(DEFAULT_TIMEOUT_SECS);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build reqwest client")?;

        Ok(Self {
            http,
            api_key,
            base_url,
            model,
            max_tokens,
        })
    }

    async fn create_message(
        &self,
        symbol: &str,
        req: CreateMessageRequest,
    ) -> anyhow::Result<(serde_json::Value, CreateMessageResponse)> {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_str(&self.api_key)?);
        headers.insert(
            "anthropic-version",
            HeaderValue::from_static(ANTHROPIC_VERSION),
        );

        let url = format!("{}/v1/messages", self.base_url.trim_end_matches('/'));
        let res = self
            .http
            .post(url)
            .headers(headers)
            .json(&req)
            .send()
            .await
            .context("Anthropic request failed")?;

        let status = res.status();
        let text = res
            .text()
            .await
            .context("failed to read Anthropic response body")?;
        if !status.is_success() {
            let raw_response_json = serde_json::from_str::<serde_json::Value>(&text).ok();
            return Err(LlmDiagnosticsError {
                provider: Provider::Anthropic,
                stage: "http",
                symbol: symbol.to_string(),
                detail: format!("status={status}"),
                raw_output: Some(text),
                raw_response_json,
            }
            .into());
        }

        let raw_json = serde_json::from_str::<serde_json::Value>(&text)
            .with_context(|| format!("failed to parse Anthropic response JSON: {text}"))?;
        let parsed = serde_json::from_value::<CreateMessageResponse>(raw_json.clone())
            .context("failed to decode Anthropic response into CreateMessageResponse")?;
        Ok((raw_json, parsed))
    }

    fn tools() -> Vec<Tool> {
        let schema = serde_json::json!({
            "type": "object",
            "additionalProperties": false,
            "required": ["subscore", "narrative", "reasons"],
            "properties": {
                "subscore": {"type": "number", "minimum": 0, "maximum": 10},
                "narrative": {"type": "string"},
                "reasons": {
                    "type": "array",
                    "maxItems": 5,
                    "items": {"type": "string"}
                }
            }
        });

        vec![Tool {
            name: TOOL_NAME_EMIT_THESIS,
            description: "Emit the investment thesis for one ticker as structured JSON",
            input_schema: schema,
        }]
    }

    fn tool_choice() -> ToolChoice {
        ToolChoice::Tool {
            name: TOOL_NAME_EMIT_THESIS,
        }
    }

    fn system_prompt() -> String {
        [
            "You are an equity analyst reviewing US stocks trading well below their 52-week high.",
            "Judge management quality and business sustainability from the signals provided.",
            "Return ONLY valid JSON. Do not wrap in markdown. Do not include any extra keys.",
            "Output schema:",
            "{",
            "  \"subscore\": 0.0,",
            "  \"narrative\": \"one paragraph, at most 150 words\",",
            "  \"reasons\": [\"specific, evidence-based reason\"]",
            "}",
            "Rules:",
            "- subscore is a number in [0, 10]; 10 means exceptional management and durable moat",
            "- at most 5 reasons, each citing a number from the signals",
            "- no generic statements",
        ]
        .join("\n")
    }

    fn user_prompt(request: &ThesisRequest) -> String {
        format!(
            "Task: Assess {} as of {}.\n\nSignals JSON:\n{}",
            request.summary.symbol,
            request.as_of_date,
            request.summary_json()
        )
    }

    fn repair_prompt(previous_output: &str) -> String {
        format!(
            "Your previous message was NOT valid JSON.\n\n\
TASK: Output ONLY a single JSON object with keys subscore, narrative, reasons.\n\
- Do NOT include any markdown, prose, or code fences.\n\
- subscore MUST be a number in [0, 10].\n\
- reasons MUST be an array of at most 5 strings.\n\n\
INVALID OUTPUT (for reference only; DO NOT copy verbatim):\n{previous_output}"
        )
    }

    fn response_text(res: &CreateMessageResponse) -> String {
        let mut out = String::new();
        for block in &res.content {
            if let ContentBlock::Text { text } = block {
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str(text);
            }
        }
        out
    }

    fn response_tool_thesis(res: &CreateMessageResponse) -> anyhow::Result<Option<LlmThesis>> {
        for block in &res.content {
            if let ContentBlock::ToolUse { name, input, .. } = block {
                if name == TOOL_NAME_EMIT_THESIS {
                    let parsed = serde_json::from_value::<LlmThesis>(input.clone())
                        .context("failed to decode tool_use.input into LlmThesis")?;
                    return Ok(Some(parsed));
                }
            }
        }
        Ok(None)
    }

    fn request(&self, prompt: String, max_tokens: u32) -> CreateMessageRequest {
        CreateMessageRequest {
            model: self.model.clone(),
            max_tokens,
            system: Some(Self::system_prompt()),
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
            tools: Some(Self::tools()),
            tool_choice: Some(Self::tool_choice()),
        }
    }

    async fn try_parse_with_repairs(
        &self,
        symbol: &str,
        initial_text: String,
        initial_raw_json: serde_json::Value,
    ) -> anyhow::Result<(AiThesis, serde_json::Value)> {
        let first_err = match json::parse_thesis(&initial_text) {
            Ok(thesis) => return Ok((thesis, initial_raw_json)),
            Err(err) => err,
        };

        let mut last_err = first_err;
        let mut last_text = initial_text;
        let mut last_raw_json = initial_raw_json;

        for attempt in 1..=REPAIR_ATTEMPTS {
            let req = self.request(Self::repair_prompt(&last_text), self.max_tokens);
            let (raw_json, res) = self.create_message(symbol, req).await?;

            if let Some(tool_thesis) = Self::response_tool_thesis(&res)? {
                return Ok((tool_thesis.validate_and_into_thesis()?, raw_json));
            }

            let text = Self::response_text(&res);
            match json::parse_thesis(&text) {
                Ok(thesis) => return Ok((thesis, raw_json)),
                Err(err) => {
                    tracing::warn!(attempt, %symbol, error = %err, "LLM thesis still invalid after repair attempt");
                    last_err = err;
                    last_text = text;
                    last_raw_json = raw_json;
                }
            }
        }

        Err(LlmDiagnosticsError {
            provider: Provider::Anthropic,
            stage: "parse_after_repair",
            symbol: symbol.to_string(),
            detail: format!("final_error={last_err}"),
            raw_output: Some(last_text),
            raw_response_json: Some(last_raw_json),
        }
        .into())
    }

    pub async fn generate_thesis_with_raw(
        &self,
        request: &ThesisRequest,
    ) -> anyhow::Result<(AiThesis, serde_json::Value)> {
        let symbol = request.summary.symbol.as_str();
        let prompt = Self::user_prompt(request);

        let (mut raw_json, mut res) = self
            .create_message(symbol, self.request(prompt.clone(), self.max_tokens))
            .await?;

        // If the model hit max_tokens, retry once with a higher ceiling.
        if matches!(res.stop_reason.as_deref(), Some("max_tokens")) {
            let bumped = self.max_tokens.saturating_mul(2).max(2048);
            tracing::warn!(
                %symbol,
                from = self.max_tokens,
                to = bumped,
                "Anthropic stop_reason=max_tokens; retrying once with higher max_tokens"
            );
            let (rj, r) = self.create_message(symbol, self.request(prompt, bumped)).await?;
            raw_json = rj;
            res = r;
        }

        if let Some(tool_thesis) = Self::response_tool_thesis(&res)? {
            return Ok((tool_thesis.validate_and_into_thesis()?, raw_json));
        }

        // Fallback to text (should be rare with a forced tool choice).
        let text = Self::response_text(&res);
        self.try_parse_with_repairs(symbol, text, raw_json).await
    }
}

#[async_trait::async_trait]
impl ThesisProvider for AnthropicThesisClient {
    fn provider(&self) -> Provider {
        Provider::Anthropic
    }

    async fn generate_thesis(&self, request: ThesisRequest) -> anyhow::Result<AiThesis> {
        let (thesis, _raw) = self.generate_thesis_with_raw(&request).await?;
        Ok(thesis)
    }
}

#[derive(Debug, Clone, Serialize)]
struct CreateMessageRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<Message>,

    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Tool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<ToolChoice>,
}

#[derive(Debug, Clone, Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct CreateMessageResponse {
    content: Vec<ContentBlock>,

    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct Tool {
    name: &'static str,
    description: &'static str,
    input_schema: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
enum ToolChoice {
    #[serde(rename = "tool")]
    Tool { name: &'static str },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },

    #[serde(rename = "tool_use")]
    ToolUse {
        #[serde(default)]
        #[allow(dead_code)]
        id: String,
        #[serde(default)]
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },

    #[serde(other)]
    Unknown,
}
