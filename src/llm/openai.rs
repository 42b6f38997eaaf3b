use std::time::Duration;

use base64::Engine as _;
use serde::Deserialize;

use super::types::{ChatClient, ChatRequest};
use super::LlmError;

/// Blocking client for an OpenAI-compatible `/chat/completions` endpoint.
///
/// When the endpoint rejects `temperature` or `response_format` with a 400
/// that names the parameter, the request is sent again once without it.
pub struct OpenAiClient {
    base_url: String,
    api_key: String,
    client: reqwest::blocking::Client,
    timeout_secs: u64,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Optional request parameters some models refuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OptionalParam {
    Temperature,
    ResponseFormat,
}

impl OpenAiClient {
    pub fn new(base_url: &str, api_key: &str, timeout_secs: u64) -> Result<Self, LlmError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| LlmError::HttpClient(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            client,
            timeout_secs,
        })
    }

    fn send(&self, body: &serde_json::Value) -> Result<String, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .map_err(|e| {
                if e.is_connect() {
                    LlmError::Connection(self.base_url.clone())
                } else if e.is_timeout() {
                    LlmError::Timeout(self.timeout_secs)
                } else if e.is_request() || e.is_body() {
                    LlmError::Transport(e.to_string())
                } else {
                    LlmError::HttpClient(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: CompletionResponse = response
            .json()
            .map_err(|e| LlmError::ResponseParsing(e.to_string()))?;

        Ok(parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default())
    }
}

impl ChatClient for OpenAiClient {
    fn complete(&self, request: &ChatRequest<'_>) -> Result<String, LlmError> {
        let mut dropped: Vec<OptionalParam> = Vec::new();
        loop {
            let body = build_request_body(request, &dropped);
            match self.send(&body) {
                Err(LlmError::Api { status: 400, body: error_body }) => {
                    match rejected_param(request, &error_body, &dropped) {
                        Some(param) => {
                            tracing::warn!(
                                model = request.model,
                                param = ?param,
                                "Endpoint rejected optional parameter, retrying without it"
                            );
                            dropped.push(param);
                        }
                        None => {
                            return Err(LlmError::Api {
                                status: 400,
                                body: error_body,
                            })
                        }
                    }
                }
                other => return other,
            }
        }
    }
}

/// Reasoning-style models reject any non-default temperature.
fn supports_temperature(model: &str) -> bool {
    let name = model.rsplit('/').next().unwrap_or(model).to_ascii_lowercase();
    !(name.starts_with("gpt-5")
        || name.starts_with("o1")
        || name.starts_with("o3")
        || name.starts_with("o4"))
}

/// Which still-present optional parameter a 400 body complains about.
fn rejected_param(
    request: &ChatRequest<'_>,
    error_body: &str,
    dropped: &[OptionalParam],
) -> Option<OptionalParam> {
    let lower = error_body.to_lowercase();
    let sends_temperature = request.temperature.is_some()
        && supports_temperature(request.model)
        && !dropped.contains(&OptionalParam::Temperature);
    if sends_temperature && lower.contains("temperature") {
        return Some(OptionalParam::Temperature);
    }
    let sends_format =
        request.json_schema.is_some() && !dropped.contains(&OptionalParam::ResponseFormat);
    if sends_format && (lower.contains("response_format") || lower.contains("json_schema")) {
        return Some(OptionalParam::ResponseFormat);
    }
    None
}

fn build_request_body(request: &ChatRequest<'_>, dropped: &[OptionalParam]) -> serde_json::Value {
    let mut user_content = Vec::new();
    if let Some(text) = request.user_text {
        user_content.push(serde_json::json!({ "type": "text", "text": text }));
    }
    if let Some(png) = request.image_png {
        let payload = base64::engine::general_purpose::STANDARD.encode(png);
        user_content.push(serde_json::json!({
            "type": "image_url",
            "image_url": {
                "url": format!("data:image/png;base64,{payload}"),
                "detail": "high",
            },
        }));
    }

    let mut body = serde_json::json!({
        "model": request.model,
        "messages": [
            { "role": "system", "content": request.system },
            { "role": "user", "content": user_content },
        ],
    });

    if let Some(temperature) = request.temperature {
        if supports_temperature(request.model) && !dropped.contains(&OptionalParam::Temperature) {
            body["temperature"] = serde_json::json!(temperature);
        }
    }
    if let Some(schema) = request.json_schema {
        if !dropped.contains(&OptionalParam::ResponseFormat) {
            body["response_format"] = serde_json::json!({
                "type": "json_schema",
                "json_schema": {
                    "name": schema.name,
                    "schema": schema.schema,
                    "strict": true,
                },
            });
        }
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::JsonSchema;

    fn schema() -> JsonSchema {
        JsonSchema {
            name: "result".into(),
            schema: serde_json::json!({"type": "object"}),
        }
    }

    #[test]
    fn malformed_base_url_is_permanent() {
        use crate::pipeline::retry::Retryable;
        let client = OpenAiClient::new("not a url", "key", 1).unwrap();
        let err = client.send(&serde_json::json!({})).unwrap_err();
        assert!(matches!(err, LlmError::HttpClient(_)), "unexpected error: {err}");
        assert!(!err.is_transient());
    }

    #[test]
    fn image_request_uses_data_url() {
        let png = [0x89, b'P', b'N', b'G'];
        let req = ChatRequest::new("gpt-4.1", "sys").with_image(&png);
        let body = build_request_body(&req, &[]);
        let url = body["messages"][1]["content"][0]["image_url"]["url"]
            .as_str()
            .unwrap();
        assert!(url.starts_with("data:image/png;base64,"));
        assert_eq!(body["messages"][0]["content"], "sys");
    }

    #[test]
    fn temperature_omitted_for_reasoning_models() {
        let req = ChatRequest::new("gpt-5-mini", "sys")
            .with_text("hi")
            .with_temperature(0.2);
        assert!(build_request_body(&req, &[]).get("temperature").is_none());

        let req = ChatRequest::new("gemma3:27b", "sys")
            .with_text("hi")
            .with_temperature(0.2);
        assert!(build_request_body(&req, &[]).get("temperature").is_some());
    }

    #[test]
    fn dropped_params_are_not_sent() {
        let s = schema();
        let req = ChatRequest::new("gemma3:27b", "sys")
            .with_text("hi")
            .with_temperature(0.2)
            .with_json_schema(&s);
        let full = build_request_body(&req, &[]);
        assert_eq!(full["response_format"]["type"], "json_schema");

        let trimmed = build_request_body(
            &req,
            &[OptionalParam::Temperature, OptionalParam::ResponseFormat],
        );
        assert!(trimmed.get("temperature").is_none());
        assert!(trimmed.get("response_format").is_none());
    }

    #[test]
    fn rejected_param_detection() {
        let s = schema();
        let req = ChatRequest::new("gemma3:27b", "sys")
            .with_temperature(0.2)
            .with_json_schema(&s);
        let body = "Unsupported value: 'temperature' does not support 0.2 with this model.";
        assert_eq!(rejected_param(&req, body, &[]), Some(OptionalParam::Temperature));
        assert_eq!(rejected_param(&req, body, &[OptionalParam::Temperature]), None);
        assert_eq!(
            rejected_param(&req, "Invalid parameter: response_format", &[]),
            Some(OptionalParam::ResponseFormat)
        );
        assert_eq!(rejected_param(&req, "context length exceeded", &[]), None);
    }
}
