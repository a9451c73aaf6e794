//! OpenAI Chat Completions wire format (also spoken by Ollama).
//!
//! System messages stay inline in `messages`.

use serde::{Deserialize, Serialize};

use crate::error::{LlmError, Result};
use crate::types::{ChatMessage, InferenceResponse, Provider, Role, Sampling, TokenUsage};

#[derive(Debug, Serialize)]
pub(crate) struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    temperature: f32,
    top_p: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: Option<u32>,
}

pub(crate) fn url(base: &str) -> String {
    format!("{}/chat/completions", base.trim_end_matches('/'))
}

pub(crate) fn build_request<'a>(
    model: &'a str,
    messages: &'a [ChatMessage],
    sampling: Sampling,
) -> ChatCompletionRequest<'a> {
    ChatCompletionRequest {
        model,
        messages: messages
            .iter()
            .map(|m| WireMessage {
                role: match m.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                },
                content: &m.content,
            })
            .collect(),
        temperature: sampling.temperature,
        top_p: sampling.top_p,
        max_tokens: sampling.max_tokens,
    }
}

pub(crate) fn parse_response(
    provider: Provider,
    model: &str,
    raw: &str,
) -> Result<InferenceResponse> {
    let response: ChatCompletionResponse =
        serde_json::from_str(raw).map_err(|e| LlmError::InvalidResponse {
            provider,
            reason: format!("JSON parse error: {e}"),
        })?;

    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::InvalidResponse {
            provider,
            reason: "no choices in response".to_string(),
        })?;

    let usage = response
        .usage
        .map(|u| TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u
                .total_tokens
                .unwrap_or(u.prompt_tokens + u.completion_tokens),
        })
        .unwrap_or_default();

    Ok(InferenceResponse {
        text: choice.message.content.unwrap_or_default(),
        finish_reason: choice.finish_reason,
        usage,
        provider,
        model: model.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_stays_inline() {
        let messages = vec![ChatMessage::system("be brief"), ChatMessage::user("hi")];
        let sampling = Sampling {
            temperature: 0.7,
            top_p: 1.0,
            max_tokens: 1000,
        };
        let body = serde_json::to_value(build_request("gpt-4o", &messages, sampling))
            .expect("serialize");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hi");
        assert_eq!(body["max_tokens"], 1000);
    }

    #[test]
    fn test_parse_response() {
        let raw = r#"{"choices":[{"message":{"role":"assistant","content":"hello"},"finish_reason":"stop"}],
                      "usage":{"prompt_tokens":5,"completion_tokens":1,"total_tokens":6}}"#;
        let resp = parse_response(Provider::OpenAi, "gpt-4o", raw).expect("parse");
        assert_eq!(resp.text, "hello");
        assert_eq!(resp.finish_reason.as_deref(), Some("stop"));
        assert_eq!(resp.usage.total_tokens, 6);
    }

    #[test]
    fn test_parse_empty_choices_is_invalid() {
        let err = parse_response(Provider::Ollama, "llama3", r#"{"choices":[]}"#).unwrap_err();
        assert!(matches!(err, LlmError::InvalidResponse { .. }));
    }
}
