// src/provider/anthropic.rs — Anthropic Messages dialect adapter

use async_trait::async_trait;
use futures::StreamExt;
use reqwest_eventsource::{Event, RequestBuilderExt};

use super::{
    classify_response, classify_stream_error, classify_transport, CompletionRequest,
    CompletionResponse, Dialect, FinishReason, ProviderAdapter, RawStream, Role, TokenUsage,
};
use crate::infra::errors::GatewayError;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Output cap sent when the client did not provide one; the Messages API
/// requires max_tokens on every request.
const DEFAULT_MAX_TOKENS: u32 = 4096;

pub struct AnthropicAdapter {
    slug: String,
    name: String,
    api_key: String,
    client: reqwest::Client,
    base_url: String,
}

impl AnthropicAdapter {
    pub fn new(slug: String, name: String, api_key: String, base_url: String) -> Self {
        Self {
            slug,
            name,
            api_key,
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .header(
                "User-Agent",
                format!("switchboard/{}", env!("CARGO_PKG_VERSION")),
            )
    }

    /// The Messages API takes system prompts in a top-level field, not in
    /// the message list.
    fn request_body(&self, request: &CompletionRequest) -> serde_json::Value {
        let system: Vec<&str> = request
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();

        let messages: Vec<serde_json::Value> = request
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| {
                serde_json::json!({
                    "role": m.role.as_str(),
                    "content": m.content,
                })
            })
            .collect();

        let mut body = serde_json::json!({
            "model": request.model,
            "messages": messages,
            "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        });

        if !system.is_empty() {
            body["system"] = serde_json::json!(system.join("\n\n"));
        }
        if let Some(temp) = request.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        if let Some(top_p) = request.top_p {
            body["top_p"] = serde_json::json!(top_p);
        }
        if let Some(stop) = &request.stop {
            body["stop_sequences"] = serde_json::json!(stop);
        }
        body
    }
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn slug(&self) -> &str {
        &self.slug
    }

    fn display_name(&self) -> &str {
        &self.name
    }

    fn dialect(&self) -> Dialect {
        Dialect::Anthropic
    }

    async fn list_models(&self) -> Result<Vec<serde_json::Value>, GatewayError> {
        let response = self
            .authed(self.client.get(format!("{}/v1/models", self.base_url)))
            .send()
            .await
            .map_err(|e| classify_transport(&self.slug, e))?;

        if !response.status().is_success() {
            return Err(classify_response(&self.slug, response).await);
        }

        let body: serde_json::Value =
            response
                .json()
                .await
                .map_err(|e| GatewayError::ProviderUnavailable {
                    gateway: self.slug.clone(),
                    message: format!("Failed to parse model listing: {e}"),
                })?;

        Ok(body["data"].as_array().cloned().unwrap_or_default())
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, GatewayError> {
        let body = self.request_body(request);

        let response = self
            .authed(self.client.post(format!("{}/v1/messages", self.base_url)))
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_transport(&self.slug, e))?;

        if !response.status().is_success() {
            return Err(classify_response(&self.slug, response).await);
        }

        let resp: serde_json::Value =
            response
                .json()
                .await
                .map_err(|e| GatewayError::ProviderUnavailable {
                    gateway: self.slug.clone(),
                    message: format!("Failed to parse response: {e}"),
                })?;

        let content = resp["content"]
            .as_array()
            .unwrap_or(&vec![])
            .iter()
            .filter(|c| c["type"] == "text")
            .map(|c| c["text"].as_str().unwrap_or(""))
            .collect::<Vec<_>>()
            .join("");

        let finish_reason = resp["stop_reason"]
            .as_str()
            .map(FinishReason::parse)
            .unwrap_or_default();

        let usage = TokenUsage {
            input_tokens: resp["usage"]["input_tokens"].as_u64().unwrap_or(0) as u32,
            output_tokens: resp["usage"]["output_tokens"].as_u64().unwrap_or(0) as u32,
        };

        let model = resp["model"].as_str().unwrap_or(&request.model).to_string();

        Ok(CompletionResponse {
            model,
            content,
            finish_reason,
            usage,
        })
    }

    async fn complete_streaming(
        &self,
        request: &CompletionRequest,
    ) -> Result<RawStream, GatewayError> {
        let mut body = self.request_body(request);
        body["stream"] = serde_json::json!(true);

        let builder = self
            .authed(self.client.post(format!("{}/v1/messages", self.base_url)))
            .json(&body);

        let mut es = builder
            .eventsource()
            .map_err(|e| GatewayError::ProviderUnavailable {
                gateway: self.slug.clone(),
                message: e.to_string(),
            })?;

        // Connect-phase failures belong to this attempt, not to the stream.
        let mut pending: Option<String> = None;
        match es.next().await {
            Some(Ok(Event::Open)) => {}
            Some(Ok(Event::Message(msg))) => pending = Some(msg.data),
            Some(Err(e)) => {
                es.close();
                return Err(classify_stream_error(&self.slug, e).await);
            }
            None => {
                return Err(GatewayError::ProviderUnavailable {
                    gateway: self.slug.clone(),
                    message: "stream closed before opening".into(),
                });
            }
        }

        let slug = self.slug.clone();
        let stream = async_stream::stream! {
            if let Some(data) = pending.take() {
                match serde_json::from_str::<serde_json::Value>(&data) {
                    Ok(v) => {
                        let stop = v["type"] == "message_stop";
                        yield Ok(v);
                        if stop {
                            es.close();
                            return;
                        }
                    }
                    Err(e) => {
                        yield Err(GatewayError::ProviderUnavailable {
                            gateway: slug.clone(),
                            message: format!("Failed to parse SSE data: {e}"),
                        });
                        es.close();
                        return;
                    }
                }
            }

            while let Some(event) = es.next().await {
                match event {
                    Ok(Event::Open) => {}
                    Ok(Event::Message(msg)) => {
                        match serde_json::from_str::<serde_json::Value>(&msg.data) {
                            Ok(v) => {
                                let stop = v["type"] == "message_stop";
                                yield Ok(v);
                                if stop {
                                    break;
                                }
                            }
                            Err(e) => {
                                yield Err(GatewayError::ProviderUnavailable {
                                    gateway: slug.clone(),
                                    message: format!("Failed to parse SSE data: {e}"),
                                });
                                break;
                            }
                        }
                    }
                    Err(reqwest_eventsource::Error::StreamEnded) => break,
                    Err(e) => {
                        yield Err(GatewayError::ProviderUnavailable {
                            gateway: slug.clone(),
                            message: format!("SSE stream error: {e}"),
                        });
                        break;
                    }
                }
            }
            es.close();
        };

        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ChatMessage;

    fn adapter() -> AnthropicAdapter {
        AnthropicAdapter::new(
            "anthropic".into(),
            "Anthropic".into(),
            "sk-ant-test".into(),
            "https://api.anthropic.com/".into(),
        )
    }

    #[test]
    fn test_system_messages_lifted_out() {
        let a = adapter();
        let req = CompletionRequest {
            model: "claude-sonnet-4-20250514".into(),
            messages: vec![
                ChatMessage::system("you are terse"),
                ChatMessage::user("hello"),
                ChatMessage::assistant("hi"),
                ChatMessage::user("bye"),
            ],
            ..Default::default()
        };
        let body = a.request_body(&req);
        assert_eq!(body["system"], "you are terse");
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 3);
        assert!(messages.iter().all(|m| m["role"] != "system"));
    }

    #[test]
    fn test_max_tokens_always_present() {
        let a = adapter();
        let req = CompletionRequest {
            model: "claude-sonnet-4-20250514".into(),
            messages: vec![ChatMessage::user("hello")],
            ..Default::default()
        };
        let body = a.request_body(&req);
        assert_eq!(body["max_tokens"], DEFAULT_MAX_TOKENS);

        let req = CompletionRequest {
            max_tokens: Some(100),
            ..req
        };
        assert_eq!(a.request_body(&req)["max_tokens"], 100);
    }

    #[test]
    fn test_stop_sequences_renamed() {
        let a = adapter();
        let req = CompletionRequest {
            model: "claude-sonnet-4-20250514".into(),
            messages: vec![ChatMessage::user("hello")],
            stop: Some(vec!["END".into()]),
            ..Default::default()
        };
        let body = a.request_body(&req);
        assert_eq!(body["stop_sequences"][0], "END");
        assert!(body.get("stop").is_none());
    }
}
