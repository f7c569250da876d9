// src/provider/openai_compat.rs — Generic OpenAI-compatible gateway adapter
//
// Most upstream gateways (OpenRouter, Featherless, Chutes, Groq, DeepInfra,
// Together, Fireworks, NEAR, custom endpoints…) speak the OpenAI
// chat-completions dialect. One adapter covers them all; instances differ
// only in slug, base URL and credentials.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest_eventsource::{Event, RequestBuilderExt};

use super::{
    classify_response, classify_stream_error, classify_transport, CompletionRequest,
    CompletionResponse, Dialect, FinishReason, ProviderAdapter, RawStream, TokenUsage,
};
use crate::infra::errors::GatewayError;

pub struct OpenAiCompatAdapter {
    slug: String,
    name: String,
    api_key: String,
    client: reqwest::Client,
    base_url: String,
}

impl OpenAiCompatAdapter {
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
        let builder = builder.header(
            "User-Agent",
            format!("switchboard/{}", env!("CARGO_PKG_VERSION")),
        );
        if self.api_key.is_empty() {
            builder
        } else {
            builder.header("Authorization", format!("Bearer {}", self.api_key))
        }
    }

    fn request_body(&self, request: &CompletionRequest, stream: bool) -> serde_json::Value {
        let messages: Vec<serde_json::Value> = request
            .messages
            .iter()
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
        });

        if stream {
            body["stream"] = serde_json::json!(true);
            body["stream_options"] = serde_json::json!({ "include_usage": true });
        }
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        if let Some(temp) = request.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        if let Some(top_p) = request.top_p {
            body["top_p"] = serde_json::json!(top_p);
        }
        if let Some(stop) = &request.stop {
            body["stop"] = serde_json::json!(stop);
        }
        body
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiCompatAdapter {
    fn slug(&self) -> &str {
        &self.slug
    }

    fn display_name(&self) -> &str {
        &self.name
    }

    fn dialect(&self) -> Dialect {
        Dialect::OpenAi
    }

    async fn list_models(&self) -> Result<Vec<serde_json::Value>, GatewayError> {
        let response = self
            .authed(self.client.get(format!("{}/models", self.base_url)))
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

        // Most gateways wrap the listing in {"data": [...]}; a few return
        // the bare array.
        let models = body["data"]
            .as_array()
            .or_else(|| body.as_array())
            .cloned()
            .unwrap_or_default();
        Ok(models)
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, GatewayError> {
        let body = self.request_body(request, false);

        let response = self
            .authed(
                self.client
                    .post(format!("{}/chat/completions", self.base_url)),
            )
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

        let choice = &resp["choices"][0];
        let content = choice["message"]["content"]
            .as_str()
            .unwrap_or("")
            .to_string();
        let finish_reason = choice["finish_reason"]
            .as_str()
            .map(FinishReason::parse)
            .unwrap_or_default();
        let usage = TokenUsage {
            input_tokens: resp["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as u32,
            output_tokens: resp["usage"]["completion_tokens"].as_u64().unwrap_or(0) as u32,
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
        let body = self.request_body(request, true);

        let builder = self
            .authed(
                self.client
                    .post(format!("{}/chat/completions", self.base_url)),
            )
            .json(&body);

        let mut es = builder
            .eventsource()
            .map_err(|e| GatewayError::ProviderUnavailable {
                gateway: self.slug.clone(),
                message: e.to_string(),
            })?;

        // Wait for the connection to open; connect-phase failures belong to
        // this attempt, not to the returned stream. A data frame arriving
        // ahead of the open event is buffered, not dropped.
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
                if data == "[DONE]" {
                    es.close();
                    return;
                }
                match serde_json::from_str::<serde_json::Value>(&data) {
                    Ok(v) => yield Ok(v),
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
                        if msg.data == "[DONE]" {
                            break;
                        }
                        match serde_json::from_str::<serde_json::Value>(&msg.data) {
                            Ok(v) => yield Ok(v),
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
    use crate::provider::{ChatMessage, Role};

    fn adapter() -> OpenAiCompatAdapter {
        OpenAiCompatAdapter::new(
            "testgw".into(),
            "Test Gateway".into(),
            "sk-test".into(),
            "https://example.test/v1/".into(),
        )
    }

    #[test]
    fn test_base_url_trailing_slash_stripped() {
        let a = adapter();
        assert_eq!(a.base_url, "https://example.test/v1");
    }

    #[test]
    fn test_request_body_minimal() {
        let a = adapter();
        let req = CompletionRequest {
            model: "m1".into(),
            messages: vec![ChatMessage::user("hi")],
            ..Default::default()
        };
        let body = a.request_body(&req, false);
        assert_eq!(body["model"], "m1");
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"], "hi");
        assert!(body.get("stream").is_none());
        assert!(body.get("max_tokens").is_none());
    }

    #[test]
    fn test_request_body_stream_includes_usage() {
        let a = adapter();
        let req = CompletionRequest {
            model: "m1".into(),
            messages: vec![ChatMessage::system("be brief"), ChatMessage::user("hi")],
            max_tokens: Some(64),
            temperature: Some(0.2),
            ..Default::default()
        };
        let body = a.request_body(&req, true);
        assert_eq!(body["stream"], true);
        assert_eq!(body["stream_options"]["include_usage"], true);
        assert_eq!(body["max_tokens"], 64);
        assert_eq!(body["messages"][0]["role"], "system");
    }

    #[test]
    fn test_roles_serialize_lowercase() {
        for (role, expected) in [
            (Role::System, "system"),
            (Role::User, "user"),
            (Role::Assistant, "assistant"),
        ] {
            assert_eq!(role.as_str(), expected);
        }
    }
}
