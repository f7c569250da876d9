// src/routing/stream.rs — Dialect-agnostic stream normalization
//
// Adapters hand the router raw decoded JSON frames; this module folds
// them into one event shape regardless of upstream dialect. The
// normalized stream always terminates with exactly one Done, and a
// mid-stream failure surfaces as an in-band Error event right before
// it — once upstream bytes have flowed, the failure belongs to the
// client, not to failover.

use async_stream::stream;
use futures::StreamExt;
use std::pin::Pin;

use crate::infra::errors::GatewayError;
use crate::provider::{Dialect, FinishReason, RawStream, TokenUsage};

/// One normalized increment of a streaming completion.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamChunk {
    pub delta: String,
    pub finish_reason: Option<FinishReason>,
    pub usage: Option<TokenUsage>,
}

impl StreamChunk {
    fn is_empty(&self) -> bool {
        self.delta.is_empty() && self.finish_reason.is_none() && self.usage.is_none()
    }
}

#[derive(Debug)]
pub enum StreamEvent {
    Chunk(StreamChunk),
    Error(GatewayError),
    Done,
}

pub type NormalizedStream = Pin<Box<dyn futures::Stream<Item = StreamEvent> + Send>>;

/// Fold raw dialect frames into `Chunk* Error? Done`.
pub fn normalize_stream(dialect: Dialect, raw: RawStream) -> NormalizedStream {
    match dialect {
        Dialect::OpenAi => normalize_openai(raw),
        Dialect::Anthropic => normalize_anthropic(raw),
    }
}

/// OpenAI-style frames: each carries `choices[0].delta`, the last
/// content frame carries `finish_reason`, and with usage reporting
/// enabled a trailing frame has empty `choices` and a `usage` object.
fn normalize_openai(mut raw: RawStream) -> NormalizedStream {
    Box::pin(stream! {
        while let Some(frame) = raw.next().await {
            let frame = match frame {
                Ok(f) => f,
                Err(e) => {
                    yield StreamEvent::Error(e);
                    break;
                }
            };

            let mut chunk = StreamChunk::default();
            if let Some(choice) = frame["choices"].get(0) {
                if let Some(text) = choice["delta"]["content"].as_str() {
                    chunk.delta.push_str(text);
                }
                if let Some(reason) = choice["finish_reason"].as_str() {
                    chunk.finish_reason = Some(FinishReason::parse(reason));
                }
            }
            if frame["usage"].is_object() {
                chunk.usage = Some(TokenUsage {
                    input_tokens: frame["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as u32,
                    output_tokens: frame["usage"]["completion_tokens"].as_u64().unwrap_or(0)
                        as u32,
                });
            }

            // Role announcements and pings decode to nothing; skip them.
            if !chunk.is_empty() {
                yield StreamEvent::Chunk(chunk);
            }
        }
        yield StreamEvent::Done;
    })
}

/// Anthropic-style frames: typed events where `message_start` carries
/// input token usage, `content_block_delta` carries text, and
/// `message_delta` carries the stop reason plus output token usage.
fn normalize_anthropic(mut raw: RawStream) -> NormalizedStream {
    Box::pin(stream! {
        let mut input_tokens: u32 = 0;
        while let Some(frame) = raw.next().await {
            let frame = match frame {
                Ok(f) => f,
                Err(e) => {
                    yield StreamEvent::Error(e);
                    break;
                }
            };

            match frame["type"].as_str().unwrap_or("") {
                "message_start" => {
                    input_tokens = frame["message"]["usage"]["input_tokens"]
                        .as_u64()
                        .unwrap_or(0) as u32;
                }
                "content_block_delta" => {
                    if let Some(text) = frame["delta"]["text"].as_str() {
                        if !text.is_empty() {
                            yield StreamEvent::Chunk(StreamChunk {
                                delta: text.to_string(),
                                ..StreamChunk::default()
                            });
                        }
                    }
                }
                "message_delta" => {
                    let finish = frame["delta"]["stop_reason"]
                        .as_str()
                        .map(FinishReason::parse);
                    let usage = frame["usage"]["output_tokens"].as_u64().map(|out| {
                        TokenUsage {
                            input_tokens,
                            output_tokens: out as u32,
                        }
                    });
                    if finish.is_some() || usage.is_some() {
                        yield StreamEvent::Chunk(StreamChunk {
                            delta: String::new(),
                            finish_reason: finish,
                            usage,
                        });
                    }
                }
                "error" => {
                    let message = frame["error"]["message"]
                        .as_str()
                        .unwrap_or("upstream stream error")
                        .to_string();
                    yield StreamEvent::Error(GatewayError::ProviderUnavailable {
                        gateway: String::new(),
                        message,
                    });
                    break;
                }
                // ping, content_block_start/stop, message_stop: no payload.
                _ => {}
            }
        }
        yield StreamEvent::Done;
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw_of(frames: Vec<Result<serde_json::Value, GatewayError>>) -> RawStream {
        Box::pin(futures::stream::iter(frames))
    }

    async fn collect(stream: NormalizedStream) -> Vec<StreamEvent> {
        stream.collect().await
    }

    // ─── OpenAI dialect ─────────────────────────────────────────

    #[tokio::test]
    async fn test_openai_frames_normalize_to_chunks_then_done() {
        let frames = vec![
            Ok(json!({"choices": [{"delta": {"role": "assistant"}}]})),
            Ok(json!({"choices": [{"delta": {"content": "Hel"}}]})),
            Ok(json!({"choices": [{"delta": {"content": "lo"}, "finish_reason": null}]})),
            Ok(json!({"choices": [{"delta": {}, "finish_reason": "stop"}]})),
            Ok(json!({"choices": [], "usage": {"prompt_tokens": 7, "completion_tokens": 2}})),
        ];
        let events = collect(normalize_stream(Dialect::OpenAi, raw_of(frames))).await;

        assert_eq!(events.len(), 5);
        assert!(matches!(&events[0], StreamEvent::Chunk(c) if c.delta == "Hel"));
        assert!(matches!(&events[1], StreamEvent::Chunk(c) if c.delta == "lo"));
        assert!(
            matches!(&events[2], StreamEvent::Chunk(c) if c.finish_reason == Some(FinishReason::Stop))
        );
        match &events[3] {
            StreamEvent::Chunk(c) => {
                let usage = c.usage.clone().unwrap();
                assert_eq!(usage.input_tokens, 7);
                assert_eq!(usage.output_tokens, 2);
            }
            other => panic!("expected usage chunk, got {other:?}"),
        }
        assert!(matches!(events[4], StreamEvent::Done));
    }

    #[tokio::test]
    async fn test_openai_mid_stream_error_is_in_band() {
        let frames = vec![
            Ok(json!({"choices": [{"delta": {"content": "partial"}}]})),
            Err(GatewayError::ProviderUnavailable {
                gateway: "gw".into(),
                message: "connection reset".into(),
            }),
        ];
        let events = collect(normalize_stream(Dialect::OpenAi, raw_of(frames))).await;

        assert_eq!(events.len(), 3);
        assert!(matches!(&events[0], StreamEvent::Chunk(c) if c.delta == "partial"));
        assert!(matches!(&events[1], StreamEvent::Error(_)));
        assert!(matches!(events[2], StreamEvent::Done));
    }

    #[tokio::test]
    async fn test_empty_stream_yields_done_exactly_once() {
        let events = collect(normalize_stream(Dialect::OpenAi, raw_of(vec![]))).await;
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], StreamEvent::Done));
    }

    // ─── Anthropic dialect ──────────────────────────────────────

    #[tokio::test]
    async fn test_anthropic_frames_normalize_with_usage_stitched() {
        let frames = vec![
            Ok(json!({"type": "message_start",
                      "message": {"usage": {"input_tokens": 12, "output_tokens": 1}}})),
            Ok(json!({"type": "content_block_start", "index": 0})),
            Ok(json!({"type": "ping"})),
            Ok(json!({"type": "content_block_delta",
                      "delta": {"type": "text_delta", "text": "Hello "}})),
            Ok(json!({"type": "content_block_delta",
                      "delta": {"type": "text_delta", "text": "world"}})),
            Ok(json!({"type": "content_block_stop", "index": 0})),
            Ok(json!({"type": "message_delta",
                      "delta": {"stop_reason": "end_turn"},
                      "usage": {"output_tokens": 4}})),
            Ok(json!({"type": "message_stop"})),
        ];
        let events = collect(normalize_stream(Dialect::Anthropic, raw_of(frames))).await;

        assert_eq!(events.len(), 4);
        assert!(matches!(&events[0], StreamEvent::Chunk(c) if c.delta == "Hello "));
        assert!(matches!(&events[1], StreamEvent::Chunk(c) if c.delta == "world"));
        match &events[2] {
            StreamEvent::Chunk(c) => {
                assert_eq!(c.finish_reason, Some(FinishReason::Stop));
                let usage = c.usage.clone().unwrap();
                assert_eq!(usage.input_tokens, 12);
                assert_eq!(usage.output_tokens, 4);
            }
            other => panic!("expected finish chunk, got {other:?}"),
        }
        assert!(matches!(events[3], StreamEvent::Done));
    }

    #[tokio::test]
    async fn test_anthropic_error_event_surfaces_in_band() {
        let frames = vec![
            Ok(json!({"type": "content_block_delta",
                      "delta": {"type": "text_delta", "text": "par"}})),
            Ok(json!({"type": "error",
                      "error": {"type": "overloaded_error", "message": "Overloaded"}})),
        ];
        let events = collect(normalize_stream(Dialect::Anthropic, raw_of(frames))).await;

        assert_eq!(events.len(), 3);
        assert!(matches!(&events[1], StreamEvent::Error(e) if e.to_string().contains("Overloaded")));
        assert!(matches!(events[2], StreamEvent::Done));
    }
}
