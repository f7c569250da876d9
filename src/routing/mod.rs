// src/routing/mod.rs — Failover routing engine
//
// Resolution turns a requested model id (plus an optional explicit
// gateway) into an ordered failover chain; execution walks that chain
// strictly in sequence, one billable attempt at a time, recording every
// outcome with the availability tracker before moving on. A request
// deadline bounds the whole walk and wins over remaining candidates.

pub mod gates;
pub mod stream;

use async_stream::stream;
use futures::StreamExt;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::time::{timeout, Duration, Instant};

use crate::catalog::{CatalogHit, CatalogOrigin, ModelCatalog};
use crate::health::AvailabilityTracker;
use crate::infra::config::RoutingConfig;
use crate::infra::errors::{AttemptReport, GatewayError};
use crate::provider::{AdapterRegistry, CompletionRequest, CompletionResponse};
use gates::{AllowAll, CreditGate, DiscardUsage, RateGate, UsageEvent, UsageSink};
use stream::{NormalizedStream, StreamEvent};

/// One candidate in a failover chain. The model id is the id the target
/// gateway knows, which for a substitute differs from the requested id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteTarget {
    pub gateway: String,
    pub model: String,
}

impl fmt::Display for RouteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.gateway, self.model)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FailoverChain {
    pub requested: String,
    pub targets: Vec<RouteTarget>,
}

impl FailoverChain {
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

/// A completion that made it through the chain, tagged with the target
/// that actually served it.
#[derive(Debug)]
pub struct RoutedCompletion {
    pub target: RouteTarget,
    pub response: CompletionResponse,
    /// Billable attempts consumed, the successful one included.
    pub attempts: u32,
    pub latency_ms: u64,
}

/// An established stream, already normalized, tagged with its target.
pub struct RoutedStream {
    pub target: RouteTarget,
    pub events: NormalizedStream,
}

impl std::fmt::Debug for RoutedStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutedStream")
            .field("target", &self.target)
            .field("events", &"<stream>")
            .finish()
    }
}

pub struct Router {
    registry: Arc<AdapterRegistry>,
    catalog: Arc<ModelCatalog>,
    tracker: Arc<AvailabilityTracker>,
    config: RoutingConfig,
    credit_gate: Arc<dyn CreditGate>,
    rate_gate: Arc<dyn RateGate>,
    usage_sink: Arc<dyn UsageSink>,
}

impl Router {
    pub fn new(
        registry: Arc<AdapterRegistry>,
        catalog: Arc<ModelCatalog>,
        tracker: Arc<AvailabilityTracker>,
        config: RoutingConfig,
    ) -> Self {
        Self {
            registry,
            catalog,
            tracker,
            config,
            credit_gate: Arc::new(AllowAll),
            rate_gate: Arc::new(AllowAll),
            usage_sink: Arc::new(DiscardUsage),
        }
    }

    pub fn with_credit_gate(mut self, gate: Arc<dyn CreditGate>) -> Self {
        self.credit_gate = gate;
        self
    }

    pub fn with_rate_gate(mut self, gate: Arc<dyn RateGate>) -> Self {
        self.rate_gate = gate;
        self
    }

    pub fn with_usage_sink(mut self, sink: Arc<dyn UsageSink>) -> Self {
        self.usage_sink = sink;
        self
    }

    pub fn tracker(&self) -> &Arc<AvailabilityTracker> {
        &self.tracker
    }

    pub fn catalog(&self) -> &Arc<ModelCatalog> {
        &self.catalog
    }

    // ─── Resolution ─────────────────────────────────────────────

    /// Build the failover chain for a requested model. An explicit
    /// gateway is authoritative: the chain holds at most that single
    /// target and never borrows candidates from other gateways.
    pub async fn route(
        &self,
        model: &str,
        explicit_gateway: Option<&str>,
    ) -> Result<FailoverChain, GatewayError> {
        let chain = match explicit_gateway {
            Some(gateway) => self.route_explicit(model, gateway).await?,
            None => self.route_by_catalog(model).await?,
        };
        tracing::debug!(
            "routing: chain for '{}' = [{}]",
            chain.requested,
            chain
                .targets
                .iter()
                .map(|t| t.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(chain)
    }

    async fn route_explicit(
        &self,
        model: &str,
        gateway: &str,
    ) -> Result<FailoverChain, GatewayError> {
        if !self.registry.contains(gateway) {
            return Err(GatewayError::UnknownGateway(gateway.to_string()));
        }
        let models = self.catalog.models(gateway).await?;
        if !models.iter().any(|m| m.id == model) {
            return Err(GatewayError::ModelNotFound {
                model: model.to_string(),
                suggestions: self.catalog.suggestions_for(model).await,
            });
        }

        let mut targets = Vec::with_capacity(1);
        if self.tracker.is_routable(gateway, model).await {
            targets.push(RouteTarget {
                gateway: gateway.to_string(),
                model: model.to_string(),
            });
        }
        Ok(FailoverChain {
            requested: model.to_string(),
            targets,
        })
    }

    async fn route_by_catalog(&self, model: &str) -> Result<FailoverChain, GatewayError> {
        let mut hits = self.catalog.find_model(model).await;
        if hits.is_empty() {
            return Err(GatewayError::ModelNotFound {
                model: model.to_string(),
                suggestions: self.catalog.suggestions_for(model).await,
            });
        }
        order_primaries(&mut hits, model);

        let mut targets: Vec<RouteTarget> = Vec::new();
        for hit in &hits {
            let target = RouteTarget {
                gateway: hit.record.gateway.clone(),
                model: hit.record.id.clone(),
            };
            if !targets.contains(&target)
                && self.tracker.is_routable(&target.gateway, &target.model).await
            {
                targets.push(target);
            }
        }

        // Fallback candidates share the best exact hit's capability
        // shape, ranked by the configured policy.
        let wanted = &hits[0].record;
        let substitutes = self.catalog.substitutes(wanted).await;
        for record in self.tracker.rank(substitutes, &self.config.ranking).await {
            if targets.len() >= self.config.max_chain_len {
                break;
            }
            let target = RouteTarget {
                gateway: record.gateway,
                model: record.id,
            };
            if !targets.contains(&target)
                && self.tracker.is_routable(&target.gateway, &target.model).await
            {
                targets.push(target);
            }
        }
        targets.truncate(self.config.max_chain_len);

        Ok(FailoverChain {
            requested: model.to_string(),
            targets,
        })
    }

    // ─── Execution ──────────────────────────────────────────────

    /// Walk the chain sequentially until one candidate completes. Every
    /// billable attempt's outcome lands in the tracker before the next
    /// candidate is tried.
    pub async fn execute(
        &self,
        chain: &FailoverChain,
        request: &CompletionRequest,
        tenant: &str,
    ) -> Result<RoutedCompletion, GatewayError> {
        self.preflight(request, tenant).await?;

        let deadline_ms = self.config.deadline_seconds * 1000;
        let deadline = Instant::now() + Duration::from_secs(self.config.deadline_seconds);
        let attempt_timeout = Duration::from_secs(self.config.attempt_timeout_seconds);
        let mut attempts: Vec<AttemptReport> = Vec::new();

        for target in &chain.targets {
            let now = Instant::now();
            if now >= deadline {
                return Err(GatewayError::DeadlineExceeded { deadline_ms });
            }
            if !self.tracker.try_acquire(&target.gateway, &target.model).await {
                tracing::debug!("routing: {target} refused by circuit, skipping");
                continue;
            }
            let Some(adapter) = self.registry.get(&target.gateway) else {
                self.tracker.release(&target.gateway, &target.model).await;
                continue;
            };

            let budget = attempt_timeout.min(deadline - now);
            let started = Instant::now();
            let outcome = timeout(budget, adapter.complete(&request.for_model(&target.model))).await;
            let latency = started.elapsed();

            match outcome {
                Ok(Ok(response)) => {
                    self.tracker
                        .record_outcome(&target.gateway, &target.model, true, Some(latency))
                        .await;
                    let latency_ms = latency.as_millis() as u64;
                    self.usage_sink
                        .record(UsageEvent {
                            tenant: tenant.to_string(),
                            gateway: target.gateway.clone(),
                            model: target.model.clone(),
                            usage: response.usage,
                            latency_ms,
                            streamed: false,
                        })
                        .await;
                    return Ok(RoutedCompletion {
                        target: target.clone(),
                        response,
                        attempts: attempts.len() as u32 + 1,
                        latency_ms,
                    });
                }
                Ok(Err(e)) => {
                    self.tracker
                        .record_outcome(&target.gateway, &target.model, false, Some(latency))
                        .await;
                    if !e.is_retriable() {
                        return Err(e);
                    }
                    tracing::warn!("routing: attempt on {target} failed: {e}");
                    attempts.push(AttemptReport {
                        gateway: target.gateway.clone(),
                        model: target.model.clone(),
                        error: e.to_string(),
                    });
                }
                Err(_) => {
                    self.tracker
                        .record_outcome(&target.gateway, &target.model, false, Some(latency))
                        .await;
                    if Instant::now() >= deadline {
                        return Err(GatewayError::DeadlineExceeded { deadline_ms });
                    }
                    tracing::warn!(
                        "routing: attempt on {target} timed out after {}ms",
                        budget.as_millis()
                    );
                    attempts.push(AttemptReport {
                        gateway: target.gateway.clone(),
                        model: target.model.clone(),
                        error: format!("timed out after {}ms", budget.as_millis()),
                    });
                }
            }
        }

        Err(GatewayError::ChainExhausted {
            model: chain.requested.clone(),
            attempts,
        })
    }

    /// Streaming variant. Failover covers the connect/first-frame phase
    /// only; once a stream is established its target is final and any
    /// later upstream failure surfaces in-band.
    pub async fn execute_streaming(
        &self,
        chain: &FailoverChain,
        request: &CompletionRequest,
        tenant: &str,
    ) -> Result<RoutedStream, GatewayError> {
        self.preflight(request, tenant).await?;

        let deadline_ms = self.config.deadline_seconds * 1000;
        let deadline = Instant::now() + Duration::from_secs(self.config.deadline_seconds);
        let attempt_timeout = Duration::from_secs(self.config.attempt_timeout_seconds);
        let mut attempts: Vec<AttemptReport> = Vec::new();

        for target in &chain.targets {
            let now = Instant::now();
            if now >= deadline {
                return Err(GatewayError::DeadlineExceeded { deadline_ms });
            }
            if !self.tracker.try_acquire(&target.gateway, &target.model).await {
                tracing::debug!("routing: {target} refused by circuit, skipping");
                continue;
            }
            let Some(adapter) = self.registry.get(&target.gateway) else {
                self.tracker.release(&target.gateway, &target.model).await;
                continue;
            };

            let budget = attempt_timeout.min(deadline - now);
            let started = Instant::now();
            let outcome = timeout(
                budget,
                adapter.complete_streaming(&request.for_model(&target.model)),
            )
            .await;
            let latency = started.elapsed();

            match outcome {
                Ok(Ok(raw)) => {
                    self.tracker
                        .record_outcome(&target.gateway, &target.model, true, Some(latency))
                        .await;
                    let events = stream::normalize_stream(adapter.dialect(), raw);
                    let events = self.instrument_stream(
                        target.clone(),
                        tenant.to_string(),
                        latency.as_millis() as u64,
                        events,
                    );
                    return Ok(RoutedStream {
                        target: target.clone(),
                        events,
                    });
                }
                Ok(Err(e)) => {
                    self.tracker
                        .record_outcome(&target.gateway, &target.model, false, Some(latency))
                        .await;
                    if !e.is_retriable() {
                        return Err(e);
                    }
                    tracing::warn!("routing: stream connect to {target} failed: {e}");
                    attempts.push(AttemptReport {
                        gateway: target.gateway.clone(),
                        model: target.model.clone(),
                        error: e.to_string(),
                    });
                }
                Err(_) => {
                    self.tracker
                        .record_outcome(&target.gateway, &target.model, false, Some(latency))
                        .await;
                    if Instant::now() >= deadline {
                        return Err(GatewayError::DeadlineExceeded { deadline_ms });
                    }
                    tracing::warn!(
                        "routing: stream connect to {target} timed out after {}ms",
                        budget.as_millis()
                    );
                    attempts.push(AttemptReport {
                        gateway: target.gateway.clone(),
                        model: target.model.clone(),
                        error: format!("timed out after {}ms", budget.as_millis()),
                    });
                }
            }
        }

        Err(GatewayError::ChainExhausted {
            model: chain.requested.clone(),
            attempts,
        })
    }

    /// Route then execute in one step.
    pub async fn complete(
        &self,
        model: &str,
        explicit_gateway: Option<&str>,
        request: &CompletionRequest,
        tenant: &str,
    ) -> Result<RoutedCompletion, GatewayError> {
        let chain = self.route(model, explicit_gateway).await?;
        self.execute(&chain, request, tenant).await
    }

    /// Route then open a normalized stream in one step.
    pub async fn complete_streaming(
        &self,
        model: &str,
        explicit_gateway: Option<&str>,
        request: &CompletionRequest,
        tenant: &str,
    ) -> Result<RoutedStream, GatewayError> {
        let chain = self.route(model, explicit_gateway).await?;
        self.execute_streaming(&chain, request, tenant).await
    }

    async fn preflight(
        &self,
        request: &CompletionRequest,
        tenant: &str,
    ) -> Result<(), GatewayError> {
        self.credit_gate
            .check(tenant, estimated_tokens(request))
            .await?;
        self.rate_gate.admit(tenant).await?;
        Ok(())
    }

    /// Forward events untouched while watching for a usage chunk; report
    /// it to the sink once the stream finishes cleanly.
    fn instrument_stream(
        &self,
        target: RouteTarget,
        tenant: String,
        connect_ms: u64,
        mut events: NormalizedStream,
    ) -> NormalizedStream {
        let sink = Arc::clone(&self.usage_sink);
        Box::pin(stream! {
            let mut usage = None;
            let mut failed = false;
            while let Some(event) = events.next().await {
                match &event {
                    StreamEvent::Chunk(chunk) => {
                        if let Some(u) = chunk.usage {
                            usage = Some(u);
                        }
                    }
                    StreamEvent::Error(e) => {
                        failed = true;
                        tracing::warn!("routing: stream from {target} failed mid-flight: {e}");
                    }
                    StreamEvent::Done => {
                        if !failed {
                            if let Some(usage) = usage.take() {
                                sink.record(UsageEvent {
                                    tenant: tenant.clone(),
                                    gateway: target.gateway.clone(),
                                    model: target.model.clone(),
                                    usage,
                                    latency_ms: connect_ms,
                                    streamed: true,
                                })
                                .await;
                            }
                        }
                    }
                }
                yield event;
            }
        })
    }
}

/// Order exact-id hits: live catalog entries before fallback-origin
/// ones, then the gateway matching the id's namespace prefix, then
/// lexicographic gateway order for determinism.
fn order_primaries(hits: &mut [CatalogHit], requested: &str) {
    let namespace = requested.split_once('/').map(|(ns, _)| ns.to_string());
    hits.sort_by_key(|hit| {
        let ns_mismatch = match &namespace {
            Some(ns) => hit.record.gateway != *ns && hit.record.provider_slug != *ns,
            None => true,
        };
        (
            hit.origin != CatalogOrigin::Live,
            ns_mismatch,
            hit.record.gateway.clone(),
        )
    });
}

/// Rough token estimate for the credit gate: prompt chars over four
/// plus the requested output budget.
fn estimated_tokens(request: &CompletionRequest) -> u64 {
    let prompt: usize = request.messages.iter().map(|m| m.content.len() / 4).sum();
    prompt as u64 + u64::from(request.max_tokens.unwrap_or(1024))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ModelPricing, ModelRecord};
    use crate::provider::ChatMessage;

    fn hit(gateway: &str, id: &str, origin: CatalogOrigin) -> CatalogHit {
        CatalogHit {
            record: ModelRecord {
                id: id.into(),
                name: id.into(),
                provider_slug: id.split_once('/').map(|(ns, _)| ns).unwrap_or(gateway).into(),
                gateway: gateway.into(),
                context_length: Some(8192),
                max_output_tokens: None,
                modality: "text->text".into(),
                pricing: ModelPricing::default(),
                tags: Vec::new(),
                raw: serde_json::Value::Null,
            },
            origin,
        }
    }

    #[test]
    fn test_live_hits_sort_before_fallback() {
        let mut hits = vec![
            hit("chutes", "deepseek-ai/DeepSeek-V3", CatalogOrigin::Fallback),
            hit("together", "deepseek-ai/DeepSeek-V3", CatalogOrigin::Live),
        ];
        order_primaries(&mut hits, "deepseek-ai/DeepSeek-V3");
        assert_eq!(hits[0].record.gateway, "together");
    }

    #[test]
    fn test_namespace_prefix_breaks_live_ties() {
        let mut hits = vec![
            hit("deepinfra", "groq/compound", CatalogOrigin::Live),
            hit("groq", "groq/compound", CatalogOrigin::Live),
        ];
        order_primaries(&mut hits, "groq/compound");
        assert_eq!(hits[0].record.gateway, "groq");
    }

    #[test]
    fn test_lexicographic_gateway_is_last_resort() {
        let mut hits = vec![
            hit("together", "llama-3.3-70b", CatalogOrigin::Live),
            hit("fireworks", "llama-3.3-70b", CatalogOrigin::Live),
        ];
        order_primaries(&mut hits, "llama-3.3-70b");
        assert_eq!(hits[0].record.gateway, "fireworks");
    }

    #[test]
    fn test_estimated_tokens_covers_prompt_and_output() {
        let request = CompletionRequest {
            model: "m".into(),
            messages: vec![ChatMessage::user("x".repeat(400))],
            max_tokens: Some(200),
            ..CompletionRequest::default()
        };
        assert_eq!(estimated_tokens(&request), 300);

        let defaulted = CompletionRequest {
            model: "m".into(),
            messages: vec![],
            ..CompletionRequest::default()
        };
        assert_eq!(estimated_tokens(&defaulted), 1024);
    }
}
