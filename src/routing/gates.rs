// src/routing/gates.rs — Pre-flight gates and post-success usage sink
//
// The router consults both gates once per request, before the first
// billable attempt, and reports usage to the sink only after a
// successful completion. Deployments plug their own billing here; the
// defaults admit everything and discard usage.

use async_trait::async_trait;
use serde::Serialize;

use crate::infra::errors::GatewayError;
use crate::provider::TokenUsage;

/// What a finished request consumed, as handed to the usage sink.
#[derive(Debug, Clone, Serialize)]
pub struct UsageEvent {
    pub tenant: String,
    pub gateway: String,
    pub model: String,
    pub usage: TokenUsage,
    pub latency_ms: u64,
    pub streamed: bool,
}

/// Balance check before any billable work starts.
#[async_trait]
pub trait CreditGate: Send + Sync {
    async fn check(&self, tenant: &str, estimated_tokens: u64) -> Result<(), GatewayError>;
}

/// Request-rate check before any billable work starts.
#[async_trait]
pub trait RateGate: Send + Sync {
    async fn admit(&self, tenant: &str) -> Result<(), GatewayError>;
}

/// Receives usage after a request succeeds. Never called for failed
/// chains.
#[async_trait]
pub trait UsageSink: Send + Sync {
    async fn record(&self, event: UsageEvent);
}

/// Default gate: every tenant passes.
pub struct AllowAll;

#[async_trait]
impl CreditGate for AllowAll {
    async fn check(&self, _tenant: &str, _estimated_tokens: u64) -> Result<(), GatewayError> {
        Ok(())
    }
}

#[async_trait]
impl RateGate for AllowAll {
    async fn admit(&self, _tenant: &str) -> Result<(), GatewayError> {
        Ok(())
    }
}

/// Default sink: drops usage on the floor after a debug log line.
pub struct DiscardUsage;

#[async_trait]
impl UsageSink for DiscardUsage {
    async fn record(&self, event: UsageEvent) {
        tracing::debug!(
            "usage: {}/{} tenant={} tokens={} latency_ms={} streamed={}",
            event.gateway,
            event.model,
            event.tenant,
            event.usage.total(),
            event.latency_ms,
            event.streamed
        );
    }
}
