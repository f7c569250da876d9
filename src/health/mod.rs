// src/health/mod.rs — Per-(gateway, model) availability tracking
//
// The tracker owns one record per pair, created lazily on first outcome
// and never deleted — stats decay through the breaker's trailing window
// instead. A maintenance window on a record overrides its circuit state
// entirely, and outcomes observed during maintenance are kept out of the
// error budget.

pub mod breaker;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

use crate::catalog::ModelRecord;
use crate::infra::config::{HealthConfig, RankingConfig};
use breaker::{BreakerConfig, CircuitBreaker, CircuitState};

#[derive(Debug, Clone, Serialize)]
pub struct Maintenance {
    pub reason: String,
    pub since: DateTime<Utc>,
    /// None means until explicitly cleared.
    pub until: Option<DateTime<Utc>>,
}

impl Maintenance {
    fn active(&self, now: DateTime<Utc>) -> bool {
        self.until.map(|u| now < u).unwrap_or(true)
    }
}

struct AvailabilityRecord {
    breaker: CircuitBreaker,
    total_success: u64,
    total_error: u64,
    last_latency_ms: Option<u64>,
    maintenance: Option<Maintenance>,
}

impl AvailabilityRecord {
    fn new(config: BreakerConfig) -> Self {
        Self {
            breaker: CircuitBreaker::new(config),
            total_success: 0,
            total_error: 0,
            last_latency_ms: None,
            maintenance: None,
        }
    }

    fn in_maintenance(&self, now: DateTime<Utc>) -> bool {
        self.maintenance
            .as_ref()
            .map(|m| m.active(now))
            .unwrap_or(false)
    }
}

/// Point-in-time view of one record, as served on the admin surface.
#[derive(Debug, Clone, Serialize)]
pub struct AvailabilitySnapshot {
    pub gateway: String,
    pub model: String,
    pub state: CircuitState,
    pub total_success: u64,
    pub total_error: u64,
    pub windowed_success_rate: Option<f64>,
    pub last_latency_ms: Option<u64>,
    pub maintenance: Option<Maintenance>,
}

pub struct AvailabilityTracker {
    records: Mutex<HashMap<(String, String), Arc<Mutex<AvailabilityRecord>>>>,
    breaker_config: BreakerConfig,
}

impl AvailabilityTracker {
    pub fn new(config: &HealthConfig) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            breaker_config: BreakerConfig::from(config),
        }
    }

    async fn record_handle(&self, gateway: &str, model: &str) -> Arc<Mutex<AvailabilityRecord>> {
        let mut records = self.records.lock().await;
        records
            .entry((gateway.to_string(), model.to_string()))
            .or_insert_with(|| {
                Arc::new(Mutex::new(AvailabilityRecord::new(
                    self.breaker_config.clone(),
                )))
            })
            .clone()
    }

    async fn existing_handle(
        &self,
        gateway: &str,
        model: &str,
    ) -> Option<Arc<Mutex<AvailabilityRecord>>> {
        let records = self.records.lock().await;
        records
            .get(&(gateway.to_string(), model.to_string()))
            .cloned()
    }

    /// Record one attempt outcome. During an active maintenance window the
    /// totals still update but the circuit's error budget does not.
    pub async fn record_outcome(
        &self,
        gateway: &str,
        model: &str,
        success: bool,
        latency: Option<Duration>,
    ) {
        let handle = self.record_handle(gateway, model).await;
        let mut rec = handle.lock().await;

        if success {
            rec.total_success += 1;
        } else {
            rec.total_error += 1;
        }
        if let Some(l) = latency {
            rec.last_latency_ms = Some(l.as_millis() as u64);
        }

        if rec.in_maintenance(Utc::now()) {
            rec.breaker.release_trial();
            return;
        }

        let before = rec.breaker.state();
        rec.breaker.record(Instant::now(), success);
        let after = rec.breaker.state();
        if before != CircuitState::Open && after == CircuitState::Open {
            tracing::warn!("availability: circuit opened for {gateway}/{model}");
        } else if before != CircuitState::Closed && after == CircuitState::Closed {
            tracing::info!("availability: circuit closed for {gateway}/{model}");
        }
    }

    /// Claim permission to attempt this pair right now. Maintenance always
    /// refuses; an eligible Open circuit flips HalfOpen and admits the
    /// caller as its single trial.
    pub async fn try_acquire(&self, gateway: &str, model: &str) -> bool {
        let handle = self.record_handle(gateway, model).await;
        let mut rec = handle.lock().await;
        if rec.in_maintenance(Utc::now()) {
            return false;
        }
        rec.breaker.try_acquire(Instant::now())
    }

    /// Hand back an acquired slot when the attempt never reached the
    /// network.
    pub async fn release(&self, gateway: &str, model: &str) {
        if let Some(handle) = self.existing_handle(gateway, model).await {
            handle.lock().await.breaker.release_trial();
        }
    }

    /// Chain-building check; claims nothing. Unknown pairs are routable —
    /// new targets deserve a first try.
    pub async fn is_routable(&self, gateway: &str, model: &str) -> bool {
        let Some(handle) = self.existing_handle(gateway, model).await else {
            return true;
        };
        let rec = handle.lock().await;
        if rec.in_maintenance(Utc::now()) {
            return false;
        }
        rec.breaker.is_routable(Instant::now())
    }

    pub async fn set_maintenance(
        &self,
        gateway: &str,
        model: &str,
        until: Option<DateTime<Utc>>,
        reason: impl Into<String>,
    ) {
        let handle = self.record_handle(gateway, model).await;
        let mut rec = handle.lock().await;
        let reason = reason.into();
        tracing::info!(
            "availability: maintenance set for {gateway}/{model} until {:?}: {reason}",
            until
        );
        rec.maintenance = Some(Maintenance {
            reason,
            since: Utc::now(),
            until,
        });
    }

    /// Clear a maintenance window. Returns whether one was present.
    pub async fn clear_maintenance(&self, gateway: &str, model: &str) -> bool {
        let Some(handle) = self.existing_handle(gateway, model).await else {
            return false;
        };
        let mut rec = handle.lock().await;
        let had = rec.maintenance.take().is_some();
        if had {
            tracing::info!("availability: maintenance cleared for {gateway}/{model}");
        }
        had
    }

    /// Current state of one pair. Pairs never seen report Closed with
    /// empty stats.
    pub async fn snapshot(&self, gateway: &str, model: &str) -> AvailabilitySnapshot {
        match self.existing_handle(gateway, model).await {
            Some(handle) => {
                let mut rec = handle.lock().await;
                let rate = rec.breaker.success_rate(Instant::now());
                AvailabilitySnapshot {
                    gateway: gateway.to_string(),
                    model: model.to_string(),
                    state: rec.breaker.state(),
                    total_success: rec.total_success,
                    total_error: rec.total_error,
                    windowed_success_rate: rate,
                    last_latency_ms: rec.last_latency_ms,
                    maintenance: rec.maintenance.clone(),
                }
            }
            None => AvailabilitySnapshot {
                gateway: gateway.to_string(),
                model: model.to_string(),
                state: CircuitState::Closed,
                total_success: 0,
                total_error: 0,
                windowed_success_rate: None,
                last_latency_ms: None,
                maintenance: None,
            },
        }
    }

    /// All known records, optionally filtered by gateway, sorted by
    /// (gateway, model).
    pub async fn summary(&self, gateway_filter: Option<&str>) -> Vec<AvailabilitySnapshot> {
        let handles: Vec<((String, String), Arc<Mutex<AvailabilityRecord>>)> = {
            let records = self.records.lock().await;
            records
                .iter()
                .filter(|((gw, _), _)| gateway_filter.map(|f| f == gw).unwrap_or(true))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        };

        let mut out = Vec::with_capacity(handles.len());
        for ((gateway, model), handle) in handles {
            let mut rec = handle.lock().await;
            let rate = rec.breaker.success_rate(Instant::now());
            out.push(AvailabilitySnapshot {
                state: rec.breaker.state(),
                total_success: rec.total_success,
                total_error: rec.total_error,
                windowed_success_rate: rate,
                last_latency_ms: rec.last_latency_ms,
                maintenance: rec.maintenance.clone(),
                gateway,
                model,
            });
        }
        out.sort_by(|a, b| (&a.gateway, &a.model).cmp(&(&b.gateway, &b.model)));
        out
    }

    /// Order substitute candidates, best first, by the configured policy.
    /// Pairs with no history rank optimistically. Ties break by
    /// (gateway, id) for determinism.
    pub async fn rank(
        &self,
        candidates: Vec<ModelRecord>,
        policy: &RankingConfig,
    ) -> Vec<ModelRecord> {
        let mut scored: Vec<(f64, ModelRecord)> = Vec::with_capacity(candidates.len());
        for record in candidates {
            let (success_rate, latency_secs) =
                self.window_stats(&record.gateway, &record.id).await;
            let score = policy.success_weight * success_rate
                - policy.latency_weight * latency_secs
                - policy.price_weight * record.pricing.prompt_per_mtok;
            scored.push((score, record));
        }
        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| (&a.1.gateway, &a.1.id).cmp(&(&b.1.gateway, &b.1.id)))
        });
        scored.into_iter().map(|(_, r)| r).collect()
    }

    async fn window_stats(&self, gateway: &str, model: &str) -> (f64, f64) {
        let Some(handle) = self.existing_handle(gateway, model).await else {
            return (1.0, 0.0);
        };
        let mut rec = handle.lock().await;
        let success_rate = rec.breaker.success_rate(Instant::now()).unwrap_or(1.0);
        let latency_secs = rec.last_latency_ms.map(|ms| ms as f64 / 1000.0).unwrap_or(0.0);
        (success_rate, latency_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ModelPricing;

    fn tracker() -> AvailabilityTracker {
        AvailabilityTracker::new(&HealthConfig::default())
    }

    fn rec(gateway: &str, id: &str) -> ModelRecord {
        ModelRecord {
            id: id.into(),
            name: id.into(),
            provider_slug: gateway.into(),
            gateway: gateway.into(),
            context_length: Some(8192),
            max_output_tokens: None,
            modality: "text->text".into(),
            pricing: ModelPricing::default(),
            tags: Vec::new(),
            raw: serde_json::Value::Null,
        }
    }

    // ─── Maintenance precedence ─────────────────────────────────

    #[tokio::test]
    async fn test_maintenance_blocks_even_healthy_pairs() {
        let t = tracker();
        for _ in 0..10 {
            t.record_outcome("gw", "m", true, None).await;
        }
        assert!(t.is_routable("gw", "m").await);

        t.set_maintenance("gw", "m", None, "planned upgrade").await;
        assert!(!t.is_routable("gw", "m").await);
        assert!(!t.try_acquire("gw", "m").await);

        assert!(t.clear_maintenance("gw", "m").await);
        assert!(t.is_routable("gw", "m").await);
    }

    #[tokio::test]
    async fn test_expired_maintenance_window_is_inactive() {
        let t = tracker();
        let past = Utc::now() - chrono::Duration::seconds(10);
        t.set_maintenance("gw", "m", Some(past), "already over").await;
        assert!(t.is_routable("gw", "m").await);
    }

    #[tokio::test]
    async fn test_maintenance_outcomes_skip_error_budget() {
        let t = tracker();
        t.set_maintenance("gw", "m", None, "works ongoing").await;
        for _ in 0..20 {
            t.record_outcome("gw", "m", false, None).await;
        }
        t.clear_maintenance("gw", "m").await;

        // The failures updated totals but never tripped the circuit.
        let snap = t.snapshot("gw", "m").await;
        assert_eq!(snap.state, CircuitState::Closed);
        assert_eq!(snap.total_error, 20);
        assert!(t.is_routable("gw", "m").await);
    }

    // ─── Snapshots & summary ────────────────────────────────────

    #[tokio::test]
    async fn test_unknown_pair_snapshot_is_closed_and_empty() {
        let t = tracker();
        let snap = t.snapshot("nope", "nothing").await;
        assert_eq!(snap.state, CircuitState::Closed);
        assert_eq!(snap.total_success + snap.total_error, 0);
        assert!(snap.windowed_success_rate.is_none());
    }

    #[tokio::test]
    async fn test_summary_filters_by_gateway() {
        let t = tracker();
        t.record_outcome("a", "m1", true, None).await;
        t.record_outcome("b", "m2", true, None).await;

        assert_eq!(t.summary(None).await.len(), 2);
        let only_a = t.summary(Some("a")).await;
        assert_eq!(only_a.len(), 1);
        assert_eq!(only_a[0].gateway, "a");
    }

    #[tokio::test]
    async fn test_latency_recorded_in_snapshot() {
        let t = tracker();
        t.record_outcome("gw", "m", true, Some(Duration::from_millis(420)))
            .await;
        let snap = t.snapshot("gw", "m").await;
        assert_eq!(snap.last_latency_ms, Some(420));
    }

    // ─── Ranking ────────────────────────────────────────────────

    #[tokio::test]
    async fn test_rank_prefers_higher_success_rate() {
        let t = tracker();
        for _ in 0..10 {
            t.record_outcome("good", "m", true, None).await;
        }
        for i in 0..10 {
            t.record_outcome("bad", "m", i % 2 == 0, None).await;
        }

        let ranked = t
            .rank(
                vec![rec("bad", "m"), rec("good", "m")],
                &RankingConfig::default(),
            )
            .await;
        assert_eq!(ranked[0].gateway, "good");
    }

    #[tokio::test]
    async fn test_rank_breaks_success_ties_by_latency() {
        let t = tracker();
        t.record_outcome("slow", "m", true, Some(Duration::from_millis(4000)))
            .await;
        t.record_outcome("fast", "m", true, Some(Duration::from_millis(100)))
            .await;

        let ranked = t
            .rank(
                vec![rec("slow", "m"), rec("fast", "m")],
                &RankingConfig::default(),
            )
            .await;
        assert_eq!(ranked[0].gateway, "fast");
    }

    #[tokio::test]
    async fn test_rank_unknown_pairs_are_optimistic() {
        let t = tracker();
        for i in 0..10 {
            t.record_outcome("known", "m", i % 2 == 0, None).await;
        }
        let ranked = t
            .rank(
                vec![rec("known", "m"), rec("new", "m")],
                &RankingConfig::default(),
            )
            .await;
        assert_eq!(ranked[0].gateway, "new");
    }

    #[tokio::test]
    async fn test_rank_price_weight_opt_in() {
        let t = tracker();
        let mut cheap = rec("a", "m");
        cheap.pricing.prompt_per_mtok = 0.1;
        let mut pricey = rec("b", "m");
        pricey.pricing.prompt_per_mtok = 10.0;

        // Zero weight: price ignored, tie broken by gateway order.
        let ranked = t
            .rank(
                vec![pricey.clone(), cheap.clone()],
                &RankingConfig::default(),
            )
            .await;
        assert_eq!(ranked[0].gateway, "a");

        let policy = RankingConfig {
            price_weight: 1.0,
            ..RankingConfig::default()
        };
        let ranked = t.rank(vec![pricey, cheap], &policy).await;
        assert_eq!(ranked[0].gateway, "a");
        assert!(ranked[0].pricing.prompt_per_mtok < 1.0);
    }
}
