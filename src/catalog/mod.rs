// src/catalog/mod.rs — Per-gateway model catalog with TTL caching
//
// One cache slot per gateway, refreshed independently. Reads are served
// from an Arc snapshot; a refresh builds the full replacement list and
// swaps it in one write, so no reader ever observes a half-updated
// listing. Once a gateway has any data (live or static fallback), reads
// for it never hard-fail again.

pub mod normalize;
pub mod static_models;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::time::{Duration, Instant};

use crate::infra::config::CatalogConfig;
use crate::infra::errors::GatewayError;
use crate::provider::AdapterRegistry;

/// Delay before re-attempting an upstream fetch that just failed. Keeps a
/// down gateway from being hammered on every read while its data is stale.
const FAILED_RETRY_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ModelPricing {
    pub prompt_per_mtok: f64,
    pub completion_per_mtok: f64,
    pub hourly: Option<f64>,
    /// Set when the upstream advertised a dynamic-pricing sentinel instead
    /// of a real rate.
    pub dynamic: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelRecord {
    /// Canonical id as the source gateway knows it.
    pub id: String,
    pub name: String,
    /// Vendor namespace from "vendor/model" ids, else the gateway slug.
    pub provider_slug: String,
    /// Source gateway this record was listed by.
    pub gateway: String,
    pub context_length: Option<u32>,
    pub max_output_tokens: Option<u32>,
    pub modality: String,
    pub pricing: ModelPricing,
    pub tags: Vec<String>,
    /// The upstream's original listing object, kept for diagnostics.
    #[serde(skip_serializing)]
    pub raw: serde_json::Value,
}

impl ModelRecord {
    /// Whether this record can stand in for `wanted`: identical id on
    /// another gateway always qualifies; otherwise the modality must match
    /// and the context window must not shrink. An unknown candidate context
    /// only qualifies when nothing is required of it.
    pub fn substitutes_for(&self, wanted: &ModelRecord) -> bool {
        if self.gateway == wanted.gateway && self.id == wanted.id {
            return false;
        }
        if self.id == wanted.id {
            return true;
        }
        if self.modality != wanted.modality {
            return false;
        }
        match (wanted.context_length, self.context_length) {
            (None, _) => true,
            (Some(bar), Some(have)) => have >= bar,
            (Some(_), None) => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CatalogOrigin {
    Live,
    Fallback,
}

/// A resolved catalog match plus the freshness class it came from.
#[derive(Debug, Clone)]
pub struct CatalogHit {
    pub record: ModelRecord,
    pub origin: CatalogOrigin,
}

/// Per-gateway cache freshness, as reported on the admin surface.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStatus {
    pub gateway: String,
    pub model_count: usize,
    pub fresh: bool,
    pub ttl_seconds: u64,
    pub age_seconds: Option<u64>,
    pub fetched_at: Option<DateTime<Utc>>,
    pub origin: Option<CatalogOrigin>,
}

struct CatalogEntry {
    models: Arc<Vec<ModelRecord>>,
    fetched_at: Instant,
    fetched_at_utc: DateTime<Utc>,
    /// Next moment a read may trigger an upstream fetch. Usually the TTL
    /// horizon; pushed out by only the retry delay after a failed refresh.
    next_attempt_at: Instant,
    ttl: Duration,
    origin: CatalogOrigin,
}

impl CatalogEntry {
    /// TTL freshness: whether the data itself is within its staleness
    /// bound. A failed refresh leaves this false while stale data serves.
    fn is_fresh(&self, now: Instant) -> bool {
        now.duration_since(self.fetched_at) < self.ttl
    }

    /// Whether a read may serve this entry without trying upstream.
    fn holds_off_fetch(&self, now: Instant) -> bool {
        now < self.next_attempt_at
    }
}

pub struct ModelCatalog {
    registry: Arc<AdapterRegistry>,
    config: CatalogConfig,
    entries: RwLock<HashMap<String, CatalogEntry>>,
    /// Per-gateway single-flight refresh locks: concurrent stale readers
    /// coalesce onto one upstream fetch.
    refresh_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ModelCatalog {
    pub fn new(registry: Arc<AdapterRegistry>, config: CatalogConfig) -> Self {
        Self {
            registry,
            config,
            entries: RwLock::new(HashMap::new()),
            refresh_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    async fn refresh_lock(&self, gateway: &str) -> Arc<Mutex<()>> {
        let mut locks = self.refresh_locks.lock().await;
        locks
            .entry(gateway.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Current snapshot for a gateway. Fresh data is returned without I/O;
    /// stale or missing data triggers one fetch, falling back to stale or
    /// static data when the fetch fails.
    pub async fn models(&self, gateway: &str) -> Result<Arc<Vec<ModelRecord>>, GatewayError> {
        if !self.registry.contains(gateway) {
            return Err(GatewayError::UnknownGateway(gateway.into()));
        }

        {
            let entries = self.entries.read().await;
            if let Some(entry) = entries.get(gateway) {
                if entry.holds_off_fetch(Instant::now()) {
                    return Ok(entry.models.clone());
                }
            }
        }

        self.refresh(gateway, false).await
    }

    /// Refresh one gateway's slot. `force` bypasses freshness and always
    /// hits the upstream. Returns the snapshot now in effect.
    pub async fn refresh(
        &self,
        gateway: &str,
        force: bool,
    ) -> Result<Arc<Vec<ModelRecord>>, GatewayError> {
        if !self.registry.contains(gateway) {
            return Err(GatewayError::UnknownGateway(gateway.into()));
        }

        let lock = self.refresh_lock(gateway).await;
        let _guard = lock.lock().await;

        // Re-check after waiting on the lock: a concurrent refresher may
        // have already landed fresh data.
        if !force {
            let entries = self.entries.read().await;
            if let Some(entry) = entries.get(gateway) {
                if entry.holds_off_fetch(Instant::now()) {
                    return Ok(entry.models.clone());
                }
            }
        }

        match self.fetch(gateway).await {
            Ok(models) => {
                let snapshot = Arc::new(models);
                let mut entries = self.entries.write().await;
                entries.insert(
                    gateway.to_string(),
                    CatalogEntry {
                        models: snapshot.clone(),
                        fetched_at: Instant::now(),
                        fetched_at_utc: Utc::now(),
                        next_attempt_at: Instant::now() + self.config.ttl_for(gateway),
                        ttl: self.config.ttl_for(gateway),
                        origin: CatalogOrigin::Live,
                    },
                );
                tracing::info!("catalog: refreshed {gateway}, {} models", snapshot.len());
                Ok(snapshot)
            }
            Err(e) => {
                // Stale data beats no data. Push the retry horizon out so a
                // down gateway is not re-fetched on every read.
                {
                    let mut entries = self.entries.write().await;
                    if let Some(entry) = entries.get_mut(gateway) {
                        tracing::warn!("catalog: {gateway} refresh failed, serving stale data: {e}");
                        entry.next_attempt_at = Instant::now() + FAILED_RETRY_DELAY;
                        return Ok(entry.models.clone());
                    }
                }

                if let Some(models) = static_models::fallback_for(gateway) {
                    tracing::warn!("catalog: {gateway} fetch failed, using static fallback: {e}");
                    let snapshot = Arc::new(models);
                    let mut entries = self.entries.write().await;
                    entries.insert(
                        gateway.to_string(),
                        CatalogEntry {
                            models: snapshot.clone(),
                            fetched_at: Instant::now(),
                            fetched_at_utc: Utc::now(),
                            next_attempt_at: Instant::now() + FAILED_RETRY_DELAY,
                            ttl: self.config.ttl_for(gateway),
                            origin: CatalogOrigin::Fallback,
                        },
                    );
                    return Ok(snapshot);
                }

                tracing::error!("catalog: {gateway} unavailable, no fallback data: {e}");
                Err(GatewayError::CatalogUnavailable {
                    gateway: gateway.into(),
                    message: e.to_string(),
                })
            }
        }
    }

    async fn fetch(&self, gateway: &str) -> Result<Vec<ModelRecord>, GatewayError> {
        let adapter = self
            .registry
            .get(gateway)
            .ok_or_else(|| GatewayError::UnknownGateway(gateway.into()))?;

        let timeout = Duration::from_secs(self.config.fetch_timeout_seconds);
        let raw = tokio::time::timeout(timeout, adapter.list_models())
            .await
            .map_err(|_| GatewayError::ProviderUnavailable {
                gateway: gateway.into(),
                message: format!("model listing timed out after {}s", timeout.as_secs()),
            })??;

        let models = normalize::normalize_models(gateway, &raw);
        if models.is_empty() {
            return Err(GatewayError::ProviderUnavailable {
                gateway: gateway.into(),
                message: "model listing was empty".into(),
            });
        }
        Ok(models)
    }

    /// Bring every gateway's slot up to date (lazily: fresh slots are
    /// untouched). Fetch failures are absorbed per gateway.
    pub async fn warm_all(&self) {
        let slugs = self.registry.slugs();
        let results = join_all(slugs.iter().map(|slug| self.models(slug))).await;
        for (slug, result) in slugs.iter().zip(results) {
            if let Err(e) = result {
                tracing::debug!("catalog: {slug} not warmed: {e}");
            }
        }
    }

    /// Merged view across all gateways. Records keep their source gateway
    /// tag, so the same id on two gateways stays two entries.
    pub async fn all_models(&self) -> Vec<ModelRecord> {
        self.warm_all().await;
        let entries = self.entries.read().await;
        let mut merged: Vec<ModelRecord> = Vec::new();
        for slug in self.registry.slugs() {
            if let Some(entry) = entries.get(&slug) {
                merged.extend(entry.models.iter().cloned());
            }
        }
        merged
    }

    /// Exact-id matches across all gateways, tagged with the origin class
    /// of the slot they came from. Sorted by gateway for determinism.
    pub async fn find_model(&self, id: &str) -> Vec<CatalogHit> {
        self.warm_all().await;
        let entries = self.entries.read().await;
        let mut hits: Vec<CatalogHit> = Vec::new();
        for (_, entry) in entries.iter() {
            for record in entry.models.iter() {
                if record.id == id {
                    hits.push(CatalogHit {
                        record: record.clone(),
                        origin: entry.origin,
                    });
                }
            }
        }
        hits.sort_by(|a, b| a.record.gateway.cmp(&b.record.gateway));
        hits
    }

    /// Candidate substitutes for a model: same id elsewhere, or same
    /// modality with a context window at least as large. The warm pass is
    /// assumed to have happened during resolution.
    pub async fn substitutes(&self, wanted: &ModelRecord) -> Vec<ModelRecord> {
        let entries = self.entries.read().await;
        let mut out: Vec<ModelRecord> = Vec::new();
        for (_, entry) in entries.iter() {
            for candidate in entry.models.iter() {
                if candidate.substitutes_for(wanted) {
                    out.push(candidate.clone());
                }
            }
        }
        out.sort_by(|a, b| (&a.gateway, &a.id).cmp(&(&b.gateway, &b.id)));
        out
    }

    /// Nearest known ids for a miss, by Jaro-Winkler similarity.
    pub async fn suggestions_for(&self, id: &str) -> Vec<String> {
        let entries = self.entries.read().await;
        let mut scored: Vec<(f64, &str)> = Vec::new();
        for (_, entry) in entries.iter() {
            for record in entry.models.iter() {
                let score = strsim::jaro_winkler(&id.to_lowercase(), &record.id.to_lowercase());
                if score > 0.7 {
                    scored.push((score, record.id.as_str()));
                }
            }
        }
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        let mut out: Vec<String> = Vec::new();
        for (_, id) in scored {
            if !out.iter().any(|s| s == id) {
                out.push(id.to_string());
            }
            if out.len() >= 5 {
                break;
            }
        }
        out
    }

    /// Freshness report for every configured gateway, fetched slots or not.
    pub async fn cache_status(&self) -> Vec<CacheStatus> {
        let entries = self.entries.read().await;
        let now = Instant::now();
        let now_utc = Utc::now();
        self.registry
            .slugs()
            .into_iter()
            .map(|slug| match entries.get(&slug) {
                Some(entry) => CacheStatus {
                    model_count: entry.models.len(),
                    fresh: entry.is_fresh(now),
                    ttl_seconds: entry.ttl.as_secs(),
                    age_seconds: Some(
                        (now_utc - entry.fetched_at_utc).num_seconds().max(0) as u64
                    ),
                    fetched_at: Some(entry.fetched_at_utc),
                    origin: Some(entry.origin),
                    gateway: slug,
                },
                None => CacheStatus {
                    model_count: 0,
                    fresh: false,
                    ttl_seconds: self.config.ttl_for(&slug).as_secs(),
                    age_seconds: None,
                    fetched_at: None,
                    origin: None,
                    gateway: slug,
                },
            })
            .collect()
    }

    /// Refresh every gateway concurrently. Per-gateway failures are logged
    /// and absorbed.
    pub async fn refresh_all(&self, force: bool) {
        let slugs = self.registry.slugs();
        let results = join_all(slugs.iter().map(|slug| self.refresh(slug, force))).await;
        for (slug, result) in slugs.iter().zip(results) {
            if let Err(e) = result {
                tracing::warn!("catalog: refresh of {slug} failed: {e}");
            }
        }
    }

    /// Periodic background refresh, keeping slots warm so requests rarely
    /// pay the fetch latency.
    pub fn spawn_refresh_loop(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately and doubles as warm-up.
            loop {
                ticker.tick().await;
                self.refresh_all(false).await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rec(gateway: &str, id: &str, context: Option<u32>, modality: &str) -> ModelRecord {
        ModelRecord {
            id: id.into(),
            name: id.into(),
            provider_slug: gateway.into(),
            gateway: gateway.into(),
            context_length: context,
            max_output_tokens: None,
            modality: modality.into(),
            pricing: ModelPricing::default(),
            tags: Vec::new(),
            raw: json!({}),
        }
    }

    // ─── Substitute matching ────────────────────────────────────

    #[test]
    fn test_same_id_other_gateway_substitutes() {
        let wanted = rec("a", "vendor/foo", Some(8192), "text->text");
        let other = rec("b", "vendor/foo", None, "text->text");
        assert!(other.substitutes_for(&wanted));
    }

    #[test]
    fn test_self_never_substitutes() {
        let wanted = rec("a", "vendor/foo", Some(8192), "text->text");
        assert!(!wanted.clone().substitutes_for(&wanted));
    }

    #[test]
    fn test_context_bar_enforced() {
        let wanted = rec("a", "vendor/foo", Some(32_768), "text->text");
        assert!(rec("b", "other/big", Some(65_536), "text->text").substitutes_for(&wanted));
        assert!(!rec("b", "other/small", Some(8_192), "text->text").substitutes_for(&wanted));
        assert!(!rec("b", "other/unknown", None, "text->text").substitutes_for(&wanted));
    }

    #[test]
    fn test_modality_must_match() {
        let wanted = rec("a", "vendor/foo", Some(8192), "text->text");
        assert!(!rec("b", "other/vision", Some(65_536), "text+image->text").substitutes_for(&wanted));
    }

    #[test]
    fn test_no_context_requirement_when_unknown() {
        let wanted = rec("a", "vendor/foo", None, "text->text");
        assert!(rec("b", "other/any", None, "text->text").substitutes_for(&wanted));
    }
}
