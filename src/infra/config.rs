// src/infra/config.rs — Configuration loading (TOML)

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::infra::paths;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub catalog: CatalogConfig,

    #[serde(default)]
    pub health: HealthConfig,

    #[serde(default)]
    pub routing: RoutingConfig,

    /// Upstream gateways, keyed by slug. Empty means "use the built-in set".
    #[serde(default)]
    pub gateways: BTreeMap<String, GatewayConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            catalog: CatalogConfig::default(),
            health: HealthConfig::default(),
            routing: RoutingConfig::default(),
            gateways: builtin_gateways(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Bearer token required on /admin routes. None disables auth (local use).
    pub admin_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8080,
            admin_token: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Default per-gateway cache TTL.
    pub ttl_seconds: u64,
    /// Per-gateway TTL overrides, keyed by slug.
    #[serde(default)]
    pub ttl_overrides: BTreeMap<String, u64>,
    /// Timeout for a single upstream model-list fetch.
    pub fetch_timeout_seconds: u64,
    /// Background refresh interval. 0 disables the refresh loop.
    pub refresh_interval_seconds: u64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: 600,
            ttl_overrides: BTreeMap::new(),
            fetch_timeout_seconds: 10,
            refresh_interval_seconds: 0,
        }
    }
}

impl CatalogConfig {
    pub fn ttl_for(&self, gateway: &str) -> std::time::Duration {
        let secs = self
            .ttl_overrides
            .get(gateway)
            .copied()
            .unwrap_or(self.ttl_seconds);
        std::time::Duration::from_secs(secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Trailing outcome window a circuit evaluates over.
    pub window_seconds: u64,
    /// Minimum samples in the window before the error rate can trip the circuit.
    pub min_samples: u32,
    /// Windowed error rate at which Closed trips to Open.
    pub error_rate_threshold: f64,
    /// Time an Open circuit waits before admitting a HalfOpen trial.
    pub open_cooldown_seconds: u64,
    /// Cap on the cooldown after repeated failed trials.
    pub max_open_cooldown_seconds: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            window_seconds: 300,
            min_samples: 5,
            error_rate_threshold: 0.5,
            open_cooldown_seconds: 60,
            max_open_cooldown_seconds: 900,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Max candidates in a failover chain, primary included.
    pub max_chain_len: usize,
    /// Timeout for a single candidate attempt.
    pub attempt_timeout_seconds: u64,
    /// Whole-request deadline across all attempts.
    pub deadline_seconds: u64,
    #[serde(default)]
    pub ranking: RankingConfig,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            max_chain_len: 4,
            attempt_timeout_seconds: 30,
            deadline_seconds: 120,
            ranking: RankingConfig::default(),
        }
    }
}

/// Fallback-candidate ranking weights. Higher score routes earlier.
/// Score = success_weight * success_rate
///       - latency_weight * last_latency_secs
///       - price_weight * prompt_price_per_mtok
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingConfig {
    pub success_weight: f64,
    pub latency_weight: f64,
    pub price_weight: f64,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            success_weight: 1.0,
            latency_weight: 0.25,
            price_weight: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Wire dialect this gateway speaks.
    pub kind: GatewayKind,
    /// Display name; defaults to the slug.
    pub name: Option<String>,
    pub base_url: String,
    /// Environment variable holding the API key. Empty means no auth.
    #[serde(default)]
    pub api_key_env: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayKind {
    Openai,
    Anthropic,
}

/// Gateways known out of the box. A `[gateways]` section in config.toml
/// replaces this set entirely.
pub fn builtin_gateways() -> BTreeMap<String, GatewayConfig> {
    let openai_compat = |name: &str, base_url: &str, key_env: &str| GatewayConfig {
        kind: GatewayKind::Openai,
        name: Some(name.into()),
        base_url: base_url.into(),
        api_key_env: key_env.into(),
        enabled: true,
    };

    let mut g = BTreeMap::new();
    g.insert(
        "openrouter".into(),
        openai_compat(
            "OpenRouter",
            "https://openrouter.ai/api/v1",
            "OPENROUTER_API_KEY",
        ),
    );
    g.insert(
        "featherless".into(),
        openai_compat(
            "Featherless",
            "https://api.featherless.ai/v1",
            "FEATHERLESS_API_KEY",
        ),
    );
    g.insert(
        "chutes".into(),
        openai_compat("Chutes", "https://llm.chutes.ai/v1", "CHUTES_API_KEY"),
    );
    g.insert(
        "groq".into(),
        openai_compat("Groq", "https://api.groq.com/openai/v1", "GROQ_API_KEY"),
    );
    g.insert(
        "deepinfra".into(),
        openai_compat(
            "DeepInfra",
            "https://api.deepinfra.com/v1/openai",
            "DEEPINFRA_API_KEY",
        ),
    );
    g.insert(
        "together".into(),
        openai_compat("Together", "https://api.together.xyz/v1", "TOGETHER_API_KEY"),
    );
    g.insert(
        "fireworks".into(),
        openai_compat(
            "Fireworks",
            "https://api.fireworks.ai/inference/v1",
            "FIREWORKS_API_KEY",
        ),
    );
    g.insert(
        "near".into(),
        openai_compat("NEAR AI", "https://api.near.ai/v1", "NEAR_API_KEY"),
    );
    g.insert(
        "anthropic".into(),
        GatewayConfig {
            kind: GatewayKind::Anthropic,
            name: Some("Anthropic".into()),
            base_url: "https://api.anthropic.com".into(),
            api_key_env: "ANTHROPIC_API_KEY".into(),
            enabled: true,
        },
    );
    g
}

impl Config {
    /// Load config from the default location, falling back to defaults.
    pub fn load() -> anyhow::Result<Self> {
        let path = paths::config_file_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)?;
        if config.gateways.is_empty() {
            config.gateways = builtin_gateways();
        }
        config.validate()?;
        Ok(config)
    }

    /// Reject gateway base URLs that do not parse. A typo here would
    /// otherwise surface as an opaque transport error on the first request.
    pub fn validate(&self) -> anyhow::Result<()> {
        for (slug, gw) in &self.gateways {
            url::Url::parse(&gw.base_url).map_err(|e| {
                anyhow::anyhow!("gateway '{slug}': invalid base_url '{}': {e}", gw.base_url)
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_reasonable() {
        let c = Config::default();
        assert_eq!(c.server.port, 8080);
        assert_eq!(c.catalog.ttl_seconds, 600);
        assert_eq!(c.health.min_samples, 5);
        assert!((c.health.error_rate_threshold - 0.5).abs() < 1e-9);
        assert_eq!(c.routing.max_chain_len, 4);
        assert!(c.gateways.contains_key("openrouter"));
        assert!(c.gateways.contains_key("anthropic"));
    }

    #[test]
    fn test_ttl_override_precedence() {
        let mut c = CatalogConfig::default();
        c.ttl_overrides.insert("chutes".into(), 30);
        assert_eq!(c.ttl_for("chutes").as_secs(), 30);
        assert_eq!(c.ttl_for("openrouter").as_secs(), 600);
    }

    #[test]
    fn test_parse_partial_toml() {
        let toml = r#"
            [server]
            host = "0.0.0.0"
            port = 9000

            [catalog]
            ttl_seconds = 120

            [gateways.local]
            kind = "openai"
            base_url = "http://localhost:11434/v1"
        "#;
        let c: Config = toml::from_str(toml).unwrap();
        assert_eq!(c.server.host, "0.0.0.0");
        assert_eq!(c.server.port, 9000);
        assert_eq!(c.catalog.ttl_seconds, 120);
        // Unspecified sections keep defaults
        assert_eq!(c.routing.attempt_timeout_seconds, 30);
        let local = &c.gateways["local"];
        assert_eq!(local.kind, GatewayKind::Openai);
        assert!(local.enabled);
        assert!(local.api_key_env.is_empty());
    }

    #[test]
    fn test_load_from_file_round_trip() {
        use tempfile::TempDir;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
            [server]
            port = 9100

            [gateways.local]
            kind = "openai"
            base_url = "http://localhost:11434/v1"
            "#,
        )
        .unwrap();

        let c = Config::load_from(&path).unwrap();
        assert_eq!(c.server.port, 9100);
        assert!(c.gateways.contains_key("local"));
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        let mut c = Config::default();
        c.gateways.insert(
            "broken".into(),
            GatewayConfig {
                kind: GatewayKind::Openai,
                name: None,
                base_url: "not a url".into(),
                api_key_env: String::new(),
                enabled: true,
            },
        );
        let err = c.validate().unwrap_err();
        assert!(err.to_string().contains("broken"));
    }

    #[test]
    fn test_ranking_defaults_success_dominant() {
        let r = RankingConfig::default();
        assert!(r.success_weight > r.latency_weight);
        assert!((r.price_weight - 0.0).abs() < 1e-9);
    }
}
