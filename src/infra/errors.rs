// src/infra/errors.rs — Error types for Switchboard

use thiserror::Error;

/// One failed candidate in an exhausted failover chain.
#[derive(Debug, Clone)]
pub struct AttemptReport {
    pub gateway: String,
    pub model: String,
    pub error: String,
}

impl std::fmt::Display for AttemptReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}: {}", self.gateway, self.model, self.error)
    }
}

#[derive(Error, Debug)]
pub enum GatewayError {
    // Upstream errors observed during a single attempt (chain continues)
    #[error("Gateway '{gateway}' rejected the request (HTTP {status}): {message}")]
    ProviderRejected {
        gateway: String,
        status: u16,
        message: String,
    },

    #[error("Gateway '{gateway}' unavailable: {message}")]
    ProviderUnavailable { gateway: String, message: String },

    #[error("Rate limited by '{gateway}', retry after {retry_after_ms}ms")]
    RateLimited {
        gateway: String,
        retry_after_ms: u64,
    },

    // Terminal routing outcomes
    #[error("Model '{model}' not found on any gateway")]
    ModelNotFound {
        model: String,
        suggestions: Vec<String>,
    },

    #[error("All candidates for '{model}' failed: [{}]", .attempts.iter().map(|a| a.to_string()).collect::<Vec<_>>().join("; "))]
    ChainExhausted {
        model: String,
        attempts: Vec<AttemptReport>,
    },

    #[error("Request deadline of {deadline_ms}ms exceeded")]
    DeadlineExceeded { deadline_ms: u64 },

    // Catalog
    #[error("No catalog data for gateway '{gateway}': {message}")]
    CatalogUnavailable { gateway: String, message: String },

    #[error("Unknown gateway '{0}'")]
    UnknownGateway(String),

    // Collaborator gates
    #[error("Credit check failed: {0}")]
    CreditDenied(String),

    #[error("Rate limit exceeded: {0}")]
    RateDenied(String),

    // Infra
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl GatewayError {
    /// Whether the next candidate in a failover chain should still be tried.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            GatewayError::ProviderRejected { .. }
                | GatewayError::ProviderUnavailable { .. }
                | GatewayError::RateLimited { .. }
        )
    }

    /// Stable machine-readable code surfaced in client error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::ProviderRejected { .. } => "provider_rejected",
            GatewayError::ProviderUnavailable { .. } => "provider_unavailable",
            GatewayError::RateLimited { .. } => "rate_limited",
            GatewayError::ModelNotFound { .. } => "model_not_found",
            GatewayError::ChainExhausted { .. } => "chain_exhausted",
            GatewayError::DeadlineExceeded { .. } => "deadline_exceeded",
            GatewayError::CatalogUnavailable { .. } => "catalog_unavailable",
            GatewayError::UnknownGateway(_) => "unknown_gateway",
            GatewayError::CreditDenied(_) => "insufficient_credits",
            GatewayError::RateDenied(_) => "rate_limit_exceeded",
            GatewayError::Config(_) => "config_error",
            GatewayError::Io(_) => "io_error",
            GatewayError::Other(_) => "internal_error",
        }
    }
}
