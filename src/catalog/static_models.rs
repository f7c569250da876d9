// src/catalog/static_models.rs — Built-in fallback listings
//
// A few gateways have flaky or auth-gated model listings. For those we ship
// a minimal static catalog so routing keeps working before the first
// successful live fetch. Static entries carry zero pricing and the
// Fallback origin; a later live fetch replaces them wholesale.

use super::{ModelPricing, ModelRecord};

fn record(
    gateway: &str,
    id: &str,
    name: &str,
    context_length: u32,
    max_output_tokens: u32,
) -> ModelRecord {
    ModelRecord {
        id: id.to_string(),
        name: name.to_string(),
        provider_slug: id
            .split_once('/')
            .map(|(vendor, _)| vendor.to_string())
            .unwrap_or_else(|| gateway.to_string()),
        gateway: gateway.to_string(),
        context_length: Some(context_length),
        max_output_tokens: Some(max_output_tokens),
        modality: "text->text".to_string(),
        pricing: ModelPricing::default(),
        tags: Vec::new(),
        raw: serde_json::Value::Null,
    }
}

/// Static fallback listing for a gateway, if one is bundled.
pub fn fallback_for(gateway: &str) -> Option<Vec<ModelRecord>> {
    match gateway {
        "chutes" => Some(vec![
            record(
                "chutes",
                "deepseek-ai/DeepSeek-V3",
                "DeepSeek V3",
                163_840,
                16_384,
            ),
            record(
                "chutes",
                "deepseek-ai/DeepSeek-R1",
                "DeepSeek R1",
                163_840,
                16_384,
            ),
            record(
                "chutes",
                "Qwen/Qwen2.5-72B-Instruct",
                "Qwen 2.5 72B Instruct",
                32_768,
                8_192,
            ),
            record(
                "chutes",
                "unsloth/Llama-3.3-70B-Instruct",
                "Llama 3.3 70B Instruct",
                131_072,
                8_192,
            ),
        ]),
        "near" => Some(vec![
            record(
                "near",
                "llama-v3p1-405b-instruct",
                "Llama 3.1 405B Instruct",
                131_072,
                16_384,
            ),
            record(
                "near",
                "llama-v3p3-70b-instruct",
                "Llama 3.3 70B Instruct",
                131_072,
                8_192,
            ),
            record("near", "deepseek-v3", "DeepSeek V3", 163_840, 16_384),
        ]),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallbacks_exist_for_flaky_gateways() {
        for gateway in ["chutes", "near"] {
            let models = fallback_for(gateway).unwrap();
            assert!(!models.is_empty());
            assert!(models.iter().all(|m| m.gateway == gateway));
            assert!(models.iter().all(|m| m.context_length.is_some()));
        }
    }

    #[test]
    fn test_no_fallback_for_reliable_gateways() {
        assert!(fallback_for("openrouter").is_none());
        assert!(fallback_for("anthropic").is_none());
    }
}
