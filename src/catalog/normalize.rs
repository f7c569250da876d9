// src/catalog/normalize.rs — Raw gateway listings → unified ModelRecord shape
//
// Upstreams disagree on almost every field name. Context length alone ships
// as context_length, max_context_length, context_window or max_input_tokens
// depending on the vendor; pricing arrives as numbers, strings, or negative
// sentinels meaning "dynamic pricing". Everything funnels through here so
// the rest of the system sees one shape.

use serde_json::Value;
use std::collections::HashSet;

use super::{ModelPricing, ModelRecord};

/// Negative upstream prices are a "dynamic pricing" sentinel, never a real
/// rate. They normalize to zero with the dynamic flag set.
fn sanitize_price(value: Option<f64>, dynamic: &mut bool) -> f64 {
    match value {
        Some(v) if v < 0.0 => {
            *dynamic = true;
            0.0
        }
        Some(v) => v,
        None => 0.0,
    }
}

/// Pricing values arrive as JSON numbers or numeric strings.
fn price_value(v: &Value) -> Option<f64> {
    v.as_f64().or_else(|| v.as_str().and_then(|s| s.parse().ok()))
}

fn price_field(raw: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|k| price_value(&raw["pricing"][k]))
}

fn uint_field(raw: &Value, keys: &[&str]) -> Option<u32> {
    keys.iter().find_map(|k| raw[k].as_u64()).map(|v| v as u32)
}

/// Normalize one raw listing entry. Returns None for entries without a
/// usable id.
pub fn normalize_model(gateway: &str, raw: &Value) -> Option<ModelRecord> {
    let id = raw["id"]
        .as_str()
        .or_else(|| raw["name"].as_str())?
        .trim()
        .to_string();
    if id.is_empty() {
        return None;
    }

    let name = raw["display_name"]
        .as_str()
        .or_else(|| raw["name"].as_str())
        .unwrap_or(&id)
        .to_string();

    // "vendor/model" ids carry their vendor namespace; bare ids belong to
    // the gateway itself.
    let provider_slug = id
        .split_once('/')
        .map(|(vendor, _)| vendor.to_string())
        .unwrap_or_else(|| gateway.to_string());

    let context_length = uint_field(
        raw,
        &[
            "context_length",
            "max_context_length",
            "context_window",
            "max_input_tokens",
        ],
    );
    let max_output_tokens = uint_field(raw, &["max_output_tokens", "max_completion_tokens"])
        .or_else(|| raw["top_provider"]["max_completion_tokens"].as_u64().map(|v| v as u32))
        .or_else(|| uint_field(raw, &["max_tokens"]));

    let modality = raw["architecture"]["modality"]
        .as_str()
        .or_else(|| raw["modality"].as_str())
        .unwrap_or("text->text")
        .to_string();

    let mut dynamic = false;
    let prompt_per_mtok = sanitize_price(price_field(raw, &["prompt", "input"]), &mut dynamic);
    let completion_per_mtok =
        sanitize_price(price_field(raw, &["completion", "output"]), &mut dynamic);
    let hourly = match price_field(raw, &["hourly"]) {
        Some(v) if v < 0.0 => {
            dynamic = true;
            None
        }
        other => other,
    };

    let tags = raw["tags"]
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|t| t.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();

    Some(ModelRecord {
        id,
        name,
        provider_slug,
        gateway: gateway.to_string(),
        context_length,
        max_output_tokens,
        modality,
        pricing: ModelPricing {
            prompt_per_mtok,
            completion_per_mtok,
            hourly,
            dynamic,
        },
        tags,
        raw: raw.clone(),
    })
}

/// Normalize a whole listing, dropping duplicate ids within the gateway
/// (first occurrence wins). Cross-gateway duplicates are legitimate and
/// preserved by keeping records per gateway.
pub fn normalize_models(gateway: &str, raw: &[Value]) -> Vec<ModelRecord> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(raw.len());
    for value in raw {
        if let Some(record) = normalize_model(gateway, value) {
            if seen.insert(record.id.clone()) {
                out.push(record);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_negative_price_becomes_zero_with_dynamic_flag() {
        let raw = json!({
            "id": "acme/dyn-1",
            "pricing": { "prompt": -1, "completion": -1 }
        });
        let m = normalize_model("acme", &raw).unwrap();
        assert_eq!(m.pricing.prompt_per_mtok, 0.0);
        assert_eq!(m.pricing.completion_per_mtok, 0.0);
        assert!(m.pricing.dynamic);
    }

    #[test]
    fn test_string_prices_parse() {
        let raw = json!({
            "id": "acme/m1",
            "pricing": { "prompt": "0.25", "completion": "0.75" }
        });
        let m = normalize_model("acme", &raw).unwrap();
        assert_eq!(m.pricing.prompt_per_mtok, 0.25);
        assert_eq!(m.pricing.completion_per_mtok, 0.75);
        assert!(!m.pricing.dynamic);
    }

    #[test]
    fn test_missing_pricing_is_zero_not_dynamic() {
        let m = normalize_model("acme", &json!({"id": "m"})).unwrap();
        assert_eq!(m.pricing.prompt_per_mtok, 0.0);
        assert!(!m.pricing.dynamic);
        assert!(m.pricing.hourly.is_none());
    }

    #[test]
    fn test_context_field_coalescing() {
        for key in [
            "context_length",
            "max_context_length",
            "context_window",
            "max_input_tokens",
        ] {
            let m = normalize_model("g", &json!({"id": "m", key: 32768})).unwrap();
            assert_eq!(m.context_length, Some(32_768), "key: {key}");
        }
        let m = normalize_model("g", &json!({"id": "m"})).unwrap();
        assert_eq!(m.context_length, None);
    }

    #[test]
    fn test_max_output_from_top_provider() {
        let raw = json!({
            "id": "m",
            "top_provider": { "max_completion_tokens": 8192 }
        });
        let m = normalize_model("g", &raw).unwrap();
        assert_eq!(m.max_output_tokens, Some(8192));
    }

    #[test]
    fn test_provider_slug_from_namespace() {
        let m = normalize_model("openrouter", &json!({"id": "meta-llama/llama-3.3-70b"})).unwrap();
        assert_eq!(m.provider_slug, "meta-llama");

        let m = normalize_model("groq", &json!({"id": "llama-3.3-70b-versatile"})).unwrap();
        assert_eq!(m.provider_slug, "groq");
    }

    #[test]
    fn test_modality_default_and_override() {
        let m = normalize_model("g", &json!({"id": "m"})).unwrap();
        assert_eq!(m.modality, "text->text");

        let m = normalize_model(
            "g",
            &json!({"id": "m", "architecture": {"modality": "text+image->text"}}),
        )
        .unwrap();
        assert_eq!(m.modality, "text+image->text");
    }

    #[test]
    fn test_display_name_preference() {
        let m = normalize_model(
            "g",
            &json!({"id": "m1", "name": "M One", "display_name": "Model One"}),
        )
        .unwrap();
        assert_eq!(m.name, "Model One");

        let m = normalize_model("g", &json!({"id": "m1", "name": "M One"})).unwrap();
        assert_eq!(m.name, "M One");

        let m = normalize_model("g", &json!({"id": "m1"})).unwrap();
        assert_eq!(m.name, "m1");
    }

    #[test]
    fn test_listing_dedups_within_gateway() {
        let raw = vec![
            json!({"id": "a"}),
            json!({"id": "b"}),
            json!({"id": "a", "name": "duplicate"}),
            json!({"no_id": true}),
            json!({"id": "  "}),
        ];
        let models = normalize_models("g", &raw);
        let ids: Vec<&str> = models.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
