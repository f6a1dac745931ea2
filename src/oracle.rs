use crate::http::build_client;
use crate::models::Marketplace;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("missing gateway url")]
    MissingGateway,
    #[error("http error: {0}")]
    Http(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// What the validator knows about the item when asking for suggestions.
#[derive(Debug, Clone, Serialize, Default)]
pub struct ItemContext {
    pub title: String,
    pub description: Option<String>,
    pub brand: Option<String>,
    pub category: Option<String>,
    pub condition: Option<String>,
    pub price: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Suggestion {
    pub value: Value,
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
}

/// Suggestion source for missing listing fields. Implementations may be
/// AI-backed or rule-based; the validator treats them identically.
#[async_trait]
pub trait FillOracle: Send + Sync {
    async fn suggest(
        &self,
        marketplace: Marketplace,
        missing_fields: &[String],
        item: &ItemContext,
    ) -> Result<HashMap<String, Suggestion>, OracleError>;
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub gateway_url: String,
    pub api_key: Option<String>,
    pub function_name: Option<String>,
}

impl GatewayConfig {
    pub fn from_env() -> Option<Self> {
        let gateway_url = std::env::var("ORACLE_GATEWAY_URL").ok()?;
        Some(Self {
            gateway_url,
            api_key: std::env::var("ORACLE_API_KEY").ok(),
            function_name: std::env::var("ORACLE_FUNCTION").ok(),
        })
    }
}

/// LLM-gateway oracle: one inference call per validation pass, response is a
/// JSON object keyed by field name.
pub struct GatewayOracle {
    http: Client,
    config: GatewayConfig,
}

impl GatewayOracle {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            http: build_client(),
            config,
        }
    }
}

#[async_trait]
impl FillOracle for GatewayOracle {
    async fn suggest(
        &self,
        marketplace: Marketplace,
        missing_fields: &[String],
        item: &ItemContext,
    ) -> Result<HashMap<String, Suggestion>, OracleError> {
        let gateway = self.config.gateway_url.trim();
        if gateway.is_empty() {
            return Err(OracleError::MissingGateway);
        }
        let function_name = self
            .config
            .function_name
            .as_deref()
            .unwrap_or("listing_gap_fill");
        let prompt = format!(
            "Suggest values for the missing {marketplace} listing fields {missing_fields:?}. \
             Item: {item}. Respond with a JSON object keyed by field name, each value \
             {{\"value\": ..., \"confidence\": 0.0-1.0, \"reasoning\": \"...\"}}.",
            item = serde_json::to_string(item).unwrap_or_default(),
        );

        let body = json!({
            "function_name": function_name,
            "input": { "messages": [{ "role": "user", "content": prompt }] },
        });
        let mut request = self.http.post(format!("{gateway}/inference")).json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.header("X-API-Key", key);
        }
        let response = request
            .send()
            .await
            .map_err(|err| OracleError::Http(err.to_string()))?;
        if !response.status().is_success() {
            return Err(OracleError::Http(format!("HTTP {}", response.status())));
        }

        let payload: GatewayResponse = response
            .json()
            .await
            .map_err(|err| OracleError::InvalidResponse(err.to_string()))?;
        let text = payload
            .content
            .into_iter()
            .find(|item| item.r#type == "text")
            .map(|item| item.text)
            .ok_or_else(|| OracleError::InvalidResponse("missing text".into()))?;
        serde_json::from_str(&text).map_err(|err| OracleError::InvalidResponse(err.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct GatewayResponse {
    content: Vec<GatewayContent>,
}

#[derive(Debug, Deserialize)]
struct GatewayContent {
    r#type: String,
    text: String,
}

/// Deterministic fallback used when no gateway is configured or the gateway
/// call fails mid-validation.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleOracle;

struct CategoryRule {
    label: &'static str,
    keywords: &'static [&'static str],
}

const CATEGORY_RULES: [CategoryRule; 5] = [
    CategoryRule {
        label: "clothing",
        keywords: &["shirt", "jacket", "jeans", "dress", "hoodie", "fleece"],
    },
    CategoryRule {
        label: "shoes",
        keywords: &["shoe", "sneaker", "boot", "sandal", "heel"],
    },
    CategoryRule {
        label: "electronics",
        keywords: &["headphones", "camera", "console", "phone", "speaker"],
    },
    CategoryRule {
        label: "collectibles",
        keywords: &["vintage", "retro", "card", "figure", "collectible"],
    },
    CategoryRule {
        label: "accessories",
        keywords: &["bag", "belt", "hat", "wallet", "scarf", "watch"],
    },
];

impl RuleOracle {
    fn suggest_field(field: &str, item: &ItemContext) -> Option<Suggestion> {
        let title = item.title.to_lowercase();
        match field {
            "condition" => Some(Suggestion {
                value: json!("used_good"),
                confidence: 0.85,
                reasoning: "most resale inventory lists as used in good condition".to_string(),
            }),
            "category" => {
                let rule = CATEGORY_RULES.iter().find(|rule| {
                    rule.keywords.iter().any(|keyword| title.contains(keyword))
                })?;
                Some(Suggestion {
                    value: json!(rule.label),
                    confidence: 0.7,
                    reasoning: format!("title keywords matched `{}`", rule.label),
                })
            }
            "brand" => {
                // first capitalized token of the title is the usual brand slot
                let candidate = item
                    .title
                    .split_whitespace()
                    .find(|word| word.chars().next().is_some_and(char::is_uppercase))?;
                Some(Suggestion {
                    value: json!(candidate),
                    confidence: 0.55,
                    reasoning: format!("leading title token `{candidate}` looks like a brand"),
                })
            }
            "price" => {
                let price = item.price?;
                Some(Suggestion {
                    value: json!((price * 100.0).round() / 100.0),
                    confidence: 0.6,
                    reasoning: "carried over from the general form".to_string(),
                })
            }
            "shipping_profile" => Some(Suggestion {
                value: json!("standard"),
                confidence: 0.9,
                reasoning: "standard shipping is the saved default".to_string(),
            }),
            _ => None,
        }
    }
}

#[async_trait]
impl FillOracle for RuleOracle {
    async fn suggest(
        &self,
        _marketplace: Marketplace,
        missing_fields: &[String],
        item: &ItemContext,
    ) -> Result<HashMap<String, Suggestion>, OracleError> {
        let mut suggestions = HashMap::new();
        for field in missing_fields {
            if let Some(suggestion) = Self::suggest_field(field, item) {
                suggestions.insert(field.clone(), suggestion);
            }
        }
        Ok(suggestions)
    }
}

/// Gateway when configured, rules otherwise.
pub fn oracle_from_env() -> std::sync::Arc<dyn FillOracle> {
    match GatewayConfig::from_env() {
        Some(config) => std::sync::Arc::new(GatewayOracle::new(config)),
        None => std::sync::Arc::new(RuleOracle),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(title: &str) -> ItemContext {
        ItemContext {
            title: title.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn rule_oracle_covers_condition_and_category() {
        let oracle = RuleOracle;
        let suggestions = oracle
            .suggest(
                Marketplace::Mercari,
                &["condition".to_string(), "category".to_string()],
                &context("Nike running sneakers size 10"),
            )
            .await
            .expect("suggest");
        assert_eq!(suggestions["condition"].value, json!("used_good"));
        assert_eq!(suggestions["category"].value, json!("shoes"));
        assert!(suggestions["category"].confidence < suggestions["condition"].confidence);
    }

    #[tokio::test]
    async fn rule_oracle_skips_fields_it_cannot_answer() {
        let oracle = RuleOracle;
        let suggestions = oracle
            .suggest(
                Marketplace::Poshmark,
                &["size".to_string()],
                &context("plain tote"),
            )
            .await
            .expect("suggest");
        assert!(suggestions.is_empty());
    }
}
