use crate::models::{
    InventoryItem, Marketplace, PatchTarget, PreflightResult, ValidationIssue,
};
use crate::oracle::{FillOracle, ItemContext, RuleOracle, Suggestion};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::warn;

pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.8;

/// Draft form state: a flat field → value map shared by the general form,
/// the per-marketplace forms, saved defaults, and fulfillment profiles.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FormFields(BTreeMap<String, Value>);

impl FormFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn set(&mut self, field: &str, value: Value) {
        self.0.insert(field.to_string(), value);
    }

    pub fn str_field(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(Value::as_str)
    }

    pub fn f64_field(&self, field: &str) -> Option<f64> {
        self.0.get(field).and_then(Value::as_f64)
    }

    /// Present and usable: non-null, non-blank, non-empty, and positive for
    /// price-like fields.
    fn is_filled(&self, field: &str) -> bool {
        match self.0.get(field) {
            None | Some(Value::Null) => false,
            Some(Value::String(s)) => !s.trim().is_empty(),
            Some(Value::Array(items)) => !items.is_empty(),
            Some(Value::Number(n)) => {
                if field.contains("price") {
                    n.as_f64().is_some_and(|v| v > 0.0)
                } else {
                    true
                }
            }
            Some(_) => true,
        }
    }
}

/// Everything a validation pass looks at. Field resolution order:
/// marketplace form, saved defaults, general form, fulfillment profile.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationContext {
    pub selected: Vec<Marketplace>,
    #[serde(default)]
    pub general: FormFields,
    #[serde(default)]
    pub marketplace_forms: HashMap<Marketplace, FormFields>,
    #[serde(default)]
    pub defaults: HashMap<Marketplace, FormFields>,
    #[serde(default)]
    pub fulfillment: Option<FormFields>,
}

impl ValidationContext {
    pub fn for_item(item: &InventoryItem, selected: Vec<Marketplace>) -> Self {
        let mut general = FormFields::new();
        general.set("title", Value::String(item.title.clone()));
        if let Some(description) = &item.description {
            general.set("description", Value::String(description.clone()));
        }
        if let Some(price) = item.price.or(item.purchase_price) {
            general.set("price", serde_json::json!(price));
        }
        if let Some(condition) = &item.condition {
            general.set("condition", Value::String(condition.clone()));
        }
        if let Some(brand) = &item.brand {
            general.set("brand", Value::String(brand.clone()));
        }
        if let Some(category) = &item.category {
            general.set("category", Value::String(category.clone()));
        }
        if !item.images.is_empty() {
            general.set("images", serde_json::json!(item.images));
        }
        Self {
            selected,
            general,
            ..Default::default()
        }
    }

    fn is_satisfied(&self, marketplace: Marketplace, field: &str) -> bool {
        if let Some(form) = self.marketplace_forms.get(&marketplace)
            && form.is_filled(field)
        {
            return true;
        }
        if let Some(defaults) = self.defaults.get(&marketplace)
            && defaults.is_filled(field)
        {
            return true;
        }
        if self.general.is_filled(field) {
            return true;
        }
        if let Some(fulfillment) = &self.fulfillment
            && fulfillment.is_filled(field)
        {
            return true;
        }
        false
    }

    fn item_context(&self) -> ItemContext {
        ItemContext {
            title: self.general.str_field("title").unwrap_or_default().to_string(),
            description: self.general.str_field("description").map(str::to_string),
            brand: self.general.str_field("brand").map(str::to_string),
            category: self.general.str_field("category").map(str::to_string),
            condition: self.general.str_field("condition").map(str::to_string),
            price: self.general.f64_field("price"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FieldRule {
    pub field: &'static str,
    pub target: PatchTarget,
}

const fn general(field: &'static str) -> FieldRule {
    FieldRule {
        field,
        target: PatchTarget::General,
    }
}

const fn marketplace(field: &'static str) -> FieldRule {
    FieldRule {
        field,
        target: PatchTarget::Marketplace,
    }
}

/// Required everywhere, patched on the general form.
const GENERAL_RULES: [FieldRule; 4] = [
    general("title"),
    general("price"),
    general("condition"),
    general("category"),
];

const EBAY_RULES: [FieldRule; 2] =
    [marketplace("category_id"), marketplace("shipping_profile")];
const FACEBOOK_RULES: [FieldRule; 1] = [marketplace("location")];
const MERCARI_RULES: [FieldRule; 2] = [
    marketplace("shipping_payer"),
    marketplace("shipping_profile"),
];
const POSHMARK_RULES: [FieldRule; 1] = [marketplace("size")];

/// Per-marketplace requirements on top of the general set.
fn marketplace_rules(target: Marketplace) -> &'static [FieldRule] {
    match target {
        Marketplace::Ebay => &EBAY_RULES,
        Marketplace::Facebook => &FACEBOOK_RULES,
        Marketplace::Mercari => &MERCARI_RULES,
        Marketplace::Poshmark => &POSHMARK_RULES,
    }
}

/// How the validator disposes of a fixable issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixMode {
    /// Every issue is surfaced to the caller.
    Surface,
    /// Issues whose confidence clears the threshold go straight to the patch
    /// callback instead of being surfaced. The callback cannot re-enter
    /// validation; re-validation is the caller's move after this pass ends.
    ApplyHighConfidence,
}

pub struct PreflightValidator {
    oracle: Arc<dyn FillOracle>,
    confidence_threshold: f64,
}

impl PreflightValidator {
    pub fn new(oracle: Arc<dyn FillOracle>) -> Self {
        Self {
            oracle,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    /// One validation pass. Partitions the selected marketplaces into `ready`
    /// and an ordered issue list; in `ApplyHighConfidence` mode, issues above
    /// the threshold are handed to `apply` instead. A marketplace whose
    /// issues were all auto-applied is *not* promoted to `ready` by this
    /// pass; the caller re-validates against the patched forms.
    pub async fn run(
        &self,
        ctx: &ValidationContext,
        mode: FixMode,
        apply: &mut (dyn FnMut(&ValidationIssue) + Send),
    ) -> PreflightResult {
        let item = ctx.item_context();
        let mut result = PreflightResult::default();
        for &target in &ctx.selected {
            let missing: Vec<FieldRule> = GENERAL_RULES
                .iter()
                .chain(marketplace_rules(target))
                .filter(|rule| !ctx.is_satisfied(target, rule.field))
                .copied()
                .collect();
            if missing.is_empty() {
                result.ready.push(target);
                continue;
            }

            let fields: Vec<String> = missing
                .iter()
                .map(|rule| rule.field.to_string())
                .collect();
            let suggestions = match self.oracle.suggest(target, &fields, &item).await {
                Ok(suggestions) => suggestions,
                Err(err) => {
                    warn!(
                        target = "crosslist.preflight",
                        marketplace = %target,
                        error = %err,
                        "fill oracle failed, using rule fallback"
                    );
                    RuleOracle
                        .suggest(target, &fields, &item)
                        .await
                        .unwrap_or_default()
                }
            };

            for rule in missing {
                let issue = build_issue(target, rule, suggestions.get(rule.field));
                if mode == FixMode::ApplyHighConfidence
                    && issue.suggested_value.is_some()
                    && issue.confidence >= self.confidence_threshold
                {
                    apply(&issue);
                } else {
                    result.fixes_needed.push(issue);
                }
            }
        }
        result
    }
}

fn build_issue(
    target: Marketplace,
    rule: FieldRule,
    suggestion: Option<&Suggestion>,
) -> ValidationIssue {
    match suggestion {
        Some(suggestion) => ValidationIssue {
            marketplace: target,
            field: rule.field.to_string(),
            patch_target: rule.target,
            suggested_value: Some(suggestion.value.clone()),
            confidence: suggestion.confidence,
            reasoning: suggestion.reasoning.clone(),
        },
        None => ValidationIssue {
            marketplace: target,
            field: rule.field.to_string(),
            patch_target: rule.target,
            suggested_value: None,
            confidence: 0.0,
            reasoning: format!("`{}` is required for {target}", rule.field),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ItemStatus;
    use serde_json::json;

    fn filled_item(id: &str) -> InventoryItem {
        InventoryItem {
            id: id.to_string(),
            title: "Arc'teryx shell jacket".to_string(),
            description: None,
            purchase_price: Some(80.0),
            price: Some(150.0),
            condition: Some("used_like_new".to_string()),
            brand: Some("Arc'teryx".to_string()),
            category: Some("outerwear".to_string()),
            images: vec![],
            quantity: 1,
            auto_delist_on_sale: false,
            status: ItemStatus::Available,
        }
    }

    fn validator() -> PreflightValidator {
        PreflightValidator::new(Arc::new(RuleOracle))
    }

    #[tokio::test]
    async fn complete_forms_partition_as_ready() {
        let mut ctx = ValidationContext::for_item(
            &filled_item("i1"),
            vec![Marketplace::Facebook],
        );
        let mut form = FormFields::new();
        form.set("location", json!("Portland, OR"));
        ctx.marketplace_forms.insert(Marketplace::Facebook, form);

        let result = validator()
            .run(&ctx, FixMode::Surface, &mut |_| {})
            .await;
        assert_eq!(result.ready, vec![Marketplace::Facebook]);
        assert!(result.fixes_needed.is_empty());
    }

    #[tokio::test]
    async fn missing_fields_surface_ordered_issues() {
        let mut item = filled_item("i1");
        item.condition = None;
        let ctx = ValidationContext::for_item(
            &item,
            vec![Marketplace::Poshmark],
        );

        let result = validator()
            .run(&ctx, FixMode::Surface, &mut |_| {})
            .await;
        assert!(result.ready.is_empty());
        let fields: Vec<&str> = result
            .fixes_needed
            .iter()
            .map(|issue| issue.field.as_str())
            .collect();
        // general rules come before marketplace-specific ones
        assert_eq!(fields, vec!["condition", "size"]);
        assert_eq!(result.fixes_needed[0].patch_target, PatchTarget::General);
        assert_eq!(result.fixes_needed[1].patch_target, PatchTarget::Marketplace);
        // rule oracle answers condition but not size
        assert!(result.fixes_needed[0].suggested_value.is_some());
        assert!(result.fixes_needed[1].suggested_value.is_none());
    }

    #[tokio::test]
    async fn saved_defaults_satisfy_marketplace_fields() {
        let mut ctx = ValidationContext::for_item(
            &filled_item("i1"),
            vec![Marketplace::Mercari],
        );
        let mut defaults = FormFields::new();
        defaults.set("shipping_payer", json!("seller"));
        defaults.set("shipping_profile", json!("standard"));
        ctx.defaults.insert(Marketplace::Mercari, defaults);

        let result = validator()
            .run(&ctx, FixMode::Surface, &mut |_| {})
            .await;
        assert_eq!(result.ready, vec![Marketplace::Mercari]);
    }

    #[tokio::test]
    async fn apply_mode_patches_instead_of_surfacing() {
        let mut item = filled_item("i1");
        item.condition = None;
        let ctx = ValidationContext::for_item(
            &item,
            vec![Marketplace::Facebook],
        );

        let mut applied = Vec::new();
        let result = validator()
            .run(&ctx, FixMode::ApplyHighConfidence, &mut |issue| {
                applied.push(issue.clone());
            })
            .await;

        // condition (0.85) cleared the threshold and was applied; location
        // had no suggestion and surfaced
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].field, "condition");
        let surfaced: Vec<&str> = result
            .fixes_needed
            .iter()
            .map(|issue| issue.field.as_str())
            .collect();
        assert_eq!(surfaced, vec!["location"]);
        // auto-applied issues do not promote the marketplace to ready
        assert!(result.ready.is_empty());
    }

    #[tokio::test]
    async fn blank_and_zero_values_count_as_missing() {
        let mut ctx = ValidationContext::default();
        ctx.selected = vec![Marketplace::Facebook];
        ctx.general.set("title", json!("   "));
        ctx.general.set("price", json!(0.0));
        ctx.general.set("condition", json!("used_good"));
        ctx.general.set("category", json!("tops"));

        let result = validator()
            .run(&ctx, FixMode::Surface, &mut |_| {})
            .await;
        let fields: Vec<&str> = result
            .fixes_needed
            .iter()
            .map(|issue| issue.field.as_str())
            .collect();
        assert!(fields.contains(&"title"));
        assert!(fields.contains(&"price"));
    }
}
