use crate::models::{Marketplace, PatchTarget, PreflightResult, ValidationIssue};
use crate::preflight::{FixMode, FormFields, PreflightValidator, ValidationContext};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ModalState {
    #[default]
    Idle,
    Validating,
    Ready,
    Fixes,
    Listing,
}

impl ModalState {
    /// The transition table. Everything may close back to `Idle`; `Listing`
    /// additionally returns to the pre-dispatch `Ready`/`Fixes` on partial
    /// failure.
    fn allows(self, next: ModalState) -> bool {
        use ModalState::*;
        matches!(
            (self, next),
            (Idle, Validating)
                | (Validating, Ready)
                | (Validating, Fixes)
                | (Ready, Validating)
                | (Fixes, Validating)
                | (Ready, Listing)
                | (Fixes, Listing)
                | (Listing, Idle)
                | (Listing, Ready)
                | (Listing, Fixes)
                | (Validating, Idle)
                | (Ready, Idle)
                | (Fixes, Idle)
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AutoFillMode {
    #[default]
    Auto,
    Manual,
}

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("illegal transition {from:?} -> {to:?}")]
    IllegalTransition { from: ModalState, to: ModalState },
    #[error("the listing flow is not open")]
    NotOpen,
}

/// Cheap gate run before the expensive validator ever starts.
#[derive(Debug, Clone, Serialize, Default)]
pub struct GateReport {
    pub failures: Vec<String>,
}

impl GateReport {
    pub fn passed(&self) -> bool {
        self.failures.is_empty()
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
pub struct SmartListingSession {
    pub modal_open: bool,
    pub modal_state: ModalState,
    pub selected_marketplaces: BTreeSet<Marketplace>,
    pub auto_fill: AutoFillMode,
    pub preflight: Option<PreflightResult>,
}

impl Default for SmartListingSession {
    fn default() -> Self {
        Self {
            modal_open: false,
            modal_state: ModalState::Idle,
            selected_marketplaces: BTreeSet::new(),
            auto_fill: AutoFillMode::Auto,
            preflight: None,
        }
    }
}

/// The external per-marketplace dispatch the controller sequences. The
/// controller owns no listing rules of its own.
#[async_trait]
pub trait SubmitHandler: Send + Sync {
    async fn submit(&self, item_id: &str, marketplace: Marketplace) -> Result<(), String>;
}

pub type SuccessCallback = Box<dyn Fn(&[Marketplace]) + Send + Sync>;

#[derive(Debug, Clone, Serialize, Default)]
pub struct ListNowOutcome {
    pub listed: Vec<Marketplace>,
    pub failed: Vec<(Marketplace, String)>,
}

/// Sequences validate → fix → list for one item. All business rules live in
/// the validator and the submit handler; this only owns the session.
pub struct SmartListingController {
    item_id: String,
    validator: PreflightValidator,
    submit: Arc<dyn SubmitHandler>,
    on_success: Option<SuccessCallback>,
    forms: ValidationContext,
    session: SmartListingSession,
}

impl SmartListingController {
    pub fn new(
        item_id: impl Into<String>,
        forms: ValidationContext,
        validator: PreflightValidator,
        submit: Arc<dyn SubmitHandler>,
    ) -> Self {
        let selected = forms.selected.iter().copied().collect();
        Self {
            item_id: item_id.into(),
            validator,
            submit,
            on_success: None,
            forms,
            session: SmartListingSession {
                selected_marketplaces: selected,
                ..Default::default()
            },
        }
    }

    pub fn on_success(mut self, callback: SuccessCallback) -> Self {
        self.on_success = Some(callback);
        self
    }

    pub fn session(&self) -> &SmartListingSession {
        &self.session
    }

    pub fn forms(&self) -> &ValidationContext {
        &self.forms
    }

    fn transition(&mut self, to: ModalState) -> Result<(), ControllerError> {
        let from = self.session.modal_state;
        if !from.allows(to) {
            return Err(ControllerError::IllegalTransition { from, to });
        }
        self.session.modal_state = to;
        Ok(())
    }

    /// Title, condition, and a positive price must be present before the
    /// validator is worth running. A failed gate leaves the session `Idle`.
    pub fn gate(&self) -> GateReport {
        let mut report = GateReport::default();
        if self
            .forms
            .general
            .str_field("title")
            .is_none_or(|title| title.trim().is_empty())
        {
            report.failures.push("title is required".to_string());
        }
        if self
            .forms
            .general
            .str_field("condition")
            .is_none_or(|condition| condition.trim().is_empty())
        {
            report.failures.push("condition is required".to_string());
        }
        if self
            .forms
            .general
            .f64_field("price")
            .is_none_or(|price| price <= 0.0)
        {
            report.failures.push("price must be positive".to_string());
        }
        report
    }

    pub fn open_modal(&mut self) -> GateReport {
        let report = self.gate();
        if report.passed() {
            self.session.modal_open = true;
        }
        report
    }

    pub fn close_modal(&mut self) {
        self.session = SmartListingSession::default();
    }

    /// Pure session mutation; no re-validation.
    pub fn toggle_marketplace(&mut self, marketplace: Marketplace) {
        if !self.session.selected_marketplaces.remove(&marketplace) {
            self.session.selected_marketplaces.insert(marketplace);
        }
    }

    /// Pure session mutation; no re-validation.
    pub fn toggle_auto_fill(&mut self) {
        self.session.auto_fill = match self.session.auto_fill {
            AutoFillMode::Auto => AutoFillMode::Manual,
            AutoFillMode::Manual => AutoFillMode::Auto,
        };
    }

    /// Runs the gate and then the validator, landing in `Ready` or `Fixes`.
    pub async fn handle_start_listing(&mut self) -> Result<GateReport, ControllerError> {
        if !self.session.modal_open {
            return Err(ControllerError::NotOpen);
        }
        let report = self.gate();
        if !report.passed() {
            return Ok(report);
        }
        self.transition(ModalState::Validating)?;
        let result = self.run_validation().await;
        let next = if result.is_clean() {
            ModalState::Ready
        } else {
            ModalState::Fixes
        };
        self.session.preflight = Some(result);
        self.transition(next)?;
        Ok(report)
    }

    /// One validator pass in the session's fill mode. When auto-fill applied
    /// patches, a second surface-mode pass re-reads the patched forms, so the
    /// published result reflects them without the validator ever re-entering
    /// itself.
    async fn run_validation(&mut self) -> PreflightResult {
        self.forms.selected = self.session.selected_marketplaces.iter().copied().collect();
        let mode = match self.session.auto_fill {
            AutoFillMode::Auto => FixMode::ApplyHighConfidence,
            AutoFillMode::Manual => FixMode::Surface,
        };
        let mut patches: Vec<(ValidationIssue, Value)> = Vec::new();
        let result = self
            .validator
            .run(&self.forms, mode, &mut |issue| {
                if let Some(value) = issue.suggested_value.clone() {
                    patches.push((issue.clone(), value));
                }
            })
            .await;
        if patches.is_empty() {
            return result;
        }
        for (issue, value) in patches {
            self.apply_fix_only(&issue, value);
        }
        self.validator
            .run(&self.forms, FixMode::Surface, &mut |_| {})
            .await
    }

    /// Patches the target form directly. No re-validation here: re-running
    /// the validator is the caller's responsibility, which is what keeps
    /// apply-only mode from recursing.
    pub fn apply_fix_only(&mut self, issue: &ValidationIssue, value: Value) {
        let form = match issue.patch_target {
            PatchTarget::General => &mut self.forms.general,
            PatchTarget::Marketplace => self
                .forms
                .marketplace_forms
                .entry(issue.marketplace)
                .or_insert_with(FormFields::new),
        };
        if let Some(pair) = structured_pair(&value)
            && issue.field.contains("category")
        {
            form.set(&issue.field, Value::String(pair.label));
            form.set(&format!("{}_id", issue.field), pair.id);
            return;
        }
        form.set(&issue.field, value);
    }

    /// User-triggered single-fix path: patch, let the host commit the state
    /// update on the next scheduling tick, then re-validate and republish.
    pub async fn handle_apply_fix(
        &mut self,
        issue: &ValidationIssue,
        value: Value,
    ) -> Result<(), ControllerError> {
        self.apply_fix_only(issue, value);
        tokio::task::yield_now().await;
        self.transition(ModalState::Validating)?;
        let result = self.run_validation().await;
        let next = if result.is_clean() {
            ModalState::Ready
        } else {
            ModalState::Fixes
        };
        self.session.preflight = Some(result);
        self.transition(next)?;
        Ok(())
    }

    /// Sequential dispatch to the submit handler. All-success resets the
    /// session and fires the success callback with exactly the listed
    /// marketplaces; any failure restores the pre-dispatch state with
    /// selections and issues intact, and nothing already listed is rolled
    /// back.
    pub async fn handle_list_now(
        &mut self,
        marketplaces: Option<Vec<Marketplace>>,
    ) -> Result<ListNowOutcome, ControllerError> {
        let targets = marketplaces.unwrap_or_else(|| match &self.session.preflight {
            Some(result) => result.ready.clone(),
            None => self.session.selected_marketplaces.iter().copied().collect(),
        });
        let prior = self.session.modal_state;
        self.transition(ModalState::Listing)?;

        let mut outcome = ListNowOutcome::default();
        for marketplace in targets {
            match self.submit.submit(&self.item_id, marketplace).await {
                Ok(()) => outcome.listed.push(marketplace),
                Err(error) => outcome.failed.push((marketplace, error)),
            }
        }

        if outcome.failed.is_empty() && !outcome.listed.is_empty() {
            info!(
                target = "crosslist.controller",
                item = %self.item_id,
                listed = outcome.listed.len(),
                "listing flow completed"
            );
            self.transition(ModalState::Idle)?;
            self.session.modal_open = false;
            self.session.selected_marketplaces.clear();
            self.session.preflight = None;
            if let Some(callback) = &self.on_success {
                callback(&outcome.listed);
            }
        } else {
            self.transition(prior)?;
        }
        Ok(outcome)
    }
}

struct StructuredPair {
    id: Value,
    label: String,
}

/// Detects `{id, label}` values produced by pickers.
fn structured_pair(value: &Value) -> Option<StructuredPair> {
    let object = value.as_object()?;
    let id = object.get("id")?.clone();
    let label = object.get("label")?.as_str()?.to_string();
    Some(StructuredPair { id, label })
}
