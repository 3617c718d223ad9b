//! Config flows
//!
//! A config flow is a small step machine an integration implements to
//! collect its configuration interactively. The [`FlowManager`] keeps the
//! in-progress flows, feeds user input to the current step and turns a
//! finished flow into a persisted [`ConfigEntry`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::entry::{ConfigEntry, ConfigEntryState, ConfigEntryUpdate};
use crate::manager::{ConfigEntries, ConfigEntriesError};

/// Abort reason used when the device is already set up
pub const ABORT_ALREADY_CONFIGURED: &str = "already_configured";

/// Errors raised while driving a flow
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("No config flow registered for {0}")]
    UnknownHandler(String),

    #[error("Flow not found: {0}")]
    UnknownFlow(String),

    #[error("Flow has no step {0}")]
    UnknownStep(String),

    #[error("Invalid user input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Entries(#[from] ConfigEntriesError),
}

pub type FlowResultOutcome = Result<FlowResult, FlowError>;

/// User input submitted to a step
pub type FlowInput = HashMap<String, Value>;

/// Kind of flow result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowResultType {
    Form,
    CreateEntry,
    Abort,
}

/// Result of one flow step
#[derive(Debug, Clone, Serialize)]
pub struct FlowResult {
    /// Flow ID (filled in by the manager)
    pub flow_id: String,
    /// Handler (integration domain)
    pub handler: String,
    #[serde(rename = "type")]
    pub result_type: FlowResultType,
    /// Step to submit the form to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    /// Form fields, empty for non-form results
    pub data_schema: Vec<FormField>,
    /// Errors from the previous submission, keyed by field or `base`
    pub errors: Option<HashMap<String, String>>,
    /// Entry title (create_entry)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Entry data (create_entry)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<HashMap<String, Value>>,
    /// Abort reason (abort)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// The created entry (create_entry, filled in by the manager)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl FlowResult {
    fn empty(result_type: FlowResultType) -> Self {
        Self {
            flow_id: String::new(),
            handler: String::new(),
            result_type,
            step_id: None,
            data_schema: Vec::new(),
            errors: None,
            title: None,
            data: None,
            reason: None,
            result: None,
        }
    }

    /// Show a form for `step_id`
    pub fn form(step_id: impl Into<String>, data_schema: Vec<FormField>) -> Self {
        Self {
            step_id: Some(step_id.into()),
            data_schema,
            ..Self::empty(FlowResultType::Form)
        }
    }

    /// Attach errors to a form
    pub fn with_errors(mut self, errors: HashMap<String, String>) -> Self {
        self.errors = Some(errors);
        self
    }

    /// Finish the flow by creating an entry
    pub fn create_entry(title: impl Into<String>, data: HashMap<String, Value>) -> Self {
        Self {
            title: Some(title.into()),
            data: Some(data),
            ..Self::empty(FlowResultType::CreateEntry)
        }
    }

    /// Finish the flow without creating anything
    pub fn abort(reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            ..Self::empty(FlowResultType::Abort)
        }
    }
}

/// One choice of a select field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectOption {
    pub value: String,
    pub label: String,
}

/// Form field schema
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<SelectOption>>,
}

impl FormField {
    fn new(name: impl Into<String>, field_type: &str) -> Self {
        Self {
            name: name.into(),
            field_type: field_type.to_string(),
            required: None,
            default: None,
            options: None,
        }
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, "string")
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, "integer")
    }

    /// Multiple choice among `(value, label)` pairs
    pub fn multi_select(
        name: impl Into<String>,
        options: impl IntoIterator<Item = (String, String)>,
    ) -> Self {
        let mut field = Self::new(name, "multi_select");
        field.options = Some(
            options
                .into_iter()
                .map(|(value, label)| SelectOption { value, label })
                .collect(),
        );
        field
    }

    pub fn required(mut self) -> Self {
        self.required = Some(true);
        self
    }

    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }
}

/// Per-flow state the manager hands to every step
pub struct FlowContext {
    domain: String,
    unique_id: Option<String>,
    entries: Arc<ConfigEntries>,
}

impl FlowContext {
    fn new(domain: impl Into<String>, entries: Arc<ConfigEntries>) -> Self {
        Self {
            domain: domain.into(),
            unique_id: None,
            entries,
        }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn unique_id(&self) -> Option<&str> {
        self.unique_id.as_deref()
    }

    pub fn entries(&self) -> &ConfigEntries {
        &self.entries
    }

    /// Set the unique id of the entry this flow is going to create.
    ///
    /// Returns the entry already configured with that id, if any.
    pub fn set_unique_id(&mut self, unique_id: impl Into<String>) -> Option<ConfigEntry> {
        let unique_id = unique_id.into();
        let existing = self.entries.get_by_unique_id(&self.domain, &unique_id);
        self.unique_id = Some(unique_id);
        existing
    }

    /// Abort if an entry with this flow's unique id already exists.
    ///
    /// `updates` are merged into the existing entry's data first; a changed
    /// entry that is currently set up gets reloaded so the new values apply.
    pub async fn abort_if_unique_id_configured(
        &self,
        updates: HashMap<String, Value>,
    ) -> Result<Option<FlowResult>, FlowError> {
        let Some(unique_id) = self.unique_id.as_deref() else {
            return Ok(None);
        };
        let Some(existing) = self.entries.get_by_unique_id(&self.domain, unique_id) else {
            return Ok(None);
        };

        let mut data = existing.data.clone();
        let mut changed = false;
        for (key, value) in updates {
            if data.get(&key) != Some(&value) {
                data.insert(key, value);
                changed = true;
            }
        }

        if changed {
            info!(
                domain = %self.domain,
                unique_id,
                entry_id = %existing.entry_id,
                "Updating already configured entry"
            );
            self.entries
                .update(&existing.entry_id, ConfigEntryUpdate::new().data(data))
                .await?;

            if matches!(
                existing.state,
                ConfigEntryState::Loaded | ConfigEntryState::SetupRetry
            ) {
                match self.entries.reload(&existing.entry_id).await {
                    Ok(()) => {}
                    Err(ConfigEntriesError::NotReady(_)) => {
                        self.entries.schedule_setup_retry(&existing.entry_id);
                    }
                    Err(e) => {
                        warn!("Reload of {} after update failed: {}", existing.entry_id, e)
                    }
                }
            }
        }

        Ok(Some(FlowResult::abort(ABORT_ALREADY_CONFIGURED)))
    }
}

/// A config flow implemented by an integration
#[async_trait]
pub trait ConfigFlow: Send + Sync {
    /// Run `step_id`. `user_input` is `None` when the step is first shown.
    async fn async_step(
        &mut self,
        step_id: &str,
        user_input: Option<FlowInput>,
        ctx: &mut FlowContext,
    ) -> FlowResultOutcome;
}

/// Creates a fresh flow instance for a domain
pub type FlowFactory = Arc<dyn Fn() -> Box<dyn ConfigFlow> + Send + Sync>;

struct ActiveFlow {
    handler: String,
    flow: Box<dyn ConfigFlow>,
    context: FlowContext,
    current_step: String,
}

/// Manages active configuration flows
pub struct FlowManager {
    entries: Arc<ConfigEntries>,
    factories: DashMap<String, FlowFactory>,
    flows: DashMap<String, ActiveFlow>,
}

impl FlowManager {
    pub fn new(entries: Arc<ConfigEntries>) -> Self {
        Self {
            entries,
            factories: DashMap::new(),
            flows: DashMap::new(),
        }
    }

    /// Register the flow factory for a domain
    pub fn register(&self, domain: &str, factory: FlowFactory) {
        self.factories.insert(domain.to_string(), factory);
        debug!("Registered config flow for domain: {}", domain);
    }

    /// Start a new flow at its `user` step
    pub async fn start_flow(&self, handler: &str) -> FlowResultOutcome {
        let factory = self
            .factories
            .get(handler)
            .map(|f| f.value().clone())
            .ok_or_else(|| FlowError::UnknownHandler(handler.to_string()))?;

        let active = ActiveFlow {
            handler: handler.to_string(),
            flow: factory(),
            context: FlowContext::new(handler, self.entries.clone()),
            current_step: "user".to_string(),
        };
        let flow_id = Ulid::new().to_string();
        info!(flow_id = %flow_id, handler, "Starting config flow");

        self.run_step(flow_id, active, None).await
    }

    /// Submit user input to the flow's current step
    pub async fn progress_flow(&self, flow_id: &str, user_input: Option<Value>) -> FlowResultOutcome {
        let user_input = match user_input {
            None | Some(Value::Null) => None,
            Some(Value::Object(map)) => Some(map.into_iter().collect::<FlowInput>()),
            Some(other) => {
                return Err(FlowError::InvalidInput(format!(
                    "expected an object, got {}",
                    other
                )))
            }
        };

        // Taken out of the map for the duration of the step so that the same
        // flow can't be progressed twice concurrently.
        let (flow_id, active) = self
            .flows
            .remove(flow_id)
            .ok_or_else(|| FlowError::UnknownFlow(flow_id.to_string()))?;

        self.run_step(flow_id, active, user_input).await
    }

    /// Abort an in-progress flow
    pub fn abort_flow(&self, flow_id: &str) -> Result<(), FlowError> {
        if self.flows.remove(flow_id).is_none() {
            return Err(FlowError::UnknownFlow(flow_id.to_string()));
        }
        debug!(flow_id, "Config flow aborted by user");
        Ok(())
    }

    /// In-progress flows
    pub fn list_flows(&self) -> Vec<Value> {
        self.flows
            .iter()
            .map(|r| {
                serde_json::json!({
                    "flow_id": r.key(),
                    "handler": r.value().handler,
                    "step_id": r.value().current_step,
                })
            })
            .collect()
    }

    async fn run_step(
        &self,
        flow_id: String,
        mut active: ActiveFlow,
        user_input: Option<FlowInput>,
    ) -> FlowResultOutcome {
        let step = active.current_step.clone();
        let submitted = user_input.is_some();
        debug!(flow_id = %flow_id, step = %step, "Running config flow step");

        let outcome = active
            .flow
            .async_step(&step, user_input, &mut active.context)
            .await;
        let mut result = match outcome {
            Ok(result) => result,
            Err(e) => {
                // Bad input leaves the flow where it was so it can be resubmitted.
                if submitted {
                    self.flows.insert(flow_id, active);
                }
                return Err(e);
            }
        };
        result.flow_id = flow_id.clone();
        result.handler = active.handler.clone();

        match result.result_type {
            FlowResultType::Form => {
                if let Some(step_id) = &result.step_id {
                    active.current_step = step_id.clone();
                }
                self.flows.insert(flow_id, active);
                Ok(result)
            }
            FlowResultType::Abort => {
                info!(
                    flow_id = %flow_id,
                    reason = result.reason.as_deref().unwrap_or_default(),
                    "Config flow aborted"
                );
                Ok(result)
            }
            FlowResultType::CreateEntry => self.finish_flow(active, result).await,
        }
    }

    async fn finish_flow(&self, active: ActiveFlow, mut result: FlowResult) -> FlowResultOutcome {
        let mut entry = ConfigEntry::new(
            active.handler.clone(),
            result.title.clone().unwrap_or_default(),
        )
        .with_data(result.data.clone().unwrap_or_default());
        if let Some(unique_id) = active.context.unique_id() {
            entry = entry.with_unique_id(unique_id);
        }

        let entry = match self.entries.add(entry).await {
            Ok(entry) => entry,
            Err(ConfigEntriesError::AlreadyExists { .. }) => {
                let mut abort = FlowResult::abort(ABORT_ALREADY_CONFIGURED);
                abort.flow_id = result.flow_id;
                abort.handler = result.handler;
                return Ok(abort);
            }
            Err(e) => return Err(e.into()),
        };

        match self.entries.setup(&entry.entry_id).await {
            Ok(()) => {}
            Err(ConfigEntriesError::NotReady(_)) => {
                self.entries.schedule_setup_retry(&entry.entry_id);
            }
            Err(e) => warn!("Setup of new entry {} failed: {}", entry.entry_id, e),
        }

        result.result = serde_json::to_value(&entry).ok();
        Ok(result)
    }
}
