//! Config flow for apcupsd
//!
//! `user` asks for the NIS host and port and probes it once, then
//! `sensor_select` offers the fields the UPS reported. The UPS serial number
//! is the entry's unique id, so adding the same UPS twice updates the first
//! entry instead.

use std::collections::HashMap;

use async_trait::async_trait;
use ha_config_entries::{
    ConfigFlow, FlowContext, FlowError, FlowInput, FlowResult, FlowResultOutcome, FormField,
};
use serde_json::{json, Value};
use tracing::{debug, info};
use uuid::Uuid;

use super::client::{StatusSnapshot, StatusSourceFactory};
use super::constants::{
    CONF_HOST, CONF_PORT, CONF_SENSORS, DEFAULT_HOST, DEFAULT_PORT, ERROR_CANNOT_CONNECT,
    KEY_SERIALNO,
};
use super::sensor::sensor_type;

pub const STEP_USER: &str = "user";
pub const STEP_SENSOR_SELECT: &str = "sensor_select";

pub struct ApcUpsdConfigFlow {
    source_factory: StatusSourceFactory,
    host: String,
    port: u16,
    status: StatusSnapshot,
}

impl ApcUpsdConfigFlow {
    pub fn new(source_factory: StatusSourceFactory) -> Self {
        Self {
            source_factory,
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            status: StatusSnapshot::new(),
        }
    }

    fn setup_form(errors: Option<HashMap<String, String>>) -> FlowResult {
        FlowResult::form(
            STEP_USER,
            vec![
                FormField::string(CONF_HOST).required().with_default(DEFAULT_HOST),
                FormField::integer(CONF_PORT).required().with_default(DEFAULT_PORT),
            ],
        )
        .with_errors(errors.unwrap_or_default())
    }

    /// Probed fields that have a description, lowercased, with their names
    fn valid_sensors(&self) -> Vec<(String, String)> {
        self.status
            .keys()
            .filter_map(|field| {
                sensor_type(field).map(|description| (description.key, description.name))
            })
            .collect()
    }

    async fn step_user(&mut self, user_input: Option<FlowInput>) -> FlowResultOutcome {
        let Some(input) = user_input else {
            return Ok(Self::setup_form(None));
        };

        let host = input
            .get(CONF_HOST)
            .and_then(Value::as_str)
            .ok_or_else(|| FlowError::InvalidInput(CONF_HOST.to_string()))?
            .to_string();
        let port = input
            .get(CONF_PORT)
            .and_then(Value::as_u64)
            .and_then(|port| u16::try_from(port).ok())
            .ok_or_else(|| FlowError::InvalidInput(CONF_PORT.to_string()))?;

        let source = (self.source_factory)(&host, port);
        match source.fetch_status().await {
            Ok(status) => {
                debug!(host = %host, port, fields = status.len(), "Probed NIS");
                self.status = status;
            }
            Err(e) => {
                debug!(host = %host, port, "NIS connection error: {}", e);
                return Ok(Self::setup_form(Some(HashMap::from([(
                    "base".to_string(),
                    ERROR_CANNOT_CONNECT.to_string(),
                )]))));
            }
        }

        self.host = host;
        self.port = port;
        self.step_sensor_select(None, None).await
    }

    async fn step_sensor_select(
        &mut self,
        user_input: Option<FlowInput>,
        ctx: Option<&mut FlowContext>,
    ) -> FlowResultOutcome {
        let (Some(input), Some(ctx)) = (user_input, ctx) else {
            return Ok(FlowResult::form(
                STEP_SENSOR_SELECT,
                vec![FormField::multi_select(CONF_SENSORS, self.valid_sensors()).required()],
            ));
        };

        let sensors: Vec<String> = input
            .get(CONF_SENSORS)
            .and_then(Value::as_array)
            .ok_or_else(|| FlowError::InvalidInput(CONF_SENSORS.to_string()))?
            .iter()
            .map(|s| {
                s.as_str()
                    .map(str::to_lowercase)
                    .ok_or_else(|| FlowError::InvalidInput(CONF_SENSORS.to_string()))
            })
            .collect::<Result<_, _>>()?;

        let unique_id = match self.status.get(KEY_SERIALNO) {
            Some(serial) if !serial.is_empty() => serial.clone(),
            _ => {
                let generated = Uuid::new_v4().to_string();
                info!(host = %self.host, "UPS reports no serial number, using {}", generated);
                generated
            }
        };
        ctx.set_unique_id(unique_id);

        let data = HashMap::from([
            (CONF_HOST.to_string(), json!(self.host)),
            (CONF_PORT.to_string(), json!(self.port)),
            (CONF_SENSORS.to_string(), json!(sensors)),
        ]);

        if let Some(abort) = ctx.abort_if_unique_id_configured(data.clone()).await? {
            return Ok(abort);
        }

        Ok(FlowResult::create_entry(self.host.clone(), data))
    }
}

#[async_trait]
impl ConfigFlow for ApcUpsdConfigFlow {
    async fn async_step(
        &mut self,
        step_id: &str,
        user_input: Option<FlowInput>,
        ctx: &mut FlowContext,
    ) -> FlowResultOutcome {
        match step_id {
            STEP_USER => self.step_user(user_input).await,
            STEP_SENSOR_SELECT => self.step_sensor_select(user_input, Some(ctx)).await,
            other => Err(FlowError::UnknownStep(other.to_string())),
        }
    }
}
