//! End to end tests for the apcupsd integration
//!
//! Every test talks to a fake NIS over loopback TCP, drives the config flow
//! through the flow manager and checks the entities the entry ends up with.

mod common;

use common::{FakeNis, TestHass, UPS_STATUS};
use ha_components::apcupsd::ApcUpsdConfig;
use ha_config_entries::{ConfigEntry, ConfigEntryState, EntrySetup, FlowResultType};
use ha_helpers::{CoordinatorHandle, Entity};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_test::{assert_err, assert_ok};

fn rendered(hass: &TestHass, entry_id: &str) -> HashMap<String, (String, Option<String>)> {
    hass.apcupsd
        .entities(entry_id)
        .iter()
        .map(|entity| {
            (
                entity.unique_id().unwrap(),
                (entity.render().state, entity.unit_of_measurement()),
            )
        })
        .collect()
}

#[tokio::test]
async fn test_flow_creates_loaded_entry_with_entities() {
    let nis = FakeNis::start(UPS_STATUS).await;
    let hass = TestHass::new();

    let done = hass
        .configure_apcupsd(nis.port, json!(["linev", "timeleft", "status"]))
        .await;
    assert_eq!(done.result_type, FlowResultType::CreateEntry);
    assert_eq!(done.title.as_deref(), Some("127.0.0.1"));

    let entry = hass.entries.get_by_unique_id("apcupsd", "AB1234").unwrap();
    assert_eq!(entry.state, ConfigEntryState::Loaded);

    let states = rendered(&hass, &entry.entry_id);
    assert_eq!(states.len(), 4);
    assert_eq!(states["AB1234_online_status"], ("on".to_string(), None));
    assert_eq!(
        states["AB1234_linev"],
        ("230.0".to_string(), Some("V".to_string()))
    );
    assert_eq!(
        states["AB1234_timeleft"],
        ("41.5".to_string(), Some("min".to_string()))
    );
    assert_eq!(states["AB1234_status"], ("ONLINE".to_string(), None));

    let names: Vec<String> = hass
        .apcupsd
        .entities(&entry.entry_id)
        .iter()
        .filter_map(|e| e.name())
        .collect();
    assert!(names.contains(&"Back-UPS ES 600 Status".to_string()));
    assert!(names.contains(&"Back-UPS ES 600 Input Voltage".to_string()));
}

#[tokio::test]
async fn test_cannot_connect_keeps_user_step() {
    // Bind then drop to get a port nobody listens on.
    let port = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let hass = TestHass::new();

    let form = hass.flows.start_flow("apcupsd").await.unwrap();
    let again = hass
        .flows
        .progress_flow(&form.flow_id, Some(json!({"host": "127.0.0.1", "port": port})))
        .await
        .unwrap();

    assert_eq!(again.step_id.as_deref(), Some("user"));
    assert_eq!(again.errors.unwrap()["base"], "cannot_connect");
    assert!(hass.entries.is_empty());
}

#[tokio::test]
async fn test_same_ups_updates_existing_entry() {
    let first_nis = FakeNis::start(UPS_STATUS).await;
    let second_nis = FakeNis::start(UPS_STATUS).await;
    let hass = TestHass::new();

    hass.configure_apcupsd(first_nis.port, json!(["linev"])).await;
    let entry = hass.entries.get_by_unique_id("apcupsd", "AB1234").unwrap();

    let again = hass
        .configure_apcupsd(second_nis.port, json!(["linev", "bcharge"]))
        .await;
    assert_eq!(again.result_type, FlowResultType::Abort);
    assert_eq!(again.reason.as_deref(), Some("already_configured"));
    assert_eq!(hass.entries.len(), 1);

    let updated = hass.entries.get(&entry.entry_id).unwrap();
    let config: ApcUpsdConfig = updated.data_as().unwrap();
    assert_eq!(config.port, second_nis.port);
    assert_eq!(config.sensors, vec!["linev", "bcharge"]);

    // The entry was reloaded against the new port.
    assert_eq!(updated.state, ConfigEntryState::Loaded);
    let states = rendered(&hass, &entry.entry_id);
    assert_eq!(
        states["AB1234_bcharge"],
        ("100.0".to_string(), Some("%".to_string()))
    );
}

#[tokio::test]
async fn test_daemon_outage_makes_entities_unavailable() {
    let nis = FakeNis::start(UPS_STATUS).await;
    let hass = TestHass::new();

    hass.configure_apcupsd(nis.port, json!(["linev"])).await;
    let entry = hass.entries.get_by_unique_id("apcupsd", "AB1234").unwrap();
    let runtime = hass.apcupsd.runtime(&entry.entry_id).unwrap();

    nis.set_status(None);
    runtime.coordinator.async_refresh().await;

    assert!(!runtime.coordinator.last_update_success());
    for entity in hass.apcupsd.entities(&entry.entry_id) {
        assert!(entity.render().is_unavailable());
    }
    // The last good snapshot is kept.
    assert_eq!(runtime.coordinator.data().unwrap()["LINEV"], "230.0 Volts");

    nis.set_status(Some(&UPS_STATUS.replace("0x05000008", "0x05000010")));
    runtime.coordinator.async_refresh().await;

    let states = rendered(&hass, &entry.entry_id);
    assert_eq!(states["AB1234_online_status"].0, "off");
}

#[tokio::test]
async fn test_unreachable_daemon_at_startup_retries_setup() {
    let nis = FakeNis::start(UPS_STATUS).await;
    nis.set_status(None);
    let hass = TestHass::new();

    let entry = hass
        .entries
        .add(
            ConfigEntry::new("apcupsd", "127.0.0.1")
                .with_unique_id("AB1234")
                .with_data(HashMap::from([
                    ("host".to_string(), json!("127.0.0.1")),
                    ("port".to_string(), json!(nis.port)),
                    ("sensors".to_string(), json!(["linev"])),
                ])),
        )
        .await
        .unwrap();

    assert_err!(hass.entries.setup(&entry.entry_id).await);
    let retrying = hass.entries.get(&entry.entry_id).unwrap();
    assert_eq!(retrying.state, ConfigEntryState::SetupRetry);
    assert!(hass.apcupsd.entities(&entry.entry_id).is_empty());

    nis.set_status(Some(UPS_STATUS));
    assert_ok!(hass.entries.setup(&entry.entry_id).await);
    assert_eq!(hass.apcupsd.entities(&entry.entry_id).len(), 2);
}

#[tokio::test]
async fn test_unload_stops_coordinator() {
    let nis = FakeNis::start(UPS_STATUS).await;
    let hass = TestHass::new();

    hass.configure_apcupsd(nis.port, json!(["linev"])).await;
    let entry = hass.entries.get_by_unique_id("apcupsd", "AB1234").unwrap();
    let runtime = hass.apcupsd.runtime(&entry.entry_id).unwrap();

    assert_ok!(hass.entries.unload(&entry.entry_id).await);

    assert!(runtime.coordinator.is_shutdown());
    assert!(hass.apcupsd.runtime(&entry.entry_id).is_none());
    assert_eq!(
        hass.entries.get(&entry.entry_id).unwrap().state,
        ConfigEntryState::NotLoaded
    );

    // A refresh after shutdown still reaches the daemon but its result is dropped.
    nis.set_status(Some(&UPS_STATUS.replace("230.0 Volts", "120.0 Volts")));
    let requests = nis.requests();
    runtime.coordinator.async_refresh().await;
    assert_eq!(nis.requests(), requests + 1);
    assert_eq!(runtime.coordinator.data().unwrap()["LINEV"], "230.0 Volts");
}

#[tokio::test]
async fn test_setup_of_loaded_entry_keeps_coordinator() {
    let nis = FakeNis::start(UPS_STATUS).await;
    let hass = TestHass::new();

    hass.configure_apcupsd(nis.port, json!(["linev"])).await;
    let entry = hass.entries.get_by_unique_id("apcupsd", "AB1234").unwrap();
    let runtime = hass.apcupsd.runtime(&entry.entry_id).unwrap();
    let requests = nis.requests();

    assert_ok!(hass.entries.setup(&entry.entry_id).await);

    let current = hass.apcupsd.runtime(&entry.entry_id).unwrap();
    assert!(Arc::ptr_eq(&runtime, &current));
    assert!(!runtime.coordinator.is_shutdown());
    assert_eq!(nis.requests(), requests);
}

#[tokio::test]
async fn test_second_setup_stops_replaced_coordinator() {
    let nis = FakeNis::start(UPS_STATUS).await;
    let hass = TestHass::new();

    hass.configure_apcupsd(nis.port, json!(["linev"])).await;
    let entry = hass.entries.get_by_unique_id("apcupsd", "AB1234").unwrap();
    let old = hass.apcupsd.runtime(&entry.entry_id).unwrap();

    assert_ok!(hass.apcupsd.setup_entry(&entry).await);

    let new = hass.apcupsd.runtime(&entry.entry_id).unwrap();
    assert!(!Arc::ptr_eq(&old, &new));
    assert!(old.coordinator.is_shutdown());
    assert!(!new.coordinator.is_shutdown());
}

#[tokio::test]
async fn test_entries_survive_restart() {
    let nis = FakeNis::start(UPS_STATUS).await;
    let hass = TestHass::new();
    hass.configure_apcupsd(nis.port, json!(["linev", "loadpct"])).await;

    let TestHass { dir, .. } = hass;
    let restarted = TestHass::in_dir(dir);
    restarted.entries.load().await.unwrap();

    let entry = restarted
        .entries
        .get_by_unique_id("apcupsd", "AB1234")
        .unwrap();
    assert_eq!(entry.state, ConfigEntryState::NotLoaded);

    let results = restarted.entries.setup_all().await;
    assert!(results.iter().all(Result::is_ok));
    let states = rendered(&restarted, &entry.entry_id);
    assert_eq!(
        states["AB1234_loadpct"],
        ("14.0".to_string(), Some("%".to_string()))
    );
}
