//! Shared base for apcupsd entities

use std::sync::Arc;

use ha_helpers::CoordinatorHandle;

use super::client::StatusSnapshot;
use super::constants::{DEFAULT_MODEL, KEY_MODEL};

/// Coordinator handle the entities read from
pub type StatusHandle = Arc<dyn CoordinatorHandle<StatusSnapshot>>;

/// State every apcupsd entity carries
pub struct ApcUpsdEntity {
    device_id: String,
    coordinator: StatusHandle,
    name: String,
    icon: String,
}

impl ApcUpsdEntity {
    /// `name` is prefixed with the UPS model from the current snapshot.
    pub fn new(
        device_id: impl Into<String>,
        coordinator: StatusHandle,
        name: &str,
        icon: impl Into<String>,
    ) -> Self {
        let name = format!("{} {}", model_name(coordinator.as_ref()), name);
        Self {
            device_id: device_id.into(),
            coordinator,
            name,
            icon: icon.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn icon(&self) -> &str {
        &self.icon
    }

    /// Available while the last refresh succeeded
    pub fn available(&self) -> bool {
        self.coordinator.last_update_success()
    }

    /// Raw value of a status field in the current snapshot
    pub fn field(&self, key: &str) -> Option<String> {
        self.coordinator.data()?.get(key).cloned()
    }

    /// Unique id for one of this device's entities
    pub fn unique_id_for(&self, suffix: &str) -> String {
        format!("{}_{}", self.device_id, suffix)
    }
}

fn model_name(coordinator: &dyn CoordinatorHandle<StatusSnapshot>) -> String {
    coordinator
        .data()
        .and_then(|status| status.get(KEY_MODEL).cloned())
        .unwrap_or_else(|| DEFAULT_MODEL.to_string())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use ha_helpers::{Listener, ListenerId};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::RwLock;

    /// Coordinator stand-in serving a fixed snapshot
    pub struct FixedStatus {
        pub status: RwLock<Option<Arc<StatusSnapshot>>>,
        pub success: AtomicBool,
    }

    impl FixedStatus {
        pub fn new(fields: &[(&str, &str)]) -> Arc<Self> {
            let status: StatusSnapshot = fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();
            Arc::new(Self {
                status: RwLock::new(Some(Arc::new(status))),
                success: AtomicBool::new(true),
            })
        }

        pub fn set_field(&self, key: &str, value: &str) {
            let mut guard = self.status.write().unwrap();
            let mut status = guard.as_deref().cloned().unwrap_or_default();
            status.insert(key.to_string(), value.to_string());
            *guard = Some(Arc::new(status));
        }
    }

    impl CoordinatorHandle<StatusSnapshot> for FixedStatus {
        fn data(&self) -> Option<Arc<StatusSnapshot>> {
            self.status.read().unwrap().clone()
        }

        fn last_update_success(&self) -> bool {
            self.success.load(Ordering::SeqCst)
        }

        fn add_listener(&self, _listener: Listener) -> ListenerId {
            unimplemented!("not needed by entity tests")
        }

        fn remove_listener(&self, _id: ListenerId) {}
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::FixedStatus;
    use super::*;
    use std::sync::atomic::Ordering;

    #[test]
    fn test_name_prefixed_with_model() {
        let status = FixedStatus::new(&[("MODEL", "Back-UPS ES 600")]);
        let entity = ApcUpsdEntity::new("AB1234", status, "Load", "mdi:gauge");

        assert_eq!(entity.name(), "Back-UPS ES 600 Load");
        assert_eq!(entity.unique_id_for("loadpct"), "AB1234_loadpct");
    }

    #[test]
    fn test_name_without_model() {
        let status = FixedStatus::new(&[("LINEV", "230.0 Volts")]);
        let entity = ApcUpsdEntity::new("entry", status, "Load", "mdi:gauge");

        assert_eq!(entity.name(), "UPS Load");
    }

    #[test]
    fn test_availability_follows_coordinator() {
        let status = FixedStatus::new(&[]);
        let entity = ApcUpsdEntity::new("entry", status.clone(), "Status", "mdi:x");

        assert!(entity.available());
        status.success.store(false, Ordering::SeqCst);
        assert!(!entity.available());
    }
}
