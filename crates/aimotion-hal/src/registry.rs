//! [`DroneRegistry`] – lookup of drone drivers by identifier.
//!
//! The registry stores one [`SharedDrone`] handle per drone.  The protocol
//! server resolves its configured drone id through the registry once per
//! session; every caller then goes through the same per-drone mutex.

use std::collections::HashMap;
use std::sync::Arc;

use aimotion_types::AimError;
use tokio::sync::Mutex;

use crate::drone::{Drone, SharedDrone};

#[derive(Default, Clone)]
pub struct DroneRegistry {
    drones: HashMap<String, SharedDrone>,
}

impl DroneRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a drone driver under its own [`Drone::id`].  Any previously
    /// registered driver with the same id is replaced.
    pub fn register(&mut self, drone: impl Drone + 'static) -> SharedDrone {
        let id = drone.id().to_string();
        let shared: SharedDrone = Arc::new(Mutex::new(drone));
        self.drones.insert(id, Arc::clone(&shared));
        shared
    }

    /// Register an already shared handle under `id`.
    pub fn register_shared(&mut self, id: impl Into<String>, drone: SharedDrone) {
        self.drones.insert(id.into(), drone);
    }

    /// Look up the drone registered as `id`.
    ///
    /// # Errors
    ///
    /// Returns [`AimError::Device`] when no such drone is registered.
    pub fn get(&self, id: &str) -> Result<SharedDrone, AimError> {
        self.drones
            .get(id)
            .cloned()
            .ok_or_else(|| AimError::device(id, format!("drone '{id}' is not registered")))
    }

    pub fn len(&self) -> usize {
        self.drones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drones.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimDrone;

    #[tokio::test]
    async fn register_and_get() {
        let mut registry = DroneRegistry::new();
        registry.register(SimDrone::new("04"));

        let drone = registry.get("04").unwrap();
        assert_eq!(drone.lock().await.id(), "04");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn missing_drone_returns_error() {
        let registry = DroneRegistry::new();
        assert!(matches!(registry.get("07"), Err(AimError::Device { .. })));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn re_registering_replaces_old_driver() {
        let mut registry = DroneRegistry::new();
        registry.register(SimDrone::new("04"));
        registry.register(SimDrone::new("04").airborne_in_show());

        let drone = registry.get("04").unwrap();
        let status = drone.lock().await.status().await.unwrap();
        assert!(status.airborne);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn shared_handle_reaches_same_driver() {
        let sim = Arc::new(Mutex::new(SimDrone::new("04")));
        let mut registry = DroneRegistry::new();
        registry.register_shared("04", sim.clone());

        registry.get("04").unwrap().lock().await.land().await.unwrap();
        assert_eq!(sim.lock().await.commands().len(), 1);
    }
}
