use crate::points::{PointStore, StoreError};
use crate::server::{NodeIds, PointRegistry, RegistryError};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub const TEMPERATURE_POINT: &str = "Temperature";
pub const PRESSURE_POINT: &str = "Pressure";

pub const TEMPERATURE_CENTER_C: f64 = 20.0;
pub const TEMPERATURE_SPAN_C: f64 = 5.0;
pub const PRESSURE_CENTER_BAR: f64 = 1.0;
pub const PRESSURE_SPAN_BAR: f64 = 0.1;

/// Simulated field device: owns the point store and advances every point on
/// a fast local tick. The tick never touches the network; everything
/// downstream observes the device through the protocol server.
pub struct SimulatedDevice {
    store: Arc<PointStore>,
    tick_interval: Duration,
}

impl SimulatedDevice {
    pub fn new(store: Arc<PointStore>, tick_interval: Duration) -> Self {
        Self { store, tick_interval }
    }

    /// Create the device's points with their nominal initial values.
    pub async fn init(&self) -> Result<(), StoreError> {
        self.store
            .register(TEMPERATURE_POINT, TEMPERATURE_CENTER_C, true)
            .await?;
        self.store
            .register(PRESSURE_POINT, PRESSURE_CENTER_BAR, true)
            .await?;
        Ok(())
    }

    /// Register each point on the protocol server under a stable node id, so
    /// clients can address readings without knowing the storage layout.
    pub fn expose(&self, registry: &mut PointRegistry) -> Result<NodeIds, RegistryError> {
        let temperature = registry.register(TEMPERATURE_POINT)?;
        let pressure = registry.register(PRESSURE_POINT)?;
        Ok(NodeIds { temperature, pressure })
    }

    /// Draw the next value for every point. Each tick is an independent
    /// uniform draw around the fixed center; there is no inertia between
    /// ticks. Value generation cannot fail.
    pub async fn advance(&self) {
        let (temperature, pressure) = {
            let mut rng = rand::rng();
            (
                TEMPERATURE_CENTER_C + rng.random_range(-TEMPERATURE_SPAN_C..=TEMPERATURE_SPAN_C),
                PRESSURE_CENTER_BAR + rng.random_range(-PRESSURE_SPAN_BAR..=PRESSURE_SPAN_BAR),
            )
        };

        // Points exist for the process lifetime once init() ran; a missing
        // point here is a wiring bug, not a runtime condition.
        let _ = self.store.write(TEMPERATURE_POINT, temperature).await;
        let _ = self.store.write(PRESSURE_POINT, pressure).await;

        info!(
            "local sensor data updated: temperature = {:.2} °C, pressure = {:.2} bar",
            temperature, pressure
        );
    }

    /// Fast-tick task body. Runs until the cancellation token fires.
    pub async fn run(self, cancel: CancellationToken) {
        let mut interval = time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }
            self.advance().await;
        }
        info!("device tick stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_generated_values_stay_in_bounds() {
        let store = Arc::new(PointStore::new());
        let device = SimulatedDevice::new(Arc::clone(&store), Duration::from_millis(10));
        device.init().await.unwrap();

        for _ in 0..200 {
            device.advance().await;
            let temperature = store.read(TEMPERATURE_POINT).await.unwrap();
            let pressure = store.read(PRESSURE_POINT).await.unwrap();
            assert!((15.0..=25.0).contains(&temperature), "temperature {temperature} out of range");
            assert!((0.9..=1.1).contains(&pressure), "pressure {pressure} out of range");
        }
    }

    #[tokio::test]
    async fn test_init_registers_both_points_once() {
        let store = Arc::new(PointStore::new());
        let device = SimulatedDevice::new(Arc::clone(&store), Duration::from_millis(10));
        device.init().await.unwrap();
        assert!(device.init().await.is_err());

        let snapshot = store.snapshot().await;
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.iter().all(|p| p.writable));
    }
}
