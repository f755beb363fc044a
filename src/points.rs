use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

pub const MAX_POINTS: usize = 8;

pub type PointTable = heapless::Vec<Point, MAX_POINTS>;

/// A named, typed, mutable measurement slot exposed by the simulated device.
/// Identity is the name; points live for the process lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Point {
    pub name: String,
    pub value: f64,
    pub writable: bool,
}

/// Snapshot of one complete sample cycle. Only produced when every tracked
/// point was read successfully.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub temperature: f64,
    pub pressure: f64,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("point table full ({MAX_POINTS} slots)")]
    TableFull,
    #[error("point `{0}` already registered")]
    Duplicate(String),
    #[error("unknown point `{0}`")]
    Unknown(String),
    #[error("point `{0}` is not writable")]
    ReadOnly(String),
}

/// Current value of each simulated measurement. One designated writer (the
/// device tick) mutates values; the protocol server reads concurrently.
#[derive(Debug, Default)]
pub struct PointStore {
    points: RwLock<PointTable>,
}

impl PointStore {
    pub fn new() -> Self {
        Self {
            points: RwLock::new(heapless::Vec::new()),
        }
    }

    /// Register a point at device initialization. Fails when the bounded
    /// table is full or the name is already taken.
    pub async fn register(&self, name: &str, initial: f64, writable: bool) -> Result<(), StoreError> {
        let mut points = self.points.write().await;
        if points.iter().any(|p| p.name == name) {
            return Err(StoreError::Duplicate(name.to_string()));
        }
        points
            .push(Point {
                name: name.to_string(),
                value: initial,
                writable,
            })
            .map_err(|_| StoreError::TableFull)
    }

    pub async fn read(&self, name: &str) -> Result<f64, StoreError> {
        let points = self.points.read().await;
        points
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.value)
            .ok_or_else(|| StoreError::Unknown(name.to_string()))
    }

    /// Overwrite a point's value. Used by the device tick; external writes
    /// arriving over the protocol must go through `write_external`.
    pub async fn write(&self, name: &str, value: f64) -> Result<(), StoreError> {
        let mut points = self.points.write().await;
        let point = points
            .iter_mut()
            .find(|p| p.name == name)
            .ok_or_else(|| StoreError::Unknown(name.to_string()))?;
        point.value = value;
        Ok(())
    }

    /// Write on behalf of a protocol client; rejected for read-only points.
    pub async fn write_external(&self, name: &str, value: f64) -> Result<(), StoreError> {
        let mut points = self.points.write().await;
        let point = points
            .iter_mut()
            .find(|p| p.name == name)
            .ok_or_else(|| StoreError::Unknown(name.to_string()))?;
        if !point.writable {
            return Err(StoreError::ReadOnly(name.to_string()));
        }
        point.value = value;
        Ok(())
    }

    pub async fn snapshot(&self) -> PointTable {
        self.points.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_and_read() {
        let store = PointStore::new();
        store.register("Temperature", 20.0, true).await.unwrap();
        assert_eq!(store.read("Temperature").await.unwrap(), 20.0);
    }

    #[tokio::test]
    async fn test_duplicate_registration_rejected() {
        let store = PointStore::new();
        store.register("Temperature", 20.0, true).await.unwrap();
        let result = store.register("Temperature", 21.0, true).await;
        assert!(matches!(result, Err(StoreError::Duplicate(_))));
    }

    #[tokio::test]
    async fn test_unknown_point_read() {
        let store = PointStore::new();
        let result = store.read("Flow").await;
        assert!(matches!(result, Err(StoreError::Unknown(_))));
    }

    #[tokio::test]
    async fn test_external_write_respects_writable_flag() {
        let store = PointStore::new();
        store.register("Pressure", 1.0, true).await.unwrap();
        store.register("Serial", 42.0, false).await.unwrap();

        store.write_external("Pressure", 1.05).await.unwrap();
        assert_eq!(store.read("Pressure").await.unwrap(), 1.05);

        let result = store.write_external("Serial", 0.0).await;
        assert!(matches!(result, Err(StoreError::ReadOnly(_))));

        // The device-side writer is not subject to the flag
        store.write("Serial", 43.0).await.unwrap();
        assert_eq!(store.read("Serial").await.unwrap(), 43.0);
    }

    #[tokio::test]
    async fn test_table_capacity_bounded() {
        let store = PointStore::new();
        for i in 0..MAX_POINTS {
            store.register(&format!("P{i}"), 0.0, true).await.unwrap();
        }
        let result = store.register("Overflow", 0.0, true).await;
        assert!(matches!(result, Err(StoreError::TableFull)));
    }
}
