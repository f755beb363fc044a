//! # Industrial Sensor Bridge
//!
//! A simulated industrial sensor device with a dual-cadence cloud telemetry
//! bridge: readings advance on a fast local tick behind a process-control
//! protocol endpoint, while an independent slower cycle samples them over
//! that protocol and republishes to a cloud ingestion service over MQTT.
//!
//! ## Features
//!
//! - **Simulated field device**: bounded random readings for temperature and
//!   pressure, advanced on a configurable tick
//! - **Local protocol endpoint**: point reads/writes served over TCP as
//!   newline-delimited JSON, addressed by stable node ids
//! - **Cloud link**: persistent, mutually authenticated MQTT connection with
//!   at-least-once publishing and an explicit connection state machine
//! - **Per-cycle failure isolation**: a failed sample or publish skips the
//!   cycle, never the loop
//! - **Provisioning glue**: idempotent identity/policy/credential setup that
//!   produces the config descriptor the bridge consumes
//!
//! ## Quick Start
//!
//! ```rust
//! use sensorbridge::{Message, Reading};
//!
//! let reading = Reading { temperature: 21.46678, pressure: 1.01234 };
//! let message = Message::from_reading(1_700_000_000.0, &reading);
//!
//! assert_eq!(message.temperature, 21.47);
//! assert_eq!(message.pressure, 1.01);
//! ```
//!
//! ## Architecture
//!
//! - [`points`] - Point table and the single-writer value store
//! - [`device`] - Simulated device and its fast tick
//! - [`server`] - Local protocol endpoint (TCP, line-delimited JSON)
//! - [`sampler`] - Protocol client sampling complete readings
//! - [`cloud`] - Cloud link lifecycle and publishing
//! - [`bridge`] - Slow-cycle orchestration and failure isolation
//! - [`config`] - Config descriptor and runtime settings
//! - [`provision`] - One-time identity/credential setup glue

#![deny(warnings)]
#![deny(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod bridge;
pub mod cloud;
pub mod config;
pub mod device;
pub mod points;
pub mod provision;
pub mod sampler;
pub mod server;

// Re-export main public types for convenience
pub use bridge::{Bridge, BridgeStats, Message};
pub use cloud::{CloudLink, ConnectError, ConnectionState, PublishError, TelemetrySink};
pub use config::{BridgeSettings, CloudConfig, Endpoint};
pub use device::SimulatedDevice;
pub use points::{Point, PointStore, Reading};
pub use sampler::{PointSampler, SampleError, Sampler};
pub use server::{NodeIds, PointRegistry, PointServer};
