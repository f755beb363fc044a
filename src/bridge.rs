use crate::cloud::{ConnectionState, TelemetrySink};
use crate::points::Reading;
use crate::sampler::Sampler;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Wire payload published to the cloud endpoint. Values are rounded to two
/// decimals at construction; the serialized JSON is the contract with the
/// consumer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub timestamp: f64,
    pub temperature: f64,
    pub pressure: f64,
}

impl Message {
    pub fn from_reading(timestamp: f64, reading: &Reading) -> Self {
        Self {
            timestamp,
            temperature: round2(reading.temperature),
            pressure: round2(reading.pressure),
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct BridgeStats {
    pub cycles: u32,
    pub published: u32,
    pub sample_failures: u32,
    pub publish_failures: u32,
    pub connect_attempts: u32,
}

/// Orchestrates the slow publish cadence: sample over the protocol, build a
/// message, push it over the cloud link. Each cycle's failure is isolated;
/// only startup conditions are allowed to be fatal, and those are decided by
/// the caller before the loop starts.
pub struct Bridge<S: Sampler, L: TelemetrySink> {
    sampler: S,
    link: L,
    publish_interval: Duration,
    stats: BridgeStats,
}

impl<S: Sampler, L: TelemetrySink> Bridge<S, L> {
    pub fn new(sampler: S, link: L, publish_interval: Duration) -> Self {
        Self {
            sampler,
            link,
            publish_interval,
            stats: BridgeStats::default(),
        }
    }

    pub fn stats(&self) -> &BridgeStats {
        &self.stats
    }

    /// One bridge cycle. Never returns an error: every failure is logged,
    /// counted, and left behind when the next cycle starts.
    async fn run_cycle(&mut self) {
        self.stats.cycles += 1;

        // The link never retries on its own; the cycle is the retry cadence.
        if self.link.state() != ConnectionState::Connected {
            self.stats.connect_attempts += 1;
            if let Err(e) = self.link.connect().await {
                warn!("cloud connect failed: {}", e);
            }
        }

        let reading = match self.sampler.read_all().await {
            Ok(reading) => reading,
            Err(e) => {
                self.stats.sample_failures += 1;
                warn!("sample failed, skipping cycle: {}", e);
                return;
            }
        };

        let message = Message::from_reading(unix_now(), &reading);
        match self.link.publish(&message).await {
            Ok(()) => {
                self.stats.published += 1;
                info!(
                    "published telemetry: temperature = {:.2}, pressure = {:.2}",
                    message.temperature, message.pressure
                );
            }
            Err(e) => {
                self.stats.publish_failures += 1;
                warn!("publish failed, message dropped: {}", e);
            }
        }
    }

    /// Publish loop. The interval is measured from cycle start, so a slow
    /// cycle delays but never bursts the message rate. On cancellation the
    /// link is disconnected exactly once before returning.
    pub async fn run(mut self, cancel: CancellationToken) -> BridgeStats {
        let mut interval = time::interval(self.publish_interval);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }
            self.run_cycle().await;
        }

        self.link.disconnect().await;
        info!(
            "bridge stopped after {} cycles ({} published)",
            self.stats.cycles, self.stats.published
        );
        self.stats
    }
}
