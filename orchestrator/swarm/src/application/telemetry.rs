// Copyright (c) 2026 Helix Swarm Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Telemetry Tasks
//!
//! Moves the vehicle's own telemetry into the shared pose table and out onto
//! the bus.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Ingestion:** one task per driver stream; each task writes only its own
//!   fields of the own-agent pose and blocks on the next sample
//! - **Publication:** `{id}/T` on a fixed interval, `{id}/B` on a slow timer,
//!   flight mode and arm status whenever they change

use futures::stream::{BoxStream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use helix_core::domain::agent::{AgentId, FlightMode};
use helix_core::domain::driver::VehicleDriver;
use helix_core::domain::pose::{SharedPoseTable, TelemetryFrame};
use helix_core::domain::protocol::Topic;
use helix_core::domain::transport::{Message, Transport};
use helix_core::infrastructure::codec;

/// Everything a telemetry task needs about the agent it serves.
#[derive(Clone)]
pub struct TelemetryContext {
    pub agent_id: AgentId,
    pub driver: Arc<dyn VehicleDriver>,
    pub transport: Arc<dyn Transport>,
    pub table: SharedPoseTable,
    pub cancel: CancellationToken,
}

async fn publish_quietly(transport: &dyn Transport, message: Message) -> bool {
    let topic = message.topic.clone();
    match transport.publish(message).await {
        Ok(()) => true,
        Err(e) => {
            // Expected while the link is down; the link monitor owns that case.
            debug!(%topic, "Publish failed: {}", e);
            false
        }
    }
}

/// Drive `stream` until it ends or `cancel` fires. `apply` writes the sample
/// into the table and may return a message to publish.
fn spawn_ingest<T, F>(
    kind: &'static str,
    mut stream: BoxStream<'static, T>,
    transport: Arc<dyn Transport>,
    cancel: CancellationToken,
    mut apply: F,
) -> JoinHandle<()>
where
    T: Send + 'static,
    F: FnMut(T) -> Option<Message> + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                sample = stream.next() => match sample {
                    Some(sample) => {
                        if let Some(message) = apply(sample) {
                            publish_quietly(transport.as_ref(), message).await;
                        }
                    }
                    None => {
                        warn!(kind, "Telemetry stream ended");
                        break;
                    }
                },
            }
        }
        debug!(kind, "Ingestion task stopped");
    })
}

/// Spawn one ingestion task per driver stream.
pub fn spawn_ingestion(ctx: &TelemetryContext) -> Vec<JoinHandle<()>> {
    let id = ctx.agent_id.clone();
    let mut handles = Vec::with_capacity(7);

    let (table, own) = (ctx.table.clone(), id.clone());
    handles.push(spawn_ingest(
        "position",
        ctx.driver.position(),
        ctx.transport.clone(),
        ctx.cancel.clone(),
        move |sample| {
            table.update_position(&own, sample.geodetic, sample.ned);
            None
        },
    ));

    let (table, own) = (ctx.table.clone(), id.clone());
    handles.push(spawn_ingest(
        "velocity",
        ctx.driver.velocity(),
        ctx.transport.clone(),
        ctx.cancel.clone(),
        move |velocity| {
            table.update_velocity(&own, velocity);
            None
        },
    ));

    let (table, own) = (ctx.table.clone(), id.clone());
    handles.push(spawn_ingest(
        "heading",
        ctx.driver.heading(),
        ctx.transport.clone(),
        ctx.cancel.clone(),
        move |heading| {
            table.update_heading(&own, heading);
            None
        },
    ));

    let (table, own) = (ctx.table.clone(), id.clone());
    let mut last_armed: Option<bool> = None;
    handles.push(spawn_ingest(
        "armed",
        ctx.driver.armed(),
        ctx.transport.clone(),
        ctx.cancel.clone(),
        move |armed| {
            table.update_armed(&own, armed);
            if last_armed == Some(armed) {
                return None;
            }
            last_armed = Some(armed);
            Some(Message::new(
                Topic::ArmStatus(own.clone()).to_string(),
                codec::encode_arm_status(armed),
            ))
        },
    ));

    let (table, own) = (ctx.table.clone(), id.clone());
    let mut last_mode: Option<FlightMode> = None;
    handles.push(spawn_ingest(
        "flight_mode",
        ctx.driver.flight_mode(),
        ctx.transport.clone(),
        ctx.cancel.clone(),
        move |mode| {
            table.update_flight_mode(&own, mode.clone());
            if last_mode.as_ref() == Some(&mode) {
                return None;
            }
            let payload = codec::encode_flight_mode(&mode);
            last_mode = Some(mode);
            Some(Message::new(Topic::FlightMode(own.clone()).to_string(), payload))
        },
    ));

    let (table, own) = (ctx.table.clone(), id.clone());
    handles.push(spawn_ingest(
        "battery",
        ctx.driver.battery(),
        ctx.transport.clone(),
        ctx.cancel.clone(),
        move |percent| {
            table.update_battery(&own, percent);
            None
        },
    ));

    let (table, own) = (ctx.table.clone(), id);
    handles.push(spawn_ingest(
        "gps_time",
        ctx.driver.gps_time(),
        ctx.transport.clone(),
        ctx.cancel.clone(),
        move |gps_time_us| {
            table.update_gps_time(&own, gps_time_us);
            None
        },
    ));

    handles
}

/// Publish the own pose on `{id}/T` every `period`.
///
/// An overrun fires the next tick immediately; missed ticks are not replayed.
pub fn spawn_pose_publisher(ctx: &TelemetryContext, period: Duration) -> JoinHandle<()> {
    let ctx = ctx.clone();
    tokio::spawn(async move {
        let topic = Topic::Telemetry(ctx.agent_id.clone()).to_string();
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ctx.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let Some(pose) = ctx.table.get(&ctx.agent_id) else {
                        continue;
                    };
                    let frame = TelemetryFrame {
                        geodetic: pose.geodetic,
                        position: pose.position,
                        velocity: pose.velocity,
                        heading_deg: pose.heading_deg,
                    };
                    let message = Message::new(topic.clone(), codec::encode_telemetry(&frame));
                    if publish_quietly(ctx.transport.as_ref(), message).await {
                        metrics::counter!("helix_telemetry_published_total").increment(1);
                    }
                }
            }
        }
        debug!(agent_id = %ctx.agent_id, "Pose publisher stopped");
    })
}

/// Publish the latest battery level on `{id}/B` every `period`.
pub fn spawn_battery_publisher(ctx: &TelemetryContext, period: Duration) -> JoinHandle<()> {
    let ctx = ctx.clone();
    tokio::spawn(async move {
        let topic = Topic::Battery(ctx.agent_id.clone()).to_string();
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ctx.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let battery = ctx.table.get(&ctx.agent_id).and_then(|p| p.battery_percent);
                    if let Some(percent) = battery {
                        let message = Message::new(topic.clone(), codec::encode_battery(percent));
                        publish_quietly(ctx.transport.as_ref(), message).await;
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use helix_core::domain::geodesy::{GeodeticPosition, LocalFrame};
    use helix_core::domain::geometry::Vec3;
    use helix_core::domain::transport::SessionOptions;
    use helix_core::infrastructure::broker::InMemoryBroker;
    use helix_core::infrastructure::sim_vehicle::SimulatedVehicle;

    #[tokio::test(start_paused = true)]
    async fn test_ingestion_and_publication() {
        let broker = InMemoryBroker::new();
        let agent = broker.client();
        agent.connect(SessionOptions::new("P101")).await.unwrap();
        let watcher = broker.client();
        watcher.connect(SessionOptions::new("watcher")).await.unwrap();
        watcher.subscribe("P101/#").await.unwrap();

        let cancel = CancellationToken::new();
        let frame = LocalFrame::new(GeodeticPosition::new(51.0, -2.0, 50.0));
        let vehicle = SimulatedVehicle::spawn(frame, Vec3::new(4.0, 0.0, 0.0), cancel.clone());
        let id = AgentId::new("P101").unwrap();
        let ctx = TelemetryContext {
            agent_id: id.clone(),
            driver: Arc::new(vehicle),
            transport: Arc::new(agent),
            table: SharedPoseTable::new(),
            cancel: cancel.clone(),
        };

        let mut handles = spawn_ingestion(&ctx);
        handles.push(spawn_pose_publisher(&ctx, Duration::from_millis(100)));
        handles.push(spawn_battery_publisher(&ctx, Duration::from_millis(100)));
        tokio::time::sleep(Duration::from_millis(250)).await;

        let pose = ctx.table.get(&id).unwrap();
        assert_eq!(pose.position, Vec3::new(4.0, 0.0, 0.0));
        assert!(pose.gps_time_us > 0);
        assert_eq!(pose.flight_mode, FlightMode::Ready);

        let mut topics = Vec::new();
        while let Ok(Ok(message)) =
            tokio::time::timeout(Duration::from_millis(10), watcher.recv()).await
        {
            topics.push(message.topic);
        }
        assert!(topics.iter().any(|t| t == "P101/T"));
        assert!(topics.iter().any(|t| t == "P101/B"));
        assert_eq!(topics.iter().filter(|t| *t == "P101/flight_mode").count(), 1);
        assert_eq!(topics.iter().filter(|t| *t == "P101/telemetry/arm_status").count(), 1);

        cancel.cancel();
        for handle in handles {
            handle.await.unwrap();
        }
    }
}
