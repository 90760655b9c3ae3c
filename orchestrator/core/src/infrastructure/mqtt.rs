// Copyright (c) 2026 Helix Swarm Contributors
// SPDX-License-Identifier: AGPL-3.0

//! MQTT transport
//!
//! [`Transport`] over a real MQTT broker, so that every agent and the ground
//! station can run as a separate process. The session's last will, retained
//! messages and wildcard filters are handled by the broker itself; this
//! adapter only maps them onto `rumqttc`.
//!
//! A background task drives the `rumqttc` event loop. It forwards inbound
//! publishes, mirrors the link state into [`Transport::link_state`] and
//! re-issues every subscription after a reconnect, since sessions are clean.

use async_trait::async_trait;
use parking_lot::Mutex;
use rumqttc::{AsyncClient, Event, EventLoop, LastWill, MqttOptions, Outgoing, Packet, QoS};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::node_config::BrokerSettings;
use crate::domain::protocol::{ConnectionStatus, Topic};
use crate::domain::transport::{
    validate_filter, Message, SessionOptions, Transport, TransportError,
};

const REQUEST_CAPACITY: usize = 64;
const DISCONNECT_GRACE: Duration = Duration::from_secs(1);

struct Session {
    client: AsyncClient,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub struct MqttTransport {
    settings: BrokerSettings,
    session: Mutex<Option<Session>>,
    filters: Arc<Mutex<Vec<String>>>,
    receiver: tokio::sync::Mutex<Option<mpsc::UnboundedReceiver<Message>>>,
    link: watch::Sender<ConnectionStatus>,
}

impl MqttTransport {
    pub fn new(settings: BrokerSettings) -> Self {
        let (link, _) = watch::channel(ConnectionStatus::Disconnected);
        Self {
            settings,
            session: Mutex::new(None),
            filters: Arc::new(Mutex::new(Vec::new())),
            receiver: tokio::sync::Mutex::new(None),
            link,
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.settings.host, self.settings.port)
    }

    fn client(&self) -> Result<AsyncClient, TransportError> {
        let client = self
            .session
            .lock()
            .as_ref()
            .map(|s| s.client.clone())
            .ok_or(TransportError::NotConnected)?;
        if *self.link.borrow() != ConnectionStatus::Connected {
            return Err(TransportError::LinkDown);
        }
        Ok(client)
    }

    async fn close(session: Session) {
        if let Err(e) = session.client.disconnect().await {
            debug!(error = %e, "Disconnect request not queued");
        }
        let mut task = session.task;
        if tokio::time::timeout(DISCONNECT_GRACE, &mut task).await.is_err() {
            session.cancel.cancel();
            let _ = task.await;
        }
    }
}

/// Broker options for one session.
pub fn mqtt_options(settings: &BrokerSettings, options: &SessionOptions) -> MqttOptions {
    let mut mqtt = MqttOptions::new(&options.client_id, &settings.host, settings.port);
    mqtt.set_keep_alive(settings.keep_alive);
    mqtt.set_clean_session(true);
    if let Some(will) = &options.last_will {
        mqtt.set_last_will(LastWill::new(
            &will.topic,
            will.payload.to_vec(),
            QoS::AtLeastOnce,
            will.retained,
        ));
    }
    mqtt
}

/// High-rate telemetry is fire-and-forget; commands and state must arrive.
pub fn qos_for(topic: &str) -> QoS {
    match Topic::from_str(topic) {
        Ok(Topic::Telemetry(_))
        | Ok(Topic::Battery(_))
        | Ok(Topic::FlightMode(_))
        | Ok(Topic::ArmStatus(_))
        | Ok(Topic::Detection) => QoS::AtMostOnce,
        _ => QoS::AtLeastOnce,
    }
}

fn broker_error(error: impl std::fmt::Display) -> TransportError {
    TransportError::Broker(error.to_string())
}

struct EventLoopTask {
    eventloop: EventLoop,
    client: AsyncClient,
    filters: Arc<Mutex<Vec<String>>>,
    inbound: mpsc::UnboundedSender<Message>,
    link: watch::Sender<ConnectionStatus>,
    reconnect_delay: Duration,
    cancel: CancellationToken,
}

impl EventLoopTask {
    async fn run(mut self) {
        loop {
            let event = tokio::select! {
                _ = self.cancel.cancelled() => break,
                event = self.eventloop.poll() => event,
            };
            match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    self.resubscribe();
                    self.link.send_replace(ConnectionStatus::Connected);
                    info!("Broker session established");
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let message = Message {
                        topic: publish.topic,
                        payload: publish.payload,
                        retained: publish.retain,
                    };
                    if self.inbound.send(message).is_err() {
                        break;
                    }
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
                Ok(_) => {}
                Err(e) => {
                    let previous = self.link.send_replace(ConnectionStatus::Disconnected);
                    if previous == ConnectionStatus::Connected {
                        warn!(error = %e, "Broker link lost");
                    } else {
                        debug!(error = %e, "Broker connection attempt failed");
                    }
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.reconnect_delay) => {}
                    }
                }
            }
        }
        self.link.send_replace(ConnectionStatus::Disconnected);
    }

    fn resubscribe(&self) {
        for filter in self.filters.lock().iter() {
            if let Err(e) = self.client.try_subscribe(filter.as_str(), QoS::AtLeastOnce) {
                warn!(%filter, error = %e, "Failed to restore subscription");
            }
        }
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn connect(&self, options: SessionOptions) -> Result<(), TransportError> {
        let previous = self.session.lock().take();
        if let Some(previous) = previous {
            Self::close(previous).await;
        }

        let (client, eventloop) =
            AsyncClient::new(mqtt_options(&self.settings, &options), REQUEST_CAPACITY);
        let (inbound, receiver) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(
            EventLoopTask {
                eventloop,
                client: client.clone(),
                filters: self.filters.clone(),
                inbound,
                link: self.link.clone(),
                reconnect_delay: self.settings.reconnect_delay,
                cancel: cancel.clone(),
            }
            .run(),
        );
        *self.receiver.lock().await = Some(receiver);
        *self.session.lock() = Some(Session {
            client,
            cancel,
            task,
        });

        let mut link = self.link.subscribe();
        let established = matches!(
            tokio::time::timeout(
                self.settings.connect_timeout,
                link.wait_for(|status| *status == ConnectionStatus::Connected),
            )
            .await,
            Ok(Ok(_))
        );
        if !established {
            if let Some(session) = self.session.lock().take() {
                session.cancel.cancel();
            }
            return Err(TransportError::Broker(format!(
                "no session with {} within {:?}",
                self.endpoint(),
                self.settings.connect_timeout
            )));
        }
        debug!(client_id = %options.client_id, endpoint = %self.endpoint(), "Session connected");
        Ok(())
    }

    async fn publish(&self, message: Message) -> Result<(), TransportError> {
        let client = self.client()?;
        let qos = qos_for(&message.topic);
        client
            .publish(message.topic, qos, message.retained, message.payload.to_vec())
            .await
            .map_err(broker_error)
    }

    /// Filters are remembered for the life of the transport. While the link
    /// is down the filter is only recorded and takes effect on reconnect.
    async fn subscribe(&self, filter: &str) -> Result<(), TransportError> {
        validate_filter(filter)?;
        let client = match self.client() {
            Ok(client) => Some(client),
            Err(TransportError::LinkDown) => None,
            Err(e) => return Err(e),
        };
        {
            let mut filters = self.filters.lock();
            if !filters.iter().any(|f| f == filter) {
                filters.push(filter.to_string());
            }
        }
        match client {
            Some(client) => client
                .subscribe(filter, QoS::AtLeastOnce)
                .await
                .map_err(broker_error),
            None => Ok(()),
        }
    }

    async fn recv(&self) -> Result<Message, TransportError> {
        let mut guard = self.receiver.lock().await;
        let receiver = guard.as_mut().ok_or(TransportError::NotConnected)?;
        receiver.recv().await.ok_or(TransportError::Closed)
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let session = self.session.lock().take().ok_or(TransportError::NotConnected)?;
        Self::close(session).await;
        self.link.send_replace(ConnectionStatus::Disconnected);
        Ok(())
    }

    fn link_state(&self) -> watch::Receiver<ConnectionStatus> {
        self.link.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn settings(port: u16) -> BrokerSettings {
        BrokerSettings {
            host: "127.0.0.1".to_string(),
            port,
            connect_timeout: Duration::from_millis(300),
            reconnect_delay: Duration::from_millis(50),
            ..BrokerSettings::default()
        }
    }

    #[test]
    fn test_options_carry_endpoint_and_last_will() {
        let will = Message::new("P101/connection_status", "Disconnected").retained();
        let options = SessionOptions::new("P101").with_last_will(will);
        let mqtt = mqtt_options(&BrokerSettings::default(), &options);

        assert_eq!(mqtt.client_id(), "P101");
        assert_eq!(mqtt.broker_address(), ("localhost".to_string(), 1883));
        assert_eq!(mqtt.keep_alive(), Duration::from_secs(5));
        assert!(mqtt.clean_session());

        let will = mqtt.last_will().unwrap();
        assert_eq!(will.topic, "P101/connection_status");
        assert!(will.retain);
        assert_eq!(will.qos, QoS::AtLeastOnce);

        let plain = mqtt_options(&BrokerSettings::default(), &SessionOptions::new("GS"));
        assert!(plain.last_will().is_none());
    }

    #[test]
    fn test_telemetry_is_fire_and_forget() {
        assert_eq!(qos_for("P101/T"), QoS::AtMostOnce);
        assert_eq!(qos_for("P101/B"), QoS::AtMostOnce);
        assert_eq!(qos_for("detection"), QoS::AtMostOnce);
        assert_eq!(qos_for("commands/P101"), QoS::AtLeastOnce);
        assert_eq!(qos_for("P101/status"), QoS::AtLeastOnce);
        assert_eq!(qos_for("emergency_stop"), QoS::AtLeastOnce);
        assert_eq!(qos_for("not/a/known/topic"), QoS::AtLeastOnce);
    }

    #[tokio::test]
    async fn test_operations_before_connect_fail() {
        let transport = MqttTransport::new(settings(1883));
        assert_eq!(
            transport.publish(Message::new("P101/T", "x")).await,
            Err(TransportError::NotConnected)
        );
        assert_eq!(transport.subscribe("commands").await, Err(TransportError::NotConnected));
        assert!(matches!(
            transport.subscribe("a/#/b").await,
            Err(TransportError::InvalidFilter(_))
        ));
        assert_eq!(transport.recv().await, Err(TransportError::NotConnected));
        assert_eq!(transport.disconnect().await, Err(TransportError::NotConnected));
        assert_eq!(*transport.link_state().borrow(), ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_connect_fails_when_broker_never_answers() {
        // Accepts TCP but never sends CONNACK.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let transport = MqttTransport::new(settings(port));

        let err = transport.connect(SessionOptions::new("P101")).await.unwrap_err();
        assert!(matches!(err, TransportError::Broker(_)));
        assert!(err.to_string().contains(&port.to_string()));
        assert_eq!(
            transport.publish(Message::new("P101/T", "x")).await,
            Err(TransportError::NotConnected)
        );
        drop(listener);
    }
}
