//! MQTT command-channel transport.
//!
//! Binds the `CommandChannel` seam to an MQTT broker: command tokens arrive
//! on one fixed topic, result tokens leave on another. A background reader
//! thread drains the broker connection into an in-process queue so the
//! controller's polling stays non-blocking.
//!
//! Establishing the channel is the one operation allowed to abort the
//! process: `connect` waits for the broker acknowledgment and fails loudly.
//! Everything after that maps to `ChannelError` and the controller carries
//! on.

use anyhow::{anyhow, Context, Result};
use rumqttc::v5::mqttbytes::v5::Packet;
use rumqttc::v5::{mqttbytes::QoS, Client, Connection, Event, MqttOptions};
use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::channel::{decode_token, ChannelError, Command, CommandChannel, ResultCode};
use crate::config::MqttSettings;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const CLIENT_CAPACITY: usize = 10;
const DEFAULT_MQTT_PORT: u16 = 1883;

pub struct MqttChannel {
    client: Client,
    inbound: mpsc::Receiver<String>,
    result_topic: String,
    reader: Option<JoinHandle<()>>,
}

impl MqttChannel {
    /// Connect to the broker and subscribe to the command topic.
    pub fn connect(settings: &MqttSettings) -> Result<Self> {
        let (host, port) = parse_broker_addr(&settings.addr)?;
        let mut options = MqttOptions::new(settings.client_id.clone(), host, port);
        options.set_keep_alive(Duration::from_secs(60));
        options.set_clean_start(true);
        if let Some(user) = &settings.username {
            options.set_credentials(user, settings.password.clone().unwrap_or_default());
        }

        let (client, connection) = Client::new(options, CLIENT_CAPACITY);
        client
            .subscribe(&settings.command_topic, QoS::AtLeastOnce)
            .with_context(|| format!("subscribe to command topic {}", settings.command_topic))?;

        let (command_tx, inbound) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel();
        let reader = spawn_reader(connection, command_tx, ready_tx);

        match ready_rx.recv_timeout(CONNECT_TIMEOUT) {
            Ok(Ok(())) => {}
            Ok(Err(reason)) => return Err(anyhow!("mqtt broker rejected connection: {}", reason)),
            Err(_) => {
                return Err(anyhow!(
                    "timed out waiting for mqtt broker at {}",
                    settings.addr
                ))
            }
        }

        log::info!(
            "command channel connected to {} (commands: {}, results: {})",
            settings.addr,
            settings.command_topic,
            settings.result_topic
        );

        Ok(Self {
            client,
            inbound,
            result_topic: settings.result_topic.clone(),
            reader: Some(reader),
        })
    }

    /// Disconnect and join the reader thread.
    pub fn disconnect(mut self) -> Result<()> {
        self.client.disconnect()?;
        if let Some(handle) = self.reader.take() {
            let _ = handle.join();
        }
        Ok(())
    }
}

impl CommandChannel for MqttChannel {
    fn poll_command(&mut self) -> Result<Option<Command>, ChannelError> {
        match self.inbound.try_recv() {
            Ok(token) => Ok(decode_token(&token)),
            Err(mpsc::TryRecvError::Empty) => Ok(None),
            Err(mpsc::TryRecvError::Disconnected) => {
                Err(ChannelError::new("mqtt event loop terminated"))
            }
        }
    }

    fn push_result(&mut self, code: ResultCode) -> Result<(), ChannelError> {
        self.client
            .publish(
                &self.result_topic,
                QoS::AtLeastOnce,
                false,
                code.as_token().as_bytes().to_vec(),
            )
            .map_err(|e| ChannelError::new(format!("publish result failed: {}", e)))
    }
}

fn spawn_reader(
    mut connection: Connection,
    commands: mpsc::Sender<String>,
    ready: mpsc::Sender<std::result::Result<(), String>>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let mut announced = false;
        for event in connection.iter() {
            match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    if !announced {
                        announced = true;
                        let _ = ready.send(Ok(()));
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let token = String::from_utf8_lossy(&publish.payload).trim().to_string();
                    if commands.send(token).is_err() {
                        break;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    log::warn!("mqtt connection error: {}", e);
                    if !announced {
                        announced = true;
                        let _ = ready.send(Err(e.to_string()));
                    }
                    break;
                }
            }
        }
    })
}

/// Split `host[:port]`, defaulting the standard MQTT port. Accepts an
/// optional `mqtt://` prefix.
fn parse_broker_addr(addr: &str) -> Result<(String, u16)> {
    let addr = addr.trim();
    let addr = addr.strip_prefix("mqtt://").unwrap_or(addr);
    if addr.is_empty() {
        return Err(anyhow!("mqtt broker address is empty"));
    }
    match addr.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => {
            let port: u16 = port
                .parse()
                .map_err(|_| anyhow!("invalid mqtt broker port in '{}'", addr))?;
            Ok((host.to_string(), port))
        }
        _ => Ok((addr.to_string(), DEFAULT_MQTT_PORT)),
    }
}
