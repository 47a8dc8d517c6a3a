//! Tokio driver for a [`Synchronizer`].
//!
//! The socket itself lives in a task owned by the caller. The engine talks
//! to it through [`SocketCommand`]s and receives [`SocketEvent`]s back.
//!
//! Socket task contract: every command carries the generation of the
//! connection instance that issued it. `Connect` opens a socket for that
//! generation and replaces any older one; `Frame` and `Close` for a
//! generation other than the open socket's are discarded. Every event the
//! task reports is tagged with the generation of the socket it came from,
//! including the close of a socket the engine asked to close. The engine
//! drops events of replaced generations.

use std::time::{Duration, Instant};

use bytes::Bytes;
use livechan_transport::{Connector, Transport, TransportError, TransportEvent};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::Result;
use crate::event::Event;
use crate::sync::Synchronizer;

/// Instruction for the socket task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketCommand {
    Connect { generation: u64, address: String },
    Frame { generation: u64, frame: Bytes },
    Close { generation: u64 },
}

/// Notification from the socket task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketEvent {
    /// Generation of the `Connect` that opened the reporting socket.
    pub generation: u64,
    pub event: TransportEvent,
}

impl SocketEvent {
    pub fn new(generation: u64, event: TransportEvent) -> Self {
        Self { generation, event }
    }
}

/// Transport that forwards everything to the socket task.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    generation: u64,
    commands: mpsc::UnboundedSender<SocketCommand>,
}

impl Transport for ChannelTransport {
    fn connect(&mut self, address: &str) -> livechan_transport::Result<()> {
        self.commands
            .send(SocketCommand::Connect {
                generation: self.generation,
                address: address.to_string(),
            })
            .map_err(|_| TransportError::Connect {
                address: address.to_string(),
                reason: "socket task is gone".to_string(),
            })
    }

    fn send(&mut self, frame: Bytes) -> livechan_transport::Result<()> {
        self.commands
            .send(SocketCommand::Frame {
                generation: self.generation,
                frame,
            })
            .map_err(|_| TransportError::Closed)
    }

    fn close(&mut self) -> livechan_transport::Result<()> {
        // A missing socket task is already closed.
        let _ = self.commands.send(SocketCommand::Close {
            generation: self.generation,
        });
        Ok(())
    }

    fn transport_name(&self) -> &'static str {
        "channel"
    }
}

/// Hands every connection a [`ChannelTransport`] onto the same command queue.
#[derive(Debug, Clone)]
pub struct ChannelConnector {
    commands: mpsc::UnboundedSender<SocketCommand>,
}

impl Connector for ChannelConnector {
    type Transport = ChannelTransport;

    fn transport(&mut self, generation: u64) -> ChannelTransport {
        ChannelTransport {
            generation,
            commands: self.commands.clone(),
        }
    }
}

/// Create a connector and the receiving end the socket task reads from.
pub fn channel_connector() -> (ChannelConnector, mpsc::UnboundedReceiver<SocketCommand>) {
    let (commands, receiver) = mpsc::unbounded_channel();
    (ChannelConnector { commands }, receiver)
}

/// Drive `sync` until cancelled, the inbound stream ends, the consumer goes
/// away or reconnecting is abandoned.
///
/// Reconnect delays and heartbeats elapse on the `tick` interval. The
/// synchronizer is handed back so callers can inspect its final state.
pub async fn run<C: Connector>(
    mut sync: Synchronizer<C>,
    mut inbound: mpsc::Receiver<SocketEvent>,
    events: mpsc::Sender<Event>,
    tick: Duration,
    cancel: CancellationToken,
) -> Result<Synchronizer<C>> {
    sync.start(Instant::now())?;
    if !forward(&mut sync, &events).await {
        sync.shutdown()?;
        return Ok(sync);
    }

    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("driver cancelled");
                sync.shutdown()?;
                forward(&mut sync, &events).await;
                break;
            }
            event = inbound.recv() => match event {
                Some(SocketEvent { generation, event }) => {
                    sync.handle(generation, event, Instant::now())
                }
                None => {
                    debug!("inbound stream ended");
                    sync.shutdown()?;
                    forward(&mut sync, &events).await;
                    break;
                }
            },
            _ = interval.tick() => sync.tick(Instant::now()),
        }

        if !forward(&mut sync, &events).await {
            debug!("event consumer dropped");
            sync.shutdown()?;
            break;
        }
        if sync.is_abandoned() {
            break;
        }
    }
    Ok(sync)
}

/// Returns false once the consumer is gone.
async fn forward<C: Connector>(sync: &mut Synchronizer<C>, events: &mpsc::Sender<Event>) -> bool {
    while let Some(event) = sync.poll_event() {
        if events.send(event).await.is_err() {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::config::EngineConfig;

    fn config() -> EngineConfig {
        serde_json::from_value(json!({
            "environment": "test",
            "environments": { "test": { "host": "wss://live.test" } },
            "channel_sets": { "join_only": ["presence"], "join_and_bootstrap": [] },
            "stored_session_id": "sess"
        }))
        .unwrap()
    }

    async fn next_named(events: &mut mpsc::Receiver<Event>, name: &str) -> Event {
        loop {
            let event = events.recv().await.expect("driver should still be running");
            if event.name() == name {
                return event;
            }
        }
    }

    #[tokio::test]
    async fn drives_socket_until_cancelled() {
        let (connector, mut commands) = channel_connector();
        let sync = Synchronizer::new(config(), connector).unwrap();
        let (inbound_tx, inbound_rx) = mpsc::channel(16);
        let (events_tx, mut events_rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();

        let driver = tokio::spawn(run(
            sync,
            inbound_rx,
            events_tx,
            Duration::from_millis(10),
            cancel.clone(),
        ));

        assert_eq!(
            commands.recv().await,
            Some(SocketCommand::Connect {
                generation: 1,
                address: "wss://live.test".to_string(),
            })
        );

        inbound_tx
            .send(SocketEvent::new(1, TransportEvent::Open))
            .await
            .unwrap();
        let Some(SocketCommand::Frame { generation: 1, frame }) = commands.recv().await else {
            panic!("expected CONNECT frame");
        };
        let connect: serde_json::Value = serde_json::from_slice(&frame).unwrap();
        assert_eq!(connect["cmd"], "CONNECT");

        inbound_tx
            .send(SocketEvent::new(
                1,
                TransportEvent::Message(Bytes::from(json!([{ "cmd": "CONNECT" }]).to_string())),
            ))
            .await
            .unwrap();
        next_named(&mut events_rx, "authenticated").await;
        let loaded = next_named(&mut events_rx, "channel_loaded").await;
        assert_eq!(loaded.channel(), Some("presence"));

        cancel.cancel();
        let sync = driver.await.unwrap().unwrap();
        assert!(sync.is_shut_down());
        next_named(&mut events_rx, "connection_closed").await;

        let mut saw_close = false;
        while let Ok(command) = commands.try_recv() {
            saw_close |= command == SocketCommand::Close { generation: 1 };
        }
        assert!(saw_close);
    }

    #[tokio::test]
    async fn stale_socket_events_do_not_restart() {
        let (connector, mut commands) = channel_connector();
        let sync = Synchronizer::new(config(), connector).unwrap();
        let (inbound_tx, inbound_rx) = mpsc::channel(16);
        let (events_tx, mut events_rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();

        let driver = tokio::spawn(run(
            sync,
            inbound_rx,
            events_tx,
            Duration::from_millis(10),
            cancel.clone(),
        ));
        assert!(matches!(
            commands.recv().await,
            Some(SocketCommand::Connect { generation: 1, .. })
        ));

        inbound_tx
            .send(SocketEvent::new(1, TransportEvent::Error("reset".to_string())))
            .await
            .unwrap();
        assert_eq!(
            commands.recv().await,
            Some(SocketCommand::Close { generation: 1 })
        );
        assert!(matches!(
            commands.recv().await,
            Some(SocketCommand::Connect { generation: 2, .. })
        ));

        // the old socket reports its close after the replacement exists
        inbound_tx
            .send(SocketEvent::new(
                1,
                TransportEvent::Close {
                    reason: Some("closed by client".to_string()),
                },
            ))
            .await
            .unwrap();
        inbound_tx
            .send(SocketEvent::new(2, TransportEvent::Open))
            .await
            .unwrap();
        assert!(matches!(
            commands.recv().await,
            Some(SocketCommand::Frame { generation: 2, .. })
        ));

        cancel.cancel();
        let sync = driver.await.unwrap().unwrap();
        assert_eq!(sync.generation(), 2);
        while let Ok(event) = events_rx.try_recv() {
            assert!(!matches!(event, Event::ConnectionForged { generation: 3 }));
        }
    }

    #[tokio::test]
    async fn ends_when_inbound_stream_closes() {
        let (connector, _commands) = channel_connector();
        let sync = Synchronizer::new(config(), connector).unwrap();
        let (inbound_tx, inbound_rx) = mpsc::channel(1);
        let (events_tx, _events_rx) = mpsc::channel(64);
        drop(inbound_tx);

        let sync = run(
            sync,
            inbound_rx,
            events_tx,
            Duration::from_millis(10),
            CancellationToken::new(),
        )
        .await
        .unwrap();
        assert!(sync.is_shut_down());
    }
}
