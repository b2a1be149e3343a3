use std::time::Duration;

use async_trait::async_trait;
use chargeback_proto::{ClientEvent, ServerEvent};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace, warn};
use url::Url;

use super::frame::{EnginePacket, SocketPacket};
use super::{ChannelError, ConnectRequest, Connector, Link, LinkCommand, LinkEvent};
use crate::config::ClientConfig;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens socket.io links over a plain websocket transport.
#[derive(Debug, Clone)]
pub struct SocketIoConnector {
    base_url: String,
    socket_path: String,
}

impl SocketIoConnector {
    pub fn new(base_url: impl Into<String>, socket_path: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            socket_path: socket_path.into(),
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.base_url(), config.socket_path.clone())
    }

    /// Websocket URL for the handshake, with the claim id in the query.
    pub fn handshake_url(&self, request: &ConnectRequest) -> Result<Url, ChannelError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|err| ChannelError::HandshakeFailed(format!("invalid base url: {err}")))?;
        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => {
                return Err(ChannelError::HandshakeFailed(format!(
                    "unsupported scheme `{other}`"
                )))
            }
        };
        url.set_scheme(scheme)
            .map_err(|_| ChannelError::HandshakeFailed("cannot switch to websocket scheme".into()))?;

        let path = format!(
            "{}/{}/",
            url.path().trim_end_matches('/'),
            self.socket_path.trim_matches('/')
        );
        url.set_path(&path);

        {
            let mut query = url.query_pairs_mut();
            query.clear();
            query
                .append_pair("EIO", "4")
                .append_pair("transport", "websocket")
                .append_pair("claimId", &request.claim_id.to_string());
            if let Some(details) = &request.transaction_details {
                query.append_pair("transaction_details", &details.to_string());
            }
        }
        Ok(url)
    }
}

#[async_trait]
impl Connector for SocketIoConnector {
    async fn open(&self, request: &ConnectRequest) -> Result<Link, ChannelError> {
        let url = self.handshake_url(request)?;
        debug!(target = "chargeback.socket", url = %url, "opening websocket");
        let (socket, _) = connect_async(url.as_str())
            .await
            .map_err(|err| ChannelError::HandshakeFailed(err.to_string()))?;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        tokio::spawn(drive_socket(socket, command_rx, event_tx));

        Ok(Link {
            commands: command_tx,
            events: event_rx,
        })
    }
}

fn encode_event(event: &ClientEvent) -> Result<String, String> {
    let (name, payload) = event.to_parts().map_err(|err| err.to_string())?;
    EnginePacket::Message(SocketPacket::event(name, payload))
        .encode()
        .map_err(|err| err.to_string())
}

async fn send_packet(
    sink: &mut futures_util::stream::SplitSink<Socket, Message>,
    packet: EnginePacket,
) -> Result<(), String> {
    let frame = packet.encode().map_err(|err| err.to_string())?;
    sink.send(Message::Text(frame))
        .await
        .map_err(|err| err.to_string())
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Pumps one websocket: client commands out, decoded server events in.
/// Answers engine pings and closes the link when the server stops pinging.
async fn drive_socket(
    socket: Socket,
    mut commands: mpsc::UnboundedReceiver<LinkCommand>,
    events: mpsc::UnboundedSender<LinkEvent>,
) {
    let (mut sink, mut stream) = socket.split();
    let mut heartbeat_window: Option<Duration> = None;
    let mut deadline: Option<Instant> = None;

    let reason = loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(LinkCommand::Emit(event)) => match encode_event(&event) {
                    Ok(frame) => {
                        trace!(target = "chargeback.socket", event = event.name(), bytes = frame.len(), "send");
                        if let Err(err) = sink.send(Message::Text(frame)).await {
                            break Some(format!("write failed: {err}"));
                        }
                    }
                    Err(err) => {
                        warn!(target = "chargeback.socket", event = event.name(), error = %err, "failed to encode event");
                    }
                },
                Some(LinkCommand::Close) | None => {
                    let _ = send_packet(&mut sink, EnginePacket::Message(SocketPacket::Disconnect)).await;
                    let _ = sink.close().await;
                    break Some("client disconnect".to_string());
                }
            },
            frame = stream.next() => {
                if let Some(window) = heartbeat_window {
                    deadline = Some(Instant::now() + window);
                }
                match frame {
                    Some(Ok(Message::Text(text))) => match EnginePacket::parse(&text) {
                        Ok(EnginePacket::Open(open)) => {
                            debug!(
                                target = "chargeback.socket",
                                sid = %open.sid,
                                ping_interval_ms = open.ping_interval,
                                ping_timeout_ms = open.ping_timeout,
                                "engine open"
                            );
                            let window = Duration::from_millis(open.ping_interval + open.ping_timeout);
                            heartbeat_window = Some(window);
                            deadline = Some(Instant::now() + window);
                            if let Err(err) = send_packet(&mut sink, EnginePacket::Message(SocketPacket::Connect(None))).await {
                                break Some(format!("write failed: {err}"));
                            }
                        }
                        Ok(EnginePacket::Ping) => {
                            if let Err(err) = send_packet(&mut sink, EnginePacket::Pong).await {
                                break Some(format!("write failed: {err}"));
                            }
                        }
                        Ok(EnginePacket::Message(SocketPacket::Connect(_))) => {
                            let _ = events.send(LinkEvent::Established);
                        }
                        Ok(EnginePacket::Message(SocketPacket::ConnectError(detail))) => {
                            let _ = events.send(LinkEvent::Rejected(SocketPacket::connect_error_reason(&detail)));
                            let _ = sink.close().await;
                            return;
                        }
                        Ok(EnginePacket::Message(SocketPacket::Event { name, payload })) => {
                            match ServerEvent::from_parts(&name, payload) {
                                Ok(event) => {
                                    let _ = events.send(LinkEvent::Event(event));
                                }
                                Err(err) => {
                                    debug!(target = "chargeback.socket", error = %err, "skipping server event");
                                }
                            }
                        }
                        Ok(EnginePacket::Message(SocketPacket::Disconnect)) | Ok(EnginePacket::Close) => {
                            break Some("server disconnect".to_string());
                        }
                        Ok(EnginePacket::Pong) | Ok(EnginePacket::Noop) => {}
                        Err(err) => {
                            warn!(target = "chargeback.socket", error = %err, "dropping malformed frame");
                        }
                    },
                    Some(Ok(Message::Close(frame))) => {
                        break Some(frame.map(|f| f.reason.to_string()).unwrap_or_else(|| "websocket closed".into()));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => break Some(err.to_string()),
                    None => break None,
                }
            },
            _ = wait_until(deadline) => {
                let _ = sink.close().await;
                break Some("ping timeout".to_string());
            }
        }
    };

    debug!(target = "chargeback.socket", reason = reason.as_deref().unwrap_or("stream ended"), "websocket closed");
    let _ = events.send(LinkEvent::Closed(reason));
}
