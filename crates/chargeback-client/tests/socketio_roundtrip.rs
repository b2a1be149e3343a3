//! Full client against a minimal socket.io server speaking raw engine frames.
//!
//! Claim ids pick the server's behavior:
//! - `0` rejects the namespace connect
//! - `99` never sends the engine open
//! - `7` opens with a short heartbeat and then stops pinging
//! - anything else acknowledges, pushes a greeting and a summary, then pings

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use chargeback_client::proto::ClaimId;
use chargeback_client::{ChannelError, ChannelState, ClaimSession, ClientConfig, ClientError, Role};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

#[derive(Clone)]
struct Server {
    frames: mpsc::UnboundedSender<String>,
    queries: mpsc::UnboundedSender<HashMap<String, String>>,
}

struct Harness {
    base_url: String,
    frames: mpsc::UnboundedReceiver<String>,
    queries: mpsc::UnboundedReceiver<HashMap<String, String>>,
}

impl Harness {
    async fn start() -> Self {
        let (frames_tx, frames) = mpsc::unbounded_channel();
        let (queries_tx, queries) = mpsc::unbounded_channel();
        let router = Router::new()
            .route("/socket.io/", get(upgrade))
            .with_state(Server {
                frames: frames_tx,
                queries: queries_tx,
            });
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("listener bind");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            axum::serve(listener, router).await.ok();
        });
        Self {
            base_url: format!("http://{addr}"),
            frames,
            queries,
        }
    }

    fn session(&self, handshake_timeout: Duration) -> ClaimSession {
        let config =
            ClientConfig::new(self.base_url.clone()).with_handshake_timeout(Some(handshake_timeout));
        ClaimSession::new(config).expect("session")
    }

    /// Next client frame matching `prefix`, skipping pongs and the connect packet.
    async fn next_frame(&mut self, prefix: &str) -> String {
        timeout(WAIT, async {
            loop {
                let frame = self.frames.recv().await.expect("server alive");
                if frame.starts_with(prefix) {
                    return frame;
                }
            }
        })
        .await
        .expect("frame within deadline")
    }
}

async fn upgrade(
    ws: WebSocketUpgrade,
    Query(query): Query<HashMap<String, String>>,
    State(server): State<Server>,
) -> impl IntoResponse {
    let _ = server.queries.send(query.clone());
    let claim = query.get("claimId").cloned().unwrap_or_default();
    ws.on_upgrade(move |socket| run_socket(socket, claim, server))
}

async fn run_socket(socket: WebSocket, claim: String, server: Server) {
    let (mut tx, mut rx) = socket.split();
    if claim == "99" {
        while rx.next().await.is_some() {}
        return;
    }
    let (ping_interval, ping_timeout) = if claim == "7" { (100, 100) } else { (25_000, 20_000) };
    let open = json!({
        "sid": "engine-1",
        "upgrades": [],
        "pingInterval": ping_interval,
        "pingTimeout": ping_timeout,
        "maxPayload": 1_000_000
    });
    if tx.send(Message::Text(format!("0{open}"))).await.is_err() {
        return;
    }

    while let Some(Ok(message)) = rx.next().await {
        let Message::Text(frame) = message else {
            continue;
        };
        let _ = server.frames.send(frame.clone());
        if frame != "40" {
            continue;
        }
        let replies: Vec<String> = match claim.as_str() {
            "0" => vec![r#"44{"message":"Invalid claim ID."}"#.into()],
            "7" => vec![r#"40{"sid":"socket-1"}"#.into()],
            _ => vec![
                r#"40{"sid":"socket-1"}"#.into(),
                r#"42["message",{"text":"Please describe the issue.","options":["Not received","Damaged"]}]"#.into(),
                r#"42["update_claim_summary",{"status":"Pending","events":[]}]"#.into(),
                "2".into(),
            ],
        };
        for reply in replies {
            if tx.send(Message::Text(reply)).await.is_err() {
                return;
            }
        }
    }
}

fn event_payload(frame: &str) -> Value {
    serde_json::from_str(frame.strip_prefix("42").expect("event frame")).expect("json")
}

#[tokio::test]
async fn connect_push_send_and_disconnect() {
    let mut harness = Harness::start().await;
    let session = harness.session(WAIT);
    let summaries = Arc::new(Mutex::new(Vec::new()));
    {
        let summaries = summaries.clone();
        let _ = session.add_watcher(move |snapshot: &Value| summaries.lock().push(snapshot.clone()));
    }

    session.connect(ClaimId(12)).await.expect("connected");
    assert_eq!(session.state(), ChannelState::Connected);

    let query = harness.queries.recv().await.expect("query");
    assert_eq!(query.get("claimId").map(String::as_str), Some("12"));
    assert_eq!(query.get("EIO").map(String::as_str), Some("4"));
    assert_eq!(query.get("transport").map(String::as_str), Some("websocket"));

    assert_eq!(harness.next_frame("3").await, "3");

    timeout(WAIT, async {
        while session.timeline().is_empty() || summaries.lock().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("pushes applied");
    let greeting = &session.timeline()[0];
    assert_eq!(greeting.content, "Please describe the issue.");
    assert_eq!(greeting.role, Role::Adjudicator);
    assert_eq!(greeting.options, ["Not received", "Damaged"]);
    assert_eq!(summaries.lock()[0], json!({"status": "Pending", "events": []}));

    session.send_message("Not received").expect("sent");
    let frame = harness.next_frame("42").await;
    assert_eq!(
        event_payload(&frame),
        json!(["user_response", {"text": "Not received", "claim_id": 12}])
    );

    session.disconnect();
    assert_eq!(harness.next_frame("41").await, "41");
    assert_eq!(session.state(), ChannelState::Disconnected);
}

#[tokio::test]
async fn rejected_connect_surfaces_server_reason() {
    let harness = Harness::start().await;
    let session = harness.session(WAIT);

    let err = session.connect(ClaimId(0)).await.unwrap_err();
    match err {
        ClientError::Channel(ChannelError::HandshakeFailed(reason)) => {
            assert_eq!(reason, "Invalid claim ID.")
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(session.state(), ChannelState::Disconnected);
}

#[tokio::test]
async fn silent_server_hits_handshake_timeout() {
    let harness = Harness::start().await;
    let session = harness.session(Duration::from_millis(200));

    let err = session.connect(ClaimId(99)).await.unwrap_err();
    assert!(matches!(
        err,
        ClientError::Channel(ChannelError::HandshakeTimeout(_))
    ));
    assert_eq!(session.state(), ChannelState::Disconnected);
}

#[tokio::test]
async fn missing_pings_close_the_channel() {
    let harness = Harness::start().await;
    let session = harness.session(WAIT);
    session.connect(ClaimId(7)).await.expect("connected");

    timeout(WAIT, async {
        while session.state() != ChannelState::Disconnected {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("heartbeat expired");
    assert!(session.send_message("anyone?").unwrap_err().is_not_connected());
    assert!(session.timeline().is_empty());
}
