//! HTTP bootstrap calls against a local axum stub of the claim service.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::header::{COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chargeback_client::proto::ClaimId;
use chargeback_client::{
    BootstrapClient, BootstrapError, ClaimSession, ClientConfig, DeliveryState, MockConnector,
    Role, TransactionAttributes,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::TcpListener;

#[derive(Clone, Default)]
struct Stub {
    last_query: Arc<Mutex<Option<HashMap<String, String>>>>,
}

async fn serve(stub: Stub) -> String {
    let router = Router::new()
        .route("/start_new_claim", get(start_new_claim))
        .route("/login/:uuid", get(login))
        .route("/get_messages/:claim", get(get_messages))
        .route("/merchant_view/:claim", get(merchant_view))
        .route("/structured_data/:claim", get(structured_data))
        .with_state(stub);
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("listener bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });
    format!("http://{addr}")
}

async fn start_new_claim(
    State(stub): State<Stub>,
    Query(query): Query<HashMap<String, String>>,
) -> Json<Value> {
    let body = if query.contains_key("no_id") {
        json!({"status": "created"})
    } else {
        json!({"id": 42})
    };
    *stub.last_query.lock() = Some(query);
    Json(body)
}

async fn login(Path(uuid): Path<String>) -> impl IntoResponse {
    match uuid.as_str() {
        "new" => (
            [(SET_COOKIE, "user_uuid=2b7e-41f0; Path=/; HttpOnly")],
            "logged in",
        )
            .into_response(),
        _ => "welcome back".into_response(),
    }
}

async fn get_messages(Path(claim): Path<u64>) -> impl IntoResponse {
    match claim {
        1 => Json(json!({
            "messages": [
                {"sender": "user", "content": "hi", "timestamp": "2024-05-01T10:00:00Z"},
                {"sender": "assistant", "content": "hello", "timestamp": "2024-05-01T10:00:02Z"}
            ]
        }))
        .into_response(),
        2 => Json(json!([{"sender": "merchant", "content": "We shipped it"}])).into_response(),
        _ => (StatusCode::NOT_FOUND, "no such claim").into_response(),
    }
}

async fn merchant_view(Path(claim): Path<u64>) -> String {
    format!("<h1>Claim {claim}</h1>")
}

async fn structured_data(headers: HeaderMap, Path(claim): Path<u64>) -> Json<Value> {
    let cookie = headers
        .get(COOKIE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    Json(json!({"claim": claim, "status": "Pending", "cookie": cookie}))
}

#[tokio::test]
async fn start_new_claim_sends_present_attributes() {
    let stub = Stub::default();
    let base = serve(stub.clone()).await;
    let client = BootstrapClient::new(base).unwrap();

    let attributes = TransactionAttributes::new()
        .with("merchant_name", "ABC Store")
        .with("amount", "49.99")
        .with_optional("merchant_email", None);
    let claim = client.start_new_claim(&attributes).await.unwrap();

    assert_eq!(claim, ClaimId(42));
    let query = stub.last_query.lock().clone().expect("query seen");
    assert_eq!(query.get("merchant_name").map(String::as_str), Some("ABC Store"));
    assert_eq!(query.get("amount").map(String::as_str), Some("49.99"));
    assert!(!query.contains_key("merchant_email"));
}

#[tokio::test]
async fn start_new_claim_defaults_to_zero_without_id() {
    let base = serve(Stub::default()).await;
    let client = BootstrapClient::new(base).unwrap();
    let claim = client
        .start_new_claim(&TransactionAttributes::new().with("no_id", "1"))
        .await
        .unwrap();
    assert_eq!(claim, ClaimId(0));
}

#[tokio::test]
async fn non_success_status_is_request_failed() {
    let base = serve(Stub::default()).await;
    let client = BootstrapClient::new(base).unwrap();
    let err = client.get_messages(ClaimId(404)).await.unwrap_err();
    match err {
        BootstrapError::RequestFailed { status, body, .. } => {
            assert_eq!(status.as_u16(), 404);
            assert_eq!(body, "no such claim");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn login_reads_cookie_or_falls_back_to_input() {
    let base = serve(Stub::default()).await;
    let client = BootstrapClient::new(base).unwrap();

    assert_eq!(client.login(None).await.unwrap(), "2b7e-41f0");
    assert_eq!(client.login(Some("known-user")).await.unwrap(), "known-user");
}

#[tokio::test]
async fn session_cookie_is_sent_on_later_calls() {
    let base = serve(Stub::default()).await;
    let client = BootstrapClient::new(base).unwrap();
    client.login(None).await.unwrap();

    let summary = client.get_structured_data(ClaimId(5)).await.unwrap();
    assert_eq!(summary["cookie"], "user_uuid=2b7e-41f0");
}

#[tokio::test]
async fn merchant_view_is_returned_as_text() {
    let base = serve(Stub::default()).await;
    let client = BootstrapClient::new(base).unwrap();
    assert_eq!(
        client.get_merchant_view(ClaimId(8)).await.unwrap(),
        "<h1>Claim 8</h1>"
    );
}

#[tokio::test]
async fn history_becomes_a_confirmed_timeline() {
    let base = serve(Stub::default()).await;
    let (connector, _peers) = MockConnector::auto_acknowledge();
    let session = ClaimSession::with_connector(ClientConfig::new(base), connector).unwrap();

    assert_eq!(session.load_history(ClaimId(1)).await.unwrap(), 2);
    let timeline = session.timeline();
    let roles: Vec<Role> = timeline.iter().map(|m| m.role).collect();
    assert_eq!(roles, [Role::User, Role::Adjudicator]);
    assert_eq!(timeline[0].content, "hi");
    assert_eq!(timeline[1].content, "hello");
    assert!(timeline.iter().all(|m| m.delivery == DeliveryState::Confirmed));

    session.load_history(ClaimId(2)).await.unwrap();
    let timeline = session.timeline();
    assert_eq!(timeline.len(), 1);
    assert_eq!(timeline[0].role, Role::Seller);
    assert_eq!(timeline[0].timestamp, "");
}

#[tokio::test]
async fn pulled_summary_notifies_watchers() {
    let base = serve(Stub::default()).await;
    let (connector, _peers) = MockConnector::auto_acknowledge();
    let session = ClaimSession::with_connector(ClientConfig::new(base), connector).unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    {
        let seen = seen.clone();
        let _ = session.add_watcher(move |snapshot: &Value| seen.lock().push(snapshot["claim"].clone()));
    }

    let snapshot = session.fetch_structured_data(ClaimId(9)).await.unwrap();
    assert_eq!(snapshot["status"], "Pending");
    assert_eq!(seen.lock().as_slice(), [json!(9)]);
    assert_eq!(session.structured_data()["claim"], 9);
}
