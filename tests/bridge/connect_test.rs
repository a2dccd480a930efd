//! Tests for `Bridge::connect` against local webhook and Mattermost servers.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use mmbridge::bridge::{Bridge, BridgeError, InboundPump, OutboundSink};
use mmbridge::config::{BridgeConfig, MattermostConfig};
use mmbridge::mattermost::ApiError;
use mmbridge::types::{CanonicalMessage, EventKind};

type Captured = Arc<Mutex<Vec<Value>>>;

/// Start a fake incoming-webhook endpoint, returning its URL.
async fn spawn_hook_endpoint(captured: Captured) -> String {
    async fn handle(State(captured): State<Captured>, Json(body): Json<Value>) -> &'static str {
        captured.lock().expect("captured lock").push(body);
        "ok"
    }

    let app = Router::new()
        .route("/hooks/abc", post(handle))
        .with_state(captured);
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    format!("http://{addr}/hooks/abc")
}

fn webhook_config(url: Option<String>) -> BridgeConfig {
    BridgeConfig {
        mattermost: MattermostConfig {
            webhook_bind_address: Some("127.0.0.1:0".to_string()),
            webhook_url: url,
            ..Default::default()
        },
        ..Default::default()
    }
}

#[tokio::test]
async fn connect_without_any_method_fails() {
    let (tx, _rx) = mpsc::channel(1);
    match Bridge::connect(&BridgeConfig::default(), tx).await {
        Err(BridgeError::Config(msg)) => assert_eq!(msg, "no connection method configured"),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("connect should fail without a connection method"),
    }
}

#[tokio::test]
async fn webhook_pair_relays_both_directions() {
    let captured: Captured = Arc::default();
    let url = spawn_hook_endpoint(Arc::clone(&captured)).await;

    let (gateway_tx, mut gateway_rx) = mpsc::channel(8);
    let bridge = Bridge::connect(&webhook_config(Some(url)), gateway_tx)
        .await
        .expect("connect");
    let receiver = bridge.webhook_address().expect("receiver address");

    // Inbound: an outgoing-webhook delivery reaches the gateway channel.
    let resp = reqwest::Client::new()
        .post(format!("http://{receiver}/"))
        .form(&[
            ("channel_name", "town-square"),
            ("user_id", "u-alice"),
            ("user_name", "alice"),
            ("post_id", "p1"),
            ("text", "*waves*"),
        ])
        .send()
        .await
        .expect("deliver");
    assert!(resp.status().is_success());

    let inbound: CanonicalMessage = tokio::time::timeout(Duration::from_secs(5), gateway_rx.recv())
        .await
        .expect("inbound in time")
        .expect("inbound message");
    assert_eq!(inbound.kind, EventKind::UserAction);
    assert_eq!(inbound.text, "waves");
    assert_eq!(inbound.username, "alice");

    // Outbound: send posts to the incoming-webhook URL with the bridge marker.
    let id = bridge
        .send(CanonicalMessage::new("town-square", "bob", "irc-bob", "hi alice"))
        .await
        .expect("send");
    assert!(id.is_empty());

    let bodies = captured.lock().expect("captured lock").clone();
    assert_eq!(bodies.len(), 1);
    assert_eq!(bodies[0]["text"], "hi alice");
    assert_eq!(bodies[0]["username"], "bob");
    assert_eq!(bodies[0]["props"]["matterbridge"], true);

    bridge.disconnect();
}

#[tokio::test]
async fn receive_only_bridge_rejects_send() {
    let (gateway_tx, _gateway_rx) = mpsc::channel(8);
    let bridge = Bridge::connect(&webhook_config(None), gateway_tx)
        .await
        .expect("connect");
    assert!(matches!(
        bridge.send(CanonicalMessage::new("town-square", "bob", "", "hi")).await,
        Err(BridgeError::ReceiveOnly)
    ));
    // Join is a no-op on webhook plans.
    bridge.join_channel("town-square").await.expect("join");
}

const TOKEN: &str = "tok-123";

/// Requests the fake Mattermost server saw, as `"METHOD path body"` lines.
type Requests = Arc<Mutex<Vec<String>>>;

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {TOKEN}"))
}

/// Start a fake Mattermost REST server, returning its base URL.
async fn spawn_mattermost(requests: Requests) -> String {
    async fn me(headers: HeaderMap) -> impl IntoResponse {
        if !authorized(&headers) {
            return (StatusCode::UNAUTHORIZED, Json(json!({ "message": "invalid token" })));
        }
        (StatusCode::OK, Json(json!({ "id": "bot-id", "username": "relay-bot" })))
    }

    async fn team(Path(name): Path<String>) -> Json<Value> {
        Json(json!({ "id": "team-1", "name": name }))
    }

    async fn channel(Path((team_id, name)): Path<(String, String)>) -> impl IntoResponse {
        if name == "town-square" {
            return (
                StatusCode::OK,
                Json(json!({ "id": "ch-1", "name": name, "team_id": team_id })),
            );
        }
        (StatusCode::NOT_FOUND, Json(json!({ "message": "no channel" })))
    }

    async fn create_post(State(requests): State<Requests>, Json(body): Json<Value>) -> Json<Value> {
        requests
            .lock()
            .expect("requests lock")
            .push(format!("POST /posts {body}"));
        Json(json!({ "id": "post-1" }))
    }

    async fn status(
        State(requests): State<Requests>,
        Path(user_id): Path<String>,
        Json(body): Json<Value>,
    ) -> Json<Value> {
        requests
            .lock()
            .expect("requests lock")
            .push(format!("PUT /users/{user_id}/status {}", body["status"]));
        Json(body)
    }

    async fn join(
        State(requests): State<Requests>,
        Path(channel_id): Path<String>,
        Json(body): Json<Value>,
    ) -> Json<Value> {
        requests
            .lock()
            .expect("requests lock")
            .push(format!("POST /channels/{channel_id}/members {}", body["user_id"]));
        Json(body)
    }

    let app = Router::new()
        .route("/api/v4/users/me", get(me))
        .route("/api/v4/teams/name/{name}", get(team))
        .route("/api/v4/teams/{team_id}/channels/name/{name}", get(channel))
        .route("/api/v4/posts", post(create_post))
        .route("/api/v4/users/{user_id}/status", put(status))
        .route("/api/v4/channels/{channel_id}/members", post(join))
        .with_state(requests);
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    format!("http://{addr}")
}

fn token_config(server: String, token: &str) -> BridgeConfig {
    BridgeConfig {
        mattermost: MattermostConfig {
            server: Some(server),
            team: Some("myteam".to_string()),
            token: Some(token.to_string()),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn seen(requests: &Requests) -> Vec<String> {
    requests.lock().expect("requests lock").clone()
}

#[tokio::test]
async fn token_plan_logs_in_and_sends_through_session() {
    let requests: Requests = Arc::default();
    let server = spawn_mattermost(Arc::clone(&requests)).await;

    let (gateway_tx, _gateway_rx) = mpsc::channel(8);
    let bridge = Bridge::connect(&token_config(server, TOKEN), gateway_tx)
        .await
        .expect("connect");
    assert_eq!(bridge.plan().inbound, InboundPump::Session);
    assert_eq!(bridge.plan().outbound, OutboundSink::Session);
    assert!(bridge.webhook_address().is_none());

    // The presence loop ticks immediately after connect.
    let online = "PUT /users/bot-id/status \"online\"".to_string();
    tokio::time::timeout(Duration::from_secs(5), async {
        while !seen(&requests).contains(&online) {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("status set to online");

    bridge.join_channel("town-square").await.expect("join");
    assert!(seen(&requests).contains(&"POST /channels/ch-1/members \"bot-id\"".to_string()));

    let id = bridge
        .send(CanonicalMessage::new("town-square", "bob", "irc-bob", "hi from irc"))
        .await
        .expect("send");
    assert_eq!(id, "post-1");
    let posts: Vec<String> = seen(&requests)
        .into_iter()
        .filter(|r| r.starts_with("POST /posts"))
        .collect();
    assert_eq!(posts.len(), 1);
    assert!(posts[0].contains("\"channel_id\":\"ch-1\""), "{posts:?}");
    assert!(posts[0].contains("\"message\":\"hi from irc\""), "{posts:?}");

    bridge.disconnect();
}

#[tokio::test]
async fn rejected_login_aborts_connect() {
    let requests: Requests = Arc::default();
    let server = spawn_mattermost(Arc::clone(&requests)).await;

    let (gateway_tx, _gateway_rx) = mpsc::channel(8);
    match Bridge::connect(&token_config(server, "wrong"), gateway_tx).await {
        Err(BridgeError::Api(ApiError::Auth(_))) => {}
        Err(other) => panic!("expected an auth error, got {other}"),
        Ok(_) => panic!("connect should fail with a rejected token"),
    }
    assert!(seen(&requests).is_empty(), "nothing may run after a failed login");
}
