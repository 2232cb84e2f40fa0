use super::phoenix::{websocket_url, PhoenixFrame, PhoenixSocket};
use super::*;
use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    routing::get,
    Router,
};
use std::{sync::Arc, time::Duration};
use tokio::{net::TcpListener, sync::Mutex};

const CLOSED_EMAIL: &str = "closed@example.com";

#[derive(Clone, Default)]
struct FakeHub {
    frames: Arc<Mutex<Vec<PhoenixFrame>>>,
}

impl FakeHub {
    async fn frames_with_event(&self, event: &str) -> Vec<PhoenixFrame> {
        self.frames
            .lock()
            .await
            .iter()
            .filter(|frame| frame.event == event)
            .cloned()
            .collect()
    }
}

fn reply(to: &PhoenixFrame, status: &str, response: Value) -> PhoenixFrame {
    PhoenixFrame {
        join_ref: to.join_ref.clone(),
        msg_ref: to.msg_ref.clone(),
        topic: to.topic.clone(),
        event: "phx_reply".into(),
        payload: json!({"status": status, "response": response}),
    }
}

fn broadcast(topic: &str, event: &str, payload: Value) -> PhoenixFrame {
    PhoenixFrame {
        join_ref: None,
        msg_ref: None,
        topic: topic.to_string(),
        event: event.to_string(),
        payload,
    }
}

async fn handle_upgrade(ws: WebSocketUpgrade, State(hub): State<FakeHub>) -> Response {
    ws.on_upgrade(move |socket| serve_socket(socket, hub))
}

async fn serve_socket(mut socket: WebSocket, hub: FakeHub) {
    while let Some(Ok(message)) = socket.recv().await {
        let WsMessage::Text(text) = message else {
            continue;
        };
        let Ok(frame) = serde_json::from_str::<PhoenixFrame>(&text) else {
            continue;
        };
        hub.frames.lock().await.push(frame.clone());

        let outgoing = match frame.event.as_str() {
            "phx_join" if frame.topic == "forbidden" => {
                vec![reply(&frame, "error", json!({"reason": "unauthorized"}))]
            }
            "phx_join" | "heartbeat" => vec![reply(&frame, "ok", json!({}))],
            "refresh_perms_token" => {
                vec![reply(&frame, "ok", json!({"perms_token": "perms-token"}))]
            }
            "auth_request" if frame.payload["email"] == CLOSED_EMAIL => {
                vec![broadcast(&frame.topic, "phx_close", json!({}))]
            }
            "auth_request" => vec![broadcast(
                &frame.topic,
                "auth_credentials",
                json!({"credentials": "cred-token"}),
            )],
            _ => Vec::new(),
        };

        for frame in outgoing {
            let text = serde_json::to_string(&frame).expect("encode frame");
            if socket.send(WsMessage::Text(text)).await.is_err() {
                return;
            }
        }
    }
}

async fn spawn_hub() -> anyhow::Result<(String, FakeHub)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let hub = FakeHub::default();
    let app = Router::new()
        .route("/socket/websocket", get(handle_upgrade))
        .with_state(hub.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok((format!("http://{addr}/socket"), hub))
}

#[test]
fn frames_use_the_v2_array_layout() {
    let frame = PhoenixFrame {
        join_ref: Some("1".into()),
        msg_ref: Some("2".into()),
        topic: "ret".into(),
        event: "phx_join".into(),
        payload: json!({"hub_id": "index"}),
    };
    assert_eq!(
        serde_json::to_value(&frame).expect("encode"),
        json!(["1", "2", "ret", "phx_join", {"hub_id": "index"}])
    );

    let pushed: PhoenixFrame =
        serde_json::from_str(r#"[null,null,"auth:x","auth_credentials",{"credentials":"c"}]"#)
            .expect("decode");
    assert_eq!(pushed.join_ref, None);
    assert_eq!(pushed.msg_ref, None);
    assert_eq!(pushed.event, "auth_credentials");
    assert_eq!(pushed.payload["credentials"], "c");
}

#[test]
fn websocket_url_normalizes_scheme_path_and_version() {
    let url = websocket_url("https://hubs.example.com/socket").expect("https");
    assert_eq!(
        url.as_str(),
        "wss://hubs.example.com/socket/websocket?vsn=2.0.0"
    );

    let url = websocket_url("ws://127.0.0.1:4000/socket/websocket").expect("ws");
    assert_eq!(url.as_str(), "ws://127.0.0.1:4000/socket/websocket?vsn=2.0.0");

    assert!(matches!(
        websocket_url("ftp://hubs.example.com"),
        Err(RealtimeError::InvalidUrl(_))
    ));
}

#[tokio::test]
async fn missing_realtime_auth_is_unavailable() {
    let auth = MissingRealtimeAuth;
    assert!(matches!(
        auth.start_authentication("a@b.com").await,
        Err(RealtimeError::Unavailable)
    ));
    assert!(matches!(
        auth.refresh_perms_token("t").await,
        Err(RealtimeError::Unavailable)
    ));
}

#[tokio::test]
async fn sign_in_resolves_with_pushed_credentials() {
    let (endpoint, hub) = spawn_hub().await.expect("spawn hub");
    let auth = ReticulumAuth::new(endpoint, "hubs");

    let pending = auth
        .start_authentication("a@b.com")
        .await
        .expect("start authentication");
    let token = tokio::time::timeout(Duration::from_secs(5), pending.complete())
        .await
        .expect("credentials in time")
        .expect("credentials");

    assert_eq!(token, "cred-token");
    let requests = hub.frames_with_event("auth_request").await;
    assert_eq!(requests.len(), 1);
    assert!(requests[0].topic.starts_with("auth:"));
    assert_eq!(
        requests[0].payload,
        json!({"email": "a@b.com", "origin": "hubs"})
    );
}

#[tokio::test]
async fn closed_channel_fails_pending_sign_in() {
    let (endpoint, _) = spawn_hub().await.expect("spawn hub");
    let auth = ReticulumAuth::new(endpoint, "hubs");

    let pending = auth
        .start_authentication(CLOSED_EMAIL)
        .await
        .expect("start authentication");
    let outcome = tokio::time::timeout(Duration::from_secs(5), pending.complete())
        .await
        .expect("outcome in time");

    assert!(matches!(outcome, Err(RealtimeError::Closed)));
}

#[tokio::test]
async fn perms_token_is_read_from_the_ret_channel() {
    let (endpoint, hub) = spawn_hub().await.expect("spawn hub");
    let auth = ReticulumAuth::new(endpoint, "hubs");

    let perms = auth
        .refresh_perms_token("cred-token")
        .await
        .expect("perms token");

    assert_eq!(perms, "perms-token");
    let joins = hub.frames_with_event("phx_join").await;
    assert_eq!(joins[0].topic, "ret");
    assert_eq!(
        joins[0].payload,
        json!({"hub_id": "index", "token": "cred-token"})
    );
}

#[tokio::test]
async fn verification_casts_token_and_payload() {
    let (endpoint, hub) = spawn_hub().await.expect("spawn hub");
    let auth = ReticulumAuth::new(endpoint, "hubs");
    let params = VerifyParams {
        topic: "auth:abc".into(),
        token: "link-token".into(),
        payload: "link-payload".into(),
    };

    auth.verify_authentication(&params).await.expect("verify");

    let mut verified = Vec::new();
    for _ in 0..50 {
        verified = hub.frames_with_event("auth_verified").await;
        if !verified.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(verified.len(), 1);
    assert_eq!(verified[0].topic, "auth:abc");
    assert_eq!(
        verified[0].payload,
        json!({"token": "link-token", "payload": "link-payload"})
    );
}

#[tokio::test]
async fn rejected_join_surfaces_the_reason() {
    let (endpoint, _) = spawn_hub().await.expect("spawn hub");
    let socket = PhoenixSocket::connect(&endpoint).await.expect("connect");

    let err = socket
        .join("forbidden", json!({}))
        .await
        .err()
        .expect("join must fail");

    match err {
        RealtimeError::JoinRejected { topic, reason } => {
            assert_eq!(topic, "forbidden");
            assert!(reason.contains("unauthorized"));
        }
        other => panic!("unexpected error: {other}"),
    }
    socket.close().await;
}

#[test]
fn verify_params_read_link_query_names() {
    let params: VerifyParams = serde_json::from_value(json!({
        "auth_topic": "auth:1",
        "auth_token": "t",
        "auth_payload": "p"
    }))
    .expect("params");
    assert_eq!(params.topic, "auth:1");
    assert_eq!(params.token, "t");
    assert_eq!(params.payload, "p");
}
