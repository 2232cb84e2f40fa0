use super::*;
use axum::{routing::post, Json, Router};
use serde_json::{json, Value};
use shared::domain::{BindType, EntityId};
use std::time::Duration;
use tokio::net::TcpListener;

use crate::realtime::RealtimeError;

async fn handle_member_login(Json(body): Json<Value>) -> Json<Value> {
    if body == json!({"account": "a@b.com", "password": "x"}) {
        Json(json!({
            "code": 200,
            "success": true,
            "data": {"id": 1, "name": "A", "token": "t"},
            "message": ""
        }))
    } else {
        Json(json!({"code": 500, "success": false, "data": null, "message": "wrong password"}))
    }
}

async fn spawn_backend() -> anyhow::Result<String> {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let app = Router::new().route("/app/v1/mem/memmember/login", post(handle_member_login));
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok(format!("http://{addr}"))
}

fn settings_for(origin: String) -> ClientSettings {
    ClientSettings {
        origin,
        profile: BuildProfile::Development,
        socket_url: None,
        ..ClientSettings::default()
    }
}

#[tokio::test]
async fn member_login_scenario_reaches_verification_step() {
    let origin = spawn_backend().await.expect("spawn backend");
    let client = SignInClient::new(settings_for(origin)).expect("client");
    let flow = client.sign_in_flow(None);

    flow.bind_member("a@b.com", "x").await;

    let info = client.session().snapshot().userinfo;
    assert_eq!(info.memberid, Some(EntityId::Number(1)));
    assert_eq!(info.name.as_deref(), Some("A"));
    assert_eq!(info.token.as_deref(), Some("t"));
    assert_eq!(info.bindtype, Some(BindType::Member));
    assert_eq!(info.bindtype.map(BindType::code), Some("0"));
    assert_eq!(flow.state().email, "a@b.com");
    assert_ne!(flow.state().step, SignInStep::Bind);
}

#[tokio::test]
async fn sign_in_without_socket_reports_failure_inline() {
    let origin = spawn_backend().await.expect("spawn backend");
    let client = SignInClient::new(settings_for(origin)).expect("client");
    let flow = client.sign_in_flow(None);

    flow.bind_member("a@b.com", "x").await;

    let mut states = flow.subscribe();
    let state = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            {
                let state = states.borrow_and_update();
                if !state.message.is_empty() {
                    return state.clone();
                }
            }
            states.changed().await.expect("flow alive");
        }
    })
    .await
    .expect("failure published");

    assert_eq!(state.step, SignInStep::WaitForVerification);
    assert!(state.message.contains("unavailable"));
    assert!(matches!(
        client.auth().sign_in("a@b.com").await,
        Err(AuthError::Realtime(RealtimeError::Unavailable))
    ));
}

#[tokio::test]
async fn rejected_member_login_surfaces_server_message() {
    let origin = spawn_backend().await.expect("spawn backend");
    let client = SignInClient::new(settings_for(origin)).expect("client");
    let flow = client.sign_in_flow(Some("/spoke".into()));

    flow.bind_member("a@b.com", "nope").await;

    let state = flow.state();
    assert_eq!(state.step, SignInStep::Bind);
    assert_eq!(state.message, "wrong password");
    assert_eq!(client.session().snapshot().userinfo.token, None);
    assert_eq!(flow.redirect_url(), None);
}

#[test]
fn client_uses_profile_base_path() {
    let client = SignInClient::new(settings_for("http://hubs.local".into())).expect("client");
    assert_eq!(client.settings().api_base_url(), "http://hubs.local/app");
}
