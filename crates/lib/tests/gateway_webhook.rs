//! End-to-end: a Telegram webhook update goes through the gateway and the reply is posted
//! to a mock Bot API server.

mod support;

use axum::{
    body::Bytes,
    extract::{Path, State},
    routing::post,
    Json, Router,
};
use relay::config::Config;
use relay::gateway;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use support::{free_port, scripted_client, Script};

type Calls = Arc<Mutex<Vec<(String, serde_json::Value)>>>;

async fn bot_api(
    State(calls): State<Calls>,
    Path((_bot, method)): Path<(String, String)>,
    body: Bytes,
) -> Json<serde_json::Value> {
    let body = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    calls.lock().unwrap().push((method, body));
    Json(json!({ "ok": true, "result": true }))
}

/// Start a mock Telegram Bot API; returns its base URL and the recorded calls.
async fn start_mock_bot_api() -> (String, Calls) {
    let calls: Calls = Arc::new(Mutex::new(Vec::new()));
    let app = Router::new()
        .route("/:bot/:method", post(bot_api))
        .with_state(calls.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock bot api");
    let addr = listener.local_addr().expect("local_addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{}", addr), calls)
}

fn calls_for(calls: &Calls, method: &str) -> Vec<serde_json::Value> {
    calls
        .lock()
        .unwrap()
        .iter()
        .filter(|(m, _)| m == method)
        .map(|(_, b)| b.clone())
        .collect()
}

#[tokio::test]
async fn webhook_update_is_answered_in_same_chat() {
    let (api_base, calls) = start_mock_bot_api().await;
    let port = free_port();

    let mut config = Config::default();
    config.gateway.port = port;
    config.delivery.inter_chunk_delay_ms = 0;
    config.channels.telegram.bot_token = Some("123:abc".to_string());
    config.channels.telegram.webhook_url = Some("https://relay.example/telegram/webhook".to_string());
    config.channels.telegram.webhook_secret = Some("s3cret".to_string());
    config.channels.telegram.api_base = Some(api_base);

    let (client, _, _) = scripted_client(Script::Echo);
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let gateway_handle = tokio::spawn(gateway::run_gateway_with(config, client, async move {
        let _ = stop_rx.await;
    }));

    let http = reqwest::Client::new();
    let base = format!("http://127.0.0.1:{}", port);
    let mut up = false;
    for _ in 0..100 {
        if let Ok(resp) = http.get(format!("{}/", base)).send().await {
            if resp.status().is_success() {
                up = true;
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(up, "gateway did not come up");
    assert_eq!(calls_for(&calls, "setWebhook").len(), 1);

    let update = json!({
        "update_id": 1,
        "message": { "chat": { "id": 555 }, "from": { "id": 7 }, "text": "hi there" }
    });

    let forbidden = http
        .post(format!("{}/telegram/webhook", base))
        .header("X-Telegram-Bot-Api-Secret-Token", "wrong")
        .json(&update)
        .send()
        .await
        .expect("post webhook");
    assert_eq!(forbidden.status().as_u16(), 403);

    let malformed = http
        .post(format!("{}/telegram/webhook", base))
        .header("X-Telegram-Bot-Api-Secret-Token", "s3cret")
        .body("{not json")
        .send()
        .await
        .expect("post webhook");
    assert_eq!(malformed.status().as_u16(), 200);

    let accepted = http
        .post(format!("{}/telegram/webhook", base))
        .header("X-Telegram-Bot-Api-Secret-Token", "s3cret")
        .json(&update)
        .send()
        .await
        .expect("post webhook");
    assert_eq!(accepted.status().as_u16(), 200);

    let mut sent = Vec::new();
    for _ in 0..100 {
        sent = calls_for(&calls, "sendMessage");
        if !sent.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(sent.len(), 1, "expected one reply, got {:?}", sent);
    assert_eq!(sent[0]["chat_id"], json!("555"));
    assert_eq!(sent[0]["text"], json!("echo: hi there"));

    drop(http);
    stop_tx.send(()).expect("gateway still running");
    let result = tokio::time::timeout(Duration::from_secs(10), gateway_handle)
        .await
        .expect("gateway stops within grace period")
        .expect("gateway task joined");
    assert!(result.is_ok(), "gateway returned error: {:?}", result.err());
    assert_eq!(calls_for(&calls, "deleteWebhook").len(), 1);
}
