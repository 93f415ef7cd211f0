//! Gateway tests against a real server socket.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

use messaging_core::config::Config;
use messaging_core::middleware::auth::Claims;
use messaging_core::routes::build_router;
use messaging_core::state::AppState;
use messaging_core::store::MemoryStore;

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn spawn_server() -> SocketAddr {
    let state = AppState::new(Arc::new(MemoryStore::new()), Config::test_defaults());
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn token_for(user_id: Uuid) -> String {
    let claims = Claims {
        sub: user_id.to_string(),
        exp: (chrono::Utc::now() + chrono::Duration::hours(1)).timestamp(),
    };
    jsonwebtoken::encode(
        &jsonwebtoken::Header::default(),
        &claims,
        &jsonwebtoken::EncodingKey::from_secret("test-secret".as_bytes()),
    )
    .unwrap()
}

async fn connect_ws(addr: SocketAddr, user_id: Uuid) -> Ws {
    let url = format!("ws://{addr}/ws?token={}", token_for(user_id));
    let (ws, _) = connect_async(url).await.expect("websocket upgrade failed");
    ws
}

/// Reads frames until one of the wanted type arrives; unrelated events
/// (presence churn from other connections) are skipped.
async fn next_event(ws: &mut Ws, wanted: &str) -> Value {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let msg = ws
                .next()
                .await
                .expect("stream ended")
                .expect("websocket error");
            if let WsMessage::Text(text) = msg {
                let value: Value = serde_json::from_str(&text).unwrap();
                if value["type"] == wanted {
                    return value;
                }
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {wanted} event"))
}

/// Like `next_event`, but also skips presence events for other users
/// (every connection sees its own online broadcast).
async fn next_presence_of(ws: &mut Ws, user_id: Uuid) -> Value {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = next_event(ws, "user_presence").await;
            if event["user_id"] == user_id.to_string() {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for presence event")
}

async fn send_event(ws: &mut Ws, event: Value) {
    ws.send(WsMessage::Text(event.to_string())).await.unwrap();
}

/// Joins are processed asynchronously on their own socket; give the server
/// a moment before triggering fan-out from another connection.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(250)).await;
}

/// Creates a direct conversation over REST and returns its id.
async fn create_direct(addr: SocketAddr, requester: Uuid, other: Uuid) -> Uuid {
    let client = reqwest::Client::new();
    let body: Value = client
        .post(format!("http://{addr}/conversations"))
        .bearer_auth(token_for(requester))
        .json(&json!({ "kind": "direct", "participant_ids": [other] }))
        .send()
        .await
        .unwrap()
        .error_for_status()
        .unwrap()
        .json()
        .await
        .unwrap();
    body["conversation"]["id"].as_str().unwrap().parse().unwrap()
}

#[tokio::test]
async fn upgrade_without_valid_token_is_rejected() {
    let addr = spawn_server().await;

    let err = connect_async(format!("ws://{addr}/ws")).await.unwrap_err();
    match err {
        tokio_tungstenite::tungstenite::Error::Http(response) => {
            assert_eq!(response.status(), 401);
        }
        other => panic!("expected http rejection, got {other:?}"),
    }

    let err = connect_async(format!("ws://{addr}/ws?token=garbage"))
        .await
        .unwrap_err();
    match err {
        tokio_tungstenite::tungstenite::Error::Http(response) => {
            assert_eq!(response.status(), 401);
        }
        other => panic!("expected http rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn joining_a_foreign_conversation_yields_error_event() {
    let addr = spawn_server().await;
    let eve = Uuid::new_v4();
    let mut ws = connect_ws(addr, eve).await;

    send_event(
        &mut ws,
        json!({ "type": "join_conversation", "conversation_id": Uuid::new_v4() }),
    )
    .await;

    let event = next_event(&mut ws, "error").await;
    assert_eq!(event["code"], "NOT_PARTICIPANT");
}

#[tokio::test]
async fn messages_fan_out_to_subscribers() {
    let addr = spawn_server().await;
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let conv = create_direct(addr, alice, bob).await;

    let mut alice_ws = connect_ws(addr, alice).await;
    let mut bob_ws = connect_ws(addr, bob).await;
    send_event(
        &mut alice_ws,
        json!({ "type": "join_conversation", "conversation_id": conv }),
    )
    .await;
    send_event(
        &mut bob_ws,
        json!({ "type": "join_conversation", "conversation_id": conv }),
    )
    .await;
    settle().await;

    // Over the socket from alice...
    send_event(
        &mut alice_ws,
        json!({
            "type": "send_message",
            "conversation_id": conv,
            "kind": "text",
            "text": "hello bob"
        }),
    )
    .await;

    let event = next_event(&mut bob_ws, "new_message").await;
    assert_eq!(event["conversation_id"], conv.to_string());
    assert_eq!(event["message"]["text"], "hello bob");
    assert_eq!(event["message"]["author_id"], alice.to_string());

    // ...and over REST from bob; both paths reach every subscriber.
    let client = reqwest::Client::new();
    client
        .post(format!("http://{addr}/conversations/{conv}/messages"))
        .bearer_auth(token_for(bob))
        .json(&json!({ "kind": "text", "text": "hi alice" }))
        .send()
        .await
        .unwrap()
        .error_for_status()
        .unwrap();

    let event = next_event(&mut alice_ws, "new_message").await;
    assert_eq!(event["message"]["text"], "hi alice");
}

#[tokio::test]
async fn typing_indicator_broadcasts_and_expires() {
    let addr = spawn_server().await;
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let conv = create_direct(addr, alice, bob).await;

    let mut alice_ws = connect_ws(addr, alice).await;
    let mut bob_ws = connect_ws(addr, bob).await;
    send_event(
        &mut bob_ws,
        json!({ "type": "join_conversation", "conversation_id": conv }),
    )
    .await;
    settle().await;

    send_event(
        &mut alice_ws,
        json!({ "type": "typing_start", "conversation_id": conv }),
    )
    .await;

    let event = next_event(&mut bob_ws, "user_typing").await;
    assert_eq!(event["user_id"], alice.to_string());
    assert_eq!(event["is_typing"], true);

    // No typing_stop sent; the short test expiry clears it on its own.
    let event = next_event(&mut bob_ws, "user_typing").await;
    assert_eq!(event["user_id"], alice.to_string());
    assert_eq!(event["is_typing"], false);
}

#[tokio::test]
async fn presence_follows_the_last_connection() {
    let addr = spawn_server().await;
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());

    let mut alice_ws = connect_ws(addr, alice).await;

    // First connection flips bob online.
    let bob_ws_1 = connect_ws(addr, bob).await;
    let event = next_presence_of(&mut alice_ws, bob).await;
    assert_eq!(event["state"], "online");

    // A second device connecting is silent; closing it changes nothing.
    let bob_ws_2 = connect_ws(addr, bob).await;
    drop(bob_ws_2);

    // Only the last connection closing flips bob offline.
    drop(bob_ws_1);
    let event = next_presence_of(&mut alice_ws, bob).await;
    assert_eq!(event["state"], "offline");
}
