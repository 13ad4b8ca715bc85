//! End-to-end test: two real WebSocket clients talking through the relay,
//! with REST used for accounts and history.
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use murmur_db::Database;
use murmur_server::config::Config;
use murmur_server::{ServerState, build_router};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn spawn_server() -> SocketAddr {
    spawn_server_with_db().await.0
}

async fn spawn_server_with_db() -> (SocketAddr, Arc<Database>) {
    let config = Config {
        host: "127.0.0.1".into(),
        port: 0,
        db_path: PathBuf::from(":memory:"),
        jwt_secret: "flow-test-secret".into(),
        token_ttl_hours: 1,
        upload_dir: std::env::temp_dir().join(format!("murmur_flow_{}", uuid::Uuid::new_v4())),
        max_upload_bytes: 1024 * 1024,
    };
    let state = ServerState::new(&config, Database::open_in_memory().unwrap());
    let db = state.app.db.clone();
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    (addr, db)
}

/// Registers a user and returns (id, token).
async fn register(client: &reqwest::Client, addr: SocketAddr, username: &str) -> (i64, String) {
    let res: Value = client
        .post(format!("http://{}/api/auth/register", addr))
        .json(&json!({ "username": username, "password": "password123" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    (
        res["user"]["id"].as_i64().unwrap(),
        res["token"].as_str().unwrap().to_string(),
    )
}

async fn connect(addr: SocketAddr, token: &str) -> Ws {
    let (ws, _) = connect_async(format!("ws://{}/gateway?token={}", addr, token))
        .await
        .unwrap();
    ws
}

/// Next JSON event, skipping control frames.
async fn next_event(ws: &mut Ws) -> Value {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => return serde_json::from_str(text.as_str()).unwrap(),
                Some(Ok(_)) => continue,
                other => panic!("connection ended: {:?}", other),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

async fn send(ws: &mut Ws, event: Value) {
    ws.send(Message::text(event.to_string())).await.unwrap();
}

#[tokio::test]
async fn gate_rejects_bad_tokens() {
    let addr = spawn_server().await;

    assert!(connect_async(format!("ws://{}/gateway", addr)).await.is_err());
    assert!(connect_async(format!("ws://{}/gateway?token=nope", addr)).await.is_err());
}

#[tokio::test]
async fn direct_messaging_flow() {
    let addr = spawn_server().await;
    let http = reqwest::Client::new();
    let (alice_id, alice_token) = register(&http, addr, "alice").await;
    let (bob_id, bob_token) = register(&http, addr, "bob").await;

    let mut bob = connect(addr, &bob_token).await;
    let ready = next_event(&mut bob).await;
    assert_eq!(ready["event"], "ready");
    assert_eq!(ready["data"]["userId"].as_i64(), Some(bob_id));

    let mut alice = connect(addr, &alice_token).await;
    assert_eq!(next_event(&mut alice).await["event"], "ready");
    assert_eq!(
        next_event(&mut alice).await,
        json!({ "event": "status:user-online", "data": { "userId": bob_id } })
    );
    assert_eq!(
        next_event(&mut bob).await,
        json!({ "event": "status:user-online", "data": { "userId": alice_id } })
    );

    // Live message: delivered to bob, echoed to alice
    send(&mut alice, json!({ "event": "message:send", "data": { "recipientId": bob_id, "content": "hi" } })).await;
    let to_bob = next_event(&mut bob).await;
    let echo = next_event(&mut alice).await;
    assert_eq!(to_bob["event"], "message:receive");
    assert_eq!(to_bob["data"]["content"], "hi");
    assert_eq!(to_bob["data"]["sender_id"].as_i64(), Some(alice_id));
    assert_eq!(to_bob, echo);
    let conversation_id = to_bob["data"]["conversation_id"].as_i64().unwrap();

    // Garbage frames are ignored and the connection keeps working
    alice.send(Message::text("not json".to_string())).await.unwrap();

    send(&mut alice, json!({ "event": "typing", "data": { "recipientId": bob_id } })).await;
    assert_eq!(
        next_event(&mut bob).await,
        json!({ "event": "typing", "data": { "senderId": alice_id } })
    );

    // Bob leaves; alice hears about it
    bob.close(None).await.unwrap();
    assert_eq!(
        next_event(&mut alice).await,
        json!({ "event": "status:user-offline", "data": { "userId": bob_id } })
    );

    // Offline recipient: still persisted and echoed
    send(
        &mut alice,
        json!({
            "event": "file:send",
            "data": {
                "recipientId": bob_id,
                "fileUrl": "/uploads/x.png",
                "fileName": "x.png",
                "fileType": "image/png"
            }
        }),
    )
    .await;
    let file_echo = next_event(&mut alice).await;
    assert_eq!(file_echo["data"]["content_type"], "image");
    let descriptor: Value = serde_json::from_str(file_echo["data"]["content"].as_str().unwrap()).unwrap();
    assert_eq!(
        descriptor,
        json!({ "url": "/uploads/x.png", "name": "x.png", "type": "image/png" })
    );

    // History, as bob would fetch it after coming back
    let history: Value = http
        .get(format!("http://{}/api/chat/{}/messages?limit=50&offset=0", addr, conversation_id))
        .bearer_auth(&bob_token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let kinds: Vec<&str> = history
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["content_type"].as_str().unwrap())
        .collect();
    assert_eq!(kinds, vec!["text", "image"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn superseded_connection_finishes_its_send() {
    let (addr, db) = spawn_server_with_db().await;
    let http = reqwest::Client::new();
    let (alice_id, alice_token) = register(&http, addr, "alice").await;
    let (bob_id, bob_token) = register(&http, addr, "bob").await;

    let mut bob = connect(addr, &bob_token).await;
    let mut alice = connect(addr, &alice_token).await;
    assert_eq!(next_event(&mut alice).await["event"], "ready");

    // Park the store so alice's send is still in flight when she reconnects
    let (locked_tx, locked_rx) = tokio::sync::oneshot::channel();
    let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
    let holder_db = db.clone();
    let holder = tokio::task::spawn_blocking(move || {
        holder_db.with_conn(|_| {
            let _ = locked_tx.send(());
            let _ = release_rx.recv();
            Ok(())
        })
    });
    locked_rx.await.unwrap();

    send(&mut alice, json!({ "event": "message:send", "data": { "recipientId": bob_id, "content": "in flight" } })).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let mut alice_again = connect(addr, &alice_token).await;
    assert_eq!(next_event(&mut alice_again).await["event"], "ready");
    tokio::time::sleep(Duration::from_millis(200)).await;

    release_tx.send(()).unwrap();
    holder.await.unwrap().unwrap();

    let delivered = loop {
        let event = next_event(&mut bob).await;
        if event["event"] == "message:receive" {
            break event;
        }
    };
    assert_eq!(delivered["data"]["content"], "in flight");
    assert_eq!(delivered["data"]["sender_id"].as_i64(), Some(alice_id));

    let conversation = db.find_conversation_between(alice_id, bob_id).unwrap().unwrap();
    assert_eq!(db.find_messages_by_conversation(conversation.id, 50, 0).unwrap().len(), 1);
}
