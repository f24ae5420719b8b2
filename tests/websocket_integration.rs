//! End-to-end WebSocket tests against a live server and a fake upstream.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use medseek::AppState;
use medseek::hub::ASSISTANT_ID;
use medseek::llm::{ChatCompletionsGateway, MessageRole, prompts};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

mod common;
use common::{
    closed_base_url, completion_body, llm_settings, spawn_server, spawn_upstream, test_state,
    wait_until,
};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start(base_url: &str) -> (SocketAddr, AppState) {
    let gateway = Arc::new(ChatCompletionsGateway::new(llm_settings(base_url)));
    let state = test_state(gateway);
    let addr = spawn_server(medseek::server::build_router(state.clone())).await;
    (addr, state)
}

async fn connect(addr: SocketAddr, session_id: &str, user_id: &str) -> Client {
    let url = format!("ws://{addr}/ws?session_id={session_id}&user_id={user_id}");
    let (socket, _) = connect_async(url).await.unwrap();
    socket
}

async fn next_frame(client: &mut Client) -> Value {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("no frame within deadline")
            .expect("connection ended")
            .unwrap();
        if let Message::Text(text) = message {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn send_frame(client: &mut Client, frame: Value) {
    client
        .send(Message::Text(frame.to_string().into()))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_turn_round_trip() {
    let (base, recorded) =
        spawn_upstream(|_| axum::Json(completion_body("hi there")).into_response()).await;
    let (addr, state) = start(&base).await;
    let session = state.hub.store().create_session("s1", "u1", None).unwrap();
    assert_eq!(session.specialty, "obstetrics");

    let mut client = connect(addr, "s1", "u1").await;
    let mut observer = connect(addr, "s1", "doctor").await;
    wait_until(|| state.hub.registry().session_connection_count("s1") == 2).await;

    send_frame(&mut client, json!({"type": "message", "content": "hello"})).await;

    for socket in [&mut client, &mut observer] {
        let echo = next_frame(socket).await;
        assert_eq!(
            echo,
            json!({"type": "message", "content": "hello", "user_id": "u1", "session_id": "s1"})
        );
        let reply = next_frame(socket).await;
        assert_eq!(
            reply,
            json!({"type": "message", "content": "hi there", "user_id": "assistant"})
        );
    }

    let requests = recorded.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(
        requests[0].1["messages"],
        json!([
            {"role": "system", "content": prompts::preamble_for("obstetrics")},
            {"role": "user", "content": "hello"}
        ])
    );

    let messages = state.hub.store().list_messages("s1");
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, MessageRole::User);
    assert_eq!(messages[1].role, MessageRole::Assistant);
    assert_eq!(messages[1].user_id, ASSISTANT_ID);
}

#[tokio::test]
async fn test_upstream_failure_yields_error_frame() {
    let (addr, state) = start(&closed_base_url().await).await;
    state.hub.store().create_session("s1", "u1", None).unwrap();

    let mut client = connect(addr, "s1", "u1").await;
    send_frame(&mut client, json!({"type": "message", "content": "hello"})).await;

    let echo = next_frame(&mut client).await;
    assert_eq!(echo["content"], "hello");
    let error = next_frame(&mut client).await;
    assert_eq!(error["type"], "error");
    assert!(
        error["content"]
            .as_str()
            .unwrap()
            .starts_with("Error processing message:")
    );

    let messages = state.hub.store().list_messages("s1");
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].role, MessageRole::User);

    // The channel stays usable after a failed turn.
    send_frame(&mut client, json!({"type": "status", "content": "typing"})).await;
    let status = next_frame(&mut client).await;
    assert_eq!(status["type"], "status");
}

#[tokio::test]
async fn test_sessions_are_isolated() {
    let (base, _) = spawn_upstream(|_| axum::Json(completion_body("ok")).into_response()).await;
    let (addr, state) = start(&base).await;
    state.hub.store().create_session("s1", "u1", None).unwrap();
    state.hub.store().create_session("s2", "u2", None).unwrap();

    let mut first = connect(addr, "s1", "u1").await;
    let mut second = connect(addr, "s2", "u2").await;
    wait_until(|| state.hub.registry().connection_count() == 2).await;

    send_frame(&mut first, json!({"type": "status", "content": "only s1"})).await;
    send_frame(&mut second, json!({"type": "status", "content": "only s2"})).await;

    assert_eq!(next_frame(&mut first).await["content"], "only s1");
    assert_eq!(next_frame(&mut second).await["content"], "only s2");
}

#[tokio::test]
async fn test_malformed_frame_keeps_connection_open() {
    let (base, recorded) =
        spawn_upstream(|_| axum::Json(completion_body("unused")).into_response()).await;
    let (addr, state) = start(&base).await;
    state.hub.store().create_session("s1", "u1", None).unwrap();

    let mut client = connect(addr, "s1", "u1").await;
    client
        .send(Message::Text("{not json".into()))
        .await
        .unwrap();
    send_frame(&mut client, json!({"type": "status", "content": "still here"})).await;

    assert_eq!(next_frame(&mut client).await["content"], "still here");
    assert!(recorded.requests().is_empty());
}

#[tokio::test]
async fn test_binary_frames_are_decoded_as_json() {
    let (base, _) = spawn_upstream(|_| axum::Json(completion_body("ok")).into_response()).await;
    let (addr, state) = start(&base).await;
    state.hub.store().create_session("s1", "u1", None).unwrap();

    let mut client = connect(addr, "s1", "u1").await;
    client
        .send(Message::Binary(vec![0xff, 0xfe].into()))
        .await
        .unwrap();
    let frame = json!({"type": "status", "content": "typing"}).to_string();
    client
        .send(Message::Binary(frame.into_bytes().into()))
        .await
        .unwrap();

    let relayed = next_frame(&mut client).await;
    assert_eq!(
        relayed,
        json!({"type": "status", "content": "typing", "user_id": "u1", "session_id": "s1"})
    );
}

#[tokio::test]
async fn test_disconnect_unregisters_connection() {
    let (base, _) = spawn_upstream(|_| axum::Json(completion_body("ok")).into_response()).await;
    let (addr, state) = start(&base).await;
    state.hub.store().create_session("s1", "u1", None).unwrap();

    let mut client = connect(addr, "s1", "u1").await;
    wait_until(|| state.hub.registry().connection_count() == 1).await;

    client.close(None).await.unwrap();
    wait_until(|| state.hub.registry().connection_count() == 0).await;
    assert_eq!(state.hub.registry().session_count(), 0);
}

#[tokio::test]
async fn test_close_session_notifies_and_rejects_turns() {
    let (base, recorded) =
        spawn_upstream(|_| axum::Json(completion_body("unused")).into_response()).await;
    let (addr, state) = start(&base).await;
    state.hub.store().create_session("s1", "u1", None).unwrap();

    let mut client = connect(addr, "s1", "u1").await;
    wait_until(|| state.hub.registry().connection_count() == 1).await;

    let response = reqwest::Client::new()
        .post(format!("http://{addr}/api/session/close?session_id=s1"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    let closed = next_frame(&mut client).await;
    assert_eq!(
        closed,
        json!({"type": "status", "content": "closed", "session_id": "s1"})
    );

    send_frame(&mut client, json!({"type": "message", "content": "late"})).await;
    assert_eq!(next_frame(&mut client).await["type"], "error");
    assert!(recorded.requests().is_empty());
}

#[tokio::test]
async fn test_hub_shutdown_closes_connections() {
    let (base, _) = spawn_upstream(|_| axum::Json(completion_body("ok")).into_response()).await;
    let (addr, state) = start(&base).await;
    state.hub.store().create_session("s1", "u1", None).unwrap();

    let mut client = connect(addr, "s1", "u1").await;
    wait_until(|| state.hub.registry().connection_count() == 1).await;

    state.hub.shutdown();

    let ended = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(message) = client.next().await {
            match message {
                Ok(Message::Close(_)) | Err(_) => return,
                Ok(_) => {}
            }
        }
    })
    .await;
    assert!(ended.is_ok());
    wait_until(|| state.hub.registry().connection_count() == 0).await;
}
