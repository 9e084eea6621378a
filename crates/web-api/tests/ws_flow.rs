mod support;

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::time::timeout;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, http::StatusCode, Error as WsError, Message},
    MaybeTlsStream, WebSocketStream,
};

use support::TestApp;

type Socket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// 读取下一条文本消息并解析为 JSON
async fn next_json(socket: &mut Socket) -> Value {
    loop {
        let message = timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("message within deadline")
            .expect("socket open")
            .expect("valid frame");
        match message {
            Message::Text(text) => return serde_json::from_str(text.as_str()).expect("json"),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected message {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_health_over_tcp() {
    let app = TestApp::new();
    let server = app.serve().await;

    let response = reqwest::get(server.http("/health")).await.expect("health");
    assert!(response.status().is_success());
    assert_eq!(response.text().await.unwrap(), "ok");
}

#[tokio::test]
async fn test_websocket_broadcast_flow() {
    let app = TestApp::new();
    let server = app.serve().await;
    let (alice_id, alice_token) = app.user("alice", false).await;
    let (bob_id, bob_token) = app.user("bob", false).await;

    let (mut alice, _) = connect_async(server.ws(&alice_token)).await.expect("alice connects");
    while !app.hub.is_online(alice_id).await.unwrap() {
        tokio::task::yield_now().await;
    }
    let (mut bob, _) = connect_async(server.ws(&bob_token)).await.expect("bob connects");

    let join = next_json(&mut alice).await;
    assert_eq!(join["type"], "user_join");
    assert_eq!(join["payload"]["user_id"], bob_id.to_string());
    assert_eq!(join["payload"]["username"], "bob");

    alice
        .send(Message::Text(
            r#"{"type":"message","payload":{"text":"hi"}}"#.into(),
        ))
        .await
        .unwrap();

    let message = next_json(&mut bob).await;
    assert_eq!(message["type"], "message");
    assert_eq!(message["sender"], alice_id.to_string());
    assert_eq!(message["payload"]["text"], "hi");

    bob.close(None).await.unwrap();
    let leave = next_json(&mut alice).await;
    assert_eq!(leave["type"], "user_leave");
    assert_eq!(leave["payload"]["user_id"], bob_id.to_string());
}

#[tokio::test]
async fn test_websocket_accepts_bearer_header() {
    let app = TestApp::new();
    let server = app.serve().await;
    let (user_id, token) = app.user("carol", false).await;

    let mut request = format!("ws://{}/api/v1/ws", server.addr)
        .into_client_request()
        .unwrap();
    request
        .headers_mut()
        .insert("Authorization", format!("Bearer {token}").parse().unwrap());

    let (_socket, response) = connect_async(request).await.expect("upgrade");
    assert_eq!(response.status(), StatusCode::SWITCHING_PROTOCOLS);

    for _ in 0..100 {
        if app.hub.is_online(user_id).await.unwrap() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("user never came online");
}

#[tokio::test]
async fn test_websocket_rejects_invalid_token() {
    let app = TestApp::new();
    let server = app.serve().await;

    match connect_async(server.ws("not-a-token")).await {
        Err(WsError::Http(response)) => assert_eq!(response.status(), StatusCode::UNAUTHORIZED),
        Err(other) => panic!("unexpected error {other:?}"),
        Ok(_) => panic!("upgrade must be refused"),
    }
}

#[tokio::test]
async fn test_websocket_requires_credential() {
    let app = TestApp::new();
    let server = app.serve().await;

    match connect_async(format!("ws://{}/api/v1/ws", server.addr)).await {
        Err(WsError::Http(response)) => assert_eq!(response.status(), StatusCode::BAD_REQUEST),
        Err(other) => panic!("unexpected error {other:?}"),
        Ok(_) => panic!("upgrade must be refused"),
    }
}

#[tokio::test]
async fn test_websocket_closes_when_user_cannot_be_resolved() {
    let app = TestApp::new();
    let server = app.serve().await;
    let (user_id, token) = app.stranger_token();

    let (mut socket, _) = connect_async(server.ws(&token)).await.expect("upgrade");
    let message = timeout(Duration::from_secs(5), socket.next())
        .await
        .expect("close within deadline");
    assert!(matches!(message, Some(Ok(Message::Close(_))) | None | Some(Err(_))));
    assert!(!app.hub.is_online(user_id).await.unwrap());
}

#[tokio::test]
async fn test_malformed_frame_gets_error_envelope() {
    let app = TestApp::new();
    let server = app.serve().await;
    let (_, token) = app.user("dave", false).await;

    let (mut socket, _) = connect_async(server.ws(&token)).await.expect("upgrade");
    socket.send(Message::Text("{oops".into())).await.unwrap();

    let error = next_json(&mut socket).await;
    assert_eq!(error["type"], "error");
    assert_eq!(error["payload"]["error"], "Invalid message format");
}
