//! axum WebSocket 与 [`Frame`] 之间的适配

use std::future::ready;
use std::sync::Arc;

use application::{Frame, Gateway};
use axum::extract::ws::{close_code, CloseFrame, Message as WsMessage, WebSocket};
use domain::Principal;
use futures_util::{SinkExt, StreamExt};

fn to_frame(message: WsMessage) -> Frame {
    match message {
        WsMessage::Text(text) => Frame::Text(Arc::from(text.as_str())),
        WsMessage::Binary(bytes) => Frame::Binary(bytes.to_vec()),
        WsMessage::Ping(_) => Frame::Ping,
        WsMessage::Pong(_) => Frame::Pong,
        WsMessage::Close(_) => Frame::Close,
    }
}

fn to_message(frame: Frame) -> WsMessage {
    match frame {
        Frame::Text(text) => WsMessage::Text(text.as_ref().into()),
        Frame::Binary(bytes) => WsMessage::Binary(bytes.into()),
        Frame::Ping => WsMessage::Ping(Default::default()),
        Frame::Pong => WsMessage::Pong(Default::default()),
        Frame::Close => WsMessage::Close(Some(CloseFrame {
            code: close_code::NORMAL,
            reason: "".into(),
        })),
    }
}

/// 升级完成后接管 socket 直到连接关闭
pub async fn serve(mut socket: WebSocket, gateway: Gateway, principal: Principal) {
    let connection = match gateway.admit(principal).await {
        Ok(connection) => connection,
        Err(err) => {
            tracing::warn!(user_id = %principal.user_id, error = %err, "WebSocket 连接未能接入");
            let _ = socket
                .send(WsMessage::Close(Some(CloseFrame {
                    code: close_code::POLICY,
                    reason: "connection rejected".into(),
                })))
                .await;
            return;
        }
    };

    tracing::info!(
        connection_id = %connection.id(),
        user_id = %principal.user_id,
        "WebSocket 连接已建立"
    );

    let (sink, stream) = socket.split();
    let stream = stream.map(|message| message.map(to_frame));
    let sink = sink.with(|frame: Frame| ready(Ok::<_, axum::Error>(to_message(frame))));

    connection.run(stream, sink).await;
}
